//! Integration tests for the lock-then-publish protocol.
//!
//! Pure filesystem tests: no database, no external tools. They exercise the
//! same acquire/build/commit sequence the generator runs, with stub builders
//! standing in for the real ones.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use derivo_jobs::{is_fresh, PathLock, TempTarget};

const PAYLOAD_LEN: usize = 4096;

/// The generator's publish sequence with a caller-supplied builder.
async fn publish_once<F>(dest: &Path, source: &Path, builder: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    if is_fresh(dest, source) {
        return Ok(());
    }
    let lock = PathLock::acquire(dest, Duration::from_secs(5)).await?;
    if is_fresh(dest, source) {
        drop(lock);
        return Ok(());
    }
    let tmp = TempTarget::new(dest)?;
    builder(tmp.path())?;
    tmp.commit()?;
    drop(lock);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_produce_one_complete_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("report.docx");
    let dest = dir.path().join("report.thumb.jpg");
    std::fs::write(&source, b"source bytes").unwrap();

    let writers = 8usize;
    let barrier = Arc::new(Barrier::new(writers));
    let mut handles = Vec::new();

    for id in 0..writers {
        let barrier = barrier.clone();
        let source = source.clone();
        let dest = dest.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            publish_once(&dest, &source, |tmp| {
                // Write in two chunks with a pause in between so a torn
                // publish would be observable as mixed content.
                let payload = vec![id as u8 + 1; PAYLOAD_LEN];
                std::fs::write(tmp, &payload[..PAYLOAD_LEN / 2])?;
                std::thread::sleep(Duration::from_millis(5));
                let mut existing = std::fs::read(tmp)?;
                existing.extend_from_slice(&payload[PAYLOAD_LEN / 2..]);
                std::fs::write(tmp, existing)
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Exactly one complete artifact, written by a single winner.
    let published = std::fs::read(&dest).unwrap();
    assert_eq!(published.len(), PAYLOAD_LEN);
    let first = published[0];
    assert!(first >= 1 && first as usize <= writers);
    assert!(published.iter().all(|&b| b == first), "artifact is torn");

    // No temp or lock files left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.ends_with(".tmp") || n.ends_with(".lock"))
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
}

#[tokio::test]
async fn test_fresh_artifact_short_circuits_builder() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("photo.jpg");
    let dest = dir.path().join("photo.thumb.jpg");
    std::fs::write(&source, b"image bytes").unwrap();

    let builds = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let builds = builds.clone();
        publish_once(&dest, &source, move |tmp| {
            builds.fetch_add(1, Ordering::SeqCst);
            std::fs::write(tmp, b"thumbnail")
        })
        .await
        .unwrap();
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1, "fresh artifact was rebuilt");
    assert_eq!(std::fs::read(&dest).unwrap(), b"thumbnail");
}

#[tokio::test]
async fn test_source_update_invalidates_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("clip.mp4");
    let dest = dir.path().join("clip.thumb.jpg");

    std::fs::write(&source, b"v1").unwrap();
    publish_once(&dest, &source, |tmp| std::fs::write(tmp, b"thumb v1"))
        .await
        .unwrap();

    // mtime granularity on some filesystems is one second.
    std::thread::sleep(Duration::from_millis(1100));
    std::fs::write(&source, b"v2 with more bytes").unwrap();
    assert!(!is_fresh(&dest, &source));

    publish_once(&dest, &source, |tmp| std::fs::write(tmp, b"thumb v2"))
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"thumb v2");
}

#[tokio::test]
async fn test_failed_build_leaves_previous_artifact_intact() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("doc.pdf");
    let dest = dir.path().join("doc.thumb.jpg");

    std::fs::write(&source, b"v1").unwrap();
    publish_once(&dest, &source, |tmp| std::fs::write(tmp, b"good thumb"))
        .await
        .unwrap();

    std::thread::sleep(Duration::from_millis(1100));
    std::fs::write(&source, b"v2").unwrap();

    let result = publish_once(&dest, &source, |tmp| {
        std::fs::write(tmp, b"partial")?;
        Err(std::io::Error::other("tool crashed"))
    })
    .await;
    assert!(result.is_err());

    // Old artifact still readable, temp file gone, lock released.
    assert_eq!(std::fs::read(&dest).unwrap(), b"good thumb");
    assert!(PathLock::try_acquire(&dest).unwrap().is_some());
    let tmp_leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.ends_with(".tmp"))
        .count();
    assert_eq!(tmp_leftovers, 0);
}
