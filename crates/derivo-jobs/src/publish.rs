//! Concurrency control and atomic publish protocol.
//!
//! Publishing a derivative follows five steps: freshness check, advisory
//! path lock, generation into a sibling temp file, validation, atomic
//! rename. Readers therefore only ever observe complete artifacts, and the
//! temp file is removed on every exit path.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use derivo_core::defaults::{LOCK_POLL_INTERVAL_MS, LOCK_STALE_SECS};
use derivo_core::{Error, Result};

/// Advisory filesystem lock scoped to one destination path.
///
/// Backed by `<dest>.lock` created with `create_new`, which is atomic on
/// POSIX filesystems. Crashed holders are detected by lock-file age and
/// taken over.
#[derive(Debug)]
pub struct PathLock {
    lock_path: PathBuf,
}

/// Lock file path for a destination: `<dest>.lock`.
fn lock_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

impl PathLock {
    /// Attempt to take the lock without waiting. Returns `None` when another
    /// live holder has it.
    pub fn try_acquire(dest: &Path) -> Result<Option<Self>> {
        Self::try_acquire_with_staleness(dest, Duration::from_secs(LOCK_STALE_SECS))
    }

    fn try_acquire_with_staleness(dest: &Path, stale_after: Duration) -> Result<Option<Self>> {
        let lock_path = lock_path_for(dest);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // One takeover pass: if the existing lock is older than the
        // staleness cutoff its holder is presumed dead.
        for attempt in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Some(Self { lock_path }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == 0 && lock_is_stale(&lock_path, stale_after) {
                        warn!(
                            subsystem = "publish",
                            lock = %lock_path.display(),
                            "Taking over stale lock"
                        );
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    return Ok(None);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(None)
    }

    /// Take the lock, waiting up to `wait` for the current holder.
    pub async fn acquire(dest: &Path, wait: Duration) -> Result<Self> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lock) = Self::try_acquire(dest)? {
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(Error::ConcurrencyBusy(format!(
                    "lock on {} still held after {}s",
                    dest.display(),
                    wait.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS)).await;
        }
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_is_stale(lock_path: &Path, stale_after: Duration) -> bool {
    match fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= stale_after)
            .unwrap_or(false),
        // Lock vanished between the open attempt and here; retry will win.
        Err(_) => true,
    }
}

/// Temp file next to the destination, renamed into place on commit.
///
/// Named `<dest>.<pid>.<rand8>.tmp` in the destination directory so the
/// final rename never crosses a filesystem boundary. Removed on drop unless
/// committed.
pub struct TempTarget {
    path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl TempTarget {
    pub fn new(dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let mut name = dest.as_os_str().to_os_string();
        name.push(format!(".{}.{}.tmp", std::process::id(), suffix));
        Ok(Self {
            path: PathBuf::from(name),
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    /// Path the builder should write to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the validated temp file to the destination.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.path, &self.dest)?;
        self.committed = true;
        debug!(
            subsystem = "publish",
            dest = %self.dest.display(),
            "Artifact published"
        );
        Ok(())
    }
}

impl Drop for TempTarget {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Whether an existing artifact can be served without regeneration:
/// present, non-empty, and at least as new as its source.
pub fn is_fresh(dest: &Path, source: &Path) -> bool {
    let dest_meta = match fs::metadata(dest) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if dest_meta.len() == 0 {
        return false;
    }
    match (dest_meta.modified(), fs::metadata(source).and_then(|m| m.modified())) {
        (Ok(dest_time), Ok(source_time)) => dest_time >= source_time,
        _ => false,
    }
}
