//! External tool invocation.
//!
//! Tools always run via argument vectors, never through a shell. Output is
//! fully captured and every invocation carries a wall-clock timeout; on
//! expiry the child process is killed.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use derivo_core::defaults::{STDERR_EXCERPT_CHARS, TOOL_PROBE_TTL_SECS};
use derivo_core::{Error, Result};

/// Captured output of a successful tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Bound a stderr stream to a loggable excerpt.
pub fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(STDERR_EXCERPT_CHARS).collect()
    }
}

/// Run an external tool with a timeout, capturing stdout and stderr.
///
/// Nonzero exit and timeout are both [`Error::TransientTool`]: the next
/// attempt may succeed once load drops or the tool environment is fixed.
pub async fn run_tool<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    timeout: Duration,
) -> Result<ToolOutput> {
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    debug!(subsystem = "tools", tool = program, "Running external tool");

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            warn!(
                subsystem = "tools",
                tool = program,
                timeout_secs = timeout.as_secs(),
                "Tool timed out, child killed"
            );
            Error::TransientTool(format!(
                "{} timed out after {}s",
                program,
                timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::TransientTool(format!("failed to execute {}: {}", program, e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(Error::TransientTool(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr_excerpt(&stderr)
        )));
    }

    debug!(
        subsystem = "tools",
        tool = program,
        duration_ms = start.elapsed().as_millis() as u64,
        "Tool finished"
    );

    Ok(ToolOutput {
        stdout: output.stdout,
        stderr,
    })
}

/// Version-probe argument for a tool (ffmpeg family uses a single dash).
fn probe_arg(program: &str) -> &'static str {
    match program {
        "ffmpeg" | "ffprobe" => "-version",
        "pdftoppm" => "-v",
        _ => "--version",
    }
}

/// Tool availability probes with a short-TTL cache.
///
/// Carried explicitly by the generator so availability state is scoped to
/// one pipeline instance rather than process-global.
pub struct ToolContext {
    ttl: Duration,
    probes: Mutex<HashMap<String, (bool, Instant)>>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(TOOL_PROBE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `program` can be spawned. Probes at most once per TTL window.
    pub async fn is_available(&self, program: &str) -> bool {
        {
            let probes = self.probes.lock().await;
            if let Some((available, at)) = probes.get(program) {
                if at.elapsed() < self.ttl {
                    return *available;
                }
            }
        }

        let available = Command::new(program)
            .arg(probe_arg(program))
            .kill_on_drop(true)
            .output()
            .await
            .is_ok();

        if !available {
            warn!(
                subsystem = "tools",
                tool = program,
                "Tool is not available on this host"
            );
        }

        let mut probes = self.probes.lock().await;
        probes.insert(program.to_string(), (available, Instant::now()));
        available
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_excerpt_short_passthrough() {
        assert_eq!(stderr_excerpt("  boom  "), "boom");
    }

    #[test]
    fn test_stderr_excerpt_truncates() {
        let long = "e".repeat(STDERR_EXCERPT_CHARS * 2);
        assert_eq!(stderr_excerpt(&long).chars().count(), STDERR_EXCERPT_CHARS);
    }

    #[test]
    fn test_probe_arg_per_tool() {
        assert_eq!(probe_arg("ffmpeg"), "-version");
        assert_eq!(probe_arg("pdftoppm"), "-v");
        assert_eq!(probe_arg("soffice"), "--version");
    }

    #[tokio::test]
    async fn test_run_tool_captures_stdout() {
        let out = run_tool("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_tool_nonzero_exit_is_transient() {
        let err = run_tool(
            "ls",
            &["/definitely/not/a/real/path"],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TransientTool(_)));
    }

    #[tokio::test]
    async fn test_run_tool_timeout_is_transient() {
        let err = run_tool("sleep", &["5"], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientTool(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary_is_transient() {
        let err = run_tool("derivo-no-such-tool", &["x"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientTool(_)));
    }

    #[tokio::test]
    async fn test_tool_context_caches_probe() {
        let ctx = ToolContext::with_ttl(Duration::from_secs(60));
        assert!(ctx.is_available("echo").await);
        assert!(ctx.is_available("echo").await);
        assert!(!ctx.is_available("derivo-no-such-tool").await);
    }
}
