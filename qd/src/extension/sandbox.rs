//! Sandboxed test execution for generated tools
//!
//! Tests run as a separate process with a per-file timeout enforced by
//! killing the child. The project root is injected into the child's
//! module path so generated code can import bundle modules.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Result of one sandbox test run
#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,

    /// Which runner ended up executing the file
    pub runner: String,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// One-line summary for results documents
    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            format!("exit {} in {}ms via {}", self.exit_code, self.duration_ms, self.runner)
        }
    }
}

/// Run a test file, preferring a pytest-style runner
///
/// Falls back to direct interpreter invocation when the runner is not
/// installed. Stdout/stderr are captured; the child is killed on timeout.
pub async fn run_sandbox_tests(test_file: &Path, project_root: &Path, timeout: Duration) -> TestRunResult {
    let candidates = [
        ("pytest", vec!["-x", "-q"]),
        ("python3", vec![]),
    ];

    for (runner, extra_args) in candidates {
        match try_runner(runner, &extra_args, test_file, project_root, timeout).await {
            // pytest exits 5 when it collects no tests; plain scripts then
            // run under the interpreter directly
            Some(result) if runner == "pytest" && result.exit_code == 5 => {
                warn!("run_sandbox_tests: pytest collected nothing, falling back");
            }
            Some(result) => return result,
            None => {
                warn!(%runner, "run_sandbox_tests: runner unavailable, trying next");
            }
        }
    }

    TestRunResult {
        exit_code: -1,
        stdout: String::new(),
        stderr: "no usable test runner found".to_string(),
        duration_ms: 0,
        timed_out: false,
        runner: "none".to_string(),
    }
}

/// Attempt one runner; `None` means the binary could not be spawned
async fn try_runner(
    runner: &str,
    extra_args: &[&str],
    test_file: &Path,
    project_root: &Path,
    timeout: Duration,
) -> Option<TestRunResult> {
    let start = Instant::now();

    let mut command = tokio::process::Command::new(runner);
    command
        .args(extra_args)
        .arg(test_file)
        .current_dir(project_root)
        .env("PYTHONPATH", project_root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().ok()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let result = TestRunResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: false,
                runner: runner.to_string(),
            };
            info!("[Sandbox] {} -> {}", test_file.display(), result.summary());
            Some(result)
        }
        Ok(Err(_)) => None,
        Err(_) => {
            // Child killed via kill_on_drop
            warn!("[Sandbox] {} timed out after {:?}", test_file.display(), timeout);
            Some(TestRunResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("test run exceeded {:?}", timeout),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: true,
                runner: runner.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passing_script() {
        let temp = tempfile::tempdir().unwrap();
        let test_file = temp.path().join("test_ok.py");
        std::fs::write(&test_file, "def test_ok():\n    assert True\n").unwrap();

        let result = run_sandbox_tests(&test_file, temp.path(), Duration::from_secs(30)).await;
        assert!(result.passed(), "stderr: {}", result.stderr);
    }

    #[tokio::test]
    async fn test_failing_script() {
        let temp = tempfile::tempdir().unwrap();
        let test_file = temp.path().join("test_fail.py");
        std::fs::write(&test_file, "raise SystemExit(1)\n").unwrap();

        let result = run_sandbox_tests(&test_file, temp.path(), Duration::from_secs(30)).await;
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let temp = tempfile::tempdir().unwrap();
        let test_file = temp.path().join("test_slow.py");
        std::fs::write(&test_file, "import time\ntime.sleep(30)\n").unwrap();

        let result = run_sandbox_tests(&test_file, temp.path(), Duration::from_millis(300)).await;
        assert!(result.timed_out);
        assert!(!result.passed());
    }
}
