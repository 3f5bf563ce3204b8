//! Compiler test runner
//!
//! テストファイルごとにコンパイラ（interpreter）を起動し、その結果で合否を決める。
//!
//! - Verified: `<subject> -i <test> --log-level=2` の stdout/stderr をまとめて
//!   取得し、末尾に `Exit code: <n>` を付けて `<verifier> <test>` の stdin に流す。
//!   verifier の終了コードで判定する。
//! - Legacy: `<subject> <test>` の終了コードだけで判定する。

use log::{debug, info};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::discovery::DiscoveryMode;
use crate::error::{HarnessError, HarnessResult, TransportErrorKind};
use crate::report::TestRunResult;

/// How a test's outcome is decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerMode {
    /// Captured output checked by an external pattern verifier
    Verified { verifier: PathBuf },
    /// Subject exit code only
    Legacy,
}

impl CompilerMode {
    /// Verified suites search subdirectories, legacy suites only the top level
    pub fn discovery_mode(&self) -> DiscoveryMode {
        match self {
            CompilerMode::Verified { .. } => DiscoveryMode::Recursive,
            CompilerMode::Legacy => DiscoveryMode::Flat,
        }
    }
}

/// Exit code as written to the `Exit code:` trailer
///
/// A process killed by a signal reports `-<signal>` on unix.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

fn spawn_error(program: &Path, e: std::io::Error) -> HarnessError {
    HarnessError::transport(
        TransportErrorKind::Spawn,
        format!("failed to start {}: {}", program.display(), e),
    )
}

/// Wait for `child`, killing it if it outlives `limit`
async fn wait_bounded(child: &mut Child, limit: Duration, what: &str) -> HarnessResult<ExitStatus> {
    match timeout(limit, child.wait()).await {
        Ok(status) => Ok(status?),
        Err(_) => {
            let _ = child.kill().await;
            Err(HarnessError::SubjectExitFailure(format!(
                "{} did not exit within {} ms",
                what,
                limit.as_millis()
            )))
        }
    }
}

/// Runs compiler test files one at a time
pub struct CompilerHarness {
    subject: PathBuf,
    mode: CompilerMode,
    test_timeout: Duration,
}

impl CompilerHarness {
    pub fn new(subject: impl Into<PathBuf>, mode: CompilerMode, test_timeout: Duration) -> Self {
        Self {
            subject: subject.into(),
            mode,
            test_timeout,
        }
    }

    /// Run one test file
    pub async fn run_test(&self, test: &Path) -> HarnessResult<()> {
        match &self.mode {
            CompilerMode::Verified { verifier } => self.run_verified(test, verifier).await,
            CompilerMode::Legacy => self.run_legacy(test).await,
        }
    }

    /// Run every test file in order and collect the outcomes
    pub async fn run_all(&self, tests: &[PathBuf]) -> TestRunResult {
        let mut result = TestRunResult::new();
        info!("Running {} compiler test(s)", tests.len());

        for test in tests {
            let name = test.display().to_string();
            println!("Running test {}", name);
            let outcome = self.run_test(test).await;
            result.record(&name, outcome);
        }

        result
    }

    /// Run the subject, returning its combined stdout/stderr followed by the exit code line
    pub async fn capture_trace(&self, test: &Path) -> HarnessResult<Vec<u8>> {
        // stdout と stderr で同じファイルを共有し、出力の順序を保つ
        let mut trace = tempfile::tempfile()?;
        let stdout = trace.try_clone()?;
        let stderr = trace.try_clone()?;

        let mut child = Command::new(&self.subject)
            .arg("-i")
            .arg(test)
            .arg("--log-level=2")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.subject, e))?;

        let status = wait_bounded(&mut child, self.test_timeout, "subject").await?;
        let code = exit_code(&status);
        debug!("Subject exited with code {} for {}", code, test.display());

        append_exit_code(&mut trace, code)?;
        Ok(read_all(&mut trace)?)
    }

    async fn run_verified(&self, test: &Path, verifier: &Path) -> HarnessResult<()> {
        let trace = self.capture_trace(test).await?;

        let mut child = Command::new(verifier)
            .arg(test)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(verifier, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let feed = async {
                stdin.write_all(&trace).await?;
                stdin.shutdown().await?;
                Ok::<(), std::io::Error>(())
            };
            match timeout(self.test_timeout, feed).await {
                Ok(Ok(())) => {}
                // verifier が入力を読み切らずに終了した場合は終了コードで判定する
                Ok(Err(e)) => debug!("Verifier stopped reading input: {}", e),
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(HarnessError::SubjectExitFailure(
                        "verifier did not accept input in time".to_string(),
                    ));
                }
            }
        }

        let status = wait_bounded(&mut child, self.test_timeout, "verifier").await?;
        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::SubjectExitFailure(format!(
                "verifier rejected output (exit code {})",
                exit_code(&status)
            )))
        }
    }

    async fn run_legacy(&self, test: &Path) -> HarnessResult<()> {
        println!("{} {}", self.subject.display(), test.display());

        let mut child = Command::new(&self.subject)
            .arg(test)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.subject, e))?;

        let status = wait_bounded(&mut child, self.test_timeout, "subject").await?;
        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::SubjectExitFailure(format!(
                "subject exited with code {}",
                exit_code(&status)
            )))
        }
    }
}

fn append_exit_code(trace: &mut File, code: i32) -> std::io::Result<()> {
    trace.seek(SeekFrom::End(0))?;
    write!(trace, "Exit code: {}", code)?;
    trace.flush()
}

fn read_all(trace: &mut File) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    trace.seek(SeekFrom::Start(0))?;
    trace.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_capture_trace_combines_streams() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(
            temp_dir.path(),
            "allium",
            "echo \"args: $*\"; echo oops >&2; exit 3",
        );
        let harness = CompilerHarness::new(&subject, CompilerMode::Legacy, Duration::from_secs(5));

        let trace = harness.capture_trace(Path::new("t.allium")).await.unwrap();
        assert_eq!(
            String::from_utf8(trace).unwrap(),
            "args: -i t.allium --log-level=2\noops\nExit code: 3"
        );
    }

    #[tokio::test]
    async fn test_signal_exit_code_is_negative() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(temp_dir.path(), "allium", "kill -9 $$");
        let harness = CompilerHarness::new(&subject, CompilerMode::Legacy, Duration::from_secs(5));

        let trace = harness.capture_trace(Path::new("t.allium")).await.unwrap();
        assert_eq!(String::from_utf8(trace).unwrap(), "Exit code: -9");
    }

    #[tokio::test]
    async fn test_legacy_uses_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(temp_dir.path(), "allium", "case \"$1\" in *bad*) exit 1;; esac; exit 0");
        let harness = CompilerHarness::new(&subject, CompilerMode::Legacy, Duration::from_secs(5));

        assert!(harness.run_test(Path::new("good.allium")).await.is_ok());
        let err = harness.run_test(Path::new("bad.allium")).await.unwrap_err();
        assert!(matches!(err, HarnessError::SubjectExitFailure(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_hung_subject_is_killed() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(temp_dir.path(), "allium", "exec sleep 30");
        let harness = CompilerHarness::new(&subject, CompilerMode::Legacy, Duration::from_millis(200));

        let err = harness.run_test(Path::new("slow.allium")).await.unwrap_err();
        assert!(err.to_string().contains("did not exit"), "{}", err);
    }

    #[tokio::test]
    async fn test_verifier_receives_trace() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(temp_dir.path(), "allium", "echo hello");
        let captured = temp_dir.path().join("captured.txt");
        let verifier = write_script(
            temp_dir.path(),
            "verify",
            &format!("cat > '{}'; [ \"$1\" = 'x.allium' ]", captured.display()),
        );
        let harness = CompilerHarness::new(
            &subject,
            CompilerMode::Verified { verifier },
            Duration::from_secs(5),
        );

        harness.run_test(Path::new("x.allium")).await.unwrap();
        assert_eq!(fs::read_to_string(&captured).unwrap(), "hello\nExit code: 0");
    }

    #[tokio::test]
    async fn test_missing_verifier_is_transport_error() {
        let temp_dir = TempDir::new().unwrap();
        let subject = write_script(temp_dir.path(), "allium", "exit 0");
        let harness = CompilerHarness::new(
            &subject,
            CompilerMode::Verified {
                verifier: PathBuf::from("/nonexistent/FileCheck"),
            },
            Duration::from_secs(5),
        );

        let err = harness.run_test(Path::new("x.allium")).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Spawn));
    }

    #[test]
    fn test_discovery_mode_per_compiler_mode() {
        assert_eq!(CompilerMode::Legacy.discovery_mode(), DiscoveryMode::Flat);
        let verified = CompilerMode::Verified {
            verifier: PathBuf::from("FileCheck"),
        };
        assert_eq!(verified.discovery_mode(), DiscoveryMode::Recursive);
    }
}
