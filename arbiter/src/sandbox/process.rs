//! Isolated process runtime: run a command or a code snippet with a hard
//! wall-clock timeout and captured output.
//!
//! Used by the validator's opt-in execution probe. The probe is expensive and
//! has side effects, so nothing here runs unless a caller asks for it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Result of running a command.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Result of executing a code snippet in isolation.
#[derive(Clone, Debug)]
pub struct IsolatedOutcome {
    pub success: bool,
    pub stderr: String,
}

/// Opaque "execute in an isolated environment" capability.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Runs a shell command with a wall-clock timeout.
    async fn run(&self, command: &str, timeout: Duration) -> ExecOutcome;

    /// Executes a Python snippet in an isolated interpreter process.
    async fn exec_isolated(&self, code: &str, timeout: Duration) -> IsolatedOutcome;
}

/// Subprocess-backed runtime. The timeout kills the child; a timeout counts
/// as failure with a descriptive stderr.
#[derive(Default)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }

    async fn wait_with_timeout(
        mut child: tokio::process::Child,
        timeout: Duration,
        timeout_label: &str,
    ) -> ExecOutcome {
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let read_all = |pipe: Option<tokio::process::ChildStdout>| async move {
            match pipe {
                Some(mut p) => {
                    let mut buf = String::new();
                    use tokio::io::AsyncReadExt;
                    let _ = p.read_to_string(&mut buf).await;
                    buf
                }
                None => String::new(),
            }
        };
        let read_all_err = |pipe: Option<tokio::process::ChildStderr>| async move {
            match pipe {
                Some(mut p) => {
                    let mut buf = String::new();
                    use tokio::io::AsyncReadExt;
                    let _ = p.read_to_string(&mut buf).await;
                    buf
                }
                None => String::new(),
            }
        };

        let result = tokio::time::timeout(timeout, async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_all(stdout_pipe),
                read_all_err(stderr_pipe)
            );
            (status, stdout, stderr)
        })
        .await;

        match result {
            Ok((Ok(status), stdout, stderr)) => ExecOutcome {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            },
            Ok((Err(e), stdout, stderr)) => ExecOutcome {
                exit_code: -1,
                stdout,
                stderr: if stderr.is_empty() {
                    e.to_string()
                } else {
                    stderr
                },
            },
            Err(_) => ExecOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: timeout_label.to_string(),
            },
        }
    }
}

#[async_trait]
impl SandboxRuntime for ProcessSandbox {
    async fn run(&self, command: &str, timeout: Duration) -> ExecOutcome {
        debug!(command, timeout_s = timeout.as_secs(), "sandbox run");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        match child {
            Ok(child) => {
                Self::wait_with_timeout(
                    child,
                    timeout,
                    &format!("execution timed out ({}s)", timeout.as_secs()),
                )
                .await
            }
            Err(e) => ExecOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("spawn failed: {}", e),
            },
        }
    }

    async fn exec_isolated(&self, code: &str, timeout: Duration) -> IsolatedOutcome {
        debug!(bytes = code.len(), timeout_s = timeout.as_secs(), "sandbox exec");
        let child = Command::new("python3")
            .arg("-I") // isolated mode: no user site, no env vars
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                return IsolatedOutcome {
                    success: false,
                    stderr: format!("spawn failed: {}", e),
                }
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(code.as_bytes()).await.is_err() {
                return IsolatedOutcome {
                    success: false,
                    stderr: "failed to feed code to interpreter".into(),
                };
            }
            // Close stdin so the interpreter starts.
            drop(stdin);
        }
        let outcome = Self::wait_with_timeout(
            child,
            timeout,
            &format!(
                "execution timed out ({}s), possible infinite loop",
                timeout.as_secs()
            ),
        )
        .await;
        IsolatedOutcome {
            success: outcome.exit_code == 0,
            stderr: outcome.stderr,
        }
    }
}
