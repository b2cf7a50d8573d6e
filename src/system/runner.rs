// Shell command runner: every external command goes through here with a timeout.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::ulog_debug;

/// Default timeout for shell commands (seconds)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
/// Text rendered for a timed-out command
pub const TIMEOUT_TEXT: &str = "Error: Command timed out";

/// Result of a shell command. Never an error: failures are captured as text.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Command finished (any exit code); combined stdout + stderr, trimmed
    Completed { text: String, success: bool },
    /// Command exceeded its timeout and was killed
    TimedOut,
}

impl CommandOutput {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text, .. } => text,
            Self::TimedOut => TIMEOUT_TEXT,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Completed { success: true, .. })
    }
}

/// Executes shell text. Implementations must not hang past `timeout`.
pub trait ProcessRunner: Send + Sync + 'static {
    fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = CommandOutput> + Send;
}

/// `sh -c` runner backed by tokio::process
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> CommandOutput {
        ulog_debug!("[runner] $ {}", command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // timed-out commands are killed when the future is dropped
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                return CommandOutput::Completed {
                    text: format!("Failed to spawn shell: {}", e),
                    success: false,
                }
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                CommandOutput::Completed {
                    text: text.trim().to_string(),
                    success: output.status.success(),
                }
            }
            Ok(Err(e)) => CommandOutput::Completed {
                text: e.to_string(),
                success: false,
            },
            Err(_) => CommandOutput::TimedOut,
        }
    }
}

/// Quote a value for safe interpolation into `sh -c` text.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let out = ShellRunner
            .run("echo out; echo err 1>&2", Duration::from_secs(5))
            .await;
        assert!(out.success());
        assert!(out.text().contains("out"));
        assert!(out.text().contains("err"));
    }

    #[tokio::test]
    async fn test_run_failure_returns_text() {
        let out = ShellRunner
            .run("echo boom; exit 3", Duration::from_secs(5))
            .await;
        assert!(!out.success());
        assert_eq!(out.text(), "boom");
    }

    #[tokio::test]
    async fn test_run_timeout_sentinel() {
        let out = ShellRunner.run("sleep 5", Duration::from_millis(200)).await;
        assert_eq!(out, CommandOutput::TimedOut);
        assert_eq!(out.text(), TIMEOUT_TEXT);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
