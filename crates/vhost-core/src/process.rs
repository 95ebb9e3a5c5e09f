//! External command execution
//!
//! Proxy checks and reloads and the certificate client are all run through a
//! [`CommandRunner`]. Commands are argument vectors handed straight to the OS;
//! nothing is interpreted by a shell.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// A command to run: program, arguments and an optional time limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Build from an argument vector whose first element is the program
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Command execution failure
///
/// `NotFound` is an environment defect and must never be retried. Only
/// `NonZeroExit` is retryable.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{program}: executable not found")]
    NotFound { program: String },

    #[error("{program} exited with status {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Whether running the same command again might succeed
    ///
    /// Only a command that ran to completion and exited nonzero qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::NonZeroExit { .. })
    }
}

/// Executes external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    ///
    /// Returns the captured output on exit status zero.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError>;
}

/// Runs commands as child processes of this process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        tracing::debug!(command = %command, "Running command");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ProcessError::TimedOut {
                        program: command.program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => cmd.output().await,
        };

        let output = output.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound {
                program: command.program.clone(),
            },
            _ => ProcessError::Spawn {
                program: command.program.clone(),
                source: e,
            },
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                program: command.program.clone(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello"]);
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_retryable() {
        let spec = CommandSpec::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let err = SystemRunner.run(&spec).await.unwrap_err();
        match &err {
            ProcessError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let spec = CommandSpec::new("definitely-not-an-installed-binary-4821");
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .with_timeout(Some(Duration::from_millis(100)));
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_argv() {
        let argv = vec!["systemctl".to_string(), "reload".to_string(), "nginx".to_string()];
        let spec = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(spec.program, "systemctl");
        assert_eq!(spec.to_string(), "systemctl reload nginx");
        assert!(CommandSpec::from_argv(&[]).is_none());
    }
}
