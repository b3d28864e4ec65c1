//! Running external programs.
//!
//! ```text
//! Invocation { program, args, cwd, env, stdin, timeout }
//!         |
//!         v
//! ProcessRunner::run(invocation, cancel)
//!         |
//!    spawn -------------------> LaunchError
//!         |
//!    select! { stdin + exit, cancel, deadline }
//!         |
//!         v
//! ProcessOutput { exit, stdout, stderr }
//! ```
//!
//! A runner never interprets what the program printed. A non-zero exit,
//! a cancellation or a timeout are all data on [`ProcessOutput`]; only a
//! program that cannot be started (or whose pipes break) is an error.

use error_set::error_set;
use std::borrow::Cow;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

error_set! {
    /// Failures to start an external program or talk to it
    LaunchError := {
        #[display("{program} was not found on the execution path")]
        NotFound { program: String },
        #[display("Permission denied while starting {program}")]
        PermissionDenied { program: String },
        #[display("Failed to start {program}: {message}")]
        SpawnFailed { program: String, message: String },
        #[display("Failed to write input to {program}: {message}")]
        StdinFailed { program: String, message: String },
        #[display("Failed to collect output of {program}: {message}")]
        WaitFailed { program: String, message: String },
    }
}

/// A single program run: what to start, where, and with which input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Arguments after any leading `-c key=value` configuration overrides.
    pub fn command_args(&self) -> &[String] {
        let mut rest = self.args.as_slice();
        while let [flag, _, tail @ ..] = rest
            && flag == "-c"
        {
            rest = tail;
        }
        rest
    }

    /// The subcommand name, used to label errors (`status`, `diff`, ...).
    pub fn subcommand(&self) -> String {
        self.command_args()
            .first()
            .cloned()
            .unwrap_or_else(|| self.program.clone())
    }

    /// Full command line for logging
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// How a program run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The program exited with this status code
    Code(i32),
    /// The program was terminated by a signal
    Signaled,
    /// The cancellation token fired and the program was killed
    Cancelled,
    /// The deadline passed and the program was killed
    TimedOut,
}

/// Exit status and captured output of a program run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit: Exit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn new(exit: Exit, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Successful run printing `stdout`
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self::new(Exit::Code(0), stdout, Vec::new())
    }

    /// Failed run with exit `code` printing `stderr`
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self::new(Exit::Code(code), Vec::new(), stderr)
    }

    /// Run that never produced output because it was interrupted
    pub fn interrupted(exit: Exit) -> Self {
        Self::new(exit, Vec::new(), Vec::new())
    }

    pub fn success(&self) -> bool {
        self.exit == Exit::Code(0)
    }

    pub fn code(&self) -> Option<i32> {
        match self.exit {
            Exit::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Stdout followed by stderr, for matching git's messages
    pub fn combined(&self) -> String {
        let mut text = self.stdout_lossy().into_owned();
        text.push('\n');
        text.push_str(&self.stderr_lossy());
        text
    }
}

/// Executes programs on behalf of the repository facade.
///
/// Implementations must run the program off the caller's thread and
/// resolve the returned future once it has finished, been cancelled or
/// timed out.
pub trait ProcessRunner: Clone + Send + Sync + 'static {
    fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<ProcessOutput, LaunchError>> + Send;
}

/// Runs real processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, LaunchError> {
        let command_line = invocation.command_line();
        debug!(cwd = %invocation.cwd.display(), cmd = %command_line, "exec");

        if cancel.is_cancelled() {
            return Ok(ProcessOutput::interrupted(Exit::Cancelled));
        }

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| launch_error(&invocation.program, &e))?;
        trace!(pid = ?child.id(), "spawned");

        // Input is fed while the output is collected, so a program that
        // never reads it still falls under the deadline and the token
        let pipe = child.stdin.take();
        let feed = async {
            let (Some(mut pipe), Some(input)) = (pipe, invocation.stdin.as_deref()) else {
                return Ok(());
            };
            match pipe.write_all(input.as_bytes()).await {
                // The program exited without reading everything; its exit
                // status and stderr say why
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    trace!(cmd = %command_line, "input pipe closed early");
                    Ok(())
                }
                Err(e) => Err(LaunchError::StdinFailed {
                    program: invocation.program.clone(),
                    message: e.to_string(),
                }),
                // Dropping the pipe sends EOF
                Ok(()) => Ok(()),
            }
        };
        let finished = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output.map_err(|e| LaunchError::WaitFailed {
                program: invocation.program.clone(),
                message: e.to_string(),
            })
        };

        let deadline = async {
            match invocation.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        tokio::select! {
            output = finished => {
                let output = output?;
                let exit = output.status.code().map_or(Exit::Signaled, Exit::Code);
                trace!(cmd = %command_line, ?exit, "completed");
                Ok(ProcessOutput::new(exit, output.stdout, output.stderr))
            }
            () = cancel.cancelled() => {
                warn!(cmd = %command_line, "cancelled, killing process");
                Ok(ProcessOutput::interrupted(Exit::Cancelled))
            }
            () = deadline => {
                warn!(cmd = %command_line, timeout = ?invocation.timeout, "timed out, killing process");
                Ok(ProcessOutput::interrupted(Exit::TimedOut))
            }
        }
    }
}

fn launch_error(program: &str, error: &std::io::Error) -> LaunchError {
    match error.kind() {
        ErrorKind::NotFound => LaunchError::NotFound {
            program: program.to_string(),
        },
        ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
            program: program.to_string(),
        },
        _ => LaunchError::SpawnFailed {
            program: program.to_string(),
            message: error.to_string(),
        },
    }
}
