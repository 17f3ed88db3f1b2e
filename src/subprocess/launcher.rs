use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, BufReader};

use super::error::ProcessError;

/// Which of the child's output pipes a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// How the command tokens are handed to the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// First token is the program, the rest are passed verbatim as arguments.
    Exec,
    /// Tokens are joined with single spaces and interpreted by a shell.
    Shell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Display name of the supervised process, used for error context.
    pub name: String,
    pub mode: LaunchMode,
    pub tokens: Vec<String>,
}

impl LaunchRequest {
    pub fn new(name: impl Into<String>, mode: LaunchMode, tokens: Vec<String>) -> Self {
        Self {
            name: name.into(),
            mode,
            tokens,
        }
    }

    /// The command as a single space-joined line.
    pub fn command_line(&self) -> String {
        self.tokens.join(" ")
    }

    /// The executable that will be looked up: the first token in exec mode,
    /// the platform shell in shell mode.
    pub fn program(&self) -> &str {
        match self.mode {
            LaunchMode::Exec => self.tokens.first().map(String::as_str).unwrap_or_default(),
            LaunchMode::Shell => SHELL_PROGRAM,
        }
    }
}

#[cfg(unix)]
const SHELL_PROGRAM: &str = "sh";
#[cfg(unix)]
const SHELL_FLAG: &str = "-c";

#[cfg(windows)]
const SHELL_PROGRAM: &str = "cmd";
#[cfg(windows)]
const SHELL_FLAG: &str = "/C";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The process was terminated by a signal and has no exit code.
    Signal(i32),
}

impl ExitStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    /// Whether this status counts as a success for the given expected code.
    /// A signal never matches.
    pub fn matches(&self, expected_code: i32) -> bool {
        self.code() == Some(expected_code)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitStatus::Exited(code),
            None => signal_status(status),
        }
    }
}

#[cfg(unix)]
fn signal_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => ExitStatus::Signal(signal),
        None => ExitStatus::Exited(-1),
    }
}

#[cfg(not(unix))]
fn signal_status(_status: std::process::ExitStatus) -> ExitStatus {
    ExitStatus::Exited(-1)
}

/// Non-blocking view of a child's exit status.
pub trait ExitProbe: Send {
    /// Returns `Ok(None)` while the child is still running. Must not block.
    fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>>;
}

impl ExitProbe for tokio::process::Child {
    fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self.try_wait()?.map(ExitStatus::from))
    }
}

pub type StreamReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// A launched child: its two output streams plus a way to poll for exit.
pub struct ProcessHandle {
    stdout: StreamReader,
    stderr: StreamReader,
    probe: Box<dyn ExitProbe>,
}

impl ProcessHandle {
    pub fn new(stdout: StreamReader, stderr: StreamReader, probe: Box<dyn ExitProbe>) -> Self {
        Self {
            stdout,
            stderr,
            probe,
        }
    }

    pub fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.probe.try_exit_status()
    }

    pub fn into_parts(self) -> (StreamReader, StreamReader, Box<dyn ExitProbe>) {
        (self.stdout, self.stderr, self.probe)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

/// Creates operating-system processes for the supervisor.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, ProcessError>;
}

/// Launches real processes through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    fn configure_command(request: &LaunchRequest) -> tokio::process::Command {
        let mut cmd = match request.mode {
            LaunchMode::Exec => {
                let mut cmd = tokio::process::Command::new(&request.tokens[0]);
                cmd.args(&request.tokens[1..]);
                cmd
            }
            LaunchMode::Shell => {
                let mut cmd = tokio::process::Command::new(SHELL_PROGRAM);
                cmd.arg(SHELL_FLAG).arg(request.command_line());
                cmd
            }
        };

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn map_spawn_error(error: io::Error, request: &LaunchRequest) -> ProcessError {
        tracing::error!(
            "Failed to spawn '{}': {:?} (kind: {:?})",
            request.program(),
            error,
            error.kind()
        );

        if error.kind() == io::ErrorKind::NotFound {
            ProcessError::CommandNotFound {
                name: request.name.clone(),
                program: request.program().to_string(),
            }
        } else {
            ProcessError::LaunchFailed {
                name: request.name.clone(),
                command: request.command_line(),
                source: error,
            }
        }
    }

    /// Extract a piped stream from a child process, converting None to error
    fn extract_stream<T>(
        stream: Option<T>,
        kind: StreamKind,
        request: &LaunchRequest,
    ) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::LaunchFailed {
            name: request.name.clone(),
            command: request.command_line(),
            source: io::Error::other(format!("{} was not captured", kind)),
        })
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, ProcessError> {
        if request.tokens.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        tracing::debug!(
            "Spawning {:?} subprocess '{}': {}",
            request.mode,
            request.name,
            request.command_line()
        );

        let mut child = Self::configure_command(request)
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, request))?;

        if let Some(pid) = child.id() {
            tracing::trace!("Subprocess '{}' has pid {}", request.name, pid);
        }

        let stdout = Self::extract_stream(child.stdout.take(), StreamKind::Stdout, request)?;
        let stderr = Self::extract_stream(child.stderr.take(), StreamKind::Stderr, request)?;

        Ok(ProcessHandle::new(
            Box::new(BufReader::new(stdout)),
            Box::new(BufReader::new(stderr)),
            Box::new(child),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn request(mode: LaunchMode, tokens: &[&str]) -> LaunchRequest {
        LaunchRequest::new(
            "launcher-test",
            mode,
            tokens.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_command_line_joins_with_single_spaces() {
        let request = request(LaunchMode::Shell, &["echo TEST;", "echo TEST2"]);
        assert_eq!(request.command_line(), "echo TEST; echo TEST2");
    }

    #[test]
    fn test_program_depends_on_mode() {
        assert_eq!(request(LaunchMode::Exec, &["echo", "hi"]).program(), "echo");
        assert_eq!(
            request(LaunchMode::Shell, &["echo", "hi"]).program(),
            SHELL_PROGRAM
        );
    }

    #[test]
    fn test_exit_status_matches() {
        assert!(ExitStatus::Exited(0).matches(0));
        assert!(!ExitStatus::Exited(1).matches(0));
        assert!(ExitStatus::Exited(1).matches(1));
        assert!(!ExitStatus::Signal(9).matches(0));
        assert_eq!(ExitStatus::Signal(9).code(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_convert_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert_eq!(ExitStatus::from(status), ExitStatus::Exited(0));

        // Exit code 1 is encoded in the high byte
        let status = std::process::ExitStatus::from_raw(256);
        assert_eq!(ExitStatus::from(status), ExitStatus::Exited(1));

        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(ExitStatus::from(status), ExitStatus::Signal(9));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_exec_passes_arguments_verbatim() {
        let handle = TokioProcessLauncher
            .launch(&request(LaunchMode::Exec, &["echo", "a;", "b"]))
            .await
            .unwrap();
        let (mut stdout, _stderr, _probe) = handle.into_parts();

        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "a; b\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_shell_interprets_command() {
        let handle = TokioProcessLauncher
            .launch(&request(LaunchMode::Shell, &["echo", "out;", "echo err", ">&2"]))
            .await
            .unwrap();
        let (mut stdout, mut stderr, _probe) = handle.into_parts();

        let mut out = String::new();
        let mut err = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        stderr.read_to_string(&mut err).await.unwrap();
        assert_eq!(out, "out\n");
        assert_eq!(err, "err\n");
    }

    #[tokio::test]
    async fn test_launch_nonexistent_command() {
        let result = TokioProcessLauncher
            .launch(&request(LaunchMode::Exec, &["nonexistent_command_12345"]))
            .await;

        match result.unwrap_err() {
            ProcessError::CommandNotFound { name, program } => {
                assert_eq!(name, "launcher-test");
                assert_eq!(program, "nonexistent_command_12345");
            }
            other => panic!("Expected CommandNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_launch_empty_command() {
        let result = TokioProcessLauncher
            .launch(&request(LaunchMode::Exec, &[]))
            .await;
        assert!(matches!(result.unwrap_err(), ProcessError::EmptyCommand));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_reports_exit_code() {
        let handle = TokioProcessLauncher
            .launch(&request(LaunchMode::Shell, &["exit 3"]))
            .await
            .unwrap();
        let (_stdout, _stderr, mut probe) = handle.into_parts();

        let status = loop {
            if let Some(status) = probe.try_exit_status().unwrap() {
                break status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(status, ExitStatus::Exited(3));
    }
}
