//! The polling supervisor: launches one child, keeps both of its output
//! streams drained while it runs, and judges its exit status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::drain::StreamDrainer;
use super::error::ProcessError;
use super::launcher::{
    ExitStatus, LaunchMode, LaunchRequest, ProcessLauncher, StreamKind, TokioProcessLauncher,
};
use super::sink::LineSink;
use crate::config::{SupervisorConfig, MAX_POLL_INTERVAL};

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(0);

/// Generates the next automatic display name. Safe to call concurrently.
pub fn next_process_name() -> String {
    format!(
        "Subprocess-{}",
        NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// Settings plus output sinks for one supervised run.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub settings: SupervisorConfig,
    pub stdout: LineSink,
    pub stderr: LineSink,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from(SupervisorConfig::default())
    }
}

impl From<SupervisorConfig> for ProcessConfig {
    fn from(settings: SupervisorConfig) -> Self {
        Self {
            settings,
            stdout: LineSink::log_info(),
            stderr: LineSink::log_error(),
        }
    }
}

impl ProcessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = Some(name.into());
        self
    }

    pub fn expected_exit_code(mut self, code: i32) -> Self {
        self.settings.expected_exit_code = code;
        self
    }

    pub fn with_prefix(mut self, with_prefix: bool) -> Self {
        self.settings.with_prefix = with_prefix;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn stdout(mut self, sink: impl Into<LineSink>) -> Self {
        self.stdout = sink.into();
        self
    }

    pub fn stderr(mut self, sink: impl Into<LineSink>) -> Self {
        self.stderr = sink.into();
        self
    }
}

/// Lifecycle of a [`SupervisedProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Launching,
    Running,
    /// Termination observed; flushing the remaining output.
    Draining,
    Completed,
    /// A launch, read or status failure aborted the run.
    Failed,
}

/// One child process under supervision. Single use: a second call to
/// [`exec`](Self::exec) or [`shell`](Self::shell) fails with
/// [`ProcessError::AlreadyRun`].
pub struct SupervisedProcess {
    command: Vec<String>,
    name: String,
    expected_exit_code: i32,
    stdout: LineSink,
    stderr: LineSink,
    with_prefix: bool,
    poll_interval: Duration,
    launcher: Arc<dyn ProcessLauncher>,
    state: RunState,
    last_exit_status: Option<ExitStatus>,
}

impl SupervisedProcess {
    pub fn new<I, S>(command: I, config: ProcessConfig) -> Result<Self, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        if command.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        let ProcessConfig {
            settings,
            stdout,
            stderr,
        } = config;
        if settings.poll_interval.is_zero() || settings.poll_interval > MAX_POLL_INTERVAL {
            return Err(ProcessError::InvalidPollInterval(settings.poll_interval));
        }

        Ok(Self {
            command,
            name: settings.name.unwrap_or_else(next_process_name),
            expected_exit_code: settings.expected_exit_code,
            stdout,
            stderr,
            with_prefix: settings.with_prefix,
            poll_interval: settings.poll_interval,
            launcher: Arc::new(TokioProcessLauncher),
            state: RunState::NotStarted,
            last_exit_status: None,
        })
    }

    /// Replaces the launcher used to create the child.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn expected_exit_code(&self) -> i32 {
        self.expected_exit_code
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Exit status seen when termination was detected; `None` before that.
    pub fn last_exit_status(&self) -> Option<ExitStatus> {
        self.last_exit_status
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_status.and_then(|status| status.code())
    }

    /// Runs the command without a shell: the first token is the program
    /// and the remaining tokens are passed through untouched.
    pub async fn exec(&mut self) -> Result<bool, ProcessError> {
        self.run(LaunchMode::Exec).await
    }

    /// Joins the tokens with single spaces and runs the result in a shell.
    pub async fn shell(&mut self) -> Result<bool, ProcessError> {
        self.run(LaunchMode::Shell).await
    }

    async fn run(&mut self, mode: LaunchMode) -> Result<bool, ProcessError> {
        if self.state != RunState::NotStarted {
            return Err(ProcessError::AlreadyRun {
                name: self.name.clone(),
            });
        }

        let result = self.supervise(mode).await;
        if result.is_err() {
            self.state = RunState::Failed;
        }
        result
    }

    async fn supervise(&mut self, mode: LaunchMode) -> Result<bool, ProcessError> {
        let request = LaunchRequest::new(self.name.clone(), mode, self.command.clone());
        tracing::info!("[{}] About to start {}", self.name, request.command_line());

        self.state = RunState::Launching;
        let handle = self.launcher.launch(&request).await?;
        self.state = RunState::Running;

        let (stdout, stderr, mut probe) = handle.into_parts();
        let mut stdout = StreamDrainer::new(
            StreamKind::Stdout,
            stdout,
            self.stdout.clone(),
            &self.name,
            self.with_prefix,
        );
        let mut stderr = StreamDrainer::new(
            StreamKind::Stderr,
            stderr,
            self.stderr.clone(),
            &self.name,
            self.with_prefix,
        );

        let mut iterations: u64 = 0;
        let status = loop {
            let polled = probe
                .try_exit_status()
                .map_err(|source| ProcessError::StatusQuery {
                    name: self.name.clone(),
                    source,
                })?;
            if let Some(status) = polled {
                break status;
            }

            iterations += 1;
            let tick = Instant::now() + self.poll_interval;
            let (out, err) =
                futures::future::try_join(stdout.drain_until(tick), stderr.drain_until(tick))
                    .await?;
            tracing::trace!(
                "[{}] Poll {}: drained {} stdout and {} stderr lines",
                self.name,
                iterations,
                out,
                err
            );
            tokio::time::sleep_until(tick).await;
        };

        self.state = RunState::Draining;
        self.last_exit_status = Some(status);
        tracing::debug!(
            "[{}] Terminated with {} after {} polls, flushing output",
            self.name,
            status,
            iterations
        );

        futures::future::try_join(stdout.drain_to_end(), stderr.drain_to_end()).await?;
        drop(probe);
        self.state = RunState::Completed;

        tracing::debug!(
            "[{}] Delivered {} stdout and {} stderr lines",
            self.name,
            stdout.delivered(),
            stderr.delivered()
        );

        Ok(self.evaluate(status))
    }

    fn evaluate(&self, status: ExitStatus) -> bool {
        if !status.matches(self.expected_exit_code) {
            tracing::error!(
                "[{}] Error! The subprocess terminated with {} (expected exit code {})",
                self.name,
                status,
                self.expected_exit_code
            );
            return false;
        }

        tracing::info!("[{}] Success! The subprocess completed.", self.name);
        true
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("expected_exit_code", &self.expected_exit_code)
            .field("with_prefix", &self.with_prefix)
            .field("poll_interval", &self.poll_interval)
            .field("state", &self.state)
            .field("last_exit_status", &self.last_exit_status)
            .finish_non_exhaustive()
    }
}

/// Runs `command` in exec mode under a fresh supervisor.
pub async fn run_exec<I, S>(command: I, config: ProcessConfig) -> Result<bool, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SupervisedProcess::new(command, config)?.exec().await
}

/// Runs `command` in shell mode under a fresh supervisor.
pub async fn run_shell<I, S>(command: I, config: ProcessConfig) -> Result<bool, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SupervisedProcess::new(command, config)?.shell().await
}
