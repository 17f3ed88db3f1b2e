//! Child-process supervision with incremental line streaming.
//!
//! A [`SupervisedProcess`] launches one command through a
//! [`ProcessLauncher`], forwards every complete stdout/stderr line to a
//! [`LineSink`] while the child runs, and reports whether the exit code
//! matched the expected one.

pub mod drain;
pub mod error;
pub mod launcher;
pub mod mock;
pub mod sink;
pub mod supervisor;

#[cfg(test)]
mod tests;

pub use drain::{LineReader, StreamDrainer};
pub use error::ProcessError;
pub use launcher::{
    ExitProbe, ExitStatus, LaunchMode, LaunchRequest, ProcessHandle, ProcessLauncher,
    StreamKind, TokioProcessLauncher,
};
pub use mock::{MockCommandConfig, MockProcessLauncher};
pub use sink::{LineBuffer, LineSink};
pub use supervisor::{run_exec, run_shell, ProcessConfig, RunState, SupervisedProcess};

use std::sync::Arc;

/// Creates supervised processes that share one launcher.
#[derive(Clone)]
pub struct SubprocessManager {
    launcher: Arc<dyn ProcessLauncher>,
}

impl SubprocessManager {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { launcher }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessLauncher))
    }

    pub fn mock() -> (Self, MockProcessLauncher) {
        let mock = MockProcessLauncher::new();
        let launcher = Arc::new(mock.clone()) as Arc<dyn ProcessLauncher>;
        (Self::new(launcher), mock)
    }

    pub fn launcher(&self) -> Arc<dyn ProcessLauncher> {
        Arc::clone(&self.launcher)
    }

    pub fn process<I, S>(
        &self,
        command: I,
        config: ProcessConfig,
    ) -> Result<SupervisedProcess, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(SupervisedProcess::new(command, config)?.with_launcher(self.launcher()))
    }

    pub async fn exec<I, S>(&self, command: I, config: ProcessConfig) -> Result<bool, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.process(command, config)?.exec().await
    }

    pub async fn shell<I, S>(&self, command: I, config: ProcessConfig) -> Result<bool, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.process(command, config)?.shell().await
    }
}
