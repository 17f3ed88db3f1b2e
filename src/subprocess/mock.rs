use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio::time::{Instant, Sleep};

use super::error::ProcessError;
use super::launcher::{ExitProbe, ExitStatus, LaunchRequest, ProcessHandle, ProcessLauncher};

/// One scripted event on a mock output stream.
#[derive(Debug, Clone)]
enum StreamStep {
    Data(Vec<u8>),
    Pause(Duration),
    Fail(String),
}

#[derive(Debug, Clone)]
enum LaunchOutcome {
    Launch,
    NotFound,
    Fail(String),
}

#[derive(Debug, Clone)]
struct MockScript {
    stdout: Vec<StreamStep>,
    stderr: Vec<StreamStep>,
    status: ExitStatus,
    exit_after: Duration,
    status_error: Option<String>,
    outcome: LaunchOutcome,
}

/// A launcher that plays back scripted output instead of spawning processes.
#[derive(Clone)]
pub struct MockProcessLauncher {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<LaunchRequest>>>,
}

struct MockExpectation {
    program: String,
    script: MockScript,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockCommandConfig {
    launcher: MockProcessLauncher,
    expectation: MockExpectation,
}

impl MockProcessLauncher {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts scripting the behaviour for requests whose first token is `program`.
    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            launcher: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                script: MockScript {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    status: ExitStatus::Exited(0),
                    exit_after: Duration::ZERO,
                    status_error: None,
                    outcome: LaunchOutcome::Launch,
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_launched(&self, program: &str, times: usize) -> bool {
        let history = self
            .call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = history
            .iter()
            .filter(|request| request.tokens.first().map(String::as_str) == Some(program))
            .count();
        count == times
    }

    pub fn get_call_history(&self) -> Vec<LaunchRequest> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.expectations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn find_script(&self, request: &LaunchRequest) -> Result<MockScript, ProcessError> {
        let program = request.tokens.first().cloned().unwrap_or_default();
        let mut expectations = self
            .expectations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let expectation = expectations
            .iter_mut()
            .find(|expectation| expectation.program == program)
            .ok_or_else(|| {
                ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {:?}",
                    request.tokens
                ))
            })?;

        expectation.times_called += 1;
        if let Some(expected) = expectation.expected_times {
            if expectation.times_called > expected {
                return Err(ProcessError::MockExpectationNotMet(format!(
                    "Command '{}' launched {} times, expected {}",
                    program, expectation.times_called, expected
                )));
            }
        }

        Ok(expectation.script.clone())
    }
}

impl Default for MockProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for MockProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, ProcessError> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let script = self.find_script(request)?;
        match script.outcome {
            LaunchOutcome::Launch => {}
            LaunchOutcome::NotFound => {
                return Err(ProcessError::CommandNotFound {
                    name: request.name.clone(),
                    program: request.program().to_string(),
                })
            }
            LaunchOutcome::Fail(message) => {
                return Err(ProcessError::LaunchFailed {
                    name: request.name.clone(),
                    command: request.command_line(),
                    source: io::Error::other(message),
                })
            }
        }

        let probe = MockExitProbe {
            exit_at: Instant::now() + script.exit_after,
            status: script.status,
            error: script.status_error,
        };
        Ok(ProcessHandle::new(
            Box::new(BufReader::new(ScriptedReader::new(script.stdout))),
            Box::new(BufReader::new(ScriptedReader::new(script.stderr))),
            Box::new(probe),
        ))
    }
}

impl MockCommandConfig {
    /// Writes raw bytes to stdout, with no terminator added.
    pub fn stdout_bytes(mut self, bytes: &[u8]) -> Self {
        self.expectation
            .script
            .stdout
            .push(StreamStep::Data(bytes.to_vec()));
        self
    }

    /// Writes `line` followed by a newline to stdout.
    pub fn stdout_line(self, line: &str) -> Self {
        self.stdout_bytes(format!("{}\n", line).as_bytes())
    }

    pub fn stdout_pause(mut self, duration: Duration) -> Self {
        self.expectation
            .script
            .stdout
            .push(StreamStep::Pause(duration));
        self
    }

    pub fn stdout_fails(mut self, message: &str) -> Self {
        self.expectation
            .script
            .stdout
            .push(StreamStep::Fail(message.to_string()));
        self
    }

    pub fn stderr_bytes(mut self, bytes: &[u8]) -> Self {
        self.expectation
            .script
            .stderr
            .push(StreamStep::Data(bytes.to_vec()));
        self
    }

    pub fn stderr_line(self, line: &str) -> Self {
        self.stderr_bytes(format!("{}\n", line).as_bytes())
    }

    pub fn stderr_pause(mut self, duration: Duration) -> Self {
        self.expectation
            .script
            .stderr
            .push(StreamStep::Pause(duration));
        self
    }

    pub fn stderr_fails(mut self, message: &str) -> Self {
        self.expectation
            .script
            .stderr
            .push(StreamStep::Fail(message.to_string()));
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.script.status = ExitStatus::Exited(code);
        self
    }

    pub fn killed_by_signal(mut self, signal: i32) -> Self {
        self.expectation.script.status = ExitStatus::Signal(signal);
        self
    }

    /// The exit status becomes visible this long after launch.
    pub fn exits_after(mut self, duration: Duration) -> Self {
        self.expectation.script.exit_after = duration;
        self
    }

    pub fn fails_status_query(mut self, message: &str) -> Self {
        self.expectation.script.status_error = Some(message.to_string());
        self
    }

    pub fn not_found(mut self) -> Self {
        self.expectation.script.outcome = LaunchOutcome::NotFound;
        self
    }

    pub fn fails_to_launch(mut self, message: &str) -> Self {
        self.expectation.script.outcome = LaunchOutcome::Fail(message.to_string());
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.launcher
            .expectations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.expectation);
    }
}

struct MockExitProbe {
    exit_at: Instant,
    status: ExitStatus,
    error: Option<String>,
}

impl ExitProbe for MockExitProbe {
    fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(message) = &self.error {
            return Err(io::Error::other(message.clone()));
        }
        Ok((Instant::now() >= self.exit_at).then_some(self.status))
    }
}

/// An `AsyncRead` that yields scripted data, pauses and failures, then EOF.
struct ScriptedReader {
    steps: VecDeque<StreamStep>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ScriptedReader {
    fn new(steps: Vec<StreamStep>) -> Self {
        Self {
            steps: steps.into(),
            sleep: None,
        }
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                this.sleep = None;
            }

            match this.steps.pop_front() {
                None => return Poll::Ready(Ok(())),
                Some(StreamStep::Data(mut bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    let n = bytes.len().min(buf.remaining());
                    buf.put_slice(&bytes[..n]);
                    if n < bytes.len() {
                        this.steps.push_front(StreamStep::Data(bytes.split_off(n)));
                    }
                    return Poll::Ready(Ok(()));
                }
                Some(StreamStep::Pause(duration)) => {
                    this.sleep = Some(Box::pin(tokio::time::sleep(duration)));
                }
                Some(StreamStep::Fail(message)) => {
                    return Poll::Ready(Err(io::Error::other(message)));
                }
            }
        }
    }
}
