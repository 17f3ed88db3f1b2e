//! # procstream
//!
//! Supervise a child process and stream its output while it runs.
//!
//! ## Usage
//!
//! ```no_run
//! use procstream::subprocess::{run_shell, LineBuffer, ProcessConfig};
//!
//! # async fn demo() -> Result<(), procstream::subprocess::ProcessError> {
//! let lines = LineBuffer::new();
//! let config = ProcessConfig::new().name("build").stdout(lines.sink());
//! let success = run_shell(["cargo build"], config).await?;
//! println!("{} -> {:?}", success, lines.lines());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `config` - Supervisor settings, loadable from TOML
//! - `error` - Crate-level error type
//! - `subprocess` - Launcher abstraction, stream draining and the polling supervisor
pub mod config;
pub mod error;
pub mod subprocess;

pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use subprocess::{run_exec, run_shell, ProcessConfig, ProcessError, SupervisedProcess};
