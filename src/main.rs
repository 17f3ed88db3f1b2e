use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use procstream::config::SupervisorConfig;
use procstream::subprocess::{LineSink, ProcessConfig, SubprocessManager};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, trace};

/// Run a command and stream its output line by line while it runs
#[derive(Parser)]
#[command(name = "procstream")]
#[command(about = "Run a command and stream its output line by line", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program directly; arguments are passed through without shell interpretation
    Exec {
        #[command(flatten)]
        options: RunArgs,

        /// Program followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Join the tokens with spaces and run the result through the shell
    Shell {
        #[command(flatten)]
        options: RunArgs,

        /// Shell command tokens
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to a TOML file with supervisor settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Display name used in the line prefix and log messages
    #[arg(long)]
    name: Option<String>,

    /// Exit code that counts as success (default: 0)
    #[arg(long, allow_negative_numbers = true)]
    expected_code: Option<i32>,

    /// Print lines without the "[<name>] " prefix
    #[arg(long)]
    no_prefix: bool,

    /// Delay between termination checks, e.g. "100ms" (default: 100ms)
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    poll_interval: Option<Duration>,
}

impl RunArgs {
    fn resolve(self) -> anyhow::Result<SupervisorConfig> {
        let mut settings = match &self.config {
            Some(path) => SupervisorConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SupervisorConfig::default(),
        };

        if let Some(name) = self.name {
            settings.name = Some(name);
        }
        if let Some(code) = self.expected_code {
            settings.expected_exit_code = code;
        }
        if self.no_prefix {
            settings.with_prefix = false;
        }
        if let Some(interval) = self.poll_interval {
            settings.poll_interval = interval;
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,tokio=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("procstream started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let code = match run(cli.command).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> anyhow::Result<bool> {
    let manager = SubprocessManager::production();
    let stdout = LineSink::new(|line| println!("{}", line));
    let stderr = LineSink::new(|line| eprintln!("{}", line));

    match command {
        Commands::Exec { options, command } => {
            let config = ProcessConfig::from(options.resolve()?)
                .stdout(stdout)
                .stderr(stderr);
            Ok(manager.exec(command, config).await?)
        }
        Commands::Shell { options, command } => {
            let config = ProcessConfig::from(options.resolve()?)
                .stdout(stdout)
                .stderr(stderr);
            Ok(manager.shell(command, config).await?)
        }
    }
}
