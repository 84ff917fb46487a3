//! The module that implements the `cs-filetest` run command.

use crate::config::HarnessConfig;
use crate::decoder::Backend;
use crate::decoder::replay::ReplayBackend;
use crate::report::RunSummary;
use anyhow::{Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "CS_FILETEST_LOG";

/// How the run summary is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// `FAIL` lines followed by a one-line count.
    Text,
    /// The whole summary as a JSON object.
    Json,
}

/// Runs decoder fixtures and reports every field that differs
#[derive(Parser, Debug)]
#[command(name = "cs-filetest", version)]
pub struct RunCommand {
    /// Fixture files, or directories to scan recursively for fixtures
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Only run cases for this architecture (e.g. `arm` or `CS_ARCH_ARM`)
    #[arg(long, value_name = "NAME")]
    arch: Option<String>,

    /// Only run cases whose directive names all of these modes
    #[arg(long, value_name = "NAME", value_delimiter = ',')]
    mode: Vec<String>,

    /// Log progress of every case
    #[arg(short, long)]
    verbose: bool,

    /// Number of worker threads
    #[arg(short = 'j', long, value_name = "N")]
    threads: Option<usize>,

    /// Decode by replaying a recorded JSON transcript
    #[arg(long, value_name = "FILE")]
    transcript: Option<PathBuf>,

    /// Read harness settings from a TOML file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Summary format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

impl RunCommand {
    /// Executes the command, returning whether every selected case passed.
    pub fn execute(self) -> Result<bool> {
        self.init_logging()?;

        let config = self.harness_config()?;
        let backend = self.backend()?;
        let summary = crate::run(self.paths.as_slice(), config, backend)?;
        self.print(&summary)?;
        Ok(summary.success())
    }

    fn init_logging(&self) -> Result<()> {
        use std::io::IsTerminal;
        use tracing_subscriber::{EnvFilter, FmtSubscriber};

        let filter = if std::env::var_os(LOG_ENV).is_some() {
            EnvFilter::from_env(LOG_ENV)
        } else if self.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        };
        FmtSubscriber::builder()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_ansi(std::io::stderr().is_terminal())
            .try_init()
            .map_err(|e| anyhow!("failed to install logger: {e}"))
    }

    /// The configuration file, if any, with command line flags applied on top.
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(threads) = self.threads {
            if threads == 0 {
                bail!("--threads must be at least 1");
            }
            config.threads = Some(threads);
        }
        if self.arch.is_some() {
            config.arch.clone_from(&self.arch);
        }
        if !self.mode.is_empty() {
            config.modes.clone_from(&self.mode);
        }
        config.selection()?;
        Ok(config)
    }

    fn backend(&self) -> Result<Arc<dyn Backend>> {
        if let Some(path) = &self.transcript {
            let replay = ReplayBackend::from_file(path)?;
            log::info!(
                "loaded {} recorded instructions from {}",
                replay.len(),
                path.display()
            );
            return Ok(Arc::new(replay));
        }
        #[cfg(feature = "disas")]
        return Ok(Arc::new(crate::decoder::capstone::CapstoneBackend));
        #[cfg(not(feature = "disas"))]
        bail!("no decoder available: pass --transcript, or build with the `disas` feature")
    }

    fn print(&self, summary: &RunSummary) -> Result<()> {
        match self.format {
            Format::Text => println!("{summary}"),
            Format::Json => println!("{}", summary.to_json()?),
        }
        Ok(())
    }
}
