use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::jobs::{MAX_JOB_ID, MAX_JOBS};

/// icsh: a small job-control shell.
#[derive(Debug, Parser)]
#[command(name = "icsh", version)]
pub struct Cli {
    /// Run commands from this file instead of standard input.
    pub script: Option<PathBuf>,

    /// Maximum number of background/stopped jobs tracked at once.
    #[arg(long, default_value_t = MAX_JOBS)]
    pub max_jobs: usize,

    /// How long live jobs get to exit after SIGTERM when the shell quits.
    #[arg(long, default_value_t = 500)]
    pub exit_grace_ms: u64,
}

/// Settings the shell runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub script: Option<PathBuf>,
    pub max_jobs: usize,
    pub max_job_id: usize,
    pub exit_grace: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            script: None,
            max_jobs: MAX_JOBS,
            max_job_id: MAX_JOB_ID,
            exit_grace: Duration::from_millis(500),
        }
    }
}

impl From<Cli> for ShellConfig {
    fn from(cli: Cli) -> Self {
        Self {
            script: cli.script,
            // A zero-slot table could never track anything.
            max_jobs: cli.max_jobs.max(1),
            max_job_id: MAX_JOB_ID,
            exit_grace: Duration::from_millis(cli.exit_grace_ms),
        }
    }
}
