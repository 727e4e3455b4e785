#[cfg(not(unix))]
compile_error!("icsh relies on POSIX process and signal primitives");

mod builtins;
mod config;
mod error;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod redirect;
mod shell;
mod signals;
mod status;

use std::fs::File;
use std::io::{self, BufReader, IsTerminal, Write};
use std::sync::{Arc, Mutex};

use clap::Parser;
use log::debug;

use crate::config::{Cli, ShellConfig};
use crate::job_control::ForegroundMarker;
use crate::jobs::JobTable;
use crate::shell::Shell;
use crate::signals::SignalBridge;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter("ICSH_LOG")).init();
    let config = ShellConfig::from(Cli::parse());
    debug!("starting with {config:?}");

    let jobs = Arc::new(Mutex::new(JobTable::with_limits(
        config.max_jobs,
        config.max_job_id,
    )));
    let foreground = Arc::new(ForegroundMarker::new());

    let mut bridge = match SignalBridge::install(Arc::clone(&jobs), Arc::clone(&foreground)) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("icsh: {e}");
            std::process::exit(1);
        }
    };

    let mut shell = Shell::new(&config, jobs, foreground);
    let exit_code = match &config.script {
        Some(path) => match File::open(path) {
            Ok(file) => shell.run(&mut BufReader::new(file), false),
            Err(e) => {
                eprintln!("icsh: {}: {e}", path.display());
                127
            }
        },
        None => {
            let stdin = io::stdin();
            let interactive = stdin.is_terminal();
            shell.run(&mut stdin.lock(), interactive)
        }
    };

    bridge.close();
    shell.shutdown();
    let _ = io::stdout().flush();
    std::process::exit(exit_code);
}
