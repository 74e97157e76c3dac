mod cli;
mod controller;
mod coverage;
mod external_tools;
mod fault_recovery;
mod filenames;
mod globals;
mod logger;
mod match_panel;
mod merge;
mod monitor;
mod os_utils;
mod panel_match;
mod reference_panel;
mod retry;
mod run_stats;
mod signals;
mod stability;
mod state;
mod sv_record;
mod task_queue;
mod watcher;
mod worker;

#[cfg(test)]
mod test_utils;

use std::{error, process};

use hhmmss::Hhmmss;
use log::info;

use crate::cli::Commands;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::logger::setup_work_dir_and_logger;
use crate::match_panel::run_match_panel;
use crate::monitor::run_monitor;

fn run(settings: &cli::Settings) -> Result<(), Box<dyn error::Error>> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    info!(
        "Running external tools on {} threads",
        settings.shared.thread_count
    );

    let start = std::time::Instant::now();

    match &settings.command {
        Commands::Monitor(x) => {
            run_monitor(&settings.shared, x)?;
        }
        Commands::MatchPanel(x) => {
            run_match_panel(x)?;
        }
    }

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::validate_and_fix_settings(cli::parse_settings());

    // Setup logger, including creation of the work directory for the log file:
    setup_work_dir_and_logger(settings.get_work_dir(), settings.shared.debug);

    if let Err(err) = run(&settings) {
        eprintln!("{err}");
        process::exit(2);
    }
}
