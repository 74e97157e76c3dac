//! Track stats for the whole monitor run
//!

use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, try_with};
use unwrap::unwrap;

use crate::controller::TerminationReason;

#[derive(Debug, Deserialize, Serialize)]
pub struct MonitorRunStats {
    pub version: String,
    pub termination_reason: TerminationReason,

    /// Tasks completed in this run, excluding any finished by earlier runs in the same work dir
    pub tasks_completed: usize,

    /// Scheduled and final merges which ran the clustering stage
    pub merge_count: usize,

    /// Running depth total at termination, including coverage samples from earlier runs
    pub final_running_depth: f64,

    /// Detection rate in percent from the last evaluated snapshot
    pub final_detection_rate: Option<f64>,

    pub total_runtime_secs: f64,
}

/// Write run_stats structure out in json format
pub fn write_monitor_run_stats(filename: &Utf8Path, run_stats: &MonitorRunStats) {
    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}

#[allow(unused)]
pub fn read_monitor_run_stats(filename: &Utf8Path) -> SimpleResult<MonitorRunStats> {
    use std::io::BufReader;

    let file = try_with!(
        File::open(filename),
        "Unable to read run statistics json file: '{filename}'"
    );
    let reader = BufReader::new(file);
    let run_stats = try_with!(
        serde_json::from_reader(reader),
        "Unable to parse run statistics from json file: '{filename}'"
    );
    Ok(run_stats)
}
