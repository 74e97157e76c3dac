//! Durable, resumable pipeline state kept in the monitor work directory
//!
//! Every log is append-only text. Readers skip blank lines and `#` comment lines, so marker lines
//! can be added to any log without disturbing resume.
//!

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use log::warn;
use simple_error::{SimpleResult, bail, try_with};
use strum::{Display, EnumString};

use crate::filenames::*;
use crate::os_utils::create_dir_all;
use crate::task_queue::Task;

/// Per-task processing events recorded in the task state log
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    /// The worker has started the task, its artifacts may be incomplete
    Processing,

    /// A stage failed and its artifacts are being cleaned up for a retry
    Retry,

    /// All stages finished, the event line also carries the task's mean depth sample
    Done,
}

/// Locations of all files in the work directory
#[derive(Clone, Debug)]
pub struct WorkDirLayout {
    pub work_dir: Utf8PathBuf,
}

impl WorkDirLayout {
    pub fn new(work_dir: &Utf8Path) -> Self {
        Self {
            work_dir: work_dir.to_owned(),
        }
    }

    pub fn alignment_dir(&self) -> Utf8PathBuf {
        self.work_dir.join(ALIGNMENT_DIRNAME)
    }

    pub fn cutesv_work_dir(&self) -> Utf8PathBuf {
        self.work_dir.join(CUTESV_WORK_DIRNAME)
    }

    pub fn signatures_dir(&self) -> Utf8PathBuf {
        self.cutesv_work_dir().join(SIGNATURES_DIRNAME)
    }

    pub fn coverage_log(&self) -> Utf8PathBuf {
        self.work_dir.join(COVERAGE_LOG_FILENAME)
    }

    pub fn detection_rate_history(&self) -> Utf8PathBuf {
        self.work_dir.join(DETECTION_RATE_HISTORY_FILENAME)
    }

    pub fn discovery_log(&self) -> Utf8PathBuf {
        self.work_dir.join(DISCOVERY_LOG_FILENAME)
    }

    pub fn finished_task_log(&self) -> Utf8PathBuf {
        self.work_dir.join(FINISHED_TASK_LOG_FILENAME)
    }

    pub fn task_state_log(&self) -> Utf8PathBuf {
        self.work_dir.join(TASK_STATE_LOG_FILENAME)
    }

    pub fn reference_index(&self) -> Utf8PathBuf {
        self.work_dir.join(REFERENCE_INDEX_FILENAME)
    }

    pub fn run_stats(&self) -> Utf8PathBuf {
        self.work_dir.join(RUN_STATS_FILENAME)
    }

    pub fn default_recall_file(&self) -> Utf8PathBuf {
        self.work_dir.join(DEFAULT_RECALL_FILENAME)
    }

    /// Paths of all files produced for one task
    pub fn task_paths(&self, fastq_dir: &Utf8Path, task: &Task) -> TaskPaths {
        TaskPaths {
            read_batch: fastq_dir.join(&task.name),
            alignment: self.alignment_dir().join(format!("{}.bam", task.stem())),
            bam_name: task.stem().to_string(),
        }
    }
}

/// All per-task file locations used by the alignment and signature stages
#[derive(Clone, Debug, PartialEq)]
pub struct TaskPaths {
    pub read_batch: Utf8PathBuf,

    /// Sorted alignment file, all depth and index outputs are named by appending to this path
    pub alignment: Utf8PathBuf,

    /// Label used by the signature extractor to name per-task signature files
    pub bam_name: String,
}

impl TaskPaths {
    fn with_suffix(&self, suffix: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{suffix}", self.alignment))
    }

    pub fn alignment_index(&self) -> Utf8PathBuf {
        self.with_suffix(ALIGNMENT_INDEX_SUFFIX)
    }

    /// Output prefix handed to the depth tool
    pub fn depth_output_prefix(&self) -> Utf8PathBuf {
        self.with_suffix(DEPTH_OUTPUT_PREFIX_SUFFIX)
    }

    pub fn depth_summary(&self) -> Utf8PathBuf {
        self.with_suffix(DEPTH_SUMMARY_SUFFIX)
    }

    pub fn depth_summary_gz(&self) -> Utf8PathBuf {
        self.with_suffix(DEPTH_SUMMARY_GZ_SUFFIX)
    }
}

fn append_line(filename: &Utf8Path, line: &str) -> SimpleResult<()> {
    let mut file = try_with!(
        OpenOptions::new().create(true).append(true).open(filename),
        "Unable to open state file for append: '{filename}'"
    );
    try_with!(
        writeln!(file, "{line}"),
        "Unable to append to state file: '{filename}'"
    );
    Ok(())
}

/// Read all content lines of a state file, a missing file reads as empty
///
fn read_lines(filename: &Utf8Path) -> SimpleResult<Vec<String>> {
    if !filename.exists() {
        return Ok(Vec::new());
    }
    let content = try_with!(
        std::fs::read_to_string(filename),
        "Unable to read state file: '{filename}'"
    );
    Ok(content
        .lines()
        .map(|x| x.trim())
        .filter(|x| !x.is_empty() && !x.starts_with('#'))
        .map(|x| x.to_string())
        .collect())
}

/// Handle on all durable pipeline state
///
/// Each log has a single writer: the watcher writes the discovery log, the worker writes
/// everything else.
///
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub layout: WorkDirLayout,
}

impl PipelineState {
    pub fn new(work_dir: &Utf8Path) -> Self {
        Self {
            layout: WorkDirLayout::new(work_dir),
        }
    }

    /// True if the work directory holds state from an earlier run
    ///
    pub fn has_prior_run(&self) -> bool {
        self.layout.task_state_log().exists()
    }

    /// Create all work directories and logs, leaving any existing log content in place
    ///
    pub fn initialize(&self) -> SimpleResult<()> {
        let layout = &self.layout;
        create_dir_all(&layout.alignment_dir(), "alignment");
        create_dir_all(&layout.signatures_dir(), "signature");
        for filename in [
            layout.coverage_log(),
            layout.detection_rate_history(),
            layout.discovery_log(),
            layout.finished_task_log(),
            layout.task_state_log(),
        ] {
            try_with!(
                OpenOptions::new().create(true).append(true).open(&filename),
                "Unable to create state file: '{filename}'"
            );
        }
        Ok(())
    }

    pub fn append_discovered(&self, task_name: &str) -> SimpleResult<()> {
        append_line(&self.layout.discovery_log(), task_name)
    }

    /// Append a comment line to the discovery log, for instance to mark when watching stopped
    pub fn append_discovery_note(&self, note: &str) -> SimpleResult<()> {
        append_line(&self.layout.discovery_log(), &format!("# {note}"))
    }

    pub fn read_discovered(&self) -> SimpleResult<HashSet<String>> {
        Ok(read_lines(&self.layout.discovery_log())?.into_iter().collect())
    }

    pub fn append_finished(&self, task_name: &str) -> SimpleResult<()> {
        append_line(&self.layout.finished_task_log(), task_name)
    }

    pub fn read_finished(&self) -> SimpleResult<HashSet<String>> {
        Ok(read_lines(&self.layout.finished_task_log())?
            .into_iter()
            .collect())
    }

    pub fn append_coverage(&self, mean_depth: f64) -> SimpleResult<()> {
        append_line(&self.layout.coverage_log(), &mean_depth.to_string())
    }

    /// Read all coverage samples, unparsable lines are skipped with a warning
    ///
    pub fn read_coverage(&self) -> SimpleResult<Vec<f64>> {
        let filename = self.layout.coverage_log();
        let mut samples = Vec::new();
        for line in read_lines(&filename)? {
            match line.parse::<f64>() {
                Ok(x) => samples.push(x),
                Err(_) => warn!("Skipping unparsable coverage value '{line}' in '{filename}'"),
            }
        }
        Ok(samples)
    }

    pub fn append_detection_rate(&self, depth: f64, rate: f64) -> SimpleResult<()> {
        append_line(
            &self.layout.detection_rate_history(),
            &format!("{depth},{rate}"),
        )
    }

    pub fn read_detection_rate_history(&self) -> SimpleResult<Vec<(f64, f64)>> {
        let filename = self.layout.detection_rate_history();
        let mut history = Vec::new();
        for line in read_lines(&filename)? {
            let Some((depth, rate)) = line.split_once(',') else {
                bail!("Malformed detection rate history line '{line}' in '{filename}'");
            };
            match (depth.parse::<f64>(), rate.parse::<f64>()) {
                (Ok(depth), Ok(rate)) => history.push((depth, rate)),
                _ => bail!("Malformed detection rate history line '{line}' in '{filename}'"),
            }
        }
        Ok(history)
    }

    /// Record a processing or retry event for `task`
    ///
    pub fn record_task_state(&self, task: &Task, state: TaskState) -> SimpleResult<()> {
        if state == TaskState::Done {
            bail!("Task '{}' must be completed with its coverage sample", task.name);
        }
        append_line(
            &self.layout.task_state_log(),
            &format!("{state}\t{}", task.name),
        )
    }

    /// Record completion of `task` together with its mean depth sample
    ///
    /// This line is the commit point of a task: the running depth total on resume is rebuilt
    /// from these events only.
    ///
    pub fn record_task_done(&self, task: &Task, mean_depth: f64) -> SimpleResult<()> {
        append_line(
            &self.layout.task_state_log(),
            &format!("{}\t{}\t{mean_depth}", TaskState::Done, task.name),
        )
    }

    /// Latest event of each task in the task state log, in order of first appearance
    ///
    fn latest_task_events(&self) -> SimpleResult<Vec<(String, TaskState, Option<f64>)>> {
        let filename = self.layout.task_state_log();
        let mut order = Vec::new();
        let mut latest = HashMap::new();
        for line in read_lines(&filename)? {
            let mut fields = line.split('\t');
            let (Some(state), Some(task_name)) = (fields.next(), fields.next()) else {
                bail!("Malformed task state line '{line}' in '{filename}'");
            };
            let state = try_with!(
                TaskState::from_str(state),
                "Unknown task state in line '{line}' of '{filename}'"
            );
            let mean_depth = match (state, fields.next()) {
                (TaskState::Done, Some(x)) => Some(try_with!(
                    x.parse::<f64>(),
                    "Invalid mean depth in line '{line}' of '{filename}'"
                )),
                (TaskState::Done, None) => {
                    bail!("Missing mean depth in line '{line}' of '{filename}'")
                }
                _ => None,
            };
            if latest
                .insert(task_name.to_string(), (state, mean_depth))
                .is_none()
            {
                order.push(task_name.to_string());
            }
        }
        Ok(order
            .into_iter()
            .map(|x| {
                let (state, mean_depth) = latest[&x];
                (x, state, mean_depth)
            })
            .collect())
    }

    /// Tasks whose most recent state event is not `done`
    ///
    /// These tasks were interrupted while the worker was processing them, and their artifacts
    /// must be purged before they are retried. Tasks are returned in order of first appearance.
    ///
    pub fn in_flight_tasks(&self) -> SimpleResult<Vec<Task>> {
        Ok(self
            .latest_task_events()?
            .into_iter()
            .filter(|(_, state, _)| *state != TaskState::Done)
            .map(|(name, _, _)| Task { name })
            .collect())
    }

    /// Mean depth sample of every completed task, one per task even if it was completed twice
    ///
    pub fn completed_task_depths(&self) -> SimpleResult<Vec<(String, f64)>> {
        Ok(self
            .latest_task_events()?
            .into_iter()
            .filter_map(|(name, _, mean_depth)| mean_depth.map(|x| (name, x)))
            .collect())
    }
}
