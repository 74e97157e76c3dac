//! Lifecycle of a monitor run, from work directory recovery through final evaluation
//!

use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use strum::Display;

use crate::external_tools::PipelineStages;
use crate::fault_recovery::recover_in_flight;
use crate::merge::{MergeEvaluator, PanelEvaluation};
use crate::os_utils::create_dir_all;
use crate::run_stats::{MonitorRunStats, write_monitor_run_stats};
use crate::signals::RunSignals;
use crate::state::PipelineState;
use crate::task_queue::QueueItem;
use crate::watcher::{DirectoryWatcher, FileAdmission, StabilityParams, scan_backlog};
use crate::worker::{Worker, WorkerSummary};

#[derive(Clone, Copy, Debug, Display, PartialEq)]
pub enum LifecycleState {
    Init,
    Running,
    Draining,
    FinalEvaluate,
    Terminated,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
pub enum TerminationReason {
    /// No new read batch was admitted within the idle timeout
    IdleTimeout,

    /// A snapshot reached the target detection rate
    TargetReached,
}

/// Runtime settings for one monitor run
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub fastq_dir: Utf8PathBuf,
    pub reference: Utf8PathBuf,
    pub work_dir: Utf8PathBuf,
    pub output_vcf_dir: Utf8PathBuf,

    /// User supplied aligner index, when unset an index is built or reused in the work dir
    pub reference_index: Option<Utf8PathBuf>,

    pub batch_interval: usize,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub stability: StabilityParams,
}

#[derive(Debug)]
pub struct RunSummary {
    pub termination_reason: TerminationReason,
    pub tasks_completed: usize,
    pub merge_count: usize,
    pub final_running_depth: f64,
    pub final_detection_rate: Option<f64>,
}

struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    fn new() -> Self {
        info!("Monitor state: {}", LifecycleState::Init);
        Self {
            state: LifecycleState::Init,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        info!("Monitor state: {} -> {next}", self.state);
        self.state = next;
    }
}

/// Use the configured aligner index, or reuse or build one in the work directory
///
/// An index build failure is logged and the run continues, so that alignment failures report
/// the underlying problem on every retry.
///
fn prepare_reference_index<S: PipelineStages>(
    config: &MonitorConfig,
    state: &PipelineState,
    stages: &S,
) {
    if let Some(index) = &config.reference_index {
        info!("Using reference index: '{index}'");
        return;
    }
    let index = state.layout.reference_index();
    if index.exists() {
        info!("Reusing reference index from earlier run: '{index}'");
        return;
    }
    info!("Building reference index: '{index}'");
    if let Err(e) = stages.build_index(&config.reference, &index) {
        error!("Reference index build failed: {e}");
    }
}

/// Prepare the work directory, purging artifacts of any tasks interrupted in an earlier run
///
fn initialize_work_dir<S: PipelineStages>(
    config: &MonitorConfig,
    state: &PipelineState,
    stages: &S,
) -> SimpleResult<()> {
    if !config.fastq_dir.is_dir() {
        bail!(
            "Monitored read batch directory does not exist: '{}'",
            config.fastq_dir
        );
    }

    if state.has_prior_run() {
        let in_flight = state.in_flight_tasks()?;
        info!(
            "Resuming earlier run in work directory '{}' with {} interrupted tasks",
            config.work_dir,
            in_flight.len()
        );
        for task in in_flight.iter() {
            let paths = state.layout.task_paths(&config.fastq_dir, task);
            recover_in_flight(&state.layout, &paths)?;
        }
        if let Some((depth, rate)) = state.read_detection_rate_history()?.last() {
            info!("Earlier run reached detection rate {rate:.2}% at running depth {depth:.2}");
        }
    }
    state.initialize()?;
    create_dir_all(&config.output_vcf_dir, "output VCF");
    prepare_reference_index(config, state, stages);
    Ok(())
}

/// Block until the stop signal is set or no file has been admitted for `idle_timeout`
///
fn wait_for_termination(
    signals: &RunSignals,
    idle_timeout: Duration,
    idle_check_interval: Duration,
) -> TerminationReason {
    loop {
        if signals.is_stop_requested() {
            return TerminationReason::TargetReached;
        }
        let idle = signals.idle_duration();
        if idle >= idle_timeout {
            info!(
                "No new read batches for {} seconds",
                idle_timeout.as_secs_f64()
            );
            return TerminationReason::IdleTimeout;
        }
        signals.wait_for_stop(idle_check_interval.min(idle_timeout - idle));
    }
}

/// Run the monitor until the target detection rate is reached or input stops arriving
///
pub fn run_monitor_with_stages<S: PipelineStages>(
    config: &MonitorConfig,
    stages: &S,
    evaluation: Option<&PanelEvaluation>,
) -> SimpleResult<RunSummary> {
    let start_time = Instant::now();
    let mut lifecycle = Lifecycle::new();

    let state = PipelineState::new(&config.work_dir);
    initialize_work_dir(config, &state, stages)?;

    let (tx, rx) = channel();
    let signals = Arc::new(RunSignals::new());
    let evaluator = MergeEvaluator {
        stages,
        state: &state,
        output_vcf_dir: &config.output_vcf_dir,
        evaluation,
        signals: &signals,
    };
    let worker = Worker::new(&config.fastq_dir, &evaluator, config.batch_interval)?;
    let admission = Arc::new(FileAdmission::new(
        tx.clone(),
        state.clone(),
        signals.clone(),
        config.stability,
    ));

    lifecycle.advance(LifecycleState::Running);
    let watcher = DirectoryWatcher::start(&config.fastq_dir, admission.clone())?;
    let seeded = state
        .read_finished()
        .and_then(|finished| scan_backlog(&config.fastq_dir, &finished))
        .and_then(|backlog| admission.seed_backlog(&backlog));
    let seeded = match seeded {
        Ok(x) => x,
        Err(e) => {
            watcher.stop();
            return Err(e);
        }
    };
    info!("Queued {seeded} unfinished read batches found in the monitored directory");

    let (termination_reason, mut worker_summary) = std::thread::scope(|scope| {
        let worker_handle = scope.spawn(move || worker.run(rx));

        let termination_reason =
            wait_for_termination(&signals, config.idle_timeout, config.idle_check_interval);

        lifecycle.advance(LifecycleState::Draining);
        watcher.stop();
        if tx.send(QueueItem::Shutdown).is_err() {
            warn!("Worker exited before shutdown was requested");
        }
        let worker_summary: WorkerSummary = match worker_handle.join() {
            Ok(x) => x,
            Err(e) => std::panic::resume_unwind(e),
        };
        (termination_reason, worker_summary)
    });

    if termination_reason == TerminationReason::IdleTimeout {
        lifecycle.advance(LifecycleState::FinalEvaluate);
        let outcome = evaluator.merge_and_evaluate(worker_summary.coverage_total);
        worker_summary.add_merge(outcome);
    }
    lifecycle.advance(LifecycleState::Terminated);
    let merge_count = worker_summary.merge_count;
    let final_detection_rate = worker_summary.last_detection_rate;

    if let Some(rate) = final_detection_rate {
        info!("Final detection rate: {rate:.2}%");
    }
    info!(
        "Monitor finished ({termination_reason}) after {} tasks and {merge_count} merges",
        worker_summary.tasks_completed
    );

    let summary = RunSummary {
        termination_reason,
        tasks_completed: worker_summary.tasks_completed,
        merge_count,
        final_running_depth: worker_summary.coverage_total,
        final_detection_rate,
    };
    let run_stats = MonitorRunStats {
        version: crate::globals::PROGRAM_VERSION.to_string(),
        termination_reason,
        tasks_completed: summary.tasks_completed,
        merge_count,
        final_running_depth: summary.final_running_depth,
        final_detection_rate,
        total_runtime_secs: start_time.elapsed().as_secs_f64(),
    };
    write_monitor_run_stats(&state.layout.run_stats(), &run_stats);

    Ok(summary)
}
