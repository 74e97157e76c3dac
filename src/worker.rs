//! Serial consumer of read batch tasks
//!
//! The worker is the single writer of all per-task state: the task state log, the coverage log,
//! and the finished task log. Merges run synchronously in the worker loop, so the running depth
//! total is never read while a task is being added to it.
//!

use std::sync::mpsc::Receiver;

use camino::Utf8Path;
use log::{info, warn};
use simple_error::SimpleResult;
use unwrap::unwrap;

use crate::coverage::{BatchScheduler, CoverageAccumulator, parse_mean_depth};
use crate::external_tools::PipelineStages;
use crate::fault_recovery::{clean_alignment_artifacts, delete_signature_files};
use crate::merge::{MergeEvaluator, MergeOutcome};
use crate::retry::retry_until_success;
use crate::state::{PipelineState, TaskState};
use crate::task_queue::{QueueItem, Task};

#[derive(Debug, Default)]
pub struct WorkerSummary {
    pub tasks_completed: usize,

    /// Merges which ran the clustering stage, low-depth skips are not counted
    pub merge_count: usize,

    /// Running depth total when the worker exited, including samples from earlier runs
    pub coverage_total: f64,

    /// Detection rate from the most recent merge which evaluated a snapshot
    pub last_detection_rate: Option<f64>,
}

impl WorkerSummary {
    pub fn add_merge(&mut self, outcome: MergeOutcome) {
        if outcome.clustered {
            self.merge_count += 1;
        }
        if outcome.detection_rate.is_some() {
            self.last_detection_rate = outcome.detection_rate;
        }
    }
}

pub struct Worker<'a, S: PipelineStages> {
    fastq_dir: &'a Utf8Path,
    evaluator: &'a MergeEvaluator<'a, S>,
    accumulator: CoverageAccumulator,
    scheduler: BatchScheduler,
    summary: WorkerSummary,
}

fn record_task_state(state: &PipelineState, task: &Task, task_state: TaskState) {
    unwrap!(
        state.record_task_state(task, task_state),
        "Unable to record state '{task_state}' for task '{}'",
        task.name
    );
}

impl<'a, S: PipelineStages> Worker<'a, S> {
    /// Create a worker, continuing the running depth total from any earlier run
    ///
    pub fn new(
        fastq_dir: &'a Utf8Path,
        evaluator: &'a MergeEvaluator<'a, S>,
        batch_interval: usize,
    ) -> SimpleResult<Self> {
        let accumulator = CoverageAccumulator::resume(evaluator.state)?;
        if accumulator.sample_count() > 0 {
            info!(
                "Resuming from {} earlier coverage samples, running depth {:.2}",
                accumulator.sample_count(),
                accumulator.total()
            );
        }
        Ok(Self {
            fastq_dir,
            evaluator,
            accumulator,
            scheduler: BatchScheduler::new(batch_interval),
            summary: WorkerSummary::default(),
        })
    }

    /// Process tasks from `rx` in order until the shutdown item arrives or all senders are gone
    ///
    pub fn run(mut self, rx: Receiver<QueueItem>) -> WorkerSummary {
        info!("Worker started");
        for item in rx.iter() {
            match item {
                QueueItem::Task(task) => self.process_task(&task),
                QueueItem::Shutdown => break,
            }
        }
        info!(
            "Worker stopped after completing {} tasks",
            self.summary.tasks_completed
        );
        self.summary.coverage_total = self.accumulator.total();
        self.summary
    }

    fn process_task(&mut self, task: &Task) {
        let stages = self.evaluator.stages;
        let state = self.evaluator.state;
        let paths = state.layout.task_paths(self.fastq_dir, task);

        info!("Processing read batch '{}'", task.name);
        record_task_state(state, task, TaskState::Processing);

        let mean_depth = retry_until_success(
            &format!("Alignment of read batch '{}'", task.name),
            || {
                stages.align(&paths)?;
                stages.summarize_depth(&paths)?;
                parse_mean_depth(&paths.depth_summary())
            },
            || {
                record_task_state(state, task, TaskState::Retry);
                if let Err(e) = clean_alignment_artifacts(&paths) {
                    warn!("{e}");
                }
            },
        );

        let signatures_dir = state.layout.signatures_dir();
        retry_until_success(
            &format!("Signature extraction for read batch '{}'", task.name),
            || stages.extract_signatures(&paths),
            || {
                record_task_state(state, task, TaskState::Retry);
                if let Err(e) = delete_signature_files(&signatures_dir, &paths.bam_name) {
                    warn!("{e}");
                }
            },
        );

        unwrap!(
            self.accumulator.record(state, task, mean_depth),
            "Unable to record coverage sample for task '{}'",
            task.name
        );
        unwrap!(
            state.append_finished(&task.name),
            "Unable to record finished task '{}'",
            task.name
        );
        self.summary.tasks_completed += 1;
        info!(
            "Finished read batch '{}' with mean depth {mean_depth:.3}, running depth {:.3}",
            task.name,
            self.accumulator.total()
        );

        if self.scheduler.record_completion() {
            let outcome = self.evaluator.merge_and_evaluate(self.accumulator.total());
            self.summary.add_merge(outcome);
        }
    }
}
