//! Cross-batch depth accounting and count-based merge scheduling
//!

use camino::Utf8Path;
use log::{debug, warn};
use simple_error::SimpleResult;

use crate::external_tools::StageError;
use crate::state::PipelineState;
use crate::task_queue::Task;

/// Running total of per-task mean depth across the whole run
///
/// The worker is the only writer. Each sample is committed with the task's `done` event and then
/// appended to the coverage log. On resume the total is re-seeded from the committed samples, one
/// per completed task, so a task interrupted and redone is only counted once.
///
#[derive(Debug, Default)]
pub struct CoverageAccumulator {
    total: f64,
    sample_count: usize,
}

impl CoverageAccumulator {
    pub fn resume(state: &PipelineState) -> SimpleResult<Self> {
        let samples = state.completed_task_depths()?;
        let logged_count = state.read_coverage()?.len();
        if logged_count > samples.len() {
            warn!(
                "Ignoring {} coverage log samples from interrupted or repeated tasks",
                logged_count - samples.len()
            );
        }
        Ok(Self {
            total: samples.iter().map(|(_, x)| x).sum(),
            sample_count: samples.len(),
        })
    }

    /// Commit one task's mean depth sample and add it to the running total
    ///
    pub fn record(
        &mut self,
        state: &PipelineState,
        task: &Task,
        mean_depth: f64,
    ) -> SimpleResult<()> {
        state.record_task_done(task, mean_depth)?;
        state.append_coverage(mean_depth)?;
        self.total += mean_depth;
        self.sample_count += 1;
        debug!(
            "Recorded mean depth {mean_depth}, running total {} over {} samples",
            self.total, self.sample_count
        );
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

/// Counts completed tasks and fires every `interval` completions
#[derive(Debug)]
pub struct BatchScheduler {
    interval: usize,
    count: usize,
}

impl BatchScheduler {
    pub fn new(interval: usize) -> Self {
        assert!(interval > 0);
        Self { interval, count: 0 }
    }

    /// Count one completed task, returning true if a merge should run now
    ///
    pub fn record_completion(&mut self) -> bool {
        self.count += 1;
        if self.count == self.interval {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

/// Parse the mean depth from the last line of a depth summary
///
/// The value is taken from the last tab-separated field of the last non-empty line, after its
/// final ": " separator, as in "...\tMeanDepth: 3.52".
///
pub fn parse_mean_depth_text(text: &str) -> Option<f64> {
    let last_line = text.lines().rev().find(|x| !x.trim().is_empty())?;
    let last_field = last_line.trim_end().rsplit('\t').next()?;
    let value = match last_field.rsplit_once(": ") {
        Some((_, value)) => value,
        None => last_field,
    };
    value.trim().parse::<f64>().ok()
}

pub fn parse_mean_depth(summary_filename: &Utf8Path) -> Result<f64, StageError> {
    if !summary_filename.exists() {
        return Err(StageError::MissingOutput {
            path: summary_filename.to_string(),
        });
    }
    let text = std::fs::read_to_string(summary_filename)?;
    parse_mean_depth_text(&text).ok_or_else(|| StageError::DepthParse {
        path: summary_filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_ulps_eq;

    #[test]
    fn test_scheduler_fires_on_interval_multiples() {
        let mut scheduler = BatchScheduler::new(4);
        let fired = (1..=12)
            .filter(|_| scheduler.record_completion())
            .collect::<Vec<_>>();
        assert_eq!(fired, vec![4, 8, 12]);
    }

    #[test]
    fn test_scheduler_interval_one() {
        let mut scheduler = BatchScheduler::new(1);
        assert!(scheduler.record_completion());
        assert!(scheduler.record_completion());
    }

    #[test]
    fn test_parse_mean_depth_text() {
        let text = "#Chr\tLength\tCovered\tMeanDepth\n\
                    chr1\t1000\t900\t2.5\n\
                    ##AllGenome\t3000\t2500\tCoverage: 83.3\tMeanDepth: 1.75\n\n";
        assert_eq!(parse_mean_depth_text(text), Some(1.75));
        assert_eq!(parse_mean_depth_text("chr1\t100\t2.0\n"), Some(2.0));
        assert_eq!(parse_mean_depth_text("MeanDepth: n/a\n"), None);
        assert_eq!(parse_mean_depth_text(""), None);
    }

    #[test]
    fn test_accumulator_resumes_from_log() {
        let (_guard, dir) = crate::test_utils::utf8_temp_dir();
        let state = PipelineState::new(&dir);
        state.initialize().unwrap();

        let mut accumulator = CoverageAccumulator::resume(&state).unwrap();
        accumulator.record(&state, &Task::new("a.fq"), 0.5).unwrap();
        accumulator.record(&state, &Task::new("b.fq"), 1.25).unwrap();
        assert_ulps_eq!(accumulator.total(), 1.75);
        assert_eq!(state.read_coverage().unwrap(), vec![0.5, 1.25]);

        let resumed = CoverageAccumulator::resume(&state).unwrap();
        assert_ulps_eq!(resumed.total(), 1.75);
        assert_eq!(resumed.sample_count(), 2);
    }

    #[test]
    fn test_accumulator_ignores_uncommitted_samples() {
        let (_guard, dir) = crate::test_utils::utf8_temp_dir();
        let state = PipelineState::new(&dir);
        state.initialize().unwrap();

        // A sample logged by a task which was interrupted before it completed
        let task = Task::new("a.fq");
        state
            .record_task_state(&task, crate::state::TaskState::Processing)
            .unwrap();
        state.append_coverage(1.0).unwrap();
        let resumed = CoverageAccumulator::resume(&state).unwrap();
        assert_ulps_eq!(resumed.total(), 0.0);

        let mut accumulator = resumed;
        accumulator.record(&state, &task, 1.0).unwrap();
        let resumed = CoverageAccumulator::resume(&state).unwrap();
        assert_ulps_eq!(resumed.total(), 1.0);
        assert_eq!(resumed.sample_count(), 1);
    }

    #[test]
    fn test_parse_mean_depth_missing_file() {
        let (_guard, dir) = crate::test_utils::utf8_temp_dir();
        let result = parse_mean_depth(&dir.join("none.stat"));
        assert!(matches!(result, Err(StageError::MissingOutput { .. })));
    }
}
