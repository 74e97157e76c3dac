//! Periodic merge of accumulated SV evidence into a snapshot call set, and its evaluation
//! against the reference panel
//!

use camino::{Utf8Path, Utf8PathBuf};
use log::{error, info, warn};

use crate::external_tools::PipelineStages;
use crate::filenames::SNAPSHOT_VCF_SUFFIX;
use crate::panel_match::{MatchParams, detection_summary, match_vcf_file, write_mapping_report};
use crate::reference_panel::ReferencePanel;
use crate::retry::retry_until_success;
use crate::signals::RunSignals;
use crate::state::PipelineState;

/// Running depth total at or below which no merge is attempted
pub const LOW_DEPTH_FLOOR: f64 = 0.1;

/// Select the clustering min-support for the running depth total
///
/// The required support steps up as evidence accumulates: 2 up to depth 10, 3 up to 15, 4 up to
/// 20, and 5 above that.
///
pub fn select_min_support(total_depth: f64) -> u32 {
    if total_depth <= 10.0 {
        2
    } else if total_depth <= 15.0 {
        3
    } else if total_depth <= 20.0 {
        4
    } else {
        5
    }
}

/// Snapshot VCF filename, tagged by the cumulative depth at merge time
pub fn snapshot_vcf_filename(output_vcf_dir: &Utf8Path, total_depth: f64) -> Utf8PathBuf {
    output_vcf_dir.join(format!("{total_depth:.1}{SNAPSHOT_VCF_SUFFIX}"))
}

/// Everything required to score snapshots against a reference panel
pub struct PanelEvaluation {
    pub panel: ReferencePanel,
    pub params: MatchParams,

    /// Mapping report, rewritten at every evaluation
    pub recall_file: Utf8PathBuf,

    /// Detection rate in percent at which the run is stopped
    pub target_rate: f64,
}

#[derive(Debug, PartialEq)]
pub struct MergeOutcome {
    /// True if the clustering stage ran and wrote a snapshot
    pub clustered: bool,

    /// Detection rate in percent, `None` when no reference panel is configured
    pub detection_rate: Option<f64>,
}

pub struct MergeEvaluator<'a, S: PipelineStages> {
    pub stages: &'a S,
    pub state: &'a PipelineState,
    pub output_vcf_dir: &'a Utf8Path,
    pub evaluation: Option<&'a PanelEvaluation>,
    pub signals: &'a RunSignals,
}

impl<S: PipelineStages> MergeEvaluator<'_, S> {
    /// Merge all evidence so far, and score the snapshot if a reference panel is configured
    ///
    /// When the running depth is too low to merge, the clustering stage is skipped and the
    /// detection rate is reported as 0 if a reference panel is configured.
    ///
    pub fn merge_and_evaluate(&self, total_depth: f64) -> MergeOutcome {
        if total_depth <= LOW_DEPTH_FLOOR {
            info!("Skipping merge at low running depth {total_depth}");
            return MergeOutcome {
                clustered: false,
                detection_rate: self.evaluation.map(|_| 0.0),
            };
        }

        let min_support = select_min_support(total_depth);
        let snapshot = snapshot_vcf_filename(self.output_vcf_dir, total_depth);
        info!(
            "Merging SV evidence at running depth {total_depth:.2} with min support {min_support}"
        );
        retry_until_success(
            "SV clustering and genotyping",
            || self.stages.cluster_and_genotype(min_support, &snapshot),
            || {},
        );
        info!("Wrote SV snapshot to file: '{snapshot}'");

        MergeOutcome {
            clustered: true,
            detection_rate: self
                .evaluation
                .map(|x| self.evaluate_snapshot(x, &snapshot, total_depth)),
        }
    }

    /// Score a snapshot against the reference panel, returning the detection rate in percent
    ///
    fn evaluate_snapshot(
        &self,
        evaluation: &PanelEvaluation,
        snapshot: &Utf8Path,
        total_depth: f64,
    ) -> f64 {
        let result = match match_vcf_file(snapshot, &evaluation.panel, &evaluation.params) {
            Ok(x) => x,
            Err(e) => {
                error!("Unable to evaluate SV snapshot: {e}");
                return 0.0;
            }
        };
        info!("{}", detection_summary(&result));

        let mode = evaluation.panel.mode();
        if let Err(e) = write_mapping_report(&evaluation.recall_file, &result, mode) {
            warn!("{e}");
        }

        let detection_rate = result.detection_rate_percent();
        if let Err(e) = self.state.append_detection_rate(total_depth, detection_rate) {
            error!("{e}");
        }

        if detection_rate >= evaluation.target_rate {
            info!(
                "Detection rate {detection_rate:.2}% reached target {:.2}%, requesting stop",
                evaluation.target_rate
            );
            self.signals.request_stop();
        }
        detection_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_panel::PanelMode;
    use crate::test_utils::{ScriptedStages, read_lines, utf8_temp_dir};
    use approx::assert_ulps_eq;

    const PANEL: &str = "\
chr1\t1000\t.\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-500
chr1\t9000\tp2\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=100
";

    const SNAPSHOT: &str = "\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
chr1\t1050\tq1\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-480
";

    fn panel_evaluation(dir: &Utf8Path, target_rate: f64) -> PanelEvaluation {
        PanelEvaluation {
            panel: ReferencePanel::from_reader(PANEL.as_bytes(), PanelMode::UserDefined)
                .unwrap()
                .0,
            params: MatchParams::from_pctsize(0.9, 1000),
            recall_file: dir.join("recall.txt"),
            target_rate,
        }
    }

    fn setup(dir: &Utf8Path) -> (PipelineState, ScriptedStages) {
        let state = PipelineState::new(dir);
        state.initialize().unwrap();
        let stages = ScriptedStages::new(1.0, SNAPSHOT, &state.layout.signatures_dir());
        (state, stages)
    }

    #[test]
    fn test_select_min_support() {
        for (total, expected) in [
            (0.5, 2),
            (10.0, 2),
            (10.1, 3),
            (15.0, 3),
            (15.1, 4),
            (20.0, 4),
            (20.1, 5),
            (100.0, 5),
        ] {
            assert_eq!(select_min_support(total), expected, "total {total}");
        }
    }

    #[test]
    fn test_snapshot_vcf_filename() {
        assert_eq!(
            snapshot_vcf_filename(Utf8Path::new("/out"), 12.345),
            "/out/12.3_output.vcf"
        );
    }

    #[test]
    fn test_low_depth_skip() {
        let (_guard, dir) = utf8_temp_dir();
        let (state, stages) = setup(&dir);
        let signals = RunSignals::new();
        let evaluation = panel_evaluation(&dir, 100.0);

        let mut evaluator = MergeEvaluator {
            stages: &stages,
            state: &state,
            output_vcf_dir: &dir,
            evaluation: Some(&evaluation),
            signals: &signals,
        };
        let skipped = MergeOutcome {
            clustered: false,
            detection_rate: Some(0.0),
        };
        assert_eq!(evaluator.merge_and_evaluate(0.05), skipped);

        evaluator.evaluation = None;
        let skipped = MergeOutcome {
            clustered: false,
            detection_rate: None,
        };
        assert_eq!(evaluator.merge_and_evaluate(0.1), skipped);

        assert_eq!(stages.calls_matching("cluster"), 0);
        assert!(state.read_detection_rate_history().unwrap().is_empty());
    }

    #[test]
    fn test_merge_without_panel() {
        let (_guard, dir) = utf8_temp_dir();
        let (state, stages) = setup(&dir);
        let signals = RunSignals::new();

        let evaluator = MergeEvaluator {
            stages: &stages,
            state: &state,
            output_vcf_dir: &dir,
            evaluation: None,
            signals: &signals,
        };
        let outcome = evaluator.merge_and_evaluate(12.0);
        assert!(outcome.clustered);
        assert_eq!(outcome.detection_rate, None);

        let outputs = stages.cluster_outputs.lock().unwrap();
        assert_eq!(*outputs, vec![(3, dir.join("12.0_output.vcf"))]);
        assert!(!signals.is_stop_requested());
    }

    #[test]
    fn test_merge_retries_and_evaluates() {
        let (_guard, dir) = utf8_temp_dir();
        let (state, stages) = setup(&dir);
        *stages.cluster_failures.lock().unwrap() = 2;
        let signals = RunSignals::new();
        let evaluation = panel_evaluation(&dir, 75.0);

        let evaluator = MergeEvaluator {
            stages: &stages,
            state: &state,
            output_vcf_dir: &dir,
            evaluation: Some(&evaluation),
            signals: &signals,
        };
        let rate = evaluator.merge_and_evaluate(4.0).detection_rate.unwrap();
        assert_ulps_eq!(rate, 50.0);
        assert_eq!(stages.calls_matching("cluster:2"), 3);
        assert!(!signals.is_stop_requested());

        let history = state.read_detection_rate_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_ulps_eq!(history[0].0, 4.0);
        assert_ulps_eq!(history[0].1, 50.0);

        let report = read_lines(&evaluation.recall_file);
        assert_eq!(report.len(), 3);
        assert!(report[1].contains("chr1_1000_DEL_-500"));
    }

    #[test]
    fn test_target_rate_requests_stop() {
        let (_guard, dir) = utf8_temp_dir();
        let (state, stages) = setup(&dir);
        let signals = RunSignals::new();
        let evaluation = panel_evaluation(&dir, 50.0);

        let evaluator = MergeEvaluator {
            stages: &stages,
            state: &state,
            output_vcf_dir: &dir,
            evaluation: Some(&evaluation),
            signals: &signals,
        };
        assert_eq!(
            evaluator.merge_and_evaluate(25.0).detection_rate,
            Some(50.0)
        );
        assert_eq!(stages.calls_matching("cluster:5"), 1);
        assert!(signals.is_stop_requested());
    }
}
