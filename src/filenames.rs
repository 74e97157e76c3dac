//! Names of all files and directories written into the monitor work directory
//!

use const_format::concatcp;

use crate::globals::PROGRAM_NAME;

pub const ALIGNMENT_DIRNAME: &str = "bam";
pub const CUTESV_WORK_DIRNAME: &str = "cutesv_work_dir";
pub const SIGNATURES_DIRNAME: &str = "signatures";

pub const COVERAGE_LOG_FILENAME: &str = "coverage_list.txt";
pub const DETECTION_RATE_HISTORY_FILENAME: &str = "depth_performance_rate.txt";
pub const DISCOVERY_LOG_FILENAME: &str = "all_task.txt";
pub const FINISHED_TASK_LOG_FILENAME: &str = "finished.txt";
pub const TASK_STATE_LOG_FILENAME: &str = "task_state.log";

pub const LOG_FILENAME: &str = concatcp!(PROGRAM_NAME, ".log");

pub const DEFAULT_RECALL_FILENAME: &str = "recall_file.txt";
pub const REFERENCE_INDEX_FILENAME: &str = "ref.mmi";
pub const RUN_STATS_FILENAME: &str = "run.stats.json";
pub const SETTINGS_FILENAME: &str = "monitor.settings.json";

/// Suffix of the snapshot VCF written at each merge, prefixed by the cumulative depth
pub const SNAPSHOT_VCF_SUFFIX: &str = "_output.vcf";

/// Suffixes appended to an alignment path for the files derived from it
pub const ALIGNMENT_INDEX_SUFFIX: &str = ".bai";
pub const DEPTH_OUTPUT_PREFIX_SUFFIX: &str = ".coverage";
pub const DEPTH_SUMMARY_SUFFIX: &str = concatcp!(DEPTH_OUTPUT_PREFIX_SUFFIX, ".chr.stat");
pub const DEPTH_SUMMARY_GZ_SUFFIX: &str = concatcp!(DEPTH_SUMMARY_SUFFIX, ".gz");

/// Extension of per-task signature files written by the signature extractor
pub const SIGNATURE_FILE_EXTENSION: &str = ".pickle";
