use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use super::utils::{
    check_optional_filename, check_pctsize, check_required_dir, check_required_filename,
};
use crate::controller::MonitorConfig;
use crate::filenames::SETTINGS_FILENAME;
use crate::reference_panel::PanelMode;
use crate::state::WorkDirLayout;
use crate::watcher::StabilityParams;

#[derive(Args, Debug, Deserialize, Serialize)]
pub struct MonitorSettings {
    /// Directory monitored for new read batch files (.fq, .fastq, .fq.gz or .fastq.gz)
    #[arg(value_name = "FASTQ_DIR")]
    pub fastq_dir: Utf8PathBuf,

    /// Genome reference in FASTA format
    #[arg(value_name = "REFERENCE")]
    pub reference: Utf8PathBuf,

    /// Work directory for alignments, SV signatures and resumable run state
    ///
    /// Rerunning the monitor with an existing work directory resumes the earlier run.
    ///
    #[arg(value_name = "WORK_DIR")]
    pub work_dir: Utf8PathBuf,

    /// Directory for the SV call snapshot written at each merge
    #[arg(value_name = "OUTPUT_VCF_DIR")]
    pub output_vcf_dir: Utf8PathBuf,

    /// Minimizer index for the reference. Built in the work directory if not given.
    #[arg(long, value_name = "FILE")]
    pub mmi_path: Option<Utf8PathBuf>,

    /// Aligner preset
    #[arg(hide = true, long, default_value = "map-ont")]
    pub platform: String,

    /// Stop monitoring if no new read batch is found for this many seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub monitor_fade: u64,

    /// High frequency SV panel in VCF format, used to score each snapshot
    #[arg(long, value_name = "FILE")]
    pub high_freq_file: Option<Utf8PathBuf>,

    /// SV panel in VCF format used to score each snapshot
    ///
    /// Replaces --high-freq-file if both are given.
    ///
    #[arg(long, value_name = "FILE")]
    pub target_set: Option<Utf8PathBuf>,

    /// Treat the SV panel as a user-defined recall set, so no allele frequency filter is applied
    #[arg(long)]
    pub user_defined: bool,

    /// Minimum allele frequency for a panel SV to be included in the detection target
    #[arg(long, default_value_t = 1.0)]
    pub sv_freq: f64,

    /// Minimum allele size similarity for a snapshot SV to match a panel SV
    #[arg(long, default_value_t = 0.9)]
    pub pctsize: f64,

    /// Maximum position distance for a snapshot SV to match a panel SV
    #[arg(long, default_value_t = 1000)]
    pub ref_dist: i64,

    /// Mapping report of snapshot SVs to panel SVs
    ///
    /// Defaults to 'recall_file.txt' in the work directory.
    ///
    #[arg(long, value_name = "FILE")]
    pub recall_file: Option<Utf8PathBuf>,

    /// Stop once the panel detection rate reaches this percentage
    #[arg(long, default_value_t = 100.0)]
    pub target_rate: f64,

    /// Merge and evaluate an SV call snapshot after every batch-interval read batches
    #[arg(long, default_value_t = 4)]
    pub batch_interval: usize,

    /// Seconds between file size checks when waiting for a new read batch to finish writing
    #[arg(hide = true, long, default_value_t = 2)]
    pub stability_check_interval: u64,

    /// Number of unchanged file size checks required before a read batch is accepted
    #[arg(hide = true, long, default_value_t = 1)]
    pub stability_samples: u32,

    /// Seconds between checks for the monitor idle timeout
    #[arg(hide = true, long, default_value_t = 150)]
    pub idle_check_interval: u64,

    #[arg(hide = true, long, default_value = "minimap2")]
    pub minimap2: String,

    #[arg(hide = true, long, default_value = "samtools")]
    pub samtools: String,

    #[arg(hide = true, long, default_value = "pandepth")]
    pub pandepth: String,

    #[arg(hide = true, long, default_value = "cuteSV")]
    pub cutesv: String,
}

impl MonitorSettings {
    /// Panel file used for evaluation, and how to interpret it
    ///
    pub fn panel_source(&self) -> Option<(&Utf8Path, PanelMode)> {
        let filename = self
            .target_set
            .as_deref()
            .or(self.high_freq_file.as_deref())?;
        Some((
            filename,
            PanelMode::from_settings(self.user_defined, self.sv_freq),
        ))
    }

    pub fn get_recall_file(&self) -> Utf8PathBuf {
        match &self.recall_file {
            Some(x) => x.clone(),
            None => WorkDirLayout::new(&self.work_dir).default_recall_file(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            fastq_dir: self.fastq_dir.clone(),
            reference: self.reference.clone(),
            work_dir: self.work_dir.clone(),
            output_vcf_dir: self.output_vcf_dir.clone(),
            reference_index: self.mmi_path.clone(),
            batch_interval: self.batch_interval,
            idle_timeout: Duration::from_secs(self.monitor_fade),
            idle_check_interval: Duration::from_secs(self.idle_check_interval),
            stability: StabilityParams {
                check_interval: Duration::from_secs(self.stability_check_interval),
                required_stable_samples: self.stability_samples,
            },
        }
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_monitor_settings(
    mut settings: MonitorSettings,
) -> SimpleResult<MonitorSettings> {
    check_required_dir(&settings.fastq_dir, "monitored read batch")?;
    check_required_filename(&settings.reference, "reference")?;
    check_optional_filename(settings.mmi_path.as_deref(), "reference index")?;
    check_optional_filename(settings.high_freq_file.as_deref(), "high frequency SV panel")?;
    check_optional_filename(settings.target_set.as_deref(), "target SV panel")?;
    check_pctsize(settings.pctsize)?;

    if settings.batch_interval == 0 {
        bail!("--batch-interval argument must be greater than 0");
    }
    if settings.ref_dist < 0 {
        bail!("--ref-dist argument must not be negative");
    }
    if !(0.0..=100.0).contains(&settings.target_rate) {
        bail!(
            "--target-rate argument must be in [0,100], not {}",
            settings.target_rate
        );
    }
    if settings.stability_check_interval == 0 {
        bail!("--stability-check-interval argument must be greater than 0");
    }
    if settings.idle_check_interval == 0 {
        bail!("--idle-check-interval argument must be greater than 0");
    }

    settings.recall_file = Some(settings.get_recall_file());
    Ok(settings)
}

/// Write monitor settings out in json format
pub fn write_monitor_settings(work_dir: &Utf8Path, settings: &MonitorSettings) {
    let filename = work_dir.join(SETTINGS_FILENAME);

    info!("Writing monitor settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create monitor settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}
