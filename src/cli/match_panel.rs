use camino::Utf8PathBuf;
use clap::Args;
use simple_error::{SimpleResult, bail};

use super::utils::{check_pctsize, check_required_filename};
use crate::reference_panel::PanelMode;

#[derive(Args, Debug)]
pub struct MatchPanelSettings {
    /// SV calls to evaluate, in VCF format
    #[arg(value_name = "INPUT_VCF")]
    pub input_vcf: Utf8PathBuf,

    /// SV panel in VCF format
    #[arg(value_name = "PANEL_VCF")]
    pub panel_vcf: Utf8PathBuf,

    /// Output mapping report of input SVs to panel SVs
    #[arg(value_name = "OUTPUT_MAPPING")]
    pub output_mapping: Utf8PathBuf,

    /// Treat the SV panel as a user-defined recall set, so no allele frequency filter is applied
    #[arg(long)]
    pub user_defined: bool,

    /// Minimum allele frequency for a panel SV to be included in the detection target
    #[arg(long, default_value_t = 1.0)]
    pub sv_freq: f64,

    /// Minimum allele size similarity for an input SV to match a panel SV
    #[arg(long, default_value_t = 0.9)]
    pub pctsize: f64,

    /// Maximum position distance for an input SV to match a panel SV
    #[arg(long, default_value_t = 1000)]
    pub ref_dist: i64,
}

impl MatchPanelSettings {
    pub fn panel_mode(&self) -> PanelMode {
        PanelMode::from_settings(self.user_defined, self.sv_freq)
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_match_panel_settings(
    settings: MatchPanelSettings,
) -> SimpleResult<MatchPanelSettings> {
    check_required_filename(&settings.input_vcf, "input VCF")?;
    check_required_filename(&settings.panel_vcf, "SV panel")?;
    check_pctsize(settings.pctsize)?;
    if settings.ref_dist < 0 {
        bail!("--ref-dist argument must not be negative");
    }
    Ok(settings)
}
