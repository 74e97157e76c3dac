//! Top-level routine for the match-panel command
//!

use log::info;
use simple_error::SimpleResult;

use crate::cli::MatchPanelSettings;
use crate::panel_match::{MatchParams, detection_summary, match_vcf_file, write_mapping_report};
use crate::reference_panel::ReferencePanel;

/// Score one VCF against an SV panel and write the mapping report
///
/// Returns the detection rate in percent.
///
pub fn run_match_panel(settings: &MatchPanelSettings) -> SimpleResult<f64> {
    let panel = ReferencePanel::from_file(&settings.panel_vcf, settings.panel_mode())?;
    let params = MatchParams::from_pctsize(settings.pctsize, settings.ref_dist);
    let result = match_vcf_file(&settings.input_vcf, &panel, &params)?;
    write_mapping_report(&settings.output_mapping, &result, panel.mode())?;
    info!("{}", detection_summary(&result));
    Ok(result.detection_rate_percent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{read_lines, utf8_temp_dir, write_file};
    use approx::assert_ulps_eq;

    #[test]
    fn test_run_match_panel() {
        let (_guard, dir) = utf8_temp_dir();
        let settings = MatchPanelSettings {
            input_vcf: dir.join("calls.vcf"),
            panel_vcf: dir.join("panel.vcf"),
            output_mapping: dir.join("mapping.txt"),
            user_defined: false,
            sv_freq: 0.5,
            pctsize: 0.9,
            ref_dist: 1000,
        };
        write_file(
            &settings.panel_vcf,
            "##fileformat=VCFv4.2\n\
             chr1\t1000\tp1\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-500;AF=0.8\n\
             chr1\t5000\tp2\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=300;AF=0.6\n\
             chr2\t7000\tp3\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-200;AF=0.1\n",
        );
        write_file(
            &settings.input_vcf,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             chr1\t1200\tc1\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-520\n\
             chr2\t7000\tc2\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-200\n",
        );

        let rate = run_match_panel(&settings).unwrap();
        assert_ulps_eq!(rate, 50.0);

        let report = read_lines(&settings.output_mapping);
        assert!(report[0].ends_with("\tAF"));
        assert_eq!(report.len(), 3);
        assert!(report[1].starts_with("chr1\tc1\t1200\t-520\tp1\t1000\t-500"));
        assert_eq!(
            report[2],
            "Detected: 1, Total panel variants: 2, Detection rate: 50.00%"
        );
    }
}
