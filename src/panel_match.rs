//! Tolerant interval matching of query SVs against a reference panel
//!
//! A query SV matches a panel SV when both have the same SVTYPE, the panel position is within
//! `pos_tolerance` of the query position, and the absolute query length falls within the
//! `[length_lower_ratio, length_upper_ratio]` band around the absolute panel length.
//!
//! Each panel chromosome is sorted by position, so the candidates for one query are found with
//! a binary search to the start of the position window followed by a short forward scan.
//!

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use log::{debug, info};
use simple_error::{SimpleResult, try_with};

use crate::reference_panel::{PanelMode, ReferencePanel};
use crate::sv_record::{VariantRecord, is_header_line};

#[derive(Clone, Debug, PartialEq)]
pub struct MatchParams {
    /// Maximum distance between query and panel positions
    pub pos_tolerance: i64,
    pub length_lower_ratio: f64,
    pub length_upper_ratio: f64,
}

impl MatchParams {
    /// Derive the length ratio band from a minimum allele size similarity
    ///
    /// A `pctsize` of 0.9 gives the band [0.9, 1.1].
    ///
    pub fn from_pctsize(pctsize: f64, pos_tolerance: i64) -> Self {
        Self {
            pos_tolerance,
            length_lower_ratio: pctsize,
            length_upper_ratio: 1.0 + (1.0 - pctsize),
        }
    }

    fn is_length_match(&self, query_svlen: i64, candidate_svlen: i64) -> bool {
        let query_len = query_svlen.unsigned_abs() as f64;
        let candidate_len = candidate_svlen.unsigned_abs() as f64;
        let lower_bound = self.length_lower_ratio * candidate_len;
        let upper_bound = self.length_upper_ratio * candidate_len;
        (lower_bound..=upper_bound).contains(&query_len)
    }
}

/// One query/panel SV pair accepted by the matcher
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    pub chrom: String,
    pub query_id: String,
    pub query_pos: i64,
    pub query_svlen: i64,

    /// Panel id, synthesized from location, type and length for unnamed panel records
    pub panel_id: String,
    pub panel_pos: i64,
    pub panel_svlen: i64,
    pub panel_allele_frequency: Option<f64>,
}

#[derive(Debug, Default)]
pub struct MatchResult {
    /// Distinct panel ids that received at least one match
    pub matched_ids: HashSet<String>,
    pub records: Vec<MatchRecord>,

    /// Total SV count of the panel that the queries were matched against
    pub panel_total_count: usize,
}

impl MatchResult {
    /// Fraction of distinct panel SVs matched, or 0 for an empty panel
    ///
    pub fn detection_rate(&self) -> f64 {
        if self.panel_total_count == 0 {
            0.0
        } else {
            self.matched_ids.len() as f64 / self.panel_total_count as f64
        }
    }

    pub fn detection_rate_percent(&self) -> f64 {
        self.detection_rate() * 100.0
    }

    fn add_query(&mut self, query: &VariantRecord, panel: &ReferencePanel, params: &MatchParams) {
        let Some(candidates) = panel.chrom_records(&query.chrom) else {
            return;
        };

        let window_start = query.pos - params.pos_tolerance;
        let window_end = query.pos + params.pos_tolerance;
        let first_index = candidates.partition_point(|x| x.pos < window_start);

        for candidate in &candidates[first_index..] {
            if candidate.pos > window_end {
                break;
            }
            if candidate.svtype != query.svtype {
                continue;
            }
            if !params.is_length_match(query.svlen, candidate.svlen) {
                continue;
            }

            let panel_id = candidate.effective_id();
            self.matched_ids.insert(panel_id.clone());
            self.records.push(MatchRecord {
                chrom: query.chrom.clone(),
                query_id: query.id.clone(),
                query_pos: query.pos,
                query_svlen: query.svlen,
                panel_id,
                panel_pos: candidate.pos,
                panel_svlen: candidate.svlen,
                panel_allele_frequency: candidate.allele_frequency,
            });
        }
    }
}

/// Match all query SVs against the reference panel
///
pub fn match_variants<'a>(
    queries: impl IntoIterator<Item = &'a VariantRecord>,
    panel: &ReferencePanel,
    params: &MatchParams,
) -> MatchResult {
    let mut result = MatchResult {
        panel_total_count: panel.total_count(),
        ..Default::default()
    };
    for query in queries {
        result.add_query(query, panel, params);
    }
    result
}

/// Stream SV records from a VCF file and match them against the reference panel
///
/// Lines which can't be parsed into a record are skipped.
///
pub fn match_vcf_file(
    vcf_filename: &Utf8Path,
    panel: &ReferencePanel,
    params: &MatchParams,
) -> SimpleResult<MatchResult> {
    let file = try_with!(
        File::open(vcf_filename),
        "Unable to open SV snapshot file: '{vcf_filename}'"
    );
    let mut result = MatchResult {
        panel_total_count: panel.total_count(),
        ..Default::default()
    };
    let mut skipped_line_count = 0;
    for line in BufReader::new(file).lines() {
        let line = try_with!(line, "Unable to read SV snapshot file: '{vcf_filename}'");
        if is_header_line(&line) || line.trim().is_empty() {
            continue;
        }
        match VariantRecord::from_vcf_line(&line) {
            Ok(query) => result.add_query(&query, panel, params),
            Err(_) => skipped_line_count += 1,
        }
    }
    if skipped_line_count > 0 {
        debug!(
            "Skipped {skipped_line_count} unparsable records in SV snapshot file '{vcf_filename}'"
        );
    }
    Ok(result)
}

/// Summary line appended to the mapping report
pub fn detection_summary(result: &MatchResult) -> String {
    format!(
        "Detected: {}, Total panel variants: {}, Detection rate: {:.2}%",
        result.matched_ids.len(),
        result.panel_total_count,
        result.detection_rate_percent()
    )
}

/// Write one row per match, followed by the detection summary line
///
pub fn write_mapping_report(
    filename: &Utf8Path,
    result: &MatchResult,
    mode: PanelMode,
) -> SimpleResult<()> {
    let file = try_with!(
        File::create(filename),
        "Unable to create panel mapping report file: '{filename}'"
    );
    let mut writer = BufWriter::new(file);
    try_with!(
        write_mapping_report_impl(&mut writer, result, mode),
        "Unable to write panel mapping report file: '{filename}'"
    );
    info!("Wrote panel mapping report to file: '{filename}'");
    Ok(())
}

fn write_mapping_report_impl(
    writer: &mut impl Write,
    result: &MatchResult,
    mode: PanelMode,
) -> std::io::Result<()> {
    let with_af = mode.reports_allele_frequency();
    write!(
        writer,
        "CHROM\tInput_VCF_ID\tInput_VCF_POS\tInput_VCF_SVLEN\tHighfreq_ID\tPOS\tSVLEN"
    )?;
    if with_af {
        write!(writer, "\tAF")?;
    }
    writeln!(writer)?;

    for record in result.records.iter() {
        write!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            record.chrom,
            record.query_id,
            record.query_pos,
            record.query_svlen,
            record.panel_id,
            record.panel_pos,
            record.panel_svlen
        )?;
        if with_af {
            match record.panel_allele_frequency {
                Some(af) => write!(writer, "\t{af}")?,
                None => write!(writer, "\t.")?,
            }
        }
        writeln!(writer)?;
    }
    writeln!(writer, "{}", detection_summary(result))?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_ulps_eq;

    fn sv(chrom: &str, pos: i64, id: &str, svtype: &str, svlen: i64) -> VariantRecord {
        VariantRecord {
            chrom: chrom.to_string(),
            pos,
            id: id.to_string(),
            svtype: svtype.to_string(),
            svlen,
            allele_frequency: None,
        }
    }

    fn vcf_line(record: &VariantRecord) -> String {
        format!(
            "{}\t{}\t{}\tN\t<{}>\t.\tPASS\tSVTYPE={};SVLEN={}\n",
            record.chrom, record.pos, record.id, record.svtype, record.svtype, record.svlen
        )
    }

    fn panel_from(records: &[VariantRecord]) -> ReferencePanel {
        let text = records.iter().map(vcf_line).collect::<String>();
        ReferencePanel::from_reader(text.as_bytes(), PanelMode::UserDefined)
            .unwrap()
            .0
    }

    fn default_params() -> MatchParams {
        MatchParams {
            pos_tolerance: 1000,
            length_lower_ratio: 0.9,
            length_upper_ratio: 1.1,
        }
    }

    #[test]
    fn test_from_pctsize() {
        let params = MatchParams::from_pctsize(0.7, 500);
        assert_eq!(params.pos_tolerance, 500);
        assert_ulps_eq!(params.length_lower_ratio, 0.7);
        assert_ulps_eq!(params.length_upper_ratio, 1.3);
    }

    #[test]
    fn test_unnamed_panel_match() {
        let panel = panel_from(&[sv("chr1", 1000, ".", "DEL", -500)]);
        let queries = [sv("chr1", 1050, "q1", "DEL", -480)];

        let result = match_variants(&queries, &panel, &default_params());
        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.panel_id, "chr1_1000_DEL_-500");
        assert_eq!(record.query_id, "q1");
        assert_eq!(record.query_pos, 1050);
        assert_eq!(record.panel_pos, 1000);
        assert!(result.matched_ids.contains("chr1_1000_DEL_-500"));
        assert_ulps_eq!(result.detection_rate(), 1.0);
    }

    #[test]
    fn test_query_chrom_is_normalized() {
        let panel = panel_from(&[sv("chr3", 1000, "p", "INS", 100)]);

        // Records read from text are normalized, so a bare chromosome name matches
        let query_line = vcf_line(&sv("3", 1000, "q", "INS", 100));
        let query = VariantRecord::from_vcf_line(&query_line).unwrap();
        let result = match_variants([&query], &panel, &default_params());
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].chrom, "chr3");
    }

    #[test]
    fn test_position_boundaries() {
        let panel = panel_from(&[sv("chr1", 10_000, "p", "DEL", -100)]);
        let params = default_params();

        for (pos, expected) in [
            (9_000, 1),
            (11_000, 1),
            (8_999, 0),
            (11_001, 0),
        ] {
            let queries = [sv("chr1", pos, "q", "DEL", -100)];
            let result = match_variants(&queries, &panel, &params);
            assert_eq!(result.records.len(), expected, "query pos {pos}");
        }
    }

    #[test]
    fn test_length_boundaries() {
        let panel = panel_from(&[sv("chr1", 1000, "p", "DEL", -500)]);
        let params = default_params();

        for (svlen, expected) in [(-450, 1), (-550, 1), (-449, 0), (-551, 0), (450, 1)] {
            let queries = [sv("chr1", 1000, "q", "DEL", svlen)];
            let result = match_variants(&queries, &panel, &params);
            assert_eq!(result.records.len(), expected, "query svlen {svlen}");
        }
    }

    #[test]
    fn test_svtype_must_match() {
        let panel = panel_from(&[sv("chr1", 1000, "p", "DEL", -500)]);
        let queries = [sv("chr1", 1000, "q", "INS", -500)];
        let result = match_variants(&queries, &panel, &default_params());
        assert!(result.records.is_empty());
        assert_ulps_eq!(result.detection_rate(), 0.0);
    }

    #[test]
    fn test_missing_chrom_is_skipped() {
        let panel = panel_from(&[sv("chr1", 1000, "p", "DEL", -500)]);
        let queries = [sv("chr2", 1000, "q", "DEL", -500)];
        let result = match_variants(&queries, &panel, &default_params());
        assert!(result.records.is_empty());
    }

    #[test]
    fn test_detection_rate_set_semantics() {
        let panel = panel_from(&[
            sv("chr1", 1000, "p1", "DEL", -500),
            sv("chr1", 50_000, "p2", "DEL", -500),
        ]);
        let queries = [
            sv("chr1", 1010, "q1", "DEL", -500),
            sv("chr1", 990, "q2", "DEL", -510),
        ];
        let result = match_variants(&queries, &panel, &default_params());
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.matched_ids.len(), 1);
        assert_ulps_eq!(result.detection_rate(), 0.5);
        assert_ulps_eq!(result.detection_rate_percent(), 50.0);
    }

    #[test]
    fn test_one_query_matches_several_candidates() {
        let panel = panel_from(&[
            sv("chr1", 100, "p1", "INS", 200),
            sv("chr1", 600, "p2", "INS", 210),
            sv("chr1", 900, "p3", "DEL", -200),
            sv("chr1", 2000, "p4", "INS", 200),
        ]);
        let queries = [sv("chr1", 500, "q", "INS", 205)];
        let result = match_variants(&queries, &panel, &default_params());
        let ids = result
            .records
            .iter()
            .map(|x| x.panel_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[test]
    fn test_empty_panel_detection_rate() {
        let panel = panel_from(&[]);
        let queries = [sv("chr1", 1000, "q", "DEL", -500)];
        let result = match_variants(&queries, &panel, &default_params());
        assert_eq!(result.panel_total_count, 0);
        assert_ulps_eq!(result.detection_rate(), 0.0);
    }

    #[test]
    fn test_match_vcf_file_and_report() {
        let (_guard, dir) = crate::test_utils::utf8_temp_dir();

        let panel_text = "\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
chr1\t1000\t.\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-500;AF=0.8
chr1\t8000\tp2\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=300;AF=0.7
";
        let (panel, _) = ReferencePanel::from_reader(
            panel_text.as_bytes(),
            PanelMode::PopulationFrequency { af_threshold: 0.5 },
        )
        .unwrap();

        let vcf_filename = dir.join("snapshot.vcf");
        crate::test_utils::write_file(
            &vcf_filename,
            "##fileformat=VCFv4.2\n\
             1\t1050\tq1\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-480\n\
             1\tbad\tq2\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-480\n\
             1\t20000\tq3\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-480\n",
        );

        let result = match_vcf_file(&vcf_filename, &panel, &default_params()).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_ulps_eq!(result.detection_rate_percent(), 50.0);

        let report_filename = dir.join("recall.txt");
        write_mapping_report(&report_filename, &result, panel.mode()).unwrap();
        let lines = crate::test_utils::read_lines(&report_filename);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("\tSVLEN\tAF"));
        assert_eq!(lines[1], "chr1\tq1\t1050\t-480\tchr1_1000_DEL_-500\t1000\t-500\t0.8");
        assert_eq!(
            lines[2],
            "Detected: 1, Total panel variants: 2, Detection rate: 50.00%"
        );
    }
}
