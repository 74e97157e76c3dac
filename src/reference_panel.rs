//! Reference panel of known SVs used to score detection rate
//!

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;
use itertools::Itertools;
use log::{debug, info, warn};
use simple_error::{SimpleResult, try_with};
use strum::Display;
use thousands::Separable;

use crate::sv_record::{VariantRecord, is_header_line, parse_vcf_record_with_info};

/// How the reference panel file should be interpreted
#[derive(Clone, Copy, Debug, Display, PartialEq)]
pub enum PanelMode {
    /// A user-authored recall set, every record is kept
    #[strum(to_string = "user-defined")]
    UserDefined,

    /// A population VCF, only records with AF at or above the threshold are kept
    #[strum(to_string = "population-frequency")]
    PopulationFrequency { af_threshold: f64 },
}

impl PanelMode {
    pub fn from_settings(user_defined: bool, af_threshold: f64) -> Self {
        if user_defined {
            Self::UserDefined
        } else {
            Self::PopulationFrequency { af_threshold }
        }
    }

    pub fn reports_allele_frequency(&self) -> bool {
        matches!(self, Self::PopulationFrequency { .. })
    }
}

/// Counts from building a reference panel
#[derive(Debug, Default, PartialEq)]
pub struct PanelBuildStats {
    pub kept_record_count: usize,
    pub low_frequency_record_count: usize,
    pub parse_error_record_count: usize,
}

/// Reference SVs grouped by chromosome, each chromosome sorted by position
///
/// The panel is immutable after construction.
///
pub struct ReferencePanel {
    chroms: HashMap<String, Vec<VariantRecord>>,
    total_count: usize,
    mode: PanelMode,
}

impl ReferencePanel {
    pub fn from_file(filename: &Utf8Path, mode: PanelMode) -> SimpleResult<Self> {
        info!("Reading {mode} reference panel from file '{filename}'");
        let file = try_with!(
            File::open(filename),
            "Unable to open reference panel file: '{filename}'"
        );
        let (panel, stats) = try_with!(
            Self::from_reader(BufReader::new(file), mode),
            "Unable to read reference panel file: '{filename}'"
        );
        if stats.parse_error_record_count > 0 {
            warn!(
                "Skipped {} malformed records in reference panel file '{filename}'",
                stats.parse_error_record_count.separate_with_commas()
            );
        }
        info!(
            "Reference panel contains {} SVs on {} chromosomes ({} removed below AF threshold)",
            panel.total_count().separate_with_commas(),
            panel.chroms.len(),
            stats.low_frequency_record_count.separate_with_commas()
        );
        debug!(
            "Reference panel chromosomes: {}",
            panel.chrom_names().sorted().join(",")
        );
        Ok(panel)
    }

    pub fn from_reader(
        reader: impl BufRead,
        mode: PanelMode,
    ) -> std::io::Result<(Self, PanelBuildStats)> {
        let mut stats = PanelBuildStats::default();
        let mut chroms: HashMap<String, Vec<VariantRecord>> = HashMap::new();

        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            if is_header_line(&line) || line.trim().is_empty() {
                continue;
            }
            let (mut record, info) = match parse_vcf_record_with_info(&line) {
                Ok(x) => x,
                Err(e) => {
                    debug!("Dropping reference panel line {}: {e}", line_index + 1);
                    stats.parse_error_record_count += 1;
                    continue;
                }
            };

            if let PanelMode::PopulationFrequency { af_threshold } = mode {
                let af = match info.allele_frequency() {
                    Ok(x) => x,
                    Err(e) => {
                        debug!("Dropping reference panel line {}: {e}", line_index + 1);
                        stats.parse_error_record_count += 1;
                        continue;
                    }
                };
                if af < af_threshold {
                    stats.low_frequency_record_count += 1;
                    continue;
                }
                record.allele_frequency = Some(af);
            }

            stats.kept_record_count += 1;
            chroms.entry(record.chrom.clone()).or_default().push(record);
        }

        for records in chroms.values_mut() {
            records.sort_by_key(|x| x.pos);
        }

        let panel = Self {
            chroms,
            total_count: stats.kept_record_count,
            mode,
        };
        Ok((panel, stats))
    }

    /// Total number of SVs in the panel, across all chromosomes
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    /// Position-sorted records for one (normalized) chromosome name
    pub fn chrom_records(&self, chrom: &str) -> Option<&[VariantRecord]> {
        self.chroms.get(chrom).map(|x| x.as_slice())
    }

    pub fn chrom_names(&self) -> impl Iterator<Item = &str> {
        self.chroms.keys().map(|x| x.as_str())
    }
}
