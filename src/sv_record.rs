//! Minimal structural variant records parsed from VCF-like text lines
//!
//! Only the fields needed for panel matching are extracted. This is not a VCF validator: header
//! lines are left to the caller, and all columns beyond INFO are ignored.
//!

use thiserror::Error;

/// ID column value used for records without a name
pub const UNNAMED_ID: &str = ".";

/// Conventional prefix of canonical chromosome names
const CHROM_PREFIX: &str = "chr";

/// Minimum column count for a usable record: CHROM POS ID REF ALT QUAL FILTER INFO
const MIN_VCF_FIELD_COUNT: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum VariantParseError {
    #[error("expected at least 8 tab-separated fields, found {0}")]
    TooFewFields(usize),

    #[error("invalid POS value '{0}'")]
    InvalidPosition(String),

    #[error("missing or invalid AF value '{0}'")]
    InvalidAlleleFrequency(String),
}

/// Prefix the chromosome name with 'chr' if it isn't already there
///
pub fn normalize_chrom(chrom: &str) -> String {
    if chrom.starts_with(CHROM_PREFIX) {
        chrom.to_string()
    } else {
        format!("{CHROM_PREFIX}{chrom}")
    }
}

/// Fixed-schema view of the INFO annotation field
///
/// `SVTYPE` defaults to an empty string and `SVLEN` defaults to 0 when missing or malformed. `AF`
/// is kept as raw text so that callers can decide whether a bad value is an error.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfoFields {
    pub svtype: String,
    pub svlen: i64,
    pub raw_allele_frequency: Option<String>,
}

impl InfoFields {
    pub fn parse(info: &str) -> Self {
        let mut fields = Self::default();
        for entry in info.split(';') {
            // Bare flags carry no value and none of them are used here
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            match key {
                "SVTYPE" => fields.svtype = value.to_string(),
                "SVLEN" => fields.svlen = value.parse::<i64>().unwrap_or(0),
                "AF" => fields.raw_allele_frequency = Some(value.to_string()),
                _ => {}
            }
        }
        fields
    }

    /// Parsed allele frequency, failing if the value is missing or not a number
    ///
    pub fn allele_frequency(&self) -> Result<f64, VariantParseError> {
        let raw = self.raw_allele_frequency.as_deref().unwrap_or("");
        raw.parse::<f64>()
            .map_err(|_| VariantParseError::InvalidAlleleFrequency(raw.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantRecord {
    /// Chromosome name, normalized to carry the 'chr' prefix
    pub chrom: String,
    pub pos: i64,
    pub id: String,
    pub svtype: String,

    /// Signed SV length, negative for deletions
    pub svlen: i64,
    pub allele_frequency: Option<f64>,
}

impl VariantRecord {
    /// Parse one non-header VCF line
    ///
    /// Any malformed AF value is recorded as `None` here. Parsers which require AF should use
    /// [`parse_vcf_record_with_info`] and inspect the returned info fields.
    ///
    pub fn from_vcf_line(line: &str) -> Result<Self, VariantParseError> {
        parse_vcf_record_with_info(line).map(|(record, _)| record)
    }

    pub fn is_unnamed(&self) -> bool {
        self.id == UNNAMED_ID
    }

    /// A stable id derived from location, type and length, for records without a name
    ///
    pub fn synthesized_id(&self) -> String {
        format!("{}_{}_{}_{}", self.chrom, self.pos, self.svtype, self.svlen)
    }

    /// The record id, or the synthesized id if the record is unnamed
    ///
    pub fn effective_id(&self) -> String {
        if self.is_unnamed() {
            self.synthesized_id()
        } else {
            self.id.clone()
        }
    }
}

/// Parse one non-header VCF line, also returning the INFO fields it was built from
///
pub fn parse_vcf_record_with_info(
    line: &str,
) -> Result<(VariantRecord, InfoFields), VariantParseError> {
    let words = line.trim_end_matches(['\r', '\n']).split('\t').collect::<Vec<_>>();
    if words.len() < MIN_VCF_FIELD_COUNT {
        return Err(VariantParseError::TooFewFields(words.len()));
    }

    let pos = words[1]
        .trim()
        .parse::<i64>()
        .map_err(|_| VariantParseError::InvalidPosition(words[1].to_string()))?;

    let info = InfoFields::parse(words[7].trim());
    let record = VariantRecord {
        chrom: normalize_chrom(words[0]),
        pos,
        id: words[2].to_string(),
        svtype: info.svtype.clone(),
        svlen: info.svlen,
        allele_frequency: info.allele_frequency().ok(),
    };
    Ok((record, info))
}

/// True for VCF meta-information and column header lines
///
pub fn is_header_line(line: &str) -> bool {
    line.starts_with('#')
}
