use camino::Utf8Path;
use simple_error::{SimpleResult, bail};

/// Check a required input filename
///
/// Assumes no logger has been configured yet
///
pub fn check_required_filename(filename: &Utf8Path, label: &str) -> SimpleResult<()> {
    if filename.as_str().is_empty() {
        bail!("Must specify {label} file");
    }
    if !filename.exists() {
        bail!("Can't find specified {label} file: '{filename}'");
    }
    if !filename.is_file() {
        bail!("Specified {label} file path does not appear to be a file: '{filename}'");
    }
    Ok(())
}

/// Check an optional input filename
///
/// Assumes no logger has been configured yet
///
pub fn check_optional_filename(filename_opt: Option<&Utf8Path>, label: &str) -> SimpleResult<()> {
    if let Some(filename) = filename_opt {
        check_required_filename(filename, label)?;
    }
    Ok(())
}

/// Check a required input directory
///
/// Assumes no logger has been configured yet
///
pub fn check_required_dir(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if !dirname.exists() {
        bail!("Can't find specified {label} directory: '{dirname}'");
    }
    if !dirname.is_dir() {
        bail!("Specified {label} directory path does not appear to be a directory: '{dirname}'");
    }
    Ok(())
}

/// Check that a similarity fraction is in (0,1]
///
pub fn check_pctsize(pctsize: f64) -> SimpleResult<()> {
    if !(pctsize > 0.0 && pctsize <= 1.0) {
        bail!("--pctsize argument must be in (0,1], not {pctsize}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{utf8_temp_dir, write_file};

    #[test]
    fn test_input_path_checks() {
        let (_guard, dir) = utf8_temp_dir();
        let filename = dir.join("ref.fa");
        write_file(&filename, ">chr1\nACGT\n");

        assert!(check_required_filename(&filename, "reference").is_ok());
        assert!(check_required_filename(&dir, "reference").is_err());
        assert!(check_required_filename(&dir.join("none.fa"), "reference").is_err());
        assert!(check_optional_filename(None, "panel").is_ok());
        assert!(check_required_dir(&dir, "read batch").is_ok());
        assert!(check_required_dir(&filename, "read batch").is_err());
    }

    #[test]
    fn test_check_pctsize() {
        assert!(check_pctsize(0.9).is_ok());
        assert!(check_pctsize(1.0).is_ok());
        assert!(check_pctsize(0.0).is_err());
        assert!(check_pctsize(1.5).is_err());
        assert!(check_pctsize(f64::NAN).is_err());
    }
}
