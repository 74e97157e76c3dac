//! Removal of partial or corrupt artifacts left behind by a failed pipeline stage
//!
//! All operations are idempotent, so they can be used both before an in-loop retry and when
//! recovering tasks interrupted by a crash.
//!

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use log::{info, warn};
use simple_error::{SimpleResult, try_with};

use crate::filenames::SIGNATURE_FILE_EXTENSION;
use crate::os_utils::remove_file_if_present;
use crate::state::{TaskPaths, WorkDirLayout};

/// Remove the task's alignment, index and depth outputs, then repair its read batch
///
pub fn clean_alignment_artifacts(paths: &TaskPaths) -> SimpleResult<()> {
    remove_alignment_outputs(paths)?;
    if paths.read_batch.exists() {
        let stats = restore_read_batch(&paths.read_batch)?;
        if stats.dropped_line_count > 0 {
            warn!(
                "Dropped {} malformed lines from read batch '{}', {} reads retained",
                stats.dropped_line_count, paths.read_batch, stats.kept_record_count
            );
        }
    }
    Ok(())
}

/// Remove only the files produced by the alignment and depth stages
///
pub fn remove_alignment_outputs(paths: &TaskPaths) -> SimpleResult<()> {
    for filename in [
        paths.alignment.clone(),
        paths.alignment_index(),
        paths.depth_summary_gz(),
        paths.depth_summary(),
    ] {
        try_with!(
            remove_file_if_present(&filename),
            "Unable to remove alignment artifact: '{filename}'"
        );
    }
    Ok(())
}

/// True for `<task_name>.*.pickle` or `<task_name>_*.pickle`, so that task "r1" never matches the
/// files of task "r10"
fn is_task_signature_file(name: &str, task_name: &str) -> bool {
    name.ends_with(SIGNATURE_FILE_EXTENSION)
        && name
            .strip_prefix(task_name)
            .is_some_and(|rest| rest.starts_with(['.', '_']))
}

/// Remove all signature files in `signatures_dir` written for `task_name`
///
/// Returns the number of files removed.
///
pub fn delete_signature_files(signatures_dir: &Utf8Path, task_name: &str) -> SimpleResult<usize> {
    if !signatures_dir.is_dir() {
        return Ok(0);
    }
    let entries = try_with!(
        signatures_dir.read_dir_utf8(),
        "Unable to list signature directory: '{signatures_dir}'"
    );
    let mut removed = 0;
    for entry in entries {
        let entry = try_with!(entry, "Unable to list signature directory: '{signatures_dir}'");
        let name = entry.file_name();
        if is_task_signature_file(name, task_name) {
            match remove_file_if_present(entry.path()) {
                Ok(true) => {
                    info!("Deleted signature file: '{}'", entry.path());
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Unable to delete signature file '{}': {e}", entry.path()),
            }
        }
    }
    Ok(removed)
}

/// Purge everything a crash-interrupted task may have left half written
///
pub fn recover_in_flight(layout: &WorkDirLayout, paths: &TaskPaths) -> SimpleResult<()> {
    info!("Recovering interrupted task with read batch '{}'", paths.read_batch);
    delete_signature_files(&layout.signatures_dir(), &paths.bam_name)?;
    remove_alignment_outputs(paths)?;
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
pub struct RestoreStats {
    pub kept_record_count: usize,
    pub dropped_line_count: usize,
}

/// Filter FASTQ text down to well-formed 4-line records
///
/// A record is kept when its header starts with '@', its separator starts with '+', and its
/// sequence and quality lines have equal length. After any malformed line the scan advances by a
/// single line, so the next header found re-synchronizes the record boundaries.
///
fn filter_fastq_records(
    reader: impl BufRead,
    mut writer: impl Write,
) -> std::io::Result<RestoreStats> {
    let lines = reader
        .lines()
        .map(|x| x.map(|line| line.trim().to_string()))
        .collect::<std::io::Result<Vec<_>>>()?;

    let mut stats = RestoreStats::default();
    let mut i = 0;
    while i < lines.len() {
        let is_record = lines[i].starts_with('@')
            && i + 3 < lines.len()
            && lines[i + 2].starts_with('+')
            && lines[i + 1].len() == lines[i + 3].len();
        if is_record {
            for line in &lines[i..i + 4] {
                writeln!(writer, "{line}")?;
            }
            stats.kept_record_count += 1;
            i += 4;
        } else {
            stats.dropped_line_count += 1;
            i += 1;
        }
    }
    writer.flush()?;
    Ok(stats)
}

fn is_gzip_filename(filename: &Utf8Path) -> bool {
    filename.as_str().to_ascii_lowercase().ends_with(".gz")
}

/// Rewrite a read batch in place so that it contains only well-formed FASTQ records
///
/// Gzipped batches are read and rewritten gzipped. The new content is written to a temporary
/// sibling file, which then replaces the original.
///
pub fn restore_read_batch(filename: &Utf8Path) -> SimpleResult<RestoreStats> {
    let file = try_with!(
        File::open(filename),
        "Unable to open read batch for repair: '{filename}'"
    );
    let tmp_filename = Utf8PathBuf::from(format!("{filename}.repair.tmp"));
    let tmp_file = try_with!(
        File::create(&tmp_filename),
        "Unable to create temporary read batch file: '{tmp_filename}'"
    );

    let result = if is_gzip_filename(filename) {
        let reader: Box<dyn Read> = Box::new(MultiGzDecoder::new(file));
        let mut encoder = GzEncoder::new(BufWriter::new(tmp_file), Compression::default());
        filter_fastq_records(BufReader::new(reader), &mut encoder)
            .and_then(|stats| encoder.finish()?.flush().map(|_| stats))
    } else {
        filter_fastq_records(BufReader::new(file), BufWriter::new(tmp_file))
    };

    let stats = match result {
        Ok(x) => x,
        Err(e) => {
            let _ = remove_file_if_present(&tmp_filename);
            simple_error::bail!("Unable to repair read batch '{filename}': {e}");
        }
    };
    try_with!(
        std::fs::rename(&tmp_filename, filename),
        "Unable to replace read batch '{filename}' with repaired copy"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkDirLayout;
    use crate::task_queue::Task;
    use crate::test_utils::{utf8_temp_dir, write_file};

    const GOOD_RECORD: &str = "@r1\nACGT\n+\nIIII\n";

    #[test]
    fn test_filter_truncated_trailing_record() {
        let text = format!("{GOOD_RECORD}@r2\nACGTAC\n+\nII");
        let mut output = Vec::new();
        let stats = filter_fastq_records(text.as_bytes(), &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), GOOD_RECORD);
        assert_eq!(stats.kept_record_count, 1);
        assert_eq!(stats.dropped_line_count, 4);
    }

    #[test]
    fn test_filter_resynchronizes_after_garbage() {
        let text = format!("garbage\n{GOOD_RECORD}@r2\nAC\n+\nIII\n{GOOD_RECORD}");
        let mut output = Vec::new();
        let stats = filter_fastq_records(text.as_bytes(), &mut output).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            format!("{GOOD_RECORD}{GOOD_RECORD}")
        );
        assert_eq!(stats.kept_record_count, 2);
    }

    #[test]
    fn test_restore_gzip_read_batch() {
        let (_guard, dir) = utf8_temp_dir();
        let filename = dir.join("batch.fastq.gz");
        {
            let mut encoder =
                GzEncoder::new(File::create(&filename).unwrap(), Compression::default());
            encoder
                .write_all(format!("{GOOD_RECORD}@cut\nAC").as_bytes())
                .unwrap();
            encoder.finish().unwrap();
        }

        let stats = restore_read_batch(&filename).unwrap();
        assert_eq!(stats.kept_record_count, 1);

        let mut content = String::new();
        MultiGzDecoder::new(File::open(&filename).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, GOOD_RECORD);
        assert!(!dir.join("batch.fastq.gz.repair.tmp").exists());

        // Repair is idempotent
        assert_eq!(
            restore_read_batch(&filename).unwrap(),
            RestoreStats {
                kept_record_count: 1,
                dropped_line_count: 0
            }
        );
    }

    #[test]
    fn test_clean_alignment_artifacts() {
        let (_guard, dir) = utf8_temp_dir();
        let layout = WorkDirLayout::new(&dir);
        std::fs::create_dir_all(layout.alignment_dir()).unwrap();
        let paths = layout.task_paths(&dir, &Task::new("t1.fq"));

        write_file(&paths.read_batch, &format!("{GOOD_RECORD}@bad"));
        for filename in [
            paths.alignment.clone(),
            paths.alignment_index(),
            paths.depth_summary(),
            paths.depth_summary_gz(),
        ] {
            write_file(&filename, "partial");
        }

        clean_alignment_artifacts(&paths).unwrap();
        assert!(!paths.alignment.exists());
        assert!(!paths.alignment_index().exists());
        assert!(!paths.depth_summary().exists());
        assert!(!paths.depth_summary_gz().exists());
        assert_eq!(
            std::fs::read_to_string(&paths.read_batch).unwrap(),
            GOOD_RECORD
        );

        // Second cleanup finds nothing left to do
        clean_alignment_artifacts(&paths).unwrap();
    }

    #[test]
    fn test_delete_signature_files() {
        let (_guard, dir) = utf8_temp_dir();
        for name in ["t1.0.pickle", "t1_chr2.pickle", "t1.txt", "t2.0.pickle"] {
            write_file(&dir.join(name), "");
        }
        assert_eq!(delete_signature_files(&dir, "t1").unwrap(), 2);
        assert!(dir.join("t1.txt").exists());
        assert!(dir.join("t2.0.pickle").exists());
        assert_eq!(delete_signature_files(&dir, "t1").unwrap(), 0);
        assert_eq!(
            delete_signature_files(&dir.join("missing"), "t1").unwrap(),
            0
        );
    }

    #[test]
    fn test_delete_signature_files_keeps_longer_task_names() {
        let (_guard, dir) = utf8_temp_dir();
        for name in ["batch1.0.pickle", "batch10.0.pickle", "batch1x.pickle"] {
            write_file(&dir.join(name), "");
        }
        assert_eq!(delete_signature_files(&dir, "batch1").unwrap(), 1);
        assert!(!dir.join("batch1.0.pickle").exists());
        assert!(dir.join("batch10.0.pickle").exists());
        assert!(dir.join("batch1x.pickle").exists());
    }
}
