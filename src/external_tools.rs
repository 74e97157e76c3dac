//! Invocation of the external aligner, depth, signature and clustering tools
//!
//! The pipeline only depends on the [`PipelineStages`] contract. [`ExternalTools`] fulfils it by
//! running minimap2, samtools, pandepth and cuteSV as child processes. Every call blocks until
//! the child exits, and no timeout is applied.
//!

use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use itertools::Itertools;
use log::{debug, warn};
use thiserror::Error;

use crate::os_utils::remove_file_if_present;
use crate::state::TaskPaths;

/// Maximum stderr length retained in a command failure message
const MAX_STDERR_REPORT_LEN: usize = 2000;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("required command not found: {command}")]
    CommandNotFound { command: String },

    #[error("command failed: {command} (exit: {code:?}) stderr: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("expected output file is missing: {path}")]
    MissingOutput { path: String },

    #[error("unable to parse mean depth from summary file: {path}")]
    DepthParse { path: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The external stages driven by the pipeline
///
/// Each method blocks until its stage is complete. Implementations must leave behind the
/// documented outputs on success; on failure the caller cleans up and retries.
///
pub trait PipelineStages: Sync {
    /// Build the aligner's reference index at `index`
    fn build_index(&self, reference: &Utf8Path, index: &Utf8Path) -> Result<(), StageError>;

    /// Write a sorted, indexed alignment of the task's read batch to its alignment path
    fn align(&self, paths: &TaskPaths) -> Result<(), StageError>;

    /// Write the depth summary file for the task's alignment
    fn summarize_depth(&self, paths: &TaskPaths) -> Result<(), StageError>;

    /// Write per-task SV signature files into the shared signature work directory
    fn extract_signatures(&self, paths: &TaskPaths) -> Result<(), StageError>;

    /// Cluster all accumulated signatures and genotype the result into `output_vcf`
    fn cluster_and_genotype(&self, min_support: u32, output_vcf: &Utf8Path)
    -> Result<(), StageError>;
}

/// Tool paths and shared arguments for all external commands
#[derive(Clone, Debug)]
pub struct ExternalTools {
    pub minimap2: String,
    pub samtools: String,
    pub pandepth: String,
    pub cutesv: String,

    /// minimap2 preset, such as 'map-ont'
    pub platform: String,
    pub thread_count: usize,
    pub reference: Utf8PathBuf,
    pub reference_index: Utf8PathBuf,
    pub cutesv_work_dir: Utf8PathBuf,
}

fn command_label(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(OsStr::to_string_lossy)
        .join(" ")
}

fn map_spawn_error(err: std::io::Error, program: &str) -> StageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StageError::CommandNotFound {
            command: program.to_string(),
        }
    } else {
        StageError::Io(err)
    }
}

fn stderr_report(stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    let start = stderr.len().saturating_sub(MAX_STDERR_REPORT_LEN);
    let start = (start..stderr.len())
        .find(|x| stderr.is_char_boundary(*x))
        .unwrap_or(stderr.len());
    stderr[start..].to_string()
}

/// Run a command to completion, capturing its output
///
fn run_command(mut command: Command, program: &str) -> Result<(), StageError> {
    let label = command_label(&command);
    debug!("Running command: {label}");
    let output = command
        .output()
        .map_err(|err| map_spawn_error(err, program))?;
    if !output.status.success() {
        return Err(StageError::CommandFailed {
            command: label,
            code: output.status.code(),
            stderr: stderr_report(&output.stderr),
        });
    }
    Ok(())
}

/// Check whether a command can be found directly or on PATH
pub fn exists_command(cmd: &str) -> bool {
    if Utf8Path::new(cmd).exists() {
        return true;
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(cmd))
            .any(|full| full.exists())
    })
}

/// Decompress `gz_filename` to `filename` and remove the compressed copy
///
fn gunzip_replace(gz_filename: &Utf8Path, filename: &Utf8Path) -> Result<(), StageError> {
    if !gz_filename.exists() {
        return Err(StageError::MissingOutput {
            path: gz_filename.to_string(),
        });
    }
    let mut decoder = GzDecoder::new(BufReader::new(File::open(gz_filename)?));
    let mut output = File::create(filename)?;
    std::io::copy(&mut decoder, &mut output)?;
    remove_file_if_present(gz_filename)?;
    Ok(())
}

impl ExternalTools {
    /// Signature work directory argument, cuteSV expects a trailing separator here
    fn cutesv_work_dir_arg(&self) -> String {
        format!("{}/", self.cutesv_work_dir)
    }

    /// Log a warning for every configured tool which can't be located
    ///
    pub fn warn_on_missing_commands(&self) {
        for cmd in [&self.minimap2, &self.samtools, &self.pandepth, &self.cutesv] {
            if !exists_command(cmd) {
                warn!("External command '{cmd}' not found, stages using it will fail");
            }
        }
    }

    /// Run 'minimap2 | samtools sort', sending aligner stderr to a log file next to the output
    ///
    fn align_and_sort(&self, paths: &TaskPaths) -> Result<(), StageError> {
        let aligner_log = File::create(format!("{}.align.log", paths.alignment))?;
        let mut aligner = Command::new(&self.minimap2);
        aligner
            .arg("-t")
            .arg(self.thread_count.to_string())
            .arg("-ax")
            .arg(&self.platform)
            .arg(&self.reference_index)
            .arg(&paths.read_batch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(aligner_log));
        let aligner_label = command_label(&aligner);
        debug!("Running command: {aligner_label}");

        let mut aligner_child = aligner
            .spawn()
            .map_err(|err| map_spawn_error(err, &self.minimap2))?;
        let aligner_stdout = match aligner_child.stdout.take() {
            Some(x) => x,
            None => {
                let _ = aligner_child.kill();
                let _ = aligner_child.wait();
                return Err(StageError::Io(std::io::Error::other(format!(
                    "failed to capture stdout for command: {aligner_label}"
                ))));
            }
        };

        let mut sorter = Command::new(&self.samtools);
        sorter
            .arg("sort")
            .arg("-o")
            .arg(&paths.alignment)
            .stdin(Stdio::from(aligner_stdout));
        let sort_result = run_command(sorter, &self.samtools);
        if sort_result.is_err() {
            let _ = aligner_child.kill();
        }
        let aligner_status = aligner_child.wait()?;
        sort_result?;

        if !aligner_status.success() {
            return Err(StageError::CommandFailed {
                command: aligner_label,
                code: aligner_status.code(),
                stderr: format!("see '{}.align.log'", paths.alignment),
            });
        }
        Ok(())
    }
}

impl PipelineStages for ExternalTools {
    fn build_index(&self, reference: &Utf8Path, index: &Utf8Path) -> Result<(), StageError> {
        let mut command = Command::new(&self.minimap2);
        command.arg("-d").arg(index).arg(reference);
        run_command(command, &self.minimap2)
    }

    fn align(&self, paths: &TaskPaths) -> Result<(), StageError> {
        self.align_and_sort(paths)?;

        let mut command = Command::new(&self.samtools);
        command.arg("index").arg(&paths.alignment);
        run_command(command, &self.samtools)
    }

    fn summarize_depth(&self, paths: &TaskPaths) -> Result<(), StageError> {
        let mut command = Command::new(&self.pandepth);
        command
            .arg("-i")
            .arg(&paths.alignment)
            .arg("-o")
            .arg(paths.depth_output_prefix())
            .arg("-t")
            .arg(self.thread_count.to_string());
        run_command(command, &self.pandepth)?;
        gunzip_replace(&paths.depth_summary_gz(), &paths.depth_summary())
    }

    fn extract_signatures(&self, paths: &TaskPaths) -> Result<(), StageError> {
        let mut command = Command::new(&self.cutesv);
        command
            .arg("--input")
            .arg(&paths.alignment)
            .arg("--reference")
            .arg(&self.reference)
            .arg("--work_dir")
            .arg(self.cutesv_work_dir_arg())
            .arg("--bam_name")
            .arg(&paths.bam_name)
            .arg("--threads")
            .arg(self.thread_count.to_string())
            .arg("--mode")
            .arg("1");
        run_command(command, &self.cutesv)
    }

    fn cluster_and_genotype(
        &self,
        min_support: u32,
        output_vcf: &Utf8Path,
    ) -> Result<(), StageError> {
        let mut command = Command::new(&self.cutesv);
        command
            .arg("--retain_work_dir")
            .arg("--write_old_sigs")
            .arg("--genotype")
            .arg("--output")
            .arg(output_vcf)
            .arg("--reference")
            .arg(&self.reference)
            .arg("--work_dir")
            .arg(self.cutesv_work_dir_arg())
            .arg("--threads")
            .arg(self.thread_count.to_string())
            .arg("--min_support")
            .arg(min_support.to_string())
            .arg("--mode")
            .arg("2");
        run_command(command, &self.cutesv)?;
        if !output_vcf.exists() {
            return Err(StageError::MissingOutput {
                path: output_vcf.to_string(),
            });
        }
        Ok(())
    }
}
