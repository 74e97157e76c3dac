//! Shared helpers for unit tests
//!

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::external_tools::{PipelineStages, StageError};
use crate::state::TaskPaths;

/// Create a temporary directory and return it alongside its utf8 path
///
/// The directory is removed when the returned guard is dropped.
///
pub fn utf8_temp_dir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

pub fn write_file(path: &Utf8Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

pub fn read_lines(path: &Utf8Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|x| x.to_string())
        .collect()
}

/// In-memory stand-in for the external pipeline tools
///
/// Each stage writes the outputs the real tool would leave behind. Failure counts make the next
/// N calls of a stage fail after writing partial output.
///
pub struct ScriptedStages {
    pub mean_depth: f64,
    pub snapshot: String,
    pub signatures_dir: Utf8PathBuf,
    pub align_failures: Mutex<usize>,
    pub signature_failures: Mutex<usize>,
    pub cluster_failures: Mutex<usize>,

    /// Stage call log, as "stage:argument"
    pub calls: Mutex<Vec<String>>,
    pub cluster_outputs: Mutex<Vec<(u32, Utf8PathBuf)>>,
}

impl ScriptedStages {
    pub fn new(mean_depth: f64, snapshot: &str, signatures_dir: &Utf8Path) -> Self {
        Self {
            mean_depth,
            snapshot: snapshot.to_string(),
            signatures_dir: signatures_dir.to_owned(),
            align_failures: Mutex::new(0),
            signature_failures: Mutex::new(0),
            cluster_failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            cluster_outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|x| x.starts_with(prefix))
            .count()
    }

    fn log_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn take_failure(failures: &Mutex<usize>) -> bool {
    let mut failures = failures.lock().unwrap();
    if *failures > 0 {
        *failures -= 1;
        true
    } else {
        false
    }
}

fn scripted_failure(stage: &str) -> StageError {
    StageError::CommandFailed {
        command: stage.to_string(),
        code: Some(1),
        stderr: "scripted failure".to_string(),
    }
}

impl PipelineStages for ScriptedStages {
    fn build_index(&self, _reference: &Utf8Path, index: &Utf8Path) -> Result<(), StageError> {
        self.log_call(format!("index:{index}"));
        std::fs::write(index, "index")?;
        Ok(())
    }

    fn align(&self, paths: &TaskPaths) -> Result<(), StageError> {
        self.log_call(format!("align:{}", paths.bam_name));
        std::fs::write(&paths.alignment, "partial")?;
        if take_failure(&self.align_failures) {
            return Err(scripted_failure("align"));
        }
        std::fs::write(paths.alignment_index(), "index")?;
        Ok(())
    }

    fn summarize_depth(&self, paths: &TaskPaths) -> Result<(), StageError> {
        self.log_call(format!("depth:{}", paths.bam_name));
        std::fs::write(
            paths.depth_summary(),
            format!("##AllGenome\t3000\t2500\tMeanDepth: {}\n", self.mean_depth),
        )?;
        Ok(())
    }

    fn extract_signatures(&self, paths: &TaskPaths) -> Result<(), StageError> {
        self.log_call(format!("signatures:{}", paths.bam_name));
        let filename = self.signatures_dir.join(format!("{}.0.pickle", paths.bam_name));
        std::fs::write(&filename, "partial")?;
        if take_failure(&self.signature_failures) {
            return Err(scripted_failure("signatures"));
        }
        Ok(())
    }

    fn cluster_and_genotype(
        &self,
        min_support: u32,
        output_vcf: &Utf8Path,
    ) -> Result<(), StageError> {
        self.log_call(format!("cluster:{min_support}"));
        self.cluster_outputs
            .lock()
            .unwrap()
            .push((min_support, output_vcf.to_owned()));
        if take_failure(&self.cluster_failures) {
            return Err(scripted_failure("cluster"));
        }
        std::fs::write(output_vcf, &self.snapshot)?;
        Ok(())
    }
}
