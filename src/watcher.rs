//! Admission of new read batch files from the monitored directory
//!

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use simple_error::{SimpleResult, try_with};

use crate::signals::RunSignals;
use crate::stability::{CancelToken, is_file_complete};
use crate::state::PipelineState;
use crate::task_queue::{QueueItem, Task};

/// Poll period for the event pump to notice cancellation
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

const READ_BATCH_EXTENSIONS: [&str; 4] = [".fq", ".fastq", ".fq.gz", ".fastq.gz"];

/// True if the filename has one of the accepted read batch extensions, ignoring case
pub fn is_read_batch_filename(filename: &str) -> bool {
    let filename = filename.to_ascii_lowercase();
    READ_BATCH_EXTENSIONS.iter().any(|x| filename.ends_with(x))
}

/// List the read batch files in `dir` which are not yet in the finished set, sorted by name
///
pub fn scan_backlog(dir: &Utf8Path, finished: &HashSet<String>) -> SimpleResult<Vec<String>> {
    let entries = try_with!(
        dir.read_dir_utf8(),
        "Unable to list monitored directory: '{dir}'"
    );
    let mut names = Vec::new();
    for entry in entries {
        let entry = try_with!(entry, "Unable to list monitored directory: '{dir}'");
        let name = entry.file_name();
        if entry.path().is_file() && is_read_batch_filename(name) && !finished.contains(name) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Clone, Copy, Debug)]
pub struct StabilityParams {
    pub check_interval: Duration,
    pub required_stable_samples: u32,
}

/// Decides which files become tasks, and hands them to the worker queue
///
/// Each file name is admitted at most once per run, whether it arrives from a directory event or
/// from the startup backlog scan.
///
pub struct FileAdmission {
    tx: Sender<QueueItem>,
    state: PipelineState,
    signals: Arc<RunSignals>,
    stability: StabilityParams,
    cancel: CancelToken,
    admitted: Mutex<HashSet<String>>,
}

impl FileAdmission {
    pub fn new(
        tx: Sender<QueueItem>,
        state: PipelineState,
        signals: Arc<RunSignals>,
        stability: StabilityParams,
    ) -> Self {
        Self {
            tx,
            state,
            signals,
            stability,
            cancel: CancelToken::new(),
            admitted: Mutex::new(HashSet::new()),
        }
    }

    /// Cancel any in-progress stability wait, and refuse all later files
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Reserve `name` for admission, returning false if it was already admitted
    fn reserve(&self, name: &str) -> bool {
        self.admitted.lock().unwrap().insert(name.to_string())
    }

    fn enqueue(&self, name: &str, log_discovery: bool) {
        if self.tx.send(QueueItem::Task(Task::new(name))).is_err() {
            warn!("Worker has exited, read batch '{name}' was not queued");
            return;
        }
        if log_discovery {
            if let Err(e) = self.state.append_discovered(name) {
                warn!("{e}");
            }
        }
        self.signals.note_admission();
    }

    /// Admit a file reported as newly created in the monitored directory
    ///
    /// Blocks until the file size is stable. Returns true if the file was queued.
    ///
    pub fn handle_created(&self, path: &Utf8Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        if !is_read_batch_filename(name) || self.cancel.is_cancelled() {
            return false;
        }
        if !self.reserve(name) {
            debug!("Ignoring repeated event for read batch '{name}'");
            return false;
        }

        debug!("Waiting for read batch '{name}' to finish writing");
        let complete = is_file_complete(
            path,
            self.stability.check_interval,
            self.stability.required_stable_samples,
            &self.cancel,
        );
        if !complete {
            info!("Admission of read batch '{name}' cancelled");
            self.admitted.lock().unwrap().remove(name);
            return false;
        }

        self.enqueue(name, true);
        info!("New read batch file: '{name}'");
        true
    }

    /// Queue unfinished read batches found at startup, without waiting for stability
    ///
    /// Names missing from the discovery log are added to it. Returns the number of tasks queued.
    ///
    pub fn seed_backlog(&self, names: &[String]) -> SimpleResult<usize> {
        let discovered = self.state.read_discovered()?;
        let mut count = 0;
        for name in names {
            if self.reserve(name) {
                self.enqueue(name, !discovered.contains(name));
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Paths of all files which may have just appeared in the watched directory from this event
///
fn created_paths(event: &Event) -> Vec<Utf8PathBuf> {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            &event.paths[..]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            &event.paths[event.paths.len().saturating_sub(1)..]
        }
        _ => &[],
    };
    paths
        .iter()
        .filter_map(|x| Utf8PathBuf::from_path_buf(x.clone()).ok())
        .collect()
}

/// Runs a filesystem watcher on the monitored directory until stopped
///
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    admission: Arc<FileAdmission>,
    pump: JoinHandle<()>,
}

impl DirectoryWatcher {
    pub fn start(dir: &Utf8Path, admission: Arc<FileAdmission>) -> SimpleResult<Self> {
        let (tx, rx) = channel::<notify::Result<Event>>();
        let mut watcher = try_with!(
            notify::recommended_watcher(tx),
            "Unable to create filesystem watcher"
        );
        try_with!(
            watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive),
            "Unable to watch directory: '{dir}'"
        );

        let pump_admission = admission.clone();
        let pump = std::thread::spawn(move || {
            loop {
                if pump_admission.cancel.is_cancelled() {
                    break;
                }
                match rx.recv_timeout(EVENT_POLL_INTERVAL) {
                    Ok(Ok(event)) => {
                        for path in created_paths(&event) {
                            pump_admission.handle_created(&path);
                        }
                    }
                    Ok(Err(e)) => warn!("Filesystem watcher error: {e}"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        info!("Watching directory '{dir}' for new read batches");
        Ok(Self {
            watcher,
            admission,
            pump,
        })
    }

    /// Stop watching, and wait for any in-progress admission to finish or be cancelled
    ///
    pub fn stop(self) {
        let Self {
            watcher,
            admission,
            pump,
        } = self;
        admission.cancel();
        drop(watcher);
        if pump.join().is_err() {
            warn!("Filesystem watcher event thread panicked");
        }
        if let Err(e) = admission.state.append_discovery_note("watcher stopped") {
            warn!("{e}");
        }
        info!("Stopped watching for new read batches");
    }
}
