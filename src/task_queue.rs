//! Read batch tasks handed from the watcher and backlog scan to the single worker
//!
//! Tasks travel over an mpsc channel of [`QueueItem`], which the worker drains in FIFO order.
//!

/// One unprocessed read batch file, identified by its file name in the monitored directory
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Task {
    pub name: String,
}

impl Task {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Task name with its final extension removed
    ///
    /// This is used to name all per-task output files, so "r1.fastq.gz" yields "r1.fastq".
    ///
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(index) if index > 0 => &self.name[..index],
            _ => &self.name,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum QueueItem {
    Task(Task),

    /// Terminal value, the worker exits after popping it
    Shutdown,
}
