use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Compress,
    Extract,
}

/// Point-in-time view of one archive operation.
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub processed_files: u64,
    pub total_files: u64,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub current_file: String,
    pub started_at: Instant,
    pub operation: Operation,
    pub archive_path: PathBuf,
}

impl ProgressUpdate {
    pub fn new(operation: Operation, archive_path: PathBuf) -> Self {
        Self {
            processed_files: 0,
            total_files: 0,
            processed_bytes: 0,
            total_bytes: 0,
            current_file: String::new(),
            started_at: Instant::now(),
            operation,
            archive_path,
        }
    }

    pub fn with_totals(mut self, total_files: u64, total_bytes: u64) -> Self {
        self.total_files = total_files;
        self.total_bytes = total_bytes;
        self
    }

    /// Completion in percent. File counts drive it; bytes are used when no file
    /// total is known.
    pub fn percentage(&self) -> f64 {
        if self.total_files > 0 {
            ratio(self.processed_files, self.total_files)
        } else if self.total_bytes > 0 {
            ratio(self.processed_bytes, self.total_bytes)
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Linear estimate of the time left.
    pub fn eta(&self) -> Duration {
        let (done, total) = if self.total_files > 0 {
            (self.processed_files, self.total_files)
        } else {
            (self.processed_bytes, self.total_bytes)
        };
        eta_from(self.elapsed(), done, total)
    }

    pub fn is_finished(&self) -> bool {
        self.total_files > 0 && self.processed_files >= self.total_files
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    done as f64 / total as f64 * 100.0
}

fn eta_from(elapsed: Duration, done: u64, total: u64) -> Duration {
    if done == 0 || total <= done {
        return Duration::ZERO;
    }
    elapsed.mul_f64((total - done) as f64 / done as f64)
}

/// Turns parsed tool lines into successive updates.
///
/// Processed counts never exceed the totals, so directory lines that were not
/// part of the pre-scan cannot push progress past 100%.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    current: ProgressUpdate,
    sizes: HashMap<String, u64>,
}

impl ProgressTracker {
    pub(crate) fn new(initial: ProgressUpdate) -> Self {
        Self {
            current: initial,
            sizes: HashMap::new(),
        }
    }

    /// Byte sizes keyed by the names the tool prints.
    pub(crate) fn with_sizes(mut self, sizes: HashMap<String, u64>) -> Self {
        self.sizes = sizes;
        self
    }

    pub(crate) fn snapshot(&self) -> ProgressUpdate {
        self.current.clone()
    }

    pub(crate) fn advance(&mut self, name: &str) -> ProgressUpdate {
        let key = name.trim_start_matches("./").trim_end_matches('/');
        let bytes = self.sizes.get(key).copied().unwrap_or(0);

        let update = &mut self.current;
        update.processed_files = (update.processed_files + 1).min(update.total_files);
        update.processed_bytes = update
            .processed_bytes
            .saturating_add(bytes)
            .min(update.total_bytes);
        update.current_file = name.to_string();
        update.clone()
    }

    pub(crate) fn finish(&mut self) -> ProgressUpdate {
        let update = &mut self.current;
        update.processed_files = update.total_files;
        update.processed_bytes = update.total_bytes;
        update.clone()
    }
}
