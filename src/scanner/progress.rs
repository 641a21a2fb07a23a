//! Scan progress tracking, reporting and cancellation.

use crate::core::types::Verdict;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a caller and a session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next file boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scan progress information.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Entries committed so far
    pub processed: u64,
    /// Entries enumerated (0 while enumerating)
    pub total: u64,
    /// Entries that matched a signature
    pub matched: u64,
    /// Bytes read by classification
    pub bytes_read: u64,
    /// Most recently committed path
    pub current_path: Option<PathBuf>,
    pub start_time: Instant,
}

impl ScanProgress {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Files per second.
    pub fn files_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Completion percentage, once the total is known.
    pub fn percentage(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.processed as f64 / self.total as f64) * 100.0)
    }

    /// Estimate remaining time based on progress so far.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.processed == 0 || self.processed >= self.total {
            return None;
        }
        let rate = self.files_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64((self.total - self.processed) as f64 / rate))
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

/// Callback invoked after every committed entry.
pub type ProgressCallback = Box<dyn Fn(&ScanProgress) + Send + Sync>;

/// Progress tracker for real-time scan monitoring.
pub struct ProgressTracker {
    processed: AtomicU64,
    total: AtomicU64,
    matched: AtomicU64,
    bytes_read: AtomicU64,
    current_path: RwLock<Option<PathBuf>>,
    start_time: Instant,
    callback: RwLock<Option<ProgressCallback>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            current_path: RwLock::new(None),
            start_time: Instant::now(),
            callback: RwLock::new(None),
        }
    }

    /// Set the progress callback.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&ScanProgress) + Send + Sync + 'static,
    {
        let mut cb = self.callback.write().unwrap_or_else(|e| e.into_inner());
        *cb = Some(Box::new(callback));
    }

    /// Set the number of enumerated entries.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Record one committed verdict and notify the callback.
    pub fn record(&self, verdict: &Verdict) {
        if verdict.is_match() {
            self.matched.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut current = self.current_path.write().unwrap_or_else(|e| e.into_inner());
            *current = Some(verdict.record.path.clone());
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.notify();
    }

    /// Add bytes read by a worker.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get current progress snapshot.
    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            processed: self.processed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            current_path: self
                .current_path
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            start_time: self.start_time,
        }
    }

    fn notify(&self) {
        let callback = self.callback.read().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = callback.as_ref() {
            cb(&self.snapshot());
        }
    }
}

/// Console progress reporter.
pub struct ConsoleProgressReporter {
    last_line_length: AtomicUsize,
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self {
            last_line_length: AtomicUsize::new(0),
        }
    }

    /// Format a progress line.
    pub fn format_line(progress: &ScanProgress) -> String {
        let status = if progress.is_done() {
            "Complete"
        } else {
            "Scanning"
        };
        match progress.percentage() {
            Some(pct) => format!(
                "[{}] {:.1}% | Files: {}/{} | Matches: {} | Rate: {:.0}/s | Time: {}s",
                status,
                pct,
                progress.processed,
                progress.total,
                progress.matched,
                progress.files_per_second(),
                progress.elapsed().as_secs()
            ),
            None => format!(
                "[{}] Files: {} | Matches: {} | Time: {}s",
                status,
                progress.processed,
                progress.matched,
                progress.elapsed().as_secs()
            ),
        }
    }

    /// Report progress to stderr, overwriting the previous line.
    pub fn report(&self, progress: &ScanProgress) {
        let message = Self::format_line(progress);

        let last_len = self.last_line_length.load(Ordering::Relaxed);
        let padding = " ".repeat(last_len.saturating_sub(message.len()));

        eprint!("\r{}{}", message, padding);
        self.last_line_length.store(message.len(), Ordering::Relaxed);

        if progress.is_done() {
            eprintln!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileRecord, Outcome};

    fn verdict(outcome: Outcome) -> Verdict {
        Verdict::new(FileRecord::new("/scan/x"), outcome)
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new();
        tracker.set_total(3);
        tracker.record(&verdict(Outcome::Clean));
        tracker.record(&verdict(Outcome::Matched {
            signature_id: "KW-001".into(),
            label: "Keyword.Virus".into(),
        }));
        tracker.add_bytes(1000);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.matched, 1);
        assert_eq!(snapshot.bytes_read, 1000);
        assert_eq!(snapshot.current_path, Some(PathBuf::from("/scan/x")));
        assert!(!snapshot.is_done());
    }

    #[test]
    fn test_callback_after_every_entry() {
        let tracker = ProgressTracker::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        tracker.set_callback(move |p| {
            seen_clone.lock().unwrap().push((p.processed, p.total));
        });

        tracker.set_total(2);
        tracker.record(&verdict(Outcome::Clean));
        tracker.record(&verdict(Outcome::Clean));

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_scan_rate() {
        let progress = ScanProgress {
            processed: 100,
            total: 200,
            matched: 0,
            bytes_read: 10_000,
            current_path: None,
            start_time: Instant::now() - Duration::from_secs(10),
        };

        assert!((progress.files_per_second() - 10.0).abs() < 1.0);
        assert_eq!(progress.percentage(), Some(50.0));
        assert!(progress.estimated_remaining().is_some());
        assert!(ConsoleProgressReporter::format_line(&progress).contains("50.0%"));
    }
}
