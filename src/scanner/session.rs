//! Scan session orchestration.
//!
//! A session enumerates a root, classifies files on a bounded pool of
//! blocking workers, and commits verdicts strictly in enumeration order,
//! quarantining matches as they are committed.

use crate::core::config::{DefaultAction, EngineConfig};
use crate::core::error::{Error, Result};
use crate::core::types::{
    Disposition, FileRecord, Outcome, ScanCounts, ScanReport, SessionState, Verdict,
};
use crate::detection::SignatureStore;
use crate::quarantine::QuarantineManager;
use crate::scanner::file::{EnumeratedEntry, Scanner, TargetWalker};
use crate::scanner::progress::{CancelToken, ProgressTracker, ScanProgress};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// What to do with matched files
    pub action: DefaultAction,
}

impl ScanOptions {
    /// Options taken from the `actions` config section.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            action: config.actions.default_action,
        }
    }

    /// Record matches without moving anything.
    pub fn report_only() -> Self {
        Self {
            action: DefaultAction::ReportOnly,
        }
    }
}

type CandidateQueue = Mutex<VecDeque<(usize, PathBuf)>>;

/// Take the next file to classify off the shared queue.
fn pop_candidate(queue: &CandidateQueue) -> Result<Option<(usize, PathBuf)>> {
    queue
        .lock()
        .map(|mut q| q.pop_front())
        .map_err(|_| Error::lock_poisoned("scan queue"))
}

/// One scan run over one root.
pub struct ScanSession {
    id: String,
    config: Arc<EngineConfig>,
    store: Arc<SignatureStore>,
    quarantine: Option<Arc<QuarantineManager>>,
    state: Mutex<SessionState>,
    cancel: CancelToken,
    progress: Arc<ProgressTracker>,
}

impl ScanSession {
    /// Create a session. Without a quarantine manager, matches are reported only.
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<SignatureStore>,
        quarantine: Option<Arc<QuarantineManager>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            store,
            quarantine,
            state: Mutex::new(SessionState::Idle),
            cancel: CancelToken::new(),
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    /// Create a session whose rules and quarantine store come from `config`.
    ///
    /// Fails if the rules cannot be loaded or the store cannot be opened.
    pub fn from_config(config: Arc<EngineConfig>) -> Result<Self> {
        let store = Arc::new(SignatureStore::from_config(&config.rules)?);
        let quarantine = Arc::new(QuarantineManager::from_config(&config.quarantine)?);
        Ok(Self::new(config, store, Some(quarantine)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A token that cancels this session when triggered.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Report `(processed, total)` after every committed entry.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress
            .set_callback(move |p: &ScanProgress| callback(p.processed, p.total));
    }

    fn set_state(&self, state: SessionState) -> Result<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|_| Error::lock_poisoned("session state"))?;
        *current = state;
        Ok(())
    }

    /// Claim the session for its single run.
    fn begin(&self) -> Result<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|_| Error::lock_poisoned("session state"))?;
        if *current != SessionState::Idle {
            return Err(Error::SessionReused(current.to_string()));
        }
        *current = SessionState::Enumerating;
        Ok(())
    }

    /// Run the session over `root`.
    ///
    /// Per-file problems are recorded in the report. Errors are returned only
    /// when the root cannot be enumerated or a worker dies.
    pub async fn start(&self, root: &Path, options: ScanOptions) -> Result<ScanReport> {
        self.begin()?;
        let started_at = Utc::now();
        log::info!("Scan session {} started on {:?}", self.id, root);

        // Enumerating
        let mut walker = TargetWalker::new(&self.config.scan);
        if let Some(quarantine) = &self.quarantine {
            walker = walker.exclude_dir(quarantine.root());
        }
        let enumeration = {
            let root = root.to_path_buf();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || walker.walk(&root, &cancel))
                .await
                .map_err(|e| Error::Other(anyhow::Error::new(e).context("enumeration task failed")))??
        };
        let total = enumeration.len();
        self.progress.set_total(total as u64);
        log::info!("Found {} entries to scan", total);

        let mut slots: Vec<Option<Verdict>> = Vec::with_capacity(total);
        let mut candidates = VecDeque::new();
        let mut paths = Vec::with_capacity(total);
        for (index, entry) in enumeration.entries.into_iter().enumerate() {
            paths.push(entry.path().to_path_buf());
            match entry {
                EnumeratedEntry::Candidate(path) => {
                    candidates.push_back((index, path));
                    slots.push(None);
                }
                EnumeratedEntry::Decided(verdict) => slots.push(Some(verdict)),
            }
        }

        let mut committed = Vec::with_capacity(total);
        let cancelled = if enumeration.cancelled {
            true
        } else {
            self.set_state(SessionState::Scanning)?;
            self.scan(slots, candidates, options, &mut committed).await?
        };

        if !cancelled {
            self.set_state(SessionState::Finalizing)?;
        }
        let mut verdicts = committed;
        for path in paths.into_iter().skip(verdicts.len()) {
            verdicts.push(Verdict::new(FileRecord::new(path), Outcome::Unscanned));
        }
        let counts = ScanCounts::from_verdicts(&verdicts);
        let state = if cancelled {
            SessionState::Cancelled
        } else {
            SessionState::Complete
        };
        self.set_state(state)?;

        log::info!(
            "Scan session {} {}: {} scanned, {} matched, {} quarantined, {} unreadable, {} unscanned",
            self.id,
            state,
            counts.scanned,
            counts.matched,
            counts.quarantined,
            counts.unreadable,
            counts.unscanned
        );

        Ok(ScanReport {
            session_id: self.id.clone(),
            root: root.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            state,
            verdicts,
            counts,
        })
    }

    /// Classify candidates on worker tasks and commit verdicts in order.
    ///
    /// Returns whether the scan was cancelled.
    async fn scan(
        &self,
        mut slots: Vec<Option<Verdict>>,
        candidates: VecDeque<(usize, PathBuf)>,
        options: ScanOptions,
        committed: &mut Vec<Verdict>,
    ) -> Result<bool> {
        let num_workers = self.config.scan.effective_threads();
        let queue = Arc::new(Mutex::new(candidates));
        let scanner = Arc::new(Scanner::new(
            Arc::clone(&self.store),
            self.config.scan.max_file_size_bytes,
        ));
        let (tx, mut rx) = mpsc::channel::<Result<(usize, Verdict)>>(num_workers);

        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let queue = Arc::clone(&queue);
            let scanner = Arc::clone(&scanner);
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&self.progress);
            let tx = tx.clone();

            handles.push(tokio::task::spawn_blocking(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let (index, path) = match pop_candidate(&queue) {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Scan worker stopping: {}", e);
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                };

                let verdict = scanner.classify(&path);
                if let (Some(size), Outcome::Clean | Outcome::Matched { .. }) =
                    (verdict.record.size, &verdict.outcome)
                {
                    progress.add_bytes(size);
                }
                if tx.blocking_send(Ok((index, verdict))).is_err() {
                    break;
                }
            }));
        }
        // Drop the sender so the channel closes when workers finish
        drop(tx);

        let mut ready: BTreeMap<usize, Verdict> = BTreeMap::new();
        let mut cancelled = false;
        'commit: loop {
            // Commit every verdict that is next in enumeration order.
            while committed.len() < slots.len() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'commit;
                }
                let next = committed.len();
                let verdict = match slots[next].take().or_else(|| ready.remove(&next)) {
                    Some(v) => v,
                    None => break,
                };
                let verdict = self.dispose(verdict, options).await?;
                self.progress.record(&verdict);
                committed.push(verdict);
            }
            if committed.len() == slots.len() {
                break;
            }

            match rx.recv().await {
                Some(Ok((index, verdict))) => {
                    ready.insert(index, verdict);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    cancelled = self.cancel.is_cancelled();
                    break;
                }
            }
        }
        drop(rx);

        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Other(anyhow::Error::new(e).context("scan worker failed")))?;
        }
        if !cancelled && committed.len() < slots.len() {
            return Err(Error::Other(anyhow::anyhow!(
                "scan workers stopped with {} of {} entries committed",
                committed.len(),
                slots.len()
            )));
        }

        if cancelled {
            log::info!("Scan session {} cancelled", self.id);
        }
        Ok(cancelled)
    }

    /// Apply the action policy to a committed verdict.
    async fn dispose(&self, mut verdict: Verdict, options: ScanOptions) -> Result<Verdict> {
        let signature_id = match &verdict.outcome {
            Outcome::Matched {
                signature_id,
                label,
            } => {
                log::info!(
                    "Match: {} ({}) in {:?}",
                    label,
                    signature_id,
                    verdict.record.path
                );
                signature_id.clone()
            }
            _ => return Ok(verdict),
        };

        let quarantine = match (&self.quarantine, options.action) {
            (Some(q), DefaultAction::Quarantine) => Arc::clone(q),
            _ => {
                verdict.disposition = Disposition::ReportOnly;
                return Ok(verdict);
            }
        };
        let Some(signature) = self.store.get(&signature_id).cloned() else {
            verdict.disposition = Disposition::QuarantineFailed {
                reason: format!("unknown signature {}", signature_id),
            };
            return Ok(verdict);
        };

        let path = verdict.record.path.clone();
        let result = tokio::task::spawn_blocking(move || quarantine.isolate(&path, &signature))
            .await
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("quarantine task failed")))?;

        verdict.disposition = match result {
            Ok(entry) => Disposition::Quarantined { entry_id: entry.id },
            Err(e) => {
                if e.is_recoverable() {
                    log::warn!("Failed to quarantine {:?}: {}", verdict.record.path, e);
                } else {
                    log::error!(
                        "Failed to quarantine {:?} ({} error): {}",
                        verdict.record.path,
                        e.category(),
                        e
                    );
                }
                Disposition::QuarantineFailed {
                    reason: e.to_string(),
                }
            }
        };
        Ok(verdict)
    }
}
