//! Offline mutation queue.
//!
//! Remote writes that fail at call time are appended here, persisted to local
//! storage after every change, and replayed in FIFO order by `drain()`. A
//! background task calls `drain()` on a fixed interval for the lifetime of the
//! process. Delivery is best-effort and at-least-once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::{OperationKind, QueuedOperation};
use crate::storage::KeyValueStore;

pub const QUEUE_KEY: &str = "offline_queue";
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// The hosted data store that queued mutations are replayed against.
///
/// Every method fails by returning `Err` on any network or server error; there
/// is no partial success.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(&self, target: &str, record: &Value) -> Result<()>;
    async fn update(&self, target: &str, id: &str, partial_update: &Value) -> Result<()>;
    async fn delete(&self, target: &str, id: &str) -> Result<()>;
    /// Lightweight reachability check.
    async fn is_online(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Storage key holding the serialized queue. Dead letters live under `<key>.dead_letter`.
    pub storage_key: String,
    /// Move an entry to the dead-letter list once it has failed this many times.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Upper bound for each remote call, including the connectivity check.
    pub call_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            storage_key: QUEUE_KEY.to_string(),
            max_attempts: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl QueueOptions {
    fn dead_letter_key(&self) -> String {
        format!("{}.dead_letter", self.storage_key)
    }

    fn corrupt_key(&self) -> String {
        format!("{}.corrupt", self.storage_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed,
    Empty,
    Offline,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub replayed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub remaining: usize,
}

impl DrainReport {
    fn skipped(outcome: DrainOutcome, remaining: usize) -> Self {
        Self {
            outcome,
            replayed: 0,
            failed: 0,
            dead_lettered: 0,
            remaining,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Applied,
    Queued,
}

/// Clears the in-progress flag when a drain pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineQueue {
    storage: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    options: QueueOptions,
    entries: Mutex<Vec<QueuedOperation>>,
    dead_letters: Mutex<Vec<QueuedOperation>>,
    draining: AtomicBool,
}

impl OfflineQueue {
    /// Restore the queue from local storage.
    ///
    /// Unreadable or corrupt state is logged and replaced by an empty queue; a
    /// corrupt blob is copied to `<key>.corrupt` before it can be overwritten.
    #[must_use]
    pub fn load(
        storage: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        options: QueueOptions,
    ) -> Self {
        let entries = read_entries(storage.as_ref(), &options.storage_key, &options.corrupt_key());
        let dead_letters = read_entries(
            storage.as_ref(),
            &options.dead_letter_key(),
            &format!("{}.corrupt", options.dead_letter_key()),
        );

        if !entries.is_empty() {
            tracing::info!(pending = entries.len(), "restored offline queue");
        }

        Self {
            storage,
            remote,
            options,
            entries: Mutex::new(entries),
            dead_letters: Mutex::new(dead_letters),
            draining: AtomicBool::new(false),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dead(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Snapshot of pending entries in replay order.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.entries().clone()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.dead().clone()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Append a mutation and persist the whole queue.
    ///
    /// Never fails: if persisting fails the entry still lives in memory for the
    /// rest of the process.
    pub fn enqueue(&self, kind: OperationKind, target: &str, payload: Value) {
        self.enqueue_operation(QueuedOperation::new(kind, target, payload));
    }

    pub fn enqueue_operation(&self, op: QueuedOperation) {
        tracing::debug!(
            kind = op.kind.as_str(),
            target = %op.target,
            id = %op.id,
            "queueing mutation"
        );
        let mut entries = self.entries();
        entries.push(op);
        self.persist(&self.options.storage_key, &entries);
    }

    /// Apply a mutation now, or queue it if that fails.
    ///
    /// While anything is already pending the mutation goes straight to the back
    /// of the queue so it cannot overtake an earlier write.
    pub async fn submit(&self, op: QueuedOperation) -> SubmitOutcome {
        if !self.is_empty() {
            self.enqueue_operation(op);
            return SubmitOutcome::Queued;
        }

        match self.replay(&op).await {
            Ok(()) => SubmitOutcome::Applied,
            Err(e) => {
                tracing::warn!(
                    kind = op.kind.as_str(),
                    target = %op.target,
                    "remote write failed, queued for retry: {e:#}"
                );
                self.enqueue_operation(op);
                SubmitOutcome::Queued
            }
        }
    }

    /// Replay every pending entry once, in order.
    ///
    /// Successful entries are removed. Failed entries stay in place with their
    /// attempt count bumped and do not stop later entries from being tried.
    /// Entries enqueued while the pass runs stay behind the ones it attempted.
    pub async fn drain(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in progress, skipping");
            return DrainReport::skipped(DrainOutcome::AlreadyRunning, self.len());
        }
        let _guard = DrainGuard(&self.draining);

        let snapshot = self.pending();
        if snapshot.is_empty() {
            return DrainReport::skipped(DrainOutcome::Empty, 0);
        }

        let online = tokio::time::timeout(self.options.call_timeout, self.remote.is_online())
            .await
            .unwrap_or(false);
        if !online {
            tracing::debug!(pending = snapshot.len(), "offline, leaving queue untouched");
            return DrainReport::skipped(DrainOutcome::Offline, snapshot.len());
        }

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut failed: HashMap<String, u32> = HashMap::new();
        for op in &snapshot {
            match self.replay(op).await {
                Ok(()) => {
                    tracing::debug!(kind = op.kind.as_str(), target = %op.target, "replayed");
                    succeeded.insert(op.id.clone());
                }
                Err(e) => {
                    let attempts = op.attempts.saturating_add(1);
                    tracing::warn!(
                        kind = op.kind.as_str(),
                        target = %op.target,
                        attempts,
                        "replay failed: {e:#}"
                    );
                    failed.insert(op.id.clone(), attempts);
                }
            }
        }

        let (dead_lettered, remaining) = self.settle(&succeeded, &failed);

        let report = DrainReport {
            outcome: DrainOutcome::Completed,
            replayed: succeeded.len(),
            failed: failed.len() - dead_lettered,
            dead_lettered,
            remaining,
        };
        tracing::info!(
            replayed = report.replayed,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            remaining = report.remaining,
            "drain pass finished"
        );
        report
    }

    /// Fold the results of a pass back into the live queue and persist it.
    ///
    /// Entries are matched by id so anything appended or cleared during the
    /// pass is left as it is.
    fn settle(&self, succeeded: &HashSet<String>, failed: &HashMap<String, u32>) -> (usize, usize) {
        let mut newly_dead = Vec::new();
        let mut entries = self.entries();

        let mut kept = Vec::with_capacity(entries.len());
        for mut op in entries.drain(..) {
            if succeeded.contains(&op.id) {
                continue;
            }
            if let Some(&attempts) = failed.get(&op.id) {
                op.attempts = attempts;
                if self
                    .options
                    .max_attempts
                    .is_some_and(|max| attempts >= max)
                {
                    tracing::error!(
                        kind = op.kind.as_str(),
                        target = %op.target,
                        attempts,
                        "giving up on mutation, moved to dead letters"
                    );
                    newly_dead.push(op);
                    continue;
                }
            }
            kept.push(op);
        }
        *entries = kept;
        self.persist(&self.options.storage_key, &entries);
        let remaining = entries.len();
        drop(entries);

        let dead_count = newly_dead.len();
        if dead_count > 0 {
            let mut dead = self.dead();
            dead.extend(newly_dead);
            self.persist(&self.options.dead_letter_key(), &dead);
        }

        (dead_count, remaining)
    }

    /// Discard every pending entry and dead letter. Not reversible.
    pub fn clear(&self) {
        let mut entries = self.entries();
        let mut dead = self.dead();
        let dropped = entries.len() + dead.len();
        entries.clear();
        dead.clear();

        let dead_key = self.options.dead_letter_key();
        if let Err(e) = self
            .storage
            .multi_remove(&[self.options.storage_key.as_str(), dead_key.as_str()])
        {
            tracing::warn!("failed to clear persisted queue: {e:#}");
        }
        tracing::info!(dropped, "offline queue cleared");
    }

    /// Spawn the fixed-interval drain loop. The first pass runs immediately.
    pub fn spawn_drain_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                queue.drain().await;
            }
        })
    }

    async fn replay(&self, op: &QueuedOperation) -> Result<()> {
        tokio::time::timeout(self.options.call_timeout, self.dispatch(op))
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.options.call_timeout))?
    }

    async fn dispatch(&self, op: &QueuedOperation) -> Result<()> {
        match op.kind {
            OperationKind::Insert => self.remote.insert(&op.target, &op.payload).await,
            OperationKind::Update => {
                let id = op.record_id()?;
                let patch = op.partial_update()?;
                self.remote.update(&op.target, &id, patch).await
            }
            OperationKind::Delete => {
                let id = op.record_id()?;
                self.remote.delete(&op.target, &id).await
            }
        }
    }

    fn persist(&self, key: &str, entries: &[QueuedOperation]) {
        let result = serde_json::to_string(entries)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.set(key, &json));
        if let Err(e) = result {
            tracing::warn!(key, "failed to persist offline queue, keeping it in memory: {e:#}");
        }
    }
}

fn read_entries(storage: &dyn KeyValueStore, key: &str, corrupt_key: &str) -> Vec<QueuedOperation> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(key, "failed to read persisted queue: {e:#}");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<QueuedOperation>>(&raw) {
        Ok(mut entries) => {
            // Entries written without an id still need one to be settled after a pass.
            for op in &mut entries {
                if op.id.is_empty() {
                    op.id = uuid::Uuid::new_v4().to_string();
                }
            }
            entries
        }
        Err(e) => {
            tracing::error!(key, "persisted queue is corrupt, starting empty: {e}");
            if let Err(e) = storage.set(corrupt_key, &raw) {
                tracing::warn!(key = corrupt_key, "failed to back up corrupt queue: {e:#}");
            }
            Vec::new()
        }
    }
}
