//! Drains the offline queues against the backend.
//!
//! A pass snapshots all three queues, then drains the kinds concurrently.
//! Within a kind items are submitted one at a time, oldest first. A
//! successful item is removed through the [`OfflineQueue`]; a failed item
//! stays queued and is retried on a later pass. Only one pass runs at a time.

use crate::config::SyncConfig;
use crate::services::connectivity::ConnectivityMonitor;
use crate::services::remote::{FileStorage, RemoteData};
use crate::services::retry_policy::{RetryLedger, RetryPolicy, StalledItem};
use crate::services::submission::{self, Deadlines, SyncItemError};
use chrono::{DateTime, Utc};
use offline_queue::{
    decode, OfflineQueue, PendingCheckIn, PendingItem, PendingPhoto, PendingReport, QueueKind,
};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;

const MAX_HISTORY: usize = 500;

/// What started a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Manual,
    Startup,
}

impl SyncTrigger {
    /// Automatic passes respect the retry backoff, manual ones do not
    pub fn is_automatic(&self) -> bool {
        !matches!(self, SyncTrigger::Manual)
    }
}

/// Per-kind result of a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindOutcome {
    pub success: usize,
    pub fail: usize,
    /// Left queued without an attempt (offline or backing off)
    pub skipped: usize,
}

/// Consolidated result of one sync pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub photos: KindOutcome,
    pub check_ins: KindOutcome,
    pub reports: KindOutcome,
    /// Items that reached the retry limit and need manual attention
    pub stalled: Vec<StalledItem>,
}

impl SyncOutcome {
    pub fn get(&self, kind: QueueKind) -> KindOutcome {
        match kind {
            QueueKind::Photos => self.photos,
            QueueKind::CheckIns => self.check_ins,
            QueueKind::Reports => self.reports,
        }
    }

    pub fn success(&self) -> usize {
        self.photos.success + self.check_ins.success + self.reports.success
    }

    pub fn fail(&self) -> usize {
        self.photos.fail + self.check_ins.fail + self.reports.fail
    }

    pub fn skipped(&self) -> usize {
        self.photos.skipped + self.check_ins.skipped + self.reports.skipped
    }

    /// Human-readable summary lines for a notification
    pub fn messages(&self) -> Vec<String> {
        let mut messages = Vec::new();

        let synced: Vec<String> = [
            (self.photos.success, "photo", "photos"),
            (self.check_ins.success, "check-in", "check-ins"),
            (self.reports.success, "report", "reports"),
        ]
        .into_iter()
        .filter(|(count, _, _)| *count > 0)
        .map(|(count, one, many)| format!("{} {}", count, if count == 1 { one } else { many }))
        .collect();

        if !synced.is_empty() {
            messages.push(format!("Synced: {}", synced.join(", ")));
        }

        match self.fail() {
            0 => {}
            1 => messages.push("1 item failed to sync".to_string()),
            n => messages.push(format!("{} items failed to sync", n)),
        }

        match self.skipped() {
            0 => {}
            1 => messages.push("1 item waiting for connection".to_string()),
            n => messages.push(format!("{} items waiting for connection", n)),
        }

        if !self.stalled.is_empty() {
            messages.push(format!(
                "{} items keep failing, export them to keep a copy",
                self.stalled.len()
            ));
        }
        messages
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub syncing: bool,
    pub last_outcome: Option<SyncOutcome>,
}

/// Resets the in-progress flag however the pass ends
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct SyncOrchestrator {
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteData>,
    storage: Arc<dyn FileStorage>,
    connectivity: ConnectivityMonitor,
    deadlines: Deadlines,
    policy: RetryPolicy,
    ledger: Mutex<RetryLedger>,
    syncing: AtomicBool,
    history: Mutex<Vec<SyncOutcome>>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteData>,
        storage: Arc<dyn FileStorage>,
        connectivity: ConnectivityMonitor,
        config: &SyncConfig,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(SyncStatus::default());
        Self {
            queue,
            remote,
            storage,
            connectivity,
            deadlines: Deadlines {
                upload: config.upload_timeout(),
                record: config.record_timeout(),
            },
            policy: config.retry.clone(),
            ledger: Mutex::new(RetryLedger::new()),
            syncing: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
            status_tx,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        self.status_tx.borrow().last_outcome.clone()
    }

    /// Outcomes of the passes since startup, oldest first
    pub fn history(&self) -> Vec<SyncOutcome> {
        lock(&self.history).clone()
    }

    pub fn stalled(&self) -> Vec<StalledItem> {
        lock(&self.ledger).stalled(&self.policy)
    }

    /// Manual "sync now"; ignores the retry backoff
    pub async fn sync_now(&self) -> Option<SyncOutcome> {
        self.run_pass(SyncTrigger::Manual).await
    }

    /// Runs a startup pass if there is work, then a pass on every
    /// connectivity restore until the monitor goes away.
    pub async fn run(&self) {
        let mut restored = self.connectivity.subscribe();

        if self.connectivity.is_online() && self.queue.has_pending() {
            self.run_pass(SyncTrigger::Startup).await;
        }

        while restored.next_restored().await.is_some() {
            self.run_pass(SyncTrigger::ConnectivityRestored).await;
        }
        log::debug!("Connectivity monitor closed, sync loop ends");
    }

    /// Runs one pass. Returns `None` when another pass is already running
    /// or an automatic trigger finds nothing to do.
    pub async fn run_pass(&self, trigger: SyncTrigger) -> Option<SyncOutcome> {
        if trigger.is_automatic() && !self.queue.has_pending() {
            log::debug!("Sync trigger {:?} ignored, nothing pending", trigger);
            return None;
        }

        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("Sync already in progress, {:?} trigger suppressed", trigger);
            return None;
        }
        let _guard = PassGuard {
            flag: &self.syncing,
        };
        self.status_tx.send_modify(|status| status.syncing = true);

        let started_at = Utc::now();
        let photos = self.queue.photos();
        let check_ins = self.queue.check_ins();
        let reports = self.queue.reports();
        log::info!(
            "Sync pass ({:?}) started: {} photos, {} check-ins, {} reports",
            trigger,
            photos.len(),
            check_ins.len(),
            reports.len()
        );

        {
            let queued: Vec<&str> = photos
                .iter()
                .map(|p| p.id.as_str())
                .chain(check_ins.iter().map(|c| c.id.as_str()))
                .chain(reports.iter().map(|r| r.id.as_str()))
                .collect();
            lock(&self.ledger).retain_ids(|id| queued.contains(&id));
        }

        let (photos, check_ins, reports) = tokio::join!(
            self.drain(trigger, photos, |photo| self.sync_photo(photo)),
            self.drain(trigger, check_ins, |item| self.sync_check_in(item)),
            self.drain(trigger, reports, |item| self.sync_report(item)),
        );

        let outcome = SyncOutcome {
            trigger,
            started_at,
            finished_at: Utc::now(),
            photos,
            check_ins,
            reports,
            stalled: self.stalled(),
        };

        log::info!(
            "Sync pass finished: {} synced, {} failed, {} skipped",
            outcome.success(),
            outcome.fail(),
            outcome.skipped()
        );
        for item in &outcome.stalled {
            log::warn!(
                "{} stalled after {} failures: {}",
                item.id,
                item.failures,
                item.last_error
            );
        }

        self.append_history(outcome.clone());
        self.status_tx.send_replace(SyncStatus {
            syncing: false,
            last_outcome: Some(outcome.clone()),
        });
        Some(outcome)
    }

    async fn drain<T, F, Fut>(&self, trigger: SyncTrigger, items: Vec<T>, submit: F) -> KindOutcome
    where
        T: PendingItem,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), SyncItemError>>,
    {
        let mut outcome = KindOutcome::default();

        for item in items {
            let id = item.id().to_string();

            if !self.connectivity.is_online() {
                log::debug!("Offline, leaving {} queued", id);
                outcome.skipped += 1;
                continue;
            }

            if trigger.is_automatic() && !lock(&self.ledger).is_due(&id, Instant::now()) {
                log::debug!("Backing off {}", id);
                outcome.skipped += 1;
                continue;
            }

            match submit(item).await {
                Ok(()) => {
                    lock(&self.ledger).record_success(&id);
                    outcome.success += 1;
                    if let Err(e) = self.queue.remove::<T>(&id) {
                        log::error!(
                            "{} was submitted but could not be removed, it will be sent again: {}",
                            id,
                            e
                        );
                    }
                }
                Err(e) if e.is_offline() => {
                    log::info!("Backend unreachable, leaving {} queued", id);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    outcome.fail += 1;
                    let failures =
                        lock(&self.ledger).record_failure(&id, &e.to_string(), &self.policy, Instant::now());
                    if self.policy.is_exhausted(failures) {
                        log::error!("{} failed {} times and is stalled: {}", id, failures, e);
                    } else {
                        log::warn!("Failed to sync {} (attempt {}): {}", id, failures, e);
                    }
                }
            }
        }

        log::debug!(
            "{} drained: {} ok, {} failed, {} skipped",
            T::KIND,
            outcome.success,
            outcome.fail,
            outcome.skipped
        );
        outcome
    }

    async fn sync_photo(&self, photo: PendingPhoto) -> Result<(), SyncItemError> {
        let decoded = decode(&photo)?;
        submission::submit_photo(
            self.remote.as_ref(),
            self.storage.as_ref(),
            decoded,
            &photo.metadata,
            self.deadlines,
        )
        .await?;
        Ok(())
    }

    async fn sync_check_in(&self, item: PendingCheckIn) -> Result<(), SyncItemError> {
        submission::submit_check_in(self.remote.as_ref(), &item.data, self.deadlines).await
    }

    async fn sync_report(&self, item: PendingReport) -> Result<(), SyncItemError> {
        submission::submit_report(self.remote.as_ref(), &item.data, self.deadlines).await
    }

    fn append_history(&self, outcome: SyncOutcome) {
        let mut history = lock(&self.history);
        history.push(outcome);
        let len = history.len();
        if len > MAX_HISTORY {
            history.drain(0..len - MAX_HISTORY);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
