use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Capped exponential backoff for items that keep failing to sync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Failures after which an item counts as stalled (0 = never)
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            max_delay_secs: 600,
            max_attempts: 8,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next automatic attempt after `failures` failures.
    /// 30s, 60s, 120s, ... capped at `max_delay_secs`. With jitter the
    /// result lies between half and the full delay.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(16);
        let delay = self
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_secs);

        if !self.jitter || delay < 2 {
            return Duration::from_secs(delay);
        }
        let half = delay / 2;
        Duration::from_secs(half + rand::rng().random_range(0..=delay - half))
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// An item that reached the retry limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalledItem {
    pub id: String,
    pub failures: u32,
    pub last_error: String,
}

#[derive(Debug, Clone)]
struct RetryEntry {
    failures: u32,
    next_attempt_at: Instant,
    last_error: String,
}

/// In-memory failure bookkeeping per queued item id. Lost on restart.
#[derive(Debug, Default)]
pub struct RetryLedger {
    entries: HashMap<String, RetryEntry>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and returns the failure count
    pub fn record_failure(
        &mut self,
        id: &str,
        error: &str,
        policy: &RetryPolicy,
        now: Instant,
    ) -> u32 {
        let entry = self.entries.entry(id.to_string()).or_insert(RetryEntry {
            failures: 0,
            next_attempt_at: now,
            last_error: String::new(),
        });
        entry.failures += 1;
        let delay = policy.delay_for(entry.failures);
        entry.next_attempt_at = now.checked_add(delay).unwrap_or_else(|| {
            log::warn!("Retry delay {:?} for {} is out of range, retrying next pass", delay, id);
            now
        });
        entry.last_error = error.to_string();
        entry.failures
    }

    pub fn record_success(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Whether an automatic pass may attempt the item
    pub fn is_due(&self, id: &str, now: Instant) -> bool {
        self.entries
            .get(id)
            .map_or(true, |entry| entry.next_attempt_at <= now)
    }

    /// Drops entries for ids that are no longer queued
    pub fn retain_ids<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.entries.retain(|id, _| keep(id));
    }

    /// Items whose failures reached the policy's limit, sorted by id
    pub fn stalled(&self, policy: &RetryPolicy) -> Vec<StalledItem> {
        let mut items: Vec<StalledItem> = self
            .entries
            .iter()
            .filter(|(_, entry)| policy.is_exhausted(entry.failures))
            .map(|(id, entry)| StalledItem {
                id: id.clone(),
                failures: entry.failures,
                last_error: entry.last_error.clone(),
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}
