//! Connectivity state shared between the probe, the field actions and the
//! sync orchestrator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectivityState {
    online: bool,
    /// Number of offline -> online transitions so far
    restored: u64,
}

/// Boolean online state plus a stream of "connectivity restored" events
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState {
            online,
            restored: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    /// Updates the state. Returns true when this call restored connectivity.
    pub fn set_online(&self, online: bool) -> bool {
        let mut restored = false;
        self.tx.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.restored += 1;
                restored = true;
            }
            true
        });

        if restored {
            log::info!("Connectivity restored");
        } else if !online {
            log::debug!("Connectivity state: offline");
        }
        restored
    }

    /// Subscribe to restore events. Dropping the subscription releases it.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let rx = self.tx.subscribe();
        let seen = rx.borrow().restored;
        ConnectivitySubscription { rx, seen }
    }
}

/// Handle on the offline -> online transition stream
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: watch::Receiver<ConnectivityState>,
    seen: u64,
}

impl ConnectivitySubscription {
    /// Waits for the next offline -> online transition.
    /// Returns `None` once the monitor is gone.
    pub async fn next_restored(&mut self) -> Option<()> {
        loop {
            let restored = self.rx.borrow_and_update().restored;
            if restored > self.seen {
                self.seen = restored;
                return Some(());
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        log::debug!("Connectivity subscription released");
    }
}

/// Periodically runs `probe` and feeds the result into `monitor`
pub async fn run_probe<F, Fut>(monitor: ConnectivityMonitor, interval: Duration, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let online = probe().await;
        monitor.set_online(online);
    }
}
