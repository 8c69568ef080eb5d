//! Online/offline signal. The upstream health probe feeds it unless an
//! operator has pinned the state through the local API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::remote::ClubApiClient;

const AUTO: u8 = 0;
const FORCED_OFFLINE: u8 = 1;
const FORCED_ONLINE: u8 = 2;

#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
    pinned: Arc<AtomicU8>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self {
            tx: Arc::new(tx),
            pinned: Arc::new(AtomicU8::new(AUTO)),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Pin the state (`Some`) or hand control back to the probe (`None`).
    pub fn set_override(&self, online: Option<bool>) {
        let mode = match online {
            None => AUTO,
            Some(false) => FORCED_OFFLINE,
            Some(true) => FORCED_ONLINE,
        };
        self.pinned.store(mode, Ordering::Release);

        if let Some(online) = online {
            self.publish(online);
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire) != AUTO
    }

    /// Record a probe result. Ignored while the state is pinned.
    pub fn report_probe(&self, reachable: bool) {
        if self.is_pinned() {
            return;
        }
        self.publish(reachable);
    }

    fn publish(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost, mutations will be queued");
            }
        }
    }
}

pub async fn run_probe(
    connectivity: Connectivity,
    client: Arc<ClubApiClient>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connectivity.is_pinned() {
                    continue;
                }
                let reachable = client.health().await;
                connectivity.report_probe(reachable);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Connectivity probe stopped");
}
