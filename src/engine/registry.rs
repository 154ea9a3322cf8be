//! Tier registry: which model tiers are currently loaded.
//! Load state per tier lives behind a watch channel so concurrent callers
//! can await readiness instead of busy-polling. Startup loading applies a
//! bounded retry policy: timeouts back off and retry, anything else fails
//! the tier immediately.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::watch;
use tracing::{info, warn};

use super::{EngineError, LoadState};
use crate::config::{RetryPolicy, TierConfig};
use crate::task::TierName;

struct TierSlot {
    config: TierConfig,
    tx: watch::Sender<LoadState>,
    // Kept so the channel survives with zero external subscribers.
    _rx: watch::Receiver<LoadState>,
}

/// Immutable tier table plus mutable per-tier load state.
pub struct TierRegistry {
    slots: HashMap<TierName, TierSlot>,
}

impl TierRegistry {
    pub fn new(tiers: &[TierConfig]) -> Self {
        let slots = tiers
            .iter()
            .map(|config| {
                let (tx, rx) = watch::channel(LoadState::Unloaded);
                (
                    config.name,
                    TierSlot {
                        config: config.clone(),
                        tx,
                        _rx: rx,
                    },
                )
            })
            .collect();
        Self { slots }
    }

    pub fn config(&self, tier: TierName) -> Option<&TierConfig> {
        self.slots.get(&tier).map(|slot| &slot.config)
    }

    pub fn state(&self, tier: TierName) -> LoadState {
        self.slots
            .get(&tier)
            .map(|slot| *slot.tx.borrow())
            .unwrap_or(LoadState::Unloaded)
    }

    pub fn is_loaded(&self, tier: TierName) -> bool {
        self.state(tier) == LoadState::Ready
    }

    /// Tiers currently serving traffic, most expensive first.
    pub fn tiers_loaded(&self) -> Vec<TierName> {
        TierName::CASCADE
            .into_iter()
            .filter(|&tier| self.is_loaded(tier))
            .collect()
    }

    pub fn any_loaded(&self) -> bool {
        self.slots
            .values()
            .any(|slot| *slot.tx.borrow() == LoadState::Ready)
    }

    pub fn mark(&self, tier: TierName, state: LoadState) {
        if let Some(slot) = self.slots.get(&tier) {
            slot.tx.send_replace(state);
        }
    }

    /// Await a terminal load state for the tier. Returns true once Ready,
    /// false on Failed or if the tier is not configured.
    pub async fn wait_ready(&self, tier: TierName) -> bool {
        let Some(slot) = self.slots.get(&tier) else {
            return false;
        };
        let mut rx = slot.tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                LoadState::Ready => return true,
                LoadState::Failed => return false,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Load every configured tier through `load`, applying the bounded
    /// retry policy per tier. Runs once at startup, outside the hot path.
    pub async fn load_all<F, Fut>(&self, retry: &RetryPolicy, load: F)
    where
        F: Fn(TierConfig) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        for slot in self.slots.values() {
            let tier = slot.config.name;
            self.mark(tier, LoadState::Loading);

            let mut attempt: u32 = 1;
            loop {
                match load(slot.config.clone()).await {
                    Ok(()) => {
                        info!(%tier, attempt, "tier loaded");
                        self.mark(tier, LoadState::Ready);
                        break;
                    }
                    Err(EngineError::Timeout) if attempt < retry.max_attempts => {
                        let backoff = retry.backoff(attempt);
                        warn!(
                            %tier,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "tier load timed out, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(%tier, attempt, error = %e, "tier load failed");
                        self.mark(tier, LoadState::Failed);
                        break;
                    }
                }
            }
        }
    }
}
