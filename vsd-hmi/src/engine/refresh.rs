//! Screen-refresh polling: a periodic batch read of whatever tags the UI
//! collaborator currently declares interest in.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use vsd_gateway::BatchValues;

use crate::catalog::TagCatalog;
use crate::engine::connection::Command;
use crate::engine::watchdog::Watchdog;
use crate::engine::{Event, InterestSet};
use crate::gateway::GatewayHandle;
use crate::shutdown::Shutdown;

/// Backend keys a gauge widget on the operator view depends on, read on
/// every tick while that view is active even when no element shows them.
pub(crate) const OPERATOR_KEYS: [&str; 2] = ["vsd_target_freq", "vsd_max_speed"];

/// Runs only while connected: spawned on a successful connect, stopped by
/// any teardown. One request is in flight at a time; a stop cancels the
/// in-flight read so its result is never applied.
pub(crate) struct RefreshScheduler {
    pub gateway: GatewayHandle,
    pub catalog: TagCatalog,
    pub interest: watch::Receiver<InterestSet>,
    pub watchdog: Watchdog,
    pub events: broadcast::Sender<Event>,
    pub supervisor: mpsc::Sender<Command>,
    pub interval: Duration,
}

impl RefreshScheduler {
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let interest = self.interest.borrow().clone();
                    if interest.is_empty() {
                        // Nothing on screen; no request this tick.
                        continue;
                    }

                    let keys = self.poll_keys(&interest);
                    if keys.is_empty() {
                        // The interest names nothing the catalog knows.
                        continue;
                    }

                    tokio::select! {
                        result = self.gateway.read_batch(keys) => self.apply(result).await,
                        _ = shutdown.recv() => return,
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Backend keys for the current interest set.
    fn poll_keys(&self, interest: &InterestSet) -> Vec<String> {
        let mut keys: Vec<String> = interest
            .tags
            .iter()
            .filter_map(|name| self.catalog.key_for(name))
            .map(str::to_owned)
            .collect();

        if interest.operator_view {
            for key in OPERATOR_KEYS {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_owned());
                }
            }
        }

        keys
    }

    async fn apply(&self, result: crate::Result<BatchValues>) {
        match result {
            Ok(values) => {
                self.watchdog.record_success();
                for (key, value) in values {
                    // Null means the backend could not read the register on
                    // this pass; the tag keeps its previous rendering.
                    let Some(value) = value else { continue };
                    if let Some(tag) = self.catalog.name_for_key(&key) {
                        let _ = self.events.send(Event::TagUpdated {
                            tag: tag.to_owned(),
                            value,
                        });
                    }
                }
            }
            Err(error) => {
                debug!(%error, "refresh read failed");
                if self.watchdog.record_failure() {
                    let _ = self.supervisor.send(Command::ForceDisconnect).await;
                }
            }
        }
    }
}
