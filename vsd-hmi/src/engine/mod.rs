//! The telemetry acquisition and resilience engine: connection lifecycle,
//! the two polling schedulers, the failure watchdog, and the chart buffers.
//!
//! All engine state lives inside one supervisor task; the [`Engine`] handle
//! sends it commands and the UI collaborator observes it through the
//! broadcast [`Event`] stream.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use vsd_gateway::{PortInfo, TransportConfig};

use crate::catalog::TagCatalog;
use crate::gateway::GatewayHandle;
use crate::Error;

pub mod chart;
pub mod connection;
pub mod export;
pub mod refresh;
pub mod watchdog;

pub use chart::{Axis, SeriesBuffer};
pub use connection::ConnectionState;
pub use watchdog::Watchdog;

use connection::{Command, Responder, Supervisor};

/// Notifications for the UI collaborator.
#[derive(Clone, Debug)]
pub enum Event {
    /// Every connection-state transition, for the connectivity indicator.
    StateChanged(ConnectionState),

    /// Involuntary loss of link (watchdog escalation), distinct from the
    /// state change a user-initiated stop also produces.
    ConnectionLost,

    /// A freshly read value for one on-screen tag.
    TagUpdated { tag: String, value: f64 },

    /// Result of the one-shot read performed after a successful connect.
    FirmwareVersion { version: u32, release: u32 },
}

/// The tags the UI currently displays, updated by the rendering collaborator
/// whenever the visible view changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterestSet {
    pub tags: HashSet<String>,

    /// The operator view always polls the gauge keys (target frequency,
    /// maximum speed) on top of whatever is individually visible.
    pub operator_view: bool,
}

impl InterestSet {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && !self.operator_view
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Screen-refresh cadence.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Default chart sampling cadence; adjustable while no variables are
    /// selected.
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Points of history kept per charted variable.
    pub history: usize,

    /// Tag names assigned to the right axis when added to the chart.
    pub right_axis: HashSet<String>,

    pub catalog: TagCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            refresh_interval: Duration::from_secs(2),
            sampling_interval: Duration::from_secs(1),
            history: 60,
            right_axis: HashSet::new(),
            catalog: TagCatalog::vsd_default(),
        }
    }
}

/// Handle to the engine. Cheap to clone; all methods funnel into the
/// supervisor task, which owns every piece of mutable state.
#[derive(Clone, Debug)]
pub struct Engine {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

/// Spawn the supervisor and return its handle.
pub fn run(gateway: GatewayHandle, config: EngineConfig) -> Engine {
    let (tx, rx) = mpsc::channel(32);
    let (events, _) = broadcast::channel(64);

    let supervisor = Supervisor::new(gateway, config, events.clone(), tx.clone(), rx);
    tokio::spawn(supervisor.run());

    Engine { tx, events }
}

impl Engine {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> crate::Result<ConnectionState> {
        self.command(Command::State).await
    }

    /// Available transport endpoints, for the configuration collaborator.
    pub async fn ports(&self) -> crate::Result<Vec<PortInfo>> {
        self.command(Command::Ports).await
    }

    /// Validates the config locally, then opens the connection. On success
    /// the refresh scheduler starts and the firmware version is read.
    pub async fn connect(&self, config: TransportConfig) -> crate::Result<()> {
        self.command(|r| Command::Connect(config, r)).await
    }

    /// User-initiated stop. Valid from Connected or Failed.
    pub async fn disconnect(&self) -> crate::Result<()> {
        self.command(Command::Disconnect).await
    }

    /// Write a value to the register behind `tag`.
    pub async fn write(&self, tag: &str, value: f64) -> crate::Result<f64> {
        let tag = tag.to_owned();
        self.command(|responder| Command::Write {
            tag,
            value,
            responder,
        })
        .await
    }

    /// Replace the set of tags the refresh scheduler polls.
    pub async fn set_interest(&self, interest: InterestSet) -> crate::Result<()> {
        self.command(|r| Command::SetInterest(interest, r)).await
    }

    pub async fn add_variable(&self, tag: &str) -> crate::Result<()> {
        self.command(|r| Command::AddVariable(tag.to_owned(), r)).await
    }

    pub async fn remove_variable(&self, tag: &str) -> crate::Result<()> {
        self.command(|r| Command::RemoveVariable(tag.to_owned(), r))
            .await
    }

    pub async fn clear_variables(&self) -> crate::Result<()> {
        self.command(Command::ClearVariables).await
    }

    pub async fn swap_axis(&self, tag: &str) -> crate::Result<()> {
        self.command(|r| Command::SwapAxis(tag.to_owned(), r)).await
    }

    /// Only permitted while no variables are selected; takes effect on the
    /// next `start_chart`.
    pub async fn set_sampling_interval(&self, interval: Duration) -> crate::Result<()> {
        self.command(|r| Command::SetSamplingInterval(interval, r))
            .await
    }

    pub async fn start_chart(&self) -> crate::Result<()> {
        self.command(Command::StartChart).await
    }

    /// Stops sampling; buffered data is kept.
    pub async fn stop_chart(&self) -> crate::Result<()> {
        self.command(Command::StopChart).await
    }

    /// Snapshot of the current buffers as CSV text.
    pub async fn export_csv(&self) -> crate::Result<String> {
        self.command(Command::ExportCsv).await
    }

    async fn command<T>(
        &self,
        make: impl FnOnce(Responder<T>) -> Command,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| Error::SendError)?;
        rx.await.map_err(|_| Error::RecvError)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_parses_humantime_durations() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "refresh_interval": "2s",
                "sampling_interval": "500ms",
                "history": 120,
                "right_axis": ["intake_pressure"],
                "catalog": [{"name": "temperature", "key": "vsd_temperature", "unit": "°C"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.refresh_interval, Duration::from_secs(2));
        assert_eq!(config.sampling_interval, Duration::from_millis(500));
        assert_eq!(config.history, 120);
        assert!(config.right_axis.contains("intake_pressure"));
        assert_eq!(config.catalog.key_for("temperature"), Some("vsd_temperature"));
    }

    #[test]
    fn engine_config_defaults_match_the_source_cadences() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(2));
        assert_eq!(config.sampling_interval, Duration::from_secs(1));
        assert_eq!(config.history, 60);
        assert!(!config.catalog.is_empty());
    }

    #[test]
    fn interest_set_with_only_the_operator_view_is_not_empty() {
        let mut interest = InterestSet::default();
        assert!(interest.is_empty());

        interest.operator_view = true;
        assert!(!interest.is_empty());
    }
}
