//! The supervisor task: owns the connection state, the watchdog, the chart
//! state and the scheduler handles. Everything mutable lives here, so all
//! mutation is serialised through one command loop.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

use vsd_gateway::{PortInfo, TransportConfig};

use crate::engine::chart::{Axis, ChartSampler, ChartState, Sample};
use crate::engine::refresh::RefreshScheduler;
use crate::engine::watchdog::Watchdog;
use crate::engine::{export, Event, EngineConfig, InterestSet};
use crate::gateway::GatewayHandle;
use crate::shutdown::TaskHandle;
use crate::Error;

/// Backend keys for the one-shot firmware read performed after connect.
const FW_VERSION_KEY: &str = "fw_ver_code";
const FW_RELEASE_KEY: &str = "fw_rel_code";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

pub(crate) type Responder<T> = oneshot::Sender<crate::Result<T>>;

#[derive(Debug)]
pub(crate) enum Command {
    Connect(TransportConfig, Responder<()>),
    Disconnect(Responder<()>),
    /// Watchdog escalation; same teardown as a disconnect, but reported to
    /// the collaborator as an involuntary loss of link.
    ForceDisconnect,
    State(Responder<ConnectionState>),
    Ports(Responder<Vec<PortInfo>>),
    Write {
        tag: String,
        value: f64,
        responder: Responder<f64>,
    },
    SetInterest(InterestSet, Responder<()>),
    AddVariable(String, Responder<()>),
    RemoveVariable(String, Responder<()>),
    ClearVariables(Responder<()>),
    SwapAxis(String, Responder<()>),
    SetSamplingInterval(std::time::Duration, Responder<()>),
    StartChart(Responder<()>),
    StopChart(Responder<()>),
    ExportCsv(Responder<String>),
    ChartSample(Sample),
}

pub(crate) struct Supervisor {
    gateway: GatewayHandle,
    config: EngineConfig,
    state: ConnectionState,
    watchdog: Watchdog,
    chart: ChartState,
    interest: watch::Sender<InterestSet>,
    selected_keys: watch::Sender<Vec<String>>,
    refresh: Option<TaskHandle>,
    sampler: Option<TaskHandle>,
    events: broadcast::Sender<Event>,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
}

impl Supervisor {
    pub fn new(
        gateway: GatewayHandle,
        config: EngineConfig,
        events: broadcast::Sender<Event>,
        tx: mpsc::Sender<Command>,
        rx: mpsc::Receiver<Command>,
    ) -> Self {
        let chart = ChartState::new(config.history, config.sampling_interval);
        let (interest, _) = watch::channel(InterestSet::default());
        let (selected_keys, _) = watch::channel(Vec::new());

        Supervisor {
            gateway,
            config,
            state: ConnectionState::Disconnected,
            watchdog: Watchdog::new(),
            chart,
            interest,
            selected_keys,
            refresh: None,
            sampler: None,
            events,
            tx,
            rx,
        }
    }

    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect(config, responder) => {
                let result = self.connect(config).await;
                let _ = responder.send(result);
            }
            Command::Disconnect(responder) => {
                let result = self.disconnect().await;
                let _ = responder.send(result);
            }
            Command::ForceDisconnect => self.force_disconnect().await,
            Command::State(responder) => {
                let _ = responder.send(Ok(self.state));
            }
            Command::Ports(responder) => {
                let _ = responder.send(self.gateway.ports().await);
            }
            Command::Write {
                tag,
                value,
                responder,
            } => {
                let result = self.write(&tag, value).await;
                let _ = responder.send(result);
            }
            Command::SetInterest(interest, responder) => {
                self.interest.send_replace(interest);
                let _ = responder.send(Ok(()));
            }
            Command::AddVariable(name, responder) => {
                let _ = responder.send(self.add_variable(&name));
            }
            Command::RemoveVariable(name, responder) => {
                self.chart.remove_variable(&name);
                self.publish_selection();
                let _ = responder.send(Ok(()));
            }
            Command::ClearVariables(responder) => {
                self.chart.clear();
                self.publish_selection();
                let _ = responder.send(Ok(()));
            }
            Command::SwapAxis(name, responder) => {
                let _ = responder.send(self.chart.swap_axis(&name));
            }
            Command::SetSamplingInterval(interval, responder) => {
                let _ = responder.send(self.chart.set_sampling_interval(interval));
            }
            Command::StartChart(responder) => {
                let _ = responder.send(self.start_chart());
            }
            Command::StopChart(responder) => {
                self.stop_chart();
                let _ = responder.send(Ok(()));
            }
            Command::ExportCsv(responder) => {
                let _ = responder.send(export::to_csv(self.chart.axis(), self.chart.buffers()));
            }
            Command::ChartSample(sample) => {
                // Results from a stopped run are discarded, not merged.
                if self.sampler.is_some() && sample.generation == self.chart.generation {
                    self.chart.append(&sample.stamp, &sample.values);
                }
            }
        }
    }

    async fn connect(&mut self, config: TransportConfig) -> crate::Result<()> {
        if let Err(reason) = config.validate() {
            return Err(Error::InvalidConfig(reason.to_owned()));
        }

        // Connecting over a live link replaces it, like the gateway does.
        if self.state == ConnectionState::Connected {
            self.teardown().await;
        }

        self.set_state(ConnectionState::Connecting);
        match self.gateway.connect(config).await {
            Ok(()) => {
                info!("link established");
                self.set_state(ConnectionState::Connected);
                self.watchdog.rearm();
                self.spawn_refresh();
                self.read_firmware().await;
                Ok(())
            }
            Err(error) => {
                self.set_state(ConnectionState::Failed);
                Err(error)
            }
        }
    }

    async fn disconnect(&mut self) -> crate::Result<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Failed => {
                self.teardown().await;
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    async fn force_disconnect(&mut self) {
        // Both schedulers can cross the threshold in the same cycle; only
        // the first escalation while connected performs the teardown.
        if self.state != ConnectionState::Connected {
            return;
        }
        warn!("lost connection to the device, forcing teardown");
        self.teardown().await;
        let _ = self.events.send(Event::ConnectionLost);
    }

    /// Stop both schedulers, tell the backend, and consider the link gone
    /// from the client's perspective whether or not the backend agrees.
    async fn teardown(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.stop();
        }
        self.stop_chart();

        if let Err(error) = self.gateway.disconnect().await {
            warn!(%error, "backend disconnect failed");
        }

        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            let _ = self.events.send(Event::StateChanged(state));
        }
    }

    /// Best-effort one-shot read after connect; a failure is logged, never
    /// fatal, and the result is only broadcast for display.
    async fn read_firmware(&self) {
        let keys = vec![FW_VERSION_KEY.to_owned(), FW_RELEASE_KEY.to_owned()];
        match self.gateway.read_batch(keys).await {
            Ok(values) => {
                let version = values.get(FW_VERSION_KEY).copied().flatten();
                let release = values.get(FW_RELEASE_KEY).copied().flatten();
                if let (Some(version), Some(release)) = (version, release) {
                    let _ = self.events.send(Event::FirmwareVersion {
                        version: version as u32,
                        release: release as u32,
                    });
                }
            }
            Err(error) => warn!(%error, "firmware version read failed"),
        }
    }

    async fn write(&self, tag: &str, value: f64) -> crate::Result<f64> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let key = self
            .config
            .catalog
            .key_for(tag)
            .ok_or_else(|| Error::UnknownTag(tag.to_owned()))?
            .to_owned();
        self.gateway.write(key, value).await
    }

    fn add_variable(&mut self, name: &str) -> crate::Result<()> {
        let tag = self
            .config
            .catalog
            .get(name)
            .ok_or_else(|| Error::UnknownTag(name.to_owned()))?;
        let (key, unit) = (tag.key.clone(), tag.unit.clone());

        let axis = if self.config.right_axis.contains(name) {
            Axis::Right
        } else {
            Axis::Left
        };

        self.chart.add_variable(name, &key, &unit, axis)?;
        self.publish_selection();
        Ok(())
    }

    fn publish_selection(&self) {
        self.selected_keys.send_replace(self.chart.selected_keys());
    }

    fn start_chart(&mut self) -> crate::Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        if self.chart.is_empty() {
            return Err(Error::EmptySelection);
        }
        if self.sampler.is_some() {
            return Ok(());
        }

        self.chart.generation += 1;
        let (handle, shutdown) = TaskHandle::new();
        let sampler = ChartSampler {
            gateway: self.gateway.clone(),
            watchdog: self.watchdog.clone(),
            supervisor: self.tx.clone(),
            keys: self.selected_keys.subscribe(),
            interval: self.chart.sampling_interval(),
            generation: self.chart.generation,
        };
        tokio::spawn(sampler.run(shutdown));
        self.sampler = Some(handle);
        Ok(())
    }

    fn stop_chart(&mut self) {
        if let Some(handle) = self.sampler.take() {
            handle.stop();
        }
    }

    fn spawn_refresh(&mut self) {
        let (handle, shutdown) = TaskHandle::new();
        let scheduler = RefreshScheduler {
            gateway: self.gateway.clone(),
            catalog: self.config.catalog.clone(),
            interest: self.interest.subscribe(),
            watchdog: self.watchdog.clone(),
            events: self.events.clone(),
            supervisor: self.tx.clone(),
            interval: self.config.refresh_interval,
        };
        tokio::spawn(scheduler.run(shutdown));
        self.refresh = Some(handle);
    }
}
