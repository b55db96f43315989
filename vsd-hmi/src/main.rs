use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use vsd_gateway::{Transport, TransportConfig};
use vsd_hmi::engine::{self, EngineConfig, Event, InterestSet};
use vsd_hmi::{gateway, Error};

#[derive(Parser)]
#[clap(version, about = "Headless telemetry front end for a VSD gateway")]
struct Cli {
    /// Base URL of the gateway backend.
    #[clap(long, env = "VSD_GATEWAY_URL", default_value = "http://127.0.0.1:5000")]
    gateway: String,

    /// Device address for a Modbus TCP connection.
    #[clap(long, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Serial port for a Modbus RTU connection. When neither transport is
    /// given, the gateway's ports are listed and nothing else happens.
    #[clap(long)]
    serial: Option<String>,

    #[clap(long, default_value_t = 19200)]
    baudrate: u32,

    /// Tags to poll and print on every refresh tick.
    #[clap(short, long = "watch")]
    watch: Vec<String>,

    /// Tags to sample into the chart buffers.
    #[clap(short, long = "chart")]
    chart: Vec<String>,

    /// Chart sampling cadence in milliseconds.
    #[clap(long, default_value_t = 1000)]
    sampling_ms: u64,

    /// Directory the chart CSV is written to on exit. No export when omitted.
    #[clap(long)]
    export_dir: Option<PathBuf>,

    /// Engine configuration file (JSON). The transport still comes from the
    /// flags above.
    #[clap(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn transport(&self) -> Option<TransportConfig> {
        if let Some(host) = &self.tcp {
            return Some(TransportConfig::tcp(host));
        }
        let port = self.serial.as_ref()?;
        let mut config = TransportConfig::serial(port);
        if let Transport::Serial { baudrate, .. } = &mut config.transport {
            *baudrate = self.baudrate;
        }
        Some(config)
    }

    fn engine_config(&self) -> vsd_hmi::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text).map_err(|e| Error::InvalidConfig(e.to_string()))?
            }
            None => EngineConfig::default(),
        };
        config.sampling_interval = Duration::from_millis(self.sampling_ms);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> vsd_hmi::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();
    let client = vsd_gateway::Client::new(&args.gateway)?;
    let engine = engine::run(gateway::spawn(client), args.engine_config()?);

    let Some(transport) = args.transport() else {
        for port in engine.ports().await? {
            println!("{}\t{}", port.device, port.description);
        }
        return Ok(());
    };

    let mut events = engine.subscribe();

    engine.connect(transport).await?;
    engine
        .set_interest(InterestSet {
            tags: args.watch.iter().cloned().collect(),
            operator_view: false,
        })
        .await?;

    if !args.chart.is_empty() {
        for tag in &args.chart {
            engine.add_variable(tag).await?;
        }
        engine.start_chart().await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(Event::StateChanged(state)) => info!(?state, "connection state"),
                Ok(Event::ConnectionLost) => {
                    error!("connection lost, exiting");
                    break;
                }
                Ok(Event::TagUpdated { tag, value }) => println!("{tag}\t{value}"),
                Ok(Event::FirmwareVersion { version, release }) => {
                    info!(version, release, "device firmware");
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    if !args.chart.is_empty() {
        engine.stop_chart().await?;
        if let Some(dir) = &args.export_dir {
            match engine.export_csv().await {
                Ok(csv) => {
                    let path = dir.join(engine::export::export_filename(chrono::Utc::now()));
                    std::fs::write(&path, csv)?;
                    info!(path = %path.display(), "chart exported");
                }
                Err(Error::NoData) => warn!("no samples were collected, nothing to export"),
                Err(other) => return Err(other),
            }
        }
    }

    if engine.disconnect().await.is_ok() {
        info!("disconnected");
    }

    Ok(())
}
