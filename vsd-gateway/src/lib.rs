use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    HttpErr(#[from] reqwest::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    /// Backend-reported failure; the message is surfaced verbatim.
    #[error("{message}")]
    Gateway { message: String },

    #[error("write rejected: {message}")]
    WriteRejected { message: String },

    /// Non-success HTTP status on a batch read, regardless of body content.
    #[error("device unresponsive")]
    DeviceUnresponsive,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Values returned by a batch read, keyed by backend register key. A `None`
/// means the backend could not read that register on this pass.
pub type BatchValues = HashMap<String, Option<f64>>;

// The gateway enforces its own per-register timeout; this is only a ceiling
// so a hung backend still resolves to an error on the client side.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    pub fn new<B: Into<String>>(base: B) -> Result<Self> {
        let base = base.into().trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Client { http, base })
    }

    /// Transport endpoints available for serial configuration.
    pub async fn ports(&self) -> Result<Vec<PortInfo>> {
        let response = self.http.get(self.url("/api/ports")).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn connect(&self, config: &TransportConfig) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/connect"))
            .json(config)
            .send()
            .await?;
        parse_status(response).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        let response = self.http.post(self.url("/api/disconnect")).send().await?;
        parse_status(response).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn read_batch(&self, ids: &[String]) -> Result<BatchValues> {
        let response = self
            .http
            .post(self.url("/api/read_batch"))
            .json(&serde_json::json!({ "ids": ids }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::DeviceUnresponsive);
        }

        Ok(response.json().await?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn write(&self, id: &str, value: f64) -> Result<f64> {
        let response = self
            .http
            .post(self.url("/api/write"))
            .json(&serde_json::json!({ "id": id, "value": value }))
            .send()
            .await?;

        let body = response.text().await?;
        debug!(%body, "write response");

        match serde_json::from_str::<WriteResult>(&body)? {
            WriteResult::Accepted { status, written } if status == "success" => Ok(written),
            WriteResult::Accepted { status, .. } => Err(Error::WriteRejected { message: status }),
            WriteResult::Rejected { error } => Err(Error::WriteRejected { message: error }),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", &self.base, path)
    }
}

/// The `{status, message}` envelope used by the connect/disconnect endpoints.
async fn parse_status(response: reqwest::Response) -> Result<()> {
    let body = response.text().await?;
    debug!(%body, "parsing");
    let envelope = serde_json::from_str::<ApiStatus>(&body)?;

    if envelope.status == "success" {
        Ok(())
    } else {
        Err(Error::Gateway {
            message: envelope
                .message
                .unwrap_or_else(|| "unknown gateway error".to_owned()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WriteResult {
    Accepted { status: String, written: f64 },
    Rejected { error: String },
}

/// One row of `GET /api/ports`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
}

/// Connection parameters posted to `POST /api/connect`. Field names follow
/// the gateway's wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(flatten)]
    pub transport: Transport,

    /// Response timeout in seconds, applied by the gateway per register.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connection_type", rename_all = "lowercase")]
pub enum Transport {
    Serial {
        port: String,

        #[serde(default = "default_baudrate")]
        baudrate: u32,

        #[serde(default = "default_bytesize")]
        bytesize: u8,

        #[serde(default)]
        parity: Parity,

        #[serde(default = "default_stopbits")]
        stopbits: u8,
    },
    Tcp {
        ip_address: String,

        #[serde(default = "default_tcp_port")]
        tcp_port: u16,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

impl TransportConfig {
    pub fn serial<P: Into<String>>(port: P) -> Self {
        TransportConfig {
            transport: Transport::Serial {
                port: port.into(),
                baudrate: default_baudrate(),
                bytesize: default_bytesize(),
                parity: Parity::default(),
                stopbits: default_stopbits(),
            },
            timeout: default_timeout(),
        }
    }

    pub fn tcp<H: Into<String>>(host: H) -> Self {
        TransportConfig {
            transport: Transport::Tcp {
                ip_address: host.into(),
                tcp_port: default_tcp_port(),
            },
            timeout: default_timeout(),
        }
    }

    /// Local validation performed before any connect request is issued.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        match &self.transport {
            Transport::Serial { port, .. } if port.trim().is_empty() => {
                Err("serial port must not be empty")
            }
            Transport::Tcp { ip_address, .. } if ip_address.trim().is_empty() => {
                Err("address must not be empty")
            }
            _ => Ok(()),
        }
    }
}

fn default_timeout() -> f64 {
    1.0
}

fn default_baudrate() -> u32 {
    19200
}

fn default_bytesize() -> u8 {
    8
}

fn default_stopbits() -> u8 {
    1
}

fn default_tcp_port() -> u16 {
    502
}

#[test]
fn parse_minimal_serial_config() {
    use serde_json::json;
    let result = serde_json::from_value::<TransportConfig>(json!({
        "connection_type": "serial",
        "port": "COM3",
    }));

    let config = result.unwrap();
    assert!(matches!(
        config.transport,
        Transport::Serial {
            ref port,
            baudrate: 19200,
            bytesize: 8,
            parity: Parity::None,
            stopbits: 1,
        } if port == "COM3"
    ));
    assert_eq!(config.timeout, 1.0);
}

#[test]
fn parse_complete_serial_config() {
    use serde_json::json;
    let result = serde_json::from_value::<TransportConfig>(json!({
        "connection_type": "serial",
        "port": "/dev/ttyUSB0",
        "baudrate": 9600,
        "bytesize": 7,
        "parity": "E",
        "stopbits": 2,
        "timeout": 2.5,
    }));

    let config = result.unwrap();
    assert!(matches!(
        config.transport,
        Transport::Serial {
            ref port,
            baudrate: 9600,
            bytesize: 7,
            parity: Parity::Even,
            stopbits: 2,
        } if port == "/dev/ttyUSB0"
    ));
}

#[test]
fn parse_minimal_tcp_config() {
    use serde_json::json;
    let result = serde_json::from_value::<TransportConfig>(json!({
        "connection_type": "tcp",
        "ip_address": "10.0.0.17",
    }));

    assert!(matches!(
        result.unwrap().transport,
        Transport::Tcp {
            ref ip_address,
            tcp_port: 502,
        } if ip_address == "10.0.0.17"
    ));
}

#[test]
fn serialized_config_carries_the_wire_tag() {
    let config = TransportConfig::serial("COM1");
    let value = serde_json::to_value(&config).unwrap();
    assert_eq!(value["connection_type"], "serial");
    assert_eq!(value["parity"], "N");
    assert_eq!(value["timeout"], 1.0);
}

#[test]
fn validate_rejects_blank_required_fields() {
    assert!(TransportConfig::serial("").validate().is_err());
    assert!(TransportConfig::serial("  ").validate().is_err());
    assert!(TransportConfig::tcp("").validate().is_err());
    assert!(TransportConfig::serial("COM3").validate().is_ok());
    assert!(TransportConfig::tcp("192.168.0.9").validate().is_ok());
}

#[test]
fn parse_write_results() {
    let ok = serde_json::from_str::<WriteResult>(r#"{"status": "success", "written": 12.5}"#);
    assert!(matches!(
        ok.unwrap(),
        WriteResult::Accepted { ref status, written } if status == "success" && written == 12.5
    ));

    let rejected = serde_json::from_str::<WriteResult>(r#"{"error": "Registro no mapeado"}"#);
    assert!(matches!(
        rejected.unwrap(),
        WriteResult::Rejected { ref error } if error == "Registro no mapeado"
    ));
}

#[test]
fn parse_port_listing() {
    let json = r#"[{"device": "COM3", "description": "USB Serial Port"}]"#;
    let ports: Vec<PortInfo> = serde_json::from_str(json).unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].device, "COM3");
}
