//! Bridge between the engine's tasks and the HTTP gateway client.
//!
//! All calls are funnelled through one task so requests against the single
//! physical link are serialised. Tests substitute their own task on the same
//! channel in place of the reqwest-backed one.

use tokio::sync::{mpsc, oneshot};

use vsd_gateway::{BatchValues, PortInfo, TransportConfig};

use crate::Error;

type Responder<T> = oneshot::Sender<vsd_gateway::Result<T>>;

#[derive(Debug)]
pub enum GatewayCommand {
    Ports(Responder<Vec<PortInfo>>),
    Connect(TransportConfig, Responder<()>),
    Disconnect(Responder<()>),
    ReadBatch(Vec<String>, Responder<BatchValues>),
    Write {
        id: String,
        value: f64,
        responder: Responder<f64>,
    },
}

#[derive(Clone, Debug)]
pub struct GatewayHandle {
    tx: mpsc::Sender<GatewayCommand>,
}

/// Spawn the task that owns the HTTP client and answer commands with it.
pub fn spawn(client: vsd_gateway::Client) -> GatewayHandle {
    let (handle, mut rx) = GatewayHandle::channel(32);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            // A dropped responder just means the caller stopped waiting.
            match command {
                GatewayCommand::Ports(responder) => {
                    let _ = responder.send(client.ports().await);
                }
                GatewayCommand::Connect(config, responder) => {
                    let _ = responder.send(client.connect(&config).await);
                }
                GatewayCommand::Disconnect(responder) => {
                    let _ = responder.send(client.disconnect().await);
                }
                GatewayCommand::ReadBatch(ids, responder) => {
                    let _ = responder.send(client.read_batch(&ids).await);
                }
                GatewayCommand::Write {
                    id,
                    value,
                    responder,
                } => {
                    let _ = responder.send(client.write(&id, value).await);
                }
            }
        }
    });

    handle
}

impl GatewayHandle {
    /// Create a handle alongside the receiving end of its command channel.
    /// Used by [`spawn`] and by tests providing a scripted gateway.
    pub fn channel(buffer: usize) -> (GatewayHandle, mpsc::Receiver<GatewayCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (GatewayHandle { tx }, rx)
    }

    pub async fn ports(&self) -> crate::Result<Vec<PortInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::Ports(tx)).await?;
        Ok(rx.await.map_err(|_| Error::RecvError)??)
    }

    /// A backend-reported connect failure surfaces its message verbatim.
    pub async fn connect(&self, config: TransportConfig) -> crate::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::Connect(config, tx)).await?;
        match rx.await.map_err(|_| Error::RecvError)? {
            Ok(()) => Ok(()),
            Err(vsd_gateway::Error::Gateway { message }) => Err(Error::ConnectFailed(message)),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn disconnect(&self) -> crate::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::Disconnect(tx)).await?;
        Ok(rx.await.map_err(|_| Error::RecvError)??)
    }

    pub async fn read_batch(&self, ids: Vec<String>) -> crate::Result<BatchValues> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::ReadBatch(ids, tx)).await?;
        Ok(rx.await.map_err(|_| Error::RecvError)??)
    }

    pub async fn write(&self, id: String, value: f64) -> crate::Result<f64> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::Write {
            id,
            value,
            responder: tx,
        })
        .await?;
        Ok(rx.await.map_err(|_| Error::RecvError)??)
    }

    async fn send(&self, command: GatewayCommand) -> crate::Result<()> {
        self.tx.send(command).await.map_err(|_| Error::SendError)
    }
}
