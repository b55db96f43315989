use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Local validation failure; the backend is never contacted.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Backend-reported connect failure, message verbatim.
    #[error("{0}")]
    ConnectFailed(String),

    #[error(transparent)]
    Transport(vsd_gateway::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("device unresponsive")]
    DeviceUnresponsive,

    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("variable already added: {0}")]
    DuplicateVariable(String),

    #[error("no variables selected")]
    EmptySelection,

    #[error("not connected")]
    NotConnected,

    #[error("no chart data")]
    NoData,

    #[error("sampling rate is locked while variables are selected")]
    SamplingRateLocked,

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("RecvError")]
    RecvError,

    #[error("SendError")]
    SendError,
}

impl From<vsd_gateway::Error> for Error {
    fn from(err: vsd_gateway::Error) -> Self {
        use vsd_gateway::Error as Gw;
        match err {
            Gw::DeviceUnresponsive => Error::DeviceUnresponsive,
            Gw::WriteRejected { message } => Error::WriteRejected(message),
            other => Error::Transport(other),
        }
    }
}

#[test]
fn gateway_errors_map_onto_the_engine_taxonomy() {
    let unresponsive: Error = vsd_gateway::Error::DeviceUnresponsive.into();
    assert!(matches!(unresponsive, Error::DeviceUnresponsive));

    let rejected: Error = vsd_gateway::Error::WriteRejected {
        message: "out of range".to_owned(),
    }
    .into();
    assert!(matches!(rejected, Error::WriteRejected(ref m) if m == "out of range"));

    let gateway: Error = vsd_gateway::Error::Gateway {
        message: "boom".to_owned(),
    }
    .into();
    assert!(matches!(gateway, Error::Transport(_)));
}
