use std::path::PathBuf;

use thiserror::Error;

use crate::codec::MessageType;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Failed to parse IPC payload as JSON")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = IpcError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("None of the environment variables {} is set, can't locate the compositor socket", .0.join(", "))]
    MissingEnv(Vec<&'static str>),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to IPC socket at {}", .path.display())]
    ConnectFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to send to IPC socket")]
    SendFailed(#[source] std::io::Error),
    #[error("Failed to receive from IPC socket")]
    RecvFailed(#[source] std::io::Error),
    #[error("Timed out waiting for the IPC socket")]
    Timeout,
    #[error("IPC connection was closed by the peer")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IPC frame does not start with the expected magic, got {0:?}")]
    BadMagic([u8; 6]),
    #[error("IPC frame is truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("IPC payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Compositor rejected the event subscription: {0}")]
    SubscribeRejected(String),
    #[error("Expected a reply of type {expected}, got {actual}")]
    UnexpectedReply { expected: MessageType, actual: MessageType },
    #[error("IPC payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Malformed {name} event: {line:?}")]
    MalformedEvent { name: String, line: String },
    #[error("Dispatch was rejected by the compositor: {0}")]
    DispatchRejected(String),
}
