use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;

/// Environment variables that may point at the compositor socket, in order of preference.
pub const SOCKET_ENV_VARS: [&str; 3] = ["SCROLLSOCK", "SWAYSOCK", "I3SOCK"];

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// How the command connection is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandMode {
    /// Keep one connection open and reuse it for every call.
    #[default]
    Persistent,
    /// Open a fresh connection for every call and close it after the reply.
    PerCall,
}

/// Bounded reconnect with exponential backoff, used by the event channel after a connection loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy { max_attempts: 5, initial_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (0-based), doubling each time up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
    /// Applies to command calls and the subscribe handshake. `None` blocks indefinitely.
    pub recv_timeout: Option<Duration>,
    pub max_payload_len: usize,
    pub command_mode: CommandMode,
    pub reconnect: Option<ReconnectPolicy>,
}

impl IpcConfig {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        IpcConfig {
            socket_path: socket_path.as_ref().to_path_buf(),
            recv_timeout: Some(DEFAULT_RECV_TIMEOUT),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            command_mode: CommandMode::default(),
            reconnect: None,
        }
    }

    /// Locate the compositor socket through [`SOCKET_ENV_VARS`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<std::ffi::OsString>) -> Result<Self, ConfigError> {
        SOCKET_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|value| !value.is_empty()))
            .map(IpcConfig::new)
            .ok_or_else(|| ConfigError::MissingEnv(SOCKET_ENV_VARS.to_vec()))
    }

    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_max_payload_len(mut self, max: usize) -> Self {
        self.max_payload_len = max;
        self
    }

    pub fn with_command_mode(mut self, mode: CommandMode) -> Self {
        self.command_mode = mode;
        self
    }

    pub fn with_reconnect(mut self, policy: Option<ReconnectPolicy>) -> Self {
        self.reconnect = policy;
        self
    }
}
