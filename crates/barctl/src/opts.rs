use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use compositor_ipc::{CommandType, EventType, IpcConfig, ReconnectPolicy};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub connection: ConnectionOpts,
    pub action: Action,
}

#[derive(Debug, PartialEq)]
pub struct ConnectionOpts {
    pub socket: Option<PathBuf>,
    pub recv_timeout: Option<Duration>,
    pub reconnect: bool,
}

#[derive(Parser, Debug, PartialEq)]
#[command(name = "barctl", about = "Talk to the compositor the way the bar does", version)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Path of the compositor socket. Defaults to $SCROLLSOCK, $SWAYSOCK or $I3SOCK.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// How long to wait for a reply, in milliseconds. 0 waits forever.
    #[arg(long = "timeout-ms", global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// Reconnect the event stream when the compositor restarts.
    #[arg(long, global = true)]
    reconnect: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Send a single command, e.g. `barctl call get_workspaces`, and print the reply.
    Call {
        command: CommandType,

        /// Payload of the command, such as the command string for `run_command`.
        #[arg(default_value = "")]
        payload: String,
    },

    /// Subscribe to events and print them until interrupted.
    Watch {
        #[arg(required = true)]
        events: Vec<EventType>,
    },

    /// Talk to Hyprland instead of an i3-compatible compositor.
    #[command(subcommand)]
    Hypr(HyprAction),
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum HyprAction {
    /// Send a raw request, e.g. `j/monitors`, and print the reply.
    Request { message: String },

    /// Run a dispatcher, e.g. `barctl hypr dispatch workspace 3`.
    Dispatch {
        dispatcher: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print events from the Hyprland event socket until interrupted.
    Watch,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, socket, timeout_ms, reconnect, action } = other;
        let recv_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        Opt { log_debug, connection: ConnectionOpts { socket, recv_timeout, reconnect }, action }
    }
}

impl ConnectionOpts {
    /// Config for an i3-compatible compositor, located through `--socket` or the environment.
    pub fn ipc_config(&self) -> Result<IpcConfig> {
        let config = match &self.socket {
            Some(socket) => IpcConfig::new(socket),
            None => IpcConfig::from_env().context("Pass --socket or start barctl from within the compositor session")?,
        };
        Ok(self.apply(config))
    }

    pub fn apply(&self, config: IpcConfig) -> IpcConfig {
        config.with_recv_timeout(self.recv_timeout).with_reconnect(self.reconnect.then(ReconnectPolicy::default))
    }
}
