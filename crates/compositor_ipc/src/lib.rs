//! Client side of the i3/sway/scroll IPC protocol and Hyprland's socket IPC, for a status bar
//! that wants compositor events delivered on its UI thread.

pub mod util;

pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod hyprland;
pub mod message;
pub mod registry;
pub mod transport;
pub mod ui;

#[cfg(test)]
mod test_util;

pub use client::IpcClient;
pub use codec::{Frame, MessageType};
pub use command::CommandChannel;
pub use config::{CommandMode, IpcConfig, ReconnectPolicy};
pub use error::{ConfigError, IpcError, ProtocolError, Result, TransportError};
pub use event::{ChannelState, StreamStatus};
pub use hyprland::{HyprEvent, HyprEventKind, HyprlandClient, HyprlandCtl, HyprlandPaths};
pub use message::{CommandType, EventType};
pub use ui::{DispatchGuard, UiContext, UiLoop, Wake};
#[cfg(feature = "glib")]
pub use ui::GlibContext;
