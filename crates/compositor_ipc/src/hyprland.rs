//! Hyprland's line-based IPC: a request socket with one connection per request, and an event
//! socket that streams `name>>data` lines.

use std::{
    ffi::OsString,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize};
use strum::{Display, EnumDiscriminants};

use crate::{
    config::{IpcConfig, ReconnectPolicy, DEFAULT_MAX_PAYLOAD_LEN},
    error::{ConfigError, ProtocolError, Result, TransportError},
    event::{ChannelState, EventSource, StreamStatus},
    feed::{Feed, HandlerContext},
    registry::{Interest, Routable},
    transport::{recv_error, Closer, Connection},
    ui::UiContext,
};

pub const SIGNATURE_ENV_VAR: &str = "HYPRLAND_INSTANCE_SIGNATURE";

/// Hyprland terminates request replies with EOT.
const REPLY_END: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyprlandPaths {
    pub requests: PathBuf,
    pub events: PathBuf,
}

impl HyprlandPaths {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var_os(name), |path| path.exists())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>, exists: impl Fn(&Path) -> bool) -> Result<Self, ConfigError> {
        let signature = lookup(SIGNATURE_ENV_VAR)
            .filter(|sig| !sig.is_empty())
            .ok_or_else(|| ConfigError::MissingEnv(vec![SIGNATURE_ENV_VAR]))?;
        let runtime_dir = lookup("XDG_RUNTIME_DIR").filter(|dir| !dir.is_empty()).unwrap_or_else(|| OsString::from("/"));
        let socket = |name: &str| {
            let path = Path::new(&runtime_dir).join("hypr").join(&signature).join(name);
            if exists(&path) {
                path
            } else {
                Path::new("/tmp/hypr").join(&signature).join(name)
            }
        };
        Ok(HyprlandPaths { requests: socket(".socket.sock"), events: socket(".socket2.sock") })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HyprWorkspace {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub monitor: String,
    #[serde(default)]
    pub windows: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HyprWindow {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub class: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct Keyboard {
    #[serde(default)]
    main: bool,
    active_keymap: String,
}

#[derive(Debug, Deserialize)]
struct Devices {
    #[serde(default)]
    keyboards: Vec<Keyboard>,
}

/// Client for Hyprland's request socket.
#[derive(Debug, Clone)]
pub struct HyprlandCtl {
    socket_path: PathBuf,
    timeout: Option<Duration>,
    max_reply_len: usize,
}

impl HandlerContext<HyprEvent> for HyprlandCtl {}

impl HyprlandCtl {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        HyprlandCtl {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: Some(crate::config::DEFAULT_RECV_TIMEOUT),
            max_reply_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_reply_len(mut self, max: usize) -> Self {
        self.max_reply_len = max;
        self
    }

    /// Send `message`, e.g. `j/workspaces`, and return the reply text.
    pub fn request(&self, message: &str) -> Result<String> {
        log::debug!("Hyprland request: {}", message);
        let mut connection = Connection::connect(&self.socket_path, self.timeout)?;
        connection.send_all(message.as_bytes())?;
        let reply = connection.recv_until(REPLY_END, self.max_reply_len)?;
        let reply = String::from_utf8(reply).map_err(|err| ProtocolError::InvalidUtf8(err.utf8_error()))?;
        Ok(reply)
    }

    /// Send a request with the JSON flag and parse the reply.
    pub fn request_json<T: DeserializeOwned>(&self, message: &str) -> Result<T> {
        let reply = self.request(&format!("j/{}", message))?;
        Ok(serde_json::from_str(&reply)?)
    }

    pub fn dispatch(&self, dispatcher: &str, args: &str) -> Result<()> {
        let reply = self.request(&format!("dispatch {} {}", dispatcher, args))?;
        if reply != "ok" {
            return Err(ProtocolError::DispatchRejected(reply).into());
        }
        Ok(())
    }

    pub fn workspaces(&self) -> Result<Vec<HyprWorkspace>> {
        self.request_json("workspaces")
    }

    pub fn active_workspace(&self) -> Result<HyprWorkspace> {
        self.request_json("activeworkspace")
    }

    /// `None` when no window is focused, in which case Hyprland replies with an empty object.
    pub fn active_window(&self) -> Result<Option<HyprWindow>> {
        let window: serde_json::Value = self.request_json("activewindow")?;
        if window.get("title").is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(window)?))
    }

    pub fn main_keyboard_layout(&self) -> Result<Option<String>> {
        let devices: Devices = self.request_json("devices")?;
        Ok(devices.keyboards.into_iter().find(|kb| kb.main).map(|kb| kb.active_keymap))
    }
}

/// One line of the Hyprland event socket.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(HyprEventKind), derive(Hash, Display))]
pub enum HyprEvent {
    Workspace { id: i64, name: String },
    FocusedMonitor { monitor: String, workspace_id: i64 },
    ActiveWindow { class: String, title: String },
    Submap(String),
    CreateWorkspace { id: i64, name: String },
    DestroyWorkspace { id: i64, name: String },
    /// `name` is empty when the special workspace was closed.
    ActiveSpecial { name: String, monitor: String },
    ActiveLayout { keyboard: String, layout: String },
    ScrollerMode(Vec<String>),
    ScrollerOverview(bool),
    ScrollerTrail { number: i64, size: i64 },
    ScrollerTrailmark(bool),
    ScrollerMark { set: bool, name: String },
    Other { name: String, data: String },
}

impl HyprEvent {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (name, data) = line.split_once(">>").unwrap_or((line, ""));
        // names and titles may end in spaces, only the terminator goes
        let data = data.trim_end_matches(['\r', '\n']);
        let malformed = || ProtocolError::MalformedEvent { name: name.to_string(), line: line.to_string() };
        let pair = || data.split_once(',').ok_or_else(malformed);
        let int = |s: &str| s.trim().parse::<i64>().map_err(|_| malformed());
        let flag = |s: &str| match s {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(malformed()),
        };

        let event = match name {
            "workspacev2" => {
                let (id, name) = pair()?;
                HyprEvent::Workspace { id: int(id)?, name: name.to_string() }
            }
            "focusedmonv2" => {
                let (monitor, id) = pair()?;
                HyprEvent::FocusedMonitor { monitor: monitor.to_string(), workspace_id: int(id)? }
            }
            "activewindow" => {
                let (class, title) = pair()?;
                HyprEvent::ActiveWindow { class: class.to_string(), title: title.to_string() }
            }
            "submap" => HyprEvent::Submap(data.to_string()),
            "createworkspacev2" => {
                let (id, name) = pair()?;
                HyprEvent::CreateWorkspace { id: int(id)?, name: name.to_string() }
            }
            "destroyworkspacev2" => {
                let (id, name) = pair()?;
                HyprEvent::DestroyWorkspace { id: int(id)?, name: name.to_string() }
            }
            "activespecial" => {
                let (name, monitor) = pair()?;
                HyprEvent::ActiveSpecial { name: name.to_string(), monitor: monitor.to_string() }
            }
            "activelayout" => {
                let (keyboard, layout) = pair()?;
                HyprEvent::ActiveLayout { keyboard: keyboard.to_string(), layout: layout.to_string() }
            }
            "scroller" => {
                let args: Vec<&str> = data.split(',').map(str::trim).collect();
                match args.as_slice() {
                    ["mode", rest @ ..] => HyprEvent::ScrollerMode(rest.iter().map(|s| s.to_string()).collect()),
                    ["overview", on] => HyprEvent::ScrollerOverview(flag(*on)?),
                    ["trail", number, size] => HyprEvent::ScrollerTrail { number: int(*number)?, size: int(*size)? },
                    ["trailmark", on] => HyprEvent::ScrollerTrailmark(flag(*on)?),
                    ["mark", set, name] => HyprEvent::ScrollerMark { set: flag(*set)?, name: name.to_string() },
                    ["overview" | "trail" | "trailmark" | "mark", ..] => return Err(malformed()),
                    _ => HyprEvent::Other { name: name.to_string(), data: data.to_string() },
                }
            }
            _ => HyprEvent::Other { name: name.to_string(), data: data.to_string() },
        };
        Ok(event)
    }

    pub fn kind(&self) -> HyprEventKind {
        HyprEventKind::from(self)
    }
}

impl Routable for HyprEvent {
    type Key = HyprEventKind;

    fn route_key(&self) -> HyprEventKind {
        self.kind()
    }
}

/// Buffered line reader over the event socket. Malformed lines are logged and skipped.
#[derive(Debug)]
pub struct HyprEventSource {
    path: PathBuf,
    max_line_len: usize,
    reader: Option<BufReader<Connection>>,
}

impl HyprEventSource {
    pub fn new(path: impl AsRef<Path>, max_line_len: usize) -> Self {
        HyprEventSource { path: path.as_ref().to_path_buf(), max_line_len, reader: None }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let Some(line) = read_line_capped(reader, self.max_line_len)? else {
            return Ok(None);
        };
        let line = String::from_utf8(line).map_err(|err| ProtocolError::InvalidUtf8(err.utf8_error()))?;
        Ok(Some(line))
    }
}

/// Read one line without its `\n`, failing as soon as more than `max_len` bytes arrived without one.
/// Returns `None` at end of stream.
fn read_line_capped<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    loop {
        let (used, done) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(recv_error(err)),
            };
            if available.is_empty() {
                // a last line without terminator still counts
                return Ok(if line.is_empty() { None } else { Some(line) });
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    line.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    line.extend_from_slice(available);
                    (available.len(), false)
                }
            }
        };
        reader.consume(used);
        if line.len() > max_len {
            return Err(ProtocolError::PayloadTooLarge { len: line.len(), max: max_len }.into());
        }
        if done {
            return Ok(Some(line));
        }
    }
}

impl EventSource for HyprEventSource {
    type Event = HyprEvent;

    fn connect(&mut self) -> Result<Closer> {
        self.reader = None;
        let connection = Connection::connect(&self.path, None)?;
        let closer = connection.closer()?;
        self.reader = Some(BufReader::new(connection));
        Ok(closer)
    }

    fn next_event(&mut self) -> Result<Option<HyprEvent>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            match HyprEvent::parse(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => log::warn!("Skipping Hyprland event: {}", err),
            }
        }
    }
}

/// Connection to Hyprland. Handlers receive a [`HyprlandCtl`] to issue requests with.
pub struct HyprlandClient {
    ctl: HyprlandCtl,
    feed: Feed<HyprEvent, HyprlandCtl>,
}

impl HyprlandClient {
    /// `config` supplies the request timeout, the size limit and the reconnect policy; its socket
    /// path is not used.
    pub fn connect(paths: HyprlandPaths, config: &IpcConfig, ui: &dyn UiContext) -> Result<Self> {
        let ctl = HyprlandCtl::new(&paths.requests).with_timeout(config.recv_timeout).with_max_reply_len(config.max_payload_len);
        let source = HyprEventSource::new(&paths.events, config.max_payload_len);
        let reconnect: Option<ReconnectPolicy> = config.reconnect.clone();
        let feed = Feed::connect(source, ctl.clone(), reconnect, ui)?;
        Ok(HyprlandClient { ctl, feed })
    }

    pub fn on_event(&self, kind: HyprEventKind, handler: impl FnMut(&mut HyprlandCtl, &HyprEvent) -> anyhow::Result<()> + 'static) {
        self.feed.on_event(Interest::Only(kind), handler);
    }

    pub fn on_any_event(&self, handler: impl FnMut(&mut HyprlandCtl, &HyprEvent) -> anyhow::Result<()> + 'static) {
        self.feed.on_event(Interest::All, handler);
    }

    pub fn on_status(&self, handler: impl FnMut(&mut HyprlandCtl, StreamStatus) -> anyhow::Result<()> + 'static) {
        self.feed.on_status(handler);
    }

    /// Request client, usable outside of handlers.
    pub fn ctl(&self) -> &HyprlandCtl {
        &self.ctl
    }

    pub fn status(&self) -> ChannelState {
        self.feed.state()
    }

    pub fn shutdown(&mut self) {
        self.feed.shutdown();
    }
}
