//! The i3/sway/scroll client: a command channel plus a subscribed event stream.

use crate::{
    codec::{Frame, MessageType},
    command::{subscribe, CommandChannel},
    config::IpcConfig,
    error::{Result, TransportError},
    event::{ChannelState, EventSource, StreamStatus},
    feed::{Feed, HandlerContext},
    message::{CommandType, EventType},
    registry::{Interest, Routable},
    transport::{Closer, Connection},
    ui::UiContext,
};

impl Routable for Frame {
    type Key = MessageType;

    fn route_key(&self) -> MessageType {
        self.message_type
    }
}

impl HandlerContext<Frame> for CommandChannel {
    fn take_replies(&mut self) -> Vec<Frame> {
        CommandChannel::take_replies(self)
    }
}

/// Event connection that subscribes on every (re)connect.
#[derive(Debug)]
pub struct I3EventSource {
    config: IpcConfig,
    events: Vec<EventType>,
    connection: Option<Connection>,
}

impl I3EventSource {
    pub fn new(config: IpcConfig, events: &[EventType]) -> Self {
        I3EventSource { config, events: events.to_vec(), connection: None }
    }
}

impl EventSource for I3EventSource {
    type Event = Frame;

    fn connect(&mut self) -> Result<Closer> {
        self.connection = None;
        let mut connection = Connection::connect(&self.config.socket_path, self.config.recv_timeout)?;
        subscribe(&mut connection, &self.events, self.config.max_payload_len)?;
        // an idle event stream is fine, only shutdown ends the wait
        connection.set_read_timeout(None)?;
        let closer = connection.closer()?;
        self.connection = Some(connection);
        Ok(closer)
    }

    fn next_event(&mut self) -> Result<Option<Frame>> {
        let connection = self.connection.as_mut().ok_or(TransportError::Closed)?;
        connection.recv_frame(self.config.max_payload_len)
    }
}

/// Connection to an i3-compatible compositor.
///
/// Handlers run on the thread driving the [`UiContext`] passed to [`IpcClient::connect`] and
/// receive the [`CommandChannel`], so they can send commands themselves. Replies to commands
/// sent with [`CommandChannel::send_cmd`] go to the handlers registered with
/// [`IpcClient::on_reply`] once the current dispatch is finished.
pub struct IpcClient {
    events: Vec<EventType>,
    feed: Feed<Frame, CommandChannel>,
}

impl IpcClient {
    /// Open the command connection, subscribe to `events` and start the event reader.
    pub fn connect(config: IpcConfig, events: &[EventType], ui: &dyn UiContext) -> Result<Self> {
        let commands = CommandChannel::open(config.clone())?;
        let reconnect = config.reconnect.clone();
        let source = I3EventSource::new(config, events);
        let feed = Feed::connect(source, commands, reconnect, ui)?;
        Ok(IpcClient { events: events.to_vec(), feed })
    }

    pub fn on_event(&self, event: EventType, handler: impl FnMut(&mut CommandChannel, &Frame) -> anyhow::Result<()> + 'static) {
        if !self.events.contains(&event) {
            log::warn!("Registered a handler for {} events, but this client isn't subscribed to them", event);
        }
        self.feed.on_event(Interest::Only(event.message_type()), handler);
    }

    pub fn on_any_event(&self, handler: impl FnMut(&mut CommandChannel, &Frame) -> anyhow::Result<()> + 'static) {
        self.feed.on_event(Interest::All, handler);
    }

    pub fn on_reply(&self, command: CommandType, handler: impl FnMut(&mut CommandChannel, &Frame) -> anyhow::Result<()> + 'static) {
        self.feed.on_reply(command.into(), handler);
    }

    pub fn on_status(&self, handler: impl FnMut(&mut CommandChannel, StreamStatus) -> anyhow::Result<()> + 'static) {
        self.feed.on_status(handler);
    }

    /// Send a command and wait for its reply. Must not be called from inside a handler.
    pub fn call(&self, message_type: impl Into<MessageType>, payload: &str) -> Result<Frame> {
        self.feed.with_ctx(|commands| commands.call(message_type, payload))
    }

    /// Send a command and route its reply to the reply handlers.
    pub fn send_command(&self, message_type: impl Into<MessageType>, payload: &str) -> Result<()> {
        self.feed.with_ctx(|commands| commands.send_cmd(message_type, payload))
    }

    pub fn status(&self) -> ChannelState {
        self.feed.state()
    }

    /// Stop the event reader. Command calls keep working.
    pub fn shutdown(&mut self) {
        self.feed.shutdown();
    }
}
