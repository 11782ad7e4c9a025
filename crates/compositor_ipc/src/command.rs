use crate::{
    codec::{Frame, MessageType},
    config::{CommandMode, IpcConfig},
    error::{ProtocolError, Result, TransportError},
    message::{subscription_payload, CommandType, EventType},
    transport::Connection,
};

/// Acknowledgement the compositor sends for a successful subscription. Compared byte for byte.
pub const SUBSCRIBE_ACK: &str = r#"{"success": true}"#;

/// Synchronous request/response path to the compositor.
///
/// Calls block the calling thread until the reply arrives or the receive timeout expires,
/// so they are meant for short, infrequent requests.
#[derive(Debug)]
pub struct CommandChannel {
    config: IpcConfig,
    connection: Option<Connection>,
    replies: Vec<Frame>,
}

impl CommandChannel {
    /// Create the channel. In persistent mode the connection is opened right away so that
    /// a missing compositor is reported at construction.
    pub fn open(config: IpcConfig) -> Result<Self> {
        let connection = match config.command_mode {
            CommandMode::Persistent => Some(Connection::connect(&config.socket_path, config.recv_timeout)?),
            CommandMode::PerCall => None,
        };
        Ok(CommandChannel { config, connection, replies: Vec::new() })
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    /// Send a command and wait for its reply.
    pub fn call(&mut self, message_type: impl Into<MessageType>, payload: &str) -> Result<Frame> {
        let message_type = message_type.into();
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => Connection::connect(&self.config.socket_path, self.config.recv_timeout)?,
        };
        let reply = round_trip(&mut connection, message_type, payload, self.config.max_payload_len)?;
        // on error the connection is dropped above, so the next call starts fresh
        if self.config.command_mode == CommandMode::Persistent {
            self.connection = Some(connection);
        }
        Ok(reply)
    }

    /// Send a command and queue its reply for the reply handlers, see [`CommandChannel::take_replies`].
    pub fn send_cmd(&mut self, message_type: impl Into<MessageType>, payload: &str) -> Result<()> {
        let reply = self.call(message_type, payload)?;
        self.replies.push(reply);
        Ok(())
    }

    /// Run a compositor command such as `workspace 3`.
    pub fn run_command(&mut self, command: &str) -> Result<()> {
        self.send_cmd(CommandType::RunCommand, command)
    }

    pub fn take_replies(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.replies)
    }
}

/// Send one frame and read the matching reply on `connection`.
pub fn round_trip(connection: &mut Connection, message_type: MessageType, payload: &str, max_payload_len: usize) -> Result<Frame> {
    connection.send_frame(&Frame::new(message_type, payload))?;
    let reply = connection.recv_frame(max_payload_len)?.ok_or(TransportError::Closed)?;
    if reply.message_type != message_type {
        return Err(ProtocolError::UnexpectedReply { expected: message_type, actual: reply.message_type }.into());
    }
    Ok(reply)
}

/// Perform the subscribe handshake on an event connection.
pub fn subscribe(connection: &mut Connection, events: &[EventType], max_payload_len: usize) -> Result<()> {
    let filter = subscription_payload(events);
    log::info!("Subscribing to compositor events {}", filter);
    let reply = round_trip(connection, CommandType::Subscribe.into(), &filter, max_payload_len)?;
    if reply.payload != SUBSCRIBE_ACK.as_bytes() {
        let received = String::from_utf8_lossy(&reply.payload).into_owned();
        return Err(ProtocolError::SubscribeRejected(received).into());
    }
    Ok(())
}
