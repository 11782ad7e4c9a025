//! Blocking Unix socket I/O with exact reads and full writes.

use std::{
    io::{ErrorKind, Read, Write},
    net::Shutdown,
    os::unix::net::UnixStream,
    path::Path,
    time::Duration,
};

use crate::{
    codec::{self, Frame},
    error::{IpcError, ProtocolError, Result, TransportError},
};

/// A single stream connection to a compositor socket.
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
}

impl Connection {
    /// Connect to `path`. std opens the socket with `SOCK_CLOEXEC`, so it isn't leaked into spawned children.
    pub fn connect(path: impl AsRef<Path>, timeout: Option<Duration>) -> Result<Self> {
        let path = path.as_ref();
        let connect_failed = |source| TransportError::ConnectFailed { path: path.to_path_buf(), source };
        let stream = UnixStream::connect(path).map_err(connect_failed)?;
        stream.set_read_timeout(timeout).map_err(connect_failed)?;
        stream.set_write_timeout(timeout).map_err(connect_failed)?;
        log::debug!("Connected to IPC socket {}", path.display());
        Ok(Connection { stream })
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Connection { stream }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(TransportError::RecvFailed)?;
        Ok(())
    }

    /// Handle that can shut this connection down from another thread.
    pub fn closer(&self) -> Result<Closer> {
        Closer::for_stream(&self.stream)
    }

    pub fn send_all(&mut self, bytes: &[u8]) -> Result<()> {
        write_all(&mut self.stream, bytes)
    }

    /// Read exactly `n` bytes. Returns `None` if the connection was closed.
    pub fn recv_exact(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        read_exact_or_closed(&mut self.stream, n)
    }

    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        log::debug!("Sending IPC frame ({}, {} bytes)", frame.message_type, frame.payload.len());
        self.send_all(&frame.encode()?)
    }

    /// Read one complete frame. Returns `None` if the connection was closed.
    pub fn recv_frame(&mut self, max_payload_len: usize) -> Result<Option<Frame>> {
        read_frame(&mut self.stream, max_payload_len)
    }

    pub fn recv_until(&mut self, delimiter: u8, max_len: usize) -> Result<Vec<u8>> {
        read_until_delimiter(&mut self.stream, delimiter, max_len)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

/// Shuts a connection down from any thread, waking up a reader blocked on it.
#[derive(Debug, Default)]
pub struct Closer(Option<UnixStream>);

impl Closer {
    /// A closer that has nothing to close.
    pub fn none() -> Self {
        Closer(None)
    }

    pub fn for_stream(stream: &UnixStream) -> Result<Self> {
        let stream = stream.try_clone().map_err(TransportError::RecvFailed)?;
        Ok(Closer(Some(stream)))
    }

    pub fn close(&self) {
        if let Some(stream) = &self.0 {
            // NotConnected just means the peer beat us to it.
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                if err.kind() != ErrorKind::NotConnected {
                    log::warn!("Failed to shut down IPC socket: {}", err);
                }
            }
        }
    }
}

pub fn read_frame<R: Read>(reader: &mut R, max_payload_len: usize) -> Result<Option<Frame>> {
    let Some(header) = read_exact_or_closed(reader, codec::HEADER_LEN)? else {
        return Ok(None);
    };
    let header = codec::decode_header(&header, max_payload_len)?;
    let Some(payload) = read_exact_or_closed(reader, header.payload_len as usize)? else {
        return Ok(None);
    };
    log::debug!("Received IPC frame ({}, {} bytes)", header.message_type, payload.len());
    Ok(Some(Frame { message_type: header.message_type, payload }))
}

/// Loop on `read` until `n` bytes arrived. A zero-length read means the peer closed the
/// connection (or it was shut down locally) and yields `None`.
pub fn read_exact_or_closed<R: Read>(reader: &mut R, n: usize) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(None),
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(recv_error(err)),
        }
    }
    Ok(Some(buf))
}

/// Read until `delimiter` or the end of the stream, whichever comes first. The delimiter and
/// anything after it are not returned.
pub fn read_until_delimiter<R: Read>(reader: &mut R, delimiter: u8, max_len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(data),
            Ok(read) => {
                if let Some(end) = chunk[..read].iter().position(|b| *b == delimiter) {
                    data.extend_from_slice(&chunk[..end]);
                    return Ok(data);
                }
                data.extend_from_slice(&chunk[..read]);
                if data.len() > max_len {
                    return Err(ProtocolError::PayloadTooLarge { len: data.len(), max: max_len }.into());
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(recv_error(err)),
        }
    }
}

pub(crate) fn recv_error(err: std::io::Error) -> IpcError {
    match err.kind() {
        // a blocking socket only reports these once its receive timeout expired
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout.into(),
        _ => TransportError::RecvFailed(err).into(),
    }
}

pub fn write_all<W: Write>(writer: &mut W, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(TransportError::SendFailed(ErrorKind::WriteZero.into()).into()),
            Ok(written) => bytes = &bytes[written..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(TransportError::Timeout.into())
            }
            Err(err) => return Err(TransportError::SendFailed(err).into()),
        }
    }
    writer.flush().map_err(TransportError::SendFailed)?;
    Ok(())
}
