// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Socket Adapter
//!
//! Abstraction over a duplex byte stream driven by pushed inbound chunks.
//! Codec layers (e.g. [`crate::websocket::WebSocketCodec`]) implement
//! [`Socket`] around an inner socket, so they are drop-in replacements for a
//! raw transport.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ProtocolError, ProtocolResult};

/// Grace period before a half-closed socket is force-closed.
pub const END_OF_STREAM_GRACE: Duration = Duration::from_secs(30);

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Why a socket stopped delivering data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCloseReason {
    /// The peer closed its half of the stream.
    PeerHangUp,
    /// A transport-level error terminated the stream.
    Error,
    /// The local side called `dispose()`.
    Disposed,
}

/// Output of pushing inbound bytes through a socket layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A decoded chunk of inbound bytes, in arrival order.
    Data(Bytes),
    /// End of stream; no further data events will follow.
    Closed(SocketCloseReason),
}

/// Duplex byte-stream endpoint.
///
/// `write` queues outbound bytes on the underlying transport; `receive`
/// pushes raw inbound transport bytes through this layer and yields the
/// decoded chunks. For a raw adapter `receive` is a passthrough; codec
/// layers decode frames here. `dispose` releases resources and guarantees
/// that no further events are produced; it is idempotent.
pub trait Socket {
    fn write(&mut self, data: &[u8]) -> ProtocolResult<()>;

    fn receive(&mut self, data: &[u8]) -> ProtocolResult<Vec<SocketEvent>>;

    /// Drives time-based work (half-close grace timers and the like).
    fn tick(&mut self) {}

    fn dispose(&mut self);
}

/// Socket adapter over a non-blocking [`TcpStream`].
///
/// The owner pumps inbound data with [`TcpSocket::read_chunk`] and feeds it
/// to the protocol layer. A peer half-close (`read` returning 0) starts a
/// grace timer; if the owner has not disposed the socket within
/// [`END_OF_STREAM_GRACE`], `tick()` force-closes it so half-open sockets
/// cannot leak.
pub struct TcpSocket<C: Clock = SystemClock> {
    stream: Option<TcpStream>,
    clock: C,
    end_grace_deadline: Option<Duration>,
    end_seen: bool,
}

impl TcpSocket<SystemClock> {
    pub fn new(stream: TcpStream) -> ProtocolResult<Self> {
        Self::with_clock(stream, SystemClock::new())
    }
}

impl<C: Clock> TcpSocket<C> {
    pub fn with_clock(stream: TcpStream, clock: C) -> ProtocolResult<Self> {
        stream.set_nonblocking(true)?;
        Ok(TcpSocket {
            stream: Some(stream),
            clock,
            end_grace_deadline: None,
            end_seen: false,
        })
    }

    /// Reads whatever is currently available from the stream.
    ///
    /// Returns `Ok(None)` when no data is pending. A peer half-close is
    /// reported once as `SocketEvent::Closed(PeerHangUp)` and arms the
    /// force-close grace timer.
    pub fn read_chunk(&mut self) -> ProtocolResult<Option<SocketEvent>> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };
        if self.end_seen {
            return Ok(None);
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        match stream.read(&mut buf) {
            Ok(0) => {
                self.end_seen = true;
                self.end_grace_deadline = Some(self.clock.now() + END_OF_STREAM_GRACE);
                Ok(Some(SocketEvent::Closed(SocketCloseReason::PeerHangUp)))
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(SocketEvent::Data(Bytes::from(buf))))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                self.force_close();
                Err(ProtocolError::Io(e))
            }
        }
    }

    fn force_close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.end_grace_deadline = None;
    }
}

impl<C: Clock> Socket for TcpSocket<C> {
    fn write(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::SocketClosed)?;
        // Non-blocking writes may stall on a full kernel buffer; retry until
        // the chunk is queued so callers keep write ordering.
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // Kernel send buffer is full; wait for it to drain.
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("tcp socket write failed: {}", e);
                    self.force_close();
                    return Err(ProtocolError::Io(e));
                }
            }
        }
        Ok(())
    }

    fn receive(&mut self, data: &[u8]) -> ProtocolResult<Vec<SocketEvent>> {
        if self.stream.is_none() {
            return Err(ProtocolError::SocketClosed);
        }
        Ok(vec![SocketEvent::Data(Bytes::copy_from_slice(data))])
    }

    fn tick(&mut self) {
        if let Some(deadline) = self.end_grace_deadline {
            if self.clock.now() >= deadline {
                debug!("force-closing half-open socket after end-of-stream grace period");
                self.force_close();
            }
        }
    }

    fn dispose(&mut self) {
        self.force_close();
        self.end_seen = true;
    }
}
