//! Mock socket for testing.
//!
//! Records every outbound write as a separate chunk (so tests can assert on
//! frame boundaries and delivery counts) and passes inbound bytes through
//! untouched, like a raw transport would.

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};
use crate::socket::{Socket, SocketCloseReason, SocketEvent};

/// In-memory [`Socket`] double.
#[derive(Default)]
pub struct MockSocket {
    written: Vec<Bytes>,
    disposed: bool,
    write_error: Option<ProtocolError>,
    pending_close: Option<SocketCloseReason>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write fail with `error`.
    pub fn inject_write_error(&mut self, error: ProtocolError) {
        self.write_error = Some(error);
    }

    /// Makes the next `receive` report end-of-stream after its data.
    pub fn inject_close(&mut self, reason: SocketCloseReason) {
        self.pending_close = Some(reason);
    }

    /// All writes so far, one entry per `write` call.
    pub fn written_chunks(&self) -> &[Bytes] {
        &self.written
    }

    /// Drains recorded writes and returns them concatenated, as they would
    /// appear on the wire.
    pub fn take_written(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in self.written.drain(..) {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Drains recorded writes preserving per-write boundaries.
    pub fn take_written_chunks(&mut self) -> Vec<Bytes> {
        self.written.drain(..).collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Socket for MockSocket {
    fn write(&mut self, data: &[u8]) -> ProtocolResult<()> {
        if self.disposed {
            return Err(ProtocolError::SocketClosed);
        }
        if let Some(error) = self.write_error.take() {
            return Err(error);
        }
        self.written.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn receive(&mut self, data: &[u8]) -> ProtocolResult<Vec<SocketEvent>> {
        if self.disposed {
            return Err(ProtocolError::SocketClosed);
        }
        let mut events = Vec::new();
        if !data.is_empty() {
            events.push(SocketEvent::Data(Bytes::copy_from_slice(data)));
        }
        if let Some(reason) = self.pending_close.take() {
            events.push(SocketEvent::Closed(reason));
        }
        Ok(events)
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}
