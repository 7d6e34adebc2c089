// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Base Message Protocol
//!
//! Length-prefixed message framing over a [`Socket`], with no knowledge of
//! message semantics: opaque payload in, opaque payload out, arrival order
//! preserved. Delivery across a transport replacement is the job of
//! [`crate::persistent::PersistentProtocol`].

use bytes::Bytes;

use crate::error::ProtocolResult;
use crate::event::{Emitter, Subscription};
use crate::message::{MessageReader, MessageType, WireMessage};
use crate::socket::{Socket, SocketCloseReason, SocketEvent};

/// Minimal framing protocol: discrete opaque messages over a byte stream.
pub struct Protocol<S: Socket> {
    socket: S,
    reader: MessageReader,
    on_message: Emitter<Bytes>,
    on_close: Emitter<SocketCloseReason>,
    disposed: bool,
}

impl<S: Socket> Protocol<S> {
    pub fn new(socket: S) -> Self {
        Protocol {
            socket,
            reader: MessageReader::new(),
            on_message: Emitter::new(),
            on_close: Emitter::new(),
            disposed: false,
        }
    }

    /// Frames `data` as one message and writes it to the socket.
    pub fn send(&mut self, data: Bytes) -> ProtocolResult<()> {
        assert!(!self.disposed, "send() on a disposed protocol");
        let msg = WireMessage::new(MessageType::Regular, 0, 0, data);
        self.socket.write(&msg.encode())
    }

    /// Pushes raw inbound bytes through the socket layer and delivers every
    /// completed message via [`Protocol::on_message`], in arrival order.
    ///
    /// A framing error is fatal for this connection instance.
    pub fn receive(&mut self, chunk: &[u8]) -> ProtocolResult<()> {
        if self.disposed {
            return Ok(());
        }
        for event in self.socket.receive(chunk)? {
            match event {
                SocketEvent::Data(data) => {
                    for msg in self.reader.feed(&data)? {
                        if msg.msg_type == MessageType::Regular {
                            self.on_message.fire(&msg.data);
                        }
                    }
                }
                SocketEvent::Closed(reason) => self.on_close.fire(&reason),
            }
        }
        Ok(())
    }

    /// Subscribes to delivered messages.
    pub fn on_message(&self) -> &Emitter<Bytes> {
        &self.on_message
    }

    /// Subscribes to end-of-stream notifications from the socket layer.
    pub fn on_close(&self) -> &Emitter<SocketCloseReason> {
        &self.on_close
    }

    /// Convenience wrapper around `on_message().subscribe(...)`.
    pub fn subscribe_messages(&self, handler: impl FnMut(&Bytes) + 'static) -> Subscription {
        self.on_message.subscribe(handler)
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Releases the socket and stops emitting events. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.socket.dispose();
    }
}
