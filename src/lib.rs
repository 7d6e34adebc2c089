// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wireline
//!
//! Persistent, acknowledgement-based message protocol over unreliable byte
//! streams, with an optional WebSocket framing/decompression sublayer.
//!
//! # Architecture
//!
//! The crate is layered, leaves first:
//! - **Socket adapters**: [`Socket`] abstracts a duplex byte stream driven by
//!   pushed inbound chunks; [`TcpSocket`] adapts a `std::net::TcpStream`,
//!   [`MockSocket`] is the in-memory test double.
//! - **WebSocket codec**: [`WebSocketCodec`] parses/produces WebSocket frames
//!   (fragmentation, masking, permessage-deflate) over any inner socket and
//!   is itself a [`Socket`], so it drops in transparently.
//! - **Base protocol**: [`Protocol`] splits the byte stream into
//!   length-prefixed opaque messages, preserving arrival order.
//! - **Persistent protocol**: [`PersistentProtocol`] adds sequence numbers,
//!   piggy-backed acknowledgements, reconnection with replay of
//!   unacknowledged messages, cooperative pause/resume flow control,
//!   keep-alives and a read-silence timeout signal.
//!
//! All layers are single-threaded and callback-driven: inbound bytes are
//! pushed in with `receive`, timers are driven by calling `tick` against an
//! injected [`Clock`], and outputs are delivered synchronously through
//! [`Emitter`] subscriptions.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wireline::{MockSocket, PersistentProtocol, ProtocolConfig, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! let mut proto = PersistentProtocol::new(
//!     MockSocket::new(),
//!     clock.clone(),
//!     ProtocolConfig::default(),
//! );
//!
//! let received = Rc::new(RefCell::new(Vec::new()));
//! let sink = received.clone();
//! let _sub = proto.on_message().subscribe(move |data: &bytes::Bytes| {
//!     sink.borrow_mut().push(data.clone());
//! });
//!
//! proto.send(bytes::Bytes::from_static(b"hello")).unwrap();
//! assert_eq!(proto.unacknowledged_count(), 1);
//! ```

pub mod clock;
pub mod error;
pub mod event;
pub mod message;
pub mod mock;
pub mod persistent;
pub mod protocol;
pub mod socket;
pub mod websocket;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{Emitter, Subscription};
pub use message::{MessageReader, MessageType, WireMessage, HEADER_SIZE};
pub use mock::MockSocket;
pub use persistent::{
    LoadEstimator, PersistentProtocol, ProtocolConfig, SocketTimeoutEvent, ACKNOWLEDGE_TIME,
    KEEP_ALIVE_SEND_TIME, TIMEOUT_TIME,
};
pub use protocol::Protocol;
pub use socket::{Socket, SocketCloseReason, SocketEvent, TcpSocket, END_OF_STREAM_GRACE};
pub use websocket::{WebSocketCodec, WebSocketConfig, MAX_WEBSOCKET_CHUNK};
