// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Message Types
//!
//! The on-wire unit of both protocol layers: a 13-byte big-endian header
//! (type, id, ack, payload length) followed by the opaque payload.
//! [`MessageReader`] reassembles messages incrementally from arbitrary chunk
//! boundaries.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Header size: type (1) + id (4) + ack (4) + length (4).
pub const HEADER_SIZE: usize = 13;

/// Wire-level message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Application payload; carries a sequence id and is acknowledged.
    Regular = 1,
    /// Out-of-band payload; id is always 0, never queued or acknowledged.
    Control = 2,
    /// Pure acknowledgement, no payload.
    Ack = 3,
    /// Idle-link probe.
    KeepAlive = 4,
    /// Reply to a keep-alive probe.
    KeepAliveVote = 5,
    /// Orderly connection termination.
    Disconnect = 6,
    /// Request to replay the unacknowledged queue after a detected gap.
    ReplayRequest = 7,
    /// Ask the peer to stop writing (cooperative backpressure).
    Pause = 8,
    /// Clear a previous Pause.
    Resume = 9,
}

impl MessageType {
    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        match value {
            1 => Ok(MessageType::Regular),
            2 => Ok(MessageType::Control),
            3 => Ok(MessageType::Ack),
            4 => Ok(MessageType::KeepAlive),
            5 => Ok(MessageType::KeepAliveVote),
            6 => Ok(MessageType::Disconnect),
            7 => Ok(MessageType::ReplayRequest),
            8 => Ok(MessageType::Pause),
            9 => Ok(MessageType::Resume),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One protocol message as it appears on the wire.
///
/// `id` is unique and strictly increasing per sender for Regular messages
/// and is not reset across reconnections; 0 is reserved for types that are
/// not acknowledged. `ack` piggy-backs the highest peer id the sender has
/// delivered so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub msg_type: MessageType,
    pub id: u32,
    pub ack: u32,
    pub data: Bytes,
}

impl WireMessage {
    pub fn new(msg_type: MessageType, id: u32, ack: u32, data: Bytes) -> Self {
        WireMessage {
            msg_type,
            id,
            ack,
            data,
        }
    }

    /// Payload-free message (Ack, KeepAlive, Pause, ...).
    pub fn signal(msg_type: MessageType, ack: u32) -> Self {
        WireMessage::new(msg_type, 0, ack, Bytes::new())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_u8(self.msg_type as u8);
        buf.put_u32(self.id);
        buf.put_u32(self.ack);
        buf.put_u32(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

struct PendingHeader {
    msg_type: MessageType,
    id: u32,
    ack: u32,
    length: usize,
}

/// Incremental message reassembly over a byte accumulator.
///
/// Chunk boundaries carry no meaning: a message may arrive split across many
/// chunks or share a chunk with its neighbors. A malformed header is fatal;
/// no resynchronization is attempted.
#[derive(Default)]
pub struct MessageReader {
    acc: BytesMut,
    pending: Option<PendingHeader>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every message completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<WireMessage>> {
        self.acc.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            if self.pending.is_none() {
                if self.acc.len() < HEADER_SIZE {
                    break;
                }
                let header = self.acc.split_to(HEADER_SIZE);
                let msg_type = MessageType::from_u8(header[0])?;
                let id = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                let ack = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
                let length =
                    u32::from_be_bytes([header[9], header[10], header[11], header[12]]) as usize;
                self.pending = Some(PendingHeader {
                    msg_type,
                    id,
                    ack,
                    length,
                });
            }

            match &self.pending {
                Some(header) if self.acc.len() >= header.length => {
                    let header = self.pending.take().unwrap();
                    let data = self.acc.split_to(header.length).freeze();
                    out.push(WireMessage::new(header.msg_type, header.id, header.ack, data));
                }
                _ => break,
            }
        }

        Ok(out)
    }

    /// Bytes buffered but not yet forming a complete message.
    pub fn buffered_len(&self) -> usize {
        self.acc.len() + if self.pending.is_some() { HEADER_SIZE } else { 0 }
    }
}

// INLINE_TEST_REQUIRED: Exercises the private pending-header state across
// pathological chunk boundaries.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let msg = WireMessage::new(MessageType::Regular, 7, 3, Bytes::from_static(b"ab"));
        let encoded = msg.encode();
        assert_eq!(
            &encoded[..],
            &[1, 0, 0, 0, 7, 0, 0, 0, 3, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_feed_byte_at_a_time() {
        let msg = WireMessage::new(MessageType::Control, 0, 9, Bytes::from_static(b"xyz"));
        let encoded = msg.encode();

        let mut reader = MessageReader::new();
        let mut got = Vec::new();
        for byte in encoded.iter() {
            got.extend(reader.feed(&[*byte]).unwrap());
        }
        assert_eq!(got, vec![msg]);
        assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn test_feed_two_messages_in_one_chunk() {
        let a = WireMessage::signal(MessageType::Ack, 4);
        let b = WireMessage::new(MessageType::Regular, 5, 4, Bytes::from_static(b"hi"));
        let mut wire = Vec::new();
        wire.extend_from_slice(&a.encode());
        wire.extend_from_slice(&b.encode());

        let mut reader = MessageReader::new();
        let got = reader.feed(&wire).unwrap();
        assert_eq!(got, vec![a, b]);
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let mut reader = MessageReader::new();
        let mut wire = vec![0xEEu8];
        wire.extend_from_slice(&[0; 12]);
        assert!(matches!(
            reader.feed(&wire),
            Err(ProtocolError::UnknownMessageType(0xEE))
        ));
    }

    #[test]
    fn test_empty_payload_message() {
        let msg = WireMessage::signal(MessageType::KeepAlive, 0);
        let mut reader = MessageReader::new();
        let got = reader.feed(&msg.encode()).unwrap();
        assert_eq!(got, vec![msg]);
    }
}
