// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Frame Codec
//!
//! Decodes an inbound byte stream into logical messages and encodes outbound
//! buffers into frames, over any inner [`Socket`]. Implements [`Socket`]
//! itself, so it is a drop-in replacement for the raw transport underneath
//! the protocol layers.
//!
//! Supported: fragmentation (control frames may interleave inside a fragment
//! run), masking in both directions, ping/pong (pings are answered
//! transparently and never surface as data), close frames, and
//! permessage-deflate with connection-scoped compression contexts
//! (RFC 7692; no-context-takeover is not assumed).

use bytes::{Buf, Bytes, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use log::{debug, warn};

use crate::error::{ProtocolError, ProtocolResult};
use crate::socket::{Socket, SocketCloseReason, SocketEvent};

/// Outbound messages are split into frames of at most this many payload
/// bytes, so one large write cannot monopolize the transport (a 1 MiB
/// payload becomes exactly 4 frames).
pub const MAX_WEBSOCKET_CHUNK: usize = 256 * 1024;

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// RFC 7692 restore bytes appended before inflating each message.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const ZLIB_BUFFER_STEP: usize = 16 * 1024;

/// Codec construction options.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Negotiated permessage-deflate: compress outbound messages and inflate
    /// inbound frames carrying RSV1.
    pub permessage_deflate: bool,
    /// Reject inbound frames whose payload exceeds this length.
    pub max_frame_payload: Option<u64>,
    /// Keep a copy of all inflated plaintext, retrievable with
    /// [`WebSocketCodec::take_recorded_inflate_bytes`]; used to hand the
    /// decompression state over on reconnection.
    pub record_inflate_bytes: bool,
    /// Mask outbound frames with a fresh random key each (client role).
    pub mask_outgoing: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            permessage_deflate: false,
            max_frame_payload: None,
            record_inflate_bytes: false,
            mask_outgoing: false,
        }
    }
}

struct RawFrame {
    fin: bool,
    opcode: u8,
    compressed: bool,
    payload: BytesMut,
}

struct FragmentRun {
    compressed: bool,
    data: BytesMut,
}

/// WebSocket framing layer over an inner socket.
pub struct WebSocketCodec<S: Socket> {
    inner: S,
    config: WebSocketConfig,
    acc: BytesMut,
    fragment: Option<FragmentRun>,
    inflater: Option<Decompress>,
    deflater: Option<Compress>,
    recorded_inflate: BytesMut,
    close_received: bool,
}

impl<S: Socket> WebSocketCodec<S> {
    pub fn new(inner: S, config: WebSocketConfig) -> Self {
        let (inflater, deflater) = if config.permessage_deflate {
            (
                Some(Decompress::new(false)),
                Some(Compress::new(Compression::default(), false)),
            )
        } else {
            (None, None)
        };
        WebSocketCodec {
            inner,
            config,
            acc: BytesMut::new(),
            fragment: None,
            inflater,
            deflater,
            recorded_inflate: BytesMut::new(),
            close_received: false,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Drains the recorded inflated plaintext (see
    /// [`WebSocketConfig::record_inflate_bytes`]).
    pub fn take_recorded_inflate_bytes(&mut self) -> Bytes {
        self.recorded_inflate.split().freeze()
    }

    /// Parses one complete frame off the accumulator, or returns `Ok(None)`
    /// if more bytes are needed. Malformed frames are fatal.
    fn try_parse_frame(&mut self) -> ProtocolResult<Option<RawFrame>> {
        if self.acc.len() < 2 {
            return Ok(None);
        }
        let b0 = self.acc[0];
        let b1 = self.acc[1];

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let opcode = b0 & 0x0F;
        let masked = b1 & 0x80 != 0;

        if rsv1 && !self.config.permessage_deflate {
            return Err(ProtocolError::CompressionNotNegotiated);
        }
        // RSV2/RSV3 belong to extensions we did not negotiate; tolerated.

        let mut offset = 2usize;
        let length: u64 = match b1 & 0x7F {
            126 => {
                if self.acc.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([self.acc[2], self.acc[3]]) as u64;
                offset += 2;
                len
            }
            127 => {
                if self.acc.len() < offset + 8 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.acc[2..10]);
                offset += 8;
                u64::from_be_bytes(raw)
            }
            short => short as u64,
        };

        if let Some(limit) = self.config.max_frame_payload {
            if length > limit {
                return Err(ProtocolError::FrameTooLarge { length, limit });
            }
        }

        let mask_key = if masked {
            if self.acc.len() < offset + 4 {
                return Ok(None);
            }
            let key = [
                self.acc[offset],
                self.acc[offset + 1],
                self.acc[offset + 2],
                self.acc[offset + 3],
            ];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let length = length as usize;
        if self.acc.len() < offset + length {
            return Ok(None);
        }

        self.acc.advance(offset);
        let mut payload = self.acc.split_to(length);
        if let Some(key) = mask_key {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }

        Ok(Some(RawFrame {
            fin,
            opcode,
            compressed: rsv1,
            payload,
        }))
    }

    fn process_frame(
        &mut self,
        frame: RawFrame,
        out: &mut Vec<SocketEvent>,
    ) -> ProtocolResult<()> {
        match frame.opcode {
            OP_PING => {
                // Answered directly on the wire; never surfaced as data.
                let pong = self.encode_frame(OP_PONG, true, false, &frame.payload);
                self.inner.write(&pong)?;
            }
            OP_PONG => {}
            OP_CLOSE => {
                debug!("websocket close frame received");
                self.close_received = true;
                out.push(SocketEvent::Closed(SocketCloseReason::PeerHangUp));
            }
            OP_TEXT | OP_BINARY => {
                if self.fragment.is_some() {
                    return Err(ProtocolError::UnexpectedDataFrame);
                }
                if frame.fin {
                    let message = self.finish_message(frame.payload, frame.compressed)?;
                    out.push(SocketEvent::Data(message));
                } else {
                    self.fragment = Some(FragmentRun {
                        compressed: frame.compressed,
                        data: frame.payload,
                    });
                }
            }
            OP_CONTINUATION => {
                let mut run = self
                    .fragment
                    .take()
                    .ok_or(ProtocolError::UnexpectedContinuation)?;
                run.data.extend_from_slice(&frame.payload);
                if frame.fin {
                    let message = self.finish_message(run.data, run.compressed)?;
                    out.push(SocketEvent::Data(message));
                } else {
                    self.fragment = Some(run);
                }
            }
            other => {
                warn!("invalid websocket opcode {:#x}", other);
                return Err(ProtocolError::InvalidOpcode(other));
            }
        }
        Ok(())
    }

    fn finish_message(&mut self, assembled: BytesMut, compressed: bool) -> ProtocolResult<Bytes> {
        if !compressed {
            return Ok(assembled.freeze());
        }
        let inflater = self
            .inflater
            .as_mut()
            .ok_or(ProtocolError::CompressionNotNegotiated)?;

        let mut plain = Vec::with_capacity(assembled.len().saturating_mul(2).max(ZLIB_BUFFER_STEP));
        inflate_into(inflater, &assembled, &mut plain)?;
        inflate_into(inflater, &DEFLATE_TAIL, &mut plain)?;

        if self.config.record_inflate_bytes {
            self.recorded_inflate.extend_from_slice(&plain);
        }
        Ok(Bytes::from(plain))
    }

    fn encode_frame(&self, opcode: u8, fin: bool, rsv1: bool, payload: &[u8]) -> Bytes {
        let masked = self.config.mask_outgoing;
        let mut buf = BytesMut::with_capacity(14 + payload.len());

        let mut b0 = opcode;
        if fin {
            b0 |= 0x80;
        }
        if rsv1 {
            b0 |= 0x40;
        }
        buf.extend_from_slice(&[b0]);

        let mask_bit: u8 = if masked { 0x80 } else { 0x00 };
        let len = payload.len();
        if len < 126 {
            buf.extend_from_slice(&[mask_bit | len as u8]);
        } else if len <= u16::MAX as usize {
            buf.extend_from_slice(&[mask_bit | 126]);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.extend_from_slice(&[mask_bit | 127]);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if masked {
            let key: [u8; 4] = rand::random();
            buf.extend_from_slice(&key);
            buf.reserve(len);
            for (i, byte) in payload.iter().enumerate() {
                buf.extend_from_slice(&[*byte ^ key[i % 4]]);
            }
        } else {
            buf.extend_from_slice(payload);
        }
        buf.freeze()
    }

    fn deflate_message(&mut self, data: &[u8]) -> ProtocolResult<Vec<u8>> {
        let deflater = self
            .deflater
            .as_mut()
            .ok_or(ProtocolError::CompressionNotNegotiated)?;

        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let mut input = data;
        loop {
            if out.capacity() == out.len() {
                out.reserve(ZLIB_BUFFER_STEP);
            }
            let before = deflater.total_in();
            deflater
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| ProtocolError::Deflate(e.to_string()))?;
            let consumed = (deflater.total_in() - before) as usize;
            input = &input[consumed..];
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
        }

        // A sync flush terminates with the empty stored block; RFC 7692
        // strips it so the receiver re-appends it before inflating.
        if out.ends_with(&DEFLATE_TAIL) {
            out.truncate(out.len() - DEFLATE_TAIL.len());
        }
        Ok(out)
    }
}

fn inflate_into(
    inflater: &mut Decompress,
    mut input: &[u8],
    out: &mut Vec<u8>,
) -> ProtocolResult<()> {
    loop {
        if out.capacity() == out.len() {
            out.reserve(ZLIB_BUFFER_STEP);
        }
        let before_in = inflater.total_in();
        let before_out = out.len();
        inflater
            .decompress_vec(input, out, FlushDecompress::Sync)
            .map_err(|e| ProtocolError::Inflate(e.to_string()))?;
        let consumed = (inflater.total_in() - before_in) as usize;
        input = &input[consumed..];

        if input.is_empty() && out.len() < out.capacity() {
            return Ok(());
        }
        if consumed == 0 && out.len() == before_out && out.len() < out.capacity() {
            return Err(ProtocolError::Inflate("no progress in deflate stream".into()));
        }
    }
}

impl<S: Socket> Socket for WebSocketCodec<S> {
    /// Encodes one logical message: optionally deflates it, then splits it
    /// into binary/continuation frames of at most [`MAX_WEBSOCKET_CHUNK`]
    /// payload bytes each.
    fn write(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let (payload, compressed) = if self.config.permessage_deflate {
            (self.deflate_message(data)?, true)
        } else {
            (data.to_vec(), false)
        };

        let total = payload.len();
        let mut offset = 0usize;
        let mut first = true;
        loop {
            let end = (offset + MAX_WEBSOCKET_CHUNK).min(total);
            let fin = end == total;
            let opcode = if first { OP_BINARY } else { OP_CONTINUATION };
            let frame = self.encode_frame(opcode, fin, compressed && first, &payload[offset..end]);
            self.inner.write(&frame)?;
            if fin {
                return Ok(());
            }
            first = false;
            offset = end;
        }
    }

    fn receive(&mut self, data: &[u8]) -> ProtocolResult<Vec<SocketEvent>> {
        let mut out = Vec::new();
        for event in self.inner.receive(data)? {
            match event {
                SocketEvent::Data(chunk) => {
                    if self.close_received {
                        continue;
                    }
                    self.acc.extend_from_slice(&chunk);
                    while let Some(frame) = self.try_parse_frame()? {
                        self.process_frame(frame, &mut out)?;
                        if self.close_received {
                            break;
                        }
                    }
                }
                SocketEvent::Closed(reason) => out.push(SocketEvent::Closed(reason)),
            }
        }
        Ok(out)
    }

    fn tick(&mut self) {
        self.inner.tick();
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}
