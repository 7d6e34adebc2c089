// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Protocol error types.

use thiserror::Error;

/// Result type for protocol and socket operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors surfaced by socket adapters, codecs and protocol layers.
///
/// Framing errors are fatal for the connection instance: the byte stream
/// cannot be resynchronized, the caller must tear down and reconnect.
/// Recoverable conditions (timeouts, transport churn) are delivered through
/// events instead and never appear here.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Socket is closed")]
    SocketClosed,

    #[error("Invalid WebSocket opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("Frame payload of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge { length: u64, limit: u64 },

    #[error("Continuation frame without a preceding data frame")]
    UnexpectedContinuation,

    #[error("Data frame arrived inside an unfinished fragment run")]
    UnexpectedDataFrame,

    #[error("Compressed frame received but permessage-deflate is not enabled")]
    CompressionNotNegotiated,

    #[error("Inflate failed: {0}")]
    Inflate(String),

    #[error("Deflate failed: {0}")]
    Deflate(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}
