// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Protocol
//!
//! The reliability layer: sequence numbers with piggy-backed
//! acknowledgements, an unacknowledged-send queue replayed across transport
//! replacement, cooperative pause/resume flow control, keep-alives and a
//! read-silence timeout signal.
//!
//! Sequence ids are never reset across reconnections, so a peer can drop
//! replayed duplicates (`id <= last_received_id`) and application payloads
//! are delivered exactly once.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};

use crate::clock::Clock;
use crate::error::ProtocolResult;
use crate::event::Emitter;
use crate::message::{MessageReader, MessageType, WireMessage};
use crate::socket::{Socket, SocketCloseReason, SocketEvent};

/// Delay before a received message is acknowledged with a dedicated Ack
/// message, giving organic reply traffic a chance to piggy-back it.
pub const ACKNOWLEDGE_TIME: Duration = Duration::from_millis(2000);

/// Read-silence window after which [`PersistentProtocol::on_socket_timeout`]
/// fires, provided unacknowledged flushed messages exist.
pub const TIMEOUT_TIME: Duration = Duration::from_secs(20);

/// Write-inactivity interval between keep-alive probes.
pub const KEEP_ALIVE_SEND_TIME: Duration = Duration::from_secs(5);

/// Collaborator that reports process load; keep-alive traffic is suppressed
/// while load is high. Consumed only, never implemented here.
pub trait LoadEstimator {
    fn has_high_load(&self) -> bool;
}

/// Timer configuration, injected so tests can scale timers down.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub ack_delay: Duration,
    pub timeout_window: Duration,
    pub keep_alive_interval: Duration,
    /// Periodically send KeepAlive probes during write-idle periods.
    pub send_keep_alive: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            ack_delay: ACKNOWLEDGE_TIME,
            timeout_window: TIMEOUT_TIME,
            keep_alive_interval: KEEP_ALIVE_SEND_TIME,
            send_keep_alive: false,
        }
    }
}

/// Diagnostics attached to a socket-timeout notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTimeoutEvent {
    pub unacknowledged_count: usize,
    pub since_oldest_unacknowledged: Duration,
    pub since_last_received: Duration,
}

struct QueueEntry {
    msg: WireMessage,
    /// When the message was last flushed to the socket; `None` until then.
    /// Unflushed messages are excluded from timeout accounting.
    written_at: Option<Duration>,
}

/// Reliable, reconnection-surviving message protocol over a [`Socket`].
///
/// Single-threaded and callback-driven: push inbound bytes with
/// [`receive`](Self::receive), drive timers with [`tick`](Self::tick),
/// subscribe to the emitters for outputs. The socket is exclusively owned
/// and replaced wholesale on reconnection.
pub struct PersistentProtocol<S: Socket, C: Clock> {
    socket: S,
    clock: C,
    config: ProtocolConfig,
    load_estimator: Option<Box<dyn LoadEstimator>>,
    reader: MessageReader,

    outgoing: VecDeque<QueueEntry>,
    /// Signal messages (acks aside) composed while writing was suppressed.
    pending_signals: VecDeque<WireMessage>,
    last_sent_id: u32,
    last_received_id: u32,

    reconnecting: bool,
    /// Peer asked us to stop writing (Pause received).
    send_paused: bool,
    /// We asked the peer to stop writing (sendPause issued).
    receive_paused: bool,
    /// Local backpressure: hold all writes, keep accepting sends.
    writing_paused: bool,
    replay_requested: bool,
    /// A peer ReplayRequest arrived while writes were suppressed.
    replay_deferred: bool,
    disposed: bool,
    dispose_fired: bool,

    last_read_at: Duration,
    last_write_at: Duration,
    ack_deadline: Option<Duration>,
    last_timeout_fired: Option<Duration>,

    on_message: Emitter<Bytes>,
    on_control: Emitter<Bytes>,
    on_did_dispose: Emitter<()>,
    on_socket_timeout: Emitter<SocketTimeoutEvent>,
    on_socket_close: Emitter<SocketCloseReason>,
}

impl<S: Socket, C: Clock> PersistentProtocol<S, C> {
    pub fn new(socket: S, clock: C, config: ProtocolConfig) -> Self {
        let now = clock.now();
        PersistentProtocol {
            socket,
            clock,
            config,
            load_estimator: None,
            reader: MessageReader::new(),
            outgoing: VecDeque::new(),
            pending_signals: VecDeque::new(),
            last_sent_id: 0,
            last_received_id: 0,
            reconnecting: false,
            send_paused: false,
            receive_paused: false,
            writing_paused: false,
            replay_requested: false,
            replay_deferred: false,
            disposed: false,
            dispose_fired: false,
            last_read_at: now,
            last_write_at: now,
            ack_deadline: None,
            last_timeout_fired: None,
            on_message: Emitter::new(),
            on_control: Emitter::new(),
            on_did_dispose: Emitter::new(),
            on_socket_timeout: Emitter::new(),
            on_socket_close: Emitter::new(),
        }
    }

    pub fn set_load_estimator(&mut self, estimator: Box<dyn LoadEstimator>) {
        self.load_estimator = Some(estimator);
    }

    // ---- events ----

    /// Application payloads, exactly once, in sequence order.
    pub fn on_message(&self) -> &Emitter<Bytes> {
        &self.on_message
    }

    /// Out-of-band control payloads (unsequenced, unacknowledged).
    pub fn on_control(&self) -> &Emitter<Bytes> {
        &self.on_control
    }

    /// Fired once, on local dispose or on receiving Disconnect.
    pub fn on_did_dispose(&self) -> &Emitter<()> {
        &self.on_did_dispose
    }

    /// Advisory: the peer has been silent too long while messages are
    /// outstanding. The connection and queue stay intact; the caller decides
    /// whether to force a reconnection.
    pub fn on_socket_timeout(&self) -> &Emitter<SocketTimeoutEvent> {
        &self.on_socket_timeout
    }

    /// End-of-stream observed on the current socket. Not a dispose: the
    /// caller is expected to follow up with a reconnection or `dispose()`.
    pub fn on_socket_close(&self) -> &Emitter<SocketCloseReason> {
        &self.on_socket_close
    }

    // ---- state accessors ----

    /// Number of sent messages not yet acknowledged by the peer.
    pub fn unacknowledged_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// True while the peer's Pause request is in effect.
    pub fn is_send_paused(&self) -> bool {
        self.send_paused
    }

    /// True while our own Pause request to the peer is in effect.
    pub fn is_receive_paused(&self) -> bool {
        self.receive_paused
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    // ---- sending ----

    /// Queues `data` as the next Regular message and writes it out unless
    /// writing is currently suppressed (reconnecting or paused); a queued
    /// but never-flushed message cannot trigger the socket timeout.
    pub fn send(&mut self, data: Bytes) -> ProtocolResult<()> {
        assert!(!self.disposed, "send() on a disposed protocol");
        self.last_sent_id += 1;
        let msg = WireMessage::new(
            MessageType::Regular,
            self.last_sent_id,
            self.last_received_id,
            data,
        );
        self.outgoing.push_back(QueueEntry {
            msg,
            written_at: None,
        });
        if self.can_write() {
            let index = self.outgoing.len() - 1;
            self.flush_entry(index)?;
        }
        Ok(())
    }

    /// Sends an out-of-band Control message: `id = 0`, never queued, never
    /// acknowledged, always delivered by the peer.
    pub fn send_control(&mut self, data: Bytes) -> ProtocolResult<()> {
        assert!(!self.disposed, "send_control() on a disposed protocol");
        let msg = WireMessage::new(MessageType::Control, 0, self.last_received_id, data);
        self.write_or_hold(msg)
    }

    /// Notifies the peer of an orderly shutdown. Written even while paused;
    /// the caller disposes afterwards.
    pub fn send_disconnect(&mut self) -> ProtocolResult<()> {
        assert!(!self.disposed, "send_disconnect() on a disposed protocol");
        let msg = WireMessage::signal(MessageType::Disconnect, self.last_received_id);
        self.write_message(&msg)
    }

    /// Asks the peer to stop sending non-control traffic.
    pub fn send_pause(&mut self) -> ProtocolResult<()> {
        self.receive_paused = true;
        let msg = WireMessage::signal(MessageType::Pause, self.last_received_id);
        self.write_or_hold(msg)
    }

    /// Clears a previously requested pause.
    pub fn send_resume(&mut self) -> ProtocolResult<()> {
        self.receive_paused = false;
        let msg = WireMessage::signal(MessageType::Resume, self.last_received_id);
        self.write_or_hold(msg)
    }

    /// Stops writing outgoing bytes while still accepting and queueing
    /// sends. Even pure Acks are withheld until
    /// [`resume_socket_writing`](Self::resume_socket_writing).
    pub fn pause_socket_writing(&mut self) {
        self.writing_paused = true;
    }

    pub fn resume_socket_writing(&mut self) -> ProtocolResult<()> {
        self.writing_paused = false;
        self.flush_held()
    }

    // ---- reconnection ----

    /// Installs `new_socket` as the active transport, disposing the old one
    /// first so the two can never deliver interleaved. Unacknowledged
    /// messages are kept but not retransmitted until
    /// [`end_accept_reconnection`](Self::end_accept_reconnection).
    ///
    /// `initial_chunk` carries bytes already read from the new transport
    /// during the reconnection handshake.
    pub fn begin_accept_reconnection(
        &mut self,
        new_socket: S,
        initial_chunk: Option<&[u8]>,
    ) -> ProtocolResult<()> {
        assert!(!self.disposed, "reconnection on a disposed protocol");
        debug!(
            "accepting reconnection with {} unacknowledged message(s) queued",
            self.outgoing.len()
        );
        self.reconnecting = true;
        // Pause state and held signals belonged to the old epoch.
        self.send_paused = false;
        self.pending_signals.clear();
        self.replay_requested = false;
        self.replay_deferred = false;

        let mut old = std::mem::replace(&mut self.socket, new_socket);
        old.dispose();
        self.reader = MessageReader::new();

        let now = self.clock.now();
        self.last_read_at = now;
        self.last_timeout_fired = None;

        if let Some(chunk) = initial_chunk {
            self.receive(chunk)?;
        }
        Ok(())
    }

    /// Replays the entire unacknowledged queue in original order (original
    /// ids, so the peer drops what it already delivered) and sends a pure
    /// Ack immediately so the peer's own queue is pruned without waiting for
    /// its ack timer. A still-wanted pause of the peer is re-issued on the
    /// new transport, since the peer's own epoch reset cleared it.
    pub fn end_accept_reconnection(&mut self) -> ProtocolResult<()> {
        assert!(!self.disposed, "reconnection on a disposed protocol");
        self.reconnecting = false;
        debug!(
            "reconnection complete, replaying {} unacknowledged message(s)",
            self.outgoing.len()
        );
        self.replay_outgoing()?;
        let ack = WireMessage::signal(MessageType::Ack, self.last_received_id);
        self.write_message(&ack)?;
        if self.receive_paused {
            let pause = WireMessage::signal(MessageType::Pause, self.last_received_id);
            self.write_message(&pause)?;
        }
        Ok(())
    }

    // ---- inbound ----

    /// Pushes raw inbound transport bytes through the socket layer, updates
    /// acknowledgement bookkeeping and dispatches events. Framing errors are
    /// fatal for this connection instance.
    pub fn receive(&mut self, chunk: &[u8]) -> ProtocolResult<()> {
        if self.disposed {
            return Ok(());
        }
        for event in self.socket.receive(chunk)? {
            match event {
                SocketEvent::Data(data) => {
                    for msg in self.reader.feed(&data)? {
                        self.handle_message(msg)?;
                    }
                }
                SocketEvent::Closed(reason) => {
                    debug!("socket closed mid-session: {:?}", reason);
                    self.on_socket_close.fire(&reason);
                }
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, msg: WireMessage) -> ProtocolResult<()> {
        let now = self.clock.now();
        self.last_read_at = now;

        // Their ack cursor: everything up to msg.ack is confirmed delivered.
        while let Some(front) = self.outgoing.front() {
            if front.msg.id <= msg.ack {
                self.outgoing.pop_front();
            } else {
                break;
            }
        }

        match msg.msg_type {
            MessageType::Regular => {
                if msg.id == self.last_received_id + 1 {
                    self.last_received_id = msg.id;
                    self.replay_requested = false;
                    self.schedule_ack(now);
                    self.on_message.fire(&msg.data);
                } else if msg.id > self.last_received_id {
                    // Gap: messages were lost across a transport swap. Hold
                    // delivery and ask for a replay, once per gap.
                    if !self.replay_requested {
                        warn!(
                            "sequence gap (expected {}, got {}), requesting replay",
                            self.last_received_id + 1,
                            msg.id
                        );
                        self.replay_requested = true;
                        let req =
                            WireMessage::signal(MessageType::ReplayRequest, self.last_received_id);
                        self.write_or_hold(req)?;
                    }
                } else {
                    // Duplicate from a replay. Dropping it keeps delivery
                    // idempotent, but the peer is missing our ack, so make
                    // sure one goes out.
                    self.schedule_ack(now);
                }
            }
            MessageType::Control => {
                self.on_control.fire(&msg.data);
            }
            MessageType::Ack => {}
            MessageType::KeepAlive => {
                if !self.has_high_load() {
                    let vote =
                        WireMessage::signal(MessageType::KeepAliveVote, self.last_received_id);
                    self.write_or_hold(vote)?;
                }
            }
            MessageType::KeepAliveVote => {}
            MessageType::Pause => {
                self.send_paused = true;
            }
            MessageType::Resume => {
                self.send_paused = false;
                self.flush_held()?;
            }
            MessageType::Disconnect => {
                debug!("peer sent disconnect");
                self.fire_dispose_once();
            }
            MessageType::ReplayRequest => {
                debug!("peer requested replay");
                self.replay_outgoing()?;
            }
        }
        Ok(())
    }

    // ---- timers ----

    /// Drives all protocol timers against the injected clock: delayed pure
    /// Acks, keep-alive probes and the read-silence timeout check. Call
    /// regularly (e.g. from the host's event loop).
    pub fn tick(&mut self) -> ProtocolResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.socket.tick();
        let now = self.clock.now();

        if let Some(deadline) = self.ack_deadline {
            if now >= deadline && self.can_write() {
                let ack = WireMessage::signal(MessageType::Ack, self.last_received_id);
                self.write_message(&ack)?;
            }
        }

        if self.config.send_keep_alive
            && self.can_write()
            && now.saturating_sub(self.last_write_at) >= self.config.keep_alive_interval
        {
            if self.has_high_load() {
                // Back off a full interval without probing.
                self.last_write_at = now;
            } else {
                let probe = WireMessage::signal(MessageType::KeepAlive, self.last_received_id);
                self.write_message(&probe)?;
            }
        }

        self.check_timeout(now);
        Ok(())
    }

    fn check_timeout(&mut self, now: Duration) {
        let oldest_written = self.outgoing.iter().filter_map(|e| e.written_at).min();
        let oldest = match oldest_written {
            Some(oldest) => oldest,
            None => return,
        };
        // The oldest flushed message must itself have spanned the window;
        // read silence predating the flush does not count against it.
        if now.saturating_sub(oldest) < self.config.timeout_window {
            return;
        }
        if now.saturating_sub(self.last_read_at) < self.config.timeout_window {
            return;
        }
        // Rate limited: at most one notification per window, regardless of
        // how many unacknowledged sends accumulate meanwhile.
        if let Some(fired) = self.last_timeout_fired {
            if now.saturating_sub(fired) < self.config.timeout_window {
                return;
            }
        }
        self.last_timeout_fired = Some(now);
        let event = SocketTimeoutEvent {
            unacknowledged_count: self.outgoing.len(),
            since_oldest_unacknowledged: now.saturating_sub(oldest),
            since_last_received: now.saturating_sub(self.last_read_at),
        };
        warn!(
            "no peer traffic for {:?} with {} unacknowledged message(s)",
            event.since_last_received, event.unacknowledged_count
        );
        self.on_socket_timeout.fire(&event);
    }

    // ---- teardown ----

    /// Cancels all timers, disposes the socket and fires `on_did_dispose`
    /// exactly once. Safe to call twice or from inside an event handler.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.ack_deadline = None;
        self.last_timeout_fired = None;
        self.pending_signals.clear();
        self.outgoing.clear();
        self.socket.dispose();
        self.fire_dispose_once();
    }

    fn fire_dispose_once(&mut self) {
        if !self.dispose_fired {
            self.dispose_fired = true;
            self.on_did_dispose.fire(&());
        }
    }

    // ---- write plumbing ----

    fn can_write(&self) -> bool {
        !self.reconnecting && !self.send_paused && !self.writing_paused
    }

    fn has_high_load(&self) -> bool {
        self.load_estimator
            .as_ref()
            .map(|l| l.has_high_load())
            .unwrap_or(false)
    }

    /// Immediate write, bypassing pause gates (Disconnect, replay, acks that
    /// have already been gated by the caller).
    fn write_message(&mut self, msg: &WireMessage) -> ProtocolResult<()> {
        self.socket.write(&msg.encode())?;
        self.note_flushed(msg.ack);
        Ok(())
    }

    /// Writes `msg` now if allowed, otherwise holds it for the next flush.
    fn write_or_hold(&mut self, msg: WireMessage) -> ProtocolResult<()> {
        if self.can_write() {
            self.write_message(&msg)
        } else {
            self.pending_signals.push_back(msg);
            Ok(())
        }
    }

    fn flush_entry(&mut self, index: usize) -> ProtocolResult<()> {
        let encoded = self.outgoing[index].msg.encode();
        let ack = self.outgoing[index].msg.ack;
        self.socket.write(&encoded)?;
        self.outgoing[index].written_at = Some(self.clock.now());
        self.note_flushed(ack);
        Ok(())
    }

    /// Flushes held signal messages, then every queue entry that has never
    /// been written.
    fn flush_held(&mut self) -> ProtocolResult<()> {
        if !self.can_write() {
            return Ok(());
        }
        while let Some(msg) = self.pending_signals.pop_front() {
            self.write_message(&msg)?;
        }
        if self.replay_deferred {
            self.replay_deferred = false;
            return self.replay_outgoing();
        }
        for index in 0..self.outgoing.len() {
            if self.outgoing[index].written_at.is_none() {
                self.flush_entry(index)?;
            }
        }
        Ok(())
    }

    /// Rewrites the whole unacknowledged queue in order, original ids and
    /// ack fields untouched. Deferred until the next flush if writing is
    /// currently suppressed.
    fn replay_outgoing(&mut self) -> ProtocolResult<()> {
        if !self.can_write() {
            self.replay_deferred = true;
            return Ok(());
        }
        for index in 0..self.outgoing.len() {
            self.flush_entry(index)?;
        }
        Ok(())
    }

    fn schedule_ack(&mut self, now: Duration) {
        if self.ack_deadline.is_none() {
            self.ack_deadline = Some(now + self.config.ack_delay);
        }
    }

    /// Bookkeeping after any successful socket write: a message whose
    /// piggy-backed ack is current makes a dedicated Ack unnecessary.
    fn note_flushed(&mut self, ack: u32) {
        self.last_write_at = self.clock.now();
        if ack == self.last_received_id {
            self.ack_deadline = None;
        }
    }
}
