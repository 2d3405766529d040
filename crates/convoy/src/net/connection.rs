use std::collections::VecDeque;
use std::time::Duration;

use super::protocol::{ClientInit, ClientMessage, Decoded, ServerMessage, decode, encode};
use super::stats::NetworkStats;
use super::transport::{Transport, TransportEvent};

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Decides how long to wait before each reconnect attempt. `attempt` starts
/// at 1 for the first retry after a loss; `None` gives up for good.
pub trait ReconnectPolicy {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        attempt: u32,
    },
    /// `received_at` strictly increases across frames, even when several
    /// arrive within the same poll.
    Message {
        message: ServerMessage,
        received_at: u64,
    },
    UnknownKind(u8),
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    state: ConnectionState,
    queue: VecDeque<ClientMessage>,
    handshake: ClientInit,
    policy: Box<dyn ReconnectPolicy>,
    retry_at: Option<u64>,
    attempts: u32,
    last_receipt: Option<u64>,
    stats: NetworkStats,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, handshake: ClientInit, policy: Box<dyn ReconnectPolicy>) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            handshake,
            policy,
            retry_at: None,
            attempts: 0,
            last_receipt: None,
            stats: NetworkStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn queued(&self) -> impl Iterator<Item = &ClientMessage> {
        self.queue.iter()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn retry_at(&self) -> Option<u64> {
        self.retry_at
    }

    /// Time left before the next reconnect attempt, if one is scheduled.
    pub fn retry_in(&self, now_ms: u64) -> Option<u64> {
        self.retry_at.map(|at| at.saturating_sub(now_ms))
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn open(&mut self) -> Option<ConnectionEvent> {
        if self.state != ConnectionState::Disconnected {
            log::debug!("Ignoring open while {}", self.state.as_str());
            return None;
        }

        self.attempts = 0;
        self.last_receipt = None;
        let event = self.transition(ConnectionState::Connecting);
        self.transport.open();
        Some(event)
    }

    pub fn send(&mut self, message: ClientMessage) {
        if self.state == ConnectionState::Connected {
            self.write(&message);
        } else {
            self.stats.messages_queued += 1;
            self.queue.push_back(message);
        }
    }

    fn write(&mut self, message: &ClientMessage) {
        match encode(message) {
            Ok(body) => {
                self.stats.record_sent(body.len());
                self.transport.send(body);
            }
            Err(e) => log::warn!("Dropping outbound message: {}", e),
        }
    }

    pub fn poll(&mut self, now_ms: u64) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();

        if self.state == ConnectionState::Disconnected {
            return events;
        }

        if self.state == ConnectionState::Reconnecting
            && self.retry_at.is_some_and(|at| now_ms >= at)
        {
            self.retry_at = None;
            self.stats.reconnect_attempts += 1;
            events.push(self.transition(ConnectionState::Connecting));
            self.transport.open();
        }

        for transport_event in self.transport.poll() {
            match transport_event {
                TransportEvent::Ready => {
                    if self.state != ConnectionState::Connecting {
                        log::debug!("Ignoring transport ready while {}", self.state.as_str());
                        continue;
                    }
                    self.attempts = 0;
                    events.push(self.transition(ConnectionState::Connected));
                    self.flush_queue();
                    let init = ClientMessage::Init(self.handshake.clone());
                    self.write(&init);
                }
                TransportEvent::Frame(body) => {
                    if self.state != ConnectionState::Connected {
                        log::debug!("Ignoring frame received while {}", self.state.as_str());
                        continue;
                    }
                    self.handle_frame(now_ms, &body, &mut events);
                }
                TransportEvent::Closed => {
                    log::info!("Connection closed by server");
                    self.lose(now_ms, &mut events);
                    break;
                }
                TransportEvent::Error(e) => {
                    log::warn!("Transport error: {}", e);
                    self.lose(now_ms, &mut events);
                    break;
                }
            }
        }

        events
    }

    fn handle_frame(&mut self, now_ms: u64, body: &[u8], events: &mut Vec<ConnectionEvent>) {
        match decode::<ServerMessage>(body) {
            Ok(Decoded::Message(message)) => {
                self.stats.record_received(body.len());
                let received_at = self.stamp(now_ms);
                events.push(ConnectionEvent::Message {
                    message,
                    received_at,
                });
            }
            Ok(Decoded::UnknownKind(kind)) => {
                self.stats.unknown_kinds += 1;
                events.push(ConnectionEvent::UnknownKind(kind));
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                log::warn!("Discarding malformed frame ({} bytes): {}", body.len(), e);
            }
        }
    }

    fn stamp(&mut self, now_ms: u64) -> u64 {
        let stamp = match self.last_receipt {
            Some(last) if last >= now_ms => last + 1,
            _ => now_ms,
        };
        self.last_receipt = Some(stamp);
        stamp
    }

    fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            log::debug!("Flushing {} queued messages", self.queue.len());
        }
        while let Some(message) = self.queue.pop_front() {
            self.write(&message);
        }
    }

    fn lose(&mut self, now_ms: u64, events: &mut Vec<ConnectionEvent>) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }

        self.transport.close();
        self.attempts += 1;

        match self.policy.next_delay(self.attempts) {
            Some(delay) => {
                self.retry_at = Some(now_ms + delay.as_millis() as u64);
                events.push(self.transition(ConnectionState::Reconnecting));
            }
            None => {
                log::warn!("Giving up after {} reconnect attempts", self.attempts - 1);
                self.retry_at = None;
                self.queue.clear();
                events.push(self.transition(ConnectionState::Disconnected));
            }
        }
    }

    /// Tears the connection down. Nothing is reported by `poll` afterwards.
    pub fn close(&mut self) -> Option<ConnectionEvent> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }

        self.transport.close();
        self.retry_at = None;
        self.queue.clear();
        let event = self.transition(ConnectionState::Disconnected);
        self.attempts = 0;
        Some(event)
    }

    fn transition(&mut self, to: ConnectionState) -> ConnectionEvent {
        let from = self.state;
        self.state = to;
        log::info!("Connection {} -> {}", from.as_str(), to.as_str());
        ConnectionEvent::StateChanged {
            from,
            to,
            attempt: self.attempts,
        }
    }
}
