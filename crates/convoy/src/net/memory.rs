use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::protocol::{ClientMessage, CodecError, Decoded, ServerMessage, decode, encode};
use super::transport::{Transport, TransportError, TransportEvent};

#[derive(Debug, Default)]
struct Wire {
    opens: usize,
    closes: usize,
    open: bool,
    auto_accept: bool,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<TransportEvent>,
}

/// In-process transport for headless runs and tests. The paired
/// [`MemoryRemote`] plays the server: it accepts, drops, and feeds frames.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    wire: Rc<RefCell<Wire>>,
}

#[derive(Debug, Clone)]
pub struct MemoryRemote {
    wire: Rc<RefCell<Wire>>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryRemote) {
        let transport = MemoryTransport::default();
        let remote = MemoryRemote {
            wire: Rc::clone(&transport.wire),
        };
        (transport, remote)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) {
        let mut wire = self.wire.borrow_mut();
        wire.opens += 1;
        wire.inbound.clear();
        if wire.auto_accept {
            wire.open = true;
            wire.inbound.push_back(TransportEvent::Ready);
        }
    }

    fn send(&mut self, frame: Vec<u8>) {
        let mut wire = self.wire.borrow_mut();
        if wire.open {
            wire.sent.push(frame);
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.wire.borrow_mut().inbound.drain(..).collect()
    }

    fn close(&mut self) {
        let mut wire = self.wire.borrow_mut();
        wire.closes += 1;
        wire.open = false;
        wire.inbound.clear();
    }
}

impl MemoryRemote {
    /// Completes every future `open` immediately.
    pub fn set_auto_accept(&self, auto_accept: bool) {
        self.wire.borrow_mut().auto_accept = auto_accept;
    }

    pub fn accept(&self) {
        let mut wire = self.wire.borrow_mut();
        wire.open = true;
        wire.inbound.push_back(TransportEvent::Ready);
    }

    pub fn deliver(&self, message: &ServerMessage) -> Result<(), CodecError> {
        self.deliver_raw(encode(message)?);
        Ok(())
    }

    pub fn deliver_raw(&self, body: Vec<u8>) {
        self.wire
            .borrow_mut()
            .inbound
            .push_back(TransportEvent::Frame(body));
    }

    pub fn drop_connection(&self) {
        let mut wire = self.wire.borrow_mut();
        wire.open = false;
        wire.inbound.push_back(TransportEvent::Closed);
    }

    pub fn fail(&self, reason: &str) {
        let mut wire = self.wire.borrow_mut();
        wire.open = false;
        wire.inbound
            .push_back(TransportEvent::Error(TransportError::Io(reason.to_string())));
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.wire.borrow_mut().sent)
    }

    /// Drains written frames and decodes the ones this crate understands.
    pub fn take_messages(&self) -> Vec<ClientMessage> {
        self.take_sent()
            .iter()
            .filter_map(|body| match decode::<ClientMessage>(body) {
                Ok(Decoded::Message(message)) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.wire.borrow().sent.len()
    }

    pub fn open_count(&self) -> usize {
        self.wire.borrow().opens
    }

    pub fn close_count(&self) -> usize {
        self.wire.borrow().closes
    }

    pub fn is_open(&self) -> bool {
        self.wire.borrow().open
    }
}
