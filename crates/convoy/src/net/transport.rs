use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use super::framing::{FrameDecoder, frame};

const READ_CHUNK_SIZE: usize = 4096;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_WRITE_BACKLOG: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("i/o error: {0}")]
    Io(String),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("write backlog over {0} bytes")]
    Backlog(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection requested by `open` is established.
    Ready,
    Frame(Vec<u8>),
    Closed,
    Error(TransportError),
}

/// Duplex, ordered, message-oriented channel to the server.
///
/// Every method returns immediately. Connection progress, inbound frames and
/// failures are reported through `poll`; a failed `send` surfaces there as an
/// `Error` event rather than as a return value.
pub trait Transport {
    fn open(&mut self);

    fn send(&mut self, frame: Vec<u8>);

    fn poll(&mut self) -> Vec<TransportEvent>;

    fn close(&mut self);
}

/// Length-framed transport over a non-blocking TCP stream.
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    pending: Option<Receiver<io::Result<TcpStream>>>,
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
    write_buffer: Vec<u8>,
    max_backlog: usize,
    overflowed: bool,
    read_buffer: Box<[u8]>,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            pending: None,
            stream: None,
            decoder: FrameDecoder::new(),
            write_buffer: Vec::new(),
            max_backlog: DEFAULT_MAX_WRITE_BACKLOG,
            overflowed: false,
            read_buffer: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_backlog(mut self, bytes: usize) -> Self {
        self.max_backlog = bytes;
        self
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn reset(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.pending = None;
        self.decoder.clear();
        self.write_buffer.clear();
        self.overflowed = false;
    }

    fn fail(&mut self, error: TransportError, events: &mut Vec<TransportEvent>) {
        log::debug!("Transport to {} failed: {}", self.addr, error);
        self.reset();
        events.push(TransportEvent::Error(error));
    }

    fn poll_connect(&mut self, events: &mut Vec<TransportEvent>) {
        let Some(pending) = &self.pending else {
            return;
        };

        let result = match pending.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::Other,
                "connect thread exited without a result",
            )),
        };
        self.pending = None;

        let stream = match result.and_then(|stream| {
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }) {
            Ok(stream) => stream,
            Err(e) => {
                let error = TransportError::Connect {
                    addr: self.addr.to_string(),
                    reason: e.to_string(),
                };
                self.fail(error, events);
                return;
            }
        };

        log::debug!("TCP connection to {} established", self.addr);
        self.stream = Some(stream);
        events.push(TransportEvent::Ready);
    }

    fn flush_writes(&mut self, events: &mut Vec<TransportEvent>) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut written = 0;
        let mut failure = None;
        while written < self.write_buffer.len() {
            match stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    failure = Some(TransportError::Io("connection wrote zero bytes".into()));
                    break;
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(TransportError::Io(e.to_string()));
                    break;
                }
            }
        }
        self.write_buffer.drain(..written);

        if let Some(error) = failure {
            self.fail(error, events);
        }
    }

    fn read_frames(&mut self, events: &mut Vec<TransportEvent>) {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };

            match stream.read(&mut self.read_buffer) {
                Ok(0) => {
                    log::debug!("TCP connection to {} closed by peer", self.addr);
                    self.reset();
                    events.push(TransportEvent::Closed);
                    return;
                }
                Ok(n) => {
                    self.decoder.extend(&self.read_buffer[..n]);
                    loop {
                        match self.decoder.next_frame() {
                            Ok(Some(body)) => events.push(TransportEvent::Frame(body)),
                            Ok(None) => break,
                            Err(e) => {
                                self.fail(TransportError::Framing(e.to_string()), events);
                                return;
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(TransportError::Io(e.to_string()), events);
                    return;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) {
        self.reset();

        let (tx, rx) = mpsc::channel();
        let addr = self.addr;
        let timeout = self.connect_timeout;
        thread::spawn(move || {
            // The receiver is gone if the transport was closed meanwhile.
            let _ = tx.send(TcpStream::connect_timeout(&addr, timeout));
        });

        log::debug!("Opening TCP connection to {}", self.addr);
        self.pending = Some(rx);
    }

    fn send(&mut self, body: Vec<u8>) {
        if self.stream.is_none() {
            log::debug!("Dropping {} byte frame, transport not open", body.len());
            return;
        }

        match frame(&body) {
            Ok(framed) if self.write_buffer.len() + framed.len() > self.max_backlog => {
                self.overflowed = true;
            }
            Ok(framed) => self.write_buffer.extend_from_slice(&framed),
            Err(e) => log::warn!("Dropping outbound frame: {}", e),
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        self.poll_connect(&mut events);
        if self.overflowed {
            self.fail(TransportError::Backlog(self.max_backlog), &mut events);
            return events;
        }
        self.flush_writes(&mut events);
        self.read_frames(&mut events);
        events
    }

    fn close(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn poll_until<F>(transport: &mut TcpTransport, mut done: F) -> Vec<TransportEvent>
    where
        F: FnMut(&TransportEvent) -> bool,
    {
        let start = Instant::now();
        let mut seen = Vec::new();
        while start.elapsed() < Duration::from_secs(2) {
            let events = transport.poll();
            let finished = events.iter().any(&mut done);
            seen.extend(events);
            if finished {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        seen
    }

    #[test]
    fn test_tcp_frames_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut transport = TcpTransport::new(addr);
        transport.open();

        let (mut server_side, _) = listener.accept().unwrap();
        let events = poll_until(&mut transport, |e| *e == TransportEvent::Ready);
        assert!(events.contains(&TransportEvent::Ready));

        server_side.write_all(&frame(b"abc").unwrap()).unwrap();
        let events = poll_until(&mut transport, |e| matches!(e, TransportEvent::Frame(_)));
        assert!(events.contains(&TransportEvent::Frame(b"abc".to_vec())));

        transport.send(b"xyz".to_vec());
        transport.poll();

        let mut received = [0u8; 7];
        server_side.read_exact(&mut received).unwrap();
        assert_eq!(&received[..4], &3u32.to_be_bytes());
        assert_eq!(&received[4..], b"xyz");

        drop(server_side);
        let events = poll_until(&mut transport, |e| *e == TransportEvent::Closed);
        assert!(events.contains(&TransportEvent::Closed));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_write_backlog_overflow_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut transport = TcpTransport::new(listener.local_addr().unwrap()).with_max_backlog(16);
        transport.open();
        let (_server_side, _) = listener.accept().unwrap();
        poll_until(&mut transport, |e| *e == TransportEvent::Ready);

        transport.send(vec![0u8; 8]);
        transport.send(vec![0u8; 8]);
        assert_eq!(
            transport.poll(),
            vec![TransportEvent::Error(TransportError::Backlog(16))]
        );
        assert!(!transport.is_open());
    }

    #[test]
    fn test_connection_refused_reports_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let mut transport = TcpTransport::new(addr).with_connect_timeout(Duration::from_millis(500));
        transport.open();

        let events = poll_until(&mut transport, |e| matches!(e, TransportEvent::Error(_)));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, TransportEvent::Error(TransportError::Connect { .. })))
        );
    }
}
