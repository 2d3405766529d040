use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Instant;

use convoy::net::{ClientMessage, CodecError, Decoded, FrameDecoder, decode};

const READ_CHUNK_SIZE: usize = 4096;

pub type PeerId = u64;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] CodecError),
    #[error("write backlog over {0} bytes")]
    Backlog(usize),
}

/// One accepted client connection.
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Set once the peer's `init` has been accepted.
    pub player_id: Option<String>,
    /// Messages received before `init`, replayed after it.
    pub held: Vec<ClientMessage>,
    pub last_activity: Instant,
    stream: TcpStream,
    decoder: FrameDecoder,
    write_buffer: Vec<u8>,
    max_backlog: usize,
    overflowed: bool,
    read_buffer: Box<[u8]>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddr,
        now: Instant,
        max_backlog: usize,
    ) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            id,
            addr,
            player_id: None,
            held: Vec::new(),
            last_activity: now,
            stream,
            decoder: FrameDecoder::new(),
            write_buffer: Vec::new(),
            max_backlog,
            overflowed: false,
            read_buffer: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        })
    }

    pub fn is_registered(&self) -> bool {
        self.player_id.is_some()
    }

    /// Reads everything available and decodes it. Malformed frames and
    /// unknown kinds are dropped here.
    pub fn receive(&mut self) -> Result<Vec<ClientMessage>, PeerError> {
        let mut messages = Vec::new();

        loop {
            match self.stream.read(&mut self.read_buffer) {
                Ok(0) => return Err(PeerError::Closed),
                Ok(n) => self.decoder.extend(&self.read_buffer[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        while let Some(body) = self.decoder.next_frame()? {
            match decode::<ClientMessage>(&body) {
                Ok(Decoded::Message(message)) => messages.push(message),
                Ok(Decoded::UnknownKind(kind)) => {
                    log::debug!("{}: ignoring message of unknown kind {}", self.addr, kind);
                }
                Err(e) => log::warn!("{}: discarding malformed frame: {}", self.addr, e),
            }
        }

        Ok(messages)
    }

    /// Queues an already framed message. Once the backlog would exceed its
    /// limit nothing more is queued and the next `flush` fails.
    pub fn queue(&mut self, framed: &[u8]) {
        if self.overflowed || self.write_buffer.len() + framed.len() > self.max_backlog {
            self.overflowed = true;
            return;
        }
        self.write_buffer.extend_from_slice(framed);
    }

    pub fn flush(&mut self) -> Result<(), PeerError> {
        if self.overflowed {
            return Err(PeerError::Backlog(self.max_backlog));
        }

        let mut written = 0;
        let mut result = Ok(());

        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    result = Err(PeerError::Closed);
                    break;
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        self.write_buffer.drain(..written);
        result
    }

    pub fn shutdown(&mut self) {
        let _ = self.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
