//! The Connection half of the data model (§3) and its non-blocking I/O
//! (§4.1, §4.2). Buffer shapes — a FIFO of whole CR-LF-terminated
//! messages plus a staging cursor into the message currently being
//! written — are grounded on
//! `examples/gattaca-com-flux/crates/flux-network/src/tcp/stream.rs`
//! (`send_backlog` + `writable_armed`), adapted from that file's
//! length-prefixed binary framing to this protocol's line framing.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::framer::LineFramer;
use crate::ids::ClientId;

const READ_SLAB_SIZE: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

/// Registration flags, tracked individually per §4.4 so `registered` can
/// be recomputed as a pure function of the other four (invariant I4).
#[derive(Debug, Default)]
pub struct Registration {
    pub received_pass: bool,
    pub received_nick: bool,
    pub received_user: bool,
    pub welcome_sent: bool,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ClientId,
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,

    framer: LineFramer,
    outbound: VecDeque<Vec<u8>>,
    staging: Vec<u8>,
    staging_pos: usize,
    writable_armed: bool,

    pub last_active: Instant,

    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub hostname: String,
    pub reg: Registration,
}

impl Connection {
    pub fn new(id: ClientId, stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let hostname = peer_addr.ip().to_string();
        Self {
            id,
            stream,
            peer_addr,
            framer: LineFramer::new(),
            outbound: VecDeque::new(),
            staging: Vec::new(),
            staging_pos: 0,
            writable_armed: false,
            last_active: Instant::now(),
            nickname: String::new(),
            username: String::new(),
            realname: String::new(),
            hostname,
            reg: Registration::default(),
        }
    }

    pub fn token(&self) -> Token {
        self.id.into()
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nickname, self.username, self.hostname)
    }

    /// `registered` recomputed per invariant I4: all three handshake
    /// flags set, and both identity fields non-empty.
    pub fn is_registered(&self) -> bool {
        self.reg.received_pass
            && self.reg.received_nick
            && self.reg.received_user
            && !self.nickname.is_empty()
            && !self.username.is_empty()
    }

    pub fn can_complete_welcome(&self) -> bool {
        self.is_registered() && !self.reg.welcome_sent
    }

    /// Reads until the socket would block or the peer hangs up, returning
    /// every complete line extracted in arrival order. Collecting into a
    /// `Vec` rather than invoking a dispatcher callback inline keeps this
    /// call from needing a second mutable borrow of the registry that owns
    /// `self` (§4.1: "invoke the dispatcher on each extracted line" is the
    /// reactor's job once this call returns).
    pub fn read_ready(&mut self) -> io::Result<(ConnState, Vec<String>)> {
        let mut slab = [0u8; READ_SLAB_SIZE];
        let mut lines = Vec::new();
        loop {
            match self.stream.read(&mut slab) {
                Ok(0) => return Ok((ConnState::Disconnected, lines)),
                Ok(n) => {
                    self.framer.push(&slab[..n]);
                    self.last_active = Instant::now();
                    while let Some(line) = self.framer.extract_line() {
                        lines.push(line);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((ConnState::Alive, lines)),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Enqueues an already CR-LF-terminated message. Whole-message
    /// ordering (I5) is preserved because the staging buffer is only
    /// refilled once fully drained.
    pub fn queue_raw(&mut self, bytes: Vec<u8>) {
        self.outbound.push_back(bytes);
    }

    pub fn queue_line(&mut self, line: impl AsRef<str>) {
        let mut bytes = line.as_ref().as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.queue_raw(bytes);
    }

    /// Enqueues a line that is already CR-LF terminated, such as the
    /// output of [`crate::numeric::reply`] — unlike [`Self::queue_line`]
    /// this does not append a second terminator.
    pub fn queue_wire(&mut self, line: impl AsRef<str>) {
        self.queue_raw(line.as_ref().as_bytes().to_vec());
    }

    pub fn has_pending_write(&self) -> bool {
        self.staging_pos < self.staging.len() || !self.outbound.is_empty()
    }

    /// Writes as much as the socket accepts without blocking, refilling
    /// the staging buffer from the FIFO only when it has been fully
    /// drained.
    pub fn flush_write(&mut self) -> io::Result<ConnState> {
        loop {
            if self.staging_pos >= self.staging.len() {
                match self.outbound.pop_front() {
                    Some(next) => {
                        self.staging = next;
                        self.staging_pos = 0;
                    }
                    None => return Ok(ConnState::Alive),
                }
            }
            match self.stream.write(&self.staging[self.staging_pos..]) {
                Ok(0) => return Ok(ConnState::Disconnected),
                Ok(n) => self.staging_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ConnState::Alive),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Arms or disarms the WRITABLE interest so the reactor only polls for
    /// writability while there is something queued to send.
    pub fn sync_write_interest(&mut self, registry: &mio::Registry) -> io::Result<()> {
        let want = self.has_pending_write();
        let token = self.token();
        if want && !self.writable_armed {
            registry.reregister(&mut self.stream, token, Interest::READABLE | Interest::WRITABLE)?;
            self.writable_armed = true;
        } else if !want && self.writable_armed {
            registry.reregister(&mut self.stream, token, Interest::READABLE)?;
            self.writable_armed = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Buffer/queue behavior is covered indirectly through registry and
    // dispatch tests, which exercise queue_line/flush ordering against an
    // in-memory substitute. Direct socket I/O isn't unit-testable without
    // a live TcpStream pair.

    #[test]
    fn hostmask_format() {
        let addr: SocketAddr = "127.0.0.1:6667".parse().unwrap();
        // Can't construct a real mio::net::TcpStream without a socket;
        // hostmask formatting is exercised via registry-level tests that
        // build Connection fields directly in test helpers instead.
        let _ = addr;
    }
}
