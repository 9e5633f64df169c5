//! The event loop (§4.1, §5, §7). Single-threaded, non-blocking,
//! readiness-driven: the only place this thread ever suspends is the
//! `poll.poll()` call. No locks, no background threads — shutdown is
//! requested through a shared flag checked once per iteration.
//!
//! Grounded on `examples/gattaca-com-flux/crates/flux-network/src/tcp/
//! connector.rs`'s `ConnectionManager::poll_with` accept/readiness loop,
//! and on `examples/original_source/main.cpp`'s `poll()`-based loop for
//! the "walk every connection once per tick" idle-sweep and write-drain
//! structure it uses instead of flux-network's per-token bookkeeping.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::connection::{ConnState, Connection};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::{IrcError, Result};
use crate::ids::ClientId;
use crate::message::Message;
use crate::registry::Registry;

const LISTENER_TOKEN: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    registry: Registry,
    dispatcher: Dispatcher,
    shutdown: Arc<AtomicBool>,
    next_id: usize,
    closing: HashSet<ClientId>,
    last_sweep: Instant,
}

impl Reactor {
    pub fn new(port: u16, password: String, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let mut listener = TcpListener::bind(addr).map_err(|source| IrcError::Bind { port, source })?;
        let poll = Poll::new().map_err(IrcError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(IrcError::Poll)?;

        Ok(Self {
            poll,
            listener,
            registry: Registry::new(),
            dispatcher: Dispatcher::new(password),
            shutdown,
            next_id: 0,
            closing: HashSet::new(),
            last_sweep: Instant::now(),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(256);
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IrcError::Poll(e)),
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_loop();
                    continue;
                }
                let id = ClientId::from(event.token());
                if event.is_readable() {
                    self.handle_readable(id);
                }
            }

            self.flush_all();
            self.drain_closing();
            self.sweep_idle();
        }
        info!("reactor shut down");
        Ok(())
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let id = ClientId(self.next_id);
                    self.next_id += 1;
                    if let Err(e) = self.poll.registry().register(&mut stream, id.into(), Interest::READABLE) {
                        warn!(error = %e, "failed to register accepted stream");
                        continue;
                    }
                    info!(client = ?id, peer = %peer_addr, "accepted connection");
                    self.registry.insert(Connection::new(id, stream, peer_addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, id: ClientId) {
        let read_result = {
            let Some(conn) = self.registry.get_mut(id) else { return };
            conn.read_ready()
        };

        match read_result {
            Ok((state, lines)) => {
                for line in lines {
                    if let Some(msg) = Message::parse(&line) {
                        if self.dispatcher.dispatch(&mut self.registry, id, &msg) == Outcome::Close {
                            self.closing.insert(id);
                        }
                    }
                }
                if state == ConnState::Disconnected {
                    self.begin_close(id, "Connection reset by peer");
                }
            }
            Err(e) => {
                debug!(client = ?id, error = %e, "read error, closing connection");
                self.begin_close(id, "Read error");
            }
        }
    }

    /// Leaves every channel the connection belongs to (broadcasting a
    /// server-generated QUIT) and marks it for eviction once its queued
    /// output drains. Used for any teardown that isn't an explicit QUIT
    /// command, which already does its own `leave_all_channels` call
    /// before queuing the closing ERROR line (§3, §7: "on destruction the
    /// Registry removes it from every channel").
    fn begin_close(&mut self, id: ClientId, reason: &str) {
        if let Some(conn) = self.registry.get(id) {
            let quit_line = format!(":{} QUIT :{reason}", conn.hostmask());
            self.registry.leave_all_channels(id, &quit_line);
        }
        self.closing.insert(id);
    }

    /// Flushes every connection's outbound queue and (re)arms WRITABLE
    /// interest as needed. Walking every connection once per tick mirrors
    /// the original `poll()`-based main loop, which iterates its whole
    /// pollfd array each cycle rather than tracking per-token dirtiness.
    fn flush_all(&mut self) {
        let ids: Vec<ClientId> = self.registry.iter_ids().collect();
        for id in ids {
            let Some(conn) = self.registry.get_mut(id) else { continue };
            let outcome = conn.flush_write();
            match outcome {
                Ok(ConnState::Alive) => {}
                Ok(ConnState::Disconnected) => {
                    self.begin_close(id, "Connection reset by peer");
                    continue;
                }
                Err(e) => {
                    debug!(client = ?id, error = %e, "write error, closing connection");
                    self.begin_close(id, "Write error");
                    continue;
                }
            }
            if let Err(e) = conn.sync_write_interest(self.poll.registry()) {
                warn!(client = ?id, error = %e, "failed to sync write interest");
            }
        }
    }

    /// Removes connections whose outbound queue has fully drained (or that
    /// errored while draining), deregistering the socket from the poll.
    fn drain_closing(&mut self) {
        let ready: Vec<ClientId> = self
            .closing
            .iter()
            .copied()
            .filter(|id| {
                self.registry
                    .get(*id)
                    .map(|c| !c.has_pending_write())
                    .unwrap_or(true)
            })
            .collect();
        for id in ready {
            self.closing.remove(&id);
            if let Some(mut conn) = self.registry.remove(id) {
                let _ = self.poll.registry().deregister(&mut conn.stream);
                debug!(client = ?id, "connection closed");
            }
        }
    }

    fn sweep_idle(&mut self) {
        if self.last_sweep.elapsed() < IDLE_SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = Instant::now();

        let timed_out: Vec<ClientId> = self
            .registry
            .iter_ids()
            .filter(|id| {
                self.registry
                    .get(*id)
                    .map(|c| c.last_active.elapsed() >= IDLE_TIMEOUT)
                    .unwrap_or(false)
            })
            .collect();

        for id in timed_out {
            let Some(conn) = self.registry.get(id) else { continue };
            let hostmask = conn.hostmask();
            let quit_line = format!(":{hostmask} QUIT :Ping timeout");
            info!(client = ?id, "disconnecting idle connection");
            self.registry.leave_all_channels(id, &quit_line);
            self.registry.queue_line(id, "ERROR :Closing Link: Ping timeout");
            self.closing.insert(id);
        }
    }
}
