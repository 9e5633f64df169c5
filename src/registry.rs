//! Owns every live [`Connection`] and [`Channel`] and the cross-cutting
//! operations that touch both (nick lookup, channel membership cleanup,
//! operator succession). Kept as a single owner rather than scattering
//! `Rc<RefCell<_>>` handles between Connection and Channel, per the
//! arena-and-indices note in spec §9.
//!
//! Grounded on `examples/original_source/srcs/Server.cpp`'s
//! `removeClientFromAllChannels`/`deleteChannelIfEmpty`/
//! `handleClientDisconnection`, translated from raw `Client*` bookkeeping
//! to the [`ClientId`]-keyed maps this crate uses instead.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::channel::Channel;
use crate::connection::Connection;
use crate::ids::ClientId;
use crate::numeric::SERVER_NAME;

pub struct Registry {
    connections: HashMap<ClientId, Connection>,
    channels: HashMap<String, Channel>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    pub fn insert(&mut self, conn: Connection) {
        self.connections.insert(conn.id, conn);
    }

    pub fn get(&self, id: ClientId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.connections.keys().copied()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&normalize(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&normalize(name))
    }

    pub fn channels_iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn ensure_channel(&mut self, name: &str, creator: ClientId) -> &mut Channel {
        self.channels
            .entry(normalize(name))
            .or_insert_with(|| Channel::new(name, creator))
    }

    pub fn remove_channel_if_empty(&mut self, name: &str) {
        let key = normalize(name);
        if self.channels.get(&key).is_some_and(Channel::is_empty) {
            self.channels.remove(&key);
        }
    }

    /// Case-insensitive nick lookup (RFC 1459 §2.3.1 casemapping), used by
    /// both collision checks (§4.4 NICK) and message targeting (§4.5
    /// PRIVMSG/NOTICE).
    pub fn find_by_nick(&self, nick: &str) -> Option<ClientId> {
        self.connections
            .values()
            .find(|c| c.nickname.eq_ignore_ascii_case(nick))
            .map(|c| c.id)
    }

    pub fn is_nick_in_use(&self, nick: &str) -> bool {
        self.find_by_nick(nick).is_some()
    }

    /// Every channel name `id` currently belongs to, snapshotted before any
    /// mutation so callers can loop over it while also mutating `self`
    /// (avoids a simultaneous shared/mutable borrow of `self.channels`).
    pub fn channel_names_of(&self, id: ClientId) -> Vec<String> {
        self.channels
            .values()
            .filter(|c| c.is_member(id))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn queue_line(&mut self, id: ClientId, line: impl AsRef<str>) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.queue_line(line);
        }
    }

    /// Queues an already CR-LF-terminated line, typically the output of
    /// [`crate::numeric::reply`].
    pub fn queue_wire(&mut self, id: ClientId, line: impl AsRef<str>) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.queue_wire(line);
        }
    }

    /// Sends `line` to every member of `channel` except `exclude` (when
    /// given), per §4.5's "broadcast to all channel members but the
    /// originator" pattern used by PRIVMSG/JOIN/PART/QUIT/NICK/TOPIC/MODE.
    pub fn broadcast_channel(&mut self, channel: &str, exclude: Option<ClientId>, line: &str) {
        let Some(members) = self.channel(channel).map(|c| c.members.clone()) else {
            return;
        };
        for member in members {
            if Some(member) != exclude {
                self.queue_line(member, line);
            }
        }
    }

    /// Leaves every channel `id` belongs to, promoting a new operator
    /// where needed and deleting any channel left empty. `quit_line` is
    /// sent exactly once to each distinct peer across every shared
    /// channel (§4.5 QUIT: "once per peer, not echoed to caller"), not
    /// once per shared channel. Does not remove the connection itself, so
    /// the caller can still flush queued output (such as the ERROR line)
    /// to it before the socket closes. Mirrors
    /// `Server::removeClientFromAllChannels` in the original source.
    pub fn leave_all_channels(&mut self, id: ClientId, quit_line: &str) {
        let channel_names = self.channel_names_of(id);

        let mut recipients: BTreeSet<ClientId> = BTreeSet::new();
        for name in &channel_names {
            if let Some(chan) = self.channel(name) {
                recipients.extend(chan.members.iter().copied());
            }
        }
        recipients.remove(&id);
        for peer in recipients {
            self.queue_line(peer, quit_line);
        }

        for name in &channel_names {
            let promoted = self.channel_mut(name).and_then(|chan| {
                chan.remove_member(id);
                chan.promote_operator_if_needed()
            });
            if let Some(promoted) = promoted {
                debug!(channel = %name, client = ?promoted, "promoted new operator");
                let nick = self.get(promoted).map(|c| c.nickname.clone()).unwrap_or_default();
                self.broadcast_channel(name, None, &format!(":{SERVER_NAME} MODE {name} +o {nick}"));
            }
            self.remove_channel_if_empty(name);
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            debug!(client = ?id, "connection removed from registry");
        }
        removed
    }

    /// Convenience used outside the reactor's drain-then-close path (tests,
    /// and non-graceful disconnects with nothing left to flush): leaves all
    /// channels and removes the connection in one step. Mirrors
    /// `Server::handleClientDisconnection` in the original source.
    pub fn disconnect(&mut self, id: ClientId, quit_line: &str) -> Option<Connection> {
        self.leave_all_channels(id, quit_line);
        self.remove(id)
    }
}

/// IRC channel names are case-insensitive; normalize to lowercase for use
/// as the map key while the displayed name keeps its original casing.
fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;
    use mio::net::TcpStream;
    use std::net::{SocketAddr, TcpListener};

    fn fake_stream() -> (TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let std_stream = std::net::TcpStream::connect(addr).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let peer = std_stream.local_addr().unwrap();
        (TcpStream::from_std(std_stream), peer)
    }

    fn make_conn(reg: &mut Registry, id: usize, nick: &str) -> ClientId {
        let (stream, addr) = fake_stream();
        let cid = ClientId(id);
        let mut conn = Connection::new(cid, stream, addr);
        conn.nickname = nick.to_string();
        reg.insert(conn);
        cid
    }

    #[test]
    fn nick_lookup_is_case_insensitive() {
        let mut reg = Registry::new();
        let alice = make_conn(&mut reg, 1, "Alice");
        assert_eq!(reg.find_by_nick("alice"), Some(alice));
        assert_eq!(reg.find_by_nick("ALICE"), Some(alice));
    }

    #[test]
    fn disconnect_cleans_up_channel_membership_and_promotes_operator() {
        let mut reg = Registry::new();
        let alice = make_conn(&mut reg, 1, "Alice");
        let bob = make_conn(&mut reg, 2, "Bob");
        reg.ensure_channel("#room", alice);
        reg.channel_mut("#room").unwrap().add_member(bob);

        reg.disconnect(alice, ":Alice!a@h QUIT :bye");

        let chan = reg.channel("#room").unwrap();
        assert!(!chan.is_member(alice));
        assert!(chan.is_operator(bob));
        assert!(reg.get(alice).is_none());
    }

    #[test]
    fn empty_channel_is_removed_after_last_member_leaves() {
        let mut reg = Registry::new();
        let alice = make_conn(&mut reg, 1, "Alice");
        reg.ensure_channel("#solo", alice);
        reg.disconnect(alice, ":Alice!a@h QUIT :bye");
        assert!(reg.channel("#solo").is_none());
    }

    #[test]
    fn channel_names_are_case_insensitive_keys() {
        let mut reg = Registry::new();
        let alice = make_conn(&mut reg, 1, "Alice");
        reg.ensure_channel("#Room", alice);
        assert!(reg.channel("#room").is_some());
        assert!(reg.channel("#ROOM").is_some());
    }
}
