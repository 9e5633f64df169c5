//! Command dispatch (§4.4, §4.5). One [`Dispatcher`] is shared by the
//! whole reactor; it carries only the server password, never connection
//! state, so every handler takes the [`Registry`] and a [`ClientId`]
//! explicitly.
//!
//! Handler bodies are grounded on
//! `examples/original_source/srcs/CommandHandlers.cpp`, which is the
//! authoritative source for numeric codes, validation order, and reply
//! wording; the verb-dispatch table shape follows
//! `examples/tigercat2000-rust_irc/src/command.rs`.

use tracing::info;

use crate::ids::ClientId;
use crate::message::Message;
use crate::numeric::{reply, reply_for, Numeric, SERVER_NAME};
use crate::registry::Registry;

/// What the reactor should do with the connection after a dispatch call.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The connection should be closed once its queued output drains.
    Close,
}

/// Commands usable before registration completes (§4.4).
const PRE_REGISTRATION_ALLOWED: &[&str] = &["PASS", "NICK", "USER", "CAP", "PING", "PONG", "QUIT"];

pub struct Dispatcher {
    password: String,
}

impl Dispatcher {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    pub fn dispatch(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let command = msg.command.as_str();

        let registered = reg.get(id).map(|c| c.is_registered()).unwrap_or(false);
        if !registered && !PRE_REGISTRATION_ALLOWED.contains(&command) {
            let nick = reg.get(id).map(|c| c.nickname.clone()).unwrap_or_default();
            reg.queue_wire(
                id,
                reply_for(Numeric::ErrNotRegistered, &nick, ":You have not registered"),
            );
            return Outcome::Continue;
        }

        let outcome = match command {
            "PASS" => self.handle_pass(reg, id, msg),
            "NICK" => self.handle_nick(reg, id, msg),
            "USER" => self.handle_user(reg, id, msg),
            "CAP" => self.handle_cap(reg, id, msg),
            "PING" => self.handle_ping(reg, id, msg),
            "PONG" => Outcome::Continue,
            "QUIT" => self.handle_quit(reg, id, msg),
            "JOIN" => self.handle_join(reg, id, msg),
            "PART" => self.handle_part(reg, id, msg),
            "PRIVMSG" => self.handle_privmsg(reg, id, msg, false),
            "NOTICE" => self.handle_privmsg(reg, id, msg, true),
            "KICK" => self.handle_kick(reg, id, msg),
            "INVITE" => self.handle_invite(reg, id, msg),
            "TOPIC" => self.handle_topic(reg, id, msg),
            "MODE" => self.handle_mode(reg, id, msg),
            "WHO" => self.handle_who(reg, id, msg),
            "WHOIS" => self.handle_whois(reg, id, msg),
            "LIST" => self.handle_list(reg, id, msg),
            "NAMES" => self.handle_names(reg, id, msg),
            _ => {
                let nick = reg.get(id).map(|c| c.nickname.clone()).unwrap_or_default();
                reg.queue_wire(
                    id,
                    reply_for(Numeric::ErrUnknownCommand, &nick, &format!("{command} :Unknown command")),
                );
                Outcome::Continue
            }
        };

        self.maybe_complete_registration(reg, id);
        outcome
    }

    /// Completes registration once PASS/NICK/USER have all succeeded
    /// (the password itself is checked synchronously in `handle_pass`, so
    /// by the time all three flags are set there is nothing left to
    /// reject here).
    fn maybe_complete_registration(&self, reg: &mut Registry, id: ClientId) {
        let Some(conn) = reg.get(id) else { return };
        if !conn.can_complete_welcome() {
            return;
        }

        let conn = reg.get_mut(id).unwrap();
        conn.reg.welcome_sent = true;
        let nick = conn.nickname.clone();
        let hostmask = conn.hostmask();
        info!(client = ?id, nick = %nick, "registration complete");

        reg.queue_wire(
            id,
            reply(Numeric::RplWelcome, &nick, &format!(":Welcome to the Internet Relay Network {hostmask}")),
        );
        reg.queue_wire(
            id,
            reply(Numeric::RplYourHost, &nick, &format!(":Your host is {SERVER_NAME}, running version 1.0")),
        );
        reg.queue_wire(id, reply(Numeric::RplCreated, &nick, ":This server was created today"));
        reg.queue_wire(
            id,
            reply(Numeric::RplMyInfo, &nick, &format!("{SERVER_NAME} 1.0 o itkl")),
        );
        reg.queue_wire(
            id,
            reply(
                Numeric::RplISupport,
                &nick,
                "CHANTYPES=# PREFIX=(o)@ CASEMAPPING=rfc1459 :are supported by this server",
            ),
        );
    }

    // ---- registration ----

    /// Validates the password immediately against the server password
    /// (§4.4: "PASS with wrong password | reply 464, leave flag clear").
    /// A wrong password never closes the connection — the client may
    /// retry PASS.
    fn handle_pass(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let Some(conn) = reg.get(id) else { return Outcome::Continue };
        if conn.is_registered() {
            reg.queue_wire(id, reply_for(Numeric::ErrAlreadyRegistered, &conn.nickname, ":Unauthorized command (already registered)"));
            return Outcome::Continue;
        }
        let Some(pass) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, "*", "PASS :Not enough parameters"));
            return Outcome::Continue;
        };
        if !self.password.is_empty() && pass != self.password {
            reg.queue_wire(id, reply_for(Numeric::ErrPasswdMismatch, "*", ":Password incorrect"));
            return Outcome::Continue;
        }
        let conn = reg.get_mut(id).unwrap();
        conn.reg.received_pass = true;
        Outcome::Continue
    }

    fn handle_nick(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let Some(new_nick) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoNicknameGiven, "*", ":No nickname given"));
            return Outcome::Continue;
        };
        if !is_valid_nickname(&new_nick) {
            reg.queue_wire(id, reply_for(Numeric::ErrErroneousNickname, "*", &format!("{new_nick} :Erroneous nickname")));
            return Outcome::Continue;
        }
        if reg.find_by_nick(&new_nick).is_some_and(|existing| existing != id) {
            reg.queue_wire(id, reply_for(Numeric::ErrNicknameInUse, "*", &format!("{new_nick} :Nickname is already in use")));
            return Outcome::Continue;
        }

        let Some(conn) = reg.get(id) else { return Outcome::Continue };
        let was_registered = conn.is_registered();
        let old_hostmask = conn.hostmask();
        let old_nick = conn.nickname.clone();

        let conn = reg.get_mut(id).unwrap();
        conn.nickname = new_nick.clone();
        conn.reg.received_nick = true;

        if was_registered {
            let line = format!(":{old_hostmask} NICK :{new_nick}");
            let channels = reg.channel_names_of(id);
            for chan in &channels {
                reg.broadcast_channel(chan, Some(id), &line);
            }
            reg.queue_line(id, line);
        }
        let _ = old_nick;
        Outcome::Continue
    }

    fn handle_user(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let Some(conn) = reg.get(id) else { return Outcome::Continue };
        if conn.is_registered() {
            reg.queue_wire(id, reply_for(Numeric::ErrAlreadyRegistered, &conn.nickname, ":Unauthorized command (already registered)"));
            return Outcome::Continue;
        }
        if msg.params.len() < 3 || msg.trailing.is_none() {
            let nick = conn.nickname.clone();
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "USER :Not enough parameters"));
            return Outcome::Continue;
        }
        let username = msg.params[0].clone();
        let realname = msg.trailing.clone().unwrap();
        let conn = reg.get_mut(id).unwrap();
        conn.username = username;
        conn.realname = realname;
        conn.reg.received_user = true;
        Outcome::Continue
    }

    fn handle_cap(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let target = if nick.is_empty() { "*" } else { &nick };
        match msg.params.first().map(String::as_str) {
            Some("LS") => reg.queue_wire(id, format!(":{SERVER_NAME} CAP {target} LS :\r\n")),
            Some("REQ") => {
                let requested = msg.trailing.clone().unwrap_or_default();
                reg.queue_wire(id, format!(":{SERVER_NAME} CAP {target} NAK :{requested}\r\n"));
            }
            _ => {}
        }
        Outcome::Continue
    }

    fn handle_ping(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(token) = msg.all_params().first().copied() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "PING :Not enough parameters"));
            return Outcome::Continue;
        };
        reg.queue_wire(id, format!(":{SERVER_NAME} PONG {SERVER_NAME} :{token}\r\n"));
        Outcome::Continue
    }

    /// Leaves every channel and queues the closing ERROR line, but leaves
    /// the connection itself in the registry so its queued output
    /// (including that ERROR line) can still be flushed — the reactor
    /// removes it from the registry and closes the socket once drained.
    fn handle_quit(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let reason = msg.trailing.clone().unwrap_or_else(|| "Client Quit".to_string());
        let Some(conn) = reg.get(id) else { return Outcome::Close };
        let hostmask = conn.hostmask();
        let quit_line = format!(":{hostmask} QUIT :{reason}");
        reg.leave_all_channels(id, &quit_line);
        reg.queue_line(id, format!("ERROR :Closing Link: {reason}"));
        Outcome::Close
    }

    // ---- channels ----

    fn handle_join(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let Some(chan_list) = msg.params.first() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick_of(reg, id), "JOIN :Not enough parameters"));
            return Outcome::Continue;
        };
        let keys: Vec<&str> = msg.params.get(1).map(|s| s.split(',').collect()).unwrap_or_default();

        for (i, chan_name) in chan_list.split(',').enumerate() {
            let key = keys.get(i).copied();
            self.join_one(reg, id, chan_name, key);
        }
        Outcome::Continue
    }

    fn join_one(&self, reg: &mut Registry, id: ClientId, chan_name: &str, key: Option<&str>) {
        let nick = nick_of(reg, id);
        if !is_valid_channel_name(chan_name) {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
            return;
        }

        if reg.channel(chan_name).is_none() {
            reg.ensure_channel(chan_name, id);
        } else {
            let chan = reg.channel(chan_name).unwrap();
            if chan.is_member(id) {
                return;
            }
            if chan.modes.invite_only && !chan.is_invited(id) {
                reg.queue_wire(id, reply_for(Numeric::ErrInviteOnlyChan, &nick, &format!("{chan_name} :Cannot join channel (+i)")));
                return;
            }
            if let Some(required) = &chan.modes.key {
                if key != Some(required.as_str()) {
                    reg.queue_wire(id, reply_for(Numeric::ErrBadChannelKey, &nick, &format!("{chan_name} :Cannot join channel (+k)")));
                    return;
                }
            }
            if chan.is_full() {
                reg.queue_wire(id, reply_for(Numeric::ErrChannelIsFull, &nick, &format!("{chan_name} :Cannot join channel (+l)")));
                return;
            }
            reg.channel_mut(chan_name).unwrap().add_member(id);
        }

        let hostmask = reg.get(id).unwrap().hostmask();
        let join_line = format!(":{hostmask} JOIN :{chan_name}");
        reg.broadcast_channel(chan_name, Some(id), &join_line);
        reg.queue_line(id, join_line);

        let chan = reg.channel(chan_name).unwrap();
        if chan.topic.is_empty() {
            reg.queue_wire(id, reply_for(Numeric::RplNoTopic, &nick, &format!("{chan_name} :No topic is set")));
        } else {
            let topic = chan.topic.clone();
            reg.queue_wire(id, reply_for(Numeric::RplTopic, &nick, &format!("{chan_name} :{topic}")));
        }
        self.send_names(reg, id, chan_name);
    }

    fn handle_part(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(chan_list) = msg.params.first() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "PART :Not enough parameters"));
            return Outcome::Continue;
        };
        for chan_name in chan_list.split(',') {
            let Some(chan) = reg.channel(chan_name) else {
                reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
                continue;
            };
            if !chan.is_member(id) {
                reg.queue_wire(id, reply_for(Numeric::ErrNotOnChannel, &nick, &format!("{chan_name} :You're not on that channel")));
                continue;
            }
            let hostmask = reg.get(id).unwrap().hostmask();
            let part_line = match &msg.trailing {
                Some(reason) => format!(":{hostmask} PART {chan_name} :{reason}"),
                None => format!(":{hostmask} PART {chan_name}"),
            };
            reg.broadcast_channel(chan_name, None, &part_line);
            let promoted = reg.channel_mut(chan_name).and_then(|chan| {
                chan.remove_member(id);
                chan.promote_operator_if_needed()
            });
            if let Some(new_op) = promoted {
                let new_op_nick = nick_of(reg, new_op);
                reg.broadcast_channel(chan_name, None, &format!(":{SERVER_NAME} MODE {chan_name} +o {new_op_nick}"));
            }
            reg.remove_channel_if_empty(chan_name);
        }
        Outcome::Continue
    }

    fn handle_privmsg(&self, reg: &mut Registry, id: ClientId, msg: &Message, is_notice: bool) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(target) = msg.params.first().cloned() else {
            if !is_notice {
                reg.queue_wire(id, reply_for(Numeric::ErrNoRecipient, &nick, ":No recipient given (PRIVMSG)"));
            }
            return Outcome::Continue;
        };
        let Some(text) = msg.trailing.clone() else {
            if !is_notice {
                reg.queue_wire(id, reply_for(Numeric::ErrNoTextToSend, &nick, ":No text to send"));
            }
            return Outcome::Continue;
        };

        let verb = if is_notice { "NOTICE" } else { "PRIVMSG" };
        let hostmask = reg.get(id).unwrap().hostmask();
        let line = format!(":{hostmask} {verb} {target} :{text}");

        if target.starts_with('#') {
            let Some(chan) = reg.channel(&target) else {
                if !is_notice {
                    reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{target} :No such channel")));
                }
                return Outcome::Continue;
            };
            if !chan.is_member(id) {
                if !is_notice {
                    reg.queue_wire(id, reply_for(Numeric::ErrCannotSendToChan, &nick, &format!("{target} :Cannot send to channel")));
                }
                return Outcome::Continue;
            }
            reg.broadcast_channel(&target, Some(id), &line);
        } else {
            let Some(target_id) = reg.find_by_nick(&target) else {
                if !is_notice {
                    reg.queue_wire(id, reply_for(Numeric::ErrNoSuchNick, &nick, &format!("{target} :No such nick/channel")));
                }
                return Outcome::Continue;
            };
            reg.queue_line(target_id, line);
        }
        Outcome::Continue
    }

    fn handle_kick(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        if msg.params.len() < 2 {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "KICK :Not enough parameters"));
            return Outcome::Continue;
        }
        let chan_name = msg.params[0].clone();
        let target_nick = msg.params[1].clone();
        let reason = msg.trailing.clone().unwrap_or_else(|| nick.clone());

        let Some(chan) = reg.channel(&chan_name) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
            return Outcome::Continue;
        };
        if !chan.is_operator(id) {
            reg.queue_wire(id, reply_for(Numeric::ErrChanOpPrivsNeeded, &nick, &format!("{chan_name} :You're not channel operator")));
            return Outcome::Continue;
        }
        let Some(target_id) = reg.find_by_nick(&target_nick) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchNick, &nick, &format!("{target_nick} :No such nick/channel")));
            return Outcome::Continue;
        };
        if !chan.is_member(target_id) {
            reg.queue_wire(id, reply_for(Numeric::ErrUserNotInChannel, &nick, &format!("{target_nick} {chan_name} :They aren't on that channel")));
            return Outcome::Continue;
        }

        let hostmask = reg.get(id).unwrap().hostmask();
        let kick_line = format!(":{hostmask} KICK {chan_name} {target_nick} :{reason}");
        reg.broadcast_channel(&chan_name, None, &kick_line);
        let promoted = reg.channel_mut(&chan_name).and_then(|chan| {
            chan.remove_member(target_id);
            chan.promote_operator_if_needed()
        });
        if let Some(new_op) = promoted {
            let new_op_nick = nick_of(reg, new_op);
            reg.broadcast_channel(&chan_name, None, &format!(":{SERVER_NAME} MODE {chan_name} +o {new_op_nick}"));
        }
        reg.remove_channel_if_empty(&chan_name);
        Outcome::Continue
    }

    /// INVITE always requires the caller to be a channel operator (§4.5:
    /// "must be member + operator"), unlike TOPIC/JOIN where operator
    /// status is only required under a specific mode.
    fn handle_invite(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        if msg.params.len() < 2 {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "INVITE :Not enough parameters"));
            return Outcome::Continue;
        }
        let target_nick = msg.params[0].clone();
        let chan_name = msg.params[1].clone();

        let Some(chan) = reg.channel(&chan_name) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
            return Outcome::Continue;
        };
        if !chan.is_member(id) {
            reg.queue_wire(id, reply_for(Numeric::ErrNotOnChannel, &nick, &format!("{chan_name} :You're not on that channel")));
            return Outcome::Continue;
        }
        if !chan.is_operator(id) {
            reg.queue_wire(id, reply_for(Numeric::ErrChanOpPrivsNeeded, &nick, &format!("{chan_name} :You're not channel operator")));
            return Outcome::Continue;
        }
        let Some(target_id) = reg.find_by_nick(&target_nick) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchNick, &nick, &format!("{target_nick} :No such nick/channel")));
            return Outcome::Continue;
        };
        if reg.channel(&chan_name).unwrap().is_member(target_id) {
            reg.queue_wire(id, reply_for(Numeric::ErrUserOnChannel, &nick, &format!("{target_nick} {chan_name} :is already on channel")));
            return Outcome::Continue;
        }

        reg.channel_mut(&chan_name).unwrap().invites.insert(target_id);
        reg.queue_wire(id, reply_for(Numeric::RplInviting, &nick, &format!("{target_nick} {chan_name}")));
        let hostmask = reg.get(id).unwrap().hostmask();
        reg.queue_line(target_id, format!(":{hostmask} INVITE {target_nick} :{chan_name}"));
        Outcome::Continue
    }

    fn handle_topic(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(chan_name) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "TOPIC :Not enough parameters"));
            return Outcome::Continue;
        };
        let Some(chan) = reg.channel(&chan_name) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
            return Outcome::Continue;
        };
        if !chan.is_member(id) {
            reg.queue_wire(id, reply_for(Numeric::ErrNotOnChannel, &nick, &format!("{chan_name} :You're not on that channel")));
            return Outcome::Continue;
        }

        match &msg.trailing {
            None if msg.params.len() < 2 => {
                if chan.topic.is_empty() {
                    reg.queue_wire(id, reply_for(Numeric::RplNoTopic, &nick, &format!("{chan_name} :No topic is set")));
                } else {
                    let topic = chan.topic.clone();
                    reg.queue_wire(id, reply_for(Numeric::RplTopic, &nick, &format!("{chan_name} :{topic}")));
                }
            }
            new_topic => {
                if chan.modes.topic_restricted && !chan.is_operator(id) {
                    reg.queue_wire(id, reply_for(Numeric::ErrChanOpPrivsNeeded, &nick, &format!("{chan_name} :You're not channel operator")));
                    return Outcome::Continue;
                }
                let topic = new_topic.clone().unwrap_or_default();
                reg.channel_mut(&chan_name).unwrap().topic = topic.clone();
                let hostmask = reg.get(id).unwrap().hostmask();
                let line = format!(":{hostmask} TOPIC {chan_name} :{topic}");
                reg.broadcast_channel(&chan_name, None, &line);
            }
        }
        Outcome::Continue
    }

    fn handle_mode(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(chan_name) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "MODE :Not enough parameters"));
            return Outcome::Continue;
        };
        let Some(chan) = reg.channel(&chan_name) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchChannel, &nick, &format!("{chan_name} :No such channel")));
            return Outcome::Continue;
        };

        let Some(mode_str) = msg.params.get(1).cloned() else {
            let modes = chan.modes.mode_string();
            let modes = if modes.is_empty() { "+".to_string() } else { modes };
            reg.queue_wire(id, reply_for(Numeric::RplChannelModeIs, &nick, &format!("{chan_name} {modes}")));
            return Outcome::Continue;
        };
        if !chan.is_operator(id) {
            reg.queue_wire(id, reply_for(Numeric::ErrChanOpPrivsNeeded, &nick, &format!("{chan_name} :You're not channel operator")));
            return Outcome::Continue;
        }

        let mut extra_args = msg.params.get(2..).unwrap_or(&[]).iter().cloned();
        let mut applied = Vec::new();
        let mut sign = '+';
        for ch in mode_str.chars() {
            match ch {
                '+' | '-' => sign = ch,
                'i' => {
                    reg.channel_mut(&chan_name).unwrap().modes.invite_only = sign == '+';
                    applied.push(format!("{sign}i"));
                }
                't' => {
                    reg.channel_mut(&chan_name).unwrap().modes.topic_restricted = sign == '+';
                    applied.push(format!("{sign}t"));
                }
                'k' => {
                    if sign == '+' {
                        let Some(key) = extra_args.next() else {
                            reg.queue_wire(id, reply_for(Numeric::ErrNeedMoreParams, &nick, "MODE :Not enough parameters"));
                            continue;
                        };
                        reg.channel_mut(&chan_name).unwrap().modes.key = Some(key.clone());
                        applied.push(format!("+k {key}"));
                    } else {
                        reg.channel_mut(&chan_name).unwrap().modes.key = None;
                        applied.push("-k".to_string());
                    }
                }
                'l' => {
                    // Missing, non-numeric, or non-positive limits are
                    // silently ignored rather than erroring (§4.5 MODE
                    // table: "non-positive or missing -> ignore").
                    if sign == '+' {
                        let Some(limit) = extra_args.next().and_then(|s| s.parse::<usize>().ok()).filter(|l| *l > 0) else {
                            continue;
                        };
                        reg.channel_mut(&chan_name).unwrap().modes.user_limit = limit;
                        applied.push(format!("+l {limit}"));
                    } else {
                        reg.channel_mut(&chan_name).unwrap().modes.user_limit = 0;
                        applied.push("-l".to_string());
                    }
                }
                'o' => {
                    // A target absent from the channel (or nonexistent) is
                    // silently ignored, not an error (§4.5 MODE table).
                    let Some(target_nick) = extra_args.next() else { continue };
                    let Some(target_id) = reg.find_by_nick(&target_nick) else { continue };
                    let chan = reg.channel_mut(&chan_name).unwrap();
                    if !chan.is_member(target_id) {
                        continue;
                    }
                    if sign == '+' {
                        chan.operators.insert(target_id);
                    } else {
                        chan.operators.remove(&target_id);
                    }
                    applied.push(format!("{sign}o {target_nick}"));
                }
                _ => {
                    reg.queue_wire(id, reply_for(Numeric::ErrUnknownMode, &nick, &format!("{ch} :is unknown mode char to me")));
                    break;
                }
            }
        }

        if !applied.is_empty() {
            let hostmask = reg.get(id).unwrap().hostmask();
            let line = format!(":{hostmask} MODE {chan_name} {}", applied.join(" "));
            reg.broadcast_channel(&chan_name, None, &line);
        }
        Outcome::Continue
    }

    // ---- queries ----

    fn handle_who(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(target) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::RplEndOfWho, &nick, "* :End of WHO list"));
            return Outcome::Continue;
        };

        let members: Vec<ClientId> = if target.starts_with('#') {
            reg.channel(&target).map(|c| c.members.iter().copied().collect()).unwrap_or_default()
        } else {
            reg.find_by_nick(&target).into_iter().collect()
        };

        for member in members {
            let Some(conn) = reg.get(member) else { continue };
            let line = format!(
                "{target} {} {} {SERVER_NAME} {} H :0 {}",
                conn.username, conn.hostname, conn.nickname, conn.realname
            );
            reg.queue_wire(id, reply_for(Numeric::RplWhoReply, &nick, &line));
        }
        reg.queue_wire(id, reply_for(Numeric::RplEndOfWho, &nick, &format!("{target} :End of WHO list")));
        Outcome::Continue
    }

    fn handle_whois(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let Some(target_nick) = msg.params.first().cloned() else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoNicknameGiven, &nick, ":No nickname given"));
            return Outcome::Continue;
        };
        let Some(target_id) = reg.find_by_nick(&target_nick) else {
            reg.queue_wire(id, reply_for(Numeric::ErrNoSuchNick, &nick, &format!("{target_nick} :No such nick/channel")));
            return Outcome::Continue;
        };
        let target = reg.get(target_id).unwrap();
        let (username, hostname, realname) = (target.username.clone(), target.hostname.clone(), target.realname.clone());
        reg.queue_wire(
            id,
            reply_for(Numeric::RplWhoIsUser, &nick, &format!("{target_nick} {username} {hostname} * :{realname}")),
        );
        reg.queue_wire(
            id,
            reply_for(Numeric::RplWhoIsServer, &nick, &format!("{target_nick} {SERVER_NAME} :ircserv IRC server")),
        );
        let channels: Vec<String> = reg
            .channels_iter()
            .filter(|c| c.is_member(target_id))
            .map(|c| {
                if c.is_operator(target_id) {
                    format!("@{}", c.name)
                } else {
                    c.name.clone()
                }
            })
            .collect();
        if !channels.is_empty() {
            reg.queue_wire(id, reply_for(Numeric::RplWhoIsChannels, &nick, &format!("{target_nick} :{}", channels.join(" "))));
        }
        reg.queue_wire(id, reply_for(Numeric::RplEndOfWhoIs, &nick, &format!("{target_nick} :End of WHOIS list")));
        Outcome::Continue
    }

    fn handle_list(&self, reg: &mut Registry, id: ClientId, _msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        reg.queue_wire(id, reply_for(Numeric::RplListStart, &nick, "Channel :Users  Name"));
        let rows: Vec<(String, usize, String)> = reg
            .channels_iter()
            .map(|c| (c.name.clone(), c.members.len(), c.topic.clone()))
            .collect();
        for (name, count, topic) in rows {
            reg.queue_wire(id, reply_for(Numeric::RplList, &nick, &format!("{name} {count} :{topic}")));
        }
        reg.queue_wire(id, reply_for(Numeric::RplListEnd, &nick, ":End of LIST"));
        Outcome::Continue
    }

    fn handle_names(&self, reg: &mut Registry, id: ClientId, msg: &Message) -> Outcome {
        let nick = nick_of(reg, id);
        let targets: Vec<String> = match msg.params.first() {
            Some(chan) => vec![chan.clone()],
            None => reg.channel_names_of(id),
        };
        for chan_name in targets {
            self.send_names(reg, id, &chan_name);
        }
        Outcome::Continue
    }

    fn send_names(&self, reg: &mut Registry, id: ClientId, chan_name: &str) {
        let nick = nick_of(reg, id);
        let Some(chan) = reg.channel(chan_name) else { return };
        let names: Vec<String> = chan
            .members
            .iter()
            .map(|m| {
                let member_nick = reg.get(*m).map(|c| c.nickname.clone()).unwrap_or_default();
                if chan.is_operator(*m) {
                    format!("@{member_nick}")
                } else {
                    member_nick
                }
            })
            .collect();
        reg.queue_wire(id, reply_for(Numeric::RplNamReply, &nick, &format!("= {chan_name} :{}", names.join(" "))));
        reg.queue_wire(id, reply_for(Numeric::RplEndOfNames, &nick, &format!("{chan_name} :End of NAMES list")));
    }
}

fn nick_of(reg: &Registry, id: ClientId) -> String {
    reg.get(id).map(|c| c.nickname.clone()).unwrap_or_default()
}

/// Accepted first characters for a nickname (letters plus the RFC 2812
/// "special" set); subsequent characters also allow digits and `-`.
const NICK_SPECIAL: &[char] = &['[', ']', '\\', '`', '_', '^', '{', '|', '}'];

fn is_valid_nickname(nick: &str) -> bool {
    if nick.is_empty() || nick.len() > 9 {
        return false;
    }
    let mut chars = nick.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || NICK_SPECIAL.contains(&first)) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || NICK_SPECIAL.contains(&c) || c == '-')
}

fn is_valid_channel_name(name: &str) -> bool {
    if !name.starts_with('#') || name.len() > 50 {
        return false;
    }
    !name[1..].chars().any(|c| c.is_whitespace() || c == ',' || c.is_control())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::Connection;
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

    fn add_client(reg: &mut Registry, raw_id: usize) -> ClientId {
        let (stream, addr) = fake_stream();
        let id = ClientId(raw_id);
        reg.insert(Connection::new(id, stream, addr));
        id
    }

    fn register(dispatcher: &Dispatcher, reg: &mut Registry, id: ClientId, nick: &str) {
        dispatcher.dispatch(reg, id, &Message::parse("PASS secret").unwrap());
        dispatcher.dispatch(reg, id, &Message::parse(&format!("NICK {nick}")).unwrap());
        dispatcher.dispatch(reg, id, &Message::parse(&format!("USER {nick} 0 * :{nick} Real")).unwrap());
    }

    #[test]
    fn full_registration_burst_completes_handshake() {
        let dispatcher = Dispatcher::new("secret".to_string());
        let mut reg = Registry::new();
        let id = add_client(&mut reg, 1);
        register(&dispatcher, &mut reg, id, "Alice");
        assert!(reg.get(id).unwrap().reg.welcome_sent);
    }

    #[test]
    fn nickname_collision_is_rejected() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let a = add_client(&mut reg, 1);
        let b = add_client(&mut reg, 2);
        register(&dispatcher, &mut reg, a, "Alice");
        dispatcher.dispatch(&mut reg, b, &Message::parse("NICK Alice").unwrap());
        assert_ne!(reg.get(b).unwrap().nickname, "Alice");
    }

    #[test]
    fn commands_before_registration_are_rejected() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let id = add_client(&mut reg, 1);
        dispatcher.dispatch(&mut reg, id, &Message::parse("JOIN #room").unwrap());
        assert!(reg.channel("#room").is_none());
    }

    #[test]
    fn join_creates_channel_and_grants_operator() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let id = add_client(&mut reg, 1);
        register(&dispatcher, &mut reg, id, "Alice");
        dispatcher.dispatch(&mut reg, id, &Message::parse("JOIN #room").unwrap());
        let chan = reg.channel("#room").unwrap();
        assert!(chan.is_member(id));
        assert!(chan.is_operator(id));
    }

    #[test]
    fn invite_only_channel_blocks_uninvited_join() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        let bob = add_client(&mut reg, 2);
        register(&dispatcher, &mut reg, alice, "Alice");
        register(&dispatcher, &mut reg, bob, "Bob");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, alice, &Message::parse("MODE #room +i").unwrap());
        dispatcher.dispatch(&mut reg, bob, &Message::parse("JOIN #room").unwrap());
        assert!(!reg.channel("#room").unwrap().is_member(bob));
    }

    #[test]
    fn invite_lets_invited_user_join_invite_only_channel() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        let bob = add_client(&mut reg, 2);
        register(&dispatcher, &mut reg, alice, "Alice");
        register(&dispatcher, &mut reg, bob, "Bob");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, alice, &Message::parse("MODE #room +i").unwrap());
        dispatcher.dispatch(&mut reg, alice, &Message::parse("INVITE Bob #room").unwrap());
        dispatcher.dispatch(&mut reg, bob, &Message::parse("JOIN #room").unwrap());
        assert!(reg.channel("#room").unwrap().is_member(bob));
    }

    #[test]
    fn kick_removes_member_and_promotes_new_operator() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        let bob = add_client(&mut reg, 2);
        let carol = add_client(&mut reg, 3);
        register(&dispatcher, &mut reg, alice, "Alice");
        register(&dispatcher, &mut reg, bob, "Bob");
        register(&dispatcher, &mut reg, carol, "Carol");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, bob, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, carol, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, bob, &Message::parse("KICK #room Alice :bye").unwrap());
        assert!(!reg.channel("#room").unwrap().is_member(alice));
    }

    #[test]
    fn quit_cleans_up_channels_and_marks_connection_for_close() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        register(&dispatcher, &mut reg, alice, "Alice");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("JOIN #room").unwrap());
        let outcome = dispatcher.dispatch(&mut reg, alice, &Message::parse("QUIT :done").unwrap());
        assert_eq!(outcome, Outcome::Close);
        // The connection survives until the reactor flushes its queued
        // ERROR line and removes it; channel membership is already gone.
        assert!(reg.get(alice).unwrap().has_pending_write());
        assert!(reg.channel("#room").is_none());
        reg.remove(alice);
        assert!(reg.get(alice).is_none());
    }

    #[test]
    fn invite_requires_operator_even_outside_invite_only_mode() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        let bob = add_client(&mut reg, 2);
        let carol = add_client(&mut reg, 3);
        register(&dispatcher, &mut reg, alice, "Alice");
        register(&dispatcher, &mut reg, bob, "Bob");
        register(&dispatcher, &mut reg, carol, "Carol");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("JOIN #room").unwrap());
        dispatcher.dispatch(&mut reg, bob, &Message::parse("JOIN #room").unwrap());
        // Bob is a plain member, not an operator, and #room is not +i.
        dispatcher.dispatch(&mut reg, bob, &Message::parse("INVITE Carol #room").unwrap());
        assert!(!reg.channel("#room").unwrap().is_invited(carol));
    }

    #[test]
    fn nickname_length_boundary() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let id = add_client(&mut reg, 1);
        dispatcher.dispatch(&mut reg, id, &Message::parse("NICK Alicemary").unwrap());
        assert_eq!(reg.get(id).unwrap().nickname, "Alicemary");
        dispatcher.dispatch(&mut reg, id, &Message::parse("NICK Alicemarys").unwrap());
        assert_eq!(reg.get(id).unwrap().nickname, "Alicemary");
    }

    #[test]
    fn privmsg_to_unknown_nick_errors() {
        let dispatcher = Dispatcher::new("".to_string());
        let mut reg = Registry::new();
        let alice = add_client(&mut reg, 1);
        register(&dispatcher, &mut reg, alice, "Alice");
        dispatcher.dispatch(&mut reg, alice, &Message::parse("PRIVMSG Ghost :hi").unwrap());
        assert!(reg.get(alice).unwrap().has_pending_write());
    }
}
