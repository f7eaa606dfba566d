//! The protocol engine: the state machine that turns parsed [`Message`]s into
//! state changes and semantic events (§4.4). One `Engine` per connection,
//! owning channels, nickname, MOTD buffer, ISUPPORT map, and WHOIS builders,
//! mirroring the shape of `StateInner::update`'s big dispatch match.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::warn;

use irc_wire::Message as WireMessage;

use crate::channel::{Channel, Role};
use crate::error::Error;
use crate::event::{ErrorKind, Event, EventBus};
use crate::scheduler::Scheduler;
use crate::whois::WhoisInfo;

pub(crate) struct Engine {
    events: EventBus,
    scheduler: Rc<RefCell<Scheduler>>,
    nick: String,
    ready: bool,
    errored: bool,
    motd_buf: String,
    isupport: HashMap<String, String>,
    channels: HashMap<String, Channel>,
    whois_pending: HashMap<String, WhoisInfo>,
    metadata: HashMap<String, String>,
}

impl Engine {
    pub(crate) fn new(nick: impl Into<String>, events: EventBus, scheduler: Rc<RefCell<Scheduler>>) -> Engine {
        Engine {
            events,
            scheduler,
            nick: nick.into(),
            ready: false,
            errored: false,
            motd_buf: String::new(),
            isupport: HashMap::new(),
            channels: HashMap::new(),
            whois_pending: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Reset the transient fields a reconnect should not carry over.
    /// Caller metadata persists (§3: "Lifecycle: persists across
    /// reconnects (metadata only)").
    pub(crate) fn reset_for_connect(&mut self) {
        self.ready = false;
        self.errored = false;
        self.motd_buf.clear();
        self.isupport.clear();
        self.channels.clear();
        self.whois_pending.clear();
    }

    pub(crate) fn nickname(&self) -> &str {
        &self.nick
    }

    pub(crate) fn set_nickname(&mut self, nick: impl Into<String>) {
        self.nick = nick.into();
    }

    pub(crate) fn motd(&self) -> &str {
        &self.motd_buf
    }

    pub(crate) fn supported(&self) -> &HashMap<String, String> {
        &self.isupport
    }

    pub(crate) fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.errored
    }

    /// Marks the connection as errored without publishing a second `Error`
    /// event — the caller (the reader loop) already published one with
    /// `ErrorKind::Transport` for its own failure.
    pub(crate) fn mark_errored(&mut self) {
        self.errored = true;
    }

    pub(crate) fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub(crate) fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub(crate) fn send(&self, line: String, now: bool) -> Result<(), Error> {
        self.scheduler.borrow().send(line, now)
    }

    fn fire_ready(&mut self) {
        if !self.ready {
            self.ready = true;
            self.events.publish(Event::Ready);
        }
    }

    /// Dispatch one parsed message. Mirrors §4.4's command table.
    pub(crate) fn handle_message(&mut self, msg: &WireMessage) {
        match msg.command.as_str() {
            "PING" => self.handle_ping(msg),
            "PRIVMSG" => self.handle_privmsg(msg),
            "NOTICE" => self.handle_notice(msg),
            "JOIN" => self.handle_join(msg),
            "PART" => self.handle_part(msg),
            "QUIT" => self.handle_quit(msg),
            "KICK" => self.handle_kick(msg),
            "NICK" => self.handle_nick(msg),
            "MODE" => self.handle_mode(msg),
            "TOPIC" | "332" => self.handle_topic(msg),
            "005" => self.handle_isupport(msg),
            "311" | "312" | "313" | "317" | "319" | "330" => self.handle_whois_numeric(msg),
            "318" => self.handle_end_of_whois(msg),
            "303" => self.handle_ison(msg),
            "351" => self.handle_version(msg),
            "353" => self.handle_names(msg),
            "367" => self.handle_ban_entry(msg),
            "372" => self.handle_motd_line(msg),
            "376" | "422" => self.handle_motd_end(),
            "433" => self.handle_nick_in_use(msg),
            "381" => self.events.publish(Event::ServerOperator),
            "INVITE" => self.handle_invite(msg),
            "PONG" => self.handle_pong(msg),
            "ERROR" => self.handle_error(msg),
            _ => {}
        }
    }

    fn handle_ping(&mut self, msg: &WireMessage) {
        let token = msg.trailing.clone().or_else(|| msg.param(0).map(String::from)).unwrap_or_default();
        let line = irc_wire::pong(&token);
        if let Err(err) = self.send(line, false) {
            warn!("failed to queue PONG: {err}");
        }
    }

    fn handle_privmsg(&mut self, msg: &WireMessage) {
        self.fire_ready();
        let target = msg.param(0).unwrap_or_default().to_string();
        let from = msg.prefix_nick().unwrap_or_default().to_string();
        let text = msg.trailing.clone().unwrap_or_default();
        if text.starts_with('\u{1}') {
            let inner = text.trim_matches('\u{1}').to_string();
            let (command, args) = split_ctcp(&inner);
            if let Some(rest) = inner.strip_prefix("ACTION ") {
                self.events.publish(Event::Action { from: from.clone(), target: target.clone(), text: rest.to_string() });
            }
            self.events.publish(Event::Ctcp { from, target, command, args });
        } else {
            self.events.publish(Event::Message { from, target, text });
        }
    }

    fn handle_notice(&mut self, msg: &WireMessage) {
        let target = msg.param(0).unwrap_or_default().to_string();
        let text = msg.trailing.clone().unwrap_or_default();
        let from = if target == "*" {
            msg.prefix.clone().unwrap_or_default()
        } else {
            msg.prefix_nick().unwrap_or_default().to_string()
        };
        self.events.publish(Event::Notice { from, target, text });
    }

    fn handle_join(&mut self, msg: &WireMessage) {
        let Some(who) = msg.prefix_nick().map(str::to_string) else { return };
        let Some(chan_name) = msg.param(0).or(msg.trailing.as_deref()).map(str::to_string) else { return };

        if who == self.nick {
            self.channels.entry(chan_name.clone()).or_insert_with(|| Channel::new(chan_name.clone()));
            let ban_query = irc_wire::mode(&chan_name, "+b", &[]);
            if let Err(err) = self.send(ban_query, false) {
                warn!("failed to request ban list for {chan_name}: {err}");
            }
            self.events.publish(Event::BotJoin { chan: chan_name });
        } else {
            if let Some(chan) = self.channels.get_mut(&chan_name) {
                chan.set_role(&who, Role::Member);
            }
            self.events.publish(Event::Join { chan: chan_name, nick: who });
        }
    }

    fn handle_part(&mut self, msg: &WireMessage) {
        let Some(who) = msg.prefix_nick().map(str::to_string) else { return };
        let chan_from_param = msg.param(0);
        let Some(chan_name) = chan_from_param.or(msg.trailing.as_deref()).map(str::to_string) else { return };
        let reason = if chan_from_param.is_some() { msg.trailing.clone() } else { None };

        if let Some(chan) = self.channels.get_mut(&chan_name) {
            chan.remove_nick(&who);
        }

        if who == self.nick {
            self.channels.remove(&chan_name);
            self.events.publish(Event::BotPart { chan: chan_name });
        } else {
            self.events.publish(Event::Part { chan: chan_name, nick: who, reason });
        }
    }

    /// Self-QUIT is a no-op here beyond emitting `Quit` (resolved open
    /// question (a): tearing down the transport is the caller's job).
    fn handle_quit(&mut self, msg: &WireMessage) {
        let Some(who) = msg.prefix_nick().map(str::to_string) else { return };
        let reason = msg.trailing.clone();

        if who != self.nick {
            let affected: Vec<String> =
                self.channels.iter().filter(|(_, chan)| chan.contains(&who)).map(|(name, _)| name.clone()).collect();
            for chan_name in affected {
                if let Some(chan) = self.channels.get_mut(&chan_name) {
                    chan.remove_nick(&who);
                }
                self.events.publish(Event::QuitPart { chan: chan_name, nick: who.clone() });
            }
        }

        self.events.publish(Event::Quit { nick: who, reason });
    }

    fn handle_kick(&mut self, msg: &WireMessage) {
        let Some(chan_name) = msg.param(0).map(str::to_string) else { return };
        let Some(nick) = msg.param(1).map(str::to_string) else { return };
        let by = msg.prefix_nick().unwrap_or_default().to_string();
        let reason = msg.trailing.clone();

        if let Some(chan) = self.channels.get_mut(&chan_name) {
            chan.remove_nick(&nick);
        }
        if nick == self.nick {
            self.channels.remove(&chan_name);
        }

        self.events.publish(Event::Kick { chan: chan_name, nick, by, reason });
    }

    fn handle_nick(&mut self, msg: &WireMessage) {
        let Some(old) = msg.prefix_nick().map(str::to_string) else { return };
        let Some(new) = msg.trailing.clone().or_else(|| msg.param(0).map(String::from)) else { return };

        if old == self.nick {
            self.nick = new.clone();
        }
        for chan in self.channels.values_mut() {
            chan.rename_nick(&old, &new);
        }

        self.events.publish(Event::NickChange { old, new });
    }

    fn handle_mode(&mut self, msg: &WireMessage) {
        let Some(target) = msg.param(0).map(str::to_string) else { return };
        let Some(mode_str) = msg.param(1) else { return };
        let change = match irc_wire::parse_mode_change(mode_str) {
            Ok(change) => change,
            Err(err) => {
                warn!("malformed MODE change {mode_str:?}: {err}");
                return;
            }
        };
        let by = msg.prefix_nick().map(String::from);
        let param = msg.param(2).map(String::from);
        let mut role = None;

        if let Some(chan) = self.channels.get_mut(&target) {
            for letter in &change.added {
                if let Some(r) = role_for_mode_letter(*letter) {
                    if let Some(nick) = &param {
                        chan.set_role(nick, r);
                    }
                    role = Some(r);
                } else if *letter == 'b' {
                    if let Some(mask) = &param {
                        chan.bans.insert(mask.clone());
                    }
                }
            }
            for letter in &change.removed {
                if let Some(r) = role_for_mode_letter(*letter) {
                    if let Some(nick) = &param {
                        chan.set_role(nick, Role::Member);
                    }
                    role = Some(r);
                } else if *letter == 'b' {
                    if let Some(mask) = &param {
                        chan.bans.remove(mask);
                    }
                }
            }
        }

        self.events.publish(Event::Mode { target, by, change, role, param });
    }

    fn handle_topic(&mut self, msg: &WireMessage) {
        let chan_name = if msg.is_numeric() { msg.param(1) } else { msg.param(0) };
        let Some(chan_name) = chan_name.map(str::to_string) else { return };
        let Some(topic) = msg.trailing.clone() else { return };

        if let Some(chan) = self.channels.get_mut(&chan_name) {
            chan.topic = Some(topic.clone());
        }
        self.events.publish(Event::Topic { chan: chan_name, topic });
    }

    fn handle_isupport(&mut self, msg: &WireMessage) {
        for token in msg.params.iter().skip(1) {
            let (key, value) = irc_wire::parse_isupport_token(token);
            self.isupport.insert(key, value.unwrap_or_default());
        }
        self.events.publish(Event::ServerSupports { isupport: self.isupport.clone() });
    }

    fn whois_entry(&mut self, nick: &str) -> &mut WhoisInfo {
        self.whois_pending.entry(nick.to_string()).or_insert_with(|| WhoisInfo::new(nick))
    }

    fn handle_whois_numeric(&mut self, msg: &WireMessage) {
        let Some(nick) = msg.param(1).map(str::to_string) else { return };
        match msg.command.as_str() {
            "311" => {
                let username = msg.param(2).map(String::from);
                let hostname = msg.param(3).map(String::from);
                let realname = msg.trailing.clone();
                let entry = self.whois_entry(&nick);
                entry.username = username;
                entry.hostname = hostname;
                entry.realname = realname;
            }
            "312" => {
                let server = msg.param(2).map(String::from);
                let server_info = msg.trailing.clone();
                let entry = self.whois_entry(&nick);
                entry.server = server;
                entry.server_info = server_info;
            }
            "313" => {
                self.whois_entry(&nick).operator = true;
            }
            "317" => {
                let idle_seconds = msg.param(2).and_then(|s| s.parse().ok());
                self.whois_entry(&nick).idle_seconds = idle_seconds;
            }
            "319" => {
                if let Some(list) = msg.trailing.clone() {
                    let entry = self.whois_entry(&nick);
                    for raw in list.split_whitespace() {
                        let chan = irc_wire::strip_name_prefix(raw).to_string();
                        let role = raw.chars().next().and_then(role_for_sigil);
                        entry.channels.insert(chan.clone());
                        match role {
                            Some(Role::Owner) => {
                                entry.owner_in.insert(chan);
                            }
                            Some(Role::Op) => {
                                entry.op_in.insert(chan);
                            }
                            Some(Role::HalfOp) => {
                                entry.half_op_in.insert(chan);
                            }
                            Some(Role::Voice) => {
                                entry.voice_in.insert(chan);
                            }
                            _ => {}
                        }
                    }
                }
            }
            "330" => {
                let account = msg.param(2).map(String::from);
                self.whois_entry(&nick).account = account;
            }
            _ => {}
        }
    }

    fn handle_end_of_whois(&mut self, msg: &WireMessage) {
        let Some(nick) = msg.param(1).map(str::to_string) else { return };
        if let Some(info) = self.whois_pending.remove(&nick) {
            self.events.publish(Event::Whois { nick, info });
        }
    }

    fn handle_ison(&mut self, msg: &WireMessage) {
        let users: HashSet<String> = msg.trailing.as_deref().unwrap_or("").split_whitespace().map(String::from).collect();
        self.events.publish(Event::IsOn { users });
    }

    fn handle_version(&mut self, msg: &WireMessage) {
        let version = msg.param(0).unwrap_or_default().to_string();
        let server = msg.param(1).unwrap_or_default().to_string();
        let comments = msg.trailing.clone().unwrap_or_default();
        self.events.publish(Event::ServerVersion { version, server, comments });
    }

    fn handle_names(&mut self, msg: &WireMessage) {
        let Some(chan_name) = msg.param(2).map(str::to_string) else { return };
        let Some(list) = msg.trailing.clone() else { return };
        let chan = self.channels.entry(chan_name.clone()).or_insert_with(|| Channel::new(chan_name));
        for entry in list.split_whitespace() {
            let nick = irc_wire::strip_name_prefix(entry);
            let role = entry.chars().next().and_then(role_for_sigil).unwrap_or(Role::Member);
            chan.set_role(nick, role);
        }
    }

    fn handle_ban_entry(&mut self, msg: &WireMessage) {
        let Some(chan_name) = msg.param(1) else { return };
        let Some(mask) = msg.param(2).map(str::to_string) else { return };
        if let Some(chan) = self.channels.get_mut(chan_name) {
            chan.bans.insert(mask);
        }
    }

    fn handle_motd_line(&mut self, msg: &WireMessage) {
        if let Some(line) = &msg.trailing {
            self.motd_buf.push_str(line);
            self.motd_buf.push('\n');
        }
    }

    fn handle_motd_end(&mut self) {
        let text =
            if self.motd_buf.is_empty() { "No MOTD set.".to_string() } else { self.motd_buf.trim_end_matches('\n').to_string() };
        self.events.publish(Event::Motd { text });
        self.fire_ready();
    }

    fn handle_nick_in_use(&mut self, msg: &WireMessage) {
        let nick = msg.param(1).or_else(|| msg.param(0)).unwrap_or_default().to_string();
        self.events.publish(Event::NickInUse { nick });
    }

    fn handle_invite(&mut self, msg: &WireMessage) {
        let by = msg.prefix_nick().unwrap_or_default().to_string();
        let chan = msg.trailing.clone().unwrap_or_default();
        self.events.publish(Event::Invite { chan, by });
    }

    fn handle_pong(&mut self, msg: &WireMessage) {
        let token = msg.trailing.clone().or_else(|| msg.params.last().cloned()).unwrap_or_default();
        self.events.publish(Event::Pong { token });
    }

    fn handle_error(&mut self, msg: &WireMessage) {
        self.errored = true;
        let message = msg.trailing.clone().unwrap_or_default();
        self.events.publish(Event::Error { kind: ErrorKind::Server, message });
    }
}

/// Membership-affecting mode letters (§4.4's role transition table). `q`
/// (owner) is hardcoded rather than read from ISUPPORT PREFIX, matching how
/// NAMES/WHOIS role sigils are also fixed rather than server-negotiated.
fn role_for_mode_letter(letter: char) -> Option<Role> {
    match letter {
        'q' => Some(Role::Owner),
        'o' => Some(Role::Op),
        'h' => Some(Role::HalfOp),
        'v' => Some(Role::Voice),
        _ => None,
    }
}

fn role_for_sigil(sigil: char) -> Option<Role> {
    match sigil {
        '~' => Some(Role::Owner),
        '@' => Some(Role::Op),
        '%' => Some(Role::HalfOp),
        '+' => Some(Role::Voice),
        _ => None,
    }
}

fn split_ctcp(inner: &str) -> (String, String) {
    match inner.find(' ') {
        Some(idx) => (inner[..idx].to_string(), inner[idx + 1..].to_string()),
        None => (inner.to_string(), String::new()),
    }
}
