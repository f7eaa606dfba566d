//! The event bus: a closed set of event variants dispatched to persistent,
//! one-shot, and filtered subscribers, in registration order.
//!
//! Reified as one concrete component rather than a mixin/dispatcher
//! hierarchy (see the engine's design notes) — a `HashMap<EventKind,
//! Vec<Subscription>>` behind a mutex, so registration can happen from any
//! thread even though dispatch itself always runs on the engine's task.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use irc_wire::ModeChange;

use crate::channel::Role;
use crate::whois::WhoisInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Server,
}

/// The closed set of semantic events the engine emits.
#[derive(Debug, Clone)]
pub enum Event {
    Connect,
    Disconnect,
    LineReceive { line: String },
    LineSent { line: String },
    Ready,
    Motd { text: String },
    Message { from: String, target: String, text: String },
    Notice { from: String, target: String, text: String },
    Ctcp { from: String, target: String, command: String, args: String },
    Action { from: String, target: String, text: String },
    Join { chan: String, nick: String },
    BotJoin { chan: String },
    Part { chan: String, nick: String, reason: Option<String> },
    BotPart { chan: String },
    Quit { nick: String, reason: Option<String> },
    QuitPart { chan: String, nick: String },
    Kick { chan: String, nick: String, by: String, reason: Option<String> },
    NickChange { old: String, new: String },
    NickInUse { nick: String },
    Topic { chan: String, topic: String },
    Mode { target: String, by: Option<String>, change: ModeChange, role: Option<Role>, param: Option<String> },
    Whois { nick: String, info: WhoisInfo },
    Pong { token: String },
    Invite { chan: String, by: String },
    IsOn { users: HashSet<String> },
    ServerVersion { version: String, server: String, comments: String },
    ServerSupports { isupport: HashMap<String, String> },
    ServerOperator,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    LineReceive,
    LineSent,
    Ready,
    Motd,
    Message,
    Notice,
    Ctcp,
    Action,
    Join,
    BotJoin,
    Part,
    BotPart,
    Quit,
    QuitPart,
    Kick,
    NickChange,
    NickInUse,
    Topic,
    Mode,
    Whois,
    Pong,
    Invite,
    IsOn,
    ServerVersion,
    ServerSupports,
    ServerOperator,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect => EventKind::Connect,
            Event::Disconnect => EventKind::Disconnect,
            Event::LineReceive { .. } => EventKind::LineReceive,
            Event::LineSent { .. } => EventKind::LineSent,
            Event::Ready => EventKind::Ready,
            Event::Motd { .. } => EventKind::Motd,
            Event::Message { .. } => EventKind::Message,
            Event::Notice { .. } => EventKind::Notice,
            Event::Ctcp { .. } => EventKind::Ctcp,
            Event::Action { .. } => EventKind::Action,
            Event::Join { .. } => EventKind::Join,
            Event::BotJoin { .. } => EventKind::BotJoin,
            Event::Part { .. } => EventKind::Part,
            Event::BotPart { .. } => EventKind::BotPart,
            Event::Quit { .. } => EventKind::Quit,
            Event::QuitPart { .. } => EventKind::QuitPart,
            Event::Kick { .. } => EventKind::Kick,
            Event::NickChange { .. } => EventKind::NickChange,
            Event::NickInUse { .. } => EventKind::NickInUse,
            Event::Topic { .. } => EventKind::Topic,
            Event::Mode { .. } => EventKind::Mode,
            Event::Whois { .. } => EventKind::Whois,
            Event::Pong { .. } => EventKind::Pong,
            Event::Invite { .. } => EventKind::Invite,
            Event::IsOn { .. } => EventKind::IsOn,
            Event::ServerVersion { .. } => EventKind::ServerVersion,
            Event::ServerSupports { .. } => EventKind::ServerSupports,
            Event::ServerOperator => EventKind::ServerOperator,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

type Predicate = Box<dyn Fn(&Event) -> bool + Send + 'static>;
type Callback = Box<dyn FnMut(&Event) + Send + 'static>;

struct Subscription {
    id: u64,
    once: bool,
    predicate: Option<Predicate>,
    callback: Callback,
}

/// A cloneable handle to the bus. Registering, unsubscribing, and
/// publishing can all happen from any thread; actual callback invocation is
/// expected to happen on the engine's task, which is the only place
/// `publish` is called from in this crate.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<EventKind, Vec<Subscription>>>>,
    next_id: Arc<AtomicU64>,
}

/// Returned by every `subscribe*` call; drop it or call `unsubscribe` to
/// stop receiving events. Dropping does *not* auto-unsubscribe (the caller
/// must call it explicitly), matching the teacher's explicit-lifecycle
/// channel handles rather than RAII guards.
pub struct SubscriptionHandle {
    bus: EventBus,
    kind: EventKind,
    id: u64,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.bus.unsubscribe(self.kind, self.id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fires for every matching event until unsubscribed.
    pub fn subscribe(&self, kind: EventKind, callback: impl FnMut(&Event) + Send + 'static) -> SubscriptionHandle {
        self.subscribe_inner(kind, false, None, Box::new(callback))
    }

    /// Fires once then removes itself.
    pub fn subscribe_once(&self, kind: EventKind, callback: impl FnOnce(&Event) + Send + 'static) -> SubscriptionHandle {
        let mut callback = Some(callback);
        self.subscribe_inner(
            kind,
            true,
            None,
            Box::new(move |event| {
                if let Some(f) = callback.take() {
                    f(event);
                }
            }),
        )
    }

    /// Fires for events matching `predicate`. Non-matching events don't
    /// count as a firing, so a filtered `once` subscription stays live
    /// until a matching event arrives.
    pub fn subscribe_filtered(
        &self,
        kind: EventKind,
        once: bool,
        predicate: impl Fn(&Event) -> bool + Send + 'static,
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> SubscriptionHandle {
        self.subscribe_inner(kind, once, Some(Box::new(predicate)), Box::new(callback))
    }

    fn subscribe_inner(
        &self,
        kind: EventKind,
        once: bool,
        predicate: Option<Predicate>,
        callback: Callback,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Subscription { id, once, predicate, callback });
        SubscriptionHandle { bus: self.clone(), kind, id }
    }

    pub fn unsubscribe(&self, kind: EventKind, id: u64) {
        if let Some(subs) = self.subscribers.lock().unwrap().get_mut(&kind) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Dispatch `event` to subscribers registered for its kind, in
    /// registration order. The subscriber list for this kind is detached
    /// from the map before any callback runs, so:
    ///
    /// - a subscriber that registers a new subscription for the *same*
    ///   kind during this dispatch only observes the next `publish`;
    /// - a subscriber that calls `publish` again, even for the same kind,
    ///   never deadlocks (the bus lock isn't held while callbacks run) but
    ///   also won't re-enter subscribers that are already detached for
    ///   this outer dispatch — it sees whatever is registered for that
    ///   kind at the time, which, for the common case of a nested publish
    ///   of a *different* kind, is simply "everything currently
    ///   subscribed".
    /// - a subscriber's own exceptions (reported via its return value, not
    ///   unwinding) never stop the remaining subscribers.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let mut subs = {
            let mut map = self.subscribers.lock().unwrap();
            map.insert(kind, Vec::new()).unwrap_or_default()
        };

        let mut remaining = Vec::with_capacity(subs.len());
        for mut sub in subs.drain(..) {
            let matches = match &sub.predicate {
                Some(predicate) => predicate(&event),
                None => true,
            };
            if matches {
                (sub.callback)(&event);
                if sub.once {
                    continue;
                }
            }
            remaining.push(sub);
        }

        let mut map = self.subscribers.lock().unwrap();
        let entry = map.entry(kind).or_default();
        // Subscriptions added to this kind *during* dispatch are already in
        // `entry` (we re-inserted an empty Vec before dispatch, so any
        // concurrent/re-entrant subscribe landed there); put the retained
        // pre-existing ones first, preserving their original relative order.
        remaining.append(entry);
        *entry = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn persistent_fires_every_time() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _handle = bus.subscribe(EventKind::Ready, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Ready);
        bus.publish(Event::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe_once(EventKind::Ready, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Ready);
        bus.publish(Event::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filtered_once_stays_alive_until_match() {
        let bus = EventBus::new();
        let got = Arc::new(Mutex::new(None));
        let got2 = got.clone();
        bus.subscribe_filtered(
            EventKind::Whois,
            true,
            |e| matches!(e, Event::Whois { nick, .. } if nick == "alice"),
            move |e| {
                if let Event::Whois { nick, .. } = e {
                    *got2.lock().unwrap() = Some(nick.clone());
                }
            },
        );
        bus.publish(Event::Whois { nick: "bob".to_string(), info: WhoisInfo::default() });
        assert!(got.lock().unwrap().is_none());
        bus.publish(Event::Whois { nick: "alice".to_string(), info: WhoisInfo::default() });
        assert_eq!(got.lock().unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn registration_order_is_preserved() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(EventKind::Ready, move |_| order.lock().unwrap().push(i));
        }
        bus.publish(Event::Ready);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handle = bus.subscribe(EventKind::Ready, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Ready);
        handle.unsubscribe();
        bus.publish(Event::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
