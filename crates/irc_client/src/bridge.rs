//! Turns asynchronous multi-numeric server transactions into single-shot
//! awaitable results, by registering a one-shot filtered subscription and
//! resolving it on the first matching event. There is no built-in timeout —
//! the caller is responsible (see `SPEC_FULL.md` §4.6).
//!
//! Every `await_*` function also returns a [`Pending`] handle alongside the
//! receiver. `Client` keeps these around and, on disconnect (and before the
//! next connect), calls `Pending::cancel` so outstanding bridge futures
//! resolve with `Error::Disconnected` instead of hanging forever (§5:
//! "implementations should document and preferably complete them with a
//! cancellation error").

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::Error;
use crate::event::{Event, EventBus, EventKind, SubscriptionHandle};
use crate::whois::WhoisInfo;

/// A still-registered bridge subscription plus a way to resolve its receiver
/// with an error instead of a value. Cancelling after the receiver has
/// already resolved normally is a harmless no-op: the shared sender slot is
/// already empty by then.
pub(crate) struct Pending {
    handle: SubscriptionHandle,
    cancel: Box<dyn FnOnce(Error)>,
}

impl Pending {
    pub(crate) fn cancel(self, err: Error) {
        self.handle.unsubscribe();
        (self.cancel)(err);
    }
}

fn cancel_closure<T: Send + 'static>(
    slot: Arc<Mutex<Option<oneshot::Sender<Result<T, Error>>>>>,
) -> Box<dyn FnOnce(Error)> {
    Box::new(move |err| {
        if let Some(tx) = slot.lock().unwrap().take() {
            let _ = tx.send(Err(err));
        }
    })
}

/// Await the next `Whois` event for `nick`.
pub(crate) fn await_whois(events: &EventBus, nick: String) -> (oneshot::Receiver<Result<WhoisInfo, Error>>, Pending) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let slot2 = slot.clone();
    let handle = events.subscribe_filtered(
        EventKind::Whois,
        true,
        move |e| matches!(e, Event::Whois { nick: got, .. } if *got == nick),
        move |e| {
            if let Event::Whois { info, .. } = e {
                if let Some(tx) = slot.lock().unwrap().take() {
                    let _ = tx.send(Ok(info.clone()));
                }
            }
        },
    );
    (rx, Pending { handle, cancel: cancel_closure(slot2) })
}

/// Await the next `IsOn` event and report whether `name` is in it. One-shot:
/// resolves (or is cancelled) on the first `IsOn`, never lingers on the bus.
pub(crate) fn await_is_on(events: &EventBus, name: String) -> (oneshot::Receiver<Result<bool, Error>>, Pending) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let slot2 = slot.clone();
    let handle = events.subscribe_once(EventKind::IsOn, move |e| {
        if let Event::IsOn { users } = e {
            if let Some(tx) = slot.lock().unwrap().take() {
                let _ = tx.send(Ok(users.contains(&name)));
            }
        }
    });
    (rx, Pending { handle, cancel: cancel_closure(slot2) })
}

/// Await the next `ServerVersion` event, regardless of target — there is at
/// most one VERSION request in flight per caller expectation.
pub(crate) fn await_server_version(
    events: &EventBus,
) -> (oneshot::Receiver<Result<(String, String, String), Error>>, Pending) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let slot2 = slot.clone();
    let handle = events.subscribe_once(EventKind::ServerVersion, move |e| {
        if let Event::ServerVersion { version, server, comments } = e {
            if let Some(tx) = slot.lock().unwrap().take() {
                let _ = tx.send(Ok((version.clone(), server.clone(), comments.clone())));
            }
        }
    });
    (rx, Pending { handle, cancel: cancel_closure(slot2) })
}

/// Await the next `Topic` event whose channel matches `chan` (resolved open
/// question (c): match, don't skip, on equal channel names).
pub(crate) fn await_topic(events: &EventBus, chan: String) -> (oneshot::Receiver<Result<String, Error>>, Pending) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let slot2 = slot.clone();
    let handle = events.subscribe_filtered(
        EventKind::Topic,
        true,
        move |e| matches!(e, Event::Topic { chan: got, .. } if *got == chan),
        move |e| {
            if let Event::Topic { topic, .. } = e {
                if let Some(tx) = slot.lock().unwrap().take() {
                    let _ = tx.send(Ok(topic.clone()));
                }
            }
        },
    );
    (rx, Pending { handle, cancel: cancel_closure(slot2) })
}
