//! Fixed-interval drain of an outbound queue, with a priority bypass for
//! handshake traffic. No per-message fairness is needed — a single
//! periodic task suffices (see `SPEC_FULL.md` §9).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::Error;
use crate::event::{Event, EventBus};
use irc_wire::MAX_LINE_LEN;

pub(crate) struct Scheduler {
    connection: Rc<RefCell<Box<dyn Connection>>>,
    queue_tx: mpsc::UnboundedSender<String>,
    events: EventBus,
    tick_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler. The drain task is not started until `start` is
    /// called (on successful connect); before that, `send(.., now=false)`
    /// just appends to the queue for when draining begins.
    pub(crate) fn new(connection: Rc<RefCell<Box<dyn Connection>>>, events: EventBus) -> (Scheduler, mpsc::UnboundedReceiver<String>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        (
            Scheduler {
                connection,
                queue_tx,
                events,
                tick_handle: None,
            },
            queue_rx,
        )
    }

    /// Start the periodic drain at `interval`. Call once per connection,
    /// after `connect` succeeds.
    pub(crate) fn start(&mut self, interval: Duration, mut queue_rx: mpsc::UnboundedReceiver<String>) {
        let connection = self.connection.clone();
        let events = self.events.clone();
        let handle = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Ok(line) = queue_rx.try_recv() {
                    let result = connection.borrow().send(&line);
                    if let Ok(()) = result {
                        events.publish(Event::LineSent { line });
                    }
                }
            }
        });
        self.tick_handle = Some(handle);
    }

    /// Cancel the drain timer. Called on disconnect.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.tick_handle.take() {
            handle.abort();
        }
    }

    /// Validate and enqueue (or, if `now`, immediately write) one line.
    /// Rejects with `LineTooLong` without mutating any state.
    pub(crate) fn send(&self, line: String, now: bool) -> Result<(), Error> {
        if line.len() > MAX_LINE_LEN {
            return Err(Error::LineTooLong {
                len: line.len(),
                limit: MAX_LINE_LEN,
            });
        }

        if now {
            self.connection.borrow().send(&line)?;
            self.events.publish(Event::LineSent { line });
        } else {
            // Receiver only goes away when the scheduler itself is dropped.
            let _ = self.queue_tx.send(line);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::MockConnection;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc as tmpsc;

    async fn run_local<F: std::future::Future>(f: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(f).await
    }

    #[tokio::test]
    async fn now_bypasses_queue_and_emits_line_sent() {
        run_local(async {
            let (_tx, rx) = tmpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let connection: Rc<RefCell<Box<dyn Connection>>> = Rc::new(RefCell::new(Box::new(conn)));
            let events = EventBus::new();
            let fired = Arc::new(AtomicUsize::new(0));
            let fired2 = fired.clone();
            events.subscribe(EventKind::LineSent, move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            });
            let (scheduler, _queue_rx) = Scheduler::new(connection, events);
            scheduler.send("NICK foo".to_string(), true).unwrap();
            assert_eq!(sent.borrow().as_slice(), ["NICK foo"]);
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn too_long_line_is_rejected_before_any_send() {
        run_local(async {
            let (_tx, rx) = tmpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let connection: Rc<RefCell<Box<dyn Connection>>> = Rc::new(RefCell::new(Box::new(conn)));
            let (scheduler, _queue_rx) = Scheduler::new(connection, EventBus::new());
            let long_line = "x".repeat(MAX_LINE_LEN + 1);
            let err = scheduler.send(long_line, false).unwrap_err();
            assert!(matches!(err, Error::LineTooLong { .. }));
            assert!(sent.borrow().is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn queued_lines_drain_in_fifo_order() {
        run_local(async {
            let (_tx, rx) = tmpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let connection: Rc<RefCell<Box<dyn Connection>>> = Rc::new(RefCell::new(Box::new(conn)));
            let (mut scheduler, queue_rx) = Scheduler::new(connection, EventBus::new());
            scheduler.send("A".to_string(), false).unwrap();
            scheduler.send("B".to_string(), false).unwrap();
            scheduler.send("C".to_string(), false).unwrap();
            scheduler.start(Duration::from_millis(5), queue_rx);
            tokio::time::sleep(Duration::from_millis(60)).await;
            scheduler.stop();
            assert_eq!(sent.borrow().as_slice(), ["A", "B", "C"]);
        })
        .await;
    }
}
