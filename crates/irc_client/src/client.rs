//! The public facade (§6): wires `Config`, the `EventBus`, the `Engine`, and
//! the `Scheduler` together, and drives the reader loop that feeds parsed
//! lines into the engine.

use std::cell::RefCell;
use std::rc::Rc;

use futures::StreamExt;
use log::warn;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge;
use crate::channel::Channel;
use crate::config::Config;
use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::Error;
use crate::event::{Event, EventBus, EventKind, ErrorKind, SubscriptionHandle};
use crate::scheduler::Scheduler;
use crate::whois::WhoisInfo;

pub struct Client {
    config: Config,
    events: EventBus,
    connection: Rc<RefCell<Box<dyn Connection>>>,
    scheduler: Rc<RefCell<Scheduler>>,
    engine: Rc<RefCell<Engine>>,
    queue_rx: RefCell<Option<mpsc::UnboundedReceiver<String>>>,
    reader_handle: RefCell<Option<JoinHandle<()>>>,
    bridge_pending: RefCell<Vec<bridge::Pending>>,
}

impl Client {
    /// Build a client bound to `connection`. The connection isn't touched
    /// until `connect` is called.
    pub fn new(config: Config, connection: Box<dyn Connection>) -> Client {
        let events = EventBus::new();
        let connection = Rc::new(RefCell::new(connection));
        let (scheduler, queue_rx) = Scheduler::new(connection.clone(), events.clone());
        let scheduler = Rc::new(RefCell::new(scheduler));
        let engine = Rc::new(RefCell::new(Engine::new(config.nickname.clone(), events.clone(), scheduler.clone())));

        Client {
            config,
            events,
            connection,
            scheduler,
            engine,
            queue_rx: RefCell::new(Some(queue_rx)),
            reader_handle: RefCell::new(None),
            bridge_pending: RefCell::new(Vec::new()),
        }
    }

    /// Cancel every bridge request still awaiting a server reply, completing
    /// each with `Error::Disconnected` and unsubscribing it from the bus.
    /// Called on disconnect and again before the next connect, since bridge
    /// subscriptions otherwise outlive the connection that created them.
    fn cancel_pending_requests(&self) {
        for pending in self.bridge_pending.borrow_mut().drain(..) {
            pending.cancel(Error::Disconnected);
        }
    }

    /// Connect the transport, start the send scheduler and reader loop, and
    /// run the handshake (PASS?, NICK, USER — all send-now, per §6).
    pub async fn connect(&self) -> Result<(), Error> {
        self.cancel_pending_requests();
        self.engine.borrow_mut().reset_for_connect();

        {
            let mut conn = self.connection.borrow_mut();
            conn.connect().await?;
        }
        self.events.publish(Event::Connect);

        let incoming = self.connection.borrow_mut().incoming();
        let engine = self.engine.clone();
        let events = self.events.clone();
        let handle = tokio::task::spawn_local(async move {
            let mut incoming = incoming;
            while let Some(item) = incoming.next().await {
                match item {
                    Ok(line) => {
                        events.publish(Event::LineReceive { line: line.clone() });
                        match irc_wire::parse(&line) {
                            Ok(msg) => engine.borrow_mut().handle_message(&msg),
                            Err(err) => warn!("dropping malformed line {line:?}: {err}"),
                        }
                    }
                    Err(err) => {
                        engine.borrow_mut().mark_errored();
                        events.publish(Event::Error { kind: ErrorKind::Transport, message: err.to_string() });
                    }
                }
            }
        });
        self.reader_handle.replace(Some(handle));

        let queue_rx = self.queue_rx.borrow_mut().take().expect("connect called twice without disconnect");
        self.scheduler.borrow_mut().start(self.config.send_interval, queue_rx);

        if let Some(password) = &self.config.password {
            self.send_now(irc_wire::pass(password))?;
        }
        self.send_now(irc_wire::nick(&self.config.nickname))?;
        self.send_now(irc_wire::user(self.config.username(), &self.config.host, &self.config.realname))?;

        Ok(())
    }

    /// Cooperative shutdown (§5): QUIT is sent synchronously, the scheduler
    /// and reader are stopped, then the transport is torn down.
    pub async fn disconnect(&self, reason: Option<&str>) -> Result<(), Error> {
        self.send_now(irc_wire::quit(reason))?;
        self.scheduler.borrow_mut().stop();
        if let Some(handle) = self.reader_handle.borrow_mut().take() {
            handle.abort();
        }

        {
            let mut conn = self.connection.borrow_mut();
            conn.disconnect().await?;
        }
        self.cancel_pending_requests();
        self.events.publish(Event::Disconnect);
        Ok(())
    }

    pub fn send(&self, line: impl Into<String>, now: bool) -> Result<(), Error> {
        self.engine.borrow().send(line.into(), now)
    }

    fn send_now(&self, line: String) -> Result<(), Error> {
        self.send(line, true)
    }

    pub fn whois(&self, nick: impl Into<String>) -> oneshot::Receiver<Result<WhoisInfo, Error>> {
        let nick = nick.into();
        let (rx, pending) = bridge::await_whois(&self.events, nick.clone());
        self.bridge_pending.borrow_mut().push(pending);
        let _ = self.send(irc_wire::whois(&nick), false);
        rx
    }

    pub fn is_user_on(&self, name: impl Into<String>) -> oneshot::Receiver<Result<bool, Error>> {
        let name = name.into();
        let (rx, pending) = bridge::await_is_on(&self.events, name.clone());
        self.bridge_pending.borrow_mut().push(pending);
        let _ = self.send(irc_wire::ison(&[&name]), false);
        rx
    }

    pub fn get_server_version(&self, target: Option<&str>) -> oneshot::Receiver<Result<(String, String, String), Error>> {
        let (rx, pending) = bridge::await_server_version(&self.events);
        self.bridge_pending.borrow_mut().push(pending);
        let _ = self.send(irc_wire::version(target), false);
        rx
    }

    pub fn get_channel_topic(&self, chan: impl Into<String>) -> oneshot::Receiver<Result<String, Error>> {
        let chan = chan.into();
        let (rx, pending) = bridge::await_topic(&self.events, chan.clone());
        self.bridge_pending.borrow_mut().push(pending);
        let _ = self.send(irc_wire::topic_query(&chan), false);
        rx
    }

    /// Validates `topic` against the server's TOPICLEN before sending, if
    /// the server advertised one.
    pub fn set_channel_topic(&self, chan: &str, topic: &str) -> Result<(), Error> {
        if let Some(limit) = self.engine.borrow().supported().get("TOPICLEN").and_then(|v| v.parse::<usize>().ok()) {
            if topic.len() > limit {
                return Err(Error::TopicTooLong { len: topic.len(), limit });
            }
        }
        self.send(irc_wire::topic_set(chan, topic), false)
    }

    pub fn refresh_user_list(&self, chan: &str) -> Result<(), Error> {
        self.send(irc_wire::names(chan), false)
    }

    pub fn wallops(&self, msg: &str) -> Result<(), Error> {
        self.send(irc_wire::wallops(msg), false)
    }

    pub fn nickname(&self) -> String {
        self.engine.borrow().nickname().to_string()
    }

    pub fn is_ready(&self) -> bool {
        self.engine.borrow().is_ready()
    }

    pub fn is_errored(&self) -> bool {
        self.engine.borrow().is_errored()
    }

    pub fn motd(&self) -> String {
        self.engine.borrow().motd().to_string()
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.engine.borrow().channel(name).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.engine.borrow_mut().set_metadata(key, value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.engine.borrow().get_metadata(key).map(str::to_string)
    }

    pub fn subscribe(&self, kind: EventKind, callback: impl FnMut(&Event) + Send + 'static) -> SubscriptionHandle {
        self.events.subscribe(kind, callback)
    }

    pub fn subscribe_once(&self, kind: EventKind, callback: impl FnOnce(&Event) + Send + 'static) -> SubscriptionHandle {
        self.events.subscribe_once(kind, callback)
    }

    pub fn subscribe_filtered(
        &self,
        kind: EventKind,
        once: bool,
        predicate: impl Fn(&Event) -> bool + Send + 'static,
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> SubscriptionHandle {
        self.events.subscribe_filtered(kind, once, predicate, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::MockConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn run_local<F: std::future::Future>(f: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(f).await
    }

    #[tokio::test]
    async fn connect_sends_handshake_now_in_order() {
        run_local(async {
            let (_tx, rx) = mpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let mut config = Config::new("bot", "irc.example.net", 6667);
            config.realname = "Bot Realname".to_string();
            let client = Client::new(config, Box::new(conn));

            client.connect().await.unwrap();

            let sent = sent.borrow();
            assert_eq!(sent[0], "NICK bot");
            assert_eq!(sent[1], "USER bot bot irc.example.net :Bot Realname");
        })
        .await;
    }

    #[tokio::test]
    async fn connect_sends_pass_before_nick_when_configured() {
        run_local(async {
            let (_tx, rx) = mpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let mut config = Config::new("bot", "irc.example.net", 6667);
            config.password = Some("hunter2".to_string());
            let client = Client::new(config, Box::new(conn));

            client.connect().await.unwrap();

            let sent = sent.borrow();
            assert_eq!(sent[0], "PASS hunter2");
            assert_eq!(sent[1], "NICK bot");
        })
        .await;
    }

    #[tokio::test]
    async fn inbound_ping_is_answered_through_the_scheduler() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let sent = conn.sent.clone();
            let mut config = Config::new("bot", "irc.example.net", 6667);
            config.send_interval = Duration::from_millis(5);
            let client = Client::new(config, Box::new(conn));
            client.connect().await.unwrap();

            tx.send("PING :xyz".to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            assert!(sent.borrow().iter().any(|line| line == "PONG :xyz"));
        })
        .await;
    }

    #[tokio::test]
    async fn ready_event_fires_after_motd_end() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = MockConnection::new(rx);
            let client = Client::new(Config::new("bot", "irc.example.net", 6667), Box::new(conn));
            let ready_count = Arc::new(AtomicUsize::new(0));
            let ready_count2 = ready_count.clone();
            client.subscribe(EventKind::Ready, move |_| {
                ready_count2.fetch_add(1, Ordering::SeqCst);
            });
            client.connect().await.unwrap();

            tx.send(":srv 376 bot :End of /MOTD command.".to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;

            assert_eq!(ready_count.load(Ordering::SeqCst), 1);
            assert!(client.is_ready());
        })
        .await;
    }
}
