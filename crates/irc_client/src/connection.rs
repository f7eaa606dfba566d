//! The transport contract (§6). The byte transport itself — TCP/TLS socket,
//! log file, test harness — is an external collaborator; this crate only
//! defines the interface the engine drives it through and, in tests, a
//! trivial in-memory implementation.
//!
//! The engine is a single-threaded actor (see `SPEC_FULL.md` §5), so this
//! trait and its `LineStream` are `?Send`: they only ever run on the
//! `LocalSet` the engine is spawned on.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Error;

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, Error>>>>;

/// What the engine needs from a connection: establish it, push outbound
/// lines, pull a stream of inbound lines (terminator already stripped), and
/// tear it down.
///
/// `send` is synchronous by design: it hands the line to the transport's own
/// write buffering and returns without waiting for the write to land on the
/// wire, matching the "send(line)" entry in the transport contract (only
/// `connect`/`disconnect` are listed as returning a future).
#[async_trait(?Send)]
pub trait Connection {
    async fn connect(&mut self) -> Result<(), Error>;
    fn send(&self, line: &str) -> Result<(), Error>;
    fn incoming(&mut self) -> LineStream;
    async fn disconnect(&mut self) -> Result<(), Error>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use futures::stream::StreamExt;
    use tokio::sync::mpsc;

    /// An in-memory `Connection` for tests: `incoming_rx` feeds lines into
    /// `incoming()`, and every `send` is recorded in `sent`.
    pub struct MockConnection {
        pub sent: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
        incoming_rx: Option<mpsc::UnboundedReceiver<String>>,
    }

    impl MockConnection {
        pub fn new(incoming_rx: mpsc::UnboundedReceiver<String>) -> MockConnection {
            MockConnection {
                sent: std::rc::Rc::new(std::cell::RefCell::new(Vec::new())),
                incoming_rx: Some(incoming_rx),
            }
        }
    }

    #[async_trait(?Send)]
    impl Connection for MockConnection {
        async fn connect(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn send(&self, line: &str) -> Result<(), Error> {
            self.sent.borrow_mut().push(line.to_string());
            Ok(())
        }

        fn incoming(&mut self) -> LineStream {
            let rx = self.incoming_rx.take().expect("incoming() called twice");
            Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(Ok))
        }

        async fn disconnect(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }
}
