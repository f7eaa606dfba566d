use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("line is {len} bytes, over the {limit}-byte limit")]
    LineTooLong { len: usize, limit: usize },

    #[error("topic is {len} bytes, over the server's TOPICLEN ({limit})")]
    TopicTooLong { len: usize, limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Reserved for the `ProtocolError` kind in §7's error taxonomy; server
    /// `ERROR` lines currently surface only as `Event::Error { kind: Server
    /// }` (event-only, no `Result` to carry this into), so this variant is
    /// not constructed yet.
    #[error("server reported an error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Wire(#[from] irc_wire::Error),

    /// A bridge request (`whois`, `isUserOn`, ...) was still pending when
    /// the connection was torn down.
    #[error("connection closed with the request still pending")]
    Disconnected,
}
