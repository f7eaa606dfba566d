use thiserror::Error;

/// Errors produced by the wire parser and support utilities.
///
/// These never tear down a connection on their own — see the propagation
/// policy in the crate-level docs of `irc_client`.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("malformed IRC line: {0:?}")]
    MalformedLine(String),

    #[error("invalid mode string: {0:?}")]
    InvalidMode(String),
}
