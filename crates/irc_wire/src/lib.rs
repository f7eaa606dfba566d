//! IRC wire protocol message parsing and generation, with IRCv3 message-tag
//! support (RFC 1459 / RFC 2812, plus the IRCv3 message-tags extension).
//!
//! This crate has no knowledge of sockets, async runtimes, or connection
//! state; it's pure functions over `&str`/`String`.

mod encode;
mod error;
mod message;
mod support;
mod tags;

pub use encode::*;
pub use error::Error;
pub use message::{parse, Hostmask, Message};
pub use support::{parse_isupport_token, parse_mode_change, parse_prefix, strip_name_prefix, ModeChange};
pub use tags::TagValue;

/// Maximum payload length of a single outbound line, excluding the `\r\n`
/// terminator (RFC 2812 §2.3).
pub const MAX_LINE_LEN: usize = 510;
