//! The WHOIS accumulator: fields trickle in across numerics 311-319/330,
//! keyed by target nickname, and are emitted as one `Whois` event on 318.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct WhoisInfo {
    pub nick: String,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub server_info: Option<String>,
    pub operator: bool,
    pub idle_seconds: Option<u64>,
    pub account: Option<String>,
    pub channels: HashSet<String>,
    pub op_in: HashSet<String>,
    pub voice_in: HashSet<String>,
    pub half_op_in: HashSet<String>,
    pub owner_in: HashSet<String>,
}

impl WhoisInfo {
    pub fn new(nick: impl Into<String>) -> WhoisInfo {
        WhoisInfo {
            nick: nick.into(),
            ..WhoisInfo::default()
        }
    }
}
