use std::time::Duration;

/// Connection configuration (§6). Loading this from a file or CLI args is
/// out of scope for this crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub nickname: String,
    pub username: Option<String>,
    pub realname: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub send_interval: Duration,
}

impl Config {
    pub fn new(nickname: impl Into<String>, host: impl Into<String>, port: u16) -> Config {
        Config {
            nickname: nickname.into(),
            username: None,
            realname: String::new(),
            host: host.into(),
            port,
            password: None,
            send_interval: Duration::from_millis(100),
        }
    }

    /// `username`, defaulting to `nickname` when unset.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }
}
