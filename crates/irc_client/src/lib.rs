mod bridge;
mod channel;
mod client;
mod config;
mod connection;
mod engine;
mod error;
mod event;
mod scheduler;
mod whois;

pub use channel::{Channel, Role};
pub use client::Client;
pub use config::Config;
pub use connection::{Connection, LineStream};
pub use error::Error;
pub use event::{ErrorKind, Event, EventBus, EventKind, SubscriptionHandle};
pub use whois::WhoisInfo;

pub use irc_wire as wire;
