//! The bot's slash commands.

mod checkin;
mod hello;
mod ping;

use std::sync::Arc;

use crate::command::Command;
use crate::gateway::Latency;

pub use checkin::{CheckinKind, CheckinTest};
pub use hello::Hello;
pub use ping::Ping;

/// Every command the bot ships with, in publish order.
pub fn all(latency: Latency) -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(Ping::new(latency)),
        Arc::new(Hello),
        Arc::new(CheckinTest),
    ]
}
