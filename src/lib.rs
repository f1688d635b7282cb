//! A Discord slash-command bot for habit tracking.
//!
//! The crate is split along the life of an interaction:
//! [`gateway`] owns the WebSocket, [`session`] owns its lifecycle,
//! [`publisher`] pushes command declarations over REST, and [`router`]
//! hands each inbound invocation to a command from the [`registry`].
//! [`bot::run`] wires it all together.

pub mod bot;
pub mod command;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod publisher;
pub mod registry;
pub mod reply;
pub mod router;
pub mod session;
pub mod types;

pub use command::{Command, Invocation, OptionSpec};
pub use config::BotConfig;
pub use error::{BotError, CommandError};
pub use registry::{CommandRegistry, RegistryBuilder};
pub use session::{GatewaySession, SessionState};
