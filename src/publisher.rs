//! Pushes the registry's declarations to Discord's command catalog.
//!
//! Publishing is a full replace: whatever the scope held before is swapped
//! for exactly the commands given, so an empty list clears the scope.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info};

use crate::command::Command;
use crate::error::BotError;
use crate::http::HttpError;
use crate::session::SessionState;
use crate::types::ApplicationCommand;

/// Where commands are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandScope {
    /// Visible in one guild, updated immediately.
    Guild {
        application_id: String,
        guild_id: String,
    },
    /// Visible everywhere the application is installed.
    Global { application_id: String },
}

impl CommandScope {
    pub fn guild(application_id: impl Into<String>, guild_id: impl Into<String>) -> Self {
        CommandScope::Guild {
            application_id: application_id.into(),
            guild_id: guild_id.into(),
        }
    }

    pub fn global(application_id: impl Into<String>) -> Self {
        CommandScope::Global {
            application_id: application_id.into(),
        }
    }

    /// Ids must be non-empty decimal snowflakes.
    pub fn validate(&self) -> Result<(), BotError> {
        match self {
            CommandScope::Guild {
                application_id,
                guild_id,
            } => {
                check_id("application id", application_id)?;
                check_id("guild id", guild_id)
            }
            CommandScope::Global { application_id } => check_id("application id", application_id),
        }
    }
}

impl std::fmt::Display for CommandScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandScope::Guild { guild_id, .. } => write!(f, "guild {}", guild_id),
            CommandScope::Global { .. } => f.write_str("global"),
        }
    }
}

fn check_id(what: &str, id: &str) -> Result<(), BotError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BotError::Configuration(format!(
            "{} must be a numeric snowflake, got {:?}",
            what, id
        )));
    }
    Ok(())
}

/// Remote store of application command declarations.
#[async_trait]
pub trait CommandCatalog: Send + Sync {
    /// Replace every command in `scope` with `commands`.
    async fn replace_commands(
        &self,
        scope: &CommandScope,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError>;
}

#[async_trait]
impl<C: CommandCatalog + ?Sized> CommandCatalog for Arc<C> {
    async fn replace_commands(
        &self,
        scope: &CommandScope,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        (**self).replace_commands(scope, commands).await
    }
}

pub struct CommandPublisher<C> {
    catalog: C,
}

impl<C: CommandCatalog> CommandPublisher<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// Publish `commands` to `scope`. The session watched by `state` must be
    /// connected at the time of the call.
    ///
    /// Returns the catalog's view of the scope after the replace.
    pub async fn publish(
        &self,
        state: &watch::Receiver<SessionState>,
        commands: &[Arc<dyn Command>],
        scope: &CommandScope,
    ) -> Result<Vec<ApplicationCommand>, BotError> {
        let state = *state.borrow();
        if state != SessionState::Connected {
            return Err(BotError::InvalidState {
                expected: SessionState::Connected,
                actual: state,
            });
        }
        scope.validate()?;

        let declarations: Vec<ApplicationCommand> =
            commands.iter().map(|c| c.declaration()).collect();
        info!(
            scope = %scope,
            count = declarations.len(),
            "publishing application commands"
        );

        match self.catalog.replace_commands(scope, &declarations).await {
            Ok(published) => {
                info!(
                    scope = %scope,
                    count = published.len(),
                    "application commands published"
                );
                Ok(published)
            }
            Err(e) => {
                error!(scope = %scope, error = %e, "failed to publish application commands");
                Err(e.into())
            }
        }
    }
}
