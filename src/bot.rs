//! Wires the pieces together: registry, gateway session, command
//! publisher and router.
//!
//! Startup order is connect → publish → serve. A publish failure tears the
//! session back down before the error is returned, so a half-started bot
//! never lingers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::commands;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::gateway::{Credentials, DiscordTransport, GatewayConfig, Transport};
use crate::http::DiscordHttpClient;
use crate::publisher::{CommandCatalog, CommandPublisher, CommandScope};
use crate::registry::CommandRegistry;
use crate::router::Router;
use crate::session::{GatewaySession, SessionOptions};
use crate::types::Presence;

/// Shown as "Watching your habits 📊".
pub const PRESENCE_ACTIVITY: &str = "your habits 📊";

/// How long shutdown waits for in-flight commands.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the bot until Ctrl-C or until the gateway connection is lost.
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    let scope = CommandScope::guild(&config.application_id, &config.guild_id);
    scope.validate()?;

    let transport = DiscordTransport::new(GatewayConfig {
        url: config.gateway_url.clone(),
        ..Default::default()
    });
    let registry = Arc::new(CommandRegistry::from_commands(commands::all(
        transport.latency(),
    ))?);
    info!(commands = ?registry, "command registry built");

    let http = Arc::new(
        DiscordHttpClient::new(config.token.clone()).with_base_url(config.api_base_url.clone()),
    );
    let router = Router::new(Arc::clone(&registry), http.clone())
        .with_execution_timeout(config.command_timeout);

    let session = GatewaySession::new(
        transport,
        SessionOptions {
            connect_timeout: config.connect_timeout,
            presence: Some(Presence::watching(PRESENCE_ACTIVITY)),
        },
    );
    session.on_ready(|ready| {
        info!(
            user = %ready.user.tag(),
            guilds = ready.guilds.len(),
            "bot is ready!"
        );
        Ok(())
    });
    session.on_event(router.observer());

    serve(
        &session,
        &router,
        &CommandPublisher::new(http),
        &scope,
        &Credentials::new(config.token),
        shutdown_signal(),
    )
    .await
}

/// Connect, publish the router's commands, then wait for `shutdown` or for
/// the session to end on its own.
pub async fn serve<T, C, S>(
    session: &GatewaySession<T>,
    router: &Router,
    publisher: &CommandPublisher<C>,
    scope: &CommandScope,
    credentials: &Credentials,
    shutdown: S,
) -> Result<(), BotError>
where
    T: Transport,
    C: CommandCatalog,
    S: Future<Output = ()>,
{
    session.connect(credentials).await?;

    if let Err(e) = publisher
        .publish(&session.subscribe(), router.registry().all(), scope)
        .await
    {
        error!(error = %e, "command publish failed, disconnecting");
        if let Err(de) = session.disconnect().await {
            warn!(error = %de, "disconnect after failed publish also failed");
        }
        return Err(e);
    }

    let lost = tokio::select! {
        _ = shutdown => {
            info!("shutdown requested");
            false
        }
        _ = session.closed() => {
            warn!("gateway session ended");
            true
        }
    };

    session.disconnect().await?;
    router.drain(DRAIN_TIMEOUT).await;
    info!("bot stopped");

    if lost {
        return Err(BotError::Network("gateway connection lost".to_string()));
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
