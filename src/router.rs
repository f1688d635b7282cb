//! Routes inbound command invocations to registered commands.
//!
//! Every failure a command can produce (an error, a panic, running past
//! the execution timeout) ends the same way: the failure is logged with
//! its detail and the user gets one generic ephemeral error message.
//!
//! Discord drops an interaction that is not acknowledged within about three
//! seconds. A command that has sent nothing by the end of the ack window is
//! deferred on its behalf, so a late reply or error still reaches the user.
//!
//! Each outcome is logged once with a stable `outcome` field:
//! `completed`, `unknown_command` or `execution_failure`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::command::Invocation;
use crate::error::CommandError;
use crate::registry::CommandRegistry;
use crate::reply::{InteractionResponder, ReplyKind};
use crate::session::{panic_message, ObserverError};
use crate::types::Interaction;

/// What users see when a command fails.
pub const GENERIC_ERROR: &str = "❌ Something went wrong while running this command.";

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a command may run before the router defers its reply.
pub const DEFAULT_ACK_WINDOW: Duration = Duration::from_millis(2500);

#[derive(Debug)]
pub enum DispatchOutcome {
    Completed,
    UnknownCommand,
    Failed(CommandError),
}

#[derive(Clone)]
pub struct Router {
    registry: Arc<CommandRegistry>,
    responder: Arc<dyn InteractionResponder>,
    tracker: TaskTracker,
    execution_timeout: Duration,
    ack_window: Duration,
}

impl Router {
    pub fn new(registry: Arc<CommandRegistry>, responder: Arc<dyn InteractionResponder>) -> Self {
        Self {
            registry,
            responder,
            tracker: TaskTracker::new(),
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            ack_window: DEFAULT_ACK_WINDOW,
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_ack_window(mut self, window: Duration) -> Self {
        self.ack_window = window;
        self
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Run one invocation to completion.
    pub async fn dispatch(&self, invocation: Invocation) -> DispatchOutcome {
        let user = invocation.user.tag();

        let Some(command) = self.registry.lookup(&invocation.command_name) else {
            warn!(
                command = %invocation.command_name,
                user = %user,
                outcome = "unknown_command",
                "unknown command"
            );
            return DispatchOutcome::UnknownCommand;
        };

        debug!(command = %invocation.command_name, user = %user, "dispatching command");

        let run = AssertUnwindSafe(command.execute(&invocation)).catch_unwind();
        let guarded = async {
            tokio::pin!(run);
            let deferral = self.defer_when_ack_window_ends(&invocation);
            tokio::pin!(deferral);
            let mut deferral_done = false;
            loop {
                tokio::select! {
                    out = &mut run => break out,
                    _ = &mut deferral, if !deferral_done => deferral_done = true,
                }
            }
        };
        let result = match tokio::time::timeout(self.execution_timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CommandError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(CommandError::TimedOut(self.execution_timeout)),
        };

        match result {
            Ok(()) => {
                info!(
                    command = %invocation.command_name,
                    user = %user,
                    outcome = "completed",
                    "command completed"
                );
                DispatchOutcome::Completed
            }
            Err(err) => {
                error!(
                    command = %invocation.command_name,
                    user = %user,
                    error = %err,
                    outcome = "execution_failure",
                    "command failed"
                );
                match invocation.reply.send_error(GENERIC_ERROR).await {
                    Ok(ReplyKind::Initial) => debug!("sent error reply"),
                    Ok(ReplyKind::FollowUp) => debug!("sent error follow-up"),
                    Err(e) => error!(
                        command = %invocation.command_name,
                        error = %e,
                        "failed to send error reply"
                    ),
                }
                DispatchOutcome::Failed(err)
            }
        }
    }

    async fn defer_when_ack_window_ends(&self, invocation: &Invocation) {
        tokio::time::sleep(self.ack_window).await;
        match invocation.reply.defer_if_unused(true).await {
            Ok(true) => debug!(command = %invocation.command_name, "deferred slow command"),
            Ok(false) => {}
            Err(e) => warn!(
                command = %invocation.command_name,
                error = %e,
                "failed to defer slow command"
            ),
        }
    }

    /// Session event observer that spawns a dispatch per command interaction.
    pub fn observer(&self) -> impl Fn(&Interaction) -> Result<(), ObserverError> + Send + Sync + 'static {
        let router = self.clone();
        move |interaction: &Interaction| {
            let Some(invocation) =
                Invocation::from_interaction(interaction, Arc::clone(&router.responder))
            else {
                debug!(interaction_id = %interaction.id, "ignoring non-command interaction");
                return Ok(());
            };
            let task_router = router.clone();
            router.tracker.spawn(async move {
                task_router.dispatch(invocation).await;
            });
            Ok(())
        }
    }

    /// Number of dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for in-flight dispatches. Returns `false` if some
    /// were still running when the time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(pending = self.tracker.len(), "dispatches still running after drain timeout");
        }
        drained
    }
}
