//! The reply capability handed to each command invocation.
//!
//! Discord lets an interaction be answered exactly once (a message or a
//! deferred "thinking" placeholder), after which only edits and follow-ups
//! are accepted. [`ReplyChannel`] tracks that progression explicitly:
//!
//! ```text
//! Unused ──reply──▶ Responding ──▶ Replied ──follow_up──▶ FollowedUp
//!    └────defer──▶ Responding ──▶ Deferred ──edit──▶ Replied
//! ```
//!
//! The state sits behind an async mutex that is held across the remote call,
//! so a command's own reply and the router's fallback error reply can never
//! both be sent as the initial response.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::http::HttpError;
use crate::types::{InteractionCallbackData, InteractionResponse, SentMessage};

/// Where a reply goes: the interaction id plus its webhook token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub application_id: String,
    pub interaction_id: String,
    pub token: String,
}

/// Remote operations a reply channel needs. Implemented by
/// [`DiscordHttpClient`](crate::http::DiscordHttpClient).
#[async_trait]
pub trait InteractionResponder: Send + Sync {
    /// Send the initial response. Returns the created message when Discord
    /// reports one.
    async fn create_response(
        &self,
        target: &ReplyTarget,
        response: &InteractionResponse,
    ) -> Result<Option<SentMessage>, HttpError>;

    async fn edit_original(
        &self,
        target: &ReplyTarget,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError>;

    async fn create_followup(
        &self,
        target: &ReplyTarget,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Nothing has been sent yet.
    Unused,
    /// An initial response is in flight, or its call was abandoned midway.
    /// Discord may have accepted it, so it counts as responded.
    Responding,
    /// A "thinking" placeholder is showing.
    Deferred,
    /// The initial response has been sent.
    Replied,
    /// At least one follow-up message has been sent.
    FollowedUp,
}

impl ReplyState {
    pub fn has_responded(self) -> bool {
        self != ReplyState::Unused
    }
}

/// Which kind of message carried a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Initial,
    FollowUp,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("interaction already has an initial response")]
    AlreadyResponded,
    #[error("interaction has not been responded to yet")]
    NotResponded,
    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug)]
struct Progress {
    state: ReplyState,
    /// Deferred by the router rather than the command; the command's own
    /// reply then fills in the placeholder.
    auto_deferred: bool,
}

/// Single-writer reply capability for one interaction. Clones share state.
#[derive(Clone)]
pub struct ReplyChannel {
    target: ReplyTarget,
    responder: Arc<dyn InteractionResponder>,
    progress: Arc<Mutex<Progress>>,
}

impl ReplyChannel {
    pub fn new(target: ReplyTarget, responder: Arc<dyn InteractionResponder>) -> Self {
        Self {
            target,
            responder,
            progress: Arc::new(Mutex::new(Progress {
                state: ReplyState::Unused,
                auto_deferred: false,
            })),
        }
    }

    pub fn target(&self) -> &ReplyTarget {
        &self.target
    }

    pub async fn state(&self) -> ReplyState {
        self.progress.lock().await.state
    }

    pub async fn has_responded(&self) -> bool {
        self.state().await.has_responded()
    }

    /// Send the initial response message.
    ///
    /// After an automatic deferral this edits the placeholder instead, and
    /// no message is returned.
    pub async fn reply(
        &self,
        data: InteractionCallbackData,
    ) -> Result<Option<SentMessage>, ReplyError> {
        let mut progress = self.progress.lock().await;
        if progress.state == ReplyState::Deferred && progress.auto_deferred {
            self.responder.edit_original(&self.target, &data).await?;
            progress.state = ReplyState::Replied;
            progress.auto_deferred = false;
            return Ok(None);
        }
        if progress.state.has_responded() {
            return Err(ReplyError::AlreadyResponded);
        }
        let message = self
            .respond(&mut progress, &InteractionResponse::message(data), ReplyState::Replied)
            .await?;
        Ok(message)
    }

    /// Acknowledge now and answer later with [`edit`](Self::edit).
    pub async fn defer(&self, ephemeral: bool) -> Result<(), ReplyError> {
        let mut progress = self.progress.lock().await;
        if progress.state.has_responded() {
            return Err(ReplyError::AlreadyResponded);
        }
        self.respond(
            &mut progress,
            &InteractionResponse::deferred(ephemeral),
            ReplyState::Deferred,
        )
        .await?;
        Ok(())
    }

    /// Defer on the command's behalf if nothing has been sent yet. Returns
    /// whether a deferral was sent.
    pub async fn defer_if_unused(&self, ephemeral: bool) -> Result<bool, ReplyError> {
        let mut progress = self.progress.lock().await;
        if progress.state.has_responded() {
            return Ok(false);
        }
        self.respond(
            &mut progress,
            &InteractionResponse::deferred(ephemeral),
            ReplyState::Deferred,
        )
        .await?;
        progress.auto_deferred = true;
        Ok(true)
    }

    /// Replace the content of the initial response.
    pub async fn edit(&self, data: InteractionCallbackData) -> Result<(), ReplyError> {
        let mut progress = self.progress.lock().await;
        if !progress.state.has_responded() {
            return Err(ReplyError::NotResponded);
        }
        self.responder.edit_original(&self.target, &data).await?;
        if progress.state == ReplyState::Deferred {
            progress.state = ReplyState::Replied;
            progress.auto_deferred = false;
        }
        Ok(())
    }

    /// Post an additional message after the initial response.
    pub async fn follow_up(&self, data: InteractionCallbackData) -> Result<(), ReplyError> {
        let mut progress = self.progress.lock().await;
        if !progress.state.has_responded() {
            return Err(ReplyError::NotResponded);
        }
        self.responder.create_followup(&self.target, &data).await?;
        progress.state = ReplyState::FollowedUp;
        Ok(())
    }

    /// Send an ephemeral error notice, choosing the initial response or a
    /// follow-up depending on what has already been sent. The check and the
    /// send happen under one lock.
    pub async fn send_error(&self, content: &str) -> Result<ReplyKind, ReplyError> {
        let data = InteractionCallbackData::text(content).ephemeral();
        let mut progress = self.progress.lock().await;
        if progress.state.has_responded() {
            self.responder.create_followup(&self.target, &data).await?;
            progress.state = ReplyState::FollowedUp;
            Ok(ReplyKind::FollowUp)
        } else {
            self.respond(&mut progress, &InteractionResponse::message(data), ReplyState::Replied)
                .await?;
            Ok(ReplyKind::Initial)
        }
    }

    /// Send an initial response. The state moves to `Responding` before the
    /// call so a dropped future still counts as responded; only a definite
    /// error rolls it back.
    async fn respond(
        &self,
        progress: &mut Progress,
        response: &InteractionResponse,
        done: ReplyState,
    ) -> Result<Option<SentMessage>, HttpError> {
        progress.state = ReplyState::Responding;
        match self.responder.create_response(&self.target, response).await {
            Ok(message) => {
                progress.state = done;
                Ok(message)
            }
            Err(e) => {
                progress.state = ReplyState::Unused;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("interaction_id", &self.target.interaction_id)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::InteractionCallbackType;

    fn channel() -> (Arc<RecordingResponder>, ReplyChannel) {
        let responder = Arc::new(RecordingResponder::default());
        let channel = ReplyChannel::new(target(), responder.clone());
        (responder, channel)
    }

    static_assertions::assert_impl_all!(ReplyChannel: Send, Sync, Clone);

    #[tokio::test]
    async fn reply_moves_unused_to_replied() {
        let (responder, channel) = channel();
        assert_eq!(channel.state().await, ReplyState::Unused);

        channel.reply(InteractionCallbackData::text("pong")).await.unwrap();
        assert_eq!(channel.state().await, ReplyState::Replied);
        assert_eq!(responder.sent().len(), 1);
    }

    #[tokio::test]
    async fn second_reply_is_rejected_without_sending() {
        let (responder, channel) = channel();
        channel.reply(InteractionCallbackData::text("one")).await.unwrap();

        let err = channel.reply(InteractionCallbackData::text("two")).await;
        assert!(matches!(err, Err(ReplyError::AlreadyResponded)));
        assert_eq!(responder.sent().len(), 1);
    }

    #[tokio::test]
    async fn edit_and_follow_up_need_a_response_first() {
        let (responder, channel) = channel();
        assert!(matches!(
            channel.edit(InteractionCallbackData::text("x")).await,
            Err(ReplyError::NotResponded)
        ));
        assert!(matches!(
            channel.follow_up(InteractionCallbackData::text("x")).await,
            Err(ReplyError::NotResponded)
        ));
        assert!(responder.sent().is_empty());
    }

    #[tokio::test]
    async fn defer_then_edit_becomes_replied() {
        let (responder, channel) = channel();
        channel.defer(true).await.unwrap();
        assert_eq!(channel.state().await, ReplyState::Deferred);

        channel.edit(InteractionCallbackData::text("done")).await.unwrap();
        assert_eq!(channel.state().await, ReplyState::Replied);

        let sent = responder.sent();
        assert!(matches!(
            &sent[0],
            Sent::Response(InteractionCallbackType::DeferredChannelMessageWithSource, Some(d))
                if d.is_ephemeral()
        ));
        assert!(matches!(&sent[1], Sent::Edit(_)));
    }

    #[tokio::test]
    async fn send_error_uses_initial_response_when_unused() {
        let (responder, channel) = channel();
        let kind = channel.send_error("oops").await.unwrap();
        assert_eq!(kind, ReplyKind::Initial);

        match &responder.sent()[..] {
            [Sent::Response(InteractionCallbackType::ChannelMessageWithSource, Some(data))] => {
                assert_eq!(data.content.as_deref(), Some("oops"));
                assert!(data.is_ephemeral());
            }
            other => panic!("unexpected sends: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_error_follows_up_after_reply_or_defer() {
        let (responder, channel) = channel();
        channel.reply(InteractionCallbackData::text("partial")).await.unwrap();
        assert_eq!(channel.send_error("oops").await.unwrap(), ReplyKind::FollowUp);
        assert_eq!(channel.state().await, ReplyState::FollowedUp);
        assert!(matches!(responder.sent().last(), Some(Sent::FollowUp(d)) if d.is_ephemeral()));

        let (responder, channel) = self::channel();
        channel.defer(false).await.unwrap();
        assert_eq!(channel.send_error("oops").await.unwrap(), ReplyKind::FollowUp);
        assert_eq!(responder.sent().len(), 2);
    }

    #[tokio::test]
    async fn failed_send_leaves_state_unchanged() {
        let channel = ReplyChannel::new(target(), Arc::new(RecordingResponder::failing()));
        assert!(matches!(
            channel.reply(InteractionCallbackData::text("x")).await,
            Err(ReplyError::Http(_))
        ));
        assert_eq!(channel.state().await, ReplyState::Unused);
    }

    #[tokio::test]
    async fn reply_returns_the_created_message() {
        let responder = Arc::new(RecordingResponder::returning("175928847299117063"));
        let channel = ReplyChannel::new(target(), responder);
        let message = channel
            .reply(InteractionCallbackData::text("pong"))
            .await
            .unwrap();
        assert_eq!(message.map(|m| m.id).as_deref(), Some("175928847299117063"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_reply_counts_as_responded() {
        let responder = Arc::new(RecordingResponder::stalling());
        let channel = ReplyChannel::new(target(), responder.clone());

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            channel.reply(InteractionCallbackData::text("pong")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(channel.state().await, ReplyState::Responding);
        assert!(matches!(
            channel.reply(InteractionCallbackData::text("again")).await,
            Err(ReplyError::AlreadyResponded)
        ));

        assert_eq!(channel.send_error("oops").await.unwrap(), ReplyKind::FollowUp);
        let sent = responder.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Response(InteractionCallbackType::ChannelMessageWithSource, _)));
        assert!(matches!(&sent[1], Sent::FollowUp(d) if d.content.as_deref() == Some("oops")));
    }

    #[tokio::test]
    async fn reply_after_automatic_deferral_fills_the_placeholder() {
        let (responder, channel) = channel();
        assert!(channel.defer_if_unused(true).await.unwrap());
        assert!(!channel.defer_if_unused(true).await.unwrap());

        let message = channel.reply(InteractionCallbackData::text("late")).await.unwrap();
        assert!(message.is_none());
        assert_eq!(channel.state().await, ReplyState::Replied);
        assert!(matches!(
            channel.reply(InteractionCallbackData::text("again")).await,
            Err(ReplyError::AlreadyResponded)
        ));

        let sent = responder.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0],
            Sent::Response(InteractionCallbackType::DeferredChannelMessageWithSource, _)
        ));
        assert!(matches!(&sent[1], Sent::Edit(d) if d.content.as_deref() == Some("late")));
    }

    #[tokio::test]
    async fn explicit_defer_still_rejects_a_reply() {
        let (_responder, channel) = channel();
        channel.defer(false).await.unwrap();
        assert!(matches!(
            channel.reply(InteractionCallbackData::text("x")).await,
            Err(ReplyError::AlreadyResponded)
        ));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let (_responder, channel) = channel();
        let clone = channel.clone();
        clone.reply(InteractionCallbackData::text("x")).await.unwrap();
        assert!(channel.has_responded().await);
    }
}
