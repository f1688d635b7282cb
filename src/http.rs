//! HTTP client for the Discord REST API.
//!
//! All outbound HTTP calls go through [`DiscordHttpClient`] so that auth
//! headers, rate-limit back-off, and error handling live in one place.
//! The client is the production implementation of both
//! [`InteractionResponder`] (reply channel) and [`CommandCatalog`]
//! (command publication).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::publisher::{CommandCatalog, CommandScope};
use crate::reply::{InteractionResponder, ReplyTarget};
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = "DiscordBot (https://github.com/habit-tracker/habit-bot, 0.1)";
const MAX_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct RateLimiter {
    /// Route-key → bucket id mapping.
    route_buckets: HashMap<String, String>,
    /// Bucket id → state.
    buckets: HashMap<String, BucketState>,
    /// Global rate-limit: if set, no requests may be sent until this instant.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// Returns how long we should wait before sending a request on `route_key`,
    /// or `None` if we can send immediately.
    fn delay_for(&self, route_key: &str) -> Option<Duration> {
        let now = Instant::now();
        if let Some(until) = self.global_until {
            if until > now {
                return Some(until - now);
            }
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;

        if state.remaining == 0 && state.resets_at > now {
            return Some(state.resets_at - now);
        }

        None
    }

    /// Update internal state from response headers.
    fn update(&mut self, route_key: &str, info: &RateLimitInfo) {
        let reset_after = info
            .reset_after
            .map(|s| Duration::from_secs_f64(s.clamp(0.0, 60.0)));

        if info.is_global {
            if let Some(delay) = reset_after {
                self.global_until = Some(Instant::now() + delay);
            }
        }

        if let Some(ref bucket) = info.bucket {
            self.route_buckets
                .insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: Instant::now() + reset_after.unwrap_or(Duration::from_secs(1)),
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after").and_then(|s| s.parse().ok()),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    /// Transport / network error.
    #[error("HTTP transport error: {0}")]
    Transport(String),
    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serde(String),
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin, rate-limit–aware HTTP client for the Discord REST API.
///
/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    token: Arc<str>,
    base_url: Arc<str>,
    client: reqwest::Client,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    /// Create a new client with the given bot token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().into(),
            base_url: DEFAULT_API_BASE_URL.into(),
            client: reqwest::Client::new(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    /// Point the client at another API root (proxies, mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').into();
        self
    }

    /// Send a request to `{base_url}/{path}`.
    ///
    /// `route_key` is used for per-route rate-limit bucketing. It should be a
    /// template like `POST /interactions/callback`.
    ///
    /// Returns the raw response body on success. 429s are retried after
    /// Discord's `retry_after`; every other failure is returned as-is.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            let delay = self.limiter.lock().await.delay_for(route_key);
            if let Some(delay) = delay {
                let delay = delay.min(Duration::from_secs(60));
                debug!(
                    route = route_key,
                    delay_ms = delay.as_millis() as u64,
                    "rate-limit pre-emptive backoff"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("authorization", format!("Bot {}", self.token))
                .header("user-agent", USER_AGENT);
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status();
            let rl_info = parse_rate_limit_headers(resp.headers());
            self.limiter.lock().await.update(route_key, &rl_info);

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = rl_info.reset_after.unwrap_or(1.0).clamp(0.0, 60.0);
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = rl_info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            if status.is_success() {
                return Ok(bytes.to_vec());
            }

            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
                route: route_key.to_string(),
            });
        }

        Err(HttpError::Api {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`request`](Self::request) but deserialises the response body as JSON.
    pub async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route_key, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let raw = String::from_utf8_lossy(&bytes);
            HttpError::Serde(format!("{}: {}", e, raw.chars().take(200).collect::<String>()))
        })
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Respond to an interaction (initial response).
    ///
    /// Asks Discord to describe what the callback created, so a message
    /// response yields the created message. A body that cannot be read is
    /// logged and treated as "no message": the response was still accepted.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<Option<SentMessage>, HttpError> {
        let path = format!(
            "interactions/{}/{}/callback?with_response=true",
            interaction_id, interaction_token
        );
        let body = serde_json::to_value(response).map_err(|e| HttpError::Serde(e.to_string()))?;
        let bytes = self
            .request(Method::POST, &path, "POST /interactions/callback", Some(&body))
            .await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<InteractionCallbackResponse>(&bytes) {
            Ok(callback) => Ok(callback.resource.and_then(|r| r.message)),
            Err(e) => {
                warn!(error = %e, "unreadable interaction callback body");
                Ok(None)
            }
        }
    }

    /// Edit the original interaction response (deferred or replied).
    pub async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        let path = format!(
            "webhooks/{}/{}/messages/@original",
            application_id, interaction_token
        );
        let body = serde_json::to_value(data).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request(
            Method::PATCH,
            &path,
            "PATCH /webhooks/interaction/messages/@original",
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Send a follow-up message for an interaction that was already answered.
    pub async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        let path = format!("webhooks/{}/{}", application_id, interaction_token);
        let body = serde_json::to_value(data).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request(Method::POST, &path, "POST /webhooks/interaction", Some(&body))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slash command registration
    // ------------------------------------------------------------------

    /// Register (or overwrite) guild-scoped application commands.
    pub async fn bulk_overwrite_guild_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!(
            "applications/{}/guilds/{}/commands",
            application_id, guild_id
        );
        let route_key = format!("PUT /{}", path);
        let body = serde_json::to_value(commands).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request_json(Method::PUT, &path, &route_key, Some(&body))
            .await
    }

    /// Register (or overwrite) global application commands.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{}/commands", application_id);
        let route_key = format!("PUT /{}", path);
        let body = serde_json::to_value(commands).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request_json(Method::PUT, &path, &route_key, Some(&body))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl InteractionResponder for DiscordHttpClient {
    async fn create_response(
        &self,
        target: &ReplyTarget,
        response: &InteractionResponse,
    ) -> Result<Option<SentMessage>, HttpError> {
        self.create_interaction_response(&target.interaction_id, &target.token, response)
            .await
    }

    async fn edit_original(
        &self,
        target: &ReplyTarget,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        self.edit_original_interaction_response(&target.application_id, &target.token, data)
            .await
    }

    async fn create_followup(
        &self,
        target: &ReplyTarget,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        self.create_followup_message(&target.application_id, &target.token, data)
            .await
    }
}

#[async_trait]
impl CommandCatalog for DiscordHttpClient {
    async fn replace_commands(
        &self,
        scope: &CommandScope,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        match scope {
            CommandScope::Guild {
                application_id,
                guild_id,
            } => {
                self.bulk_overwrite_guild_commands(application_id, guild_id, commands)
                    .await
            }
            CommandScope::Global { application_id } => {
                self.bulk_overwrite_global_commands(application_id, commands)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static_assertions::assert_impl_all!(DiscordHttpClient: Send, Sync, Clone);

    fn declaration(name: &str) -> ApplicationCommand {
        ApplicationCommand {
            id: None,
            name: name.to_string(),
            description: format!("{name} command"),
            options: Vec::new(),
            kind: CHAT_INPUT_COMMAND,
        }
    }

    #[test]
    fn limiter_waits_on_exhausted_bucket() {
        let mut limiter = RateLimiter::default();
        assert!(limiter.delay_for("PUT /x").is_none());

        limiter.update(
            "PUT /x",
            &RateLimitInfo {
                remaining: Some(0),
                reset_after: Some(5.0),
                bucket: Some("abc".to_string()),
                is_global: false,
            },
        );
        let delay = limiter.delay_for("PUT /x").unwrap();
        assert!(delay > Duration::from_secs(4));
        assert!(limiter.delay_for("PUT /y").is_none());
    }

    #[test]
    fn global_limit_applies_to_every_route() {
        let mut limiter = RateLimiter::default();
        limiter.update(
            "POST /a",
            &RateLimitInfo {
                reset_after: Some(2.0),
                is_global: true,
                ..Default::default()
            },
        );
        assert!(limiter.delay_for("GET /anything").is_some());
    }

    #[test]
    fn rate_limit_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "3".parse().unwrap());
        headers.insert("x-ratelimit-reset-after", "1.5".parse().unwrap());
        headers.insert("x-ratelimit-bucket", "bkt".parse().unwrap());
        let info = parse_rate_limit_headers(&headers);
        assert_eq!(info.remaining, Some(3));
        assert_eq!(info.reset_after, Some(1.5));
        assert_eq!(info.bucket.as_deref(), Some("bkt"));
        assert!(!info.is_global);
    }

    #[test]
    fn debug_redacts_token() {
        let client = DiscordHttpClient::new("super-secret");
        assert!(!format!("{client:?}").contains("super-secret"));
    }

    #[tokio::test]
    async fn guild_publish_puts_full_command_list() {
        let server = MockServer::start().await;
        let commands = vec![declaration("ping"), declaration("hello")];

        Mock::given(method("PUT"))
            .and(path("/applications/42/guilds/7/commands"))
            .and(header("authorization", "Bot tok"))
            .and(body_json(json!([
                { "name": "ping", "description": "ping command", "type": 1 },
                { "name": "hello", "description": "hello command", "type": 1 },
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "1", "name": "ping", "description": "ping command", "type": 1 },
                { "id": "2", "name": "hello", "description": "hello command", "type": 1 },
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let scope = CommandScope::guild("42", "7");
        let registered = client.replace_commands(&scope, &commands).await.unwrap();
        assert_eq!(registered.len(), 2);
        assert_eq!(registered[0].id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn rejected_publish_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":50035}"))
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let err = client
            .bulk_overwrite_global_commands("42", &[declaration("ping")])
            .await
            .unwrap_err();
        match err {
            HttpError::Api { status, body, .. } => {
                assert_eq!(status, 400);
                assert!(body.contains("50035"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interaction_callback_accepts_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/99/tok-abc/callback"))
            .and(body_json(json!({ "type": 4, "data": { "content": "hi" } })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let target = ReplyTarget {
            application_id: "42".to_string(),
            interaction_id: "99".to_string(),
            token: "tok-abc".to_string(),
        };
        let message = client
            .create_response(
                &target,
                &InteractionResponse::message(InteractionCallbackData::text("hi")),
            )
            .await
            .unwrap();
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn interaction_callback_returns_created_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/99/tok-abc/callback"))
            .and(query_param("with_response", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "interaction": { "id": "99", "type": 2 },
                "resource": {
                    "type": 4,
                    "message": { "id": "175928847299117063", "content": "hi" }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let target = ReplyTarget {
            application_id: "42".to_string(),
            interaction_id: "99".to_string(),
            token: "tok-abc".to_string(),
        };
        let message = client
            .create_response(
                &target,
                &InteractionResponse::message(InteractionCallbackData::text("hi")),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.id, "175928847299117063");
        assert_eq!(message.created_at_ms(), Some(1_462_015_105_796));
    }

    #[tokio::test]
    async fn unreadable_callback_body_still_counts_as_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/99/tok-abc/callback"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let target = ReplyTarget {
            application_id: "42".to_string(),
            interaction_id: "99".to_string(),
            token: "tok-abc".to_string(),
        };
        let message = client
            .create_response(&target, &InteractionResponse::deferred(true))
            .await
            .unwrap();
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn followup_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhooks/42/tok-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "5" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordHttpClient::new("tok").with_base_url(server.uri());
        let target = ReplyTarget {
            application_id: "42".to_string(),
            interaction_id: "99".to_string(),
            token: "tok-abc".to_string(),
        };
        client
            .create_followup(&target, &InteractionCallbackData::text("later"))
            .await
            .unwrap();
    }
}
