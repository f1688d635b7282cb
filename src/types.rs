//! Typed representations of the Discord API objects the bot touches.
//!
//! These mirror the Discord API docs so we can deserialize gateway events and
//! REST responses without touching `serde_json::Value` in the rest of the
//! codebase. Only the fields the bot reads or writes are modelled.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01).
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Unix-millis timestamp encoded in a snowflake, if it parses.
pub fn snowflake_timestamp_ms(id: &str) -> Option<u64> {
    id.parse::<u64>().ok().map(|sf| (sf >> 22) + DISCORD_EPOCH_MS)
}

// ---------------------------------------------------------------------------
// Gateway payload (the envelope that wraps every WS message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuildMember {
    pub user: Option<User>,
    pub nick: Option<String>,
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub application: ReadyApplication,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyApplication {
    pub id: Snowflake,
    pub flags: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

/// Top-level interaction received via INTERACTION_CREATE.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Interaction {
    pub id: Snowflake,
    pub application_id: Snowflake,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub data: Option<InteractionData>,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub member: Option<GuildMember>,
    pub user: Option<User>,
    pub token: String,
}

impl Interaction {
    /// The user who triggered the interaction. Guild interactions carry it
    /// inside `member`, DMs carry it at the top level.
    pub fn author(&self) -> Option<&User> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }

    /// Name of the invoked command for CHAT_INPUT interactions.
    pub fn chat_input_name(&self) -> Option<&str> {
        if self.kind != InteractionType::ApplicationCommand {
            return None;
        }
        let data = self.data.as_ref()?;
        if data.kind.unwrap_or(CHAT_INPUT_COMMAND) != CHAT_INPUT_COMMAND {
            return None;
        }
        data.name.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum InteractionType {
    Ping = 1,
    ApplicationCommand = 2,
    MessageComponent = 3,
    ApplicationCommandAutocomplete = 4,
    ModalSubmit = 5,
}

/// Application command type for slash commands.
pub const CHAT_INPUT_COMMAND: u8 = 1;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InteractionData {
    pub id: Option<Snowflake>,
    pub name: Option<String>,
    /// 1 = CHAT_INPUT, 2 = USER, 3 = MESSAGE
    #[serde(rename = "type")]
    pub kind: Option<u8>,
    #[serde(default)]
    pub options: Vec<CommandDataOption>,
}

/// An option value as supplied by the invoking user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandDataOption {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<CommandDataOption>,
    #[serde(default)]
    pub focused: bool,
}

// ---------------------------------------------------------------------------
// Interaction responses (what we send back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: InteractionCallbackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InteractionCallbackData>,
}

impl InteractionResponse {
    pub fn message(data: InteractionCallbackData) -> Self {
        Self {
            kind: InteractionCallbackType::ChannelMessageWithSource,
            data: Some(data),
        }
    }

    pub fn deferred(ephemeral: bool) -> Self {
        Self {
            kind: InteractionCallbackType::DeferredChannelMessageWithSource,
            data: ephemeral.then(|| InteractionCallbackData::default().ephemeral()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum InteractionCallbackType {
    Pong = 1,
    ChannelMessageWithSource = 4,
    DeferredChannelMessageWithSource = 5,
    DeferredUpdateMessage = 6,
    UpdateMessage = 7,
}

/// Message flag hiding a reply from everyone but the invoking user.
pub const EPHEMERAL_FLAG: u32 = 1 << 6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionCallbackData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<Embed>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
}

impl InteractionCallbackData {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.get_or_insert_with(Vec::new).push(embed);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.flags = Some(self.flags.unwrap_or(0) | EPHEMERAL_FLAG);
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        self.flags.is_some_and(|f| f & EPHEMERAL_FLAG != 0)
    }
}

/// Body of an interaction callback sent with `with_response=true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionCallbackResponse {
    #[serde(default)]
    pub resource: Option<InteractionCallbackResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionCallbackResource {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub message: Option<SentMessage>,
}

/// The parts of a created message the bot reads back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentMessage {
    pub id: Snowflake,
}

impl SentMessage {
    /// Server-side creation time, from the message snowflake.
    pub fn created_at_ms(&self) -> Option<u64> {
        snowflake_timestamp_ms(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter {
            text: text.into(),
            icon_url: None,
        });
        self
    }

    pub fn timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

// ---------------------------------------------------------------------------
// Slash command registration payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Snowflake>,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ApplicationCommandOption>,
    /// 1 = CHAT_INPUT (slash), 2 = USER, 3 = MESSAGE
    #[serde(rename = "type", default = "default_command_type")]
    pub kind: u8,
}

fn default_command_type() -> u8 {
    CHAT_INPUT_COMMAND
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommandOption {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ApplicationCommandOptionChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommandOptionChoice {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum OptionKind {
    SubCommand = 1,
    SubCommandGroup = 2,
    String = 3,
    Integer = 4,
    Boolean = 5,
    User = 6,
    Channel = 7,
    Role = 8,
    Mentionable = 9,
    Number = 10,
    Attachment = 11,
}

// ---------------------------------------------------------------------------
// Presence (gateway opcode 3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

impl Presence {
    /// An online presence with a single "Watching ..." activity.
    pub fn watching(name: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: vec![Activity {
                name: name.into(),
                kind: ActivityKind::Watching,
            }],
            status: "online".to_string(),
            afk: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum ActivityKind {
    Playing = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
    Competing = 5,
}

// ---------------------------------------------------------------------------
// Rate-limit info parsed from response headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}
