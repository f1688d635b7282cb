//! The command contract: what a slash command declares and how it runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommandError;
use crate::reply::{InteractionResponder, ReplyChannel, ReplyTarget};
use crate::types::*;

/// A unit of invokable behaviour.
///
/// Commands are built once at startup, handed to the registry and never
/// mutated afterwards. They report success or failure; the router decides
/// what the invoking user sees when they fail.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Declared options, in the order Discord should show them.
    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError>;

    /// The body sent to Discord's command catalog.
    fn declaration(&self) -> ApplicationCommand {
        ApplicationCommand {
            id: None,
            name: self.name().to_string(),
            description: self.description().to_string(),
            options: self
                .options()
                .into_iter()
                .map(OptionSpec::into_declaration)
                .collect(),
            kind: CHAT_INPUT_COMMAND,
        }
    }
}

/// One entry of a command's input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub required: bool,
    /// Allowed values as `(label, value)` pairs; empty means free input.
    pub choices: Vec<(String, serde_json::Value)>,
}

impl OptionSpec {
    pub fn new(kind: OptionKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
            choices: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OptionKind::String, name, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn choice(mut self, label: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.choices.push((label.into(), value.into()));
        self
    }

    fn into_declaration(self) -> ApplicationCommandOption {
        ApplicationCommandOption {
            name: self.name,
            description: self.description,
            kind: self.kind,
            required: self.required,
            choices: self
                .choices
                .into_iter()
                .map(|(name, value)| ApplicationCommandOptionChoice { name, value })
                .collect(),
        }
    }
}

/// One inbound request to run a command. Lives for a single dispatch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command_name: String,
    pub arguments: BTreeMap<String, serde_json::Value>,
    pub user: User,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub interaction_id: Snowflake,
    pub reply: ReplyChannel,
}

impl Invocation {
    /// Build an invocation from a CHAT_INPUT interaction. Returns `None` for
    /// any other interaction kind or when the invoking user is missing.
    pub fn from_interaction(
        interaction: &Interaction,
        responder: Arc<dyn InteractionResponder>,
    ) -> Option<Self> {
        let name = interaction.chat_input_name()?;
        let user = interaction.author()?.clone();
        let arguments = interaction
            .data
            .as_ref()
            .map(|data| {
                data.options
                    .iter()
                    .filter_map(|o| o.value.clone().map(|v| (o.name.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();

        let target = ReplyTarget {
            application_id: interaction.application_id.clone(),
            interaction_id: interaction.id.clone(),
            token: interaction.token.clone(),
        };

        Some(Self {
            command_name: name.to_string(),
            arguments,
            user,
            guild_id: interaction.guild_id.clone(),
            channel_id: interaction.channel_id.clone(),
            interaction_id: interaction.id.clone(),
            reply: ReplyChannel::new(target, responder),
        })
    }

    /// A string option, if supplied.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(|v| v.as_str())
    }

    /// A string option the command declared as required.
    pub fn require_str(&self, name: &str) -> Result<&str, CommandError> {
        self.get_str(name)
            .ok_or_else(|| CommandError::MissingOption(name.to_string()))
    }

    /// Unix-millis creation time taken from the interaction snowflake.
    pub fn created_at_ms(&self) -> Option<u64> {
        snowflake_timestamp_ms(&self.interaction_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::reply::testing::target;

    pub fn user() -> User {
        User {
            id: "7".to_string(),
            username: "alice".to_string(),
            discriminator: Some("0".to_string()),
            avatar: None,
            bot: false,
            global_name: None,
        }
    }

    /// An invocation of `name` whose replies land in `responder`.
    pub fn invocation(
        name: &str,
        arguments: &[(&str, serde_json::Value)],
        responder: Arc<dyn InteractionResponder>,
    ) -> Invocation {
        let target = target();
        Invocation {
            command_name: name.to_string(),
            arguments: arguments
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            user: user(),
            guild_id: Some("1".to_string()),
            channel_id: Some("2".to_string()),
            interaction_id: target.interaction_id.clone(),
            reply: ReplyChannel::new(target, responder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::testing::RecordingResponder;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Command for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a value"
        }

        fn options(&self) -> Vec<OptionSpec> {
            vec![
                OptionSpec::string("mode", "How to echo")
                    .required()
                    .choice("Loud", "loud")
                    .choice("Quiet", "quiet"),
                OptionSpec::string("text", "What to echo"),
            ]
        }

        async fn execute(&self, _invocation: &Invocation) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn declaration_keeps_option_order_and_choices() {
        let value = serde_json::to_value(Echo.declaration()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "echo",
                "description": "Echo a value",
                "type": 1,
                "options": [
                    {
                        "name": "mode", "description": "How to echo", "type": 3, "required": true,
                        "choices": [
                            { "name": "Loud", "value": "loud" },
                            { "name": "Quiet", "value": "quiet" }
                        ]
                    },
                    { "name": "text", "description": "What to echo", "type": 3, "required": false }
                ]
            })
        );
    }

    #[test]
    fn invocation_collects_top_level_option_values() {
        let interaction: Interaction = serde_json::from_value(json!({
            "id": "175928847299117063",
            "application_id": "42",
            "type": 2,
            "data": {
                "id": "9", "name": "echo", "type": 1,
                "options": [
                    { "name": "mode", "type": 3, "value": "loud" },
                    { "name": "text", "type": 3, "value": "hi" }
                ]
            },
            "user": { "id": "7", "username": "alice", "discriminator": "0",
                      "avatar": null, "global_name": null },
            "token": "tok",
        }))
        .unwrap();

        let invocation =
            Invocation::from_interaction(&interaction, Arc::new(RecordingResponder::default()))
                .unwrap();
        assert_eq!(invocation.command_name, "echo");
        assert_eq!(invocation.get_str("mode"), Some("loud"));
        assert_eq!(invocation.require_str("text").unwrap(), "hi");
        assert!(matches!(
            invocation.require_str("missing"),
            Err(CommandError::MissingOption(ref n)) if n == "missing"
        ));
        assert_eq!(invocation.reply.target().token, "tok");
        assert!(invocation.created_at_ms().is_some());
    }

    #[test]
    fn non_command_interactions_are_not_invocations() {
        let interaction: Interaction = serde_json::from_value(json!({
            "id": "1", "application_id": "42", "type": 3,
            "data": { "custom_id": "btn" },
            "user": { "id": "7", "username": "alice", "discriminator": "0",
                      "avatar": null, "global_name": null },
            "token": "tok",
        }))
        .unwrap();
        assert!(
            Invocation::from_interaction(&interaction, Arc::new(RecordingResponder::default()))
                .is_none()
        );
    }
}
