//! Name → command lookup, built once at startup.
//!
//! [`RegistryBuilder`] is the only way to add commands. Once
//! [`RegistryBuilder::build`] runs, the resulting [`CommandRegistry`] has no
//! mutating methods and is shared read-only (`Arc<CommandRegistry>`) by
//! every concurrent dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::command::Command;
use crate::error::BotError;

const MAX_NAME_LEN: usize = 32;
const MAX_DESCRIPTION_LEN: usize = 100;

#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<Arc<dyn Command>>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Fails without modifying the builder when the name is
    /// taken or the declaration breaks Discord's naming rules.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<&mut Self, BotError> {
        let name = command.name().to_string();
        validate(command.as_ref())?;

        if self.index.contains_key(&name) {
            return Err(BotError::DuplicateName(name));
        }

        info!(command = %name, "registered command");
        self.index.insert(name, self.commands.len());
        self.commands.push(command);
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
            index: self.index,
        }
    }
}

/// Frozen command set.
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from a list, failing on the first invalid entry.
    pub fn from_commands(
        commands: impl IntoIterator<Item = Arc<dyn Command>>,
    ) -> Result<Self, BotError> {
        let mut builder = RegistryBuilder::new();
        for command in commands {
            builder.register(command)?;
        }
        Ok(builder.build())
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.index.get(name).map(|&i| &self.commands[i])
    }

    /// All commands in registration order.
    pub fn all(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Discord CHAT_INPUT rules: 1–32 lowercase letters, digits, `-` or `_`;
/// description 1–100 characters.
fn validate(command: &dyn Command) -> Result<(), BotError> {
    let name = command.name();
    let invalid = |reason: &str| BotError::InvalidCommand {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(invalid("name must be 1-32 characters"));
    }
    if !name
        .chars()
        .all(|c| c == '-' || c == '_' || (c.is_alphanumeric() && !c.is_uppercase()))
    {
        return Err(invalid(
            "name may only contain lowercase letters, digits, '-' and '_'",
        ));
    }

    let desc_len = command.description().chars().count();
    if desc_len == 0 || desc_len > MAX_DESCRIPTION_LEN {
        return Err(invalid("description must be 1-100 characters"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Invocation;
    use crate::error::CommandError;
    use async_trait::async_trait;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Command for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn execute(&self, _invocation: &Invocation) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn cmd(name: &'static str) -> Arc<dyn Command> {
        Arc::new(Named(name, "does a thing"))
    }

    static_assertions::assert_impl_all!(CommandRegistry: Send, Sync);

    #[test]
    fn lookup_returns_the_registered_command() {
        let ping = cmd("ping");
        let registry = CommandRegistry::from_commands([ping.clone(), cmd("hello")]).unwrap();

        let found = registry.lookup("ping").unwrap();
        assert!(Arc::ptr_eq(found, &ping));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_name_is_none() {
        let registry = CommandRegistry::from_commands([cmd("ping")]).unwrap();
        assert!(registry.lookup("pong").is_none());
    }

    #[test]
    fn duplicate_name_fails_and_leaves_builder_unchanged() {
        let mut builder = RegistryBuilder::new();
        let first = cmd("ping");
        builder.register(first.clone()).unwrap();

        let err = builder.register(cmd("ping")).err().unwrap();
        assert!(matches!(err, BotError::DuplicateName(ref n) if n == "ping"));

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(registry.lookup("ping").unwrap(), &first));
    }

    #[test]
    fn all_preserves_registration_order() {
        let registry =
            CommandRegistry::from_commands([cmd("ping"), cmd("hello"), cmd("checkin-test")])
                .unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["ping", "hello", "checkin-test"]);
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn invalid_names_are_rejected() {
        for bad in ["", "Ping", "has space", "way-too-long-name-for-discord-commands"] {
            let mut builder = RegistryBuilder::new();
            let err = builder.register(cmd(bad)).err().unwrap();
            assert!(
                matches!(err, BotError::InvalidCommand { .. }),
                "{bad:?} should be rejected"
            );
            assert!(builder.build().is_empty());
        }
    }

    #[test]
    fn empty_description_is_rejected() {
        let mut builder = RegistryBuilder::new();
        let err = builder.register(Arc::new(Named("ping", ""))).err().unwrap();
        assert!(matches!(err, BotError::InvalidCommand { .. }));
    }

    #[test]
    fn non_ascii_lowercase_names_are_allowed() {
        let registry = CommandRegistry::from_commands([cmd("체크인")]).unwrap();
        assert!(registry.lookup("체크인").is_some());
    }
}
