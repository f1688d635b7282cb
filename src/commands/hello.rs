use async_trait::async_trait;

use crate::command::{Command, Invocation, OptionSpec};
use crate::error::CommandError;
use crate::types::InteractionCallbackData;

/// `/hello [name]`
pub struct Hello;

#[async_trait]
impl Command for Hello {
    fn name(&self) -> &str {
        "hello"
    }

    fn description(&self) -> &str {
        "Say hello"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::string("name", "Who to greet")]
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let text = match invocation.get_str("name").filter(|n| !n.is_empty()) {
            Some(name) => format!("👋 Hello, {}!", name),
            None => "👋 Hello!".to_string(),
        };
        invocation.reply.reply(InteractionCallbackData::text(text)).await?;
        Ok(())
    }
}
