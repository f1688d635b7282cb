use async_trait::async_trait;

use crate::command::{Command, Invocation};
use crate::error::CommandError;
use crate::gateway::Latency;
use crate::types::InteractionCallbackData;

/// `/ping`: reply first, then edit in the measured latencies.
pub struct Ping {
    heartbeat: Latency,
}

impl Ping {
    pub fn new(heartbeat: Latency) -> Self {
        Self { heartbeat }
    }
}

#[async_trait]
impl Command for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Measure the bot's latency"
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let sent = invocation
            .reply
            .reply(InteractionCallbackData::text("🏓 Pong! measuring..."))
            .await?;

        // Discord's own timestamp for the reply when it reported one,
        // otherwise the local clock.
        let replied_at = sent
            .and_then(|m| m.created_at_ms())
            .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
            .unwrap_or_else(chrono::Utc::now);
        let round_trip = invocation
            .created_at_ms()
            .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
            .map(|sent_at| {
                format!("{}ms", replied_at.signed_duration_since(sent_at).num_milliseconds())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let heartbeat = self
            .heartbeat
            .get()
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "unknown".to_string());

        let text = format!(
            "🏓 Pong!\n📡 Latency: {}\n💓 API latency: {}",
            round_trip, heartbeat
        );
        invocation.reply.edit(InteractionCallbackData::text(text)).await?;
        Ok(())
    }
}
