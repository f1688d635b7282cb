use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::command::{Command, Invocation, OptionSpec};
use crate::error::CommandError;
use crate::types::{Embed, InteractionCallbackData};

const EMBED_COLOR: u32 = 0x00ff00;
const FOOTER: &str = "Habit Tracker Bot";
/// Korea Standard Time, UTC+9.
const KST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinKind {
    CameraOut,
    WorkDisconnect,
}

impl CheckinKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "camera_out" => Some(CheckinKind::CameraOut),
            "work_disconnect" => Some(CheckinKind::WorkDisconnect),
            _ => None,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            CheckinKind::CameraOut => "📸",
            CheckinKind::WorkDisconnect => "💼",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CheckinKind::CameraOut => "Camera out",
            CheckinKind::WorkDisconnect => "Work disconnect",
        }
    }
}

/// `/checkin-test type:<kind> [memo]`
pub struct CheckinTest;

#[async_trait]
impl Command for CheckinTest {
    fn name(&self) -> &str {
        "checkin-test"
    }

    fn description(&self) -> &str {
        "Habit check-in test"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::string("type", "Check-in type")
                .required()
                .choice("📸 Camera out", "camera_out")
                .choice("💼 Work disconnect", "work_disconnect"),
            OptionSpec::string("memo", "Memo (optional)"),
        ]
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let raw = invocation.require_str("type")?;
        let kind = CheckinKind::parse(raw).ok_or_else(|| CommandError::InvalidOption {
            name: "type".to_string(),
            reason: format!("unknown check-in type {:?}", raw),
        })?;
        let memo = invocation.get_str("memo").filter(|m| !m.is_empty());

        let embed = checkin_embed(kind, &invocation.user.tag(), memo, Utc::now());
        invocation
            .reply
            .reply(InteractionCallbackData::default().embed(embed))
            .await?;
        Ok(())
    }
}

fn checkin_embed(kind: CheckinKind, user: &str, memo: Option<&str>, now: DateTime<Utc>) -> Embed {
    let time = match FixedOffset::east_opt(KST_OFFSET_SECS) {
        Some(kst) => now.with_timezone(&kst).format("%Y-%m-%d %H:%M:%S KST").to_string(),
        None => now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    };

    let mut embed = Embed::new()
        .color(EMBED_COLOR)
        .title(format!("{} Check-in complete!", kind.emoji()))
        .description(format!("**Type:** {}", kind.label()))
        .field("User", user, true)
        .field("Time", time, true)
        .footer(FOOTER)
        .timestamp(now.to_rfc3339());
    if let Some(memo) = memo {
        embed = embed.field("Memo", memo, false);
    }
    embed
}
