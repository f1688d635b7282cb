//! Typed gateway events.
//!
//! Instead of matching on raw `(op, t, serde_json::Value)` tuples everywhere,
//! the gateway module deserialises payloads into this enum so the session
//! and router can pattern-match on strongly-typed data.

use tracing::warn;

use crate::types::*;

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified, the bot is ready.
    Ready(ReadyEvent),

    /// A RESUME completed and missed events were replayed.
    Resumed,

    /// An interaction was created (slash command, button, modal submit...).
    InteractionCreate(Interaction),

    /// HELLO (op 10) with the heartbeat interval in milliseconds.
    Hello { heartbeat_interval: u64 },

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable.
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails: unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            10 => {
                let interval = payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(|v| v.as_u64());
                match interval {
                    Some(heartbeat_interval) => GatewayEvent::Hello { heartbeat_interval },
                    None => GatewayEvent::Unknown {
                        event_name: payload.t,
                        op: payload.op,
                        data: payload.d,
                    },
                }
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name.as_deref(), data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name,
                op: 0,
                data,
            };
        };

        let parsed = match name {
            "READY" => serde_json::from_value::<ReadyEvent>(d.clone()).map(GatewayEvent::Ready),
            "RESUMED" => Ok(GatewayEvent::Resumed),
            "INTERACTION_CREATE" => {
                serde_json::from_value::<Interaction>(d.clone()).map(GatewayEvent::InteractionCreate)
            }
            _ => {
                return GatewayEvent::Unknown {
                    event_name,
                    op: 0,
                    data,
                }
            }
        };

        parsed.unwrap_or_else(|e| {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            GatewayEvent::Unknown {
                event_name: event_name.clone(),
                op: 0,
                data: data.clone(),
            }
        })
    }
}
