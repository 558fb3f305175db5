use serde::{Deserialize, Serialize};

/// One message in a conversation, tagged by speaker role. The ordered
/// sequence of turns is the authoritative context sent to the model on
/// every exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            content: content.into(),
        }
    }
}

/// Canonical serialization of a turn sequence for the durable store.
/// This is the only representation ever written; conversion to the model
/// provider's wire shape happens in the Gemini client, not here.
pub fn serialize_turns(turns: &[ChatTurn]) -> Result<String, String> {
    serde_json::to_string(turns).map_err(|err| format!("history serialize failed: {err}"))
}

pub fn parse_turns(blob: &str) -> Result<Vec<ChatTurn>, String> {
    serde_json::from_str::<Vec<ChatTurn>>(blob)
        .map_err(|err| format!("history parse failed: {err}"))
}
