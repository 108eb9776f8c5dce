use super::{GroupId, GroupMessageId, UserId};
use serde::{Deserialize, Serialize};

/// Published on the `chat_messages` channel. `message` is the fully-formatted
/// line the target replica writes verbatim to the recipient's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub target_username: String,
    pub message: String,
    pub sender_server_id: String,
}

/// Published on `group_messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageEnvelope {
    pub event_type: String,
    pub group_id: GroupId,
    pub message_id: GroupMessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub message_text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl GroupMessageEnvelope {
    pub fn event_type_tag() -> &'static str {
        "group_message"
    }
}

/// Published on `group_events`. `event_type` is open-ended; replicas MUST
/// swallow unknown values without erroring (no subscriber action is required
/// for correctness today).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEventEnvelope {
    pub event_type: String,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub actor: UserId,
}

pub const CHANNEL_CHAT_MESSAGES: &str = "chat_messages";
pub const CHANNEL_GROUP_MESSAGES: &str = "group_messages";
pub const CHANNEL_GROUP_EVENTS: &str = "group_events";
