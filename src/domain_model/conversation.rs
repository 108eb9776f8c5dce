use super::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};

/// Canonical, unordered pair of participants: `p1 < p2` always.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub p1: UserId,
    pub p2: UserId,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
