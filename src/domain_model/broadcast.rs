use super::{BroadcastMessageId, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub id: BroadcastMessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
