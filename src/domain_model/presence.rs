use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mirrors the `online_user:<username>` Coordinator value. Membership in
/// `online_users` is tracked separately by the Coordinator gateway; both must
/// agree for a user to be considered online (see invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(rename = "server_id")]
    pub replica_id: String,
    #[serde(rename = "login_time")]
    pub login_time: DateTime<Utc>,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Mirrors the `session:<token>` Coordinator value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenRecord {
    pub username: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// One entry in `pending_messages:<username>`: a fully-formatted protocol
/// line saved while the recipient had no LocalPresence anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEnvelope {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
