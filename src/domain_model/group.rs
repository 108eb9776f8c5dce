use super::{GroupId, GroupMessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

impl std::fmt::Display for GroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupRole::Admin => write!(f, "admin"),
            GroupRole::Member => write!(f, "member"),
        }
    }
}

/// Soft-delete model (open question resolved in DESIGN.md): a row is never
/// physically removed on leave, `active` flips to false instead, and
/// uniqueness of `(group_id, user_id)` is enforced only among active rows.
#[derive(Debug, Clone)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum GroupMessageType {
    User,
    System,
}

#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub id: GroupMessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: GroupMessageType,
}

#[derive(Debug, Clone)]
pub struct GroupReadMark {
    pub message_id: GroupMessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Row shape for `listAllActiveGroups`/`searchGroups`.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub member_count: i64,
}

/// Row shape for `listUserGroups`: a `GroupSummary` plus the caller's role.
#[derive(Debug, Clone)]
pub struct UserGroupSummary {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub role: GroupRole,
    pub member_count: i64,
}
