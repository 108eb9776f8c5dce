use crate::domain_model::*;
use crate::domain_port::PersistenceError;
use chrono::{DateTime, Utc};

/// Pooled, asynchronous access to the durable relational store. Every
/// operation either succeeds or fails with a typed `PersistenceError`;
/// multi-statement operations commit once, atomically, inside one
/// transaction (see SPEC_FULL §4.1 contracts).
#[async_trait::async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn register_user(&self, username: &str, password: &str) -> Result<UserId, PersistenceError>;
    async fn authenticate(&self, username: &str, password: &str) -> Result<UserId, PersistenceError>;

    async fn open_session(&self, user_id: UserId) -> Result<SessionId, PersistenceError>;
    async fn close_session(&self, session_id: SessionId) -> Result<(), PersistenceError>;

    async fn list_users(
        &self,
        excluding: Option<UserId>,
    ) -> Result<Vec<(UserId, String, DateTime<Utc>)>, PersistenceError>;

    /// Idempotent; canonicalizes the pair so `(a,b)` and `(b,a)` resolve to
    /// the same conversation (invariant 2 / Testable Property 2).
    async fn get_or_create_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ConversationId, PersistenceError>;

    async fn append_private(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<MessageId, PersistenceError>;

    /// Returned oldest-first, capped at `limit`.
    async fn history_private(
        &self,
        conversation_id: ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, PersistenceError>;

    async fn append_broadcast(
        &self,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<BroadcastMessageId, PersistenceError>;

    async fn history_broadcast(&self, limit: i64) -> Result<Vec<BroadcastMessage>, PersistenceError>;

    /// Inserts the group, the creator as an admin member, and a synthetic
    /// system message, all in one transaction.
    async fn create_group(
        &self,
        name: &str,
        creator_id: UserId,
        creator_username: &str,
        description: Option<&str>,
    ) -> Result<GroupId, PersistenceError>;

    async fn add_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<(), PersistenceError>;

    /// Soft-deletes the membership; if the leaver was the last active
    /// member, the group itself is deactivated in the same transaction.
    /// Returns whether the group was deactivated as a result.
    async fn remove_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<bool, PersistenceError>;

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroupSummary>, PersistenceError>;
    async fn list_all_active_groups(&self) -> Result<Vec<GroupSummary>, PersistenceError>;
    async fn search_groups(&self, term: &str) -> Result<Vec<GroupSummary>, PersistenceError>;
    async fn group_members(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<(UserId, String, GroupRole, DateTime<Utc>)>, PersistenceError>;
    async fn group_info(&self, group_id: GroupId) -> Result<Option<Group>, PersistenceError>;
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, PersistenceError>;

    async fn append_group_message(
        &self,
        group_id: GroupId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
        message_type: GroupMessageType,
    ) -> Result<GroupMessageId, PersistenceError>;

    async fn history_group(
        &self,
        group_id: GroupId,
        limit: i64,
    ) -> Result<Vec<GroupMessage>, PersistenceError>;

    /// Idempotent.
    async fn mark_group_read(
        &self,
        message_id: GroupMessageId,
        user_id: UserId,
    ) -> Result<(), PersistenceError>;

    /// Bulk-inserts missing read marks for every message in `group_id` not
    /// authored by `user_id`. Idempotent; safe to call on every GroupChat entry.
    async fn mark_all_group_read(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<(), PersistenceError>;
}
