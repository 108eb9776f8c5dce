use crate::domain_model::*;
use crate::domain_port::CoordinatorError;
use std::collections::HashMap;
use tokio::sync::mpsc::Receiver;

/// A thin typed facade over the shared coordination store (presence set +
/// detail keys, session tokens, pending-message lists, pub/sub). See
/// SPEC_FULL §4.2. Presence writes are NOT transactional with set
/// membership; callers MUST treat an entry present in only one of the two
/// locations as stale and lazily remove it (invariant 1).
#[async_trait::async_trait]
pub trait CoordinatorGateway: Send + Sync {
    /// Atomically (from the caller's view) writes the detail key with its
    /// TTL and adds `user` to the `online_users` set.
    async fn add_online(
        &self,
        username: &str,
        replica_id: &str,
        user_id: Option<UserId>,
    ) -> Result<(), CoordinatorError>;

    /// Deletes both the detail key and the set membership.
    async fn remove_online(&self, username: &str) -> Result<(), CoordinatorError>;

    /// Set membership AND detail-key existence; reconciles (removes stale
    /// set membership) otherwise.
    async fn is_online(&self, username: &str) -> Result<bool, CoordinatorError>;

    /// Same reconciliation as `is_online`, applied to every set member.
    async fn list_online(&self) -> Result<Vec<String>, CoordinatorError>;

    async fn touch_presence(&self, username: &str) -> Result<bool, CoordinatorError>;

    async fn users_per_replica(&self) -> Result<HashMap<String, u64>, CoordinatorError>;

    /// `SCARD online_users` — the scaling controller's sole presence read.
    async fn online_user_count(&self) -> Result<u64, CoordinatorError>;

    /// Stores `{user,userId,created,lastActive}` under `session:<token>` and
    /// reverse-indexes `user_session:<user>`, both with the same TTL.
    async fn create_token(&self, username: &str, user_id: UserId) -> Result<ResumeToken, CoordinatorError>;
    async fn lookup_token(&self, token: ResumeToken) -> Result<Option<SessionTokenRecord>, CoordinatorError>;
    async fn touch_token(&self, token: ResumeToken) -> Result<(), CoordinatorError>;
    /// Also deletes `pending_messages:<user>` (the only path that purges
    /// pending messages outside of `drainPending`).
    async fn revoke_token(&self, token: ResumeToken) -> Result<(), CoordinatorError>;

    /// Right-pushes the envelope, refreshes the list TTL, and left-trims to
    /// the last 100 entries (Testable Property 3).
    async fn enqueue_pending(&self, username: &str, envelope: PendingEnvelope) -> Result<(), CoordinatorError>;
    /// Atomic read-then-delete (Testable Property 5: a second drain returns
    /// nothing even under concurrent resume attempts).
    async fn drain_pending(&self, username: &str) -> Result<Vec<PendingEnvelope>, CoordinatorError>;

    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoordinatorError>;

    /// A single-consumer stream of raw JSON payloads published on `channel`,
    /// in publish order.
    async fn subscribe(&self, channel: &str) -> Result<Receiver<String>, CoordinatorError>;
}
