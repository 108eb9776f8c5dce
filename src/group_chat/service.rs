use crate::domain_model::*;
use crate::domain_port::{PersistenceError, PersistenceGateway};
use crate::domain_port::CoordinatorGateway;
use crate::replica::ReplicaFabric;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Group chat semantics layered on top of Persistence + Coordinator + the
/// fabric's local delivery, per SPEC_FULL §4.5. Owns the `group_messages`
/// and `group_events` fan-out loops.
pub struct GroupChatService {
    persistence: Arc<dyn PersistenceGateway>,
    coordinator: Arc<dyn CoordinatorGateway>,
    fabric: Arc<ReplicaFabric>,
}

impl GroupChatService {
    pub fn spawn(
        persistence: Arc<dyn PersistenceGateway>,
        coordinator: Arc<dyn CoordinatorGateway>,
        fabric: Arc<ReplicaFabric>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            persistence,
            coordinator,
            fabric,
        });

        let messages = service.clone();
        tokio::spawn(async move { messages.run_group_message_relay().await });

        let events = service.clone();
        tokio::spawn(async move { events.run_group_event_relay().await });

        service
    }

    async fn run_group_message_relay(self: Arc<Self>) {
        loop {
            let mut rx = match self.coordinator.subscribe(CHANNEL_GROUP_MESSAGES).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(error = %e, "failed to subscribe to group_messages, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = rx.recv().await {
                let envelope: GroupMessageEnvelope = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable group_messages payload");
                        continue;
                    }
                };
                self.deliver_group_message(envelope).await;
            }

            tracing::warn!("group_messages subscription ended, resubscribing");
        }
    }

    async fn deliver_group_message(&self, envelope: GroupMessageEnvelope) {
        let group = match self.persistence.group_info(envelope.group_id).await {
            Ok(Some(g)) => g,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, group_id = %envelope.group_id, "failed to look up group for fan-out");
                return;
            }
        };

        let members = match self.persistence.group_members(envelope.group_id).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, group_id = %envelope.group_id, "failed to look up group members for fan-out");
                return;
            }
        };

        let line = format!(
            "GROUP_MESSAGE:{}:{}:{}",
            group.name, envelope.sender_username, envelope.message_text
        );

        for (_, username, _, _) in members {
            if username == envelope.sender_username {
                continue;
            }
            if self.fabric.is_local(&username) {
                self.fabric.try_send_local(&username, line.clone());
            }
        }
    }

    async fn run_group_event_relay(self: Arc<Self>) {
        loop {
            let mut rx = match self.coordinator.subscribe(CHANNEL_GROUP_EVENTS).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(error = %e, "failed to subscribe to group_events, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = rx.recv().await {
                // No subscriber action is required for correctness today;
                // unknown event types are swallowed, not errors.
                match serde_json::from_str::<GroupEventEnvelope>(&payload) {
                    Ok(event) => {
                        tracing::debug!(event_type = %event.event_type, group_id = %event.group_id, "observed group event");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable group_events payload");
                    }
                }
            }

            tracing::warn!("group_events subscription ended, resubscribing");
        }
    }

    async fn publish_group_event(&self, event_type: &str, group_id: GroupId, user_id: UserId, actor: UserId) {
        let envelope = GroupEventEnvelope {
            event_type: event_type.to_string(),
            group_id,
            user_id,
            actor,
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => {
                if let Err(e) = self.coordinator.publish(CHANNEL_GROUP_EVENTS, payload).await {
                    tracing::warn!(error = %e, "failed to publish group_events envelope");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode group_events envelope"),
        }
    }

    pub async fn create_group(
        &self,
        name: &str,
        creator_id: UserId,
        creator_username: &str,
        description: Option<&str>,
    ) -> Result<GroupId, PersistenceError> {
        self.persistence
            .create_group(name, creator_id, creator_username, description)
            .await
    }

    pub async fn add_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<(), PersistenceError> {
        self.persistence.add_member(group_id, user_id, username).await?;
        self.publish_group_event("member_added", group_id, user_id, user_id).await;
        Ok(())
    }

    /// Returns whether the group was deactivated as a result (last member left).
    pub async fn remove_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<bool, PersistenceError> {
        let deactivated = self.persistence.remove_member(group_id, user_id, username).await?;
        self.publish_group_event("member_removed", group_id, user_id, user_id).await;
        Ok(deactivated)
    }

    pub async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroupSummary>, PersistenceError> {
        self.persistence.list_user_groups(user_id).await
    }

    pub async fn list_all_active_groups(&self) -> Result<Vec<GroupSummary>, PersistenceError> {
        self.persistence.list_all_active_groups().await
    }

    pub async fn group_info(&self, group_id: GroupId) -> Result<Option<Group>, PersistenceError> {
        self.persistence.group_info(group_id).await
    }

    pub async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, PersistenceError> {
        self.persistence.is_member(group_id, user_id).await
    }

    pub async fn group_members(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<(UserId, String, GroupRole, chrono::DateTime<Utc>)>, PersistenceError> {
        self.persistence.group_members(group_id).await
    }

    pub async fn history(&self, group_id: GroupId, limit: i64) -> Result<Vec<GroupMessage>, PersistenceError> {
        self.persistence.history_group(group_id, limit).await
    }

    pub async fn send_group_message(
        &self,
        group_id: GroupId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<GroupMessageId, PersistenceError> {
        let message_id = self
            .persistence
            .append_group_message(group_id, sender_id, sender_username, text, GroupMessageType::User)
            .await?;

        let envelope = GroupMessageEnvelope {
            event_type: GroupMessageEnvelope::event_type_tag().to_string(),
            group_id,
            message_id,
            sender_id,
            sender_username: sender_username.to_string(),
            message_text: text.to_string(),
            timestamp: Utc::now(),
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => {
                if let Err(e) = self.coordinator.publish(CHANNEL_GROUP_MESSAGES, payload).await {
                    tracing::warn!(error = %e, "failed to publish group_messages envelope");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode group_messages envelope"),
        }

        Ok(message_id)
    }

    /// Idempotent; safe to call on every entry to a GroupChat state.
    pub async fn mark_all_read(&self, group_id: GroupId, user_id: UserId) -> Result<(), PersistenceError> {
        self.persistence.mark_all_group_read(group_id, user_id).await
    }
}
