use crate::domain_model::{ChatEnvelope, CHANNEL_CHAT_MESSAGES};
use crate::domain_port::CoordinatorGateway;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

/// LocalPresence plus the cross-replica routing logic for `sendToUser`
/// (SPEC_FULL §4.3). Each connected user has exactly one outbound line
/// sender registered on exactly one replica at a time; the map below is
/// this replica's local slice of that global fact.
pub struct ReplicaFabric {
    replica_id: String,
    local: DashMap<String, Sender<String>>,
    coordinator: Arc<dyn CoordinatorGateway>,
}

impl ReplicaFabric {
    /// Spawns the background relay task that forwards `chat_messages`
    /// published by other replicas to a locally-connected recipient.
    pub fn spawn(replica_id: String, coordinator: Arc<dyn CoordinatorGateway>) -> anyhow::Result<Arc<Self>> {
        let fabric = Arc::new(Self {
            replica_id,
            local: DashMap::new(),
            coordinator,
        });

        let relay_fabric = fabric.clone();
        tokio::spawn(async move {
            relay_fabric.run_chat_relay().await;
        });

        Ok(fabric)
    }

    async fn run_chat_relay(self: Arc<Self>) {
        loop {
            let mut rx = match self.coordinator.subscribe(CHANNEL_CHAT_MESSAGES).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(error = %e, "failed to subscribe to chat_messages, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = rx.recv().await {
                let envelope: ChatEnvelope = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable chat_messages payload");
                        continue;
                    }
                };
                if envelope.sender_server_id == self.replica_id {
                    // this replica's own publish, echoed back; the sender
                    // already delivered it if the recipient was local.
                    continue;
                }
                self.try_send_local(&envelope.target_username, envelope.message);
            }

            tracing::warn!("chat_messages subscription ended, resubscribing");
        }
    }

    pub fn register(&self, username: &str, sender: Sender<String>) {
        self.local.insert(username.to_string(), sender);
    }

    pub fn unregister(&self, username: &str) {
        self.local.remove(username);
    }

    pub fn is_local(&self, username: &str) -> bool {
        self.local.contains_key(username)
    }

    /// Best-effort delivery to a locally-connected user. Returns whether a
    /// local writer existed; a full outbound channel is treated the same
    /// as "not locally connected" rather than blocking the caller.
    pub fn try_send_local(&self, username: &str, line: String) -> bool {
        match self.local.get(username) {
            Some(sender) => sender.try_send(line).is_ok(),
            None => false,
        }
    }

    pub fn local_usernames(&self) -> Vec<String> {
        self.local.iter().map(|e| e.key().clone()).collect()
    }

    /// Implements `sendToUser`: direct local delivery, else publish for a
    /// remote replica to pick up, else the recipient isn't online at all.
    pub async fn send_to_user(&self, username: &str, message: String) -> anyhow::Result<bool> {
        if self.try_send_local(username, message.clone()) {
            return Ok(true);
        }

        if !self.coordinator.is_online(username).await? {
            return Ok(false);
        }

        let envelope = ChatEnvelope {
            target_username: username.to_string(),
            message,
            sender_server_id: self.replica_id.clone(),
        };
        let payload = serde_json::to_string(&envelope)?;
        self.coordinator.publish(CHANNEL_CHAT_MESSAGES, payload).await?;
        Ok(true)
    }

    /// Bounded-grace shutdown: deregisters every locally-connected user from
    /// presence so other replicas stop routing to this one.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        for username in self.local_usernames() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("shutdown grace period exceeded, abandoning remaining deregistration");
                break;
            }
            if let Err(e) = self.coordinator.remove_online(&username).await {
                tracing::warn!(error = %e, username = %username, "failed to deregister presence on shutdown");
            }
        }
    }
}
