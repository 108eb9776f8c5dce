use crate::domain_model::*;
use crate::domain_port::{CoordinatorError, CoordinatorGateway};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver};

const PENDING_CAP: usize = 100;

/// In-process stand-in for `CoordinatorGateway`: presence set + detail keys,
/// resume tokens, pending-message lists, and a fan-out pub/sub implemented
/// as one `mpsc::Sender` per subscriber per channel. Shared (via `Arc`)
/// across every simulated replica in a test the way a real Redis instance
/// is shared across real replica processes.
#[derive(Default)]
pub struct InMemoryCoordinatorGateway {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    online_users: HashSet<String>,
    online_detail: HashMap<String, PresenceRecord>,
    tokens: HashMap<ResumeToken, SessionTokenRecord>,
    user_session: HashMap<String, ResumeToken>,
    pending: HashMap<String, VecDeque<PendingEnvelope>>,
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
}

impl InMemoryCoordinatorGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CoordinatorGateway for InMemoryCoordinatorGateway {
    async fn add_online(&self, username: &str, replica_id: &str, user_id: Option<UserId>) -> Result<(), CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        s.online_detail.insert(
            username.to_string(),
            PresenceRecord {
                replica_id: replica_id.to_string(),
                login_time: Utc::now(),
                user_id,
            },
        );
        s.online_users.insert(username.to_string());
        Ok(())
    }

    async fn remove_online(&self, username: &str) -> Result<(), CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        s.online_detail.remove(username);
        s.online_users.remove(username);
        Ok(())
    }

    async fn is_online(&self, username: &str) -> Result<bool, CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        if !s.online_users.contains(username) {
            return Ok(false);
        }
        if !s.online_detail.contains_key(username) {
            s.online_users.remove(username);
            return Ok(false);
        }
        Ok(true)
    }

    async fn list_online(&self) -> Result<Vec<String>, CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        let stale: Vec<String> = s
            .online_users
            .iter()
            .filter(|u| !s.online_detail.contains_key(*u))
            .cloned()
            .collect();
        for u in &stale {
            s.online_users.remove(u);
        }
        Ok(s.online_users.iter().cloned().collect())
    }

    async fn touch_presence(&self, username: &str) -> Result<bool, CoordinatorError> {
        let s = self.state.lock().unwrap();
        Ok(s.online_detail.contains_key(username))
    }

    async fn users_per_replica(&self) -> Result<HashMap<String, u64>, CoordinatorError> {
        let s = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for record in s.online_detail.values() {
            *counts.entry(record.replica_id.clone()).or_insert(0u64) += 1;
        }
        Ok(counts)
    }

    async fn online_user_count(&self) -> Result<u64, CoordinatorError> {
        let s = self.state.lock().unwrap();
        Ok(s.online_users.len() as u64)
    }

    async fn create_token(&self, username: &str, user_id: UserId) -> Result<ResumeToken, CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        let token = ResumeToken::new();
        let now = Utc::now();
        s.tokens.insert(
            token,
            SessionTokenRecord {
                username: username.to_string(),
                user_id,
                created_at: now,
                last_active: now,
            },
        );
        s.user_session.insert(username.to_string(), token);
        Ok(token)
    }

    async fn lookup_token(&self, token: ResumeToken) -> Result<Option<SessionTokenRecord>, CoordinatorError> {
        let s = self.state.lock().unwrap();
        Ok(s.tokens.get(&token).cloned())
    }

    async fn touch_token(&self, token: ResumeToken) -> Result<(), CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(record) = s.tokens.get_mut(&token) {
            record.last_active = Utc::now();
        }
        Ok(())
    }

    async fn revoke_token(&self, token: ResumeToken) -> Result<(), CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(record) = s.tokens.remove(&token) {
            s.user_session.remove(&record.username);
            s.pending.remove(&record.username);
        }
        Ok(())
    }

    async fn enqueue_pending(&self, username: &str, envelope: PendingEnvelope) -> Result<(), CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        let list = s.pending.entry(username.to_string()).or_default();
        list.push_back(envelope);
        while list.len() > PENDING_CAP {
            list.pop_front();
        }
        Ok(())
    }

    async fn drain_pending(&self, username: &str) -> Result<Vec<PendingEnvelope>, CoordinatorError> {
        let mut s = self.state.lock().unwrap();
        Ok(s.pending.remove(username).map(Vec::from).unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoordinatorError> {
        let senders = {
            let s = self.state.lock().unwrap();
            s.subscribers.get(channel).cloned().unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.try_send(payload.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Receiver<String>, CoordinatorError> {
        let (tx, rx) = mpsc::channel(256);
        let mut s = self.state.lock().unwrap();
        s.subscribers.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(content: &str) -> PendingEnvelope {
        PendingEnvelope {
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn pending_list_is_left_trimmed_to_the_last_100_entries() {
        let coordinator = InMemoryCoordinatorGateway::new();
        for i in 0..150 {
            coordinator
                .enqueue_pending("alice", envelope(&i.to_string()))
                .await
                .unwrap();
        }
        let drained = coordinator.drain_pending("alice").await.unwrap();
        assert_eq!(drained.len(), PENDING_CAP);
        assert_eq!(drained.first().unwrap().content, "50");
        assert_eq!(drained.last().unwrap().content, "149");
    }

    #[tokio::test]
    async fn drain_pending_is_a_one_time_read() {
        let coordinator = InMemoryCoordinatorGateway::new();
        coordinator.enqueue_pending("alice", envelope("hi")).await.unwrap();
        let first = coordinator.drain_pending("alice").await.unwrap();
        assert_eq!(first.len(), 1);
        let second = coordinator.drain_pending("alice").await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn is_online_reconciles_set_membership_against_missing_detail_key() {
        let coordinator = InMemoryCoordinatorGateway::new();
        coordinator.add_online("alice", "r1", None).await.unwrap();
        assert!(coordinator.is_online("alice").await.unwrap());

        coordinator.state.lock().unwrap().online_detail.remove("alice");
        assert!(!coordinator.is_online("alice").await.unwrap());
        assert!(!coordinator.list_online().await.unwrap().contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn revoke_token_also_purges_pending_messages() {
        let coordinator = InMemoryCoordinatorGateway::new();
        let token = coordinator.create_token("alice", UserId(1)).await.unwrap();
        coordinator.enqueue_pending("alice", envelope("hi")).await.unwrap();
        coordinator.revoke_token(token).await.unwrap();
        assert!(coordinator.lookup_token(token).await.unwrap().is_none());
        assert!(coordinator.drain_pending("alice").await.unwrap().is_empty());
    }
}
