use crate::domain_model::*;
use crate::domain_port::{CoordinatorError, CoordinatorGateway};
use chrono::Utc;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, Receiver};

const DRAIN_PENDING_SCRIPT: &str = include_str!("scripts/drain_pending.lua");
const PENDING_LIST_CAP: isize = 100;

/// Concrete `CoordinatorGateway` backed by Redis. `conn` is a
/// `ConnectionManager`, which reconnects transparently and is cheap to
/// clone; pub/sub uses a dedicated connection per `subscribe()` call since
/// a connection in subscriber mode can't serve ordinary commands.
pub struct RedisCoordinatorGateway {
    conn: ConnectionManager,
    client: Client,
    presence_ttl_secs: u64,
    token_ttl_secs: u64,
    drain_pending_script: Script,
}

impl RedisCoordinatorGateway {
    pub async fn new(
        redis_url: &str,
        presence_ttl_secs: u64,
        token_ttl_secs: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            conn,
            client,
            presence_ttl_secs,
            token_ttl_secs,
            drain_pending_script: Script::new(DRAIN_PENDING_SCRIPT),
        })
    }

    fn online_user_key(username: &str) -> String {
        format!("online_user:{}", username)
    }

    fn session_key(token: ResumeToken) -> String {
        format!("session:{}", token)
    }

    fn user_session_key(username: &str) -> String {
        format!("user_session:{}", username)
    }

    fn pending_key(username: &str) -> String {
        format!("pending_messages:{}", username)
    }
}

#[async_trait::async_trait]
impl CoordinatorGateway for RedisCoordinatorGateway {
    async fn add_online(
        &self,
        username: &str,
        replica_id: &str,
        user_id: Option<UserId>,
    ) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let record = PresenceRecord {
            replica_id: replica_id.to_string(),
            login_time: Utc::now(),
            user_id,
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| CoordinatorError::Store(e.to_string()))?;

        let _: () = conn
            .set_ex(Self::online_user_key(username), payload, self.presence_ttl_secs)
            .await?;
        let _: () = conn.sadd("online_users", username).await?;
        Ok(())
    }

    async fn remove_online(&self, username: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::online_user_key(username)).await?;
        let _: () = conn.srem("online_users", username).await?;
        Ok(())
    }

    async fn is_online(&self, username: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self.conn.clone();
        let is_member: bool = conn.sismember("online_users", username).await?;
        if !is_member {
            return Ok(false);
        }
        let exists: bool = conn.exists(Self::online_user_key(username)).await?;
        if !exists {
            // the detail key expired or was never written; the set entry is stale.
            let _: () = conn.srem("online_users", username).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn list_online(&self) -> Result<Vec<String>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let usernames: Vec<String> = conn.smembers("online_users").await?;
        let mut result = Vec::with_capacity(usernames.len());
        for username in usernames {
            let exists: bool = conn.exists(Self::online_user_key(&username)).await?;
            if exists {
                result.push(username);
            } else {
                let _: () = conn.srem("online_users", &username).await?;
            }
        }
        Ok(result)
    }

    async fn touch_presence(&self, username: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = Self::online_user_key(username);
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(false);
        }
        let _: () = conn.expire(&key, self.presence_ttl_secs as i64).await?;
        Ok(true)
    }

    async fn users_per_replica(&self) -> Result<HashMap<String, u64>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let usernames: Vec<String> = conn.smembers("online_users").await?;
        let mut counts = HashMap::new();
        for username in usernames {
            let raw: Option<String> = conn.get(Self::online_user_key(&username)).await?;
            if let Some(raw) = raw {
                if let Ok(record) = serde_json::from_str::<PresenceRecord>(&raw) {
                    *counts.entry(record.replica_id).or_insert(0u64) += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn online_user_count(&self) -> Result<u64, CoordinatorError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard("online_users").await?;
        Ok(count)
    }

    async fn create_token(
        &self,
        username: &str,
        user_id: UserId,
    ) -> Result<ResumeToken, CoordinatorError> {
        let mut conn = self.conn.clone();
        let token = ResumeToken::new();
        let now = Utc::now();
        let record = SessionTokenRecord {
            username: username.to_string(),
            user_id,
            created_at: now,
            last_active: now,
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| CoordinatorError::Store(e.to_string()))?;

        let _: () = conn
            .set_ex(Self::session_key(token), payload, self.token_ttl_secs)
            .await?;
        let _: () = conn
            .set_ex(Self::user_session_key(username), token.to_string(), self.token_ttl_secs)
            .await?;
        Ok(token)
    }

    async fn lookup_token(
        &self,
        token: ResumeToken,
    ) -> Result<Option<SessionTokenRecord>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::session_key(token)).await?;
        match raw {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| CoordinatorError::Store(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn touch_token(&self, token: ResumeToken) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = Self::session_key(token);
        let raw: Option<String> = conn.get(&key).await?;
        if let Some(raw) = raw {
            if let Ok(mut record) = serde_json::from_str::<SessionTokenRecord>(&raw) {
                record.last_active = Utc::now();
                let payload = serde_json::to_string(&record)
                    .map_err(|e| CoordinatorError::Store(e.to_string()))?;
                let _: () = conn.set_ex(&key, payload, self.token_ttl_secs).await?;
                let _: () = conn
                    .expire(Self::user_session_key(&record.username), self.token_ttl_secs as i64)
                    .await?;
            }
        }
        Ok(())
    }

    async fn revoke_token(&self, token: ResumeToken) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = Self::session_key(token);
        let raw: Option<String> = conn.get(&key).await?;
        let _: () = conn.del(&key).await?;
        if let Some(raw) = raw {
            if let Ok(record) = serde_json::from_str::<SessionTokenRecord>(&raw) {
                let _: () = conn.del(Self::user_session_key(&record.username)).await?;
                let _: () = conn.del(Self::pending_key(&record.username)).await?;
            }
        }
        Ok(())
    }

    async fn enqueue_pending(
        &self,
        username: &str,
        envelope: PendingEnvelope,
    ) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = Self::pending_key(username);
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| CoordinatorError::Store(e.to_string()))?;

        let _: () = conn.rpush(&key, payload).await?;
        let _: () = conn.expire(&key, 3600).await?;
        let len: isize = conn.llen(&key).await?;
        if len > PENDING_LIST_CAP {
            let _: () = conn.ltrim(&key, len - PENDING_LIST_CAP, -1).await?;
        }
        Ok(())
    }

    async fn drain_pending(&self, username: &str) -> Result<Vec<PendingEnvelope>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = Self::pending_key(username);
        let raw: Vec<String> = self
            .drain_pending_script
            .key(&key)
            .invoke_async(&mut conn)
            .await?;

        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| CoordinatorError::Store(e.to_string())))
            .collect()
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Receiver<String>, CoordinatorError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(256);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, channel = %channel, "dropping undecodable pubsub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
