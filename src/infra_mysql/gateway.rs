use super::util::{downcast, is_dup_key};
use crate::domain_model::*;
use crate::domain_port::{PersistenceError, TxManager};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row};
use std::sync::Arc;

/// Concrete `PersistenceGateway` backed by MySQL. Connections are drawn from
/// a bounded pool (min 1, max 20) constructed by the caller; multi-statement
/// operations run inside one transaction via `TxManager`/`StorageTx` so a
/// failure midway rolls the whole operation back.
pub struct MySqlPersistenceGateway {
    pool: MySqlPool,
    tx_manager: Arc<dyn TxManager>,
}

impl MySqlPersistenceGateway {
    pub fn new(pool: MySqlPool, tx_manager: Arc<dyn TxManager>) -> Self {
        Self { pool, tx_manager }
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for MySqlPersistenceGateway {
    async fn register_user(&self, username: &str, password: &str) -> Result<UserId, PersistenceError> {
        let password_hash = hash_password(password);
        let result = sqlx::query(
            "INSERT INTO user (username, password_hash, created_at) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(&password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) => Ok(UserId(res.last_insert_id() as i64)),
            Err(e) if is_dup_key(&e) => Err(PersistenceError::NameTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<UserId, PersistenceError> {
        let password_hash = hash_password(password);
        let row = sqlx::query("SELECT user_id FROM user WHERE username = ? AND password_hash = ?")
            .bind(username)
            .bind(&password_hash)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(UserId(row.get::<i64, _>("user_id"))),
            None => Err(PersistenceError::BadCredentials),
        }
    }

    async fn open_session(&self, user_id: UserId) -> Result<SessionId, PersistenceError> {
        let result = sqlx::query(
            "INSERT INTO session (user_id, login_time, active) VALUES (?, ?, TRUE)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(SessionId(result.last_insert_id() as i64))
    }

    async fn close_session(&self, session_id: SessionId) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE session SET logout_time = ?, active = FALSE WHERE session_id = ?",
        )
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_users(
        &self,
        excluding: Option<UserId>,
    ) -> Result<Vec<(UserId, String, DateTime<Utc>)>, PersistenceError> {
        let rows = match excluding {
            Some(uid) => {
                sqlx::query("SELECT user_id, username, created_at FROM user WHERE user_id != ? ORDER BY username")
                    .bind(uid)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT user_id, username, created_at FROM user ORDER BY username")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|r| (UserId(r.get("user_id")), r.get("username"), r.get("created_at")))
            .collect())
    }

    async fn get_or_create_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ConversationId, PersistenceError> {
        let pair = UserPair::new(a, b);

        let existing = sqlx::query(
            "SELECT conversation_id FROM conversation WHERE p1 = ? AND p2 = ?",
        )
        .bind(pair.lo())
        .bind(pair.hi())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(ConversationId(row.get("conversation_id")));
        }

        let result = sqlx::query(
            "INSERT INTO conversation (p1, p2, last_message_at) VALUES (?, ?, ?)",
        )
        .bind(pair.lo())
        .bind(pair.hi())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) => Ok(ConversationId(res.last_insert_id() as i64)),
            // lost the create race against a concurrent caller; re-read
            Err(e) if is_dup_key(&e) => {
                let row = sqlx::query(
                    "SELECT conversation_id FROM conversation WHERE p1 = ? AND p2 = ?",
                )
                .bind(pair.lo())
                .bind(pair.hi())
                .fetch_one(&self.pool)
                .await?;
                Ok(ConversationId(row.get("conversation_id")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_private(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<MessageId, PersistenceError> {
        let mut tx = self.tx_manager.begin().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        let conn = downcast(tx.as_mut()).conn();

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO message (conversation_id, sender_id, sender_username, text, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(sender_username)
        .bind(text)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        let message_id = MessageId(result.last_insert_id() as i64);

        sqlx::query("UPDATE conversation SET last_message_at = ? WHERE conversation_id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *conn)
            .await?;

        tx.commit().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        Ok(message_id)
    }

    async fn history_private(
        &self,
        conversation_id: ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, PersistenceError> {
        let mut rows = sqlx::query(
            "SELECT message_id, sender_id, sender_username, text, timestamp FROM message
             WHERE conversation_id = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| Message {
            id: MessageId(r.get("message_id")),
            conversation_id,
            sender_id: UserId(r.get("sender_id")),
            sender_username: r.get("sender_username"),
            text: r.get("text"),
            timestamp: r.get("timestamp"),
        })
        .collect::<Vec<_>>();
        rows.reverse();
        Ok(rows)
    }

    async fn append_broadcast(
        &self,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<BroadcastMessageId, PersistenceError> {
        let result = sqlx::query(
            "INSERT INTO broadcast_message (sender_id, sender_username, text, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(sender_id)
        .bind(sender_username)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(BroadcastMessageId(result.last_insert_id() as i64))
    }

    async fn history_broadcast(&self, limit: i64) -> Result<Vec<BroadcastMessage>, PersistenceError> {
        let mut rows = sqlx::query(
            "SELECT message_id, sender_id, sender_username, text, timestamp FROM broadcast_message
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| BroadcastMessage {
            id: BroadcastMessageId(r.get("message_id")),
            sender_id: UserId(r.get("sender_id")),
            sender_username: r.get("sender_username"),
            text: r.get("text"),
            timestamp: r.get("timestamp"),
        })
        .collect::<Vec<_>>();
        rows.reverse();
        Ok(rows)
    }

    async fn create_group(
        &self,
        name: &str,
        creator_id: UserId,
        creator_username: &str,
        description: Option<&str>,
    ) -> Result<GroupId, PersistenceError> {
        let mut tx = self.tx_manager.begin().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        let conn = downcast(tx.as_mut()).conn();

        let existing = sqlx::query("SELECT group_id FROM chat_group WHERE name = ? AND active = TRUE")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() {
            tx.rollback().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
            return Err(PersistenceError::GroupNameTaken);
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chat_group (name, description, creator_id, created_at, last_message_at, active)
             VALUES (?, ?, ?, ?, ?, TRUE)",
        )
        .bind(name)
        .bind(description)
        .bind(creator_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        let group_id = GroupId(result.last_insert_id() as i64);

        sqlx::query(
            "INSERT INTO group_membership (group_id, user_id, role, joined_at, active) VALUES (?, ?, 'admin', ?, TRUE)",
        )
        .bind(group_id)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO group_message (group_id, sender_id, sender_username, text, timestamp, message_type)
             VALUES (?, ?, ?, ?, ?, 'system')",
        )
        .bind(group_id)
        .bind(creator_id)
        .bind(creator_username)
        .bind(format!("Group '{}' created by {}", name, creator_username))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        tx.commit().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        Ok(group_id)
    }

    async fn add_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.tx_manager.begin().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        let conn = downcast(tx.as_mut()).conn();

        let group = sqlx::query("SELECT group_id FROM chat_group WHERE group_id = ? AND active = TRUE")
            .bind(group_id)
            .fetch_optional(&mut *conn)
            .await?;
        if group.is_none() {
            tx.rollback().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
            return Err(PersistenceError::GroupNotFound);
        }

        let already = sqlx::query(
            "SELECT 1 FROM group_membership WHERE group_id = ? AND user_id = ? AND active = TRUE",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        if already.is_some() {
            tx.rollback().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
            return Err(PersistenceError::AlreadyMember);
        }

        let now = Utc::now();
        // upsert: a prior leaver's soft-deleted row occupies the primary key.
        sqlx::query(
            "INSERT INTO group_membership (group_id, user_id, role, joined_at, active)
             VALUES (?, ?, 'member', ?, TRUE)
             ON DUPLICATE KEY UPDATE role = 'member', joined_at = VALUES(joined_at), active = TRUE",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO group_message (group_id, sender_id, sender_username, text, timestamp, message_type)
             VALUES (?, ?, ?, ?, ?, 'system')",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(username)
        .bind(format!("{} joined the group", username))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        tx.commit().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        Ok(())
    }

    async fn remove_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        username: &str,
    ) -> Result<bool, PersistenceError> {
        let mut tx = self.tx_manager.begin().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        let conn = downcast(tx.as_mut()).conn();

        let member = sqlx::query(
            "SELECT 1 FROM group_membership WHERE group_id = ? AND user_id = ? AND active = TRUE",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        if member.is_none() {
            tx.rollback().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
            return Err(PersistenceError::NotAMember);
        }

        sqlx::query("UPDATE group_membership SET active = FALSE WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM group_membership WHERE group_id = ? AND active = TRUE",
        )
        .bind(group_id)
        .fetch_one(&mut *conn)
        .await?;

        let now = Utc::now();
        let deactivated = remaining == 0;
        if deactivated {
            sqlx::query("UPDATE chat_group SET active = FALSE WHERE group_id = ?")
                .bind(group_id)
                .execute(&mut *conn)
                .await?;
        }

        sqlx::query(
            "INSERT INTO group_message (group_id, sender_id, sender_username, text, timestamp, message_type)
             VALUES (?, ?, ?, ?, ?, 'system')",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(username)
        .bind(format!("{} left the group", username))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        tx.commit().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        Ok(deactivated)
    }

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroupSummary>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT g.group_id, g.name, g.description, gm.role,
                    (SELECT COUNT(*) FROM group_membership WHERE group_id = g.group_id AND active = TRUE) AS member_count
             FROM chat_group g
             JOIN group_membership gm ON g.group_id = gm.group_id
             WHERE gm.user_id = ? AND gm.active = TRUE AND g.active = TRUE
             ORDER BY g.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| UserGroupSummary {
                id: GroupId(r.get("group_id")),
                name: r.get("name"),
                description: r.get("description"),
                role: r.get("role"),
                member_count: r.get("member_count"),
            })
            .collect())
    }

    async fn list_all_active_groups(&self) -> Result<Vec<GroupSummary>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT g.group_id, g.name, g.description,
                    (SELECT COUNT(*) FROM group_membership WHERE group_id = g.group_id AND active = TRUE) AS member_count
             FROM chat_group g
             WHERE g.active = TRUE
             ORDER BY g.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GroupSummary {
                id: GroupId(r.get("group_id")),
                name: r.get("name"),
                description: r.get("description"),
                member_count: r.get("member_count"),
            })
            .collect())
    }

    async fn search_groups(&self, term: &str) -> Result<Vec<GroupSummary>, PersistenceError> {
        let pattern = format!("%{}%", term);
        let rows = sqlx::query(
            "SELECT g.group_id, g.name, g.description,
                    (SELECT COUNT(*) FROM group_membership WHERE group_id = g.group_id AND active = TRUE) AS member_count
             FROM chat_group g
             WHERE g.active = TRUE AND g.name LIKE ?
             ORDER BY g.created_at DESC",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GroupSummary {
                id: GroupId(r.get("group_id")),
                name: r.get("name"),
                description: r.get("description"),
                member_count: r.get("member_count"),
            })
            .collect())
    }

    async fn group_members(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<(UserId, String, GroupRole, DateTime<Utc>)>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT u.user_id, u.username, gm.role, gm.joined_at
             FROM group_membership gm
             JOIN user u ON gm.user_id = u.user_id
             WHERE gm.group_id = ? AND gm.active = TRUE
             ORDER BY gm.joined_at",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (UserId(r.get("user_id")), r.get("username"), r.get("role"), r.get("joined_at")))
            .collect())
    }

    async fn group_info(&self, group_id: GroupId) -> Result<Option<Group>, PersistenceError> {
        let row = sqlx::query(
            "SELECT group_id, name, description, creator_id, created_at, last_message_at, active
             FROM chat_group WHERE group_id = ? AND active = TRUE",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Group {
            id: GroupId(r.get("group_id")),
            name: r.get("name"),
            description: r.get("description"),
            creator_id: UserId(r.get("creator_id")),
            created_at: r.get("created_at"),
            last_message_at: r.get("last_message_at"),
            active: r.get("active"),
        }))
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, PersistenceError> {
        let row = sqlx::query(
            "SELECT 1 FROM group_membership WHERE group_id = ? AND user_id = ? AND active = TRUE",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn append_group_message(
        &self,
        group_id: GroupId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
        message_type: GroupMessageType,
    ) -> Result<GroupMessageId, PersistenceError> {
        let mut tx = self.tx_manager.begin().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        let conn = downcast(tx.as_mut()).conn();

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO group_message (group_id, sender_id, sender_username, text, timestamp, message_type)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(sender_id)
        .bind(sender_username)
        .bind(text)
        .bind(now)
        .bind(message_type)
        .execute(&mut *conn)
        .await?;
        let message_id = GroupMessageId(result.last_insert_id() as i64);

        sqlx::query("UPDATE chat_group SET last_message_at = ? WHERE group_id = ?")
            .bind(now)
            .bind(group_id)
            .execute(&mut *conn)
            .await?;

        tx.commit().await.map_err(|e| PersistenceError::Store(e.to_string()))?;
        Ok(message_id)
    }

    async fn history_group(
        &self,
        group_id: GroupId,
        limit: i64,
    ) -> Result<Vec<GroupMessage>, PersistenceError> {
        let mut rows = sqlx::query(
            "SELECT message_id, sender_id, sender_username, text, timestamp, message_type FROM group_message
             WHERE group_id = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| GroupMessage {
            id: GroupMessageId(r.get("message_id")),
            group_id,
            sender_id: UserId(r.get("sender_id")),
            sender_username: r.get("sender_username"),
            text: r.get("text"),
            timestamp: r.get("timestamp"),
            message_type: r.get("message_type"),
        })
        .collect::<Vec<_>>();
        rows.reverse();
        Ok(rows)
    }

    async fn mark_group_read(
        &self,
        message_id: GroupMessageId,
        user_id: UserId,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT IGNORE INTO group_read_mark (message_id, user_id, read_at) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_all_group_read(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT IGNORE INTO group_read_mark (message_id, user_id, read_at)
             SELECT gm.message_id, ?, ?
             FROM group_message gm
             WHERE gm.group_id = ? AND gm.sender_id != ?",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
