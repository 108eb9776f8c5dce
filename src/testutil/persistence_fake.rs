use crate::domain_model::*;
use crate::domain_port::{PersistenceError, PersistenceGateway};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Minimal in-process stand-in for `PersistenceGateway`, used the way this
/// codebase's `*_fake` application services are: to drive the session state
/// machine and group chat service end to end in tests without a live MySQL
/// instance. Extend to simulate more error cases when needed.
#[derive(Default)]
pub struct InMemoryPersistenceGateway {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_user_id: i64,
    users_by_name: HashMap<String, User>,
    next_session_id: i64,
    next_conversation_id: i64,
    conversations: HashMap<(UserId, UserId), ConversationId>,
    next_message_id: i64,
    private_messages: HashMap<ConversationId, Vec<Message>>,
    next_broadcast_id: i64,
    broadcast_messages: Vec<BroadcastMessage>,
    next_group_id: i64,
    groups: HashMap<GroupId, Group>,
    memberships: HashMap<(GroupId, UserId), GroupMembership>,
    next_group_message_id: i64,
    group_messages: HashMap<GroupId, Vec<GroupMessage>>,
    read_marks: std::collections::HashSet<(GroupMessageId, UserId)>,
}

impl InMemoryPersistenceGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for InMemoryPersistenceGateway {
    async fn register_user(&self, username: &str, password: &str) -> Result<UserId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        if s.users_by_name.contains_key(username) {
            return Err(PersistenceError::NameTaken);
        }
        s.next_user_id += 1;
        let id = UserId(s.next_user_id);
        s.users_by_name.insert(
            username.to_string(),
            User {
                id,
                username: username.to_string(),
                password_hash: hash_password(password),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<UserId, PersistenceError> {
        let s = self.state.lock().unwrap();
        match s.users_by_name.get(username) {
            Some(u) if u.password_hash == hash_password(password) => Ok(u.id),
            _ => Err(PersistenceError::BadCredentials),
        }
    }

    async fn open_session(&self, _user_id: UserId) -> Result<SessionId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        s.next_session_id += 1;
        Ok(SessionId(s.next_session_id))
    }

    async fn close_session(&self, _session_id: SessionId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn list_users(
        &self,
        excluding: Option<UserId>,
    ) -> Result<Vec<(UserId, String, DateTime<Utc>)>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let mut rows: Vec<_> = s
            .users_by_name
            .values()
            .filter(|u| Some(u.id) != excluding)
            .map(|u| (u.id, u.username.clone(), u.created_at))
            .collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(rows)
    }

    async fn get_or_create_conversation(&self, a: UserId, b: UserId) -> Result<ConversationId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        let pair = UserPair::new(a, b);
        let key = (pair.lo(), pair.hi());
        if let Some(id) = s.conversations.get(&key) {
            return Ok(*id);
        }
        s.next_conversation_id += 1;
        let id = ConversationId(s.next_conversation_id);
        s.conversations.insert(key, id);
        Ok(id)
    }

    async fn append_private(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<MessageId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        s.next_message_id += 1;
        let id = MessageId(s.next_message_id);
        s.private_messages.entry(conversation_id).or_default().push(Message {
            id,
            conversation_id,
            sender_id,
            sender_username: sender_username.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn history_private(
        &self,
        conversation_id: ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let msgs = s.private_messages.get(&conversation_id).cloned().unwrap_or_default();
        let start = msgs.len().saturating_sub(limit.max(0) as usize);
        Ok(msgs[start..].to_vec())
    }

    async fn append_broadcast(
        &self,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
    ) -> Result<BroadcastMessageId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        s.next_broadcast_id += 1;
        let id = BroadcastMessageId(s.next_broadcast_id);
        s.broadcast_messages.push(BroadcastMessage {
            id,
            sender_id,
            sender_username: sender_username.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn history_broadcast(&self, limit: i64) -> Result<Vec<BroadcastMessage>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let start = s.broadcast_messages.len().saturating_sub(limit.max(0) as usize);
        Ok(s.broadcast_messages[start..].to_vec())
    }

    async fn create_group(
        &self,
        name: &str,
        creator_id: UserId,
        creator_username: &str,
        description: Option<&str>,
    ) -> Result<GroupId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        if s.groups.values().any(|g| g.active && g.name == name) {
            return Err(PersistenceError::GroupNameTaken);
        }
        s.next_group_id += 1;
        let id = GroupId(s.next_group_id);
        let now = Utc::now();
        s.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
                description: description.map(String::from),
                creator_id,
                created_at: now,
                last_message_at: now,
                active: true,
            },
        );
        s.memberships.insert(
            (id, creator_id),
            GroupMembership {
                group_id: id,
                user_id: creator_id,
                role: GroupRole::Admin,
                joined_at: now,
                active: true,
            },
        );
        s.next_group_message_id += 1;
        let msg_id = GroupMessageId(s.next_group_message_id);
        s.group_messages.entry(id).or_default().push(GroupMessage {
            id: msg_id,
            group_id: id,
            sender_id: creator_id,
            sender_username: creator_username.to_string(),
            text: format!("Group '{}' created by {}", name, creator_username),
            timestamp: now,
            message_type: GroupMessageType::System,
        });
        Ok(id)
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId, username: &str) -> Result<(), PersistenceError> {
        let mut s = self.state.lock().unwrap();
        match s.groups.get(&group_id) {
            Some(g) if g.active => {}
            _ => return Err(PersistenceError::GroupNotFound),
        }
        if s.memberships.get(&(group_id, user_id)).map(|m| m.active).unwrap_or(false) {
            return Err(PersistenceError::AlreadyMember);
        }
        let now = Utc::now();
        s.memberships.insert(
            (group_id, user_id),
            GroupMembership {
                group_id,
                user_id,
                role: GroupRole::Member,
                joined_at: now,
                active: true,
            },
        );
        s.next_group_message_id += 1;
        let msg_id = GroupMessageId(s.next_group_message_id);
        s.group_messages.entry(group_id).or_default().push(GroupMessage {
            id: msg_id,
            group_id,
            sender_id: user_id,
            sender_username: username.to_string(),
            text: format!("{} joined the group", username),
            timestamp: now,
            message_type: GroupMessageType::System,
        });
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId, username: &str) -> Result<bool, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        match s.memberships.get_mut(&(group_id, user_id)) {
            Some(m) if m.active => m.active = false,
            _ => return Err(PersistenceError::NotAMember),
        }
        let remaining = s
            .memberships
            .values()
            .filter(|m| m.group_id == group_id && m.active)
            .count();
        let deactivated = remaining == 0;
        if deactivated {
            if let Some(g) = s.groups.get_mut(&group_id) {
                g.active = false;
            }
        }
        let now = Utc::now();
        s.next_group_message_id += 1;
        let msg_id = GroupMessageId(s.next_group_message_id);
        s.group_messages.entry(group_id).or_default().push(GroupMessage {
            id: msg_id,
            group_id,
            sender_id: user_id,
            sender_username: username.to_string(),
            text: format!("{} left the group", username),
            timestamp: now,
            message_type: GroupMessageType::System,
        });
        Ok(deactivated)
    }

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroupSummary>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let mut out = Vec::new();
        for m in s.memberships.values().filter(|m| m.user_id == user_id && m.active) {
            if let Some(g) = s.groups.get(&m.group_id) {
                if !g.active {
                    continue;
                }
                let member_count = s
                    .memberships
                    .values()
                    .filter(|mm| mm.group_id == g.id && mm.active)
                    .count() as i64;
                out.push(UserGroupSummary {
                    id: g.id,
                    name: g.name.clone(),
                    description: g.description.clone(),
                    role: m.role,
                    member_count,
                });
            }
        }
        Ok(out)
    }

    async fn list_all_active_groups(&self) -> Result<Vec<GroupSummary>, PersistenceError> {
        let s = self.state.lock().unwrap();
        Ok(s.groups
            .values()
            .filter(|g| g.active)
            .map(|g| GroupSummary {
                id: g.id,
                name: g.name.clone(),
                description: g.description.clone(),
                member_count: s
                    .memberships
                    .values()
                    .filter(|m| m.group_id == g.id && m.active)
                    .count() as i64,
            })
            .collect())
    }

    async fn search_groups(&self, term: &str) -> Result<Vec<GroupSummary>, PersistenceError> {
        let s = self.state.lock().unwrap();
        Ok(s.groups
            .values()
            .filter(|g| g.active && g.name.contains(term))
            .map(|g| GroupSummary {
                id: g.id,
                name: g.name.clone(),
                description: g.description.clone(),
                member_count: s
                    .memberships
                    .values()
                    .filter(|m| m.group_id == g.id && m.active)
                    .count() as i64,
            })
            .collect())
    }

    async fn group_members(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<(UserId, String, GroupRole, DateTime<Utc>)>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let mut out = Vec::new();
        for m in s.memberships.values().filter(|m| m.group_id == group_id && m.active) {
            if let Some(u) = s.users_by_name.values().find(|u| u.id == m.user_id) {
                out.push((u.id, u.username.clone(), m.role, m.joined_at));
            }
        }
        out.sort_by(|a, b| a.3.cmp(&b.3));
        Ok(out)
    }

    async fn group_info(&self, group_id: GroupId) -> Result<Option<Group>, PersistenceError> {
        let s = self.state.lock().unwrap();
        Ok(s.groups.get(&group_id).filter(|g| g.active).cloned())
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, PersistenceError> {
        let s = self.state.lock().unwrap();
        Ok(s.memberships.get(&(group_id, user_id)).map(|m| m.active).unwrap_or(false))
    }

    async fn append_group_message(
        &self,
        group_id: GroupId,
        sender_id: UserId,
        sender_username: &str,
        text: &str,
        message_type: GroupMessageType,
    ) -> Result<GroupMessageId, PersistenceError> {
        let mut s = self.state.lock().unwrap();
        s.next_group_message_id += 1;
        let id = GroupMessageId(s.next_group_message_id);
        let now = Utc::now();
        s.group_messages.entry(group_id).or_default().push(GroupMessage {
            id,
            group_id,
            sender_id,
            sender_username: sender_username.to_string(),
            text: text.to_string(),
            timestamp: now,
            message_type,
        });
        if let Some(g) = s.groups.get_mut(&group_id) {
            g.last_message_at = now;
        }
        Ok(id)
    }

    async fn history_group(&self, group_id: GroupId, limit: i64) -> Result<Vec<GroupMessage>, PersistenceError> {
        let s = self.state.lock().unwrap();
        let msgs = s.group_messages.get(&group_id).cloned().unwrap_or_default();
        let start = msgs.len().saturating_sub(limit.max(0) as usize);
        Ok(msgs[start..].to_vec())
    }

    async fn mark_group_read(&self, message_id: GroupMessageId, user_id: UserId) -> Result<(), PersistenceError> {
        let mut s = self.state.lock().unwrap();
        s.read_marks.insert((message_id, user_id));
        Ok(())
    }

    async fn mark_all_group_read(&self, group_id: GroupId, user_id: UserId) -> Result<(), PersistenceError> {
        let mut s = self.state.lock().unwrap();
        let message_ids: Vec<GroupMessageId> = s
            .group_messages
            .get(&group_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.sender_id != user_id)
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default();
        for id in message_ids {
            s.read_marks.insert((id, user_id));
        }
        Ok(())
    }
}
