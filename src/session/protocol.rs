use crate::domain_model::{BroadcastMessage, GroupMessage, GroupMessageType, Message};

pub const HISTORY_REPLAY_LIMIT: i64 = 50;

pub fn auth_request() -> String {
    "AUTH_REQUEST".to_string()
}

pub fn login_prompt() -> String {
    "LOGIN_PROMPT".to_string()
}

pub fn signup_prompt() -> String {
    "SIGNUP_PROMPT".to_string()
}

pub fn auth_success(msg: &str) -> String {
    format!("AUTH_SUCCESS:{}", msg)
}

pub fn auth_failed(msg: &str) -> String {
    format!("AUTH_FAILED:{}", msg)
}

pub fn session_token(token: &str) -> String {
    format!("SESSION_TOKEN:{}", token)
}

pub fn session_resumed(msg: &str) -> String {
    format!("SESSION_RESUMED:{}", msg)
}

pub fn pending_messages_start(n: usize) -> String {
    format!("PENDING_MESSAGES_START:{}", n)
}

pub fn pending_msg(content: &str) -> String {
    format!("PENDING_MSG:{}", content)
}

pub const PENDING_MESSAGES_END: &str = "PENDING_MESSAGES_END";

pub const MAIN_MENU_START: &str = "MAIN_MENU_START";
pub const MAIN_MENU_END: &str = "MAIN_MENU_END";

pub fn invalid_option(msg: &str) -> String {
    format!("INVALID_OPTION:{}", msg)
}

pub fn invalid_selection(msg: &str) -> String {
    format!("INVALID_SELECTION:{}", msg)
}

pub const CONTACT_LIST_START: &str = "CONTACT_LIST_START";
pub const CONTACT_LIST_END: &str = "CONTACT_LIST_END";

pub fn contact_line(username: &str, online: bool) -> String {
    format!("{}|{}", username, if online { "online" } else { "offline" })
}

pub fn contact_not_found(msg: &str) -> String {
    format!("CONTACT_NOT_FOUND:{}", msg)
}

pub fn conversation_start(peer: &str) -> String {
    format!("CONVERSATION_START:{}", peer)
}

pub const CONVERSATION_READY: &str = "CONVERSATION_READY";

pub fn private_history_line(m: &Message) -> String {
    format!("{}: {}", m.sender_username, m.text)
}

pub const SENT_DELIVERED: &str = "SENT:Message delivered";
pub const SENT_SAVED_OFFLINE: &str = "SENT:Message saved (recipient offline)";

pub const BROADCAST_START: &str = "BROADCAST_START:BROADCAST CHANNEL";

pub fn broadcast_history_line(m: &BroadcastMessage) -> String {
    format!("{}: {}", m.sender_username, m.text)
}

pub fn broadcast_sent(delivered: usize, total: usize) -> String {
    format!(
        "BROADCAST_SENT:Broadcast sent to {} online users (of {} total)",
        delivered, total
    )
}

/// Line pushed to a remote-connected user when delivered via `sendToUser`.
pub fn inbound_private_line(sender: &str, text: &str) -> String {
    format!("MESSAGE:{}:{}", sender, text)
}

pub fn inbound_broadcast_line(sender: &str, text: &str) -> String {
    format!("BROADCAST:{}:{}", sender, text)
}

pub const MY_GROUPS_START: &str = "MY_GROUPS_START";
pub const MY_GROUPS_END: &str = "MY_GROUPS_END";
pub const BROWSE_GROUPS_START: &str = "BROWSE_GROUPS_START";
pub const BROWSE_GROUPS_END: &str = "BROWSE_GROUPS_END";

pub fn no_groups(msg: &str) -> String {
    format!("NO_GROUPS:{}", msg)
}

pub fn my_group_line(id: i64, name: &str, role: &str, member_count: i64) -> String {
    format!("{}|{}|{}|{}", id, name, role, member_count)
}

pub fn browse_group_line(id: i64, name: &str, member_count: i64) -> String {
    format!("{}|{}|{}", id, name, member_count)
}

pub const CREATE_GROUP_PROMPT: &str = "CREATE_GROUP_PROMPT";

pub fn create_success(msg: &str, group_id: i64) -> String {
    format!("CREATE_SUCCESS:{}|{}", msg, group_id)
}

pub fn create_failed(msg: &str) -> String {
    format!("CREATE_FAILED:{}", msg)
}

pub fn group_not_found(msg: &str) -> String {
    format!("GROUP_NOT_FOUND:{}", msg)
}

pub fn join_success(msg: &str) -> String {
    format!("JOIN_SUCCESS:{}", msg)
}

pub fn join_failed(msg: &str) -> String {
    format!("JOIN_FAILED:{}", msg)
}

pub fn group_chat_start(name: &str, group_id: i64) -> String {
    format!("GROUP_CHAT_START:{}:{}", name, group_id)
}

pub const GROUP_CHAT_READY: &str = "GROUP_CHAT_READY";

pub fn group_history_line(m: &GroupMessage) -> String {
    match m.message_type {
        GroupMessageType::System => m.text.clone(),
        GroupMessageType::User => format!("{}: {}", m.sender_username, m.text),
    }
}

pub const GROUP_SENT: &str = "GROUP_SENT:Message sent to group";

pub fn inbound_group_line(group_name: &str, sender: &str, text: &str) -> String {
    format!("GROUP_MESSAGE:{}:{}:{}", group_name, sender, text)
}

pub const GROUP_MEMBERS_START: &str = "GROUP_MEMBERS_START";
pub const GROUP_MEMBERS_END: &str = "GROUP_MEMBERS_END";

pub fn group_member_line(username: &str, role: &str) -> String {
    format!("{}|{}", username, role)
}

pub fn leave_result(msg: &str) -> String {
    format!("LEAVE_RESULT:{}", msg)
}

pub fn not_member(msg: &str) -> String {
    format!("NOT_MEMBER:{}", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::{GroupId, GroupMessageId, GroupMessageType, UserId};
    use chrono::Utc;

    #[test]
    fn contact_line_renders_pipe_separated_presence() {
        assert_eq!(contact_line("bob", true), "bob|online");
        assert_eq!(contact_line("bob", false), "bob|offline");
    }

    #[test]
    fn group_history_line_formats_system_and_user_messages_differently() {
        let system = GroupMessage {
            id: GroupMessageId(1),
            group_id: GroupId(1),
            sender_id: UserId(1),
            sender_username: "alice".to_string(),
            text: "Group 'book-club' created by alice".to_string(),
            timestamp: Utc::now(),
            message_type: GroupMessageType::System,
        };
        assert_eq!(group_history_line(&system), "Group 'book-club' created by alice");

        let user = GroupMessage {
            message_type: GroupMessageType::User,
            text: "hello".to_string(),
            ..system
        };
        assert_eq!(group_history_line(&user), "alice: hello");
    }

    #[test]
    fn inbound_line_formatters_are_colon_delimited() {
        assert_eq!(inbound_private_line("alice", "hi"), "MESSAGE:alice:hi");
        assert_eq!(inbound_broadcast_line("alice", "hi"), "BROADCAST:alice:hi");
        assert_eq!(inbound_group_line("book-club", "alice", "hi"), "GROUP_MESSAGE:book-club:alice:hi");
    }
}
