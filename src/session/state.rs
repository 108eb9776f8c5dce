use std::fmt;

/// Mirrors the session state machine in SPEC_FULL §4.4. Carried mostly for
/// logging/span context; control flow in `handler.rs` is expressed directly
/// as nested async functions rather than a dispatch table, since transitions
/// are tree-shaped (Menu always returns to the same five branches) rather
/// than an arbitrary graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Hello,
    Auth,
    Menu,
    Contacts,
    PrivateChat,
    Broadcast,
    MyGroups,
    BrowseGroups,
    CreateGroup,
    GroupChat,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Hello => "hello",
            ConnectionState::Auth => "auth",
            ConnectionState::Menu => "menu",
            ConnectionState::Contacts => "contacts",
            ConnectionState::PrivateChat => "private_chat",
            ConnectionState::Broadcast => "broadcast",
            ConnectionState::MyGroups => "my_groups",
            ConnectionState::BrowseGroups => "browse_groups",
            ConnectionState::CreateGroup => "create_group",
            ConnectionState::GroupChat => "group_chat",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}
