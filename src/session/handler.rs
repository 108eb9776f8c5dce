use super::protocol::*;
use super::state::ConnectionState;
use crate::domain_model::*;
use crate::domain_port::{CoordinatorGateway, PersistenceError, PersistenceGateway};
use crate::group_chat::GroupChatService;
use crate::replica::ReplicaFabric;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Shared, long-lived collaborators every connection needs. Cloned cheaply
/// (all `Arc`) into each per-connection task.
pub struct SessionDeps {
    pub persistence: Arc<dyn PersistenceGateway>,
    pub coordinator: Arc<dyn CoordinatorGateway>,
    pub fabric: Arc<ReplicaFabric>,
    pub group_chat: Arc<GroupChatService>,
    pub replica_id: String,
}

/// Outcome of a menu-level framed state (Contacts, MyGroups, BrowseGroups):
/// `back` returns control to the main menu, `bye` ends the whole session.
/// Chat subflows (PrivateChat, Broadcast, GroupChat) never produce `LogOut`
/// since inside them `bye` is just another message line (SPEC_FULL §4.4/§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    LogOut,
}

struct AuthContext {
    user_id: UserId,
    username: String,
    session_id: SessionId,
    token: ResumeToken,
}

/// Owns one client connection end to end. The reader loop below and the
/// writer task spawned in `run_connection` communicate only through `out`;
/// there is no shared mutable state and so no lock to hold across an
/// `.await` (SPEC_FULL §5).
struct Session {
    deps: Arc<SessionDeps>,
    out: mpsc::Sender<String>,
    conn_id: u64,
    auth: Option<AuthContext>,
}

impl Session {
    async fn send(&self, line: String) {
        if self.out.send(line).await.is_err() {
            tracing::debug!(conn_id = self.conn_id, "outbound channel closed, writer task has exited");
        }
    }

    async fn send_block(&self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.send(line).await;
        }
    }
}

/// Accepts one TCP connection through the full session state machine
/// (SPEC_FULL §4.4), until `bye`, EOF, or an unrecoverable I/O error.
pub async fn run_connection(socket: TcpStream, deps: Arc<SessionDeps>, conn_id: u64) {
    let (read_half, write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        deps,
        out: tx,
        conn_id,
        auth: None,
    };

    let outcome = run_auth_phase(&mut session, &mut lines).await;

    if outcome {
        run_menu_loop(&mut session, &mut lines).await;
    }

    cleanup(&mut session).await;
    drop(session.out);
    let _ = writer.await;
}

async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(
    lines: &mut tokio::io::Lines<R>,
) -> Option<String> {
    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(error = %e, "read error, closing connection");
            None
        }
    }
}

async fn cleanup(session: &mut Session) {
    if let Some(auth) = &session.auth {
        session.deps.fabric.unregister(&auth.username);
        if let Err(e) = session.deps.coordinator.remove_online(&auth.username).await {
            tracing::warn!(error = %e, username = %auth.username, "failed to deregister presence on disconnect");
        }
        if let Err(e) = session.deps.persistence.close_session(auth.session_id).await {
            tracing::warn!(error = %e, "failed to close session record");
        }
    }
}

/// Hello/Auth: returns true once authenticated (fresh login/signup or
/// resumed session), false if the connection closed before authenticating.
async fn run_auth_phase<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
) -> bool {
    loop {
        session.send(auth_request()).await;

        let Some(line) = next_line(lines).await else {
            return false;
        };
        let line = line.trim();

        if line == "LOGIN" {
            if try_login(session, lines).await {
                return true;
            }
        } else if line == "SIGNUP" {
            if try_signup(session, lines).await {
                return true;
            }
        } else if let Some(token_str) = line.strip_prefix("RESUME_SESSION:") {
            if try_resume(session, token_str).await {
                return true;
            }
        } else {
            session.send(auth_failed("Unrecognized command")).await;
        }
    }
}

async fn try_login<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
) -> bool {
    session.send(login_prompt()).await;
    let Some(username) = next_line(lines).await else { return false };
    let Some(password) = next_line(lines).await else { return false };

    match session.deps.persistence.authenticate(username.trim(), &password).await {
        Ok(user_id) => complete_login(session, user_id, username.trim(), "Login successful").await,
        Err(PersistenceError::BadCredentials) => {
            session.send(auth_failed("Invalid username or password")).await;
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "authenticate failed");
            session.send(auth_failed("Login failed")).await;
            false
        }
    }
}

async fn try_signup<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
) -> bool {
    session.send(signup_prompt()).await;
    let Some(username) = next_line(lines).await else { return false };
    let Some(password) = next_line(lines).await else { return false };
    let username = username.trim().to_string();

    match session.deps.persistence.register_user(&username, &password).await {
        Ok(user_id) => complete_login(session, user_id, &username, "Signup successful").await,
        Err(PersistenceError::NameTaken) => {
            session.send(auth_failed("Username already exists")).await;
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "register_user failed");
            session.send(auth_failed("Signup failed")).await;
            false
        }
    }
}

async fn complete_login(session: &mut Session, user_id: UserId, username: &str, msg: &str) -> bool {
    let session_id = match session.deps.persistence.open_session(user_id).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to open session record");
            session.send(auth_failed("Internal error")).await;
            return false;
        }
    };

    if let Err(e) = session
        .deps
        .coordinator
        .add_online(username, &session.deps.replica_id, Some(user_id))
        .await
    {
        tracing::error!(error = %e, "failed to register presence");
        session.send(auth_failed("Internal error")).await;
        return false;
    }

    let token = match session.deps.coordinator.create_token(username, user_id).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to issue resume token");
            session.send(auth_failed("Internal error")).await;
            return false;
        }
    };

    session.deps.fabric.register(username, session.out.clone());
    session.auth = Some(AuthContext {
        user_id,
        username: username.to_string(),
        session_id,
        token,
    });

    session.send(auth_success(msg)).await;
    session.send(session_token(&token.to_string())).await;
    true
}

async fn try_resume(session: &mut Session, token_str: &str) -> bool {
    let Ok(token) = ResumeToken::from_str(token_str) else {
        session.send(auth_failed("Invalid or expired session")).await;
        return false;
    };

    let record = match session.deps.coordinator.lookup_token(token).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            session.send(auth_failed("Invalid or expired session")).await;
            return false;
        }
        Err(e) => {
            tracing::error!(error = %e, "resume lookup failed");
            session.send(auth_failed("Invalid or expired session")).await;
            return false;
        }
    };

    if let Err(e) = session.deps.coordinator.touch_token(token).await {
        tracing::warn!(error = %e, "failed to refresh resume token TTL");
    }
    if let Err(e) = session
        .deps
        .coordinator
        .add_online(&record.username, &session.deps.replica_id, Some(record.user_id))
        .await
    {
        tracing::error!(error = %e, "failed to re-register presence on resume");
    }

    let session_id = match session.deps.persistence.open_session(record.user_id).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to open session record on resume");
            session.send(auth_failed("Invalid or expired session")).await;
            return false;
        }
    };

    session.deps.fabric.register(&record.username, session.out.clone());
    session.auth = Some(AuthContext {
        user_id: record.user_id,
        username: record.username.clone(),
        session_id,
        token,
    });

    session.send(session_resumed("Session resumed")).await;
    session.send(session_token(&token.to_string())).await;

    let pending = match session.deps.coordinator.drain_pending(&record.username).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "failed to drain pending messages");
            Vec::new()
        }
    };
    session.send(pending_messages_start(pending.len())).await;
    for envelope in pending {
        session.send(pending_msg(&envelope.content)).await;
    }
    session.send(PENDING_MESSAGES_END.to_string()).await;

    true
}

async fn run_menu_loop<R: tokio::io::AsyncBufRead + Unpin>(session: &mut Session, lines: &mut tokio::io::Lines<R>) {
    loop {
        session.send(MAIN_MENU_START.to_string()).await;
        session
            .send_block([
                "1. Contacts / Private Chat".to_string(),
                "2. Broadcast Channel".to_string(),
                "3. My Groups".to_string(),
                "4. Browse Groups".to_string(),
                "5. Create Group".to_string(),
            ])
            .await;
        session.send(MAIN_MENU_END.to_string()).await;

        let Some(line) = next_line(lines).await else { return };
        let state = ConnectionState::Menu;
        match line.trim() {
            "1" => {
                if run_contacts(session, lines).await == Flow::LogOut {
                    return;
                }
            }
            "2" => run_broadcast(session, lines).await,
            "3" => {
                if run_my_groups(session, lines).await == Flow::LogOut {
                    return;
                }
            }
            "4" => {
                if run_browse_groups(session, lines).await == Flow::LogOut {
                    return;
                }
            }
            "5" => run_create_group(session, lines).await,
            "bye" => return,
            other => {
                tracing::debug!(state = %state, input = %other, "invalid menu option");
                session.send(invalid_option("Please choose 1-5 or 'bye'")).await;
            }
        }

        let Some(auth) = &session.auth else { return };
        let _ = auth; // still authenticated; loop back to menu
    }
}

async fn run_contacts<R: tokio::io::AsyncBufRead + Unpin>(session: &mut Session, lines: &mut tokio::io::Lines<R>) -> Flow {
    loop {
        let Some(auth_user_id) = session.auth.as_ref().map(|a| a.user_id) else { return Flow::LogOut };
        let users = match session.deps.persistence.list_users(Some(auth_user_id)).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list users");
                Vec::new()
            }
        };

        session.send(CONTACT_LIST_START.to_string()).await;
        session.send("BROADCAST|broadcast".to_string()).await;
        for (_, username, _) in &users {
            let online = session.deps.coordinator.is_online(username).await.unwrap_or(false);
            session.send(contact_line(username, online)).await;
        }
        session.send(CONTACT_LIST_END.to_string()).await;

        let Some(line) = next_line(lines).await else { return Flow::LogOut };
        let line = line.trim();

        if line == "bye" {
            return Flow::LogOut;
        } else if line == "back" {
            return Flow::Continue;
        } else if line.eq_ignore_ascii_case("BROADCAST") {
            run_broadcast(session, lines).await;
        } else if users.iter().any(|(_, u, _)| u == line) {
            run_private_chat(session, lines, line).await;
        } else {
            session.send(contact_not_found("No such contact")).await;
        }
    }
}

async fn run_private_chat<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
    peer_username: &str,
) {
    let Some(auth) = session.auth.as_ref() else { return };
    let user_id = auth.user_id;
    let username = auth.username.clone();

    let peer = match session.deps.persistence.list_users(None).await {
        Ok(users) => users.into_iter().find(|(_, u, _)| u == peer_username),
        Err(_) => None,
    };
    let Some((peer_id, peer_username, _)) = peer else {
        session.send(contact_not_found("No such contact")).await;
        return;
    };

    let conversation_id = match session
        .deps
        .persistence
        .get_or_create_conversation(user_id, peer_id)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "failed to open conversation");
            return;
        }
    };

    session.send(conversation_start(&peer_username)).await;
    match session
        .deps
        .persistence
        .history_private(conversation_id, HISTORY_REPLAY_LIMIT)
        .await
    {
        Ok(history) => {
            for m in &history {
                session.send(private_history_line(m)).await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to load conversation history"),
    }
    session.send(CONVERSATION_READY.to_string()).await;

    loop {
        let Some(line) = next_line(lines).await else { return };
        if line.trim() == "back" {
            return;
        }

        if let Err(e) = session
            .deps
            .persistence
            .append_private(conversation_id, user_id, &username, &line)
            .await
        {
            tracing::warn!(error = %e, "failed to persist private message");
            continue;
        }

        let delivered = session
            .deps
            .fabric
            .send_to_user(&peer_username, inbound_private_line(&username, &line))
            .await
            .unwrap_or(false);

        if delivered {
            session.send(SENT_DELIVERED.to_string()).await;
        } else {
            session.send(SENT_SAVED_OFFLINE.to_string()).await;
        }
    }
}

async fn run_broadcast<R: tokio::io::AsyncBufRead + Unpin>(session: &mut Session, lines: &mut tokio::io::Lines<R>) {
    let Some(auth) = session.auth.as_ref() else { return };
    let user_id = auth.user_id;
    let username = auth.username.clone();

    session.send(BROADCAST_START.to_string()).await;
    match session.deps.persistence.history_broadcast(HISTORY_REPLAY_LIMIT).await {
        Ok(history) => {
            for m in &history {
                session.send(broadcast_history_line(m)).await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to load broadcast history"),
    }
    session.send(CONVERSATION_READY.to_string()).await;

    loop {
        let Some(line) = next_line(lines).await else { return };
        if line.trim() == "back" {
            return;
        }

        if let Err(e) = session.deps.persistence.append_broadcast(user_id, &username, &line).await {
            tracing::warn!(error = %e, "failed to persist broadcast message");
            continue;
        }

        let online = session.deps.coordinator.list_online().await.unwrap_or_default();
        let mut delivered = 0usize;
        for recipient in &online {
            if recipient == &username {
                continue;
            }
            if session
                .deps
                .fabric
                .send_to_user(recipient, inbound_broadcast_line(&username, &line))
                .await
                .unwrap_or(false)
            {
                delivered += 1;
            }
        }
        session.send(broadcast_sent(delivered, online.len().saturating_sub(1))).await;
    }
}

async fn run_my_groups<R: tokio::io::AsyncBufRead + Unpin>(session: &mut Session, lines: &mut tokio::io::Lines<R>) -> Flow {
    let Some(user_id) = session.auth.as_ref().map(|a| a.user_id) else { return Flow::LogOut };

    let groups = match session.deps.group_chat.list_user_groups(user_id).await {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list user groups");
            Vec::new()
        }
    };

    if groups.is_empty() {
        session.send(no_groups("You are not in any groups yet")).await;
        return Flow::Continue;
    }

    session.send(MY_GROUPS_START.to_string()).await;
    for g in &groups {
        session
            .send(my_group_line(g.id.0, &g.name, &g.role.to_string(), g.member_count))
            .await;
    }
    session.send(MY_GROUPS_END.to_string()).await;

    let Some(line) = next_line(lines).await else { return Flow::LogOut };
    let line = line.trim();
    if line == "back" {
        return Flow::Continue;
    }
    if line == "bye" {
        return Flow::LogOut;
    }

    match line.parse::<i64>().ok().and_then(|id| groups.iter().find(|g| g.id.0 == id)) {
        Some(g) => {
            run_group_chat(session, lines, GroupId(g.id.0)).await;
            Flow::Continue
        }
        None => {
            session.send(invalid_selection("No such group")).await;
            Flow::Continue
        }
    }
}

async fn run_browse_groups<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
) -> Flow {
    let groups = match session.deps.group_chat.list_all_active_groups().await {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list active groups");
            Vec::new()
        }
    };

    session.send(BROWSE_GROUPS_START.to_string()).await;
    for g in &groups {
        session.send(browse_group_line(g.id.0, &g.name, g.member_count)).await;
    }
    session.send(BROWSE_GROUPS_END.to_string()).await;

    let Some(line) = next_line(lines).await else { return Flow::LogOut };
    let line = line.trim();
    if line == "back" {
        return Flow::Continue;
    }
    if line == "bye" {
        return Flow::LogOut;
    }

    let Some(group_id) = line.parse::<i64>().ok().map(GroupId) else {
        session.send(invalid_selection("No such group")).await;
        return Flow::Continue;
    };

    let Some(auth) = session.auth.as_ref() else { return Flow::LogOut };
    let (user_id, username) = (auth.user_id, auth.username.clone());

    match session.deps.group_chat.add_member(group_id, user_id, &username).await {
        Ok(()) => {
            session.send(join_success("Joined group")).await;
            run_group_chat(session, lines, group_id).await;
        }
        Err(PersistenceError::GroupNotFound) => session.send(group_not_found("Group not found or inactive")).await,
        Err(PersistenceError::AlreadyMember) => {
            session.send(join_failed("You are already a member of this group")).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to join group");
            session.send(join_failed("Failed to join group")).await;
        }
    }
    Flow::Continue
}

async fn run_create_group<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
) {
    let Some(auth) = session.auth.as_ref() else { return };
    let (user_id, username) = (auth.user_id, auth.username.clone());

    session.send(CREATE_GROUP_PROMPT.to_string()).await;
    let Some(name) = next_line(lines).await else { return };
    let name = name.trim().to_string();
    if name.is_empty() {
        session.send(create_failed("Group name cannot be empty")).await;
        return;
    }

    match session.deps.group_chat.create_group(&name, user_id, &username, None).await {
        Ok(group_id) => {
            session.send(create_success("Group created", group_id.0)).await;
            run_group_chat(session, lines, group_id).await;
        }
        Err(PersistenceError::GroupNameTaken) => {
            session.send(create_failed("Group name already exists")).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to create group");
            session.send(create_failed("Failed to create group")).await;
        }
    }
}

async fn run_group_chat<R: tokio::io::AsyncBufRead + Unpin>(
    session: &mut Session,
    lines: &mut tokio::io::Lines<R>,
    group_id: GroupId,
) {
    let Some(auth) = session.auth.as_ref() else { return };
    let (user_id, username) = (auth.user_id, auth.username.clone());

    let group = match session.deps.group_chat.group_info(group_id).await {
        Ok(Some(g)) => g,
        Ok(None) => {
            session.send(group_not_found("Group not found or inactive")).await;
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load group");
            return;
        }
    };

    match session.deps.group_chat.is_member(group_id, user_id).await {
        Ok(true) => {}
        Ok(false) => {
            session.send(not_member("You are not a member of this group")).await;
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to check group membership");
            return;
        }
    }

    if let Err(e) = session.deps.group_chat.mark_all_read(group_id, user_id).await {
        tracing::warn!(error = %e, "failed to mark group messages read");
    }

    session.send(group_chat_start(&group.name, group_id.0)).await;
    match session.deps.group_chat.history(group_id, HISTORY_REPLAY_LIMIT).await {
        Ok(history) => {
            for m in &history {
                session.send(group_history_line(m)).await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to load group history"),
    }
    session.send(GROUP_CHAT_READY.to_string()).await;

    loop {
        let Some(line) = next_line(lines).await else { return };
        let trimmed = line.trim();

        if trimmed == "/leave" {
            match session.deps.group_chat.remove_member(group_id, user_id, &username).await {
                Ok(_) => {
                    session.send(leave_result("You left the group")).await;
                    return;
                }
                Err(PersistenceError::NotAMember) => {
                    session.send(not_member("You are not a member of this group")).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to leave group");
                    session.send(leave_result("Failed to leave group")).await;
                }
            }
            continue;
        }

        if trimmed == "/members" {
            let members = session.deps.group_chat.group_members(group_id).await.unwrap_or_default();
            session.send(GROUP_MEMBERS_START.to_string()).await;
            for (_, member_username, role, _) in &members {
                session.send(group_member_line(member_username, &role.to_string())).await;
            }
            session.send(GROUP_MEMBERS_END.to_string()).await;
            continue;
        }

        if trimmed == "back" {
            return;
        }

        match session
            .deps
            .group_chat
            .send_group_message(group_id, user_id, &username, &line)
            .await
        {
            Ok(_) => session.send(GROUP_SENT.to_string()).await,
            Err(e) => {
                tracing::warn!(error = %e, "failed to send group message");
            }
        }
    }
}

/// Bounded grace period `main.rs` gives in-flight sessions to flush and
/// deregister presence on SIGTERM/Ctrl+C before the accept socket's shutdown
/// forces remaining connections closed (SPEC_FULL §4.3/§5).
pub async fn shutdown_grace() -> Duration {
    Duration::from_secs(5)
}
