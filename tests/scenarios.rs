//! End-to-end coverage of the scenarios in spec §8, driven over real TCP
//! connections against the real session state machine, replica fabric and
//! group chat service — only persistence and coordination are swapped for
//! the in-memory fakes so the suite runs without MySQL/Redis.

mod helpers;

use chatfabric::testutil::{InMemoryCoordinatorGateway, InMemoryPersistenceGateway};
use helpers::{Client, spawn_replica};
use std::sync::Arc;
use std::time::Duration;

fn shared_store() -> (Arc<InMemoryPersistenceGateway>, Arc<InMemoryCoordinatorGateway>) {
    (
        Arc::new(InMemoryPersistenceGateway::new()),
        Arc::new(InMemoryCoordinatorGateway::new()),
    )
}

#[tokio::test]
async fn signup_then_private_message_is_delivered_live_on_the_same_replica() {
    let (persistence, coordinator) = shared_store();
    let replica = spawn_replica("r1", persistence, coordinator).await;

    let mut alice = Client::connect(replica.addr).await;
    alice.signup("alice", "hunter2").await;
    alice.expect_main_menu().await;

    let mut bob = Client::connect(replica.addr).await;
    bob.signup("bob", "hunter2").await;
    bob.expect_main_menu().await;

    alice.send("1").await;
    let contacts = alice.recv_until("CONTACT_LIST_END").await;
    assert!(contacts.iter().any(|l| l == "bob|online"));

    alice.send("bob").await;
    assert!(alice.recv().await.starts_with("CONVERSATION_START:"));
    assert_eq!(alice.recv().await, "CONVERSATION_READY");

    alice.send("hello bob").await;
    assert_eq!(alice.recv().await, "SENT:Message delivered");

    let inbound = bob.recv().await;
    assert_eq!(inbound, "MESSAGE:alice:hello bob");
}

#[tokio::test]
async fn private_message_delivers_live_across_two_replicas() {
    let (persistence, coordinator) = shared_store();
    let replica_a = spawn_replica("replica-a", persistence.clone(), coordinator.clone()).await;
    let replica_b = spawn_replica("replica-b", persistence, coordinator).await;

    let mut alice = Client::connect(replica_a.addr).await;
    alice.signup("alice", "hunter2").await;
    alice.expect_main_menu().await;

    let mut bob = Client::connect(replica_b.addr).await;
    bob.signup("bob", "hunter2").await;
    bob.expect_main_menu().await;

    alice.send("1").await;
    alice.recv_until("CONTACT_LIST_END").await;
    alice.send("bob").await;
    alice.recv().await;
    assert_eq!(alice.recv().await, "CONVERSATION_READY");

    alice.send("cross replica hello").await;
    assert_eq!(alice.recv().await, "SENT:Message delivered");

    let inbound = bob.recv().await;
    assert_eq!(inbound, "MESSAGE:alice:cross replica hello");
}

#[tokio::test]
async fn offline_recipient_falls_back_to_history_on_next_login() {
    let (persistence, coordinator) = shared_store();
    let replica = spawn_replica("r1", persistence, coordinator).await;

    let mut alice = Client::connect(replica.addr).await;
    alice.signup("alice", "hunter2").await;
    alice.expect_main_menu().await;

    // bob signs up once so he exists as a contact, then disconnects.
    {
        let mut bob = Client::connect(replica.addr).await;
        bob.signup("bob", "hunter2").await;
        bob.expect_main_menu().await;
        bob.send("bye").await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice.send("1").await;
    let contacts = alice.recv_until("CONTACT_LIST_END").await;
    assert!(contacts.iter().any(|l| l == "bob|offline"));

    alice.send("bob").await;
    alice.recv().await;
    assert_eq!(alice.recv().await, "CONVERSATION_READY");
    alice.send("are you there?").await;
    assert_eq!(alice.recv().await, "SENT:Message saved (recipient offline)");
    alice.send("back").await;
    alice.expect_main_menu().await;
    alice.send("bye").await;

    let mut bob = Client::connect(replica.addr).await;
    bob.login("bob", "hunter2").await;
    bob.expect_main_menu().await;

    bob.send("1").await;
    bob.recv_until("CONTACT_LIST_END").await;
    bob.send("alice").await;
    bob.recv().await;
    let history: Vec<String> = {
        let mut lines = Vec::new();
        loop {
            let line = bob.recv().await;
            if line == "CONVERSATION_READY" {
                break;
            }
            lines.push(line);
        }
        lines
    };
    assert!(history.iter().any(|l| l == "alice: are you there?"));
}

#[tokio::test]
async fn group_message_reaches_every_other_member_exactly_once_and_never_echoes_to_sender() {
    let (persistence, coordinator) = shared_store();
    let replica = spawn_replica("r1", persistence, coordinator).await;

    let mut alice = Client::connect(replica.addr).await;
    alice.signup("alice", "hunter2").await;
    alice.expect_main_menu().await;

    let mut bob = Client::connect(replica.addr).await;
    bob.signup("bob", "hunter2").await;
    bob.expect_main_menu().await;

    let mut carol = Client::connect(replica.addr).await;
    carol.signup("carol", "hunter2").await;
    carol.expect_main_menu().await;

    // alice creates the group and lands straight in its chat room.
    alice.send("5").await;
    assert_eq!(alice.recv().await, "CREATE_GROUP_PROMPT");
    alice.send("book-club").await;
    let created = alice.recv().await;
    assert!(created.starts_with("CREATE_SUCCESS:"));
    let group_id: i64 = created.rsplit('|').next().unwrap().parse().unwrap();
    assert_eq!(alice.recv().await, format!("GROUP_CHAT_START:book-club:{group_id}"));
    assert_eq!(alice.recv().await, "Group 'book-club' created by alice");
    assert_eq!(alice.recv().await, "GROUP_CHAT_READY");

    // bob and carol each discover and join it through Browse Groups.
    for member in [&mut bob, &mut carol] {
        member.send("4").await;
        let listing = member.recv_until("BROWSE_GROUPS_END").await;
        assert!(listing.iter().any(|l| l.starts_with(&format!("{group_id}|book-club|"))));
        member.send(&group_id.to_string()).await;
        assert_eq!(member.recv().await, "JOIN_SUCCESS:Joined group");
        member.recv_until("GROUP_CHAT_READY").await;
    }

    alice.send("hi everyone").await;
    assert_eq!(alice.recv().await, "GROUP_SENT:Message sent to group");

    let bob_line = bob.recv().await;
    let carol_line = carol.recv().await;
    assert_eq!(bob_line, "GROUP_MESSAGE:book-club:alice:hi everyone");
    assert_eq!(carol_line, "GROUP_MESSAGE:book-club:alice:hi everyone");

    // alice's own connection never sees her message echoed back to her.
    alice.send("/members").await;
    let members = alice.recv_until("GROUP_MEMBERS_END").await;
    assert!(members.iter().all(|l| l != "GROUP_MESSAGE:book-club:alice:hi everyone"));
    assert!(members.contains(&"alice|admin".to_string()));
    assert!(members.contains(&"bob|member".to_string()));
    assert!(members.contains(&"carol|member".to_string()));
}
