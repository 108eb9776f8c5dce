use chatfabric::domain_port::CoordinatorGateway;
use chatfabric::group_chat::GroupChatService;
use chatfabric::replica::ReplicaFabric;
use chatfabric::session::{SessionDeps, run_connection};
use chatfabric::testutil::{InMemoryCoordinatorGateway, InMemoryPersistenceGateway};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One simulated replica: its own `ReplicaFabric`/`GroupChatService`/TCP
/// listener, sharing a persistence store and coordinator with any sibling
/// replicas the way real processes share one MySQL database and one Redis
/// instance (spec §8's cross-replica scenarios).
pub struct Replica {
    pub addr: std::net::SocketAddr,
}

pub async fn spawn_replica(
    replica_id: &str,
    persistence: Arc<InMemoryPersistenceGateway>,
    coordinator: Arc<InMemoryCoordinatorGateway>,
) -> Replica {
    let coordinator: Arc<dyn CoordinatorGateway> = coordinator;
    let fabric = ReplicaFabric::spawn(replica_id.to_string(), coordinator.clone()).unwrap();
    let group_chat = GroupChatService::spawn(persistence.clone(), coordinator.clone(), fabric.clone());

    let deps = Arc::new(SessionDeps {
        persistence,
        coordinator,
        fabric,
        group_chat,
        replica_id: replica_id.to_string(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut conn_id: u64 = 0;
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            conn_id += 1;
            let id = conn_id;
            let conn_deps = deps.clone();
            tokio::spawn(async move {
                run_connection(socket, conn_deps, id).await;
            });
        }
    });

    Replica { addr }
}

/// A line-oriented client, mirroring what a human terminal / test client
/// drives over the wire protocol: write one command, read back lines.
pub struct Client {
    write: tokio::net::tcp::OwnedWriteHalf,
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
}

impl Client {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Client {
            write,
            lines: BufReader::new(read).lines(),
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
        self.write.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> String {
        self.lines
            .next_line()
            .await
            .unwrap()
            .expect("connection closed while a reply was expected")
    }

    /// Reads and discards lines up to and including one equal to `marker`.
    pub async fn recv_until(&mut self, marker: &str) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let line = self.recv().await;
            if line == marker {
                return out;
            }
            out.push(line);
        }
    }

    /// Signs a fresh user up and drives past the two confirmation lines,
    /// returning the resume token.
    pub async fn signup(&mut self, username: &str, password: &str) -> String {
        assert_eq!(self.recv().await, "AUTH_REQUEST");
        self.send("SIGNUP").await;
        assert_eq!(self.recv().await, "SIGNUP_PROMPT");
        self.send(username).await;
        self.send(password).await;
        let success = self.recv().await;
        assert!(success.starts_with("AUTH_SUCCESS:"), "got {success}");
        let token_line = self.recv().await;
        token_line
            .strip_prefix("SESSION_TOKEN:")
            .expect("expected SESSION_TOKEN line")
            .to_string()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> String {
        assert_eq!(self.recv().await, "AUTH_REQUEST");
        self.send("LOGIN").await;
        assert_eq!(self.recv().await, "LOGIN_PROMPT");
        self.send(username).await;
        self.send(password).await;
        let success = self.recv().await;
        assert!(success.starts_with("AUTH_SUCCESS:"), "got {success}");
        let token_line = self.recv().await;
        token_line
            .strip_prefix("SESSION_TOKEN:")
            .expect("expected SESSION_TOKEN line")
            .to_string()
    }

    /// Consumes the main menu banner printed right after auth / after
    /// returning from any submenu.
    pub async fn expect_main_menu(&mut self) {
        let lines = self.recv_until("MAIN_MENU_END").await;
        assert_eq!(lines.first().map(String::as_str), Some("MAIN_MENU_START"));
    }
}
