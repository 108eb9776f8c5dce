use chatfabric::domain_port::{CoordinatorGateway, PersistenceGateway, TxManager};
use chatfabric::group_chat::GroupChatService;
use chatfabric::infra_mysql::{MySqlPersistenceGateway, MySqlTxManager};
use chatfabric::infra_redis::RedisCoordinatorGateway;
use chatfabric::logger::*;
use chatfabric::replica::ReplicaFabric;
use chatfabric::session::{SessionDeps, run_connection, shutdown_grace};
use chatfabric::settings::*;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let replica_id = project_settings
        .server
        .replica_id
        .clone()
        .unwrap_or_else(|| std::process::id().to_string());

    let pool = MySqlPoolOptions::new()
        .min_connections(1)
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&project_settings.db.url())
        .await?;

    let tx_manager: Arc<dyn TxManager> = Arc::new(MySqlTxManager::new(pool.clone()));
    let persistence: Arc<dyn PersistenceGateway> = Arc::new(MySqlPersistenceGateway::new(pool, tx_manager));

    let coordinator: Arc<dyn CoordinatorGateway> = Arc::new(
        RedisCoordinatorGateway::new(
            &project_settings.redis.url(),
            project_settings.coordinator.presence_ttl_secs,
            project_settings.coordinator.token_ttl_secs,
        )
        .await?,
    );

    let fabric = ReplicaFabric::spawn(replica_id.clone(), coordinator.clone())?;
    let group_chat = GroupChatService::spawn(persistence.clone(), coordinator.clone(), fabric.clone());

    let deps = Arc::new(SessionDeps {
        persistence,
        coordinator,
        fabric: fabric.clone(),
        group_chat,
        replica_id,
    });

    let listener = TcpListener::bind(&project_settings.server.bind_address).await?;
    tracing::info!(address = %project_settings.server.bind_address, "accepting connections");

    let mut conn_id: u64 = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                conn_id += 1;
                let id = conn_id;
                let conn_deps = deps.clone();
                tracing::info!(conn_id = id, peer = %peer, "accepted connection");
                tokio::spawn(async move {
                    run_connection(socket, conn_deps, id).await;
                });
            }
            _ = signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    fabric.shutdown(shutdown_grace().await).await;
    tracing::info!("shutdown complete");

    Ok(())
}
