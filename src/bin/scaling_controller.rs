//! Separate process per SPEC_FULL §4.6: polls `online_users` cardinality in
//! the Coordinator and patches the chat-server Deployment's replica count,
//! with hysteresis on scale-down. Configuration is environment-only (§6),
//! matching the source's `os.getenv(...)` surface one-for-one.

use chatfabric::domain_port::CoordinatorGateway;
use chatfabric::infra_redis::RedisCoordinatorGateway;
use chatfabric::scaling::{KubernetesScaler, ScalingController, ScalingSettings};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let settings = ScalingSettings::from_env()?;
    tracing::info!(
        namespace = %settings.namespace,
        deployment = %settings.deployment_name,
        min = settings.min_replicas,
        max = settings.max_replicas,
        users_per_pod = settings.users_per_pod,
        check_interval_secs = settings.check_interval.as_secs(),
        scale_down_delay_secs = settings.scale_down_delay.as_secs(),
        "starting scaling controller"
    );

    let coordinator: Arc<dyn CoordinatorGateway> = Arc::new(
        RedisCoordinatorGateway::new(&settings.redis_url(), 1800, 3600).await?,
    );

    let scaler = KubernetesScaler::from_in_cluster_config(
        settings.namespace.clone(),
        settings.deployment_name.clone(),
    )?;

    let mut controller = ScalingController::new(
        coordinator,
        scaler,
        settings.users_per_pod,
        settings.min_replicas,
        settings.max_replicas,
        settings.scale_down_delay,
    );

    let mut ticker = tokio::time::interval(settings.check_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = controller.tick().await {
            // transient: logged, retried next tick, never crashes the process (§7).
            tracing::error!(error = %e, "scaling controller tick failed");
        }
    }
}
