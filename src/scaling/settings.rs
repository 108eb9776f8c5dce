use std::env;
use std::time::Duration;

/// Environment-only configuration for the scaling controller binary
/// (SPEC_FULL §6/§10.3) — a separate process with its own deploy surface,
/// so it reads `os.getenv`-equivalent vars directly rather than through the
/// server's layered TOML config.
#[derive(Debug, Clone)]
pub struct ScalingSettings {
    pub namespace: String,
    pub deployment_name: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub users_per_pod: u32,
    pub check_interval: Duration,
    pub scale_down_delay: Duration,
}

impl ScalingSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            namespace: env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            deployment_name: env::var("DEPLOYMENT_NAME").unwrap_or_else(|_| "chat-server".to_string()),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: env::var("REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            redis_password: env::var("REDIS_PASSWORD").ok(),
            min_replicas: env_or("MIN_REPLICAS", 1),
            max_replicas: env_or("MAX_REPLICAS", 10),
            users_per_pod: env_or("USERS_PER_POD", 3),
            check_interval: Duration::from_secs(env_or("CHECK_INTERVAL", 10)),
            scale_down_delay: Duration::from_secs(env_or("SCALE_DOWN_DELAY", 60)),
        })
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(pass) => format!("redis://:{}@{}:{}", pass, self.redis_host, self.redis_port),
            None => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
