use crate::domain_port::CoordinatorGateway;
use std::sync::Arc;
use std::time::Instant;

/// Narrow boundary to the actual deployment-patching collaborator. No
/// concrete Kubernetes client ships with this core — container
/// orchestration is scoped as an external collaborator (SPEC_FULL §1/§4.6).
/// A production deployment supplies its own implementation (e.g. wrapping
/// `kube`) at the binary's composition root.
#[async_trait::async_trait]
pub trait DeploymentScaler: Send + Sync {
    async fn read_replicas(&self) -> anyhow::Result<u32>;
    async fn patch_replicas(&self, replicas: u32) -> anyhow::Result<()>;
}

/// Computes `clamp(ceil(users / usersPerPod), min, max)`, with `users == 0`
/// short-circuiting to `min`.
pub fn calculate_desired_replicas(users: u64, users_per_pod: u32, min: u32, max: u32) -> u32 {
    if users == 0 {
        return min;
    }
    let desired = (users as f64 / users_per_pod as f64).ceil() as u32;
    desired.clamp(min, max)
}

/// Debounces scale-downs keyed by the `(current, desired)` transition, per
/// `autoscaler.py`'s `last_scale_down_check` dict. Scale-ups are never
/// debounced. Any tick whose desired count changes, or that reports
/// `desired == current`, clears the armed timer.
pub struct ScalingController<S: DeploymentScaler> {
    coordinator: Arc<dyn CoordinatorGateway>,
    scaler: S,
    users_per_pod: u32,
    min_replicas: u32,
    max_replicas: u32,
    scale_down_delay: std::time::Duration,
    armed: Option<((u32, u32), Instant)>,
}

impl<S: DeploymentScaler> ScalingController<S> {
    pub fn new(
        coordinator: Arc<dyn CoordinatorGateway>,
        scaler: S,
        users_per_pod: u32,
        min_replicas: u32,
        max_replicas: u32,
        scale_down_delay: std::time::Duration,
    ) -> Self {
        Self {
            coordinator,
            scaler,
            users_per_pod,
            min_replicas,
            max_replicas,
            scale_down_delay,
            armed: None,
        }
    }

    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let users = self.coordinator.online_user_count().await?;
        let desired = calculate_desired_replicas(users, self.users_per_pod, self.min_replicas, self.max_replicas);
        let current = self.scaler.read_replicas().await?;

        tracing::info!(users, desired, current, "scaling tick");

        if desired > current {
            self.armed = None;
            self.scaler.patch_replicas(desired).await?;
            tracing::info!(from = current, to = desired, "scaled up");
            return Ok(());
        }

        if desired == current {
            self.armed = None;
            return Ok(());
        }

        // desired < current: debounce.
        let key = (current, desired);
        match self.armed {
            Some((armed_key, since)) if armed_key == key => {
                if since.elapsed() >= self.scale_down_delay {
                    self.scaler.patch_replicas(desired).await?;
                    tracing::info!(from = current, to = desired, "scaled down after debounce");
                    self.armed = None;
                }
            }
            _ => {
                self.armed = Some((key, Instant::now()));
                tracing::debug!(from = current, to = desired, "arming scale-down debounce");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_users_scales_to_minimum() {
        assert_eq!(calculate_desired_replicas(0, 3, 1, 10), 1);
    }

    #[test]
    fn rounds_up_and_clamps() {
        assert_eq!(calculate_desired_replicas(7, 3, 1, 10), 3);
        assert_eq!(calculate_desired_replicas(100, 3, 1, 10), 10);
        assert_eq!(calculate_desired_replicas(1, 3, 2, 10), 2);
    }
}
