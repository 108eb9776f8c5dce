use super::DeploymentScaler;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

const SA_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// `DeploymentScaler` backed by the in-cluster Kubernetes API server, talked
/// to directly over the `apps/v1` `scale` subresource rather than pulling in
/// the full `kube` client crate — the controller only ever needs two calls
/// (read replicas, patch replicas), so a thin `reqwest` wrapper over the
/// REST surface is the whole integration (SPEC_FULL §4.6/§10; container
/// orchestration itself stays an external collaborator per §1).
pub struct KubernetesScaler {
    client: reqwest::Client,
    api_server: String,
    namespace: String,
    deployment_name: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ScaleResource {
    spec: ScaleSpec,
}

#[derive(Debug, Deserialize)]
struct ScaleSpec {
    replicas: u32,
}

#[derive(Debug, Serialize)]
struct ScalePatch {
    spec: ScalePatchSpec,
}

#[derive(Debug, Serialize)]
struct ScalePatchSpec {
    replicas: u32,
}

impl KubernetesScaler {
    /// Reads the service-account token and CA bundle every container gets
    /// mounted automatically, and the API server address from the
    /// `KUBERNETES_SERVICE_{HOST,PORT}` env vars the cluster injects.
    pub fn from_in_cluster_config(namespace: String, deployment_name: String) -> Result<Self> {
        let token = fs::read_to_string(format!("{SA_DIR}/token"))
            .context("reading service account token")?
            .trim()
            .to_string();
        let ca_pem =
            fs::read(format!("{SA_DIR}/ca.crt")).context("reading service account CA bundle")?;
        let ca_cert = reqwest::Certificate::from_pem(&ca_pem).context("parsing CA bundle")?;

        let host = std::env::var("KUBERNETES_SERVICE_HOST").context("KUBERNETES_SERVICE_HOST not set")?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let client = reqwest::Client::builder()
            .add_root_certificate(ca_cert)
            .build()
            .context("building kubernetes API client")?;

        Ok(Self {
            client,
            api_server: format!("https://{host}:{port}"),
            namespace,
            deployment_name,
            token,
        })
    }

    fn scale_url(&self) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}/scale",
            self.api_server, self.namespace, self.deployment_name
        )
    }
}

#[async_trait::async_trait]
impl DeploymentScaler for KubernetesScaler {
    async fn read_replicas(&self) -> Result<u32> {
        let resp = self
            .client
            .get(self.scale_url())
            .bearer_auth(&self.token)
            .send()
            .await
            .context("reading deployment scale")?
            .error_for_status()
            .context("deployment scale read returned an error status")?;

        let scale: ScaleResource = resp.json().await.context("decoding scale response")?;
        Ok(scale.spec.replicas)
    }

    async fn patch_replicas(&self, replicas: u32) -> Result<()> {
        let patch = ScalePatch {
            spec: ScalePatchSpec { replicas },
        };

        self.client
            .patch(self.scale_url())
            .bearer_auth(&self.token)
            .header("Content-Type", "application/merge-patch+json")
            .json(&patch)
            .send()
            .await
            .context("patching deployment scale")?
            .error_for_status()
            .context("deployment scale patch returned an error status")?;

        Ok(())
    }
}
