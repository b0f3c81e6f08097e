use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use super::{
    service_name, worker_env, DeploymentResult, ProvisionError, ProvisionSpec,
    ProvisioningBackend, RuntimeState, RuntimeStatus, POLL_ATTEMPTS, POLL_INTERVAL_SECONDS,
};
use crate::clients::telegram::TelegramClient;
use crate::clients::ClientError;
use crate::server::config::ServerConfig;

/// Remote-orchestrator backend speaking the platform's REST control API.
/// Functionally equivalent to the GraphQL flavor; the platform grew both
/// surfaces over time and they diverge in shape, not semantics.
pub struct RestBackend {
    client: Client,
    api_url: String,
    token: String,
    project_id: Option<String>,
    template_repo: String,
    template_dir: String,
    callback_base: String,
    telegram: Arc<TelegramClient>,
}

#[derive(Deserialize)]
struct ServiceResponse {
    id: String,
}

#[derive(Deserialize)]
struct DeploymentResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    memory_mb: Option<f64>,
    #[serde(default)]
    cpu_percent: Option<f64>,
}

impl RestBackend {
    pub fn new(config: &ServerConfig, telegram: Arc<TelegramClient>) -> Self {
        Self {
            client: Client::new(),
            api_url: config.orchestrator_url.trim_end_matches('/').to_string(),
            token: config.orchestrator_token.clone().unwrap_or_default(),
            project_id: config.orchestrator_project.clone(),
            template_repo: config.worker_template.clone(),
            template_dir: config.worker_template_dir.clone(),
            callback_base: config.public_base_url.clone(),
            telegram,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ProvisionError> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(ClientError::from)?;
        let status = response.status();
        if status.is_client_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ProvisionError::Failed(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ClientError::ApiError { status, body }.into());
        }
        response.json().await.map_err(|e| ClientError::from(e).into())
    }

    async fn create_service(&self, spec: &ProvisionSpec) -> Result<String, ProvisionError> {
        let service: ServiceResponse = self
            .call(
                Method::POST,
                "/services",
                Some(json!({
                    "projectId": self.project_id,
                    "name": service_name(&spec.name, spec.bot_id),
                    "source": {
                        "repo": self.template_repo,
                        "rootDirectory": self.template_dir,
                    },
                })),
            )
            .await?;
        Ok(service.id)
    }

    async fn put_variables(
        &self,
        service_id: &str,
        spec: &ProvisionSpec,
    ) -> Result<(), ProvisionError> {
        let variables: serde_json::Map<String, Value> = worker_env(spec, &self.callback_base)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let _: Value = self
            .call(
                Method::PUT,
                &format!("/services/{service_id}/variables"),
                Some(Value::Object(variables)),
            )
            .await?;
        Ok(())
    }

    async fn trigger_deploy(&self, service_id: &str) -> Result<(), ProvisionError> {
        let _: Value = self
            .call(
                Method::POST,
                &format!("/services/{service_id}/deployments"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn latest_deployment(
        &self,
        service_id: &str,
    ) -> Result<DeploymentResponse, ProvisionError> {
        self.call(
            Method::GET,
            &format!("/services/{service_id}/deployments/latest"),
            None,
        )
        .await
    }

    async fn wait_ready(&self, service_id: &str) -> Result<Option<String>, ProvisionError> {
        for attempt in 1..=POLL_ATTEMPTS {
            match self.latest_deployment(service_id).await {
                Ok(deployment) => match deployment.status.as_str() {
                    "SUCCESS" => return Ok(deployment.url),
                    "FAILED" | "CRASHED" | "REMOVED" => {
                        return Err(ProvisionError::Failed(format!(
                            "deployment ended in terminal state {}",
                            deployment.status
                        )))
                    }
                    _ => {}
                },
                Err(ProvisionError::Unavailable(e)) => {
                    warn!(service_id, attempt, error = %e, "deployment status check failed");
                }
                Err(e) => return Err(e),
            }
            sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)).await;
        }
        Err(ProvisionError::Timeout {
            attempts: POLL_ATTEMPTS,
        })
    }

    async fn deploy_and_register(
        &self,
        service_id: String,
        spec: &ProvisionSpec,
    ) -> Result<DeploymentResult, ProvisionError> {
        self.put_variables(&service_id, spec).await?;
        self.trigger_deploy(&service_id).await?;
        let endpoint = self.wait_ready(&service_id).await?;

        let webhook_url = endpoint.as_ref().map(|e| format!("{e}/webhook"));
        if let Some(url) = &webhook_url {
            self.telegram.set_webhook(&spec.platform_token, url).await?;
        }

        info!(bot_id = spec.bot_id, service_id, "worker deployed via rest orchestrator");
        Ok(DeploymentResult {
            deployment_id: service_id,
            endpoint_url: endpoint,
            webhook_url,
            manual: false,
        })
    }
}

#[async_trait]
impl ProvisioningBackend for RestBackend {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        let service_id = self.create_service(spec).await?;
        self.deploy_and_register(service_id, spec).await
    }

    async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        match &spec.deployment_id {
            Some(service_id) => self.deploy_and_register(service_id.clone(), spec).await,
            None => self.provision(spec).await,
        }
    }

    async fn stop(&self, spec: &ProvisionSpec) -> Result<(), ProvisionError> {
        self.telegram.delete_webhook(&spec.platform_token).await?;
        Ok(())
    }

    async fn restart(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        let service_id = spec.deployment_id.clone().ok_or_else(|| {
            ProvisionError::Failed("cannot restart a bot that was never deployed".to_string())
        })?;
        self.deploy_and_register(service_id, spec).await
    }

    async fn teardown(&self, deployment_id: &str) -> Result<(), ProvisionError> {
        let _: Value = self
            .call(Method::DELETE, &format!("/services/{deployment_id}"), None)
            .await?;
        Ok(())
    }

    async fn status(&self, spec: &ProvisionSpec) -> RuntimeStatus {
        let Some(service_id) = &spec.deployment_id else {
            return RuntimeStatus::last_known(spec.last_known_status, "bot has no deployment");
        };
        match self.latest_deployment(service_id).await {
            Ok(deployment) => {
                let state = match deployment.status.as_str() {
                    "SUCCESS" => RuntimeState::Running,
                    "BUILDING" | "DEPLOYING" | "QUEUED" | "INITIALIZING" => RuntimeState::Deploying,
                    "REMOVED" | "SLEEPING" => RuntimeState::Stopped,
                    _ => RuntimeState::Error,
                };
                RuntimeStatus {
                    state,
                    detail: Some(deployment.status),
                    memory_mb: deployment.memory_mb,
                    cpu_percent: deployment.cpu_percent,
                }
            }
            Err(e) => {
                warn!(bot_id = spec.bot_id, error = %e, "orchestrator unreachable, reporting last known status");
                RuntimeStatus::last_known(spec.last_known_status, "orchestrator unreachable")
            }
        }
    }
}
