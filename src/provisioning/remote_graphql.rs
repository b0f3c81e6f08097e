use async_trait::async_trait;
use reqwest::Client;
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

/// Remote-orchestrator backend speaking the platform's GraphQL control API.
/// The deployment handle stored on the bot record is the orchestrator's
/// service id.
pub struct GraphqlBackend {
    client: Client,
    api_url: String,
    token: String,
    project_id: Option<String>,
    template_repo: String,
    template_dir: String,
    callback_base: String,
    telegram: Arc<TelegramClient>,
}

impl GraphqlBackend {
    pub fn new(config: &ServerConfig, telegram: Arc<TelegramClient>) -> Self {
        Self {
            client: Client::new(),
            api_url: config.orchestrator_url.clone(),
            token: config.orchestrator_token.clone().unwrap_or_default(),
            project_id: config.orchestrator_project.clone(),
            template_repo: config.worker_template.clone(),
            template_dir: config.worker_template_dir.clone(),
            callback_base: config.public_base_url.clone(),
            telegram,
        }
    }

    async fn gql(&self, query: &str, variables: Value) -> Result<Value, ProvisionError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ClientError::ApiError { status, body }.into());
        }

        let body: Value = response.json().await.map_err(ClientError::from)?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ProvisionError::Failed(message));
            }
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn create_service(&self, spec: &ProvisionSpec) -> Result<String, ProvisionError> {
        let query = r#"
            mutation ServiceCreate($input: ServiceCreateInput!) {
                serviceCreate(input: $input) { id }
            }"#;
        let data = self
            .gql(
                query,
                json!({
                    "input": {
                        "projectId": self.project_id,
                        "name": service_name(&spec.name, spec.bot_id),
                        "source": {
                            "repo": self.template_repo,
                            "rootDirectory": self.template_dir,
                        },
                    }
                }),
            )
            .await?;

        data.pointer("/serviceCreate/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::Failed("serviceCreate returned no id".to_string()))
    }

    async fn upsert_variables(
        &self,
        service_id: &str,
        spec: &ProvisionSpec,
    ) -> Result<(), ProvisionError> {
        let query = r#"
            mutation VariableUpsert($input: VariableUpsertInput!) {
                variableUpsert(input: $input)
            }"#;
        for (name, value) in worker_env(spec, &self.callback_base) {
            self.gql(
                query,
                json!({
                    "input": {
                        "projectId": self.project_id,
                        "serviceId": service_id,
                        "name": name,
                        "value": value,
                    }
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn trigger_deploy(&self, service_id: &str) -> Result<(), ProvisionError> {
        let query = r#"
            mutation ServiceInstanceDeploy($serviceId: String!) {
                serviceInstanceDeploy(serviceId: $serviceId)
            }"#;
        self.gql(query, json!({ "serviceId": service_id })).await?;
        Ok(())
    }

    /// Latest deployment of a service: (status, public url if assigned).
    async fn latest_deployment(
        &self,
        service_id: &str,
    ) -> Result<(String, Option<String>), ProvisionError> {
        let query = r#"
            query LatestDeployment($serviceId: String!) {
                service(id: $serviceId) {
                    deployments(first: 1) {
                        edges { node { status staticUrl } }
                    }
                }
            }"#;
        let data = self.gql(query, json!({ "serviceId": service_id })).await?;
        let node = data
            .pointer("/service/deployments/edges/0/node")
            .cloned()
            .ok_or_else(|| ProvisionError::Failed("service has no deployments".to_string()))?;

        let status = node
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let url = node
            .get("staticUrl")
            .and_then(Value::as_str)
            .map(|u| format!("https://{u}"));
        Ok((status, url))
    }

    async fn delete_service(&self, service_id: &str) -> Result<(), ProvisionError> {
        let query = r#"
            mutation ServiceDelete($id: String!) {
                serviceDelete(id: $id)
            }"#;
        self.gql(query, json!({ "id": service_id })).await?;
        Ok(())
    }

    /// Bounded readiness loop. Success only on a terminal success signal;
    /// terminal failure and bound exhaustion both surface as errors so the
    /// record lands in `error`, never an indefinite `deploying`.
    async fn wait_ready(&self, service_id: &str) -> Result<Option<String>, ProvisionError> {
        for attempt in 1..=POLL_ATTEMPTS {
            match self.latest_deployment(service_id).await {
                Ok((status, url)) => match status.as_str() {
                    "SUCCESS" => return Ok(url),
                    "FAILED" | "CRASHED" | "REMOVED" => {
                        return Err(ProvisionError::Failed(format!(
                            "deployment ended in terminal state {status}"
                        )))
                    }
                    _ => {}
                },
                Err(ProvisionError::Unavailable(e)) => {
                    // Transient control-plane trouble; keep polling.
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
        self.upsert_variables(&service_id, spec).await?;
        self.trigger_deploy(&service_id).await?;
        let endpoint = self.wait_ready(&service_id).await?;

        let webhook_url = endpoint.as_ref().map(|e| format!("{e}/webhook"));
        if let Some(url) = &webhook_url {
            self.telegram.set_webhook(&spec.platform_token, url).await?;
        }

        info!(bot_id = spec.bot_id, service_id, "worker deployed via graphql orchestrator");
        Ok(DeploymentResult {
            deployment_id: service_id,
            endpoint_url: endpoint,
            webhook_url,
            manual: false,
        })
    }
}

#[async_trait]
impl ProvisioningBackend for GraphqlBackend {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        let service_id = self.create_service(spec).await?;
        self.deploy_and_register(service_id, spec).await
    }

    async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        // An existing handle means the service survived a stop; redeploy it
        // rather than creating a duplicate resource.
        match &spec.deployment_id {
            Some(service_id) => self.deploy_and_register(service_id.clone(), spec).await,
            None => self.provision(spec).await,
        }
    }

    async fn stop(&self, spec: &ProvisionSpec) -> Result<(), ProvisionError> {
        // The platform offers no pause primitive; stopping is advisory. The
        // webhook goes away so traffic stops, the service stays for a cheap
        // restart.
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
        self.delete_service(deployment_id).await
    }

    async fn status(&self, spec: &ProvisionSpec) -> RuntimeStatus {
        let Some(service_id) = &spec.deployment_id else {
            return RuntimeStatus::last_known(spec.last_known_status, "bot has no deployment");
        };
        match self.latest_deployment(service_id).await {
            Ok((status, _)) => {
                let state = match status.as_str() {
                    "SUCCESS" => RuntimeState::Running,
                    "BUILDING" | "DEPLOYING" | "QUEUED" | "INITIALIZING" => RuntimeState::Deploying,
                    "REMOVED" | "SLEEPING" => RuntimeState::Stopped,
                    _ => RuntimeState::Error,
                };
                RuntimeStatus {
                    state,
                    detail: Some(status),
                    memory_mb: None,
                    cpu_percent: None,
                }
            }
            Err(e) => {
                warn!(bot_id = spec.bot_id, error = %e, "orchestrator unreachable, reporting last known status");
                RuntimeStatus::last_known(spec.last_known_status, "orchestrator unreachable")
            }
        }
    }
}
