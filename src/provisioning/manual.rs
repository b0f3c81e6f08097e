use async_trait::async_trait;
use tracing::info;

use super::{
    DeploymentResult, ProvisionError, ProvisionSpec, ProvisioningBackend, RuntimeState,
    RuntimeStatus,
};

/// Backend used when no orchestration credential is configured. Records
/// intent only: every operation succeeds locally, nothing external happens,
/// and every status answer is tagged manual so nothing downstream confuses
/// it with a deployed worker.
#[derive(Default)]
pub struct ManualBackend;

impl ManualBackend {
    pub fn new() -> Self {
        Self
    }

    fn result(spec: &ProvisionSpec) -> DeploymentResult {
        DeploymentResult {
            deployment_id: format!("manual-{}", spec.bot_id),
            endpoint_url: None,
            webhook_url: None,
            manual: true,
        }
    }
}

#[async_trait]
impl ProvisioningBackend for ManualBackend {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        info!(bot_id = spec.bot_id, "manual backend: deployment left to the operator");
        Ok(Self::result(spec))
    }

    async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        info!(bot_id = spec.bot_id, "manual backend: start recorded, no action taken");
        Ok(Self::result(spec))
    }

    async fn stop(&self, spec: &ProvisionSpec) -> Result<(), ProvisionError> {
        info!(bot_id = spec.bot_id, "manual backend: stop recorded, no action taken");
        Ok(())
    }

    async fn restart(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        info!(bot_id = spec.bot_id, "manual backend: restart recorded, no action taken");
        Ok(Self::result(spec))
    }

    async fn teardown(&self, deployment_id: &str) -> Result<(), ProvisionError> {
        info!(deployment_id, "manual backend: teardown recorded, no action taken");
        Ok(())
    }

    async fn status(&self, _spec: &ProvisionSpec) -> RuntimeStatus {
        RuntimeStatus {
            state: RuntimeState::Manual,
            detail: Some("manual deployment required".to_string()),
            memory_mb: None,
            cpu_percent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{AiProvider, BotStatus};

    fn spec() -> ProvisionSpec {
        ProvisionSpec {
            bot_id: 1,
            name: "b".to_string(),
            platform_token: "tg".to_string(),
            ai_provider: AiProvider::OpenAi,
            ai_token: "ai".to_string(),
            ai_model: "m".to_string(),
            system_prompt: "s".to_string(),
            deployment_id: None,
            last_known_status: BotStatus::Deploying,
        }
    }

    #[tokio::test]
    async fn status_is_always_tagged_manual() {
        let backend = ManualBackend::new();
        let status = backend.status(&spec()).await;
        assert_eq!(status.state, RuntimeState::Manual);
        assert_ne!(status.state, RuntimeState::Running);
    }

    #[tokio::test]
    async fn operations_succeed_without_side_effects() {
        let backend = ManualBackend::new();
        let result = backend.provision(&spec()).await.unwrap();
        assert!(result.manual);
        assert_eq!(result.deployment_id, "manual-1");
        assert!(result.endpoint_url.is_none());
        backend.stop(&spec()).await.unwrap();
        backend.teardown("manual-1").await.unwrap();
    }
}
