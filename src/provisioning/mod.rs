use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::clients::ai::AiClient;
use crate::clients::telegram::TelegramClient;
use crate::clients::ClientError;
use crate::db::enums::{AiProvider, BotStatus};
use crate::server::config::ServerConfig;
use crate::server::registry::BotRegistry;

pub mod local_runner;
pub mod manual;
pub mod remote_graphql;
pub mod remote_rest;

/// Deployment-readiness polling bounds shared by the remote flavors.
pub const POLL_ATTEMPTS: u32 = 30;
pub const POLL_INTERVAL_SECONDS: u64 = 5;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioning failed: {0}")]
    Failed(String),
    #[error("Deployment not ready after {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error("External service unavailable: {0}")]
    Unavailable(#[from] ClientError),
}

/// Decrypted, ready-to-deploy view of a bot. Built only by the record
/// store's privileged credential path; never serialized.
#[derive(Clone)]
pub struct ProvisionSpec {
    pub bot_id: i32,
    pub name: String,
    pub platform_token: String,
    pub ai_provider: AiProvider,
    pub ai_token: String,
    pub ai_model: String,
    pub system_prompt: String,
    pub deployment_id: Option<String>,
    pub last_known_status: BotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub deployment_id: String,
    pub endpoint_url: Option<String>,
    pub webhook_url: Option<String>,
    /// True only for the no-op backend: the operation succeeded locally but
    /// nothing was deployed, and a human must act.
    pub manual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Deploying,
    Running,
    Stopped,
    Error,
    Sleeping,
    /// No-op backend: deployment is the operator's responsibility. Must not
    /// be read as a real running state.
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub state: RuntimeState,
    pub detail: Option<String>,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

impl RuntimeStatus {
    pub fn bare(state: RuntimeState) -> Self {
        Self {
            state,
            detail: None,
            memory_mb: None,
            cpu_percent: None,
        }
    }

    /// Degraded answer when the backing API cannot be reached: echo the last
    /// status the record store persisted.
    pub fn last_known(status: BotStatus, detail: impl Into<String>) -> Self {
        Self {
            state: RuntimeState::from(status),
            detail: Some(detail.into()),
            memory_mb: None,
            cpu_percent: None,
        }
    }
}

impl From<BotStatus> for RuntimeState {
    fn from(status: BotStatus) -> Self {
        match status {
            BotStatus::Deploying => RuntimeState::Deploying,
            BotStatus::Running => RuntimeState::Running,
            BotStatus::Stopped => RuntimeState::Stopped,
            BotStatus::Error => RuntimeState::Error,
            BotStatus::Sleeping => RuntimeState::Sleeping,
        }
    }
}

/// The lifecycle contract every deployment variant implements. Exactly one
/// variant is active per process, selected from config at startup; callers
/// only see this trait.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Creates the runtime for a bot that has never been deployed.
    async fn provision(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError>;

    /// Brings a stopped or failed bot back up. When `spec` carries an
    /// existing deployment handle this must reuse it, never create a second
    /// resource.
    async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError>;

    async fn stop(&self, spec: &ProvisionSpec) -> Result<(), ProvisionError>;

    async fn restart(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError>;

    /// Destroys the external resource. Callers treat failure as advisory;
    /// record removal proceeds regardless.
    async fn teardown(&self, deployment_id: &str) -> Result<(), ProvisionError>;

    /// Never fails: transport trouble degrades to the last-known status
    /// carried in `spec` instead of propagating.
    async fn status(&self, spec: &ProvisionSpec) -> RuntimeStatus;
}

/// Deterministic, collision-resistant service name for a bot. The id suffix
/// keeps two bots with the same display name apart.
pub fn service_name(name: &str, bot_id: i32) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug: String = slug.chars().take(32).collect();
    if slug.is_empty() {
        format!("bot-{bot_id}")
    } else {
        format!("bot-{slug}-{bot_id}")
    }
}

/// Environment the remote worker template expects.
pub fn worker_env(spec: &ProvisionSpec, callback_base: &str) -> Vec<(String, String)> {
    vec![
        ("BOT_TOKEN".to_string(), spec.platform_token.clone()),
        ("AI_TOKEN".to_string(), spec.ai_token.clone()),
        ("AI_PROVIDER".to_string(), format!("{:?}", spec.ai_provider).to_lowercase()),
        ("AI_MODEL".to_string(), spec.ai_model.clone()),
        ("BOT_ID".to_string(), spec.bot_id.to_string()),
        ("SYSTEM_PROMPT".to_string(), spec.system_prompt.clone()),
        ("CALLBACK_URL".to_string(), callback_base.to_string()),
    ]
}

pub struct BackendContext {
    pub registry: Arc<BotRegistry>,
    pub telegram: Arc<TelegramClient>,
    pub ai: Arc<AiClient>,
}

/// Picks the one active backend for this process. A missing orchestrator
/// token always forces the manual backend, whatever the config asks for.
/// The concrete runner is also handed back when the in-process flavor is
/// chosen, because the dispatch router forwards updates through it directly.
pub fn backend_from_config(
    config: &ServerConfig,
    ctx: &BackendContext,
) -> (
    Arc<dyn ProvisioningBackend>,
    Option<Arc<local_runner::LocalRunner>>,
) {
    let flavor = config.provisioner.as_str();
    match flavor {
        "graphql" | "rest" if config.orchestrator_token.is_none() => {
            info!("no orchestrator token configured, falling back to manual backend");
            (Arc::new(manual::ManualBackend::new()), None)
        }
        "graphql" => (
            Arc::new(remote_graphql::GraphqlBackend::new(
                config,
                ctx.telegram.clone(),
            )),
            None,
        ),
        "rest" => (
            Arc::new(remote_rest::RestBackend::new(config, ctx.telegram.clone())),
            None,
        ),
        "local" => {
            let runner = Arc::new(local_runner::LocalRunner::new(
                ctx.registry.clone(),
                ctx.telegram.clone(),
                ctx.ai.clone(),
                config.public_base_url.clone(),
            ));
            (runner.clone(), Some(runner))
        }
        other => {
            if other != "manual" {
                info!(provisioner = other, "unknown provisioner, using manual backend");
            }
            (Arc::new(manual::ManualBackend::new()), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_are_deterministic_and_unique_per_id() {
        assert_eq!(service_name("My Bot!", 7), "bot-my-bot-7");
        assert_eq!(service_name("My Bot!", 7), service_name("My Bot!", 7));
        assert_ne!(service_name("same", 1), service_name("same", 2));
    }

    #[test]
    fn empty_name_still_yields_a_name() {
        assert_eq!(service_name("!!!", 3), "bot-3");
    }

    #[test]
    fn worker_env_carries_identity_and_secrets() {
        let spec = ProvisionSpec {
            bot_id: 9,
            name: "b".to_string(),
            platform_token: "tg".to_string(),
            ai_provider: AiProvider::Anthropic,
            ai_token: "ai".to_string(),
            ai_model: "claude".to_string(),
            system_prompt: "sp".to_string(),
            deployment_id: None,
            last_known_status: BotStatus::Deploying,
        };
        let env = worker_env(&spec, "https://example.com");
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("BOT_ID"), Some("9"));
        assert_eq!(get("AI_PROVIDER"), Some("anthropic"));
        assert_eq!(get("CALLBACK_URL"), Some("https://example.com"));
    }
}
