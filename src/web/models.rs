use serde::{Deserialize, Serialize};

use crate::db::entities::bot;
use crate::db::enums::{AiProvider, BotStatus, PlanTier, PlatformKind};
use crate::provisioning::RuntimeStatus;
use crate::server::deploy_tracker::ProvisionTask;

#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub plan: PlanTier,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: i32,
    pub username: String,
}

/// JWT payload. Carries the plan tier so the rate limiter can pick the
/// right ceiling without a per-request user lookup; a plan change takes
/// effect on the next login.
#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub sub: String,
    pub user_id: i32,
    pub plan: PlanTier,
    pub exp: usize,
}

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
    pub plan: PlanTier,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    pub name: String,
    pub platform: PlatformKind,
    pub platform_token: String,
    pub ai_provider: AiProvider,
    pub ai_token: String,
    pub ai_model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub platform_token: Option<String>,
    pub ai_provider: Option<AiProvider>,
    pub ai_token: Option<String>,
    pub ai_model: Option<String>,
    pub system_prompt: Option<String>,
    pub config: Option<serde_json::Value>,
}

/// Sanitized projection of a bot: the only shape serialized to callers.
/// Deliberately has no field for either encrypted credential column.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub platform: PlatformKind,
    pub ai_provider: AiProvider,
    pub ai_model: String,
    pub system_prompt: String,
    pub config: Option<serde_json::Value>,
    pub deployment_id: Option<String>,
    pub webhook_url: Option<String>,
    pub status: BotStatus,
    pub message_count: i64,
    pub last_active_at: Option<String>,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<bot::Model> for BotResponse {
    fn from(model: bot::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            platform: model.platform,
            ai_provider: model.ai_provider,
            ai_model: model.ai_model,
            system_prompt: model.system_prompt,
            config: model.config,
            deployment_id: model.deployment_id,
            webhook_url: model.webhook_url,
            status: model.status,
            message_count: model.message_count,
            last_active_at: model.last_active_at.map(|t| t.to_rfc3339()),
            memory_mb: model.memory_mb,
            cpu_percent: model.cpu_percent,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Bot update plus the warning surfaced when a best-effort worker restart
/// after a credential change did not go through.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBotResponse {
    #[serde(flatten)]
    pub bot: BotResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_warning: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BotStatusResponse {
    pub bot_id: i32,
    pub recorded_status: BotStatus,
    pub runtime: RuntimeStatus,
    pub provisioning: ProvisioningState,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    InFlight,
    Settled,
    /// A provisioning task was expected but is gone while the record still
    /// says deploying; the deploy was lost.
    Lost,
}

impl ProvisioningState {
    pub fn derive(task: ProvisionTask, recorded: BotStatus) -> Self {
        match (task, recorded) {
            (ProvisionTask::InFlight, _) => ProvisioningState::InFlight,
            (ProvisionTask::None, BotStatus::Deploying)
            | (ProvisionTask::Finished, BotStatus::Deploying) => ProvisioningState::Lost,
            _ => ProvisioningState::Settled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn bot_response_never_carries_credentials() {
        let now = Utc::now();
        let model = bot::Model {
            id: 1,
            user_id: 2,
            name: "b".to_string(),
            platform: PlatformKind::Telegram,
            platform_token_enc: "ENCRYPTED-PLATFORM".to_string(),
            ai_provider: AiProvider::OpenAi,
            ai_token_enc: "ENCRYPTED-AI".to_string(),
            ai_model: "m".to_string(),
            system_prompt: "s".to_string(),
            config: None,
            deployment_id: None,
            port: None,
            webhook_url: None,
            status: BotStatus::Stopped,
            message_count: 0,
            last_active_at: None,
            memory_mb: None,
            cpu_percent: None,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&BotResponse::from(model)).unwrap();
        assert!(!json.contains("ENCRYPTED-PLATFORM"));
        assert!(!json.contains("ENCRYPTED-AI"));
        assert!(!json.contains("token"));
    }

    #[test]
    fn lost_provisioning_is_distinguishable_from_in_flight() {
        use crate::server::deploy_tracker::ProvisionTask;
        assert_eq!(
            ProvisioningState::derive(ProvisionTask::InFlight, BotStatus::Deploying),
            ProvisioningState::InFlight
        );
        assert_eq!(
            ProvisioningState::derive(ProvisionTask::None, BotStatus::Deploying),
            ProvisioningState::Lost
        );
        assert_eq!(
            ProvisioningState::derive(ProvisionTask::Finished, BotStatus::Running),
            ProvisioningState::Settled
        );
    }
}
