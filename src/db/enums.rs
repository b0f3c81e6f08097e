use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "bot_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[sea_orm(string_value = "deploying")]
    Deploying,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "stopped")]
    Stopped,
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "sleeping")]
    Sleeping,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotStatus::Deploying => "deploying",
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Error => "error",
            BotStatus::Sleeping => "sleeping",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "platform_kind_enum")]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[sea_orm(string_value = "telegram")]
    Telegram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "ai_provider_enum")]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[sea_orm(string_value = "openai")]
    OpenAi,
    #[sea_orm(string_value = "anthropic")]
    Anthropic,
    #[sea_orm(string_value = "custom")]
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "plan_tier_enum")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[sea_orm(string_value = "free")]
    Free,
    #[sea_orm(string_value = "pro")]
    Pro,
    #[sea_orm(string_value = "business")]
    Business,
}

impl PlanTier {
    /// Hard ceiling on non-deleted bots a user may own.
    pub fn bot_limit(&self) -> u64 {
        match self {
            PlanTier::Free => 1,
            PlanTier::Pro => 5,
            PlanTier::Business => 20,
        }
    }

    /// API requests allowed per sliding one-minute window.
    pub fn request_limit_per_minute(&self) -> usize {
        match self {
            PlanTier::Free => 30,
            PlanTier::Pro => 120,
            PlanTier::Business => 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "user_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "suspended")]
    Suspended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_limits_are_ordered() {
        assert!(PlanTier::Free.bot_limit() < PlanTier::Pro.bot_limit());
        assert!(PlanTier::Pro.bot_limit() < PlanTier::Business.bot_limit());
        assert!(
            PlanTier::Free.request_limit_per_minute()
                < PlanTier::Business.request_limit_per_minute()
        );
    }
}
