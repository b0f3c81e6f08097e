use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{AiProvider, BotStatus, PlatformKind};

/// A configured chat worker. The `platform_token_enc` and `ai_token_enc`
/// columns hold vault blobs and must never be serialized to a caller;
/// external reads go through `web::models::BotResponse`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub platform: PlatformKind,
    pub platform_token_enc: String,
    pub ai_provider: AiProvider,
    pub ai_token_enc: String,
    pub ai_model: String,
    pub system_prompt: String,
    pub config: Option<Json>,
    pub deployment_id: Option<String>,
    pub port: Option<i32>,
    pub webhook_url: Option<String>,
    pub status: BotStatus,
    pub message_count: i64,
    pub last_active_at: Option<ChronoDateTimeUtc>,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
