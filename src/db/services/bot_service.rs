use chrono::Utc;
use sea_orm::{
    prelude::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};

use crate::db::entities::bot;
use crate::db::enums::{AiProvider, BotStatus, PlatformKind};
use crate::provisioning::ProvisionSpec;
use crate::services::vault::{CryptoError, Vault};

pub struct NewBot {
    pub name: String,
    pub platform: PlatformKind,
    pub platform_token: String,
    pub ai_provider: AiProvider,
    pub ai_token: String,
    pub ai_model: String,
    pub system_prompt: String,
    pub config: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct BotUpdate {
    pub name: Option<String>,
    pub platform_token: Option<String>,
    pub ai_provider: Option<AiProvider>,
    pub ai_token: Option<String>,
    pub ai_model: Option<String>,
    pub system_prompt: Option<String>,
    pub config: Option<serde_json::Value>,
}

impl BotUpdate {
    /// True when the change affects what a running worker was launched with,
    /// so the worker must be cycled to pick it up.
    pub fn touches_runtime_config(&self) -> bool {
        self.platform_token.is_some()
            || self.ai_provider.is_some()
            || self.ai_token.is_some()
            || self.ai_model.is_some()
            || self.system_prompt.is_some()
    }
}

/// Creates the record with both credentials encrypted before anything is
/// persisted; no intermediate state ever holds plaintext.
pub async fn create_bot(
    db: &DatabaseConnection,
    vault: &Vault,
    user_id: i32,
    input: NewBot,
) -> Result<bot::Model, DbErr> {
    let platform_token_enc = vault
        .encrypt(&input.platform_token)
        .map_err(|e| DbErr::Custom(format!("credential encryption failed: {e}")))?;
    let ai_token_enc = vault
        .encrypt(&input.ai_token)
        .map_err(|e| DbErr::Custom(format!("credential encryption failed: {e}")))?;

    let now = Utc::now();
    let new_bot = bot::ActiveModel {
        user_id: Set(user_id),
        name: Set(input.name),
        platform: Set(input.platform),
        platform_token_enc: Set(platform_token_enc),
        ai_provider: Set(input.ai_provider),
        ai_token_enc: Set(ai_token_enc),
        ai_model: Set(input.ai_model),
        system_prompt: Set(input.system_prompt),
        config: Set(input.config),
        deployment_id: Set(None),
        port: Set(None),
        webhook_url: Set(None),
        status: Set(BotStatus::Deploying),
        message_count: Set(0),
        last_active_at: Set(None),
        memory_mb: Set(None),
        cpu_percent: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    new_bot.insert(db).await
}

/// Owner-scoped read. Missing and not-owned are indistinguishable by design.
pub async fn get_bot(
    db: &DatabaseConnection,
    bot_id: i32,
    user_id: i32,
) -> Result<Option<bot::Model>, DbErr> {
    bot::Entity::find_by_id(bot_id)
        .filter(bot::Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn list_bots(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<bot::Model>, DbErr> {
    bot::Entity::find()
        .filter(bot::Column::UserId.eq(user_id))
        .order_by(bot::Column::CreatedAt, sea_orm::Order::Desc)
        .all(db)
        .await
}

pub async fn count_bots(db: &DatabaseConnection, user_id: i32) -> Result<u64, DbErr> {
    bot::Entity::find()
        .filter(bot::Column::UserId.eq(user_id))
        .count(db)
        .await
}

/// Privileged accessor: unscoped fetch including encrypted columns. Only the
/// provisioning paths and the dispatch router call this.
pub async fn find_with_credentials(
    db: &DatabaseConnection,
    bot_id: i32,
) -> Result<Option<bot::Model>, DbErr> {
    bot::Entity::find_by_id(bot_id).one(db).await
}

/// Decrypts a record into a deployable spec. Stays next to
/// `find_with_credentials` so the plaintext never crosses another module's
/// boundary on its way to the backend.
pub fn provision_spec(vault: &Vault, model: &bot::Model) -> Result<ProvisionSpec, CryptoError> {
    Ok(ProvisionSpec {
        bot_id: model.id,
        name: model.name.clone(),
        platform_token: vault.decrypt(&model.platform_token_enc)?,
        ai_provider: model.ai_provider,
        ai_token: vault.decrypt(&model.ai_token_enc)?,
        ai_model: model.ai_model.clone(),
        system_prompt: model.system_prompt.clone(),
        deployment_id: model.deployment_id.clone(),
        last_known_status: model.status,
    })
}

/// Partial update; only supplied credential fields are re-encrypted.
pub async fn update_bot(
    db: &DatabaseConnection,
    vault: &Vault,
    existing: bot::Model,
    update: BotUpdate,
) -> Result<bot::Model, DbErr> {
    let mut active: bot::ActiveModel = existing.into();

    if let Some(name) = update.name {
        active.name = Set(name);
    }
    if let Some(token) = update.platform_token {
        let enc = vault
            .encrypt(&token)
            .map_err(|e| DbErr::Custom(format!("credential encryption failed: {e}")))?;
        active.platform_token_enc = Set(enc);
    }
    if let Some(provider) = update.ai_provider {
        active.ai_provider = Set(provider);
    }
    if let Some(token) = update.ai_token {
        let enc = vault
            .encrypt(&token)
            .map_err(|e| DbErr::Custom(format!("credential encryption failed: {e}")))?;
        active.ai_token_enc = Set(enc);
    }
    if let Some(model) = update.ai_model {
        active.ai_model = Set(model);
    }
    if let Some(prompt) = update.system_prompt {
        active.system_prompt = Set(prompt);
    }
    if let Some(config) = update.config {
        active.config = Set(Some(config));
    }
    active.updated_at = Set(Utc::now());

    active.update(db).await
}

/// Status-only write so routine transitions do not touch encrypted columns.
pub async fn update_status(
    db: &DatabaseConnection,
    bot_id: i32,
    status: BotStatus,
) -> Result<(), DbErr> {
    bot::Entity::update_many()
        .col_expr(bot::Column::Status, Expr::value(status))
        .col_expr(bot::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(bot::Column::Id.eq(bot_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Runtime-fields-only write used after (re)deployment.
pub async fn update_runtime(
    db: &DatabaseConnection,
    bot_id: i32,
    deployment_id: Option<String>,
    port: Option<i32>,
    webhook_url: Option<String>,
) -> Result<(), DbErr> {
    bot::Entity::update_many()
        .col_expr(bot::Column::DeploymentId, Expr::value(deployment_id))
        .col_expr(bot::Column::Port, Expr::value(port))
        .col_expr(bot::Column::WebhookUrl, Expr::value(webhook_url))
        .col_expr(bot::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(bot::Column::Id.eq(bot_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn record_activity(db: &DatabaseConnection, bot_id: i32) -> Result<(), DbErr> {
    bot::Entity::update_many()
        .col_expr(
            bot::Column::MessageCount,
            Expr::col(bot::Column::MessageCount).add(1),
        )
        .col_expr(bot::Column::LastActiveAt, Expr::value(Some(Utc::now())))
        .filter(bot::Column::Id.eq(bot_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Removes the record. Returns false when nothing matched, which callers
/// surface as not-found.
pub async fn delete_bot(
    db: &DatabaseConnection,
    bot_id: i32,
    user_id: i32,
) -> Result<bool, DbErr> {
    let result = bot::Entity::delete_many()
        .filter(bot::Column::Id.eq(bot_id))
        .filter(bot::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn sample_bot(vault: &Vault, status: BotStatus) -> bot::Model {
        let now = Utc::now();
        bot::Model {
            id: 1,
            user_id: 10,
            name: "support-bot".to_string(),
            platform: PlatformKind::Telegram,
            platform_token_enc: vault.encrypt("tg-token").unwrap(),
            ai_provider: AiProvider::OpenAi,
            ai_token_enc: vault.encrypt("ai-token").unwrap(),
            ai_model: "gpt-4o-mini".to_string(),
            system_prompt: "be nice".to_string(),
            config: None,
            deployment_id: Some("svc-1".to_string()),
            port: None,
            webhook_url: None,
            status,
            message_count: 0,
            last_active_at: None,
            memory_mb: None,
            cpu_percent: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn provision_spec_decrypts_stored_credentials() {
        let vault = Vault::new("test-secret");
        let model = sample_bot(&vault, BotStatus::Error);

        let spec = provision_spec(&vault, &model).unwrap();
        assert_eq!(spec.platform_token, "tg-token");
        assert_eq!(spec.ai_token, "ai-token");
        assert_eq!(spec.deployment_id.as_deref(), Some("svc-1"));
        assert_eq!(spec.last_known_status, BotStatus::Error);
    }

    #[test]
    fn provision_spec_fails_closed_on_wrong_key() {
        let vault = Vault::new("test-secret");
        let model = sample_bot(&vault, BotStatus::Stopped);
        let other = Vault::new("different-secret");
        assert!(provision_spec(&other, &model).is_err());
    }

    #[tokio::test]
    async fn create_bot_persists_only_encrypted_credentials() {
        let vault = Vault::new("test-secret");
        let returned = sample_bot(&vault, BotStatus::Deploying);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![returned]])
            .into_connection();

        let created = create_bot(
            &db,
            &vault,
            10,
            NewBot {
                name: "support-bot".to_string(),
                platform: PlatformKind::Telegram,
                platform_token: "tg-token".to_string(),
                ai_provider: AiProvider::OpenAi,
                ai_token: "ai-token".to_string(),
                ai_model: "gpt-4o-mini".to_string(),
                system_prompt: "be nice".to_string(),
                config: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(created.status, BotStatus::Deploying);

        // The INSERT statement must not contain either plaintext credential.
        let log = db.into_transaction_log();
        let sql = format!("{log:?}");
        assert!(!sql.contains("tg-token"));
        assert!(!sql.contains("ai-token"));
    }

    #[tokio::test]
    async fn delete_reports_missing_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        assert!(!delete_bot(&db, 99, 10).await.unwrap());
    }

    #[test]
    fn runtime_config_change_detection() {
        assert!(!BotUpdate::default().touches_runtime_config());
        assert!(!BotUpdate {
            name: Some("renamed".to_string()),
            ..Default::default()
        }
        .touches_runtime_config());
        assert!(BotUpdate {
            ai_model: Some("gpt-4o".to_string()),
            ..Default::default()
        }
        .touches_runtime_config());
    }
}
