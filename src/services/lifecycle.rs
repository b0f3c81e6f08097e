use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::entities::{bot, user};
use crate::db::enums::BotStatus;
use crate::db::services::bot_service::{self, BotUpdate, NewBot};
use crate::provisioning::{DeploymentResult, ProvisionSpec, ProvisioningBackend};
use crate::server::deploy_tracker::DeployTracker;
use crate::services::vault::Vault;
use crate::web::error::AppError;
use crate::web::models::{BotStatusResponse, ProvisioningState};

/// Coordinates every lifecycle operation: record store on one side, the
/// process's single provisioning backend on the other. All mutations of a
/// bot's runtime go through here, serialized per bot id.
pub struct BotLifecycle {
    db: Arc<DatabaseConnection>,
    vault: Arc<Vault>,
    backend: Arc<dyn ProvisioningBackend>,
    tracker: Arc<DeployTracker>,
}

impl BotLifecycle {
    pub fn new(
        db: Arc<DatabaseConnection>,
        vault: Arc<Vault>,
        backend: Arc<dyn ProvisioningBackend>,
        tracker: Arc<DeployTracker>,
    ) -> Self {
        Self {
            db,
            vault,
            backend,
            tracker,
        }
    }

    /// Creates the record (encrypted, `deploying`) and kicks off provisioning
    /// in the background. The response never waits for, or fails because of,
    /// the deployment itself.
    pub async fn create(
        self: &Arc<Self>,
        owner: &user::Model,
        input: NewBot,
    ) -> Result<bot::Model, AppError> {
        // Serialized per owner: without this, two creates racing at the
        // ceiling could both pass the count below.
        let _quota_guard = self.tracker.lock_user(owner.id).await;

        let limit = owner.plan.bot_limit();
        let owned = bot_service::count_bots(&self.db, owner.id).await?;
        if owned >= limit {
            return Err(AppError::QuotaExceeded { limit });
        }

        let created = bot_service::create_bot(&self.db, &self.vault, owner.id, input).await?;

        let lifecycle = self.clone();
        let bot_id = created.id;
        let handle = tokio::spawn(async move {
            lifecycle.run_background_provision(bot_id).await;
        });
        self.tracker.track(bot_id, handle);

        Ok(created)
    }

    /// The fire-and-forget half of create. Holds the per-bot lock for the
    /// whole provision so a concurrent start/stop/delete waits its turn.
    async fn run_background_provision(&self, bot_id: i32) {
        let attempt_id = uuid::Uuid::new_v4();
        info!(bot_id, %attempt_id, "background provisioning started");
        let _guard = self.tracker.lock_bot(bot_id).await;

        let spec = match self.load_spec(bot_id).await {
            Ok(spec) => spec,
            Err(e) => {
                error!(bot_id, %attempt_id, error = %e, "cannot build provision spec, marking bot errored");
                self.mark_error(bot_id).await;
                return;
            }
        };

        match self.backend.provision(&spec).await {
            Ok(result) => {
                if let Err(e) = self.persist_deployment(bot_id, &result).await {
                    error!(bot_id, %attempt_id, error = %e, "deployment succeeded but record update failed");
                }
            }
            Err(e) => {
                warn!(bot_id, %attempt_id, error = %e, "provisioning failed");
                self.mark_error(bot_id).await;
            }
        }
    }

    /// Brings a non-running bot up, reusing its deployment handle when one
    /// exists. Awaited: the caller sees the outcome directly.
    pub async fn start(&self, user_id: i32, bot_id: i32) -> Result<bot::Model, AppError> {
        let _guard = self.tracker.lock_bot(bot_id).await;

        let bot = self.owned_bot(user_id, bot_id).await?;
        if bot.status == BotStatus::Running {
            return Err(AppError::Conflict("bot is already running".to_string()));
        }

        bot_service::update_status(&self.db, bot_id, BotStatus::Deploying).await?;
        let spec = bot_service::provision_spec(&self.vault, &bot)?;

        match self.backend.start(&spec).await {
            Ok(result) => {
                self.persist_deployment(bot_id, &result).await?;
                self.owned_bot(user_id, bot_id).await
            }
            Err(e) => {
                self.mark_error(bot_id).await;
                Err(e.into())
            }
        }
    }

    /// Stop is only meaningful from `running`. For remote backends this is
    /// advisory: the webhook is deregistered and the record says stopped,
    /// the remote service stays up for a cheap restart.
    pub async fn stop(&self, user_id: i32, bot_id: i32) -> Result<bot::Model, AppError> {
        let _guard = self.tracker.lock_bot(bot_id).await;

        let bot = self.owned_bot(user_id, bot_id).await?;
        if bot.status != BotStatus::Running {
            return Err(AppError::Conflict(format!(
                "bot is {}, only a running bot can be stopped",
                bot.status
            )));
        }

        let spec = bot_service::provision_spec(&self.vault, &bot)?;
        self.backend.stop(&spec).await?;
        bot_service::update_status(&self.db, bot_id, BotStatus::Stopped).await?;
        self.owned_bot(user_id, bot_id).await
    }

    pub async fn restart(&self, user_id: i32, bot_id: i32) -> Result<bot::Model, AppError> {
        let _guard = self.tracker.lock_bot(bot_id).await;

        let bot = self.owned_bot(user_id, bot_id).await?;
        bot_service::update_status(&self.db, bot_id, BotStatus::Deploying).await?;
        let spec = bot_service::provision_spec(&self.vault, &bot)?;

        let outcome = if spec.deployment_id.is_some() {
            self.backend.restart(&spec).await
        } else {
            self.backend.provision(&spec).await
        };

        match outcome {
            Ok(result) => {
                self.persist_deployment(bot_id, &result).await?;
                self.owned_bot(user_id, bot_id).await
            }
            Err(e) => {
                self.mark_error(bot_id).await;
                Err(e.into())
            }
        }
    }

    /// Terminal. External teardown is best effort: its failure is logged and
    /// the record is removed regardless. A second delete finds no record and
    /// reports not-found without another teardown.
    pub async fn delete(&self, user_id: i32, bot_id: i32) -> Result<(), AppError> {
        let _guard = self.tracker.lock_bot(bot_id).await;

        let bot = self.owned_bot(user_id, bot_id).await?;
        if let Some(deployment_id) = &bot.deployment_id {
            if let Err(e) = self.backend.teardown(deployment_id).await {
                warn!(bot_id, deployment_id, error = %e, "teardown failed, deleting record anyway");
            }
        }

        bot_service::delete_bot(&self.db, bot_id, user_id).await?;
        self.tracker.forget(bot_id);
        info!(bot_id, user_id, "bot deleted");
        Ok(())
    }

    /// Composite status: persisted record, live backend answer, and whether
    /// the background provisioning task is in flight, settled, or lost.
    pub async fn status(&self, user_id: i32, bot_id: i32) -> Result<BotStatusResponse, AppError> {
        let bot = self.owned_bot(user_id, bot_id).await?;
        let spec = bot_service::provision_spec(&self.vault, &bot)?;
        let runtime = self.backend.status(&spec).await;

        Ok(BotStatusResponse {
            bot_id,
            recorded_status: bot.status,
            runtime,
            provisioning: ProvisioningState::derive(self.tracker.task_state(bot_id), bot.status),
        })
    }

    /// Applies a partial update. When runtime-relevant config changes on a
    /// running bot, the worker is cycled best-effort; a cycle failure is
    /// reported back but the record update stands.
    pub async fn update(
        &self,
        user_id: i32,
        bot_id: i32,
        update: BotUpdate,
    ) -> Result<(bot::Model, Option<String>), AppError> {
        let _guard = self.tracker.lock_bot(bot_id).await;

        let bot = self.owned_bot(user_id, bot_id).await?;
        let needs_cycle = bot.status == BotStatus::Running && update.touches_runtime_config();

        let updated = bot_service::update_bot(&self.db, &self.vault, bot, update).await?;

        let mut warning = None;
        if needs_cycle {
            if let Err(e) = self.cycle_worker(&updated).await {
                warn!(bot_id, error = %e, "restart after config change failed");
                warning = Some(format!(
                    "configuration saved, but restarting the worker failed: {e}"
                ));
                self.mark_error(bot_id).await;
            }
        }

        let fresh = self.owned_bot(user_id, bot_id).await?;
        Ok((fresh, warning))
    }

    async fn cycle_worker(&self, bot: &bot::Model) -> Result<(), AppError> {
        let spec = bot_service::provision_spec(&self.vault, bot)?;
        self.backend.stop(&spec).await?;
        let result = self.backend.start(&spec).await?;
        self.persist_deployment(bot.id, &result).await?;
        Ok(())
    }

    async fn owned_bot(&self, user_id: i32, bot_id: i32) -> Result<bot::Model, AppError> {
        bot_service::get_bot(&self.db, bot_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bot not found".to_string()))
    }

    async fn load_spec(&self, bot_id: i32) -> Result<ProvisionSpec, AppError> {
        let bot = bot_service::find_with_credentials(&self.db, bot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bot not found".to_string()))?;
        Ok(bot_service::provision_spec(&self.vault, &bot)?)
    }

    async fn persist_deployment(
        &self,
        bot_id: i32,
        result: &DeploymentResult,
    ) -> Result<(), AppError> {
        bot_service::update_runtime(
            &self.db,
            bot_id,
            Some(result.deployment_id.clone()),
            None,
            result.webhook_url.clone(),
        )
        .await?;

        // A manual "deployment" is recorded intent, not a running worker.
        let status = if result.manual {
            BotStatus::Stopped
        } else {
            BotStatus::Running
        };
        bot_service::update_status(&self.db, bot_id, status).await?;
        Ok(())
    }

    /// A deploy that failed or timed out must never leave the record stuck
    /// in `deploying`.
    async fn mark_error(&self, bot_id: i32) {
        if let Err(e) = bot_service::update_status(&self.db, bot_id, BotStatus::Error).await {
            error!(bot_id, error = %e, "failed to persist error status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{AiProvider, PlanTier, PlatformKind, UserStatus};
    use crate::provisioning::{ProvisionError, RuntimeState, RuntimeStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Deterministic backend double recording what it was asked to do.
    #[derive(Default)]
    struct FakeBackend {
        fail_provision: bool,
        provisions: AtomicUsize,
        stops: AtomicUsize,
        teardowns: AtomicUsize,
        last_spec: StdMutex<Option<ProvisionSpec>>,
    }

    impl FakeBackend {
        fn failing() -> Self {
            Self {
                fail_provision: true,
                ..Default::default()
            }
        }

        fn result(spec: &ProvisionSpec) -> DeploymentResult {
            DeploymentResult {
                deployment_id: format!("svc-{}", spec.bot_id),
                endpoint_url: Some("https://worker.example".to_string()),
                webhook_url: Some("https://worker.example/webhook".to_string()),
                manual: false,
            }
        }
    }

    #[async_trait]
    impl ProvisioningBackend for FakeBackend {
        async fn provision(
            &self,
            spec: &ProvisionSpec,
        ) -> Result<DeploymentResult, ProvisionError> {
            self.provisions.fetch_add(1, Ordering::SeqCst);
            *self.last_spec.lock().unwrap() = Some(spec.clone());
            if self.fail_provision {
                return Err(ProvisionError::Failed("build crashed".to_string()));
            }
            Ok(Self::result(spec))
        }

        async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
            self.provision(spec).await
        }

        async fn stop(&self, _spec: &ProvisionSpec) -> Result<(), ProvisionError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
            self.provision(spec).await
        }

        async fn teardown(&self, _deployment_id: &str) -> Result<(), ProvisionError> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn status(&self, _spec: &ProvisionSpec) -> RuntimeStatus {
            RuntimeStatus::bare(RuntimeState::Running)
        }
    }

    fn test_user(plan: PlanTier) -> user::Model {
        let now = Utc::now();
        user::Model {
            id: 10,
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            plan,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn stored_bot(vault: &Vault, status: BotStatus, deployment: Option<&str>) -> bot::Model {
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
            deployment_id: deployment.map(str::to_string),
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

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            last_insert_id: 1,
            rows_affected: 1,
        }
    }

    fn lifecycle(db: DatabaseConnection, backend: Arc<FakeBackend>) -> Arc<BotLifecycle> {
        Arc::new(BotLifecycle::new(
            Arc::new(db),
            Arc::new(Vault::new("test-secret")),
            backend,
            Arc::new(DeployTracker::new()),
        ))
    }

    fn new_bot_input() -> NewBot {
        NewBot {
            name: "support-bot".to_string(),
            platform: PlatformKind::Telegram,
            platform_token: "tg-token".to_string(),
            ai_provider: AiProvider::OpenAi,
            ai_token: "ai-token".to_string(),
            ai_model: "gpt-4o-mini".to_string(),
            system_prompt: "be nice".to_string(),
            config: None,
        }
    }

    #[tokio::test]
    async fn create_at_quota_ceiling_is_rejected_before_any_side_effect() {
        let backend = Arc::new(FakeBackend::default());
        // Free plan allows 1 bot; the user already owns 1. Only the count
        // query is mocked: reaching the INSERT would fail the test.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![count_row(1)]])
            .into_connection();
        let lifecycle = lifecycle(db, backend.clone());

        let err = lifecycle
            .create(&test_user(PlanTier::Free), new_bot_input())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { limit: 1 }));
        assert_eq!(backend.provisions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_under_ceiling_returns_deploying_record() {
        let backend = Arc::new(FakeBackend::default());
        let vault = Vault::new("test-secret");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![count_row(0)]])
            .append_query_results([vec![stored_bot(&vault, BotStatus::Deploying, None)]])
            .into_connection();
        let lifecycle = lifecycle(db, backend);

        let created = lifecycle
            .create(&test_user(PlanTier::Free), new_bot_input())
            .await
            .unwrap();
        assert_eq!(created.status, BotStatus::Deploying);
    }

    #[tokio::test]
    async fn stop_requires_running_state() {
        let backend = Arc::new(FakeBackend::default());
        let vault = Vault::new("test-secret");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored_bot(&vault, BotStatus::Stopped, Some("svc-1"))]])
            .into_connection();
        let lifecycle = lifecycle(db, backend.clone());

        let err = lifecycle.stop(10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(backend.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_rejects_already_running_bot() {
        let backend = Arc::new(FakeBackend::default());
        let vault = Vault::new("test-secret");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored_bot(&vault, BotStatus::Running, Some("svc-1"))]])
            .into_connection();
        let lifecycle = lifecycle(db, backend.clone());

        let err = lifecycle.start(10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(backend.provisions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_after_failure_reuses_stored_credentials() {
        let backend = Arc::new(FakeBackend::default());
        let vault = Vault::new("test-secret");
        let errored = stored_bot(&vault, BotStatus::Error, Some("svc-1"));
        let running = stored_bot(&vault, BotStatus::Running, Some("svc-1"));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![errored]])
            .append_exec_results([exec_ok(), exec_ok(), exec_ok()])
            .append_query_results([vec![running]])
            .into_connection();
        let lifecycle = lifecycle(db, backend.clone());

        let started = lifecycle.start(10, 1).await.unwrap();
        assert_eq!(started.status, BotStatus::Running);

        // The backend received the decrypted tokens from the record, and the
        // existing handle so no duplicate resource gets created.
        let spec = backend.last_spec.lock().unwrap().clone().unwrap();
        assert_eq!(spec.platform_token, "tg-token");
        assert_eq!(spec.ai_token, "ai-token");
        assert_eq!(spec.deployment_id.as_deref(), Some("svc-1"));
    }

    #[tokio::test]
    async fn failed_provision_marks_record_errored() {
        let backend = Arc::new(FakeBackend::failing());
        let vault = Vault::new("test-secret");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored_bot(&vault, BotStatus::Stopped, None)]])
            .append_exec_results([exec_ok(), exec_ok()])
            .into_connection();
        let lifecycle = lifecycle(db, backend);

        let err = lifecycle.start(10, 1).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Provision(ProvisionError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn second_delete_reports_not_found_without_second_teardown() {
        let backend = Arc::new(FakeBackend::default());
        let vault = Vault::new("test-secret");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored_bot(&vault, BotStatus::Running, Some("svc-1"))]])
            .append_exec_results([exec_ok()])
            .append_query_results([Vec::<bot::Model>::new()])
            .into_connection();
        let lifecycle = lifecycle(db, backend.clone());

        lifecycle.delete(10, 1).await.unwrap();
        assert_eq!(backend.teardowns.load(Ordering::SeqCst), 1);

        let err = lifecycle.delete(10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(backend.teardowns.load(Ordering::SeqCst), 1);
    }
}
