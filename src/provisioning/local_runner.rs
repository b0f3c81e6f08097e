use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    DeploymentResult, ProvisionError, ProvisionSpec, ProvisioningBackend, RuntimeState,
    RuntimeStatus,
};
use crate::clients::ai::{AiClient, ChatTurn};
use crate::clients::telegram::TelegramClient;
use crate::server::registry::{BotRegistry, LiveBot};

/// Runs every bot inside this server process. No remote resource is created;
/// Telegram webhooks point back at our own dispatch route and inbound
/// messages are answered with direct platform/AI calls. Trades isolation
/// (one shared failure domain) for zero infrastructure.
pub struct LocalRunner {
    registry: Arc<BotRegistry>,
    telegram: Arc<TelegramClient>,
    ai: Arc<AiClient>,
    public_base: String,
}

impl LocalRunner {
    pub fn new(
        registry: Arc<BotRegistry>,
        telegram: Arc<TelegramClient>,
        ai: Arc<AiClient>,
        public_base: String,
    ) -> Self {
        Self {
            registry,
            telegram,
            ai,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    fn webhook_url(&self, bot_id: i32) -> String {
        format!("{}/webhook/{}", self.public_base, bot_id)
    }

    fn deployment_handle(bot_id: i32) -> String {
        format!("local-{bot_id}")
    }

    async fn bring_up(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        let webhook_url = self.webhook_url(spec.bot_id);
        self.telegram
            .set_webhook(&spec.platform_token, &webhook_url)
            .await?;

        self.registry.register(LiveBot {
            bot_id: spec.bot_id,
            platform_token: spec.platform_token.clone(),
            ai_provider: spec.ai_provider,
            ai_token: spec.ai_token.clone(),
            ai_model: spec.ai_model.clone(),
            system_prompt: spec.system_prompt.clone(),
        });

        info!(bot_id = spec.bot_id, "bot running in-process");
        Ok(DeploymentResult {
            deployment_id: Self::deployment_handle(spec.bot_id),
            endpoint_url: Some(self.public_base.clone()),
            webhook_url: Some(webhook_url),
            manual: false,
        })
    }

    /// Handles one inbound platform update for a registered bot. Errors are
    /// logged and swallowed; the dispatch route has already acknowledged the
    /// transport by the time this runs.
    pub async fn handle_update(&self, bot_id: i32, payload: &Value) {
        let Some(bot) = self.registry.get(bot_id) else {
            warn!(bot_id, "update for bot with no live registration, dropping");
            return;
        };

        let Some(chat_id) = payload.pointer("/message/chat/id").and_then(Value::as_i64) else {
            debug!(bot_id, "update without a chat id, ignoring");
            return;
        };
        let Some(text) = payload.pointer("/message/text").and_then(Value::as_str) else {
            debug!(bot_id, chat_id, "non-text update, ignoring");
            return;
        };

        self.registry.push_turn(bot_id, chat_id, ChatTurn::user(text));
        let history = self.registry.history(bot_id, chat_id);

        let reply = match self
            .ai
            .complete(
                bot.ai_provider,
                &bot.ai_token,
                &bot.ai_model,
                &bot.system_prompt,
                &history,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(bot_id, chat_id, error = %e, "chat completion failed");
                return;
            }
        };

        self.registry
            .push_turn(bot_id, chat_id, ChatTurn::assistant(reply.clone()));

        if let Err(e) = self
            .telegram
            .send_message(&bot.platform_token, chat_id, &reply)
            .await
        {
            warn!(bot_id, chat_id, error = %e, "failed to deliver reply");
        }
    }
}

#[async_trait]
impl ProvisioningBackend for LocalRunner {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        self.bring_up(spec).await
    }

    async fn start(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        self.bring_up(spec).await
    }

    async fn stop(&self, spec: &ProvisionSpec) -> Result<(), ProvisionError> {
        self.registry.deregister(spec.bot_id);
        self.telegram.delete_webhook(&spec.platform_token).await?;
        Ok(())
    }

    async fn restart(&self, spec: &ProvisionSpec) -> Result<DeploymentResult, ProvisionError> {
        self.registry.deregister(spec.bot_id);
        self.bring_up(spec).await
    }

    async fn teardown(&self, deployment_id: &str) -> Result<(), ProvisionError> {
        if let Some(bot_id) = deployment_id
            .strip_prefix("local-")
            .and_then(|id| id.parse::<i32>().ok())
        {
            self.registry.deregister(bot_id);
        }
        Ok(())
    }

    async fn status(&self, spec: &ProvisionSpec) -> RuntimeStatus {
        if self.registry.is_registered(spec.bot_id) {
            RuntimeStatus::bare(RuntimeState::Running)
        } else {
            RuntimeStatus::last_known(spec.last_known_status, "no live in-process registration")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ai::AiClient;
    use crate::clients::telegram::TelegramClient;
    use crate::db::enums::BotStatus;
    use serde_json::json;

    fn runner() -> LocalRunner {
        LocalRunner::new(
            Arc::new(BotRegistry::new()),
            Arc::new(TelegramClient::new()),
            Arc::new(AiClient::new()),
            "https://bots.example.com/".to_string(),
        )
    }

    #[test]
    fn webhook_urls_are_per_bot() {
        let runner = runner();
        assert_eq!(
            runner.webhook_url(42),
            "https://bots.example.com/webhook/42"
        );
    }

    #[tokio::test]
    async fn update_for_unregistered_bot_is_dropped() {
        let runner = runner();
        // No live registration: the update is logged and dropped before any
        // external call is attempted.
        runner
            .handle_update(
                99,
                &json!({ "message": { "chat": { "id": 1 }, "text": "hi" } }),
            )
            .await;
        assert!(runner.registry.history(99, 1).is_empty());
    }

    #[tokio::test]
    async fn status_reflects_registration() {
        let runner = runner();
        let spec = crate::provisioning::ProvisionSpec {
            bot_id: 5,
            name: "b".to_string(),
            platform_token: "tg".to_string(),
            ai_provider: crate::db::enums::AiProvider::OpenAi,
            ai_token: "ai".to_string(),
            ai_model: "m".to_string(),
            system_prompt: "s".to_string(),
            deployment_id: Some("local-5".to_string()),
            last_known_status: BotStatus::Stopped,
        };
        let status = runner.status(&spec).await;
        assert_eq!(status.state, RuntimeState::Stopped);

        runner.registry.register(crate::server::registry::LiveBot {
            bot_id: 5,
            platform_token: "tg".to_string(),
            ai_provider: crate::db::enums::AiProvider::OpenAi,
            ai_token: "ai".to_string(),
            ai_model: "m".to_string(),
            system_prompt: "s".to_string(),
        });
        assert_eq!(runner.status(&spec).await.state, RuntimeState::Running);
    }
}
