use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ClientError;

/// Client for the Telegram Bot API: webhook registration and outbound
/// messages. One instance is shared; the bot token is passed per call since
/// every bot has its own.
pub struct TelegramClient {
    client: Client,
    api_base: String,
}

#[derive(Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    drop_pending_updates: bool,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl Default for TelegramClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    /// Points the client at a different API origin. Used by tests.
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        bot_token: &str,
        method: &str,
        payload: &impl Serialize,
    ) -> Result<T, ClientError> {
        let url = format!("{}/bot{}/{}", self.api_base, bot_token, method);
        let response = self.client.post(&url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ClientError::ApiError { status, body });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.ok {
            return Err(ClientError::BadResponse(
                envelope
                    .description
                    .unwrap_or_else(|| "Telegram API reported ok=false".to_string()),
            ));
        }
        envelope
            .result
            .ok_or_else(|| ClientError::BadResponse("missing result field".to_string()))
    }

    pub async fn set_webhook(&self, bot_token: &str, webhook_url: &str) -> Result<(), ClientError> {
        debug!(webhook_url, "registering telegram webhook");
        let payload = SetWebhookRequest {
            url: webhook_url,
            drop_pending_updates: true,
        };
        let _: Value = self.call(bot_token, "setWebhook", &payload).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self, bot_token: &str) -> Result<(), ClientError> {
        let _: Value = self
            .call(bot_token, "deleteWebhook", &serde_json::json!({}))
            .await?;
        Ok(())
    }

    pub async fn send_message(
        &self,
        bot_token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), ClientError> {
        let payload = SendMessageRequest { chat_id, text };
        let _: Value = self.call(bot_token, "sendMessage", &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_fake_api(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn set_webhook_round_trips_the_envelope() {
        let api = Router::new().fallback(|| async { Json(json!({"ok": true, "result": true})) });
        let base = spawn_fake_api(api).await;

        let client = TelegramClient::with_api_base(base);
        client
            .set_webhook("123:token", "https://bots.example/webhook/1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn api_level_failure_surfaces_the_description() {
        let api = Router::new()
            .fallback(|| async { Json(json!({"ok": false, "description": "Unauthorized"})) });
        let base = spawn_fake_api(api).await;

        let client = TelegramClient::with_api_base(base);
        let err = client.send_message("bad:token", 5, "hi").await.unwrap_err();
        match err {
            ClientError::BadResponse(msg) => assert!(msg.contains("Unauthorized")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
