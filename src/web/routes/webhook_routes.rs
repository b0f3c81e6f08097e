use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::services::bot_service;
use crate::web::AppState;

pub fn webhook_router() -> Router<Arc<AppState>> {
    Router::new().route("/{bot_id}", post(inbound_webhook_handler))
}

/// Inbound platform traffic. The platform disables webhooks that keep
/// failing, so this handler acknowledges with 200 no matter what happened
/// inside; every internal problem is logged and swallowed. The body is
/// taken raw for the same reason: a malformed update must not bounce back
/// as a 4xx from the extractor.
async fn inbound_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i32>,
    body: Bytes,
) -> Json<Value> {
    if !state.governor.check_webhook(bot_id) {
        warn!(bot_id, "webhook window saturated, dropping update");
        return Json(serde_json::json!({}));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(bot_id, error = %e, "unparseable webhook body, dropping update");
            return Json(serde_json::json!({}));
        }
    };

    // Heavy work happens after the transport-level ack.
    let state = state.clone();
    tokio::spawn(async move {
        dispatch_update(state, bot_id, payload).await;
    });

    Json(serde_json::json!({}))
}

async fn dispatch_update(state: Arc<AppState>, bot_id: i32, payload: Value) {
    match bot_service::find_with_credentials(&state.db, bot_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(bot_id, "webhook for unknown bot, ignoring");
            return;
        }
        Err(e) => {
            warn!(bot_id, error = %e, "webhook lookup failed");
            return;
        }
    }

    let Some(runner) = &state.local_runner else {
        // Remote workers receive their traffic directly; an update landing
        // here means a stale webhook registration.
        debug!(bot_id, "no in-process runtime for bot, update not forwarded");
        return;
    };
    if !runner_has_bot(&state, bot_id) {
        debug!(bot_id, "bot has no live registration, update not forwarded");
        return;
    }

    runner.handle_update(bot_id, &payload).await;

    if let Err(e) = bot_service::record_activity(&state.db, bot_id).await {
        warn!(bot_id, error = %e, "failed to record bot activity");
    }
}

fn runner_has_bot(state: &AppState, bot_id: i32) -> bool {
    state.registry.is_registered(bot_id)
}
