use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::db::services::bot_service::{self, BotUpdate, NewBot};
use crate::db::services::user_service;
use crate::web::error::AppError;
use crate::web::models::{
    AuthenticatedUser, BotResponse, BotStatusResponse, CreateBotRequest, UpdateBotRequest,
    UpdateBotResponse,
};
use crate::web::AppState;

pub fn bot_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_bots_handler).post(create_bot_handler))
        .route(
            "/{id}",
            get(get_bot_handler)
                .put(update_bot_handler)
                .delete(delete_bot_handler),
        )
        .route("/{id}/start", post(start_bot_handler))
        .route("/{id}/stop", post(stop_bot_handler))
        .route("/{id}/restart", post(restart_bot_handler))
        .route("/{id}/status", get(bot_status_handler))
}

fn validate_create(req: &CreateBotRequest) -> Result<(), AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    if req.platform_token.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "platformToken must not be empty".to_string(),
        ));
    }
    if req.ai_token.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "aiToken must not be empty".to_string(),
        ));
    }
    if req.ai_model.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "aiModel must not be empty".to_string(),
        ));
    }
    Ok(())
}

async fn create_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<BotResponse>), AppError> {
    validate_create(&payload)?;

    let owner = user_service::get_user_by_id(&state.db, user.id)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let created = state
        .lifecycle
        .create(
            &owner,
            NewBot {
                name: payload.name,
                platform: payload.platform,
                platform_token: payload.platform_token,
                ai_provider: payload.ai_provider,
                ai_token: payload.ai_token,
                ai_model: payload.ai_model,
                system_prompt: payload.system_prompt.unwrap_or_default(),
                config: payload.config,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn list_bots_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<BotResponse>>, AppError> {
    let bots = bot_service::list_bots(&state.db, user.id).await?;
    Ok(Json(bots.into_iter().map(BotResponse::from).collect()))
}

async fn get_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotResponse>, AppError> {
    let bot = bot_service::get_bot(&state.db, bot_id, user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("bot not found".to_string()))?;
    Ok(Json(bot.into()))
}

async fn update_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
    Json(payload): Json<UpdateBotRequest>,
) -> Result<Json<UpdateBotResponse>, AppError> {
    let update = BotUpdate {
        name: payload.name,
        platform_token: payload.platform_token,
        ai_provider: payload.ai_provider,
        ai_token: payload.ai_token,
        ai_model: payload.ai_model,
        system_prompt: payload.system_prompt,
        config: payload.config,
    };

    let (bot, restart_warning) = state.lifecycle.update(user.id, bot_id, update).await?;
    Ok(Json(UpdateBotResponse {
        bot: bot.into(),
        restart_warning,
    }))
}

async fn delete_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.lifecycle.delete(user.id, bot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotResponse>, AppError> {
    let bot = state.lifecycle.start(user.id, bot_id).await?;
    Ok(Json(bot.into()))
}

async fn stop_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotResponse>, AppError> {
    let bot = state.lifecycle.stop(user.id, bot_id).await?;
    Ok(Json(bot.into()))
}

async fn restart_bot_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotResponse>, AppError> {
    let bot = state.lifecycle.restart(user.id, bot_id).await?;
    Ok(Json(bot.into()))
}

async fn bot_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotStatusResponse>, AppError> {
    let status = state.lifecycle.status(user.id, bot_id).await?;
    Ok(Json(status))
}
