use axum::{
    extract::State,
    http::Method,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::governor::RateGovernor;
use crate::provisioning::local_runner::LocalRunner;
use crate::server::config::ServerConfig;
use crate::server::registry::BotRegistry;
use crate::services::auth_service;
use crate::services::lifecycle::BotLifecycle;
use crate::web::{
    error::AppError,
    middleware::{auth, rate_limit},
    models::{LoginRequest, RegisterRequest},
    routes::{bot_routes, webhook_routes},
};

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ServerConfig>,
    pub lifecycle: Arc<BotLifecycle>,
    pub governor: Arc<RateGovernor>,
    pub registry: Arc<BotRegistry>,
    /// Present only when the in-process runner backend is active; the
    /// dispatch route forwards inbound updates through it.
    pub local_runner: Option<Arc<LocalRunner>>,
}

async fn register_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<models::UserResponse>, AppError> {
    auth_service::register_user(&app_state.db, payload).await.map(Json)
}

async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login_response =
        auth_service::login_user(&app_state.db, payload, &app_state.config.jwt_secret).await?;

    let auth_cookie = Cookie::build(("token", login_response.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(true)
        .build();

    let mut response = Json(login_response).into_response();
    if let Ok(value) = auth_cookie.to_string().parse() {
        response
            .headers_mut()
            .insert(axum::http::header::SET_COOKIE, value);
    }
    Ok(response)
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/health", get(health_check_handler))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route(
            "/api/auth/me",
            get(auth_service::me)
                .route_layer(axum_middleware::from_fn_with_state(state.clone(), auth::auth)),
        )
        .nest(
            "/api/bots",
            bot_routes::bot_router()
                .route_layer(axum_middleware::from_fn_with_state(state.clone(), auth::auth)),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ));

    // The webhook surface sits outside auth and the per-identity limiter;
    // it has its own per-bot window.
    Router::new()
        .merge(api)
        .nest("/webhook", webhook_routes::webhook_router())
        .with_state(state)
        .layer(cors)
}
