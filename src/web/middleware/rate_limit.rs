use axum::{
    body::Body as AxumBody,
    extract::{ConnectInfo, State},
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::web::middleware::auth::decode_claims;
use crate::web::{error::AppError, AppState};

/// Ceiling applied to callers we cannot attribute to an account.
const ANONYMOUS_LIMIT_PER_MINUTE: usize = 20;

/// Sliding-window limiter over every API route. Authenticated callers are
/// keyed by user id with the plan ceiling baked into their token; everyone
/// else by peer address. Runs before the auth middleware, so attribution is
/// a best-effort token decode here rather than a hard requirement.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .and_then(|token| decode_claims(token, &state.config.jwt_secret).ok());

    let (identity, limit) = match claims {
        Some(claims) => (
            format!("user:{}", claims.user_id),
            claims.plan.request_limit_per_minute(),
        ),
        None => (format!("ip:{}", peer.ip()), ANONYMOUS_LIMIT_PER_MINUTE),
    };

    state
        .governor
        .check_request(&identity, limit)
        .await
        .map_err(|retry| AppError::RateLimited {
            retry_after_seconds: retry.seconds,
        })?;

    Ok(next.run(req).await)
}
