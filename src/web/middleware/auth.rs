use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::sync::Arc;
use tracing::warn;

use crate::web::models::{AuthenticatedUser, Claims};
use crate::web::{error::AppError, AppState};

/// Pulls the JWT out of the Authorization header, or the `token` cookie
/// when the header is absent. Browser clients ride on the cookie, API
/// clients on the header.
fn token_from_request(req: &Request<AxumBody>, jar: &CookieJar) -> Option<String> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    bearer.or_else(|| jar.get("token").map(|cookie| cookie.value().to_string()))
}

pub fn decode_claims(token: &str, jwt_secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let token = token_from_request(&req, &jar).ok_or(AppError::InvalidCredentials)?;

    let claims = decode_claims(&token, &state.config.jwt_secret).map_err(|e| {
        warn!(error = ?e, "rejected request with undecodable token");
        AppError::InvalidCredentials
    })?;

    req.extensions_mut().insert(AuthenticatedUser {
        id: claims.user_id,
        username: claims.sub,
        plan: claims.plan,
    });
    Ok(next.run(req).await)
}
