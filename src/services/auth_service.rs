use axum::{extract::Extension, Json};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use sea_orm::DatabaseConnection;

use crate::db::entities::user;
use crate::db::enums::UserStatus;
use crate::db::services::user_service;
use crate::web::error::AppError;
use crate::web::models::{
    AuthenticatedUser, Claims, LoginRequest, LoginResponse, RegisterRequest, UserResponse,
};

pub async fn register_user(
    db: &DatabaseConnection,
    req: RegisterRequest,
) -> Result<UserResponse, AppError> {
    if req.username.is_empty() || req.password.len() < 8 {
        return Err(AppError::InvalidInput(
            "username must not be empty and password needs at least 8 characters".to_string(),
        ));
    }

    if user_service::get_user_by_username(db, &req.username)
        .await?
        .is_some()
    {
        return Err(AppError::UserAlreadyExists(
            "username is already taken".to_string(),
        ));
    }

    let password_hash = hash(&req.password, DEFAULT_COST)
        .map_err(|e| AppError::PasswordHashingError(e.to_string()))?;

    let user_model = user_service::create_user(db, &req.username, &password_hash).await?;
    Ok(UserResponse {
        id: user_model.id,
        username: user_model.username,
        plan: user_model.plan,
    })
}

pub async fn login_user(
    db: &DatabaseConnection,
    req: LoginRequest,
    jwt_secret: &str,
) -> Result<LoginResponse, AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidInput(
            "username and password must not be empty".to_string(),
        ));
    }

    let user = user_service::get_user_by_username(db, &req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if user.status == UserStatus::Suspended {
        return Err(AppError::Unauthorized("account is suspended".to_string()));
    }

    let valid_password = verify(&req.password, &user.password_hash)
        .map_err(|e| AppError::InternalServerError(format!("password verification error: {e}")))?;
    if !valid_password {
        return Err(AppError::InvalidCredentials);
    }

    create_jwt_for_user(&user, jwt_secret)
}

pub fn create_jwt_for_user(
    user: &user::Model,
    jwt_secret: &str,
) -> Result<LoginResponse, AppError> {
    let expiration = (Utc::now() + Duration::hours(24)).timestamp() as usize;
    let claims = Claims {
        sub: user.username.clone(),
        user_id: user.id,
        plan: user.plan,
        exp: expiration,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_ref()),
    )
    .map_err(|e| AppError::TokenCreationError(e.to_string()))?;

    Ok(LoginResponse {
        token,
        user_id: user.id,
        username: user.username.clone(),
    })
}

pub async fn me(
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "id": user.id,
        "username": user.username,
        "plan": user.plan,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::PlanTier;
    use crate::web::middleware::auth::decode_claims;

    fn stored_user(plan: PlanTier) -> user::Model {
        let now = Utc::now();
        user::Model {
            id: 7,
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            plan,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn issued_tokens_carry_the_plan_tier() {
        let login = create_jwt_for_user(&stored_user(PlanTier::Pro), "secret").unwrap();

        let claims = decode_claims(&login.token, "secret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.plan, PlanTier::Pro);
        // The limiter reads the ceiling straight from these claims.
        assert_eq!(claims.plan.request_limit_per_minute(), 120);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let login = create_jwt_for_user(&stored_user(PlanTier::Free), "secret").unwrap();
        assert!(decode_claims(&login.token, "not-the-secret").is_err());
    }
}
