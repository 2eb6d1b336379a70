//! Registration, login and "who am I" for users and admins.

use axum::{extract::State, http::StatusCode, Extension, Json};
use bazaar_db::{AdminRow, UserRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password, Role};
use crate::middleware::{ClientIp, CurrentAdmin, CurrentUser, RequestId};

use super::{map_db_error, ApiError, ApiResponse, AppState};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize)]
pub(super) struct UserItem {
    id: i64,
    name: String,
    email: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserItem {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AdminItem {
    id: i64,
    username: String,
    created_at: DateTime<Utc>,
}

impl From<AdminRow> for AdminItem {
    fn from(row: AdminRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TokenResponse<T: Serialize> {
    token: String,
    token_type: &'static str,
    expires_in: i64,
    #[serde(flatten)]
    principal: T,
}

#[derive(Debug, Serialize)]
pub(super) struct UserSession {
    user: UserItem,
}

#[derive(Debug, Serialize)]
pub(super) struct AdminSession {
    admin: AdminItem,
}

#[derive(Debug, Deserialize)]
pub(super) struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct UserLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

fn invalid_credentials(rid: &str) -> ApiError {
    ApiError::new(rid, "unauthorized", "invalid credentials")
}

fn issue_token(state: &AppState, rid: &str, role: Role, id: i64) -> Result<String, ApiError> {
    state.auth.issue(role, id).map_err(|e| {
        tracing::error!(error = %e, "failed to sign token");
        ApiError::new(rid, "internal_error", "failed to issue token")
    })
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn hash_blocking(rid: &str, password: String) -> Result<String, ApiError> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password)).await;
    match hashed {
        Ok(Ok(hash)) => Ok(hash),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "password hashing failed");
            Err(ApiError::new(rid, "internal_error", "failed to hash password"))
        }
        Err(e) => {
            tracing::error!(error = %e, "password hashing task panicked");
            Err(ApiError::new(rid, "internal_error", "failed to hash password"))
        }
    }
}

async fn verify_blocking(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}

fn validate_registration(rid: &str, body: &RegisterRequest) -> Result<(), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::new(rid, "validation_error", "name must be non-empty"));
    }
    let email = body.email.trim();
    if email.len() < 3 || !email.contains('@') {
        return Err(ApiError::new(rid, "validation_error", "email is not valid"));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(
            rid,
            "validation_error",
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// POST /auth/register
pub(super) async fn register_user(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TokenResponse<UserSession>>>), ApiError> {
    let rid = &req_id.0;
    validate_registration(rid, &body)?;

    let email = body.email.trim().to_lowercase();
    let phone = body
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let hash = hash_blocking(rid, body.password).await?;

    let user = bazaar_db::create_user(&state.pool, body.name.trim(), &email, phone, &hash)
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                ApiError::new(rid, "conflict", "email is already registered")
            } else {
                map_db_error(rid.clone(), &e)
            }
        })?;

    tracing::info!(user_id = user.id, "user registered");
    let token = issue_token(&state, rid, Role::User, user.id)?;
    let data = TokenResponse {
        token,
        token_type: "Bearer",
        expires_in: state.auth.ttl_secs(),
        principal: UserSession { user: user.into() },
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), data)),
    ))
}

/// POST /auth/login (user)
pub(super) async fn login_user(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(body): Json<UserLoginRequest>,
) -> Result<Json<ApiResponse<TokenResponse<UserSession>>>, ApiError> {
    let rid = &req_id.0;
    let email = body.email.trim().to_lowercase();

    let user = bazaar_db::get_user_by_email(&state.pool, &email)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let verified = match &user {
        Some(user) => verify_blocking(body.password, user.password_hash.clone()).await,
        None => false,
    };
    let user = match user {
        Some(user) if verified => user,
        _ => {
            state.login_limit.record_failure(&ip).await;
            tracing::debug!(ip = %ip, "user login failed");
            return Err(invalid_credentials(rid));
        }
    };
    state.login_limit.clear(&ip).await;

    let token = issue_token(&state, rid, Role::User, user.id)?;
    let data = TokenResponse {
        token,
        token_type: "Bearer",
        expires_in: state.auth.ttl_secs(),
        principal: UserSession { user: user.into() },
    };
    Ok(Json(ApiResponse::new(req_id.0.clone(), data)))
}

/// GET /auth/me (user)
pub(super) async fn current_user(
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<ApiResponse<UserItem>> {
    Json(ApiResponse::new(req_id.0, user.into()))
}

/// POST /admin/auth/login
pub(super) async fn login_admin(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(body): Json<AdminLoginRequest>,
) -> Result<Json<ApiResponse<TokenResponse<AdminSession>>>, ApiError> {
    let rid = &req_id.0;
    let admin = bazaar_db::get_admin_by_username(&state.pool, body.username.trim())
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let verified = match &admin {
        Some(admin) => verify_blocking(body.password, admin.password_hash.clone()).await,
        None => false,
    };
    let admin = match admin {
        Some(admin) if verified => admin,
        _ => {
            state.login_limit.record_failure(&ip).await;
            tracing::warn!(ip = %ip, "admin login failed");
            return Err(invalid_credentials(rid));
        }
    };
    state.login_limit.clear(&ip).await;

    tracing::info!(admin_id = admin.id, "admin logged in");
    let token = issue_token(&state, rid, Role::Admin, admin.id)?;
    let data = TokenResponse {
        token,
        token_type: "Bearer",
        expires_in: state.auth.ttl_secs(),
        principal: AdminSession {
            admin: admin.into(),
        },
    };
    Ok(Json(ApiResponse::new(req_id.0.clone(), data)))
}

/// GET /admin/auth/me
pub(super) async fn current_admin(
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentAdmin(admin)): Extension<CurrentAdmin>,
) -> Json<ApiResponse<AdminItem>> {
    Json(ApiResponse::new(req_id.0, admin.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            password: password.to_string(),
        }
    }

    #[test]
    fn registration_accepts_reasonable_input() {
        assert!(validate_registration("rid", &request("Ann", "ann@example.com", "hunter22")).is_ok());
    }

    #[test]
    fn registration_rejects_blank_name_bad_email_and_short_password() {
        assert!(validate_registration("rid", &request(" ", "ann@example.com", "hunter22")).is_err());
        assert!(validate_registration("rid", &request("Ann", "example.com", "hunter22")).is_err());
        assert!(validate_registration("rid", &request("Ann", "ann@example.com", "short")).is_err());
    }

    #[test]
    fn user_item_hides_password_hash() {
        let row = UserRow {
            id: 1,
            name: "Ann".into(),
            email: "ann@example.com".into(),
            phone: None,
            password_hash: "$argon2id$secret".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&UserItem::from(row)).expect("serialize");
        assert!(!json.contains("argon2"));
        assert!(json.contains("ann@example.com"));
    }
}
