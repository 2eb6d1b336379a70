use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bazaar_db::{AdminRow, UserRow};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::auth::Role;

const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Client address used to key the login limiter.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// The authenticated shopper, loaded fresh for every request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRow);

/// The authenticated admin, loaded fresh for every request.
#[derive(Debug, Clone)]
pub struct CurrentAdmin(pub AdminRow);

#[derive(Debug, Clone)]
struct FailureWindow {
    started_at: Instant,
    count: u32,
}

/// Per-IP failed-login counter with a fixed window.
///
/// Only failures count. A client reaching `max_failures` inside one window is
/// refused until the window expires; a successful login clears its entry.
#[derive(Debug, Clone)]
pub struct LoginRateLimit {
    max_failures: u32,
    window: Duration,
    state: Arc<Mutex<HashMap<String, FailureWindow>>>,
}

impl LoginRateLimit {
    #[must_use]
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &bazaar_core::AppConfig) -> Self {
        Self::new(
            config.login_max_attempts,
            Duration::from_secs(config.login_window_secs),
        )
    }

    /// `true` if `ip` has used up its failures for the current window.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        let mut map = self.state.lock().await;
        let expired = map
            .get(ip)
            .is_some_and(|entry| entry.started_at.elapsed() >= self.window);
        if expired {
            map.remove(ip);
            return false;
        }
        map.get(ip)
            .is_some_and(|entry| entry.count >= self.max_failures)
    }

    pub async fn record_failure(&self, ip: &str) {
        let mut map = self.state.lock().await;
        if map.len() >= MAX_TRACKED_CLIENTS {
            let window = self.window;
            map.retain(|_, entry| entry.started_at.elapsed() < window);
        }

        let entry = map.entry(ip.to_owned()).or_insert_with(|| FailureWindow {
            started_at: Instant::now(),
            count: 0,
        });
        if entry.started_at.elapsed() >= self.window {
            entry.started_at = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;

        if entry.count >= self.max_failures {
            tracing::warn!(ip, failures = entry.count, "login rate limit reached");
        }
    }

    pub async fn clear(&self, ip: &str) {
        self.state.lock().await.remove(ip);
    }
}

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Middleware for login routes: refuses blocked clients with 429 and hands
/// the client address to the handler as [`ClientIp`].
pub async fn guard_login(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let ip = extract_ip(&req);
    if state.login_limit.is_blocked(&ip).await {
        return ApiError::new(
            request_id_of(&req),
            "rate_limited",
            "too many failed login attempts, try again later",
        )
        .into_response();
    }

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

/// Middleware requiring a valid admin token whose admin still exists.
pub async fn require_admin(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let rid = request_id_of(&req);
    let Some(admin_id) = bearer_subject(&state, Role::Admin, &req) else {
        return unauthorized(rid);
    };

    match bazaar_db::get_admin(&state.pool, admin_id).await {
        Ok(Some(admin)) => {
            req.extensions_mut().insert(CurrentAdmin(admin));
            next.run(req).await
        }
        Ok(None) => {
            tracing::debug!(admin_id, "token for missing or deleted admin");
            unauthorized(rid)
        }
        Err(e) => crate::api::map_db_error(rid, &e).into_response(),
    }
}

/// Middleware requiring a valid user token whose user still exists.
pub async fn require_user(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let rid = request_id_of(&req);
    let Some(user_id) = bearer_subject(&state, Role::User, &req) else {
        return unauthorized(rid);
    };

    match bazaar_db::get_user(&state.pool, user_id).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Ok(None) => {
            tracing::debug!(user_id, "token for missing or deleted user");
            unauthorized(rid)
        }
        Err(e) => crate::api::map_db_error(rid, &e).into_response(),
    }
}

fn bearer_subject(state: &AppState, role: Role, req: &Request) -> Option<i64> {
    let token = extract_bearer_token(req.headers().get(AUTHORIZATION))?;
    state.auth.verify(role, token)
}

fn unauthorized(request_id: String) -> Response {
    ApiError::new(request_id, "unauthorized", "missing or invalid bearer token").into_response()
}

fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default()
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

/// Client IP: first `x-forwarded-for` entry, then the peer address.
fn extract_ip(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |ci| ci.0.ip().to_string())
}
