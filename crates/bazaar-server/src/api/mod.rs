mod cart;
mod catalog;
mod filters;
mod kontragents;
mod orders;
mod products;
mod session;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post, put},
    Extension, Json, Router,
};
use bazaar_core::{FilterError, OrderError};
use bazaar_db::DbError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::AuthState;
use crate::middleware::{
    guard_login, request_id, require_admin, require_user, LoginRateLimit, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub auth: AuthState,
    pub login_limit: LoginRateLimit,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// One page of a list plus the numbers needed to page through the rest.
#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(request_id: String, data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta::new(request_id),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Translate a database-layer error into the client-facing error.
///
/// Only unexpected failures are logged; their details never reach the client.
pub(crate) fn map_db_error(request_id: String, error: &DbError) -> ApiError {
    match error {
        DbError::NotFound => ApiError::new(request_id, "not_found", "resource not found"),
        DbError::Conflict(message) => ApiError::new(request_id, "conflict", message.clone()),
        DbError::Invalid(message) => {
            ApiError::new(request_id, "validation_error", message.clone())
        }
        DbError::Filter(e @ FilterError::FacetNotFound(_)) => {
            ApiError::new(request_id, "not_found", e.to_string())
        }
        DbError::Filter(e @ FilterError::DuplicateFacet(_)) => {
            ApiError::new(request_id, "conflict", e.to_string())
        }
        DbError::Filter(e) => ApiError::new(request_id, "validation_error", e.to_string()),
        DbError::Order(e @ OrderError::InvalidTransition { .. }) => {
            ApiError::new(request_id, "conflict", e.to_string())
        }
        DbError::Order(e) => ApiError::new(request_id, "validation_error", e.to_string()),
        e if e.is_unique_violation() => {
            ApiError::new(request_id, "conflict", "a record with that value already exists")
        }
        e => {
            tracing::error!(error = %e, "database query failed");
            ApiError::new(request_id, "internal_error", "database query failed")
        }
    }
}

/// Use the supplied slug, or derive one from the title.
pub(super) fn resolve_slug(
    request_id: &str,
    title: &str,
    slug: Option<&str>,
) -> Result<String, ApiError> {
    let slug = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(explicit) => explicit.to_lowercase(),
        None => bazaar_core::slug::slug_from_title(title),
    };
    if bazaar_core::slug::is_valid_slug(&slug) {
        Ok(slug)
    } else {
        Err(ApiError::new(
            request_id,
            "validation_error",
            format!("'{slug}' is not a valid slug"),
        ))
    }
}

/// Trimmed, non-empty title of at most 200 characters.
pub(super) fn require_title(request_id: &str, field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > 200 {
        return Err(ApiError::new(
            request_id,
            "validation_error",
            format!("{field} must be 1-200 characters"),
        ));
    }
    Ok(value.to_owned())
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

/// Shopper-facing routes. Mounted under both `/api/v1/user` and
/// `/api/v1/mobile`.
fn user_router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route(
            "/catalog/with-subcatalogs",
            get(catalog::list_catalog_tree),
        )
        .route("/catalog/{slug}", get(catalog::get_catalog_tree))
        .route("/filters", get(filters::get_node_filter))
        .route("/products", get(products::list_products))
        .route("/products/filter", get(filters::filter_products))
        .route("/products/{slug}", get(products::get_product_by_slug))
        .route("/auth/register", post(session::register_user));

    let login = Router::new()
        .route("/auth/login", post(session::login_user))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            guard_login,
        ));

    let protected = Router::new()
        .route("/auth/me", get(session::current_user))
        .route(
            "/kontragents",
            get(kontragents::list_kontragents).post(kontragents::create_kontragent),
        )
        .route(
            "/kontragents/{id}",
            patch(kontragents::update_kontragent).delete(kontragents::delete_kontragent),
        )
        .route(
            "/kontragents/{id}/favorite",
            put(kontragents::set_favorite),
        )
        .route(
            "/kontragents/{id}/addresses",
            get(kontragents::list_addresses).post(kontragents::create_address),
        )
        .route(
            "/kontragents/{id}/addresses/{address_id}",
            axum::routing::delete(kontragents::delete_address),
        )
        .route(
            "/kontragents/{id}/addresses/{address_id}/main",
            put(kontragents::set_main_address),
        )
        .route("/cart", get(cart::list_cart).post(cart::add_to_cart))
        .route(
            "/cart/{product_id}",
            patch(cart::set_quantity).delete(cart::remove_from_cart),
        )
        .route("/saved", get(cart::list_saved))
        .route(
            "/saved/{product_id}",
            put(cart::save_product).delete(cart::unsave_product),
        )
        .route("/orders", get(orders::list_my_orders).post(orders::checkout))
        .route("/orders/{id}", get(orders::get_my_order))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_user,
        ));

    Router::new().merge(public).merge(login).merge(protected)
}

fn admin_router(state: &AppState) -> Router<AppState> {
    let login = Router::new()
        .route("/auth/login", post(session::login_admin))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            guard_login,
        ));

    let protected = Router::new()
        .route("/auth/me", get(session::current_admin))
        .route(
            "/catalogs",
            get(catalog::list_catalog_tree).post(catalog::create_catalog),
        )
        .route(
            "/catalogs/{id}",
            patch(catalog::update_catalog).delete(catalog::delete_catalog),
        )
        .route("/subcatalogs", post(catalog::create_subcatalog))
        .route(
            "/subcatalogs/{id}",
            patch(catalog::update_subcatalog).delete(catalog::delete_subcatalog),
        )
        .route("/categories", post(catalog::create_category))
        .route(
            "/categories/{id}",
            patch(catalog::update_category).delete(catalog::delete_category),
        )
        .route("/filters", post(filters::create_filter))
        .route(
            "/filters/{id}",
            get(filters::get_filter)
                .patch(filters::update_facet)
                .delete(filters::delete_filter),
        )
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/products/{id}",
            patch(products::update_product).delete(products::delete_product),
        )
        .route("/orders", get(orders::list_all_orders))
        .route("/orders/{id}/status", patch(orders::update_status))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new().merge(login).merge(protected)
}

pub fn build_app(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1/user", user_router(&state))
        .nest("/api/v1/mobile", user_router(&state))
        .nest("/api/v1/admin", admin_router(&state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match bazaar_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}
