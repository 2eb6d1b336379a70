//! The signed-in user's cart and saved products.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_core::orders::validate_quantity;
use bazaar_db::CartLineRow;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::middleware::{CurrentUser, RequestId};

use super::products::ProductItem;
use super::{map_db_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub(super) struct CartLineItem {
    product_id: i64,
    slug: String,
    title: String,
    price: Decimal,
    images: Vec<String>,
    quantity: i32,
    subtotal: Decimal,
}

impl From<CartLineRow> for CartLineItem {
    fn from(row: CartLineRow) -> Self {
        Self {
            subtotal: row.price * Decimal::from(row.quantity),
            product_id: row.product_id,
            slug: row.slug,
            title: row.title,
            price: row.price,
            images: row.images,
            quantity: row.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CartView {
    items: Vec<CartLineItem>,
    total: Decimal,
}

impl From<Vec<CartLineRow>> for CartView {
    fn from(rows: Vec<CartLineRow>) -> Self {
        let items: Vec<CartLineItem> = rows.into_iter().map(CartLineItem::from).collect();
        let total = items.iter().map(|line| line.subtotal).sum();
        Self { items, total }
    }
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub(super) struct AddToCartRequest {
    pub product_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct SetQuantityRequest {
    pub quantity: i64,
}

fn checked_quantity(rid: &str, quantity: i64) -> Result<i32, ApiError> {
    validate_quantity(quantity).map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))
}

async fn cart_view(state: &AppState, rid: &str, user_id: i64) -> Result<CartView, ApiError> {
    bazaar_db::list_cart(&state.pool, user_id)
        .await
        .map(CartView::from)
        .map_err(|e| map_db_error(rid.to_owned(), &e))
}

/// GET /cart
pub(super) async fn list_cart(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let view = cart_view(&state, &req_id.0, user.id).await?;
    Ok(Json(ApiResponse::new(req_id.0, view)))
}

/// POST /cart
///
/// Adds to an existing line; the line total is capped rather than rejected.
pub(super) async fn add_to_cart(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<AddToCartRequest>,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let rid = &req_id.0;
    let quantity = checked_quantity(rid, body.quantity)?;

    let stored = bazaar_db::add_to_cart(&state.pool, user.id, body.product_id, quantity)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    tracing::debug!(user_id = user.id, product_id = body.product_id, quantity = stored, "cart line updated");

    let view = cart_view(&state, rid, user.id).await?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), view)))
}

/// PATCH /cart/{product_id}
pub(super) async fn set_quantity(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<i64>,
    Json(body): Json<SetQuantityRequest>,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let rid = &req_id.0;
    let quantity = checked_quantity(rid, body.quantity)?;

    bazaar_db::set_cart_quantity(&state.pool, user.id, product_id, quantity)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let view = cart_view(&state, rid, user.id).await?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), view)))
}

/// DELETE /cart/{product_id}
pub(super) async fn remove_from_cart(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::remove_from_cart(&state.pool, user.id, product_id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /saved
pub(super) async fn list_saved(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<ProductItem>>>, ApiError> {
    let rows = bazaar_db::list_saved_products(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let data = rows.into_iter().map(ProductItem::from).collect();
    Ok(Json(ApiResponse::new(req_id.0, data)))
}

/// PUT /saved/{product_id}
pub(super) async fn save_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::save_product(&state.pool, user.id, product_id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /saved/{product_id}
pub(super) async fn unsave_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::unsave_product(&state.pool, user.id, product_id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}
