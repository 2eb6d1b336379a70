//! Checkout, order history and admin status management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_core::{OrderStatus, Page};
use bazaar_db::{NewOrder, OrderItemRow, OrderRow, OrderWithItems};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::middleware::{CurrentUser, RequestId};

use super::{map_db_error, ApiError, ApiResponse, AppState};

const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Serialize)]
pub(super) struct OrderItem {
    id: i64,
    user_id: i64,
    kontragent_id: Option<i64>,
    address_id: Option<i64>,
    status: String,
    total: Decimal,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for OrderItem {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kontragent_id: row.kontragent_id,
            address_id: row.address_id,
            status: row.status,
            total: row.total,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct OrderLineItem {
    product_id: i64,
    title: String,
    price: Decimal,
    quantity: i32,
    subtotal: Decimal,
}

impl From<OrderItemRow> for OrderLineItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            subtotal: row.price * Decimal::from(row.quantity),
            product_id: row.product_id,
            title: row.title,
            price: row.price,
            quantity: row.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct OrderDetail {
    #[serde(flatten)]
    order: OrderItem,
    items: Vec<OrderLineItem>,
}

impl From<OrderWithItems> for OrderDetail {
    fn from(value: OrderWithItems) -> Self {
        Self {
            order: value.order.into(),
            items: value.items.into_iter().map(OrderLineItem::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct OrderPage {
    items: Vec<OrderItem>,
    page: i64,
    limit: i64,
}

impl OrderPage {
    fn new(rows: Vec<OrderRow>, page: Page) -> Self {
        Self {
            items: rows.into_iter().map(OrderItem::from).collect(),
            page: page.page,
            limit: page.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OrderListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct CheckoutRequest {
    pub kontragent_id: Option<i64>,
    pub address_id: Option<i64>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateStatusRequest {
    pub status: String,
}

fn parse_status(rid: &str, raw: &str) -> Result<OrderStatus, ApiError> {
    raw.trim()
        .to_lowercase()
        .parse()
        .map_err(|e: bazaar_core::OrderError| ApiError::new(rid, "validation_error", e.to_string()))
}

fn checkout_options(rid: &str, body: CheckoutRequest) -> Result<NewOrder, ApiError> {
    if body.address_id.is_some() && body.kontragent_id.is_none() {
        return Err(ApiError::new(
            rid,
            "validation_error",
            "address_id requires kontragent_id",
        ));
    }
    let comment = body
        .comment
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty());
    if comment
        .as_deref()
        .is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS)
    {
        return Err(ApiError::new(
            rid,
            "validation_error",
            format!("comment must be at most {MAX_COMMENT_CHARS} characters"),
        ));
    }
    Ok(NewOrder {
        kontragent_id: body.kontragent_id,
        address_id: body.address_id,
        comment,
    })
}

/// POST /orders
pub(super) async fn checkout(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    body: Option<Json<CheckoutRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetail>>), ApiError> {
    let rid = &req_id.0;
    let options = checkout_options(rid, body.map(|Json(b)| b).unwrap_or_default())?;

    let order = bazaar_db::create_order_from_cart(&state.pool, user.id, &options)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), order.into())),
    ))
}

/// GET /orders
pub(super) async fn list_my_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderPage>>, ApiError> {
    let page = Page::new(query.page, query.limit);
    let rows = bazaar_db::list_orders_for_user(&state.pool, user.id, page)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, OrderPage::new(rows, page))))
}

/// GET /orders/{id}
pub(super) async fn get_my_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<OrderDetail>>, ApiError> {
    let order = bazaar_db::get_order(&state.pool, id, Some(user.id))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(&req_id.0, "not_found", format!("order {id} not found")))?;
    Ok(Json(ApiResponse::new(req_id.0, order.into())))
}

/// GET /admin/orders?status=&page=&limit=
pub(super) async fn list_all_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderPage>>, ApiError> {
    let rid = &req_id.0;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_status(rid, s))
        .transpose()?;
    let page = Page::new(query.page, query.limit);

    let rows = bazaar_db::list_orders(&state.pool, status, page)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), OrderPage::new(rows, page))))
}

/// PATCH /admin/orders/{id}/status
pub(super) async fn update_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<OrderItem>>, ApiError> {
    let rid = &req_id.0;
    let next = parse_status(rid, &body.status)?;

    let row = bazaar_db::update_order_status(&state.pool, id, next)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}
