//! Product listing, lookup and admin maintenance.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_core::Page;
use bazaar_db::{NewProduct, ProductListFilters, ProductPatch, ProductRow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, require_title, resolve_slug, ApiError, ApiResponse, AppState, Paginated};

#[derive(Debug, Serialize)]
pub(super) struct ProductItem {
    id: i64,
    title: String,
    slug: String,
    description: Option<String>,
    price: Decimal,
    images: Vec<String>,
    catalog_id: i64,
    subcatalog_id: i64,
    category_id: i64,
    brand_id: Option<i64>,
    condition_id: Option<i64>,
    relevance_id: Option<i64>,
    category_filter: Vec<String>,
    subcatalog_filter: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for ProductItem {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            price: row.price,
            images: row.images,
            catalog_id: row.catalog_id,
            subcatalog_id: row.subcatalog_id,
            category_id: row.category_id,
            brand_id: row.brand_id,
            condition_id: row.condition_id,
            relevance_id: row.relevance_id,
            category_filter: row.category_filter,
            subcatalog_filter: row.subcatalog_filter,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ProductListQuery {
    pub catalog: Option<String>,
    pub subcatalog: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateProductRequest {
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub images: Vec<String>,
    pub catalog_id: i64,
    pub subcatalog_id: i64,
    pub category_id: i64,
    pub brand_id: Option<i64>,
    pub condition_id: Option<i64>,
    pub relevance_id: Option<i64>,
    #[serde(default)]
    pub category_filter: Vec<String>,
    #[serde(default)]
    pub subcatalog_filter: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct UpdateProductRequest {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub images: Option<Vec<String>>,
    pub catalog_id: Option<i64>,
    pub subcatalog_id: Option<i64>,
    pub category_id: Option<i64>,
    pub brand_id: Option<i64>,
    pub condition_id: Option<i64>,
    pub relevance_id: Option<i64>,
    pub category_filter: Option<Vec<String>>,
    pub subcatalog_filter: Option<Vec<String>>,
}

/// Trim, drop blanks and de-duplicate option slugs, keeping first-seen order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_owned());
        }
    }
    out
}

fn require_price(rid: &str, price: Decimal) -> Result<Decimal, ApiError> {
    if price.is_sign_negative() {
        return Err(ApiError::new(
            rid,
            "validation_error",
            "price must not be negative",
        ));
    }
    Ok(price)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn product_write_error(rid: &str, e: &bazaar_db::DbError) -> ApiError {
    if e.is_unique_violation() {
        return ApiError::new(rid, "conflict", "a product with that slug already exists");
    }
    map_db_error(rid.to_owned(), e)
}

/// GET /products (user and admin)
pub(super) async fn list_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<ApiResponse<Paginated<ProductItem>>>, ApiError> {
    let page = Page::new(query.page, query.limit);
    let filters = ProductListFilters {
        catalog_slug: non_blank(query.catalog),
        subcatalog_slug: non_blank(query.subcatalog),
        category_slug: non_blank(query.category),
        search: non_blank(query.search),
    };

    let (rows, total) = bazaar_db::list_products(&state.pool, &filters, page)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = Paginated {
        items: rows.into_iter().map(ProductItem::from).collect(),
        total,
        page: page.page,
        limit: page.limit,
    };
    Ok(Json(ApiResponse::new(req_id.0, data)))
}

/// GET /products/{slug}
pub(super) async fn get_product_by_slug(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<ProductItem>>, ApiError> {
    let row = bazaar_db::get_product_by_slug(&state.pool, &slug)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(&req_id.0, "not_found", format!("product '{slug}' not found")))?;

    Ok(Json(ApiResponse::new(req_id.0, row.into())))
}

/// POST /admin/products
pub(super) async fn create_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductItem>>), ApiError> {
    let rid = &req_id.0;
    let title = require_title(rid, "title", &body.title)?;
    let slug = resolve_slug(rid, &title, body.slug.as_deref())?;
    let price = require_price(rid, body.price)?;

    let product = NewProduct {
        title,
        slug,
        description: non_blank(body.description),
        price,
        images: body.images,
        catalog_id: body.catalog_id,
        subcatalog_id: body.subcatalog_id,
        category_id: body.category_id,
        brand_id: body.brand_id,
        condition_id: body.condition_id,
        relevance_id: body.relevance_id,
        category_filter: normalize_tags(body.category_filter),
        subcatalog_filter: normalize_tags(body.subcatalog_filter),
    };

    let row = bazaar_db::create_product(&state.pool, product)
        .await
        .map_err(|e| product_write_error(rid, &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// PATCH /admin/products/{id}
pub(super) async fn update_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductItem>>, ApiError> {
    let rid = &req_id.0;
    let title = body
        .title
        .as_deref()
        .map(|t| require_title(rid, "title", t))
        .transpose()?;
    let slug = body
        .slug
        .as_deref()
        .map(|s| resolve_slug(rid, title.as_deref().unwrap_or_default(), Some(s)))
        .transpose()?;
    let price = body.price.map(|p| require_price(rid, p)).transpose()?;

    let patch = ProductPatch {
        title,
        slug,
        description: body.description.map(|d| d.trim().to_owned()),
        price,
        images: body.images,
        catalog_id: body.catalog_id,
        subcatalog_id: body.subcatalog_id,
        category_id: body.category_id,
        brand_id: body.brand_id,
        condition_id: body.condition_id,
        relevance_id: body.relevance_id,
        category_filter: body.category_filter.map(normalize_tags),
        subcatalog_filter: body.subcatalog_filter.map(normalize_tags),
    };

    let row = bazaar_db::update_product(&state.pool, id, patch)
        .await
        .map_err(|e| product_write_error(rid, &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}

/// DELETE /admin/products/{id}
pub(super) async fn delete_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    tracing::info!(product_id = id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}
