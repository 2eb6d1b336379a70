//! Facet filters: public lookup and faceted product search, admin editing.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use bazaar_core::facets::{
    facet_views, matching_product_ids, parse_selected_options, select_node, FacetView, NodeSlug,
};
use bazaar_core::{Facet, FilterTarget, Page};
use bazaar_db::{CatalogFilterRow, DbError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::middleware::RequestId;

use super::products::ProductItem;
use super::{map_db_error, ApiError, ApiResponse, AppState, Paginated};

// ---------------------------------------------------------------------------
// Query / request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct NodeQuery {
    pub subcatalog: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FacetedSearchQuery {
    pub subcatalog: Option<String>,
    pub category: Option<String>,
    /// JSON array of selected option slugs.
    pub options: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A node's filter with per-option product counts.
#[derive(Debug, Serialize)]
pub(super) struct NodeFilter {
    filter_id: Option<i64>,
    facets: Vec<FacetView>,
}

impl NodeFilter {
    fn empty() -> Self {
        Self {
            filter_id: None,
            facets: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct FacetedProducts {
    #[serde(flatten)]
    products: Paginated<ProductItem>,
    filter: NodeFilter,
}

/// Raw filter row, option product lists included.
#[derive(Debug, Serialize)]
pub(super) struct FilterRowItem {
    id: i64,
    subcatalog_id: Option<i64>,
    category_id: Option<i64>,
    data: Vec<Facet>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CatalogFilterRow> for FilterRowItem {
    fn from(row: CatalogFilterRow) -> Self {
        Self {
            id: row.id,
            subcatalog_id: row.subcatalog_id,
            category_id: row.category_id,
            data: row.data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateFilterRequest {
    pub subcatalog_id: Option<i64>,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub data: Vec<Facet>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateFacetRequest {
    pub name: String,
    pub facet: Facet,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct DeleteFilterRequest {
    #[serde(default)]
    pub delete_filter: bool,
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve the query's slugs to a live node. Unknown slugs resolve to `None`.
async fn resolve_target(
    pool: &PgPool,
    subcatalog: Option<&str>,
    category: Option<&str>,
) -> Result<Option<FilterTarget>, DbError> {
    match select_node(subcatalog, category) {
        Some(NodeSlug::Category(slug)) => Ok(bazaar_db::resolve_category_by_slug(pool, slug)
            .await?
            .map(|row| FilterTarget::Category(row.id))),
        Some(NodeSlug::Subcatalog(slug)) => Ok(bazaar_db::resolve_subcatalog_by_slug(pool, slug)
            .await?
            .map(|row| FilterTarget::Subcatalog(row.id))),
        None => Ok(None),
    }
}

async fn node_filter(
    pool: &PgPool,
    target: FilterTarget,
    visible: &HashSet<i64>,
) -> Result<NodeFilter, DbError> {
    Ok(bazaar_db::get_live_filter_for_target(pool, target)
        .await?
        .map_or_else(NodeFilter::empty, |row| NodeFilter {
            filter_id: Some(row.id),
            facets: facet_views(&row.data.0, visible),
        }))
}

// ---------------------------------------------------------------------------
// Public handlers
// ---------------------------------------------------------------------------

/// GET /filters?subcatalog=&category=
pub(super) async fn get_node_filter(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<ApiResponse<NodeFilter>>, ApiError> {
    let rid = &req_id.0;
    let target = resolve_target(
        &state.pool,
        query.subcatalog.as_deref(),
        query.category.as_deref(),
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    let Some(target) = target else {
        return Ok(Json(ApiResponse::new(req_id.0.clone(), NodeFilter::empty())));
    };

    let visible: HashSet<i64> = bazaar_db::list_tagged_products(&state.pool, target)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .into_iter()
        .map(|p| p.id)
        .collect();
    let filter = node_filter(&state.pool, target, &visible)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse::new(req_id.0.clone(), filter)))
}

/// GET /products/filter?subcatalog=&category=&options=&page=&limit=
pub(super) async fn filter_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<FacetedSearchQuery>,
) -> Result<Json<ApiResponse<FacetedProducts>>, ApiError> {
    let rid = &req_id.0;
    let selected = parse_selected_options(query.options.as_deref())
        .map_err(|e| ApiError::new(rid, "bad_request", e.to_string()))?;
    let page = Page::new(query.page, query.limit);

    let target = resolve_target(
        &state.pool,
        query.subcatalog.as_deref(),
        query.category.as_deref(),
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    let Some(target) = target else {
        let empty = FacetedProducts {
            products: Paginated {
                items: Vec::new(),
                total: 0,
                page: page.page,
                limit: page.limit,
            },
            filter: NodeFilter::empty(),
        };
        return Ok(Json(ApiResponse::new(req_id.0.clone(), empty)));
    };

    let tagged = bazaar_db::list_tagged_products(&state.pool, target)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let matched = matching_product_ids(&tagged, &selected);
    let matched_set: HashSet<i64> = matched.iter().copied().collect();

    let rows = bazaar_db::list_products_by_ids(&state.pool, page.slice(&matched))
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let filter = node_filter(&state.pool, target, &matched_set)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::debug!(
        node = ?target,
        selected = selected.len(),
        matched = matched.len(),
        "faceted search"
    );

    let data = FacetedProducts {
        products: Paginated {
            items: rows.into_iter().map(ProductItem::from).collect(),
            total: i64::try_from(matched.len()).unwrap_or(i64::MAX),
            page: page.page,
            limit: page.limit,
        },
        filter,
    };
    Ok(Json(ApiResponse::new(req_id.0.clone(), data)))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

/// GET /admin/filters/{id}
pub(super) async fn get_filter(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<FilterRowItem>>, ApiError> {
    let row = bazaar_db::get_filter(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(&req_id.0, "not_found", format!("filter {id} not found")))?;

    Ok(Json(ApiResponse::new(req_id.0, row.into())))
}

/// POST /admin/filters
///
/// Creates the node's filter, or merges the facets into the live one.
pub(super) async fn create_filter(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateFilterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FilterRowItem>>), ApiError> {
    let rid = &req_id.0;
    let target = FilterTarget::from_ids(body.subcatalog_id, body.category_id)
        .map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))?;
    if body.data.is_empty() {
        return Err(ApiError::new(
            rid,
            "validation_error",
            "data must contain at least one facet",
        ));
    }

    let row = bazaar_db::create_or_merge_filter(&state.pool, target, body.data)
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                ApiError::new(rid, "conflict", "filter was created concurrently, retry")
            } else {
                map_db_error(rid.clone(), &e)
            }
        })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// PATCH /admin/filters/{id}
pub(super) async fn update_facet(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateFacetRequest>,
) -> Result<Json<ApiResponse<FilterRowItem>>, ApiError> {
    let row = bazaar_db::replace_facet(&state.pool, id, &body.name, body.facet)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, row.into())))
}

/// DELETE /admin/filters/{id}
///
/// `delete_filter: true` removes the whole row; otherwise the facet called
/// `name` is removed.
pub(super) async fn delete_filter(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    body: Option<Json<DeleteFilterRequest>>,
) -> Result<Response, ApiError> {
    let rid = &req_id.0;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    if body.delete_filter {
        bazaar_db::soft_delete_filter(&state.pool, id)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                rid,
                "validation_error",
                "name is required unless delete_filter is true",
            )
        })?;

    let row = bazaar_db::remove_facet(&state.pool, id, name)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(Json(ApiResponse::new(rid.clone(), FilterRowItem::from(row))).into_response())
}
