//! Catalog hierarchy: public tree reads and admin writes for catalogs,
//! subcatalogs and categories.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_db::{CatalogNodeRow, CatalogTree, CategoryRow, SubcatalogRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, require_title, resolve_slug, ApiError, ApiResponse, AppState};

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct CatalogItem {
    id: i64,
    title: String,
    slug: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct SubcatalogItem {
    id: i64,
    catalog_id: i64,
    title: String,
    slug: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct CategoryItem {
    id: i64,
    subcatalog_id: i64,
    title: String,
    slug: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct SubcatalogTreeItem {
    #[serde(flatten)]
    subcatalog: SubcatalogItem,
    categories: Vec<CategoryItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct CatalogTreeItem {
    #[serde(flatten)]
    catalog: CatalogItem,
    subcatalogs: Vec<SubcatalogTreeItem>,
}

impl From<CatalogNodeRow> for CatalogItem {
    fn from(row: CatalogNodeRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<SubcatalogRow> for SubcatalogItem {
    fn from(row: SubcatalogRow) -> Self {
        Self {
            id: row.id,
            catalog_id: row.catalog_id,
            title: row.title,
            slug: row.slug,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<CategoryRow> for CategoryItem {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            subcatalog_id: row.subcatalog_id,
            title: row.title,
            slug: row.slug,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<CatalogTree> for CatalogTreeItem {
    fn from(tree: CatalogTree) -> Self {
        Self {
            catalog: tree.catalog.into(),
            subcatalogs: tree
                .subcatalogs
                .into_iter()
                .map(|sub| SubcatalogTreeItem {
                    subcatalog: sub.subcatalog.into(),
                    categories: sub.categories.into_iter().map(CategoryItem::from).collect(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct CreateCatalogRequest {
    pub title: String,
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateSubcatalogRequest {
    pub catalog_id: i64,
    pub title: String,
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateCategoryRequest {
    pub subcatalog_id: i64,
    pub title: String,
    pub slug: Option<String>,
}

/// Shared PATCH body for all three levels.
#[derive(Debug, Deserialize)]
pub(super) struct UpdateNodeRequest {
    pub title: Option<String>,
    pub slug: Option<String>,
}

impl UpdateNodeRequest {
    /// Validate present fields. A new title without a slug keeps the old slug.
    fn validated(&self, rid: &str) -> Result<(Option<String>, Option<String>), ApiError> {
        let title = self
            .title
            .as_deref()
            .map(|t| require_title(rid, "title", t))
            .transpose()?;
        let slug = self
            .slug
            .as_deref()
            .map(|s| resolve_slug(rid, title.as_deref().unwrap_or_default(), Some(s)))
            .transpose()?;
        Ok((title, slug))
    }
}

fn slug_conflict(rid: &str, e: &bazaar_db::DbError) -> ApiError {
    if e.is_unique_violation() {
        return ApiError::new(rid, "conflict", "that slug is already taken");
    }
    map_db_error(rid.to_owned(), e)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /catalog/with-subcatalogs and GET /admin/catalogs
pub(super) async fn list_catalog_tree(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<CatalogTreeItem>>>, ApiError> {
    let trees = bazaar_db::list_catalog_tree(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = trees.into_iter().map(CatalogTreeItem::from).collect();
    Ok(Json(ApiResponse::new(req_id.0, data)))
}

/// GET /catalog/{slug}
pub(super) async fn get_catalog_tree(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<CatalogTreeItem>>, ApiError> {
    let tree = bazaar_db::get_catalog_tree_by_slug(&state.pool, &slug)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(&req_id.0, "not_found", format!("catalog '{slug}' not found")))?;

    Ok(Json(ApiResponse::new(req_id.0, tree.into())))
}

/// POST /admin/catalogs
pub(super) async fn create_catalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateCatalogRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CatalogItem>>), ApiError> {
    let rid = &req_id.0;
    let title = require_title(rid, "title", &body.title)?;
    let slug = resolve_slug(rid, &title, body.slug.as_deref())?;

    let row = bazaar_db::create_catalog(&state.pool, &title, &slug)
        .await
        .map_err(|e| slug_conflict(rid, &e))?;

    tracing::info!(catalog_id = row.id, slug = %row.slug, "catalog created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// PATCH /admin/catalogs/{id}
pub(super) async fn update_catalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateNodeRequest>,
) -> Result<Json<ApiResponse<CatalogItem>>, ApiError> {
    let rid = &req_id.0;
    let (title, slug) = body.validated(rid)?;

    let row = bazaar_db::update_catalog(&state.pool, id, title.as_deref(), slug.as_deref())
        .await
        .map_err(|e| slug_conflict(rid, &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}

/// DELETE /admin/catalogs/{id}
pub(super) async fn delete_catalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_catalog(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/subcatalogs
pub(super) async fn create_subcatalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateSubcatalogRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubcatalogItem>>), ApiError> {
    let rid = &req_id.0;
    let title = require_title(rid, "title", &body.title)?;
    let slug = resolve_slug(rid, &title, body.slug.as_deref())?;

    let row = bazaar_db::create_subcatalog(&state.pool, body.catalog_id, &title, &slug)
        .await
        .map_err(|e| slug_conflict(rid, &e))?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// PATCH /admin/subcatalogs/{id}
pub(super) async fn update_subcatalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateNodeRequest>,
) -> Result<Json<ApiResponse<SubcatalogItem>>, ApiError> {
    let rid = &req_id.0;
    let (title, slug) = body.validated(rid)?;

    let row = bazaar_db::update_subcatalog(&state.pool, id, title.as_deref(), slug.as_deref())
        .await
        .map_err(|e| slug_conflict(rid, &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}

/// DELETE /admin/subcatalogs/{id}
pub(super) async fn delete_subcatalog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_subcatalog(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/categories
pub(super) async fn create_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CategoryItem>>), ApiError> {
    let rid = &req_id.0;
    let title = require_title(rid, "title", &body.title)?;
    let slug = resolve_slug(rid, &title, body.slug.as_deref())?;

    let row = bazaar_db::create_category(&state.pool, body.subcatalog_id, &title, &slug)
        .await
        .map_err(|e| slug_conflict(rid, &e))?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// PATCH /admin/categories/{id}
pub(super) async fn update_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateNodeRequest>,
) -> Result<Json<ApiResponse<CategoryItem>>, ApiError> {
    let rid = &req_id.0;
    let (title, slug) = body.validated(rid)?;

    let row = bazaar_db::update_category(&state.pool, id, title.as_deref(), slug.as_deref())
        .await
        .map_err(|e| slug_conflict(rid, &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}

/// DELETE /admin/categories/{id}
pub(super) async fn delete_category(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_category(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}
