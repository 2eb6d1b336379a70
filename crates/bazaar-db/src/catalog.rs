//! Database operations for the `catalogs`, `subcatalogs` and `categories`
//! hierarchy.
//!
//! Deletes are soft. Deleting a node also soft-deletes everything below it
//! (child nodes, their products and filter rows) in one transaction, so every
//! read only has to check its own `deleted_at`.

use std::collections::HashMap;

use bazaar_core::FilterTarget;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::filters::{self, IndexUpdate};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `catalogs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogNodeRow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `subcatalogs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubcatalogRow {
    pub id: i64,
    pub catalog_id: i64,
    pub title: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `categories` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub subcatalog_id: i64,
    pub title: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubcatalogTree {
    pub subcatalog: SubcatalogRow,
    pub categories: Vec<CategoryRow>,
}

#[derive(Debug, Clone)]
pub struct CatalogTree {
    pub catalog: CatalogNodeRow,
    pub subcatalogs: Vec<SubcatalogTree>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Returns all live catalogs, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_catalogs(pool: &PgPool) -> Result<Vec<CatalogNodeRow>, DbError> {
    let rows = sqlx::query_as::<_, CatalogNodeRow>(
        "SELECT id, title, slug, created_at, updated_at \
         FROM catalogs \
         WHERE deleted_at IS NULL \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns every live catalog with its live subcatalogs and categories.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any query fails.
pub async fn list_catalog_tree(pool: &PgPool) -> Result<Vec<CatalogTree>, DbError> {
    let catalogs = list_catalogs(pool).await?;
    assemble_trees(pool, catalogs).await
}

/// Returns one live catalog tree by slug, or `None`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any query fails.
pub async fn get_catalog_tree_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<CatalogTree>, DbError> {
    let catalog = sqlx::query_as::<_, CatalogNodeRow>(
        "SELECT id, title, slug, created_at, updated_at \
         FROM catalogs \
         WHERE slug = $1 AND deleted_at IS NULL",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    let Some(catalog) = catalog else {
        return Ok(None);
    };
    Ok(assemble_trees(pool, vec![catalog]).await?.pop())
}

async fn assemble_trees(
    pool: &PgPool,
    catalogs: Vec<CatalogNodeRow>,
) -> Result<Vec<CatalogTree>, DbError> {
    let catalog_ids: Vec<i64> = catalogs.iter().map(|c| c.id).collect();

    let subcatalogs = sqlx::query_as::<_, SubcatalogRow>(
        "SELECT id, catalog_id, title, slug, created_at, updated_at \
         FROM subcatalogs \
         WHERE catalog_id = ANY($1) AND deleted_at IS NULL \
         ORDER BY id",
    )
    .bind(&catalog_ids)
    .fetch_all(pool)
    .await?;

    let subcatalog_ids: Vec<i64> = subcatalogs.iter().map(|s| s.id).collect();

    let categories = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, subcatalog_id, title, slug, created_at, updated_at \
         FROM categories \
         WHERE subcatalog_id = ANY($1) AND deleted_at IS NULL \
         ORDER BY id",
    )
    .bind(&subcatalog_ids)
    .fetch_all(pool)
    .await?;

    let mut categories_by_parent: HashMap<i64, Vec<CategoryRow>> = HashMap::new();
    for category in categories {
        categories_by_parent
            .entry(category.subcatalog_id)
            .or_default()
            .push(category);
    }

    let mut subcatalogs_by_parent: HashMap<i64, Vec<SubcatalogTree>> = HashMap::new();
    for subcatalog in subcatalogs {
        let categories = categories_by_parent
            .remove(&subcatalog.id)
            .unwrap_or_default();
        subcatalogs_by_parent
            .entry(subcatalog.catalog_id)
            .or_default()
            .push(SubcatalogTree {
                subcatalog,
                categories,
            });
    }

    Ok(catalogs
        .into_iter()
        .map(|catalog| CatalogTree {
            subcatalogs: subcatalogs_by_parent.remove(&catalog.id).unwrap_or_default(),
            catalog,
        })
        .collect())
}

/// Resolves a live subcatalog by slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn resolve_subcatalog_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<SubcatalogRow>, DbError> {
    let row = sqlx::query_as::<_, SubcatalogRow>(
        "SELECT id, catalog_id, title, slug, created_at, updated_at \
         FROM subcatalogs \
         WHERE slug = $1 AND deleted_at IS NULL",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Resolves a live category by slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn resolve_category_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<CategoryRow>, DbError> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, subcatalog_id, title, slug, created_at, updated_at \
         FROM categories \
         WHERE slug = $1 AND deleted_at IS NULL",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Inserts a catalog.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on failure, including slug unique violations.
pub async fn create_catalog(
    pool: &PgPool,
    title: &str,
    slug: &str,
) -> Result<CatalogNodeRow, DbError> {
    let row = sqlx::query_as::<_, CatalogNodeRow>(
        "INSERT INTO catalogs (title, slug) VALUES ($1, $2) \
         RETURNING id, title, slug, created_at, updated_at",
    )
    .bind(title)
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Inserts a subcatalog under a live catalog.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the catalog is missing or deleted, or
/// [`DbError::Sqlx`] on failure.
pub async fn create_subcatalog(
    pool: &PgPool,
    catalog_id: i64,
    title: &str,
    slug: &str,
) -> Result<SubcatalogRow, DbError> {
    sqlx::query_as::<_, SubcatalogRow>(
        "INSERT INTO subcatalogs (catalog_id, title, slug) \
         SELECT $1, $2, $3 \
         WHERE EXISTS (SELECT 1 FROM catalogs WHERE id = $1 AND deleted_at IS NULL) \
         RETURNING id, catalog_id, title, slug, created_at, updated_at",
    )
    .bind(catalog_id)
    .bind(title)
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Inserts a category under a live subcatalog.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the subcatalog is missing or deleted, or
/// [`DbError::Sqlx`] on failure.
pub async fn create_category(
    pool: &PgPool,
    subcatalog_id: i64,
    title: &str,
    slug: &str,
) -> Result<CategoryRow, DbError> {
    sqlx::query_as::<_, CategoryRow>(
        "INSERT INTO categories (subcatalog_id, title, slug) \
         SELECT $1, $2, $3 \
         WHERE EXISTS (SELECT 1 FROM subcatalogs WHERE id = $1 AND deleted_at IS NULL) \
         RETURNING id, subcatalog_id, title, slug, created_at, updated_at",
    )
    .bind(subcatalog_id)
    .bind(title)
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Updates a live catalog's title and/or slug; `None` keeps the current value.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the catalog is missing or deleted.
pub async fn update_catalog(
    pool: &PgPool,
    id: i64,
    title: Option<&str>,
    slug: Option<&str>,
) -> Result<CatalogNodeRow, DbError> {
    sqlx::query_as::<_, CatalogNodeRow>(
        "UPDATE catalogs \
         SET title = COALESCE($2, title), slug = COALESCE($3, slug), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL \
         RETURNING id, title, slug, created_at, updated_at",
    )
    .bind(id)
    .bind(title)
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Updates a live subcatalog's title and/or slug.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the subcatalog is missing or deleted.
pub async fn update_subcatalog(
    pool: &PgPool,
    id: i64,
    title: Option<&str>,
    slug: Option<&str>,
) -> Result<SubcatalogRow, DbError> {
    sqlx::query_as::<_, SubcatalogRow>(
        "UPDATE subcatalogs \
         SET title = COALESCE($2, title), slug = COALESCE($3, slug), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL \
         RETURNING id, catalog_id, title, slug, created_at, updated_at",
    )
    .bind(id)
    .bind(title)
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Updates a live category's title and/or slug.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the category is missing or deleted.
pub async fn update_category(
    pool: &PgPool,
    id: i64,
    title: Option<&str>,
    slug: Option<&str>,
) -> Result<CategoryRow, DbError> {
    sqlx::query_as::<_, CategoryRow>(
        "UPDATE categories \
         SET title = COALESCE($2, title), slug = COALESCE($3, slug), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL \
         RETURNING id, subcatalog_id, title, slug, created_at, updated_at",
    )
    .bind(id)
    .bind(title)
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Soft-deletes a catalog and everything beneath it.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the catalog is missing or already deleted.
pub async fn soft_delete_catalog(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    lock_live_products(&mut tx, "catalog_id", id).await?;

    sqlx::query_scalar::<_, i64>(
        "UPDATE catalogs SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let subcatalog_ids: Vec<i64> = sqlx::query_scalar::<_, i64>(
        "UPDATE subcatalogs SET deleted_at = NOW(), updated_at = NOW() \
         WHERE catalog_id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let category_ids: Vec<i64> = sqlx::query_scalar::<_, i64>(
        "UPDATE categories SET deleted_at = NOW(), updated_at = NOW() \
         WHERE subcatalog_id = ANY($1) AND deleted_at IS NULL RETURNING id",
    )
    .bind(&subcatalog_ids)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE products SET deleted_at = NOW(), updated_at = NOW() \
         WHERE catalog_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    soft_delete_filters_for(&mut tx, &subcatalog_ids, &category_ids).await?;

    tx.commit().await?;
    tracing::info!(
        catalog_id = id,
        subcatalogs = subcatalog_ids.len(),
        categories = category_ids.len(),
        "catalog soft-deleted"
    );
    Ok(())
}

/// Soft-deletes a subcatalog, its categories, products and filter rows.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the subcatalog is missing or already deleted.
pub async fn soft_delete_subcatalog(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    lock_live_products(&mut tx, "subcatalog_id", id).await?;

    sqlx::query_scalar::<_, i64>(
        "UPDATE subcatalogs SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let category_ids: Vec<i64> = sqlx::query_scalar::<_, i64>(
        "UPDATE categories SET deleted_at = NOW(), updated_at = NOW() \
         WHERE subcatalog_id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE products SET deleted_at = NOW(), updated_at = NOW() \
         WHERE subcatalog_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    soft_delete_filters_for(&mut tx, &[id], &category_ids).await?;

    tx.commit().await?;
    Ok(())
}

/// Soft-deletes a category, its products and its filter row.
///
/// The parent subcatalog's filter stays live, so the deleted products are
/// dropped from its option index in the same transaction.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the category is missing or already deleted.
pub async fn soft_delete_category(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    lock_live_products(&mut tx, "category_id", id).await?;

    let subcatalog_id = sqlx::query_scalar::<_, i64>(
        "UPDATE categories SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL RETURNING subcatalog_id",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let product_ids: Vec<i64> = sqlx::query_scalar::<_, i64>(
        "UPDATE products SET deleted_at = NOW(), updated_at = NOW() \
         WHERE category_id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let targets = [FilterTarget::Subcatalog(subcatalog_id), FilterTarget::Category(id)];
    filters::share_index_locks(&mut tx, &targets).await?;
    filters::lock_filters_for_targets(&mut tx, &targets).await?;

    soft_delete_filters_for(&mut tx, &[], &[id]).await?;

    let detached: Vec<IndexUpdate> = product_ids
        .into_iter()
        .map(|pid| IndexUpdate::detach(FilterTarget::Subcatalog(subcatalog_id), pid))
        .collect();
    filters::reconcile_in_filters(&mut tx, &detached).await?;

    tx.commit().await?;
    Ok(())
}

/// Row-lock a node's live products ahead of the node itself, matching the
/// order product updates take.
async fn lock_live_products(
    conn: &mut PgConnection,
    column: &str,
    id: i64,
) -> Result<(), DbError> {
    sqlx::query(&format!(
        "SELECT id FROM products WHERE {column} = $1 AND deleted_at IS NULL \
         ORDER BY id FOR UPDATE"
    ))
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn soft_delete_filters_for(
    conn: &mut PgConnection,
    subcatalog_ids: &[i64],
    category_ids: &[i64],
) -> Result<(), DbError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM catalog_filters \
         WHERE deleted_at IS NULL \
           AND (subcatalog_id = ANY($1) OR category_id = ANY($2)) \
         ORDER BY id FOR UPDATE",
    )
    .bind(subcatalog_ids)
    .bind(category_ids)
    .fetch_all(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE catalog_filters SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = ANY($1)",
    )
    .bind(&ids)
    .execute(conn)
    .await?;
    Ok(())
}
