//! Database operations for the `products` table.
//!
//! A product's `subcatalog_filter` / `category_filter` tag arrays are the
//! source of truth for facet matching. Every write here reconciles the
//! option index of the affected filter rows inside the same transaction.

use bazaar_core::facets::TaggedProduct;
use bazaar_core::media::public_asset_path;
use bazaar_core::{FilterTarget, Page};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::filters::{self, IndexUpdate};
use crate::DbError;

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub images: Vec<String>,
    pub catalog_id: i64,
    pub subcatalog_id: i64,
    pub category_id: i64,
    pub brand_id: Option<i64>,
    pub condition_id: Option<i64>,
    pub relevance_id: Option<i64>,
    pub category_filter: Vec<String>,
    pub subcatalog_filter: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new product. `slug` must already be normalized.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub images: Vec<String>,
    pub catalog_id: i64,
    pub subcatalog_id: i64,
    pub category_id: i64,
    pub brand_id: Option<i64>,
    pub condition_id: Option<i64>,
    pub relevance_id: Option<i64>,
    pub category_filter: Vec<String>,
    pub subcatalog_filter: Vec<String>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
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

/// Optional slug filters for product listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ProductListFilters {
    pub catalog_slug: Option<String>,
    pub subcatalog_slug: Option<String>,
    pub category_slug: Option<String>,
    /// Case-insensitive substring match on the title.
    pub search: Option<String>,
}

const PRODUCT_COLUMNS: &str = "p.id, p.title, p.slug, p.description, p.price, p.images, \
     p.catalog_id, p.subcatalog_id, p.category_id, p.brand_id, p.condition_id, \
     p.relevance_id, p.category_filter, p.subcatalog_filter, p.created_at, p.updated_at";

const LIST_WHERE: &str = "p.deleted_at IS NULL \
       AND ($1::TEXT IS NULL OR k.slug = $1) \
       AND ($2::TEXT IS NULL OR s.slug = $2) \
       AND ($3::TEXT IS NULL OR c.slug = $3) \
       AND ($4::TEXT IS NULL OR p.title ILIKE '%' || $4 || '%')";

const LIST_FROM: &str = "FROM products p \
     JOIN catalogs k ON k.id = p.catalog_id \
     JOIN subcatalogs s ON s.id = p.subcatalog_id \
     JOIN categories c ON c.id = p.category_id";

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Page through live products, newest first.
///
/// Returns the page together with the total number of matches.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn list_products(
    pool: &PgPool,
    filters: &ProductListFilters,
    page: Page,
) -> Result<(Vec<ProductRow>, i64), DbError> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} {LIST_FROM} WHERE {LIST_WHERE} \
         ORDER BY p.created_at DESC, p.id DESC \
         LIMIT $5 OFFSET $6"
    ))
    .bind(filters.catalog_slug.as_deref())
    .bind(filters.subcatalog_slug.as_deref())
    .bind(filters.category_slug.as_deref())
    .bind(filters.search.as_deref())
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) {LIST_FROM} WHERE {LIST_WHERE}"
    ))
    .bind(filters.catalog_slug.as_deref())
    .bind(filters.subcatalog_slug.as_deref())
    .bind(filters.category_slug.as_deref())
    .bind(filters.search.as_deref())
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Fetch live products by ID, returned in the order of `ids`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_products_by_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<ProductRow>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p \
         WHERE p.id = ANY($1) AND p.deleted_at IS NULL \
         ORDER BY array_position($1, p.id)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// IDs and scope-matching tags of every live product under a node, newest
/// first.
///
/// Category nodes use `category_filter`, subcatalog nodes `subcatalog_filter`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_tagged_products<'e, E>(
    executor: E,
    target: FilterTarget,
) -> Result<Vec<TaggedProduct>, DbError>
where
    E: PgExecutor<'e>,
{
    let sql = match target {
        FilterTarget::Subcatalog(_) => {
            "SELECT id, subcatalog_filter FROM products \
             WHERE subcatalog_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        }
        FilterTarget::Category(_) => {
            "SELECT id, category_filter FROM products \
             WHERE category_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        }
    };
    let rows = sqlx::query_as::<_, (i64, Vec<String>)>(sql)
        .bind(target.id())
        .fetch_all(executor)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, tags)| TaggedProduct { id, tags })
        .collect())
}

/// Fetch a live product by ID.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product(pool: &PgPool, id: i64) -> Result<Option<ProductRow>, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = $1 AND p.deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch a live product by slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product_by_slug(pool: &PgPool, slug: &str) -> Result<Option<ProductRow>, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.slug = $1 AND p.deleted_at IS NULL"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert a product and add it to the option index of its subcatalog and
/// category filters.
///
/// # Errors
///
/// Returns [`DbError::Invalid`] when the hierarchy IDs do not line up or a
/// referenced lookup row is missing, or [`DbError::Sqlx`] on failure
/// (including slug unique violations).
pub async fn create_product(pool: &PgPool, product: NewProduct) -> Result<ProductRow, DbError> {
    let mut tx = pool.begin().await?;

    ensure_hierarchy(
        &mut tx,
        product.catalog_id,
        product.subcatalog_id,
        product.category_id,
    )
    .await?;
    ensure_lookups(
        &mut tx,
        product.brand_id,
        product.condition_id,
        product.relevance_id,
    )
    .await?;

    let images: Vec<String> = product.images.iter().map(|p| public_asset_path(p)).collect();

    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO products AS p \
           (title, slug, description, price, images, catalog_id, subcatalog_id, category_id, \
            brand_id, condition_id, relevance_id, category_filter, subcatalog_filter) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(&product.title)
    .bind(&product.slug)
    .bind(product.description.as_deref())
    .bind(product.price)
    .bind(&images)
    .bind(product.catalog_id)
    .bind(product.subcatalog_id)
    .bind(product.category_id)
    .bind(product.brand_id)
    .bind(product.condition_id)
    .bind(product.relevance_id)
    .bind(&product.category_filter)
    .bind(&product.subcatalog_filter)
    .fetch_one(&mut *tx)
    .await?;

    sync_option_index(&mut tx, None, &row).await?;

    tx.commit().await?;
    tracing::info!(product_id = row.id, slug = %row.slug, "product created");
    Ok(row)
}

/// Apply a partial update to a live product and reconcile affected filters.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for a missing or deleted product,
/// [`DbError::Invalid`] for a hierarchy mismatch, or [`DbError::Sqlx`] on
/// failure.
pub async fn update_product(
    pool: &PgPool,
    id: i64,
    patch: ProductPatch,
) -> Result<ProductRow, DbError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p \
         WHERE p.id = $1 AND p.deleted_at IS NULL FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let catalog_id = patch.catalog_id.unwrap_or(current.catalog_id);
    let subcatalog_id = patch.subcatalog_id.unwrap_or(current.subcatalog_id);
    let category_id = patch.category_id.unwrap_or(current.category_id);
    ensure_hierarchy(&mut tx, catalog_id, subcatalog_id, category_id).await?;
    ensure_lookups(&mut tx, patch.brand_id, patch.condition_id, patch.relevance_id).await?;

    let images = patch
        .images
        .map(|images| images.iter().map(|p| public_asset_path(p)).collect::<Vec<_>>())
        .unwrap_or_else(|| current.images.clone());

    let updated = sqlx::query_as::<_, ProductRow>(&format!(
        "UPDATE products AS p SET \
           title = $2, slug = $3, description = $4, price = $5, images = $6, \
           catalog_id = $7, subcatalog_id = $8, category_id = $9, \
           brand_id = $10, condition_id = $11, relevance_id = $12, \
           category_filter = $13, subcatalog_filter = $14, updated_at = NOW() \
         WHERE p.id = $1 \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(id)
    .bind(patch.title.as_deref().unwrap_or(&current.title))
    .bind(patch.slug.as_deref().unwrap_or(&current.slug))
    .bind(patch.description.as_deref().or(current.description.as_deref()))
    .bind(patch.price.unwrap_or(current.price))
    .bind(&images)
    .bind(catalog_id)
    .bind(subcatalog_id)
    .bind(category_id)
    .bind(patch.brand_id.or(current.brand_id))
    .bind(patch.condition_id.or(current.condition_id))
    .bind(patch.relevance_id.or(current.relevance_id))
    .bind(patch.category_filter.as_ref().unwrap_or(&current.category_filter))
    .bind(patch.subcatalog_filter.as_ref().unwrap_or(&current.subcatalog_filter))
    .fetch_one(&mut *tx)
    .await?;

    sync_option_index(&mut tx, Some(&current), &updated).await?;

    tx.commit().await?;
    Ok(updated)
}

/// Soft-delete a product and drop it from every option index.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the product is missing or already deleted.
pub async fn soft_delete_product(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let (subcatalog_id, category_id) = sqlx::query_as::<_, (i64, i64)>(
        "UPDATE products SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL \
         RETURNING subcatalog_id, category_id",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    filters::reconcile_in_filters(
        &mut tx,
        &[
            IndexUpdate::detach(FilterTarget::Subcatalog(subcatalog_id), id),
            IndexUpdate::detach(FilterTarget::Category(category_id), id),
        ],
    )
    .await?;

    tx.commit().await?;
    tracing::info!(product_id = id, "product soft-deleted");
    Ok(())
}

/// Bring the subcatalog and category filters in line with `after`, dropping
/// the product from the filters of nodes it left.
async fn sync_option_index(
    conn: &mut PgConnection,
    before: Option<&ProductRow>,
    after: &ProductRow,
) -> Result<(), DbError> {
    let mut updates = Vec::with_capacity(4);
    if let Some(before) = before {
        if before.subcatalog_id != after.subcatalog_id {
            updates.push(IndexUpdate::detach(
                FilterTarget::Subcatalog(before.subcatalog_id),
                after.id,
            ));
        }
        if before.category_id != after.category_id {
            updates.push(IndexUpdate::detach(
                FilterTarget::Category(before.category_id),
                after.id,
            ));
        }
    }
    updates.push(IndexUpdate {
        target: FilterTarget::Subcatalog(after.subcatalog_id),
        product_id: after.id,
        tags: after.subcatalog_filter.clone(),
    });
    updates.push(IndexUpdate {
        target: FilterTarget::Category(after.category_id),
        product_id: after.id,
        tags: after.category_filter.clone(),
    });
    filters::reconcile_in_filters(conn, &updates).await
}

/// Check that the category sits under the subcatalog, the subcatalog under
/// the catalog, and that all three are live. The category row stays share
/// locked until commit, so a concurrent delete of it or an ancestor waits.
async fn ensure_hierarchy(
    conn: &mut PgConnection,
    catalog_id: i64,
    subcatalog_id: i64,
    category_id: i64,
) -> Result<(), DbError> {
    let parents = sqlx::query_as::<_, (i64, i64)>(
        "SELECT s.catalog_id, c.subcatalog_id \
         FROM categories c \
         JOIN subcatalogs s ON s.id = c.subcatalog_id \
         JOIN catalogs k ON k.id = s.catalog_id \
         WHERE c.id = $1 \
           AND c.deleted_at IS NULL AND s.deleted_at IS NULL AND k.deleted_at IS NULL \
         FOR SHARE OF c",
    )
    .bind(category_id)
    .fetch_optional(conn)
    .await?;

    match parents {
        None => Err(DbError::Invalid(format!("category {category_id} not found"))),
        Some((_, parent)) if parent != subcatalog_id => Err(DbError::Invalid(format!(
            "category {category_id} does not belong to subcatalog {subcatalog_id}"
        ))),
        Some((parent, _)) if parent != catalog_id => Err(DbError::Invalid(format!(
            "subcatalog {subcatalog_id} does not belong to catalog {catalog_id}"
        ))),
        Some(_) => Ok(()),
    }
}

async fn ensure_lookups(
    conn: &mut PgConnection,
    brand_id: Option<i64>,
    condition_id: Option<i64>,
    relevance_id: Option<i64>,
) -> Result<(), DbError> {
    let (brand_ok, condition_ok, relevance_ok) = sqlx::query_as::<_, (bool, bool, bool)>(
        "SELECT \
           $1::BIGINT IS NULL OR EXISTS (SELECT 1 FROM brands WHERE id = $1 AND deleted_at IS NULL), \
           $2::BIGINT IS NULL OR EXISTS (SELECT 1 FROM product_conditions WHERE id = $2), \
           $3::BIGINT IS NULL OR EXISTS (SELECT 1 FROM product_relevances WHERE id = $3)",
    )
    .bind(brand_id)
    .bind(condition_id)
    .bind(relevance_id)
    .fetch_one(conn)
    .await?;

    if !brand_ok {
        return Err(DbError::Invalid("brand not found".to_string()));
    }
    if !condition_ok {
        return Err(DbError::Invalid("condition not found".to_string()));
    }
    if !relevance_ok {
        return Err(DbError::Invalid("relevance not found".to_string()));
    }
    Ok(())
}
