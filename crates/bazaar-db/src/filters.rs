//! Database operations for the `catalog_filters` table.
//!
//! Every write locks the filter row (`FOR UPDATE`) and recomputes the option
//! index inside the same transaction, so concurrent product edits and facet
//! edits cannot lose each other's changes.
//!
//! Lock order, shared by every writer: product rows, then hierarchy nodes,
//! then the per-target index advisory locks in key order, then filter rows
//! in ID order. Product writes take the index lock shared and filter creation
//! takes it exclusive, so a node's first filter row cannot miss a product
//! written at the same moment.

use bazaar_core::facets::{self, rebuild_option_index, reconcile_product};
use bazaar_core::{Facet, FilterError, FilterTarget};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::{products, DbError};

/// A row from the `catalog_filters` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogFilterRow {
    pub id: i64,
    pub subcatalog_id: Option<i64>,
    pub category_id: Option<i64>,
    pub data: Json<Vec<Facet>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogFilterRow {
    /// The node this row hangs off.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::AmbiguousTarget`] if the row violates the
    /// single-target check (only possible with hand-edited data).
    pub fn target(&self) -> Result<FilterTarget, FilterError> {
        FilterTarget::from_ids(self.subcatalog_id, self.category_id)
    }
}

const FILTER_COLUMNS: &str = "id, subcatalog_id, category_id, data, created_at, updated_at";

/// Fetch a live filter row by ID.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_filter(pool: &PgPool, id: i64) -> Result<Option<CatalogFilterRow>, DbError> {
    let row = sqlx::query_as::<_, CatalogFilterRow>(&format!(
        "SELECT {FILTER_COLUMNS} FROM catalog_filters WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch the live filter row attached to a subcatalog or category.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_live_filter_for_target(
    pool: &PgPool,
    target: FilterTarget,
) -> Result<Option<CatalogFilterRow>, DbError> {
    let sql = format!(
        "SELECT {FILTER_COLUMNS} FROM catalog_filters \
         WHERE {} = $1 AND deleted_at IS NULL",
        target_column(target)
    );
    let row = sqlx::query_as::<_, CatalogFilterRow>(&sql)
        .bind(target.id())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Create the filter row for `target`, or append `incoming` facets to the
/// existing one.
///
/// Incoming option ID lists are ignored; the index is rebuilt from the tags
/// of the node's live products.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the target node is missing or deleted,
/// [`DbError::Filter`] for empty input or a facet name collision, or
/// [`DbError::Sqlx`] on failure. Concurrent creates for one node serialize on
/// the node's index lock, so the later one merges into the earlier row.
pub async fn create_or_merge_filter(
    pool: &PgPool,
    target: FilterTarget,
    incoming: Vec<Facet>,
) -> Result<CatalogFilterRow, DbError> {
    let mut tx = pool.begin().await?;

    let node_sql = match target {
        FilterTarget::Subcatalog(_) => {
            "SELECT id FROM subcatalogs WHERE id = $1 AND deleted_at IS NULL FOR SHARE"
        }
        FilterTarget::Category(_) => {
            "SELECT id FROM categories WHERE id = $1 AND deleted_at IS NULL FOR SHARE"
        }
    };
    sqlx::query_scalar::<_, i64>(node_sql)
        .bind(target.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(index_lock_key(target))
        .execute(&mut *tx)
        .await?;

    let existing = lock_filter_for_target(&mut tx, target).await?;
    let mut data = existing
        .as_ref()
        .map(|row| row.data.0.clone())
        .unwrap_or_default();
    facets::merge_facets(&mut data, incoming)?;

    let tagged = products::list_tagged_products(&mut *tx, target).await?;
    rebuild_option_index(&mut data, &tagged);

    let row = match existing {
        Some(row) => write_data(&mut tx, row.id, &data).await?,
        None => {
            let (subcatalog_id, category_id) = match target {
                FilterTarget::Subcatalog(id) => (Some(id), None),
                FilterTarget::Category(id) => (None, Some(id)),
            };
            sqlx::query_as::<_, CatalogFilterRow>(&format!(
                "INSERT INTO catalog_filters (subcatalog_id, category_id, data) \
                 VALUES ($1, $2, $3) RETURNING {FILTER_COLUMNS}"
            ))
            .bind(subcatalog_id)
            .bind(category_id)
            .bind(Json(&data))
            .fetch_one(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;
    tracing::info!(filter_id = row.id, facets = data.len(), "filter saved");
    Ok(row)
}

/// Replace the facet called `name` in filter `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for a missing or deleted row, or
/// [`DbError::Filter`] when the facet is absent, the new name collides, or
/// the replacement is malformed.
pub async fn replace_facet(
    pool: &PgPool,
    id: i64,
    name: &str,
    replacement: Facet,
) -> Result<CatalogFilterRow, DbError> {
    let mut tx = pool.begin().await?;
    let row = lock_filter(&mut tx, id).await?.ok_or(DbError::NotFound)?;
    let target = row.target()?;

    let mut data = row.data.0;
    facets::replace_facet(&mut data, name, replacement)?;
    let tagged = products::list_tagged_products(&mut *tx, target).await?;
    rebuild_option_index(&mut data, &tagged);

    let row = write_data(&mut tx, id, &data).await?;
    tx.commit().await?;
    Ok(row)
}

/// Remove the facet called `name` from filter `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for a missing or deleted row, or
/// [`DbError::Filter`] when no facet has that name.
pub async fn remove_facet(pool: &PgPool, id: i64, name: &str) -> Result<CatalogFilterRow, DbError> {
    let mut tx = pool.begin().await?;
    let row = lock_filter(&mut tx, id).await?.ok_or(DbError::NotFound)?;

    let mut data = row.data.0;
    facets::remove_facet(&mut data, name)?;

    let row = write_data(&mut tx, id, &data).await?;
    tx.commit().await?;
    Ok(row)
}

/// Soft-delete a whole filter row.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the row is missing or already deleted.
pub async fn soft_delete_filter(pool: &PgPool, id: i64) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE catalog_filters SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(())
}

/// Recompute the option index of every live filter row from product tags.
///
/// Returns the number of rows whose data changed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any query fails.
pub async fn rebuild_all_filters(pool: &PgPool) -> Result<usize, DbError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM catalog_filters WHERE deleted_at IS NULL ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut changed = 0;
    for id in ids {
        let mut tx = pool.begin().await?;
        let Some(row) = lock_filter(&mut tx, id).await? else {
            continue;
        };
        let target = match row.target() {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(filter_id = id, error = %e, "skipping filter with bad target");
                continue;
            }
        };

        let mut data = row.data.0.clone();
        let tagged = products::list_tagged_products(&mut *tx, target).await?;
        rebuild_option_index(&mut data, &tagged);

        if data != row.data.0 {
            write_data(&mut tx, id, &data).await?;
            changed += 1;
        }
        tx.commit().await?;
    }
    Ok(changed)
}

/// One product's tags for the option index of one node. Empty tags drop the
/// product from that index.
#[derive(Debug, Clone)]
pub(crate) struct IndexUpdate {
    pub target: FilterTarget,
    pub product_id: i64,
    pub tags: Vec<String>,
}

impl IndexUpdate {
    pub(crate) fn detach(target: FilterTarget, product_id: i64) -> Self {
        Self {
            target,
            product_id,
            tags: Vec::new(),
        }
    }
}

/// Apply `updates` to the live filter rows of their targets, if any.
///
/// Takes the shared index locks, then every affected row in one ordered
/// `FOR UPDATE`.
pub(crate) async fn reconcile_in_filters(
    conn: &mut PgConnection,
    updates: &[IndexUpdate],
) -> Result<(), DbError> {
    if updates.is_empty() {
        return Ok(());
    }
    let targets: Vec<FilterTarget> = updates.iter().map(|u| u.target).collect();
    share_index_locks(conn, &targets).await?;

    for row in lock_filters_for_targets(conn, &targets).await? {
        let Ok(target) = row.target() else {
            continue;
        };
        let mut data = row.data.0;
        let mut changed = false;
        for update in updates.iter().filter(|u| u.target == target) {
            changed |= reconcile_product(&mut data, update.product_id, &update.tags);
        }
        if changed {
            write_data(conn, row.id, &data).await?;
            tracing::debug!(filter_id = row.id, "option index reconciled");
        }
    }
    Ok(())
}

/// Take the shared index lock of each target, in key order.
pub(crate) async fn share_index_locks(
    conn: &mut PgConnection,
    targets: &[FilterTarget],
) -> Result<(), DbError> {
    let mut keys: Vec<i64> = targets.iter().copied().map(index_lock_key).collect();
    keys.sort_unstable();
    keys.dedup();
    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock_shared($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Lock the live filter rows of `targets` in ID order.
pub(crate) async fn lock_filters_for_targets(
    conn: &mut PgConnection,
    targets: &[FilterTarget],
) -> Result<Vec<CatalogFilterRow>, DbError> {
    let (subcatalog_ids, category_ids) = split_targets(targets);
    let rows = sqlx::query_as::<_, CatalogFilterRow>(&format!(
        "SELECT {FILTER_COLUMNS} FROM catalog_filters \
         WHERE deleted_at IS NULL \
           AND (subcatalog_id = ANY($1) OR category_id = ANY($2)) \
         ORDER BY id FOR UPDATE"
    ))
    .bind(&subcatalog_ids)
    .bind(&category_ids)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Advisory lock key guarding the option index of one node. The low bit
/// keeps subcatalog and category keys apart.
pub(crate) fn index_lock_key(target: FilterTarget) -> i64 {
    match target {
        FilterTarget::Subcatalog(id) => id.wrapping_shl(1),
        FilterTarget::Category(id) => id.wrapping_shl(1) | 1,
    }
}

pub(crate) fn split_targets(targets: &[FilterTarget]) -> (Vec<i64>, Vec<i64>) {
    let mut subcatalog_ids = Vec::new();
    let mut category_ids = Vec::new();
    for target in targets {
        match *target {
            FilterTarget::Subcatalog(id) => subcatalog_ids.push(id),
            FilterTarget::Category(id) => category_ids.push(id),
        }
    }
    (subcatalog_ids, category_ids)
}

fn target_column(target: FilterTarget) -> &'static str {
    match target {
        FilterTarget::Subcatalog(_) => "subcatalog_id",
        FilterTarget::Category(_) => "category_id",
    }
}

async fn lock_filter(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<CatalogFilterRow>, DbError> {
    let row = sqlx::query_as::<_, CatalogFilterRow>(&format!(
        "SELECT {FILTER_COLUMNS} FROM catalog_filters \
         WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

async fn lock_filter_for_target(
    conn: &mut PgConnection,
    target: FilterTarget,
) -> Result<Option<CatalogFilterRow>, DbError> {
    let sql = format!(
        "SELECT {FILTER_COLUMNS} FROM catalog_filters \
         WHERE {} = $1 AND deleted_at IS NULL FOR UPDATE",
        target_column(target)
    );
    let row = sqlx::query_as::<_, CatalogFilterRow>(&sql)
        .bind(target.id())
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

async fn write_data(
    conn: &mut PgConnection,
    id: i64,
    data: &[Facet],
) -> Result<CatalogFilterRow, DbError> {
    let row = sqlx::query_as::<_, CatalogFilterRow>(&format!(
        "UPDATE catalog_filters SET data = $2, updated_at = NOW() \
         WHERE id = $1 RETURNING {FILTER_COLUMNS}"
    ))
    .bind(id)
    .bind(Json(data))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lock_keys_keep_scopes_apart() {
        assert_ne!(
            index_lock_key(FilterTarget::Subcatalog(7)),
            index_lock_key(FilterTarget::Category(7))
        );
        assert_ne!(
            index_lock_key(FilterTarget::Category(3)),
            index_lock_key(FilterTarget::Subcatalog(4))
        );
    }

    #[test]
    fn targets_split_by_scope() {
        let (subcatalogs, categories) = split_targets(&[
            FilterTarget::Category(2),
            FilterTarget::Subcatalog(1),
            FilterTarget::Category(5),
        ]);
        assert_eq!(subcatalogs, vec![1]);
        assert_eq!(categories, vec![2, 5]);
    }
}
