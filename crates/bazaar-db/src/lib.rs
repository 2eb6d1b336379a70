use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{env, time::Duration};
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/bazaar-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &bazaar_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    /// An application-level uniqueness rule was violated.
    #[error("{0}")]
    Conflict(String),
    /// Input referenced rows that exist but do not fit together.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Filter(#[from] bazaar_core::FilterError),
    #[error(transparent)]
    Order(#[from] bazaar_core::OrderError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// `true` when Postgres rejected the write with a unique violation (`23505`).
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlx(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505")
        )
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Connect to a Postgres pool, reading `DATABASE_URL` from env and using
/// default pool settings.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] if `DATABASE_URL` is unset, or
/// [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url = env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    connect_pool(&database_url, PoolConfig::default())
        .await
        .map_err(DbError::from)
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // The _sqlx_migrations table does not exist on a fresh database; treat
    // absence as zero applied.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Run a health check: `SELECT 1` against the pool.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_has_sane_defaults() {
        let config = PoolConfig::default();

        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(config.acquire_timeout_secs, DEFAULT_ACQUIRE_TIMEOUT_SECS);
    }

    #[test]
    fn plain_errors_are_not_unique_violations() {
        assert!(!DbError::NotFound.is_unique_violation());
        assert!(!DbError::Conflict("dup".into()).is_unique_violation());
        assert!(!DbError::Sqlx(sqlx::Error::RowNotFound).is_unique_violation());
    }
}

pub mod carts;
pub mod catalog;
pub mod filters;
pub mod kontragents;
pub mod orders;
pub mod products;
pub mod users;

pub use carts::{
    add_to_cart, list_cart, list_saved_products, remove_from_cart, save_product,
    set_cart_quantity, unsave_product, CartLineRow,
};
pub use catalog::{
    create_catalog, create_category, create_subcatalog, get_catalog_tree_by_slug,
    list_catalog_tree, list_catalogs, resolve_category_by_slug, resolve_subcatalog_by_slug,
    soft_delete_catalog, soft_delete_category, soft_delete_subcatalog, update_catalog,
    update_category, update_subcatalog, CatalogNodeRow, CatalogTree, CategoryRow, SubcatalogRow,
    SubcatalogTree,
};
pub use filters::{
    create_or_merge_filter, get_filter, get_live_filter_for_target, rebuild_all_filters,
    remove_facet, replace_facet, soft_delete_filter, CatalogFilterRow,
};
pub use kontragents::{
    create_address, create_kontragent, get_kontragent, list_addresses, list_kontragents,
    set_favorite_kontragent, set_main_address, soft_delete_address, soft_delete_kontragent,
    update_kontragent, KontragentAddressRow, KontragentRow,
};
pub use orders::{
    create_order_from_cart, get_order, list_orders, list_orders_for_user, update_order_status,
    NewOrder, OrderItemRow, OrderRow, OrderWithItems,
};
pub use products::{
    create_product, get_product, get_product_by_slug, list_products, list_products_by_ids,
    list_tagged_products, soft_delete_product, update_product, NewProduct, ProductListFilters,
    ProductPatch, ProductRow,
};
pub use users::{
    create_admin, create_user, get_admin, get_admin_by_username, get_user, get_user_by_email,
    AdminRow, UserRow,
};
