//! Shopping cart lines and saved (wishlisted) products.
//!
//! Lines pointing at soft-deleted products are hidden from reads and skipped
//! at checkout; they are not purged eagerly.

use bazaar_core::orders::MAX_LINE_QUANTITY;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::products::ProductRow;
use crate::DbError;

/// A cart line joined with the product's current title and price.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CartLineRow {
    pub product_id: i64,
    pub slug: String,
    pub title: String,
    pub price: Decimal,
    pub images: Vec<String>,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

/// The user's cart, most recently touched line first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_cart(pool: &PgPool, user_id: i64) -> Result<Vec<CartLineRow>, DbError> {
    let rows = sqlx::query_as::<_, CartLineRow>(
        "SELECT ci.product_id, p.slug, p.title, p.price, p.images, ci.quantity, ci.updated_at \
         FROM cart_items ci \
         JOIN products p ON p.id = ci.product_id \
         WHERE ci.user_id = $1 AND p.deleted_at IS NULL \
         ORDER BY ci.updated_at DESC, ci.product_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Add `quantity` of a live product to the cart, summing with an existing
/// line. The stored quantity is capped at the per-line maximum.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the product is missing or deleted.
pub async fn add_to_cart(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
    quantity: i32,
) -> Result<i32, DbError> {
    sqlx::query_scalar::<_, i32>(
        "INSERT INTO cart_items (user_id, product_id, quantity) \
         SELECT $1, p.id, $3 FROM products p WHERE p.id = $2 AND p.deleted_at IS NULL \
         ON CONFLICT (user_id, product_id) DO UPDATE \
         SET quantity = LEAST(cart_items.quantity + EXCLUDED.quantity, $4), updated_at = NOW() \
         RETURNING quantity",
    )
    .bind(user_id)
    .bind(product_id)
    .bind(quantity)
    .bind(MAX_LINE_QUANTITY)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Overwrite the quantity of an existing cart line.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the product is not in the cart.
pub async fn set_cart_quantity(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
    quantity: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE cart_items SET quantity = $3, updated_at = NOW() \
         WHERE user_id = $1 AND product_id = $2",
    )
    .bind(user_id)
    .bind(product_id)
    .bind(quantity)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Remove a line from the cart.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the product is not in the cart.
pub async fn remove_from_cart(pool: &PgPool, user_id: i64, product_id: i64) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Saved products, most recently saved first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_saved_products(pool: &PgPool, user_id: i64) -> Result<Vec<ProductRow>, DbError> {
    let rows = sqlx::query_as::<_, ProductRow>(
        "SELECT p.id, p.title, p.slug, p.description, p.price, p.images, \
                p.catalog_id, p.subcatalog_id, p.category_id, p.brand_id, p.condition_id, \
                p.relevance_id, p.category_filter, p.subcatalog_filter, p.created_at, p.updated_at \
         FROM saved_products sp \
         JOIN products p ON p.id = sp.product_id \
         WHERE sp.user_id = $1 AND p.deleted_at IS NULL \
         ORDER BY sp.created_at DESC, p.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Save a live product. Saving twice is a no-op.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the product is missing or deleted.
pub async fn save_product(pool: &PgPool, user_id: i64, product_id: i64) -> Result<(), DbError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM products WHERE id = $1 AND deleted_at IS NULL)",
    )
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    if !exists {
        return Err(DbError::NotFound);
    }

    sqlx::query(
        "INSERT INTO saved_products (user_id, product_id) VALUES ($1, $2) \
         ON CONFLICT (user_id, product_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Unsave a product. Unsaving something not saved is a no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn unsave_product(pool: &PgPool, user_id: i64, product_id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM saved_products WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(())
}
