//! Checkout and order lifecycle.

use bazaar_core::orders::{order_total, PricedLine};
use bazaar_core::{OrderError, OrderStatus, Page};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `orders` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub kontragent_id: Option<i64>,
    pub address_id: Option<i64>,
    pub status: String,
    pub total: Decimal,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    /// # Errors
    ///
    /// Returns [`OrderError::UnknownStatus`] if the stored label is not a
    /// known status.
    pub fn status(&self) -> Result<OrderStatus, OrderError> {
        self.status.parse()
    }
}

/// A row from the `order_items` table. Title and price are checkout-time
/// snapshots.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub title: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: OrderRow,
    pub items: Vec<OrderItemRow>,
}

/// Checkout options chosen by the user.
#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    pub kontragent_id: Option<i64>,
    pub address_id: Option<i64>,
    pub comment: Option<String>,
}

const ORDER_COLUMNS: &str =
    "id, user_id, kontragent_id, address_id, status, total, comment, created_at, updated_at";

/// Turn the user's cart into an order.
///
/// Locks the cart lines, snapshots live product titles and prices, inserts
/// the order with its items and removes the ordered lines from the cart in
/// one transaction. Lines whose product was deleted are dropped.
///
/// # Errors
///
/// Returns [`DbError::Order`] with [`OrderError::EmptyCart`] when nothing is
/// orderable, [`DbError::Invalid`] when the kontragent or address is not the
/// user's, or [`DbError::Sqlx`] on failure.
pub async fn create_order_from_cart(
    pool: &PgPool,
    user_id: i64,
    order: &NewOrder,
) -> Result<OrderWithItems, DbError> {
    let mut tx = pool.begin().await?;

    if let Some(kontragent_id) = order.kontragent_id {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM kontragents \
                            WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL)",
        )
        .bind(kontragent_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if !owned {
            return Err(DbError::Invalid("unknown kontragent".to_string()));
        }
    }

    if let Some(address_id) = order.address_id {
        let Some(kontragent_id) = order.kontragent_id else {
            return Err(DbError::Invalid(
                "address_id requires kontragent_id".to_string(),
            ));
        };
        let belongs: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM kontragent_addresses \
                            WHERE id = $1 AND kontragent_id = $2 AND deleted_at IS NULL)",
        )
        .bind(address_id)
        .bind(kontragent_id)
        .fetch_one(&mut *tx)
        .await?;
        if !belongs {
            return Err(DbError::Invalid("unknown address".to_string()));
        }
    }

    let lines: Vec<PricedLine> = sqlx::query_as::<_, (i64, String, Decimal, i32)>(
        "SELECT ci.product_id, p.title, p.price, ci.quantity \
         FROM cart_items ci \
         JOIN products p ON p.id = ci.product_id \
         WHERE ci.user_id = $1 AND p.deleted_at IS NULL \
         ORDER BY ci.product_id \
         FOR UPDATE OF ci",
    )
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|(product_id, title, price, quantity)| PricedLine {
        product_id,
        title,
        price,
        quantity,
    })
    .collect();

    let total = order_total(&lines)?;

    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "INSERT INTO orders (user_id, kontragent_id, address_id, status, total, comment) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ORDER_COLUMNS}"
    ))
    .bind(user_id)
    .bind(order.kontragent_id)
    .bind(order.address_id)
    .bind(OrderStatus::New.as_str())
    .bind(total)
    .bind(order.comment.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    let mut product_ids: Vec<i64> = Vec::with_capacity(lines.len());
    let mut titles: Vec<String> = Vec::with_capacity(lines.len());
    let mut prices: Vec<Decimal> = Vec::with_capacity(lines.len());
    let mut quantities: Vec<i32> = Vec::with_capacity(lines.len());
    for line in lines {
        product_ids.push(line.product_id);
        titles.push(line.title);
        prices.push(line.price);
        quantities.push(line.quantity);
    }

    let items = sqlx::query_as::<_, OrderItemRow>(
        "INSERT INTO order_items (order_id, product_id, title, price, quantity) \
         SELECT $1, * FROM UNNEST($2::bigint[], $3::text[], $4::numeric[], $5::int4[]) \
         RETURNING id, order_id, product_id, title, price, quantity",
    )
    .bind(row.id)
    .bind(&product_ids)
    .bind(&titles)
    .bind(&prices)
    .bind(&quantities)
    .fetch_all(&mut *tx)
    .await?;

    // Only the lines read above, plus dead ones; a line committed by another
    // transaction after the read stays in the cart.
    sqlx::query(
        "DELETE FROM cart_items ci \
         WHERE ci.user_id = $1 \
           AND (ci.product_id = ANY($2) \
                OR EXISTS (SELECT 1 FROM products p \
                           WHERE p.id = ci.product_id AND p.deleted_at IS NOT NULL))",
    )
    .bind(user_id)
    .bind(&product_ids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(order_id = row.id, user_id, total = %row.total, "order placed");
    Ok(OrderWithItems { order: row, items })
}

/// A user's orders, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orders_for_user(
    pool: &PgPool,
    user_id: i64,
    page: Page,
) -> Result<Vec<OrderRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All orders, optionally narrowed to one status, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orders(
    pool: &PgPool,
    status: Option<OrderStatus>,
    page: Page,
) -> Result<Vec<OrderRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE ($1::TEXT IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(status.map(OrderStatus::as_str))
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one order with its items. Pass `user_id` to restrict to the owner.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn get_order(
    pool: &PgPool,
    id: i64,
    user_id: Option<i64>,
) -> Result<Option<OrderWithItems>, DbError> {
    let order = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE id = $1 AND ($2::BIGINT IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(order) = order else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, OrderItemRow>(
        "SELECT id, order_id, product_id, title, price, quantity \
         FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(OrderWithItems { order, items }))
}

/// Move an order to `next`, enforcing the status machine.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown order, or [`DbError::Order`]
/// for a disallowed transition.
pub async fn update_order_status(
    pool: &PgPool,
    id: i64,
    next: OrderStatus,
) -> Result<OrderRow, DbError> {
    let mut tx = pool.begin().await?;

    let current: String =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;
    let current: OrderStatus = current.parse()?;
    current.transition_to(next)?;

    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(id)
    .bind(next.as_str())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(order_id = id, from = %current, to = %next, "order status changed");
    Ok(row)
}
