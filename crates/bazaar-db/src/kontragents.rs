//! Kontragents (billing entities) and their delivery addresses.
//!
//! A user has at most one favorite kontragent and a kontragent at most one
//! main address. Flag changes lock the owning row first, clear the flag on
//! every sibling, then set it on the target, all in one transaction. The
//! partial unique indexes in the schema back this up under races.

use bazaar_core::KontragentIdentity;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::DbError;

/// A row from the `kontragents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KontragentRow {
    pub id: i64,
    pub user_id: i64,
    pub ownership_form: String,
    pub name: String,
    pub inn: Option<String>,
    pub pinfl: Option<String>,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `kontragent_addresses` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KontragentAddressRow {
    pub id: i64,
    pub kontragent_id: i64,
    pub address: String,
    pub is_main: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const KONTRAGENT_COLUMNS: &str =
    "id, user_id, ownership_form, name, inn, pinfl, is_favorite, created_at, updated_at";
const ADDRESS_COLUMNS: &str = "id, kontragent_id, address, is_main, created_at, updated_at";

// ---------------------------------------------------------------------------
// Kontragents
// ---------------------------------------------------------------------------

/// List a user's live kontragents, favorite first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_kontragents(pool: &PgPool, user_id: i64) -> Result<Vec<KontragentRow>, DbError> {
    let rows = sqlx::query_as::<_, KontragentRow>(&format!(
        "SELECT {KONTRAGENT_COLUMNS} FROM kontragents \
         WHERE user_id = $1 AND deleted_at IS NULL \
         ORDER BY is_favorite DESC, id"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch a live kontragent owned by `user_id`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_kontragent(
    pool: &PgPool,
    user_id: i64,
    id: i64,
) -> Result<Option<KontragentRow>, DbError> {
    let row = sqlx::query_as::<_, KontragentRow>(&format!(
        "SELECT {KONTRAGENT_COLUMNS} FROM kontragents \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a kontragent for `user_id`.
///
/// The user's first kontragent becomes the favorite regardless of
/// `favorite`.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] when the INN or PINFL is already used by
/// another live kontragent of the same user, or [`DbError::Sqlx`] on failure.
pub async fn create_kontragent(
    pool: &PgPool,
    user_id: i64,
    identity: &KontragentIdentity,
    favorite: bool,
) -> Result<KontragentRow, DbError> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, user_id).await?;
    ensure_identity_unique(&mut tx, user_id, identity, None).await?;

    let has_any: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM kontragents WHERE user_id = $1 AND deleted_at IS NULL)",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut row = sqlx::query_as::<_, KontragentRow>(&format!(
        "INSERT INTO kontragents (user_id, ownership_form, name, inn, pinfl) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {KONTRAGENT_COLUMNS}"
    ))
    .bind(user_id)
    .bind(identity.ownership_form.as_str())
    .bind(&identity.name)
    .bind(identity.inn.as_deref())
    .bind(identity.pinfl.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    if favorite || !has_any {
        row = mark_favorite(&mut tx, user_id, row.id).await?;
    }

    tx.commit().await?;
    Ok(row)
}

/// Replace the identity fields of a live kontragent.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is missing, deleted or
/// owned by someone else, [`DbError::Conflict`] on an INN/PINFL clash, or
/// [`DbError::Sqlx`] on failure.
pub async fn update_kontragent(
    pool: &PgPool,
    user_id: i64,
    id: i64,
    identity: &KontragentIdentity,
) -> Result<KontragentRow, DbError> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, user_id).await?;
    ensure_identity_unique(&mut tx, user_id, identity, Some(id)).await?;

    let row = sqlx::query_as::<_, KontragentRow>(&format!(
        "UPDATE kontragents \
         SET ownership_form = $3, name = $4, inn = $5, pinfl = $6, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL \
         RETURNING {KONTRAGENT_COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .bind(identity.ownership_form.as_str())
    .bind(&identity.name)
    .bind(identity.inn.as_deref())
    .bind(identity.pinfl.as_deref())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    tx.commit().await?;
    Ok(row)
}

/// Make `id` the user's only favorite kontragent.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is missing, deleted or
/// owned by someone else.
pub async fn set_favorite_kontragent(
    pool: &PgPool,
    user_id: i64,
    id: i64,
) -> Result<KontragentRow, DbError> {
    let mut tx = pool.begin().await?;
    lock_user(&mut tx, user_id).await?;
    let row = mark_favorite(&mut tx, user_id, id).await?;
    tx.commit().await?;
    tracing::debug!(user_id, kontragent_id = id, "favorite kontragent set");
    Ok(row)
}

/// Soft-delete a kontragent and its addresses.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is missing, deleted or
/// owned by someone else.
pub async fn soft_delete_kontragent(pool: &PgPool, user_id: i64, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>(
        "UPDATE kontragents SET deleted_at = NOW(), is_favorite = FALSE, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING id",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    sqlx::query(
        "UPDATE kontragent_addresses SET deleted_at = NOW(), is_main = FALSE, updated_at = NOW() \
         WHERE kontragent_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn lock_user(conn: &mut PgConnection, user_id: i64) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(())
}

async fn mark_favorite(
    conn: &mut PgConnection,
    user_id: i64,
    id: i64,
) -> Result<KontragentRow, DbError> {
    sqlx::query(
        "UPDATE kontragents SET is_favorite = FALSE, updated_at = NOW() \
         WHERE user_id = $1 AND id <> $2 AND is_favorite AND deleted_at IS NULL",
    )
    .bind(user_id)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, KontragentRow>(&format!(
        "UPDATE kontragents SET is_favorite = TRUE, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL \
         RETURNING {KONTRAGENT_COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(DbError::NotFound)
}

async fn ensure_identity_unique(
    conn: &mut PgConnection,
    user_id: i64,
    identity: &KontragentIdentity,
    exclude_id: Option<i64>,
) -> Result<(), DbError> {
    let (inn_taken, pinfl_taken) = sqlx::query_as::<_, (bool, bool)>(
        "SELECT \
           COALESCE(bool_or(inn = $2), FALSE), \
           COALESCE(bool_or(pinfl = $3), FALSE) \
         FROM kontragents \
         WHERE user_id = $1 AND deleted_at IS NULL \
           AND ($4::BIGINT IS NULL OR id <> $4)",
    )
    .bind(user_id)
    .bind(identity.inn.as_deref())
    .bind(identity.pinfl.as_deref())
    .bind(exclude_id)
    .fetch_one(conn)
    .await?;

    if inn_taken {
        return Err(DbError::Conflict(
            "a kontragent with this inn already exists".to_string(),
        ));
    }
    if pinfl_taken {
        return Err(DbError::Conflict(
            "a kontragent with this pinfl already exists".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// List the live addresses of a kontragent owned by `user_id`, main first.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is not the user's.
pub async fn list_addresses(
    pool: &PgPool,
    user_id: i64,
    kontragent_id: i64,
) -> Result<Vec<KontragentAddressRow>, DbError> {
    if get_kontragent(pool, user_id, kontragent_id).await?.is_none() {
        return Err(DbError::NotFound);
    }
    let rows = sqlx::query_as::<_, KontragentAddressRow>(&format!(
        "SELECT {ADDRESS_COLUMNS} FROM kontragent_addresses \
         WHERE kontragent_id = $1 AND deleted_at IS NULL \
         ORDER BY is_main DESC, id"
    ))
    .bind(kontragent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Add an address. The kontragent's first address becomes its main one.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is not the user's.
pub async fn create_address(
    pool: &PgPool,
    user_id: i64,
    kontragent_id: i64,
    address: &str,
    main: bool,
) -> Result<KontragentAddressRow, DbError> {
    let mut tx = pool.begin().await?;
    lock_kontragent(&mut tx, user_id, kontragent_id).await?;

    let has_any: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM kontragent_addresses \
                        WHERE kontragent_id = $1 AND deleted_at IS NULL)",
    )
    .bind(kontragent_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut row = sqlx::query_as::<_, KontragentAddressRow>(&format!(
        "INSERT INTO kontragent_addresses (kontragent_id, address) \
         VALUES ($1, $2) RETURNING {ADDRESS_COLUMNS}"
    ))
    .bind(kontragent_id)
    .bind(address)
    .fetch_one(&mut *tx)
    .await?;

    if main || !has_any {
        row = mark_main(&mut tx, kontragent_id, row.id).await?;
    }

    tx.commit().await?;
    Ok(row)
}

/// Make `address_id` the kontragent's only main address.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is not the user's or
/// the address does not belong to it.
pub async fn set_main_address(
    pool: &PgPool,
    user_id: i64,
    kontragent_id: i64,
    address_id: i64,
) -> Result<KontragentAddressRow, DbError> {
    let mut tx = pool.begin().await?;
    lock_kontragent(&mut tx, user_id, kontragent_id).await?;
    let row = mark_main(&mut tx, kontragent_id, address_id).await?;
    tx.commit().await?;
    Ok(row)
}

/// Soft-delete an address.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when the kontragent is not the user's or
/// the address is missing.
pub async fn soft_delete_address(
    pool: &PgPool,
    user_id: i64,
    kontragent_id: i64,
    address_id: i64,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    lock_kontragent(&mut tx, user_id, kontragent_id).await?;

    sqlx::query_scalar::<_, i64>(
        "UPDATE kontragent_addresses SET deleted_at = NOW(), is_main = FALSE, updated_at = NOW() \
         WHERE id = $1 AND kontragent_id = $2 AND deleted_at IS NULL RETURNING id",
    )
    .bind(address_id)
    .bind(kontragent_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    tx.commit().await?;
    Ok(())
}

async fn lock_kontragent(
    conn: &mut PgConnection,
    user_id: i64,
    kontragent_id: i64,
) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM kontragents \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(kontragent_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(())
}

async fn mark_main(
    conn: &mut PgConnection,
    kontragent_id: i64,
    address_id: i64,
) -> Result<KontragentAddressRow, DbError> {
    sqlx::query(
        "UPDATE kontragent_addresses SET is_main = FALSE, updated_at = NOW() \
         WHERE kontragent_id = $1 AND id <> $2 AND is_main AND deleted_at IS NULL",
    )
    .bind(kontragent_id)
    .bind(address_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, KontragentAddressRow>(&format!(
        "UPDATE kontragent_addresses SET is_main = TRUE, updated_at = NOW() \
         WHERE id = $1 AND kontragent_id = $2 AND deleted_at IS NULL \
         RETURNING {ADDRESS_COLUMNS}"
    ))
    .bind(address_id)
    .bind(kontragent_id)
    .fetch_optional(conn)
    .await?
    .ok_or(DbError::NotFound)
}
