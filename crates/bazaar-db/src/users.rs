//! Account lookups for shoppers (`users`) and back-office staff (`admins`).

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `users` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `admins` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert a user. The caller hashes the password.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on failure; a duplicate live email surfaces as a
/// unique violation.
pub async fn create_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    phone: Option<&str>,
    password_hash: &str,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (name, email, phone, password_hash) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, name, email, phone, password_hash, created_at, updated_at",
    )
    .bind(name)
    .bind(email)
    .bind(phone)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch a live user by ID.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_user(pool: &PgPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, phone, password_hash, created_at, updated_at \
         FROM users WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch a live user by email, case-insensitively.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, phone, password_hash, created_at, updated_at \
         FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert an admin. The caller hashes the password.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on failure; a duplicate live username surfaces
/// as a unique violation.
pub async fn create_admin(
    pool: &PgPool,
    username: &str,
    password_hash: &str,
) -> Result<AdminRow, DbError> {
    let row = sqlx::query_as::<_, AdminRow>(
        "INSERT INTO admins (username, password_hash) VALUES ($1, $2) \
         RETURNING id, username, password_hash, created_at, updated_at",
    )
    .bind(username)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch a live admin by ID.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_admin(pool: &PgPool, id: i64) -> Result<Option<AdminRow>, DbError> {
    let row = sqlx::query_as::<_, AdminRow>(
        "SELECT id, username, password_hash, created_at, updated_at \
         FROM admins WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch a live admin by username.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_admin_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<AdminRow>, DbError> {
    let row = sqlx::query_as::<_, AdminRow>(
        "SELECT id, username, password_hash, created_at, updated_at \
         FROM admins WHERE username = $1 AND deleted_at IS NULL",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
