//! Offline unit tests for bazaar-db pool configuration and row types.
//! These tests do not require a live database connection.

use bazaar_core::{AppConfig, Environment, FilterTarget, OrderStatus};
use bazaar_db::{CatalogFilterRow, OrderRow, PoolConfig};
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        admin_jwt_secret: "admin-secret".to_string(),
        user_jwt_secret: "user-secret".to_string(),
        jwt_ttl_hours: 24,
        login_max_attempts: 5,
        login_window_secs: 900,
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn filter_row_reports_its_target() {
    let now = chrono::Utc::now();
    let row = CatalogFilterRow {
        id: 1,
        subcatalog_id: None,
        category_id: Some(12),
        data: Json(Vec::new()),
        created_at: now,
        updated_at: now,
    };
    assert_eq!(row.target(), Ok(FilterTarget::Category(12)));

    let broken = CatalogFilterRow {
        subcatalog_id: Some(3),
        ..row
    };
    assert!(broken.target().is_err());
}

#[test]
fn order_row_parses_stored_status() {
    let now = chrono::Utc::now();
    let row = OrderRow {
        id: 1,
        user_id: 2,
        kontragent_id: None,
        address_id: None,
        status: "processing".to_string(),
        total: Decimal::new(1999, 2),
        comment: None,
        created_at: now,
        updated_at: now,
    };
    assert_eq!(row.status(), Ok(OrderStatus::Processing));
}
