//! Database schema definitions
//!
//! Status bookkeeping, crawled records and failure logs live in three separate
//! SQLite files so each can be inspected, backed up or reset on its own
//! without sharing locks.

use rusqlite::Connection;

/// Task queues and crawl metadata
pub const STATUS_SCHEMA_SQL: &str = r#"
-- Grid cells to crawl for restaurant lists
CREATE TABLE IF NOT EXISTS grid (
    geohash TEXT PRIMARY KEY NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    claimed_at TEXT,
    committed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_grid_status ON grid(status);

-- Restaurants to crawl for menus, seeded after the grid phase
CREATE TABLE IF NOT EXISTS restaurants_status (
    id INTEGER PRIMARY KEY NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    claimed_at TEXT,
    committed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_restaurants_status_status ON restaurants_status(status);

-- Parameters the queues were seeded with
CREATE TABLE IF NOT EXISTS crawl_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Crawled catalog records and category reference data
pub const DATA_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    name_for_url TEXT NOT NULL,
    rating REAL,
    rating_count INTEGER,
    month_sales INTEGER,
    phone TEXT,
    latitude REAL,
    longitude REAL,
    is_free_delivery INTEGER,
    delivery_fee REAL,
    minimum_order_amount REAL,
    minimum_free_delivery_amount REAL,
    promotion_info TEXT,
    address TEXT
);

CREATE TABLE IF NOT EXISTS menus (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    pinyin_name TEXT,
    rating REAL,
    rating_count INTEGER,
    price REAL NOT NULL,
    month_sales INTEGER,
    description TEXT,
    category_id INTEGER,
    specfoods_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_menus_restaurant ON menus(restaurant_id);

CREATE TABLE IF NOT EXISTS category (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    major_id INTEGER NOT NULL,
    major_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS restaurant_categories (
    category_id INTEGER NOT NULL,
    restaurant_id INTEGER NOT NULL,
    UNIQUE(category_id, restaurant_id)
);

CREATE INDEX IF NOT EXISTS idx_restaurant_categories_restaurant
    ON restaurant_categories(restaurant_id);
"#;

/// Remote failure logs
pub const LOG_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fetch_restaurant_log (
    geohash TEXT NOT NULL,
    http_status_code INTEGER NOT NULL,
    error_message TEXT,
    logged_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fetch_restaurant_exception (
    geohash TEXT NOT NULL,
    exception TEXT,
    logged_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fetch_menu_log (
    restaurant_id INTEGER NOT NULL,
    http_status_code INTEGER NOT NULL,
    error_message TEXT,
    logged_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fetch_menu_exception (
    restaurant_id INTEGER NOT NULL,
    exception TEXT,
    logged_at TEXT NOT NULL
);
"#;

const DROP_STATUS_SQL: &str = r#"
DROP TABLE IF EXISTS grid;
DROP TABLE IF EXISTS restaurants_status;
DROP TABLE IF EXISTS crawl_meta;
"#;

const DROP_DATA_SQL: &str = r#"
DROP TABLE IF EXISTS restaurants;
DROP TABLE IF EXISTS menus;
DROP TABLE IF EXISTS category;
DROP TABLE IF EXISTS restaurant_categories;
"#;

const DROP_LOG_SQL: &str = r#"
DROP TABLE IF EXISTS fetch_restaurant_log;
DROP TABLE IF EXISTS fetch_restaurant_exception;
DROP TABLE IF EXISTS fetch_menu_log;
DROP TABLE IF EXISTS fetch_menu_exception;
"#;

/// Which of the three stores a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Status,
    Data,
    Log,
}

impl StoreKind {
    fn schema(&self) -> &'static str {
        match self {
            Self::Status => STATUS_SCHEMA_SQL,
            Self::Data => DATA_SCHEMA_SQL,
            Self::Log => LOG_SCHEMA_SQL,
        }
    }

    fn drop_sql(&self) -> &'static str {
        match self {
            Self::Status => DROP_STATUS_SQL,
            Self::Data => DROP_DATA_SQL,
            Self::Log => DROP_LOG_SQL,
        }
    }
}

/// Creates any missing tables for `kind`
pub fn initialize_schema(conn: &Connection, kind: StoreKind) -> Result<(), rusqlite::Error> {
    conn.execute_batch(kind.schema())
}

/// Drops and recreates every table for `kind`
pub fn reset_schema(conn: &Connection, kind: StoreKind) -> Result<(), rusqlite::Error> {
    conn.execute_batch(kind.drop_sql())?;
    conn.execute_batch(kind.schema())
}
