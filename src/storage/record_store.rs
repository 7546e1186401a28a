//! Crawled catalog records
//!
//! Restaurants and category links are keyed by natural identifiers and
//! inserted with `INSERT OR IGNORE`, so a batch that is written twice (a
//! retried request, a re-fetched cell) leaves the store unchanged.

use crate::storage::sqlite::open_connection;
use crate::storage::traits::StorageResult;
use crate::taxonomy::Taxonomy;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// A restaurant as returned by the catalog listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Restaurant {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_for_url: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_count: Option<i64>,
    #[serde(default)]
    pub month_sales: Option<i64>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_free_delivery: Option<bool>,
    #[serde(default)]
    pub delivery_fee: Option<f64>,
    #[serde(default)]
    pub minimum_order_amount: Option<f64>,
    #[serde(default)]
    pub minimum_free_delivery_amount: Option<f64>,
    #[serde(default)]
    pub promotion_info: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// One dish on a restaurant's menu
#[derive(Debug, Clone, PartialEq)]
pub struct MenuItem {
    pub restaurant_id: i64,
    pub name: String,
    pub pinyin_name: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    /// Mean price over the item's variants
    pub price: f64,
    pub month_sales: Option<i64>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    /// Raw variant list as returned by the remote service
    pub specfoods_json: String,
}

/// Association between a minor category and a restaurant listed under it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryLink {
    pub category_id: u32,
    pub restaurant_id: i64,
}

/// Records buffered for one grid cell before they are written
#[derive(Debug, Default)]
pub struct RestaurantBatch {
    pub restaurants: Vec<Restaurant>,
    pub links: Vec<CategoryLink>,
}

impl RestaurantBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers the restaurants returned for one category query
    pub fn push(&mut self, category_id: u32, restaurants: Vec<Restaurant>) {
        for restaurant in restaurants {
            self.links.push(CategoryLink {
                category_id,
                restaurant_id: restaurant.id,
            });
            self.restaurants.push(restaurant);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.restaurants.is_empty() && self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.restaurants.len()
    }

    pub fn clear(&mut self) {
        self.restaurants.clear();
        self.links.clear();
    }
}

/// Handle to the data store
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        Ok(Self {
            conn: open_connection(path, busy_timeout)?,
        })
    }

    /// Loads the category reference table, ignoring rows already present
    pub fn load_categories(&mut self, taxonomy: &Taxonomy) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO category (id, name, major_id, major_name)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for category in taxonomy.categories() {
                inserted += stmt.execute(params![
                    category.id,
                    category.name,
                    category.major_id,
                    category.major_name
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Writes a cell's restaurants and category links in one transaction
    ///
    /// Restaurants already stored and links already present are skipped.
    /// Returns the number of new restaurant rows.
    pub fn insert_restaurants(&mut self, batch: &RestaurantBatch) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut inserted = 0;
        {
            let mut restaurant_stmt = tx.prepare(
                "INSERT OR IGNORE INTO restaurants (
                    id, name, name_for_url, rating, rating_count, month_sales, phone,
                    latitude, longitude, is_free_delivery, delivery_fee,
                    minimum_order_amount, minimum_free_delivery_amount,
                    promotion_info, address
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for r in &batch.restaurants {
                inserted += restaurant_stmt.execute(params![
                    r.id,
                    r.name,
                    r.name_for_url,
                    r.rating,
                    r.rating_count,
                    r.month_sales,
                    r.phone,
                    r.latitude,
                    r.longitude,
                    r.is_free_delivery,
                    r.delivery_fee,
                    r.minimum_order_amount,
                    r.minimum_free_delivery_amount,
                    r.promotion_info,
                    r.address,
                ])?;
            }

            let mut link_stmt = tx.prepare(
                "INSERT OR IGNORE INTO restaurant_categories (category_id, restaurant_id)
                 VALUES (?1, ?2)",
            )?;
            for link in &batch.links {
                link_stmt.execute(params![link.category_id, link.restaurant_id])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Replaces a restaurant's menu
    ///
    /// Any rows from an earlier fetch of the same restaurant are deleted in the
    /// same transaction, so a re-fetched menu is never stored twice.
    pub fn replace_menu(&mut self, restaurant_id: i64, items: &[MenuItem]) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM menus WHERE restaurant_id = ?1",
            params![restaurant_id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO menus (
                    restaurant_id, name, pinyin_name, rating, rating_count, price,
                    month_sales, description, category_id, specfoods_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for item in items {
                stmt.execute(params![
                    restaurant_id,
                    item.name,
                    item.pinyin_name,
                    item.rating,
                    item.rating_count,
                    item.price,
                    item.month_sales,
                    item.description,
                    item.category_id,
                    item.specfoods_json,
                ])?;
            }
        }

        tx.commit()?;
        Ok(items.len())
    }

    /// Every distinct restaurant id, used to seed the menu phase
    pub fn restaurant_ids(&self) -> StorageResult<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM restaurants ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn get_restaurant(&self, id: i64) -> StorageResult<Option<Restaurant>> {
        let restaurant = self
            .conn
            .query_row(
                "SELECT id, name, name_for_url, rating, rating_count, month_sales, phone,
                        latitude, longitude, is_free_delivery, delivery_fee,
                        minimum_order_amount, minimum_free_delivery_amount,
                        promotion_info, address
                 FROM restaurants WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Restaurant {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        name_for_url: row.get(2)?,
                        rating: row.get(3)?,
                        rating_count: row.get(4)?,
                        month_sales: row.get(5)?,
                        phone: row.get(6)?,
                        latitude: row.get(7)?,
                        longitude: row.get(8)?,
                        is_free_delivery: row.get(9)?,
                        delivery_fee: row.get(10)?,
                        minimum_order_amount: row.get(11)?,
                        minimum_free_delivery_amount: row.get(12)?,
                        promotion_info: row.get(13)?,
                        address: row.get(14)?,
                    })
                },
            )
            .optional()?;
        Ok(restaurant)
    }

    pub fn count_restaurants(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM restaurants")
    }

    pub fn count_menus(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM menus")
    }

    pub fn count_category_links(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM restaurant_categories")
    }

    pub fn count_categories(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM category")
    }

    pub fn count_menus_for(&self, restaurant_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM menus WHERE restaurant_id = ?1",
            params![restaurant_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
