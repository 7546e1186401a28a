//! JSON payload parsing
//!
//! Turns restaurant-list and menu responses into storage records. Unknown
//! fields are ignored; missing optional fields become NULL columns.

use crate::storage::{MenuItem, Restaurant};
use serde::{Deserialize, Serialize};

/// A menu category as returned by the menu endpoint
#[derive(Debug, Deserialize)]
struct MenuCategory {
    #[serde(default)]
    foods: Vec<Food>,
}

#[derive(Debug, Deserialize)]
struct Food {
    #[serde(default)]
    name: String,
    #[serde(default)]
    pinyin_name: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    rating_count: Option<i64>,
    #[serde(default)]
    month_sales: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category_id: Option<i64>,
    #[serde(default)]
    specfoods: Vec<SpecFood>,
}

/// One priced variant of a food; other variant fields are kept verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecFood {
    #[serde(default)]
    pub price: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parses a restaurant listing (a JSON array of restaurants)
pub fn parse_restaurants(body: &str) -> Result<Vec<Restaurant>, serde_json::Error> {
    serde_json::from_str(body)
}

/// Parses a menu (a JSON array of categories, each holding foods)
///
/// Every food becomes one `MenuItem` for `restaurant_id`, priced at the mean
/// of its variant prices.
pub fn parse_menu(restaurant_id: i64, body: &str) -> Result<Vec<MenuItem>, serde_json::Error> {
    let categories: Vec<MenuCategory> = serde_json::from_str(body)?;

    let mut items = Vec::new();
    for food in categories.into_iter().flat_map(|c| c.foods) {
        items.push(MenuItem {
            restaurant_id,
            price: mean_price(&food.specfoods),
            specfoods_json: serde_json::to_string(&food.specfoods)?,
            name: food.name,
            pinyin_name: food.pinyin_name,
            rating: food.rating,
            rating_count: food.rating_count,
            month_sales: food.month_sales,
            description: food.description,
            category_id: food.category_id,
        });
    }

    Ok(items)
}

/// Arithmetic mean of variant prices; 0 with no variants
pub fn mean_price(specfoods: &[SpecFood]) -> f64 {
    if specfoods.is_empty() {
        return 0.0;
    }
    specfoods.iter().map(|s| s.price).sum::<f64>() / specfoods.len() as f64
}
