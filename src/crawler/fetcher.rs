//! HTTP fetcher implementation
//!
//! This module handles all requests to the remote catalog, including:
//! - Building HTTP clients with proper user agent strings
//! - Building restaurant-list and menu URLs
//! - Classifying responses into success, HTTP error and transport error
//!
//! Workers are plain OS threads. `HttpCatalog` drives the async client on a
//! runtime shared by one worker group, so each request blocks only the calling
//! thread.

use crate::config::{RemoteConfig, UserAgentConfig};
use crate::grid::Cell;
use crate::storage::RestaurantId;
use crate::HarvestError;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

/// Restaurant columns requested from the listing endpoint
const RESTAURANT_FIELDS: &[&str] = &[
    "id",
    "name",
    "phone",
    "name_for_url",
    "flavors",
    "rating",
    "is_free_delivery",
    "delivery_fee",
    "minimum_order_amount",
    "rating_count",
    "month_sales",
    "minimum_free_delivery_amount",
    "promotion_info",
    "address",
    "order_lead_time",
    "latitude",
    "longitude",
];

const RESTAURANT_EXTRAS: &[&str] = &["food_activity", "restaurant_activity", "certification"];

const RESTAURANTS_PATH: &str = "restapi/v4/restaurants";
const MENU_PATH: &str = "restapi/shopping/v2/menu";

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// 2xx response
    Success {
        /// Response body
        body: String,
    },

    /// Non-2xx response
    HttpError {
        /// The HTTP status code
        status_code: u16,
        /// Response body, logged alongside the status
        body: String,
    },

    /// Transport failure (connection refused, timeout, broken body, ...)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpError { status_code, .. } if *status_code == StatusCode::NOT_FOUND.as_u16())
    }
}

/// Source of catalog data for the workers
///
/// Calls block the calling thread until a result is available. Implementations
/// are shared by every worker thread of a group.
pub trait CatalogSource: Sync {
    /// Restaurants listed in `cell` under minor category `category_id`
    fn restaurants(&self, cell: &Cell, category_id: u32) -> FetchResult;

    /// Full menu of one restaurant
    fn menu(&self, restaurant: RestaurantId) -> FetchResult;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Bound on each request, from connect to last body byte
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Normalizes the configured base URL so relative endpoints join under it
pub fn parse_base_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    Ok(url)
}

/// URL listing the restaurants of one (cell, category) pair
pub fn restaurants_url(
    base: &Url,
    cell: &Cell,
    category_id: u32,
    limit: u32,
) -> Result<Url, url::ParseError> {
    let mut url = base.join(RESTAURANTS_PATH)?;
    {
        let mut query = url.query_pairs_mut();
        for field in RESTAURANT_FIELDS {
            query.append_pair("fields[]", field);
        }
        for extra in RESTAURANT_EXTRAS {
            query.append_pair("extras[]", extra);
        }
        query
            .append_pair("offset", "0")
            .append_pair("limit", &limit.to_string())
            .append_pair("type", "geohash")
            .append_pair("geohash", cell.as_str())
            .append_pair("restaurant_category_id", &category_id.to_string());
    }
    Ok(url)
}

/// URL of one restaurant's menu
pub fn menu_url(base: &Url, restaurant: RestaurantId) -> Result<Url, url::ParseError> {
    let mut url = base.join(MENU_PATH)?;
    url.query_pairs_mut()
        .append_pair("restaurant_id", &restaurant.0.to_string());
    Ok(url)
}

/// Fetches a URL and classifies the outcome
///
/// Never retries; retrying is the worker's decision.
pub async fn fetch_url(client: &Client, url: &str) -> FetchResult {
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();

            if !status.is_success() {
                // The status alone decides the outcome; the body is only logged
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => format!("<unreadable body: {}>", e),
                };
                return FetchResult::HttpError {
                    status_code: status.as_u16(),
                    body,
                };
            }

            match response.text().await {
                Ok(body) => FetchResult::Success { body },
                Err(e) => FetchResult::NetworkError {
                    error: format!("Failed to read body (HTTP {}): {}", status.as_u16(), e),
                },
            }
        }
        Err(e) => {
            // Classify error
            if e.is_timeout() {
                FetchResult::NetworkError {
                    error: format!("Request timeout: {}", e),
                }
            } else if e.is_connect() {
                FetchResult::NetworkError {
                    error: format!("Connection failed: {}", e),
                }
            } else {
                FetchResult::NetworkError {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Catalog source backed by the remote HTTP service
pub struct HttpCatalog {
    runtime: Arc<Runtime>,
    client: Client,
    base: Url,
    page_limit: u32,
}

impl HttpCatalog {
    /// Creates a source that runs requests on `runtime`
    pub fn new(
        runtime: Arc<Runtime>,
        remote: &RemoteConfig,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, HarvestError> {
        let base = parse_base_url(&remote.base_url).map_err(|e| {
            crate::ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", remote.base_url, e))
        })?;
        let client = build_http_client(user_agent, remote.request_timeout())?;

        Ok(Self {
            runtime,
            client,
            base,
            page_limit: remote.page_limit,
        })
    }

    fn get(&self, url: Result<Url, url::ParseError>) -> FetchResult {
        match url {
            Ok(url) => {
                tracing::trace!("GET {}", url);
                self.runtime.block_on(fetch_url(&self.client, url.as_str()))
            }
            Err(e) => FetchResult::NetworkError {
                error: format!("Failed to build request URL: {}", e),
            },
        }
    }
}

impl CatalogSource for HttpCatalog {
    fn restaurants(&self, cell: &Cell, category_id: u32) -> FetchResult {
        self.get(restaurants_url(&self.base, cell, category_id, self.page_limit))
    }

    fn menu(&self, restaurant: RestaurantId) -> FetchResult {
        self.get(menu_url(&self.base, restaurant))
    }
}
