//! HTTP integration tests
//!
//! These tests use wiremock to stand in for the catalog service and run the
//! complete crawl over real HTTP. The pool blocks its threads, so it runs on
//! the blocking pool while the mock server keeps serving.

use grid_harvester::config::{
    Config, GridConfig, MajorCategoryEntry, MinorCategoryEntry, PoolConfig, RemoteConfig,
    RetryConfig, StorageConfig, UserAgentConfig,
};
use grid_harvester::crawler::{run_crawl, store_paths, HarvestSummary, PhaseSelection};
use grid_harvester::state::{Phase, UnitStatus};
use grid_harvester::storage::{LogKey, LogStore, RecordStore, RestaurantId, StorePaths, TaskStore};
use grid_harvester::Cell;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(30);

const RESTAURANTS: &str = r#"[
    {"id": 11, "name": "Noodle House", "name_for_url": "noodle-house", "rating": 4.8,
     "rating_count": 321, "month_sales": 2000, "phone": "0571-1234",
     "latitude": 30.27, "longitude": 120.15, "is_free_delivery": true,
     "delivery_fee": 0, "minimum_order_amount": 20, "address": "1 West Lake Rd"}
]"#;

const MENU: &str = r#"[
    {"name": "Noodles", "foods": [
        {"name": "Beef noodles", "pinyin_name": "niuroumian", "rating": 4.9,
         "rating_count": 50, "month_sales": 400, "description": "spicy",
         "category_id": 900, "restaurant_id": 11,
         "specfoods": [{"price": 18.0, "name": "small"}, {"price": 24.0, "name": "large"}]}
    ]}
]"#;

/// Creates a test configuration pointing at the mock server
fn create_test_config(dir: &TempDir, base_url: String) -> Config {
    Config {
        grid: GridConfig {
            central: "wtw3sm0".to_string(),
            depth: 0,
        },
        pool: PoolConfig {
            processes: 1,
            threads: 2,
            ..PoolConfig::default()
        },
        remote: RemoteConfig {
            base_url,
            request_timeout_secs: 5,
            page_limit: 1000,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        // Bounded so a broken expectation fails the test instead of hanging it
        retry: RetryConfig {
            max_attempts: 5,
            ..RetryConfig::default()
        },
        storage: StorageConfig {
            directory: dir.path().display().to_string(),
            name: Some("http".to_string()),
        },
        taxonomy: vec![MajorCategoryEntry {
            id: 207,
            name: "Fast food".to_string(),
            minors: vec![MinorCategoryEntry {
                id: 208,
                name: "Noodles".to_string(),
            }],
        }],
    }
}

async fn crawl(config: Config, selection: PhaseSelection) -> (StorePaths, HarvestSummary) {
    tokio::task::spawn_blocking(move || {
        let paths = store_paths(&config);
        let summary = run_crawl(&config, &paths, selection, false, Some("test-hash"))
            .expect("crawl failed");
        (paths, summary)
    })
    .await
    .expect("crawl task panicked")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restaurant_listing_retries_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/restapi/v4/restaurants"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream busy"))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/restapi/v4/restaurants"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESTAURANTS))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, mock_server.uri());
    let (paths, summary) = crawl(config, PhaseSelection::Restaurants).await;

    assert_eq!(summary.seeded_cells, 1);
    assert_eq!(summary.restaurants.unwrap().units.done, 1);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    let errors = logs
        .http_errors_for(&LogKey::Cell("wtw3sm0".to_string()))
        .unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].status_code, 500);
    assert_eq!(errors[0].message, "upstream busy");

    let grid: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    assert_eq!(
        grid.status_of(&Cell::parse("wtw3sm0").unwrap()).unwrap(),
        Some(UnitStatus::Done)
    );

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    let stored = records.get_restaurant(11).unwrap().unwrap();
    assert_eq!(stored.name, "Noodle House");
    assert_eq!(stored.is_free_delivery, Some(true));
    assert_eq!(records.count_category_links().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_shape() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/restapi/v4/restaurants"))
        .and(query_param("type", "geohash"))
        .and(query_param("geohash", "wtw3sm0"))
        .and(query_param("restaurant_category_id", "208"))
        .and(query_param("limit", "1000"))
        .and(header(
            "user-agent",
            "TestBot/1.0.0 (+https://example.com/contact; test@example.com)",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, mock_server.uri());
    let (paths, summary) = crawl(config, PhaseSelection::Restaurants).await;

    assert_eq!(summary.restaurants.unwrap().units.done, 1);
    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    assert_eq!(logs.count_http_errors(Phase::Restaurants).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_crawl_with_menus() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/restapi/v4/restaurants"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESTAURANTS))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/restapi/shopping/v2/menu"))
        .and(query_param("restaurant_id", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MENU))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, mock_server.uri());
    let (paths, summary) = crawl(config, PhaseSelection::All).await;

    assert_eq!(summary.seeded_restaurants, 1);
    assert_eq!(summary.menus.unwrap().units.done, 1);

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    assert_eq!(records.count_menus_for(11).unwrap(), 1);

    let queue: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    assert_eq!(
        queue.status_of(&RestaurantId(11)).unwrap(),
        Some(UnitStatus::Done)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_menu_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/restapi/v4/restaurants"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESTAURANTS))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/restapi/shopping/v2/menu"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, mock_server.uri());
    let (paths, summary) = crawl(config, PhaseSelection::All).await;

    assert_eq!(summary.menus.unwrap().units.not_found, 1);

    let queue: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    assert_eq!(
        queue.status_of(&RestaurantId(11)).unwrap(),
        Some(UnitStatus::NotFound)
    );

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    assert_eq!(records.count_menus_for(11).unwrap(), 0);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    assert_eq!(logs.count_http_errors(Phase::Menus).unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_service_gives_up_when_bounded() {
    // Nothing listens on the discard port
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "http://127.0.0.1:9".to_string());
    config.retry.max_attempts = 2;

    let (paths, summary) = crawl(config, PhaseSelection::Restaurants).await;
    assert_eq!(summary.restaurants.unwrap().units.failed, 1);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    assert_eq!(logs.count_exceptions(Phase::Restaurants).unwrap(), 2);
}
