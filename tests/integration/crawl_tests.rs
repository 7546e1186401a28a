//! Integration tests for the harvest pipeline
//!
//! These tests run the worker pool against a scripted in-process catalog
//! source and check the three stores after the pool returns.

use grid_harvester::config::{
    Config, GridConfig, MajorCategoryEntry, MinorCategoryEntry, PoolConfig, RemoteConfig,
    RetryConfig, StorageConfig, UserAgentConfig,
};
use grid_harvester::crawler::{
    prepare_stores, run_harvest, store_paths, worker_settings, CatalogSource, FetchResult,
    PhaseSelection, WorkerPool,
};
use grid_harvester::state::{Phase, UnitStatus};
use grid_harvester::storage::{
    open_connection, LogKey, LogStore, RecordStore, RestaurantId, StorageError, StorePaths,
    TaskStore,
};
use grid_harvester::{Cell, HarvestError};
use rusqlite::TransactionBehavior;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(30);

type Responder = dyn Fn(&str, usize) -> FetchResult + Send + Sync;

/// Catalog source answering from a function of (request key, attempt number)
///
/// Request keys are `"<cell>/<category>"` for restaurant listings and
/// `"menu/<id>"` for menus. Attempt numbers start at 1 per key.
#[derive(Clone)]
struct StubCatalog {
    attempts: Arc<Mutex<HashMap<String, usize>>>,
    respond: Arc<Responder>,
}

impl StubCatalog {
    fn new(respond: impl Fn(&str, usize) -> FetchResult + Send + Sync + 'static) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            respond: Arc::new(respond),
        }
    }

    fn call(&self, key: String) -> FetchResult {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        (self.respond)(&key, attempt)
    }

    fn attempts(&self, key: &str) -> usize {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.attempts.lock().unwrap().values().sum()
    }
}

impl CatalogSource for StubCatalog {
    fn restaurants(&self, cell: &Cell, category_id: u32) -> FetchResult {
        self.call(format!("{}/{}", cell, category_id))
    }

    fn menu(&self, restaurant: RestaurantId) -> FetchResult {
        self.call(format!("menu/{}", restaurant))
    }
}

fn ok(body: impl Into<String>) -> FetchResult {
    FetchResult::Success { body: body.into() }
}

fn status(code: u16) -> FetchResult {
    FetchResult::HttpError {
        status_code: code,
        body: format!("HTTP {}", code),
    }
}

fn restaurant_json(id: i64) -> String {
    format!(
        r#"[{{"id": {id}, "name": "Restaurant {id}", "name_for_url": "r{id}",
             "rating": 4.5, "rating_count": 10, "month_sales": 100,
             "latitude": 30.2, "longitude": 120.1, "is_free_delivery": false}}]"#,
        id = id
    )
}

fn menu_json(prices: &[f64]) -> String {
    let specfoods: Vec<String> = prices
        .iter()
        .map(|p| format!(r#"{{"price": {}}}"#, p))
        .collect();
    format!(
        r#"[{{"name": "Mains", "foods": [{{"name": "Dish", "month_sales": 5, "category_id": 1,
             "specfoods": [{}]}}]}}]"#,
        specfoods.join(",")
    )
}

/// Creates a test configuration with a single-category taxonomy
fn create_test_config(dir: &TempDir, depth: u32, threads: usize) -> Config {
    Config {
        grid: GridConfig {
            central: "wtw3sm0".to_string(),
            depth,
        },
        pool: PoolConfig {
            processes: 1,
            threads,
            ..PoolConfig::default()
        },
        remote: RemoteConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 1,
            page_limit: 100,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        retry: RetryConfig::default(),
        storage: StorageConfig {
            directory: dir.path().display().to_string(),
            name: Some("it".to_string()),
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

fn prepared(config: &Config) -> StorePaths {
    let paths = store_paths(config);
    prepare_stores(config, &paths, false, None).unwrap();
    paths
}

fn cells() -> Vec<Cell> {
    ["wtw3sm0", "wtw3sm1", "wtw3sm2"]
        .iter()
        .map(|h| Cell::parse(h).unwrap())
        .collect()
}

#[test]
fn test_three_cells_two_threads() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 2);
    let paths = prepared(&config);

    let mut grid: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    assert_eq!(grid.seed(cells()).unwrap(), 3);

    // One restaurant per cell; wtw3sm2 lists the same restaurant as wtw3sm1
    let source = StubCatalog::new(|key, _| match key {
        "wtw3sm0/208" => ok(restaurant_json(100)),
        "wtw3sm1/208" | "wtw3sm2/208" => ok(restaurant_json(101)),
        other => panic!("unexpected request {}", other),
    });

    let settings = worker_settings(&config);
    let stub = source.clone();
    let summary = WorkerPool::new(1, 2)
        .run(Phase::Restaurants, &paths, &settings, move |_| Ok(stub.clone()))
        .unwrap();

    assert_eq!(summary.units.done, 3);
    assert_eq!(source.total_calls(), 3);

    assert_eq!(grid.count_by_status(UnitStatus::Done).unwrap(), 3);
    assert_eq!(grid.count_by_status(UnitStatus::Pending).unwrap(), 0);
    assert_eq!(grid.count_by_status(UnitStatus::Claimed).unwrap(), 0);

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    assert_eq!(records.restaurant_ids().unwrap(), vec![100, 101]);
    assert_eq!(records.count_category_links().unwrap(), 2);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    assert_eq!(logs.count_http_errors(Phase::Restaurants).unwrap(), 0);
    assert_eq!(logs.count_exceptions(Phase::Restaurants).unwrap(), 0);
}

#[test]
fn test_server_errors_are_logged_then_retried() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 1);
    let paths = prepared(&config);

    let mut grid: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    grid.seed(vec![Cell::parse("wtw3sm0").unwrap()]).unwrap();

    let source = StubCatalog::new(|_, attempt| {
        if attempt <= 2 {
            status(500)
        } else {
            ok(restaurant_json(7))
        }
    });

    let settings = worker_settings(&config);
    let stub = source.clone();
    WorkerPool::new(1, 1)
        .run(Phase::Restaurants, &paths, &settings, move |_| Ok(stub.clone()))
        .unwrap();

    assert_eq!(source.attempts("wtw3sm0/208"), 3);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    let errors = logs
        .http_errors_for(&LogKey::Cell("wtw3sm0".to_string()))
        .unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.status_code == 500));

    assert_eq!(
        grid.status_of(&Cell::parse("wtw3sm0").unwrap()).unwrap(),
        Some(UnitStatus::Done)
    );
}

#[test]
fn test_menu_not_found_is_terminal() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 2);
    let paths = prepared(&config);

    let mut queue: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    queue.seed(vec![RestaurantId(1), RestaurantId(2)]).unwrap();

    let source = StubCatalog::new(|key, _| match key {
        "menu/1" => status(404),
        "menu/2" => ok(menu_json(&[10.0, 20.0])),
        other => panic!("unexpected request {}", other),
    });

    let settings = worker_settings(&config);
    let stub = source.clone();
    let summary = WorkerPool::new(1, 2)
        .run(Phase::Menus, &paths, &settings, move |_| Ok(stub.clone()))
        .unwrap();

    assert_eq!(summary.units.not_found, 1);
    assert_eq!(summary.units.done, 1);
    assert_eq!(source.attempts("menu/1"), 1);

    assert_eq!(
        queue.status_of(&RestaurantId(1)).unwrap(),
        Some(UnitStatus::NotFound)
    );
    assert_eq!(
        queue.status_of(&RestaurantId(2)).unwrap(),
        Some(UnitStatus::Done)
    );

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    assert_eq!(records.count_menus_for(1).unwrap(), 0);
    assert_eq!(records.count_menus_for(2).unwrap(), 1);

    let logs = LogStore::open(&paths.log, TIMEOUT).unwrap();
    assert_eq!(
        logs.http_errors_for(&LogKey::Restaurant(1)).unwrap().len(),
        1
    );
}

#[test]
fn test_full_harvest_then_resume() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 1, 3);
    let paths = prepared(&config);

    // Restaurant id derived from the last geohash character, so cells share ids
    let source = StubCatalog::new(|key, _| {
        if let Some(id) = key.strip_prefix("menu/") {
            let id: i64 = id.parse().unwrap();
            ok(menu_json(&[id as f64]))
        } else {
            let last = key.split('/').next().unwrap().chars().last().unwrap();
            ok(restaurant_json(last as i64 % 4))
        }
    });

    let stub = source.clone();
    let summary = run_harvest(&config, &paths, PhaseSelection::All, move |_| {
        Ok(stub.clone())
    })
    .unwrap();

    assert_eq!(summary.seeded_cells, 9);
    assert_eq!(summary.restaurants.unwrap().units.done, 9);

    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    let restaurants = records.count_restaurants().unwrap();
    assert!(restaurants >= 1 && restaurants <= 4);
    assert_eq!(summary.seeded_restaurants as u64, restaurants);
    assert_eq!(summary.menus.unwrap().units.done, restaurants);
    assert_eq!(records.count_menus().unwrap(), restaurants);

    let calls_after_first_run = source.total_calls();

    // Resuming a finished crawl queues nothing new and fetches nothing
    prepare_stores(&config, &paths, false, None).unwrap();
    let stub = source.clone();
    let resumed = run_harvest(&config, &paths, PhaseSelection::All, move |_| {
        Ok(stub.clone())
    })
    .unwrap();

    assert_eq!(resumed.seeded_cells, 0);
    assert_eq!(resumed.seeded_restaurants, 0);
    assert_eq!(resumed.restaurants.unwrap().units.units(), 0);
    assert_eq!(source.total_calls(), calls_after_first_run);
    assert_eq!(records.count_menus().unwrap(), restaurants);
}

#[test]
fn test_fresh_run_resets_stores() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 1);
    let paths = prepared(&config);

    let source = StubCatalog::new(|_, _| ok(restaurant_json(5)));
    let stub = source.clone();
    run_harvest(&config, &paths, PhaseSelection::Restaurants, move |_| {
        Ok(stub.clone())
    })
    .unwrap();

    prepare_stores(&config, &paths, true, None).unwrap();

    let grid: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    assert_eq!(grid.count_total().unwrap(), 0);
    let records = RecordStore::open(&paths.data, TIMEOUT).unwrap();
    assert_eq!(records.count_restaurants().unwrap(), 0);
    assert_eq!(records.count_categories().unwrap(), 1);
}

#[test]
fn test_many_workers_claim_each_unit_once() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 4);
    let paths = prepared(&config);

    let mut queue: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    queue.seed((1..=60).map(RestaurantId)).unwrap();

    let source = StubCatalog::new(|_, _| ok("[]"));
    let settings = worker_settings(&config);
    let stub = source.clone();
    let summary = WorkerPool::new(3, 4)
        .run(Phase::Menus, &paths, &settings, move |_| Ok(stub.clone()))
        .unwrap();

    assert_eq!(summary.units.done, 60);
    assert_eq!(source.total_calls(), 60);
    for id in 1..=60 {
        assert_eq!(source.attempts(&format!("menu/{}", id)), 1);
    }
    assert_eq!(queue.count_finished().unwrap(), 60);
}

#[test]
fn test_lock_timeout_fails_the_workers() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, 0, 2);
    let paths = prepared(&config);

    let mut grid: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
    grid.seed(cells()).unwrap();

    let source = StubCatalog::new(|key, _| panic!("unexpected request {}", key));
    let settings = worker_settings(&config).with_busy_timeout(Duration::from_millis(100));

    // Another writer keeps the status store locked for the whole run
    let mut holder = open_connection(&paths.status, TIMEOUT).unwrap();
    let tx = holder
        .transaction_with_behavior(TransactionBehavior::Exclusive)
        .unwrap();

    let stub = source.clone();
    let result = WorkerPool::new(1, 2).run(Phase::Restaurants, &paths, &settings, move |_| {
        Ok(stub.clone())
    });
    drop(tx);

    match result {
        Err(HarvestError::WorkersFailed {
            failed,
            total,
            first,
        }) => {
            assert_eq!(failed, 2);
            assert_eq!(total, 2);
            assert!(matches!(
                *first,
                HarvestError::Storage(StorageError::Sqlite(_))
            ));
        }
        other => panic!("unexpected result: {:?}", other.map(|s| s.units)),
    }

    assert_eq!(source.total_calls(), 0);
    assert_eq!(grid.count_by_status(UnitStatus::Pending).unwrap(), 3);
}
