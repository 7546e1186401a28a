//! Fetch worker loop
//!
//! Each worker thread repeats: claim a unit, fetch everything the unit needs
//! (retrying failed requests), buffer the parsed records, flush them in one
//! write, finish the unit and report progress. It stops when no pending unit is
//! left.
//!
//! Remote failures never leave this module: they are logged and retried. Only
//! store errors end a worker.

use crate::crawler::fetcher::{CatalogSource, FetchResult};
use crate::crawler::parser::{parse_menu, parse_restaurants};
use crate::crawler::retry::RetryPolicy;
use crate::grid::Cell;
use crate::state::{Phase, UnitStatus};
use crate::storage::{
    LogKey, LogStore, RecordStore, RestaurantBatch, RestaurantId, StorageResult, StorePaths,
    TaskStore, WorkUnit,
};
use crate::taxonomy::Taxonomy;
use std::time::Duration;

/// Settings shared by every worker of a run
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub retry: RetryPolicy,
    pub taxonomy: Taxonomy,
    /// Lock wait for every store operation
    pub busy_timeout: Duration,
    /// Claims older than this are returned to pending before a phase starts
    pub lease_timeout: Option<Duration>,
}

impl WorkerSettings {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            retry: RetryPolicy::default(),
            taxonomy,
            busy_timeout: Duration::from_secs(30),
            lease_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Option<Duration>) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }
}

/// Units handled by one worker, by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub done: u64,
    pub not_found: u64,
    pub failed: u64,
}

impl WorkerSummary {
    pub fn units(&self) -> u64 {
        self.done + self.not_found + self.failed
    }

    fn record(&mut self, outcome: UnitStatus) {
        match outcome {
            UnitStatus::Done => self.done += 1,
            UnitStatus::NotFound => self.not_found += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Pending | UnitStatus::Claimed => {}
        }
    }

    pub fn merge(&mut self, other: &WorkerSummary) {
        self.done += other.done;
        self.not_found += other.not_found;
        self.failed += other.failed;
    }
}

/// Outcome of one request after retries
#[derive(Debug)]
enum Fetched<T> {
    Ok(T),
    NotFound,
    GaveUp,
}

/// One worker thread's view of the three stores
pub struct FetchWorker<'a, S: CatalogSource> {
    name: String,
    source: &'a S,
    settings: &'a WorkerSettings,
    paths: &'a StorePaths,
    records: RecordStore,
    logs: LogStore,
}

impl<'a, S: CatalogSource> FetchWorker<'a, S> {
    /// Opens this worker's own connections to the data and log stores
    pub fn open(
        name: impl Into<String>,
        source: &'a S,
        settings: &'a WorkerSettings,
        paths: &'a StorePaths,
    ) -> StorageResult<Self> {
        Ok(Self {
            name: name.into(),
            source,
            settings,
            paths,
            records: RecordStore::open(&paths.data, settings.busy_timeout)?,
            logs: LogStore::open(&paths.log, settings.busy_timeout)?,
        })
    }

    /// Runs the claim loop for `phase` until no pending unit is left
    pub fn run(&mut self, phase: Phase) -> StorageResult<WorkerSummary> {
        tracing::debug!("Worker {} started on {} phase", self.name, phase);

        let summary = match phase {
            Phase::Restaurants => {
                let mut tasks: TaskStore<Cell> =
                    TaskStore::open(&self.paths.status, self.settings.busy_timeout)?;
                self.claim_loop(&mut tasks, phase, Self::process_cell)?
            }
            Phase::Menus => {
                let mut tasks: TaskStore<RestaurantId> =
                    TaskStore::open(&self.paths.status, self.settings.busy_timeout)?;
                self.claim_loop(&mut tasks, phase, Self::process_restaurant)?
            }
        };

        tracing::debug!(
            "Worker {} finished: {} done, {} not found, {} failed",
            self.name,
            summary.done,
            summary.not_found,
            summary.failed
        );
        Ok(summary)
    }

    fn claim_loop<U: WorkUnit>(
        &mut self,
        tasks: &mut TaskStore<U>,
        phase: Phase,
        process: fn(&mut Self, &U) -> StorageResult<UnitStatus>,
    ) -> StorageResult<WorkerSummary> {
        let mut summary = WorkerSummary::default();

        while let Some(unit) = tasks.claim_next()? {
            tracing::trace!("Worker {} claimed {}", self.name, unit);

            let outcome = process(self, &unit)?;
            let finished = tasks.finish(&unit, outcome)?;
            summary.record(outcome);

            self.report_progress(tasks, phase, finished)?;
        }

        Ok(summary)
    }

    /// Fetches every category of one cell, then writes the cell's records
    fn process_cell(&mut self, cell: &Cell) -> StorageResult<UnitStatus> {
        let key = cell.log_key();
        let mut batch = RestaurantBatch::new();
        let mut gave_up = false;

        for category_id in self.settings.taxonomy.minor_ids() {
            let fetched = self.fetch_with_retry(
                &key,
                false,
                || self.source.restaurants(cell, category_id),
                parse_restaurants,
            )?;

            match fetched {
                Fetched::Ok(restaurants) => batch.push(category_id, restaurants),
                Fetched::GaveUp => gave_up = true,
                // Only menu requests treat 404 as final
                Fetched::NotFound => gave_up = true,
            }
        }

        if !batch.is_empty() {
            let written = self.records.insert_restaurants(&batch);
            batch.clear();
            let inserted = written?;
            tracing::trace!("Cell {}: {} new restaurants", cell, inserted);
        }

        Ok(if gave_up {
            UnitStatus::Failed
        } else {
            UnitStatus::Done
        })
    }

    /// Fetches and stores one restaurant's menu
    fn process_restaurant(&mut self, restaurant: &RestaurantId) -> StorageResult<UnitStatus> {
        let key = restaurant.log_key();
        let id = restaurant.0;

        let fetched = self.fetch_with_retry(
            &key,
            true,
            || self.source.menu(*restaurant),
            |body| parse_menu(id, body),
        )?;

        match fetched {
            Fetched::Ok(items) => {
                self.records.replace_menu(id, &items)?;
                Ok(UnitStatus::Done)
            }
            Fetched::NotFound => Ok(UnitStatus::NotFound),
            Fetched::GaveUp => Ok(UnitStatus::Failed),
        }
    }

    /// Issues one request until it succeeds, is final, or the policy gives up
    ///
    /// Every failed attempt leaves a row in the log store. A body that fails to
    /// parse counts as a failed attempt.
    fn fetch_with_retry<T>(
        &self,
        key: &LogKey,
        not_found_is_final: bool,
        request: impl Fn() -> FetchResult,
        parse: impl Fn(&str) -> Result<T, serde_json::Error>,
    ) -> StorageResult<Fetched<T>> {
        let mut failures = 0u32;

        loop {
            let result = request();
            let not_found = result.is_not_found();

            match result {
                FetchResult::Success { body } => match parse(&body) {
                    Ok(parsed) => return Ok(Fetched::Ok(parsed)),
                    Err(e) => {
                        let message = format!("Malformed response: {}", e);
                        tracing::warn!("{} ({}): {}", key, self.name, message);
                        self.logs.record_exception(key, &message)?;
                    }
                },
                FetchResult::HttpError { status_code, body } => {
                    tracing::warn!("{} ({}): HTTP {}", key, self.name, status_code);
                    self.logs.record_http_error(key, status_code, &body)?;

                    if not_found_is_final && not_found {
                        return Ok(Fetched::NotFound);
                    }
                }
                FetchResult::NetworkError { error } => {
                    tracing::warn!("{} ({}): {}", key, self.name, error);
                    self.logs.record_exception(key, &error)?;
                }
            }

            failures = failures.saturating_add(1);
            if !self.settings.retry.allows_retry(failures) {
                tracing::warn!("{}: giving up after {} failed attempts", key, failures);
                return Ok(Fetched::GaveUp);
            }

            let delay = self.settings.retry.delay_for(failures);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }

    fn report_progress<U: WorkUnit>(
        &self,
        tasks: &TaskStore<U>,
        phase: Phase,
        finished: u64,
    ) -> StorageResult<()> {
        let total = tasks.count_total()?;
        let records = match phase {
            Phase::Restaurants => self.records.count_restaurants()?,
            Phase::Menus => self.records.count_menus()?,
        };
        let percent = if total == 0 {
            100.0
        } else {
            finished as f64 / total as f64 * 100.0
        };

        tracing::info!(
            phase = %phase,
            finished,
            total,
            records,
            worker = %self.name,
            "Fetching {} ({}/{}) {:.2}%, {} records",
            phase,
            finished,
            total,
            percent,
            records
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bootstrap;
    use crate::taxonomy::MajorCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Source answering from a script of responses per request key
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<HashMap<String, Vec<FetchResult>>>,
        fallback: Option<FetchResult>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn respond(&self, key: String) -> FetchResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.get_mut(&key) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => self.fallback.clone().unwrap_or(FetchResult::Success {
                    body: "[]".to_string(),
                }),
            }
        }
    }

    impl CatalogSource for ScriptedSource {
        fn restaurants(&self, cell: &Cell, category_id: u32) -> FetchResult {
            self.respond(format!("{}/{}", cell, category_id))
        }

        fn menu(&self, restaurant: RestaurantId) -> FetchResult {
            self.respond(format!("menu/{}", restaurant))
        }
    }

    fn one_category() -> Taxonomy {
        Taxonomy::new(vec![MajorCategory {
            id: 207,
            name: "Fast food".to_string(),
            minors: vec![(208, "Noodles".to_string())],
        }])
    }

    fn setup() -> (TempDir, StorePaths) {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::for_name(dir.path(), "test");
        bootstrap(&paths, false, TIMEOUT).unwrap();
        (dir, paths)
    }

    fn http_error(status_code: u16) -> FetchResult {
        FetchResult::HttpError {
            status_code,
            body: "error".to_string(),
        }
    }

    #[test]
    fn test_retries_until_success() {
        let (_dir, paths) = setup();
        let mut tasks: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
        tasks.seed(vec![Cell::parse("wtw3sm0").unwrap()]).unwrap();

        let source = ScriptedSource::default();
        source.script.lock().unwrap().insert(
            "wtw3sm0/208".to_string(),
            vec![
                http_error(500),
                FetchResult::NetworkError {
                    error: "timeout".to_string(),
                },
                FetchResult::Success {
                    body: r#"[{"id": 7, "name": "A", "name_for_url": "a"}]"#.to_string(),
                },
            ],
        );

        let settings = WorkerSettings::new(one_category()).with_busy_timeout(TIMEOUT);
        let mut worker = FetchWorker::open("t0", &source, &settings, &paths).unwrap();
        let summary = worker.run(Phase::Restaurants).unwrap();

        assert_eq!(summary.done, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let key = LogKey::Cell("wtw3sm0".to_string());
        assert_eq!(worker.logs.http_errors_for(&key).unwrap().len(), 1);
        assert_eq!(worker.logs.exceptions_for(&key).unwrap().len(), 1);
        assert_eq!(worker.records.count_restaurants().unwrap(), 1);
    }

    #[test]
    fn test_malformed_body_is_retried() {
        let (_dir, paths) = setup();
        let mut tasks: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
        tasks.seed(vec![RestaurantId(9)]).unwrap();

        let source = ScriptedSource::default();
        source.script.lock().unwrap().insert(
            "menu/9".to_string(),
            vec![FetchResult::Success {
                body: "<html>".to_string(),
            }],
        );

        let settings = WorkerSettings::new(one_category());
        let mut worker = FetchWorker::open("t0", &source, &settings, &paths).unwrap();
        let summary = worker.run(Phase::Menus).unwrap();

        assert_eq!(summary.done, 1);
        assert_eq!(worker.logs.count_exceptions(Phase::Menus).unwrap(), 1);
    }

    #[test]
    fn test_bounded_retry_marks_unit_failed() {
        let (_dir, paths) = setup();
        let mut tasks: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
        let cell = Cell::parse("wtw3sm0").unwrap();
        tasks.seed(vec![cell.clone()]).unwrap();

        let source = ScriptedSource {
            fallback: Some(http_error(503)),
            ..ScriptedSource::default()
        };

        let settings = WorkerSettings::new(one_category()).with_retry(RetryPolicy::bounded(3));
        let mut worker = FetchWorker::open("t0", &source, &settings, &paths).unwrap();
        let summary = worker.run(Phase::Restaurants).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.status_of(&cell).unwrap(), Some(UnitStatus::Failed));
        assert_eq!(worker.logs.count_http_errors(Phase::Restaurants).unwrap(), 3);
    }

    #[test]
    fn test_not_found_is_final_for_menus() {
        let (_dir, paths) = setup();
        let mut tasks: TaskStore<RestaurantId> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
        tasks.seed(vec![RestaurantId(1)]).unwrap();

        let source = ScriptedSource {
            fallback: Some(http_error(404)),
            ..ScriptedSource::default()
        };

        let settings = WorkerSettings::new(one_category());
        let mut worker = FetchWorker::open("t0", &source, &settings, &paths).unwrap();
        let summary = worker.run(Phase::Menus).unwrap();

        assert_eq!(summary.not_found, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            tasks.status_of(&RestaurantId(1)).unwrap(),
            Some(UnitStatus::NotFound)
        );
        assert_eq!(worker.records.count_menus_for(1).unwrap(), 0);
    }

    #[test]
    fn test_not_found_is_retried_for_cells() {
        let (_dir, paths) = setup();
        let mut tasks: TaskStore<Cell> = TaskStore::open(&paths.status, TIMEOUT).unwrap();
        tasks.seed(vec![Cell::parse("wtw3sm0").unwrap()]).unwrap();

        let source = ScriptedSource::default();
        source
            .script
            .lock()
            .unwrap()
            .insert("wtw3sm0/208".to_string(), vec![http_error(404)]);

        let settings = WorkerSettings::new(one_category());
        let mut worker = FetchWorker::open("t0", &source, &settings, &paths).unwrap();
        let summary = worker.run(Phase::Restaurants).unwrap();

        assert_eq!(summary.done, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_summary_merge() {
        let mut total = WorkerSummary::default();
        total.merge(&WorkerSummary {
            done: 2,
            not_found: 1,
            failed: 0,
        });
        total.merge(&WorkerSummary {
            done: 1,
            not_found: 0,
            failed: 1,
        });
        assert_eq!(total.units(), 5);
        assert_eq!(total.done, 3);
    }
}
