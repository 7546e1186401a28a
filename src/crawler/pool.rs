//! Two-level worker pool
//!
//! A pool runs `processes` worker groups, each running `threads` worker
//! threads. Every group builds its own catalog source (for HTTP, one runtime
//! and one client) and shares it between its threads. `run` returns once every
//! thread of every group has exited.

use crate::config::PoolConfig;
use crate::crawler::fetcher::CatalogSource;
use crate::crawler::worker::{FetchWorker, WorkerSettings, WorkerSummary};
use crate::grid::Cell;
use crate::state::Phase;
use crate::storage::{RestaurantId, StorageResult, StorePaths, TaskStore};
use crate::{HarvestError, Result};
use std::thread;
use std::time::Duration;

/// Fixed-size pool of worker groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    processes: usize,
    threads: usize,
}

/// Aggregated outcome of a pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub workers: usize,
    pub units: WorkerSummary,
    /// Expired claims returned to pending before the workers started
    pub reaped: usize,
}

impl WorkerPool {
    pub fn new(processes: usize, threads: usize) -> Self {
        Self {
            processes: processes.max(1),
            threads: threads.max(1),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.processes, config.threads)
    }

    pub fn workers(&self) -> usize {
        self.processes * self.threads
    }

    /// Runs `phase` until its queue has no pending unit
    ///
    /// `make_source` is called once per group with the group index.
    ///
    /// # Returns
    ///
    /// * `Ok(PhaseSummary)` - Every worker exited normally
    /// * `Err(HarvestError::WorkersFailed)` - At least one worker or group
    ///   stopped on an error; the other workers still ran to completion
    /// * `Err(HarvestError::WorkerPanicked)` - A worker thread panicked
    pub fn run<S, F>(
        &self,
        phase: Phase,
        paths: &StorePaths,
        settings: &WorkerSettings,
        make_source: F,
    ) -> Result<PhaseSummary>
    where
        S: CatalogSource,
        F: Fn(usize) -> Result<S> + Sync,
    {
        let reaped = match settings.lease_timeout {
            Some(lease) => reap_expired(phase, paths, settings.busy_timeout, lease)?,
            None => 0,
        };
        if reaped > 0 {
            tracing::warn!(
                "Returned {} expired {} claims to pending",
                reaped,
                phase
            );
        }

        tracing::info!(
            "Starting {} phase with {} groups x {} threads",
            phase,
            self.processes,
            self.threads
        );

        let make_source = &make_source;
        let group_results: Vec<GroupResult> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.processes)
                .map(|group| {
                    thread::Builder::new()
                        .name(format!("harvest-g{}", group))
                        .spawn_scoped(scope, move || {
                            self.run_group(group, phase, paths, settings, make_source)
                        })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(group, handle)| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| GroupResult {
                        summaries: Vec::new(),
                        errors: vec![HarvestError::WorkerPanicked {
                            worker: format!("g{}", group),
                        }],
                        failed: self.threads,
                    }),
                    Err(e) => GroupResult::failed(self.threads, HarvestError::Io(e)),
                })
                .collect()
        });

        let mut summary = PhaseSummary {
            workers: self.workers(),
            reaped,
            ..PhaseSummary::default()
        };
        let mut failed = 0;
        let mut errors = Vec::new();
        for result in group_results {
            for worker in &result.summaries {
                summary.units.merge(worker);
            }
            failed += result.failed;
            errors.extend(result.errors);
        }

        if let Some(first) = errors.into_iter().next() {
            if self.workers() == 1 {
                return Err(first);
            }
            return Err(HarvestError::WorkersFailed {
                failed,
                total: self.workers(),
                first: Box::new(first),
            });
        }

        tracing::info!(
            "Finished {} phase: {} done, {} not found, {} failed",
            phase,
            summary.units.done,
            summary.units.not_found,
            summary.units.failed
        );
        Ok(summary)
    }

    fn run_group<S, F>(
        &self,
        group: usize,
        phase: Phase,
        paths: &StorePaths,
        settings: &WorkerSettings,
        make_source: &F,
    ) -> GroupResult
    where
        S: CatalogSource,
        F: Fn(usize) -> Result<S> + Sync,
    {
        let source = match make_source(group) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Worker group {} failed to start: {}", group, e);
                return GroupResult::failed(self.threads, e);
            }
        };
        let source = &source;

        tracing::debug!("Worker group {} started", group);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.threads)
                .map(|index| {
                    let name = format!("g{}-t{}", group, index);
                    let worker_name = name.clone();
                    let handle = thread::Builder::new()
                        .name(format!("harvest-{}", name))
                        .spawn_scoped(scope, move || -> Result<WorkerSummary> {
                            let mut worker =
                                FetchWorker::open(worker_name, source, settings, paths)?;
                            Ok(worker.run(phase)?)
                        });
                    (name, handle)
                })
                .collect();

            let mut result = GroupResult::default();
            for (name, handle) in handles {
                let outcome = match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(HarvestError::WorkerPanicked {
                            worker: name.clone(),
                        })
                    }),
                    Err(e) => Err(HarvestError::Io(e)),
                };

                match outcome {
                    Ok(summary) => result.summaries.push(summary),
                    Err(e) => {
                        tracing::error!("Worker {} stopped: {}", name, e);
                        result.failed += 1;
                        result.errors.push(e);
                    }
                }
            }
            result
        })
    }
}

#[derive(Debug, Default)]
struct GroupResult {
    summaries: Vec<WorkerSummary>,
    errors: Vec<HarvestError>,
    failed: usize,
}

impl GroupResult {
    fn failed(workers: usize, error: HarvestError) -> Self {
        Self {
            summaries: Vec::new(),
            errors: vec![error],
            failed: workers,
        }
    }
}

fn reap_expired(
    phase: Phase,
    paths: &StorePaths,
    busy_timeout: Duration,
    lease: Duration,
) -> StorageResult<usize> {
    match phase {
        Phase::Restaurants => {
            TaskStore::<Cell>::open(&paths.status, busy_timeout)?.reap_expired_claims(lease)
        }
        Phase::Menus => {
            TaskStore::<RestaurantId>::open(&paths.status, busy_timeout)?.reap_expired_claims(lease)
        }
    }
}
