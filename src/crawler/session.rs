//! Crawl session orchestration
//!
//! A [`CrawlSession`] drives the configured works to completion through three
//! escalating recovery layers: a bounded retry loop around each item, an
//! immediate batch reprocessing pass over a work's failures, and whole-session
//! recovery cycles that keep re-running the failure backlog until it drains,
//! the cycle cap is reached, or a cycle stops making progress.
//!
//! Every network operation leases a proxy and an adaptive deadline before it
//! runs, and settles its outcome back into the pool and the timeout
//! controller afterwards. The journals are written as items finish, so an
//! interrupted session loses at most the items that were in flight.

use crate::cache::open_cache;
use crate::config::{Config, WorkEntry};
use crate::crawler::{
    HttpBlobDownloader, ManifestProvider, RetryPolicy, ScrapeClient, UnitRef, WorkManifest,
};
use crate::journal::{parse_failed_ref, CrawlLog, FileJournalStore, Item};
use crate::output::{PersistentFailure, SessionReport, WorkOutcome};
use crate::proxy::{PoolMetrics, ProxyAddr, ProxyPool};
use crate::timeout::{OperationKind, TimeoutController};
use crate::{ErrorKind, ShioriError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// How many item dispatches between progress log lines
const PROGRESS_INTERVAL: usize = 10;

/// Result of one pass over one work
struct WorkPass {
    name: String,
    total_items: usize,
    already_done: usize,
    crawled: usize,
    failed: usize,
}

/// Per-work accounting carried across passes, keyed by the work's id
struct WorkMeta {
    name: String,
    total_items: usize,
    /// Successes already journaled when this session first saw the work
    baseline_done: usize,
    /// Set while the work cannot be enumerated at all
    error: Option<String>,
}

/// What a dry run would crawl for one work
#[derive(Debug, Clone)]
pub struct WorkPlan {
    pub name: String,
    pub total_items: usize,
    /// Item numbers that would be fetched
    pub outstanding: Vec<String>,
    pub error: Option<String>,
}

/// One crawl session over the configured works
///
/// Cheap to clone; clones share the same services and are handed to spawned
/// item and unit tasks.
#[derive(Clone)]
pub struct CrawlSession {
    config: Arc<Config>,
    pool: Arc<tokio::sync::Mutex<ProxyPool>>,
    controller: Arc<Mutex<TimeoutController>>,
    log: Arc<CrawlLog>,
    provider: Arc<ManifestProvider>,
    downloader: Arc<HttpBlobDownloader>,
}

impl CrawlSession {
    /// Builds a session and its production services from configuration
    pub fn new(config: Config) -> crate::Result<Self> {
        let controller = Arc::new(Mutex::new(TimeoutController::new(&config.timeouts)));
        let cache = Arc::new(Mutex::new(open_cache(Path::new(&config.storage.cache_path))));
        let pool = ProxyPool::new(&config.proxy, cache, Arc::clone(&controller))?;

        let store = FileJournalStore::new(Path::new(&config.storage.journal_dir))?;
        let log = Arc::new(CrawlLog::new(Box::new(store)));

        let fetcher = Arc::new(ScrapeClient::new(&config.fetcher)?);
        let provider = Arc::new(ManifestProvider::new(fetcher));
        let downloader = Arc::new(HttpBlobDownloader::new(Path::new(
            &config.storage.output_dir,
        )));

        Ok(Self::from_parts(
            config, pool, controller, log, provider, downloader,
        ))
    }

    /// Assembles a session from already-built services
    pub fn from_parts(
        config: Config,
        pool: ProxyPool,
        controller: Arc<Mutex<TimeoutController>>,
        log: Arc<CrawlLog>,
        provider: Arc<ManifestProvider>,
        downloader: Arc<HttpBlobDownloader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool: Arc::new(tokio::sync::Mutex::new(pool)),
            controller,
            log,
            provider,
            downloader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &CrawlLog {
        &self.log
    }

    /// Re-fetches the proxy list from its source
    pub async fn refresh_proxies(&self) -> crate::Result<usize> {
        self.pool.lock().await.refresh().await
    }

    /// Drops the persisted proxy pool along with the in-memory one
    pub async fn clear_proxy_cache(&self) {
        self.pool.lock().await.clear_cache();
    }

    pub async fn pool_metrics(&self) -> PoolMetrics {
        self.pool.lock().await.metrics()
    }

    /// Runs the session to completion
    ///
    /// Flow:
    /// 1. Crawl each configured work once, retrying items per the item policy.
    /// 2. For any work that still has failures, immediately reprocess that
    ///    batch with the batch policy.
    /// 3. While failures or unenumerated works remain, run whole-session
    ///    recovery cycles (bounded by `max-recovery-cycles`, escalating the
    ///    timeout controller each cycle) until the backlog drains or a cycle
    ///    makes no progress.
    /// 4. Reset the controller, rewrite the failed-references ledger, and
    ///    assemble the session report.
    pub async fn run(&self) -> crate::Result<SessionReport> {
        let started_at = Utc::now();
        tracing::info!(
            "Starting crawl session for {} works",
            self.config.works.len()
        );

        let item_policy = RetryPolicy::new(self.config.crawl.item_attempts);
        let batch_policy = RetryPolicy::new(self.config.crawl.batch_attempts);
        let cycle_policy = RetryPolicy::new(self.config.crawl.cycle_attempts);

        let mut meta: HashMap<String, WorkMeta> = HashMap::new();
        let mut recovered = 0usize;

        // First pass, with an immediate second chance for each work's failures
        for entry in &self.config.works {
            match self.crawl_work(entry, item_policy).await {
                Ok(pass) => {
                    let failed = pass.failed;
                    let name = pass.name.clone();
                    note_pass(&mut meta, entry, pass);

                    if failed > 0 {
                        tracing::info!(
                            "{} items failed for {}; reprocessing the batch",
                            failed,
                            name
                        );
                        match self.crawl_work(entry, batch_policy).await {
                            Ok(second) => {
                                recovered += failed.saturating_sub(second.failed);
                                note_pass(&mut meta, entry, second);
                            }
                            Err(error) => {
                                tracing::warn!(
                                    "Batch reprocessing for {} could not re-list items: {}",
                                    name,
                                    error
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::error!("Cannot enumerate {}: {}", entry.id, error);
                    note_abort(&mut meta, entry, error.to_string());
                }
            }
        }

        // Whole-session recovery cycles
        let max_cycles = self.config.crawl.max_recovery_cycles;
        let mut cycles_run = 0;
        loop {
            let failing = self.open_failures(&meta)?;
            let aborted = aborted_count(&meta);
            if failing == 0 && aborted == 0 {
                break;
            }
            if cycles_run >= max_cycles {
                tracing::warn!(
                    "Recovery cycle cap ({}) reached with {} items still failing",
                    max_cycles,
                    failing
                );
                break;
            }

            cycles_run += 1;
            self.controller.lock().unwrap().set_cycle(cycles_run);
            tracing::info!(
                "Recovery cycle {}/{}: {} failing items, {} works unenumerated",
                cycles_run,
                max_cycles,
                failing,
                aborted
            );

            let crawled = self.recovery_pass(&mut meta, cycle_policy).await?;

            let failing_after = self.open_failures(&meta)?;
            recovered += failing.saturating_sub(failing_after);

            if crawled == 0 && aborted_count(&meta) >= aborted {
                tracing::warn!(
                    "Recovery cycle {} made no progress; stopping early",
                    cycles_run
                );
                break;
            }
        }

        // Wind down
        self.controller.lock().unwrap().reset_to_defaults();
        let refs = self.log.rewrite_failed_refs()?;
        if refs > 0 {
            tracing::info!("{} persistent failures recorded for later retry", refs);
        }

        let report = self
            .build_report(started_at, cycles_run, recovered, &meta)
            .await?;
        tracing::info!(
            "Crawl session finished in {}s: {} crawled, {} still failing",
            report.duration_seconds(),
            report.total_crawled(),
            report.total_failed()
        );
        Ok(report)
    }

    /// Enumerates every configured work without crawling anything
    pub async fn plan(&self) -> crate::Result<Vec<WorkPlan>> {
        let mut plans = Vec::new();
        for entry in &self.config.works {
            match self.fetch_manifest(entry).await {
                Ok(manifest) => {
                    let name = display_name(entry, &manifest);
                    let outstanding = self.log.outstanding(&name, &manifest.items)?;
                    plans.push(WorkPlan {
                        name,
                        total_items: manifest.items.len(),
                        outstanding: outstanding.into_iter().map(|i| i.number).collect(),
                        error: None,
                    });
                }
                Err(error) => plans.push(WorkPlan {
                    name: fallback_name(entry),
                    total_items: 0,
                    outstanding: Vec::new(),
                    error: Some(error.to_string()),
                }),
            }
        }
        Ok(plans)
    }

    /// Re-crawls only the items named in the failed-references ledger
    ///
    /// One pass with the item policy, no recovery cycles. The ledger is
    /// rewritten from the journals afterwards, so corrected items drop out.
    pub async fn run_retry_failed(&self) -> crate::Result<SessionReport> {
        let started_at = Utc::now();
        let policy = RetryPolicy::new(self.config.crawl.item_attempts);

        let refs = self.log.failed_refs()?;
        let mut wanted: HashMap<String, HashSet<String>> = HashMap::new();
        for reference in &refs {
            if let Some((work, number)) = parse_failed_ref(reference) {
                wanted
                    .entry(work.to_string())
                    .or_default()
                    .insert(number.to_string());
            }
        }

        let mut meta: HashMap<String, WorkMeta> = HashMap::new();
        let mut recovered = 0usize;

        if wanted.is_empty() {
            tracing::info!("No failed references to retry");
        } else {
            tracing::info!(
                "Retrying {} failed references across {} works",
                refs.len(),
                wanted.len()
            );

            for entry in &self.config.works {
                match self.fetch_manifest(entry).await {
                    Ok(manifest) => {
                        let name = display_name(entry, &manifest);
                        let Some(numbers) = wanted.get(&name) else {
                            continue;
                        };
                        let items: Vec<Item> = manifest
                            .items
                            .iter()
                            .filter(|i| numbers.contains(&i.number))
                            .cloned()
                            .collect();
                        if items.is_empty() {
                            continue;
                        }

                        let before = self.log.stats(&name)?;
                        tracing::info!("Retrying {} failed items for {}", items.len(), name);
                        let (crawled, failed) =
                            self.crawl_items(entry, &name, items, policy).await?;
                        let after = self.log.stats(&name)?;
                        recovered += before.failure_count.saturating_sub(after.failure_count);

                        note_pass(
                            &mut meta,
                            entry,
                            WorkPass {
                                name,
                                total_items: manifest.items.len(),
                                already_done: before.success_count,
                                crawled,
                                failed,
                            },
                        );
                    }
                    Err(error) => {
                        // Only worth reporting when the ledger names this work
                        if wanted.contains_key(&fallback_name(entry)) {
                            note_abort(&mut meta, entry, error.to_string());
                        }
                        tracing::warn!("Cannot enumerate {}: {}", entry.id, error);
                    }
                }
            }
        }

        self.controller.lock().unwrap().reset_to_defaults();
        self.log.rewrite_failed_refs()?;
        self.build_report(started_at, 0, recovered, &meta).await
    }

    /// Runs one pass over a single work
    ///
    /// Failed items end up in the failure journal; only failure to enumerate
    /// the work at all surfaces as an error.
    async fn crawl_work(&self, entry: &WorkEntry, policy: RetryPolicy) -> crate::Result<WorkPass> {
        let manifest = self.fetch_manifest(entry).await?;
        let name = display_name(entry, &manifest);
        let total_items = manifest.items.len();

        let outstanding = self.log.outstanding(&name, &manifest.items)?;
        let already_done = total_items - outstanding.len();

        if outstanding.is_empty() {
            tracing::info!("{} is complete ({} items)", name, total_items);
            return Ok(WorkPass {
                name,
                total_items,
                already_done,
                crawled: 0,
                failed: 0,
            });
        }

        tracing::info!(
            "Crawling {} outstanding items for {} ({} total, {} already done)",
            outstanding.len(),
            name,
            total_items,
            already_done
        );

        let (crawled, failed) = self.crawl_items(entry, &name, outstanding, policy).await?;
        Ok(WorkPass {
            name,
            total_items,
            already_done,
            crawled,
            failed,
        })
    }

    /// Crawls a batch of items under the configured item concurrency
    ///
    /// Returns `(crawled, failed)` counts. Only journal write errors and
    /// panicked tasks propagate.
    async fn crawl_items(
        &self,
        entry: &WorkEntry,
        name: &str,
        items: Vec<Item>,
        policy: RetryPolicy,
    ) -> crate::Result<(usize, usize)> {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.crawl.item_concurrency as usize));
        let mut tasks: JoinSet<crate::Result<bool>> = JoinSet::new();
        let mut dispatched = 0;

        for item in items {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let session = self.clone();
            let entry = entry.clone();
            let task_name = name.to_string();
            tasks.spawn(async move {
                let result = session.process_item(&entry, &task_name, &item, policy).await;
                drop(permit);
                result
            });

            dispatched += 1;
            if dispatched % PROGRESS_INTERVAL == 0 {
                tracing::info!("Dispatched {}/{} items for {}", dispatched, total, name);
            }
        }

        let mut crawled = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => crawled += 1,
                Ok(Ok(false)) => failed += 1,
                Ok(Err(error)) => return Err(error),
                Err(join_error) => {
                    return Err(ShioriError::Provider {
                        message: format!("item task failed: {}", join_error),
                    })
                }
            }
        }
        Ok((crawled, failed))
    }

    /// Crawls one item to completion or records its failure
    ///
    /// Returns `Ok(true)` when the item was journaled as done, `Ok(false)`
    /// when its failure was journaled. The waits between attempts depend on
    /// the failure kind: anti-bot detections rotate the pool and wait the
    /// longest, rate limits wait however long the controller says, everything
    /// else backs off linearly.
    async fn process_item(
        &self,
        entry: &WorkEntry,
        name: &str,
        item: &Item,
        policy: RetryPolicy,
    ) -> crate::Result<bool> {
        let mut last_error: Option<ShioriError> = None;

        for attempt in 1..=policy.attempts() {
            match self.attempt_item(entry, name, item).await {
                Ok(unit_count) => {
                    let dir = self.downloader.item_dir(name, &item.number);
                    self.log.record_success(
                        name,
                        &entry.id,
                        item,
                        unit_count,
                        &dir.to_string_lossy(),
                    )?;
                    tracing::info!("Crawled {} #{} ({} units)", name, item.number, unit_count);
                    return Ok(true);
                }
                Err(error) => {
                    let kind = ErrorKind::of(&error);
                    tracing::warn!(
                        "Attempt {}/{} for {} #{} failed ({}): {}",
                        attempt,
                        policy.attempts(),
                        name,
                        item.number,
                        kind,
                        error
                    );

                    let delay = match kind {
                        ErrorKind::AntiBot => {
                            // A challenge taints every held proxy, not just
                            // the one that saw it
                            self.pool.lock().await.force_rotation();
                            RetryPolicy::anti_bot_delay(attempt)
                        }
                        ErrorKind::RateLimit => {
                            self.controller.lock().unwrap().record_rate_limit_hit()
                        }
                        _ => RetryPolicy::backoff(attempt),
                    };
                    if !policy.is_last(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        self.log
            .record_failure(name, &entry.id, item, policy.attempts(), &message)?;
        Ok(false)
    }

    /// One attempt at an item: list its units, then download them all
    ///
    /// Units download under the unit concurrency limit. When several fail,
    /// the failure of the lowest-numbered unit decides the attempt's error.
    async fn attempt_item(
        &self,
        entry: &WorkEntry,
        name: &str,
        item: &Item,
    ) -> crate::Result<u32> {
        let units = self.fetch_item_units(entry, item).await?;

        // Leftovers from a previous interrupted attempt
        self.downloader.sweep_orphans(name, &item.number)?;

        let semaphore = Arc::new(Semaphore::new(self.config.crawl.unit_concurrency as usize));
        let mut tasks: JoinSet<(u32, crate::Result<u64>)> = JoinSet::new();

        for unit in &units {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let session = self.clone();
            let name = name.to_string();
            let item = item.clone();
            let unit = unit.clone();
            tasks.spawn(async move {
                let result = session.download_unit(&name, &item, &unit).await;
                drop(permit);
                (unit.index, result)
            });
        }

        let mut first_error: Option<(u32, ShioriError)> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((index, Err(error))) => {
                    let replace = first_error
                        .as_ref()
                        .map(|(held, _)| index < *held)
                        .unwrap_or(true);
                    if replace {
                        first_error = Some((index, error));
                    }
                }
                Err(join_error) => {
                    return Err(ShioriError::Provider {
                        message: format!("unit download task failed: {}", join_error),
                    })
                }
            }
        }

        if let Some((_, error)) = first_error {
            return Err(error);
        }
        Ok(units.len() as u32)
    }

    async fn fetch_manifest(&self, entry: &WorkEntry) -> crate::Result<WorkManifest> {
        let (proxy, timeout) = self.lease(OperationKind::ProviderCall).await?;
        let started = Instant::now();
        let result = self.provider.manifest(entry, Some(&proxy), timeout).await;
        self.settle(OperationKind::ProviderCall, &proxy, started, &result)
            .await;
        result
    }

    async fn fetch_item_units(
        &self,
        entry: &WorkEntry,
        item: &Item,
    ) -> crate::Result<Vec<UnitRef>> {
        let (proxy, timeout) = self.lease(OperationKind::PageFetch).await?;
        let started = Instant::now();
        let result = self
            .provider
            .list_units(entry, item, Some(&proxy), timeout)
            .await;
        self.settle(OperationKind::PageFetch, &proxy, started, &result)
            .await;
        result
    }

    async fn download_unit(&self, name: &str, item: &Item, unit: &UnitRef) -> crate::Result<u64> {
        let (proxy, timeout) = self.lease(OperationKind::UnitDownload).await?;
        let dest = self.downloader.unit_path(name, &item.number, unit);
        let started = Instant::now();
        let result = self
            .downloader
            .download_unit(unit, &dest, Some(&proxy), timeout)
            .await;
        self.settle(OperationKind::UnitDownload, &proxy, started, &result)
            .await;
        result
    }

    /// Picks a proxy and the adaptive deadline for one operation
    async fn lease(&self, kind: OperationKind) -> crate::Result<(ProxyAddr, Duration)> {
        let proxy = self.pool.lock().await.select().await?;
        let timeout = self.controller.lock().unwrap().adaptive_timeout_for(kind);
        Ok((proxy, timeout))
    }

    /// Feeds one operation's outcome back into the controller and the pool
    ///
    /// Successes report the measured response time. Failures report their
    /// kind to the controller, and charge the proxy only when the kind is
    /// proxy-attributable; otherwise the proxy is just released.
    async fn settle<T>(
        &self,
        kind: OperationKind,
        proxy: &ProxyAddr,
        started: Instant,
        result: &crate::Result<T>,
    ) {
        match result {
            Ok(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.controller
                    .lock()
                    .unwrap()
                    .record_response_time(kind, elapsed_ms);
                self.pool.lock().await.report_success(proxy, elapsed_ms);
            }
            Err(error) => {
                let error_kind = ErrorKind::of(error);
                self.controller.lock().unwrap().record_error(kind, error_kind);

                let mut pool = self.pool.lock().await;
                if error_kind.is_proxy_attributable() {
                    pool.report_failure(proxy);
                } else {
                    pool.release(proxy);
                }
            }
        }
    }

    /// Re-runs every work that still has failures or never enumerated
    ///
    /// Returns how many items the pass crawled.
    async fn recovery_pass(
        &self,
        meta: &mut HashMap<String, WorkMeta>,
        policy: RetryPolicy,
    ) -> crate::Result<usize> {
        let mut crawled = 0;

        for entry in &self.config.works {
            let needs_pass = match meta.get(&entry.id) {
                Some(m) => m.error.is_some() || self.log.stats(&m.name)?.failure_count > 0,
                None => false,
            };
            if !needs_pass {
                continue;
            }

            match self.crawl_work(entry, policy).await {
                Ok(pass) => {
                    crawled += pass.crawled;
                    note_pass(meta, entry, pass);
                }
                Err(error) => {
                    if let Some(m) = meta.get_mut(&entry.id) {
                        if m.error.is_some() {
                            m.error = Some(error.to_string());
                        }
                    }
                    tracing::warn!("Recovery pass cannot enumerate {}: {}", entry.id, error);
                }
            }
        }

        Ok(crawled)
    }

    /// Open failure count across the works this session has seen
    fn open_failures(&self, meta: &HashMap<String, WorkMeta>) -> crate::Result<usize> {
        let mut count = 0;
        for m in meta.values() {
            count += self.log.stats(&m.name)?.failure_count;
        }
        Ok(count)
    }

    async fn build_report(
        &self,
        started_at: DateTime<Utc>,
        cycles_run: u32,
        recovered: usize,
        meta: &HashMap<String, WorkMeta>,
    ) -> crate::Result<SessionReport> {
        let mut works = Vec::new();
        for entry in &self.config.works {
            let Some(m) = meta.get(&entry.id) else {
                continue;
            };
            let stats = self.log.stats(&m.name)?;
            works.push(WorkOutcome {
                work: m.name.clone(),
                total_items: m.total_items,
                already_done: m.baseline_done,
                crawled: stats.success_count.saturating_sub(m.baseline_done),
                failed: stats.failure_count,
                error: m.error.clone(),
            });
        }

        let mut persistent_failures = Vec::new();
        for (work, records) in self.log.all_failures()? {
            if !works.iter().any(|w| w.work == work) {
                continue;
            }
            for record in records {
                persistent_failures.push(PersistentFailure {
                    work: work.clone(),
                    number: record.number,
                    attempts: record.attempts,
                    error: record.error_message,
                });
            }
        }

        let pool = self.pool.lock().await.metrics();
        Ok(SessionReport {
            started_at,
            finished_at: Utc::now(),
            cycles_run,
            recovered,
            works,
            persistent_failures,
            pool,
        })
    }
}

/// Resolved display name: config title, then manifest title, then the id
fn display_name(entry: &WorkEntry, manifest: &WorkManifest) -> String {
    if let Some(title) = &entry.title {
        return title.clone();
    }
    if !manifest.title.is_empty() {
        return manifest.title.clone();
    }
    entry.id.clone()
}

fn fallback_name(entry: &WorkEntry) -> String {
    entry.title.clone().unwrap_or_else(|| entry.id.clone())
}

fn note_pass(meta: &mut HashMap<String, WorkMeta>, entry: &WorkEntry, pass: WorkPass) {
    let m = meta.entry(entry.id.clone()).or_insert_with(|| WorkMeta {
        name: pass.name.clone(),
        total_items: pass.total_items,
        baseline_done: pass.already_done,
        error: None,
    });
    m.name = pass.name;
    m.total_items = pass.total_items;
    m.error = None;
}

fn note_abort(meta: &mut HashMap<String, WorkMeta>, entry: &WorkEntry, message: String) {
    let m = meta.entry(entry.id.clone()).or_insert_with(|| WorkMeta {
        name: fallback_name(entry),
        total_items: 0,
        baseline_done: 0,
        error: None,
    });
    m.error = Some(message);
}

fn aborted_count(meta: &HashMap<String, WorkMeta>) -> usize {
    meta.values().filter(|m| m.error.is_some()).count()
}
