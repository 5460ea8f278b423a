//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the main crawl loop that coordinates all aspects of
//! the crawling process, including:
//! - Resuming an interrupted run or seeding a new one
//! - Dispatching WorkItems from the frontier under the concurrency limit
//! - Feeding handler output to the scheduler and the merge engine
//! - Appending finalized records to the sink
//! - Periodic checkpoints

use crate::config::Config;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::handlers::{StageHandlers, StageOutput};
use crate::crawler::scheduler::{ScheduledFetch, Scheduler};
use crate::merge::{MergeConflict, MergeEngine};
use crate::model::WorkItem;
use crate::output::{log_progress, CrawlStatistics};
use crate::storage::{
    Checkpoint, CheckpointStore, JsonlSink, RecordSink, RunStatus, SqliteCheckpointStore,
};
use crate::{HarvestError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Outcome of one dispatched WorkItem
struct Completion {
    seq: u64,
    outcome: std::result::Result<StageOutput, HarvestError>,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    handlers: Arc<StageHandlers>,
    fetcher: Arc<Fetcher>,
    scheduler: Scheduler,
    engine: MergeEngine,
    sink: Box<dyn RecordSink + Send>,
    store: Box<dyn CheckpointStore + Send>,
    run_id: i64,

    /// Dispatched WorkItems by sequence number, until their completion is handled
    in_flight: BTreeMap<u64, WorkItem>,

    stats: CrawlStatistics,
}

impl Coordinator {
    /// Creates a new coordinator instance backed by the configured output files
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file
    /// * `fresh` - Start a new run even if an interrupted one exists
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - Failed to initialize
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self> {
        let store = SqliteCheckpointStore::new(Path::new(&config.output.checkpoint_path))?;
        let resumed = load_resume_point(&store, config_hash, fresh)?;

        // Earlier output survives only when a checkpoint is resumed
        let sink = JsonlSink::open(Path::new(&config.output.records_path), resumed.is_none())?;

        Self::assemble(
            config,
            config_hash,
            fresh,
            Box::new(sink),
            Box::new(store),
            resumed,
        )
    }

    /// Creates a coordinator over caller-provided storage
    pub fn with_storage(
        config: Config,
        config_hash: &str,
        fresh: bool,
        sink: Box<dyn RecordSink + Send>,
        store: Box<dyn CheckpointStore + Send>,
    ) -> Result<Self> {
        let resumed = load_resume_point(store.as_ref(), config_hash, fresh)?;
        Self::assemble(config, config_hash, fresh, sink, store, resumed)
    }

    fn assemble(
        config: Config,
        config_hash: &str,
        fresh: bool,
        sink: Box<dyn RecordSink + Send>,
        mut store: Box<dyn CheckpointStore + Send>,
        resumed: Option<(i64, Checkpoint)>,
    ) -> Result<Self> {
        let handlers = StageHandlers::from_config(&config)?;
        let fetcher = Fetcher::new(&config.origin, &config.crawler)?;
        let max_concurrent = config.crawler.max_concurrent_fetches as usize;

        let (run_id, scheduler, engine) = match resumed {
            Some((run_id, checkpoint)) => (
                run_id,
                Scheduler::new(max_concurrent, checkpoint.frontier),
                MergeEngine::restore(checkpoint.records, checkpoint.finalized),
            ),
            None => {
                let run_id = match store.latest_run()? {
                    Some(run) if !fresh && run.status == RunStatus::Running => run.id,
                    _ => store.create_run(config_hash)?,
                };
                let seeds = handlers.seed_items();
                tracing::info!(run_id, seeds = seeds.len(), "Starting new run");
                (run_id, Scheduler::new(max_concurrent, seeds), MergeEngine::new())
            }
        };

        let mut coordinator = Self {
            config: Arc::new(config),
            handlers: Arc::new(handlers),
            fetcher: Arc::new(fetcher),
            scheduler,
            engine,
            sink,
            store,
            run_id,
            in_flight: BTreeMap::new(),
            stats: CrawlStatistics::new(),
        };
        coordinator.save_checkpoint()?;
        Ok(coordinator)
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Runs the main crawl loop until the frontier drains
    ///
    /// Fetching and parsing run in spawned tasks; merging, finalization and
    /// enqueueing happen only here, so every record id is touched by one
    /// completion at a time.
    pub async fn run(&mut self) -> Result<CrawlStatistics> {
        tracing::info!("Starting crawl run {}", self.run_id);

        let start = Instant::now();
        let interval = u64::from(self.config.crawler.checkpoint_interval.max(1));
        let mut since_checkpoint = 0u64;
        let mut tasks: JoinSet<Completion> = JoinSet::new();

        loop {
            self.dispatch_ready(&mut tasks);

            let Some(joined) = tasks.join_next().await else {
                tracing::info!("Frontier is empty, crawl complete");
                break;
            };
            let completion = joined.map_err(|e| HarvestError::Task(e.to_string()))?;
            self.handle_completion(completion)?;

            since_checkpoint += 1;
            if since_checkpoint >= interval {
                since_checkpoint = 0;
                self.stats.elapsed = start.elapsed();
                self.save_checkpoint()?;
                log_progress(
                    &self.stats,
                    self.scheduler.len(),
                    self.engine.in_flight_len(),
                );
            }
        }

        self.stats.elapsed = start.elapsed();
        self.sink.flush()?;
        self.save_checkpoint()?;

        if self.engine.in_flight_len() > 0 {
            tracing::warn!(
                records = self.engine.in_flight_len(),
                "Records left unfinalized after the frontier drained"
            );
        }
        self.store.complete_run(self.run_id)?;

        tracing::info!(
            records = self.stats.records_emitted,
            finalized = self.engine.finalized_len(),
            dropped_items = self.stats.total_dropped(),
            "Crawl completed in {:?}",
            self.stats.elapsed
        );

        Ok(self.stats.clone())
    }

    /// Spawns a fetch-and-parse task for every WorkItem that can start now
    fn dispatch_ready(&mut self, tasks: &mut JoinSet<Completion>) {
        while let Some(ScheduledFetch { item, seq, permit }) = self.scheduler.try_next() {
            tracing::debug!(
                target = %item.target,
                stage = %item.stage,
                owner = item.owner_id().unwrap_or("-"),
                priority = %item.priority,
                page = item.priority.page_index(),
                "Dispatching work item"
            );
            self.stats.record_dispatch(item.stage);
            self.in_flight.insert(seq, item.clone());

            let fetcher = Arc::clone(&self.fetcher);
            let handlers = Arc::clone(&self.handlers);
            tasks.spawn(async move {
                let fetched = fetcher.fetch(&item).await;
                drop(permit);
                let outcome = match fetched {
                    Ok(body) => handlers.handle(&item, &body).map_err(HarvestError::from),
                    Err(e) => Err(HarvestError::from(e)),
                };
                Completion { seq, outcome }
            });
        }

        if !self.scheduler.is_empty() && self.scheduler.available_permits() == 0 {
            tracing::trace!(queued = self.scheduler.len(), "All fetch slots busy");
        }
    }

    fn handle_completion(&mut self, completion: Completion) -> Result<()> {
        let item = self.in_flight.remove(&completion.seq).ok_or_else(|| {
            HarvestError::Task(format!("completion for unknown work item {}", completion.seq))
        })?;

        match completion.outcome {
            Ok(output) => self.apply_output(&item, output),
            Err(error) => {
                tracing::warn!(
                    target = %item.target,
                    stage = %item.stage,
                    owner = item.owner_id().unwrap_or("-"),
                    error = %error,
                    "Dropping work item"
                );
                self.stats.record_drop(item.stage);
                if let Some(next) = item.next_volume() {
                    self.enqueue(next);
                }
            }
        }

        if let Some(owner) = item.owner_id() {
            self.finish_one(owner)?;
        }
        Ok(())
    }

    fn apply_output(&mut self, item: &WorkItem, output: StageOutput) {
        self.stats.record_completion(item.stage);
        self.stats.sub_resources_filtered += output.filtered_sub_resources as u64;
        self.log_conflicts(item, &output.conflicts);

        for next in output.work {
            self.enqueue(next);
        }

        if let Some(partial) = output.partial {
            let conflicts = self.engine.contribute(partial);
            self.log_conflicts(item, &conflicts);
        }

        if let Some((owner, entry)) = output.reader_entry {
            if !self.engine.add_reader_entry(&owner, entry) {
                tracing::debug!(owner = %owner, "Duplicate reader entry ignored");
            }
        }
    }

    fn log_conflicts(&mut self, item: &WorkItem, conflicts: &[MergeConflict]) {
        for conflict in conflicts {
            tracing::warn!(
                target = %item.target,
                stage = %item.stage,
                owner = item.owner_id().unwrap_or("-"),
                "Merge conflict: {}",
                conflict
            );
        }
        self.stats.merge_conflicts += conflicts.len() as u64;
    }

    /// Enqueues a WorkItem unless its record was already finalized
    fn enqueue(&mut self, item: WorkItem) {
        if self.engine.register(&item) {
            self.scheduler.push(item);
        } else {
            tracing::debug!(
                target = %item.target,
                stage = %item.stage,
                owner = item.owner_id().unwrap_or("-"),
                "Skipping work item for finalized record"
            );
            self.stats.duplicates_skipped += 1;
        }
    }

    /// Accounts for one finished WorkItem of `owner`, finalizing the record if
    /// nothing else is pending for it
    fn finish_one(&mut self, owner: &str) -> Result<()> {
        if let Some(record) = self.engine.complete(owner) {
            self.sink.append(&record)?;
            self.stats.records_emitted += 1;
            tracing::debug!(
                id = %record.id,
                sub_resources = record.sub_resources.len(),
                readers = record.reader_entries.len(),
                "Record finalized"
            );
        } else if self.engine.pending_for(owner) == 0 && !self.engine.is_finalized(owner) {
            self.stats.records_dropped += 1;
            tracing::warn!(owner = %owner, "Record dropped: detail payload never resolved");
        }
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        let mut frontier: Vec<WorkItem> = self.in_flight.values().cloned().collect();
        frontier.extend(self.scheduler.snapshot());
        Checkpoint {
            frontier,
            records: self.engine.snapshot(),
            finalized: self.engine.unsaved_finalized().to_vec(),
        }
    }

    /// Persists the frontier and in-flight table
    fn save_checkpoint(&mut self) -> Result<()> {
        self.sink.flush()?;
        let checkpoint = self.checkpoint();
        self.store.save_checkpoint(self.run_id, &checkpoint)?;
        self.engine.mark_finalized_saved();
        tracing::debug!(
            frontier = checkpoint.frontier.len(),
            in_flight = checkpoint.records.len(),
            "Saved checkpoint"
        );
        Ok(())
    }
}

/// Finds the interrupted run to continue, with its checkpoint
///
/// Returns `None` when starting fresh, when the latest run completed, or when
/// the interrupted run never saved any progress.
fn load_resume_point(
    store: &dyn CheckpointStore,
    config_hash: &str,
    fresh: bool,
) -> Result<Option<(i64, Checkpoint)>> {
    if fresh {
        return Ok(None);
    }
    let Some(run) = store
        .latest_run()?
        .filter(|run| run.status == RunStatus::Running)
    else {
        return Ok(None);
    };

    if run.config_hash != config_hash {
        tracing::warn!(
            run_id = run.id,
            "Configuration changed since the interrupted run started"
        );
    }
    let checkpoint = store.load_checkpoint(run.id)?;
    if checkpoint.is_empty() && checkpoint.finalized.is_empty() {
        tracing::info!(run_id = run.id, "No checkpoint saved, reseeding run");
        return Ok(None);
    }

    tracing::info!(
        run_id = run.id,
        frontier = checkpoint.frontier.len(),
        in_flight = checkpoint.records.len(),
        finalized = checkpoint.finalized.len(),
        "Resuming interrupted run"
    );
    Ok(Some((run.id, checkpoint)))
}

/// Runs the main crawl operation
///
/// This function orchestrates the entire crawl process:
///
/// 1. Resume the interrupted run or seed a new one
/// 2. Dispatch WorkItems in priority order
/// 3. Merge partial records and append finalized ones to the sink
/// 4. Checkpoint periodically and mark the run completed
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Ignore any interrupted run
///
/// # Example
///
/// ```no_run
/// use stacks_harvest::config::load_config_with_hash;
/// use stacks_harvest::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let stats = run_crawl(config, &hash, false).await?;
/// println!("{} records", stats.records_emitted);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, config_hash: &str, fresh: bool) -> Result<CrawlStatistics> {
    let mut coordinator = Coordinator::new(config, config_hash, fresh)?;
    coordinator.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CatalogConfig, CrawlerConfig, DetailConfig, OriginConfig, OutputConfig, PolicyConfig,
        ReaderConfig, SeedEntry,
    };
    use crate::merge::InFlightRecord;
    use crate::model::{CatalogRecord, Priority, ReaderEntry, Stage};
    use crate::storage::MemorySink;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(uri: &str) -> Config {
        Config {
            crawler: CrawlerConfig {
                max_concurrent_fetches: 3,
                request_timeout_secs: 5,
                max_retries: 0,
                retry_delay_ms: 1,
                checkpoint_interval: 2,
            },
            origin: OriginConfig {
                base_url: uri.to_string(),
                cookie: None,
                user_agent: "stacks-harvest-test".to_string(),
            },
            catalog: CatalogConfig {
                listing_url: format!("{}/search-list", uri),
                page_size: 10,
                search_id: "0".to_string(),
                sort_order: "default".to_string(),
                site_id: None,
                filter_field: None,
                total_records_cap: 100_000,
                success_code: 1,
                seeds: vec![SeedEntry {
                    name: "all".to_string(),
                    filter: None,
                }],
            },
            detail: DetailConfig {
                url_template: format!("{}/detail?id={{id}}", uri),
                variable: "resource".to_string(),
                reader_field_keys: vec!["阅读".to_string()],
            },
            reader: ReaderConfig::default(),
            policy: PolicyConfig::default(),
            output: OutputConfig {
                records_path: "unused.jsonl".to_string(),
                checkpoint_path: "unused.db".to_string(),
            },
        }
    }

    async fn mount_listing(server: &MockServer, results: serde_json::Value) {
        let count = results.as_array().map(Vec::len).unwrap_or(0);
        Mock::given(method("POST"))
            .and(path("/search-list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1,
                "data": {
                    "curPage": 1,
                    "totalPages": 1,
                    "totalRecords": count,
                    "results": results
                }
            })))
            .mount(server)
            .await;
    }

    async fn mount_detail(server: &MockServer, id: &str, payload: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/detail"))
            .and(query_param("id", id))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<script>var resource = {};</script>", payload)),
            )
            .mount(server)
            .await;
    }

    async fn mount_reader(server: &MockServer, file_id: &str, image_dir: &str) {
        Mock::given(method("GET"))
            .and(path("/reader"))
            .and(query_param("fileId", file_id))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "var readerObj = {{\"fileName\": \"{}\"}};\nvar pageNum = 4;\nvar imgUrl = encodeURIComponent(\"{}\");",
                file_id, image_dir
            )))
            .mount(server)
            .await;
    }

    fn coordinator(
        config: Config,
        sink: &MemorySink,
        store: SqliteCheckpointStore,
        fresh: bool,
    ) -> Coordinator {
        Coordinator::with_storage(config, "hash", fresh, Box::new(sink.clone()), Box::new(store))
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_sub_resource_detail_drops_only_that_record() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            json!([{"id": "A", "fields": [], "sub_resources": [{"id": "B"}]}]),
        )
        .await;
        mount_detail(&server, "A", json!({"id": "A", "title": "Annals"})).await;
        Mock::given(method("GET"))
            .and(path("/detail"))
            .and(query_param("id", "B"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let stats = coordinator(test_config(&server.uri()), &sink, store, true)
            .run()
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "A");
        assert!(records[0].merged);
        assert_eq!(records[0].attributes["title"], json!("Annals"));
        assert_eq!(records[0].sub_resources[0].id, "B");

        assert_eq!(stats.records_emitted, 1);
        assert_eq!(stats.records_dropped, 1);
        assert_eq!(stats.stage(Stage::ItemDetail).dropped, 1);
        assert_eq!(stats.stage(Stage::Listing).completed, 1);
    }

    #[tokio::test]
    async fn test_failed_volume_does_not_stop_later_volumes() {
        let server = MockServer::start().await;
        mount_listing(&server, json!([{"id": "A", "fields": []}])).await;
        mount_detail(
            &server,
            "A",
            json!({"id": "A", "fields": [{"key": "阅读", "subs": [
                {"orsUrl": "/reader?fileId=1"},
                {"orsUrl": "/reader?fileId=2"},
                {"orsUrl": "/reader?fileId=3"}
            ]}]}),
        )
        .await;
        mount_reader(&server, "1", "https://img.example.org/1/").await;
        mount_reader(&server, "3", "https://img.example.org/3/").await;
        Mock::given(method("GET"))
            .and(path("/reader"))
            .and(query_param("fileId", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let stats = coordinator(test_config(&server.uri()), &sink, store, true)
            .run()
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let dirs: Vec<_> = records[0]
            .reader_entries
            .iter()
            .map(ReaderEntry::directory_key)
            .collect();
        assert_eq!(dirs, vec!["https://img.example.org/1/", "https://img.example.org/3/"]);
        assert_eq!(stats.stage(Stage::MultiFileReader).dropped, 1);
        assert_eq!(stats.stage(Stage::MultiFileReader).completed, 1);
        assert_eq!(stats.stage(Stage::ReaderMetadata).completed, 1);
    }

    #[tokio::test]
    async fn test_resume_continues_from_checkpoint() {
        let server = MockServer::start().await;
        mount_detail(&server, "A", json!({"id": "A", "title": "Full"})).await;

        let mut listing = CatalogRecord::new("A");
        listing.attributes.insert("cover".into(), json!("a.jpg"));
        let config = test_config(&server.uri());

        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        let run_id = store.create_run("hash").unwrap();
        store
            .save_checkpoint(
                run_id,
                &Checkpoint {
                    frontier: vec![WorkItem::detail(
                        format!("{}/detail?id=A", server.uri()),
                        "A",
                        Some(listing),
                        None,
                        Priority::SEED.for_result(0),
                    )],
                    records: vec![InFlightRecord {
                        id: "A".into(),
                        pending: 1,
                        record: None,
                    }],
                    finalized: vec!["Z".into()],
                },
            )
            .unwrap();

        let sink = MemorySink::new();
        let mut coordinator = coordinator(config, &sink, store, false);
        assert_eq!(coordinator.run_id(), run_id);
        let stats = coordinator.run().await.unwrap();

        assert_eq!(stats.stage(Stage::Listing).dispatched, 0);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attributes["title"], json!("Full"));
        assert_eq!(records[0].attributes["cover"], json!("a.jpg"));
    }

    #[tokio::test]
    async fn test_record_reached_twice_is_emitted_once() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            json!([
                {"id": "A", "fields": [], "sub_resources": [{"id": "B"}]},
                {"id": "B", "fields": [], "listing_only": true}
            ]),
        )
        .await;
        mount_detail(&server, "A", json!({"id": "A"})).await;
        mount_detail(&server, "B", json!({"id": "B", "title": "Second"})).await;

        let sink = MemorySink::new();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        coordinator(test_config(&server.uri()), &sink, store, true)
            .run()
            .await
            .unwrap();

        let records = sink.records();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "B").count(), 1);
        assert_eq!(records.len(), 2);

        let b = records.iter().find(|r| r.id == "B").unwrap();
        assert_eq!(b.parent_id.as_deref(), Some("A"));
        assert_eq!(b.attributes["title"], json!("Second"));
    }
}
