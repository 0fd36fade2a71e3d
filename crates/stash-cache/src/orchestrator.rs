//! The cache-aside pipeline: lookup, concurrent fetch, all-or-nothing
//! join, persist, resolve.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use stash_fetch::{fetch_with_retry, VariantFetcher};
use stash_store::{StoreError, StoreHandle};
use stash_types::{AssetName, AssetRecord, FetchPlan, VariantTag};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::pipeline::{PipelineGuard, PipelineState, PipelineTracker};
use crate::resolved::{Origin, ResolvedAsset};
use crate::sink::DisplaySink;
use crate::stats::{CacheStats, StatsSnapshot};

/// Resolves assets from the store, falling back to the network.
///
/// A record is written only once every variant in the plan has been
/// fetched, so the store never holds a partial asset. Concurrent pipelines
/// for the same name may both fetch; the second `put` fails with
/// `DuplicateKey`, which is expected and leaves the first copy in place.
pub struct CacheAside {
    store: StoreHandle,
    fetcher: Arc<dyn VariantFetcher>,
    sink: Arc<dyn DisplaySink>,
    config: CacheConfig,
    shutdown: Option<watch::Receiver<bool>>,
    tracker: PipelineTracker,
    stats: CacheStats,
}

impl CacheAside {
    pub fn new(
        store: StoreHandle,
        fetcher: Arc<dyn VariantFetcher>,
        sink: Arc<dyn DisplaySink>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
            config,
            shutdown: None,
            tracker: PipelineTracker::new(),
            stats: CacheStats::default(),
        }
    }

    /// Abort in-flight fetches once `shutdown` turns `true`. Pipelines that
    /// have not started writing return [`CacheError::Cancelled`].
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn tracker(&self) -> &PipelineTracker {
        &self.tracker
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve one asset and hand it to the display sink.
    pub async fn resolve(&self, name: &AssetName, plan: &FetchPlan) -> CacheResult<ResolvedAsset> {
        let pipeline = self.tracker.begin(name);
        let result = self.run(&pipeline, name, plan).await;

        match &result {
            Ok(asset) => {
                pipeline.advance(PipelineState::Resolved);
                self.sink.present(asset);
            }
            Err(e) => {
                if e.is_network_failure() {
                    self.stats.record_network_failure();
                } else if matches!(e, CacheError::Cancelled { .. }) {
                    self.stats.record_cancelled();
                }
                warn!(pipeline = pipeline.id(), name = %name, error = %e, "pipeline failed");
            }
        }
        result
    }

    /// Run one pipeline per request concurrently.
    ///
    /// Results come back in request order. A failed or panicked pipeline
    /// only affects its own entry.
    pub async fn resolve_all(
        self: &Arc<Self>,
        requests: Vec<(AssetName, FetchPlan)>,
    ) -> Vec<(AssetName, CacheResult<ResolvedAsset>)> {
        let names: Vec<AssetName> = requests.iter().map(|(n, _)| n.clone()).collect();
        let mut join_set = JoinSet::new();
        for (idx, (name, plan)) in requests.into_iter().enumerate() {
            let this = Arc::clone(self);
            join_set.spawn(async move { (idx, this.resolve(&name, &plan).await) });
        }

        let mut results: Vec<Option<CacheResult<ResolvedAsset>>> =
            names.iter().map(|_| None).collect();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => error!(error = %e, "pipeline task ended abnormally"),
            }
        }

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                let result = result.unwrap_or_else(|| Err(CacheError::Cancelled { name: name.clone() }));
                (name, result)
            })
            .collect()
    }

    async fn run(
        &self,
        pipeline: &PipelineGuard,
        name: &AssetName,
        plan: &FetchPlan,
    ) -> CacheResult<ResolvedAsset> {
        pipeline.advance(PipelineState::Lookup);
        if let Some(record) = self.store.get(name).await? {
            pipeline.advance(PipelineState::Hit);
            self.stats.record_hit();
            debug!(name = %name, bytes = record.total_bytes(), "served from store");
            return Ok(ResolvedAsset::from_store(record));
        }

        pipeline.advance(PipelineState::Miss);
        self.stats.record_miss();
        self.check_plan(name, plan)?;

        let mut shutdown = self.shutdown.clone();
        if is_shut_down(&shutdown) {
            return Err(CacheError::Cancelled { name: name.clone() });
        }

        pipeline.advance(PipelineState::Fetching);
        let limit = self.config.fetch_timeout;
        let variants = tokio::select! {
            biased;
            () = shutdown_signal(&mut shutdown) => {
                return Err(CacheError::Cancelled { name: name.clone() });
            }
            joined = tokio::time::timeout(limit, self.fetch_all(pipeline, name, plan)) => match joined {
                Ok(variants) => variants?,
                Err(_) => return Err(CacheError::Timeout { name: name.clone(), after: limit }),
            },
        };
        if is_shut_down(&shutdown) {
            return Err(CacheError::Cancelled { name: name.clone() });
        }

        pipeline.advance(PipelineState::Persisting);
        let record = AssetRecord::new(name.clone(), variants);
        let persisted = match self.store.put(&record).await {
            Ok(()) => {
                info!(name = %name, bytes = record.total_bytes(), digest = %record.digest().short_hex(), "persisted");
                true
            }
            Err(StoreError::DuplicateKey(_)) => {
                self.stats.record_duplicate_write();
                debug!(name = %name, "record already written by a concurrent pipeline");
                false
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ResolvedAsset {
            name: record.name,
            variants: record.variants,
            origin: Origin::Network { persisted },
        })
    }

    /// The plan must cover every variant the store indexes, or the join
    /// would produce a record the store rejects.
    fn check_plan(&self, name: &AssetName, plan: &FetchPlan) -> CacheResult<()> {
        let schema = self.store.schema();
        let planned: Vec<&VariantTag> = plan.tags().collect();
        if let Some(missing) = schema.required_variants().find(|t| !planned.contains(t)) {
            return Err(CacheError::InvalidPlan {
                name: name.clone(),
                reason: format!("no locator for indexed variant {missing}"),
            });
        }
        Ok(())
    }

    /// Fetch every variant concurrently and wait for all of them.
    ///
    /// The first failure aborts the remaining fetches. Dropping the returned
    /// future also aborts them, since the tasks live in a local `JoinSet`.
    async fn fetch_all(
        &self,
        pipeline: &PipelineGuard,
        name: &AssetName,
        plan: &FetchPlan,
    ) -> CacheResult<BTreeMap<VariantTag, Bytes>> {
        let mut join_set = JoinSet::new();
        let mut pending = HashMap::new();
        for spec in plan.variants() {
            let fetcher = Arc::clone(&self.fetcher);
            let retry = self.config.retry.clone();
            let locator = spec.locator.clone();
            let tag = spec.tag.clone();
            let handle = join_set.spawn(async move {
                let result = fetch_with_retry(fetcher.as_ref(), &locator, &retry).await;
                (tag, result)
            });
            pending.insert(handle.id(), spec.tag.clone());
        }

        pipeline.advance(PipelineState::Joining);
        let mut joined = BTreeMap::new();
        while let Some(res) = join_set.join_next_with_id().await {
            match res {
                Ok((id, (tag, Ok(body)))) => {
                    pending.remove(&id);
                    debug!(name = %name, variant = %tag, bytes = body.len(), "variant fetched");
                    self.stats.record_fetched(body.len() as u64);
                    joined.insert(tag, body);
                }
                Ok((_, (variant, Err(source)))) => {
                    join_set.abort_all();
                    return Err(CacheError::NetworkFailure {
                        name: name.clone(),
                        variant,
                        source,
                    });
                }
                Err(e) => {
                    join_set.abort_all();
                    error!(name = %name, error = %e, "variant task ended abnormally");
                    let mut missing: Vec<VariantTag> = pending.into_values().collect();
                    missing.sort();
                    return Err(CacheError::PartialAsset {
                        name: name.clone(),
                        missing,
                    });
                }
            }
        }

        let missing: Vec<VariantTag> = plan
            .tags()
            .filter(|t| !joined.contains_key(*t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CacheError::PartialAsset {
                name: name.clone(),
                missing,
            });
        }
        Ok(joined)
    }
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("store", &self.store)
            .field("fetcher", &self.fetcher.describe())
            .field("config", &self.config)
            .field("live_pipelines", &self.tracker.len())
            .finish()
    }
}

fn is_shut_down(rx: &Option<watch::Receiver<bool>>) -> bool {
    rx.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Completes once shutdown is requested. Never completes without a
/// receiver, or after the sender is dropped without signalling.
async fn shutdown_signal(rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;
    use async_trait::async_trait;
    use stash_fetch::{FetchError, FetchResult, InMemoryFetcher, RetryPolicy};
    use stash_store::{ConnectionManager, SchemaBuilder, StoreConfig, StoreResult, SyncMode};
    use stash_types::LocatorTemplate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // ---- fixtures ------------------------------------------------------

    #[derive(Clone)]
    enum Script {
        Serve(Bytes),
        Fail(u16),
        /// Sleep, then serve.
        Slow(Duration, Bytes),
        Hang,
        Panic,
        /// Fail with 503 this many times, then serve.
        Flaky(u32, Bytes),
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: HashMap<String, Script>,
        calls: Mutex<HashMap<String, u32>>,
        total: AtomicU32,
    }

    impl ScriptedFetcher {
        fn with(mut self, locator: &str, script: Script) -> Self {
            self.scripts.insert(locator.to_string(), script);
            self
        }

        fn video(self, name: &str, mp4: usize, webm: usize) -> Self {
            self.with(&format!("videos/{name}.mp4"), Script::Serve(vec![1u8; mp4].into()))
                .with(&format!("videos/{name}.webm"), Script::Serve(vec![2u8; webm].into()))
        }

        fn calls(&self) -> u32 {
            self.total.load(Ordering::SeqCst)
        }

        fn calls_to(&self, locator: &str) -> u32 {
            self.calls.lock().unwrap().get(locator).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl VariantFetcher for ScriptedFetcher {
        async fn fetch(&self, locator: &str) -> FetchResult<Bytes> {
            self.total.fetch_add(1, Ordering::SeqCst);
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(locator.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            let status = |status| FetchError::Status {
                locator: locator.to_string(),
                status,
            };
            match self.scripts.get(locator).cloned() {
                Some(Script::Serve(body)) => Ok(body),
                Some(Script::Fail(code)) => Err(status(code)),
                Some(Script::Slow(delay, body)) => {
                    tokio::time::sleep(delay).await;
                    Ok(body)
                }
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Panic) => panic!("fetcher crashed on {locator}"),
                Some(Script::Flaky(failures, body)) if n > failures => Ok(body),
                Some(Script::Flaky(..)) => Err(status(503)),
                None => Err(FetchError::NotFound {
                    locator: locator.to_string(),
                }),
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn video_upgrade(b: &mut SchemaBuilder, _old: u32) -> StoreResult<()> {
        b.create_container("name")?
            .create_index("mp4", VariantTag::mp4())?
            .create_index("webm", VariantTag::webm())?;
        Ok(())
    }

    async fn memory_store() -> StoreHandle {
        ConnectionManager::in_memory()
            .open("videos_db", 1, video_upgrade)
            .await
            .unwrap()
    }

    fn name(s: &str) -> AssetName {
        s.parse().unwrap()
    }

    fn plan(s: &str) -> FetchPlan {
        LocatorTemplate::plan_for(&LocatorTemplate::video_pair(), &name(s)).unwrap()
    }

    fn video_record(s: &str, mp4: usize, webm: usize) -> AssetRecord {
        let mut variants = BTreeMap::new();
        variants.insert(VariantTag::mp4(), Bytes::from(vec![9u8; mp4]));
        variants.insert(VariantTag::webm(), Bytes::from(vec![8u8; webm]));
        AssetRecord::new(name(s), variants)
    }

    struct Harness {
        cache: Arc<CacheAside>,
        fetcher: Arc<ScriptedFetcher>,
        sink: Arc<RecordingSink>,
    }

    fn harness(store: StoreHandle, fetcher: ScriptedFetcher, config: CacheConfig) -> Harness {
        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(CacheAside::new(
            store,
            fetcher.clone(),
            sink.clone(),
            config,
        ));
        Harness {
            cache,
            fetcher,
            sink,
        }
    }

    // ---- scenarios -----------------------------------------------------

    #[tokio::test]
    async fn miss_fetches_persists_and_presents() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default().video("rabbit", 1200, 900),
            CacheConfig::default(),
        );

        let asset = h.cache.resolve(&name("rabbit"), &plan("rabbit")).await.unwrap();
        assert_eq!(asset.origin, Origin::Network { persisted: true });
        assert_eq!(asset.variant(&VariantTag::mp4()).unwrap().len(), 1200);
        assert_eq!(asset.variant(&VariantTag::webm()).unwrap().len(), 900);

        let stored = h.cache.store().get(&name("rabbit")).await.unwrap().unwrap();
        assert_eq!(stored.variants, asset.variants);
        assert_eq!(h.cache.store().len().await.unwrap(), 1);

        assert_eq!(h.sink.count_for("rabbit"), 1);
        assert_eq!(h.fetcher.calls(), 2);

        let stats = h.cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes_fetched, 2100);
        assert!(h.cache.tracker().is_empty());
    }

    #[tokio::test]
    async fn hit_never_touches_the_network() {
        let store = memory_store().await;
        store.put(&video_record("pig", 10, 20)).await.unwrap();
        let h = harness(store, ScriptedFetcher::default(), CacheConfig::default());

        let asset = h.cache.resolve(&name("pig"), &plan("pig")).await.unwrap();
        assert!(asset.is_hit());
        assert_eq!(asset.total_bytes(), 30);
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.sink.count_for("pig"), 1);
        assert_eq!(h.cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn one_failed_variant_persists_nothing() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/frog.mp4", Script::Serve(vec![0u8; 64].into()))
                .with("videos/frog.webm", Script::Fail(500)),
            CacheConfig::default(),
        );

        let err = h.cache.resolve(&name("frog"), &plan("frog")).await.unwrap_err();
        assert!(err.is_network_failure());
        assert!(matches!(
            &err,
            CacheError::NetworkFailure { variant, .. } if *variant == VariantTag::webm()
        ));
        assert!(h.cache.store().get(&name("frog")).await.unwrap().is_none());
        assert!(h.sink.seen().is_empty());
        assert_eq!(h.cache.stats().network_failures, 1);
        assert!(h.cache.tracker().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_both_resolve_with_one_record() {
        let slow = |n: u8| Script::Slow(Duration::from_millis(50), vec![n; 32].into());
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/monster.mp4", slow(1))
                .with("videos/monster.webm", slow(2)),
            CacheConfig::default(),
        );

        let results = h
            .cache
            .resolve_all(vec![
                (name("monster"), plan("monster")),
                (name("monster"), plan("monster")),
            ])
            .await;

        let origins: Vec<Origin> = results
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().origin)
            .collect();
        assert!(origins.contains(&Origin::Network { persisted: true }));
        assert!(origins.contains(&Origin::Network { persisted: false }));

        assert_eq!(h.cache.store().len().await.unwrap(), 1);
        assert_eq!(h.sink.count_for("monster"), 2);
        assert_eq!(h.cache.stats().duplicate_writes, 1);
        assert_eq!(h.fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn resolve_all_isolates_failures_and_keeps_order() {
        let mut fetcher = ScriptedFetcher::default();
        for n in ["crystal", "elf", "monster", "pig", "rabbit"] {
            fetcher = fetcher.video(n, 8, 4);
        }
        fetcher = fetcher.with("videos/frog.mp4", Script::Serve(vec![0u8; 8].into()));
        let h = harness(memory_store().await, fetcher, CacheConfig::default());

        let names = ["crystal", "elf", "frog", "monster", "pig", "rabbit"];
        let requests = names.iter().map(|n| (name(n), plan(n))).collect();
        let results = h.cache.resolve_all(requests).await;

        let order: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, names);
        for (n, r) in &results {
            if n.as_str() == "frog" {
                assert!(r.as_ref().unwrap_err().is_network_failure());
            } else {
                assert!(r.is_ok(), "{n}");
            }
        }
        assert_eq!(h.cache.store().len().await.unwrap(), 5);
        assert_eq!(h.sink.seen().len(), 5);
    }

    // ---- timeouts, cancellation, retry ---------------------------------

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/elf.mp4", Script::Serve(vec![0u8; 8].into()))
                .with("videos/elf.webm", Script::Hang),
            CacheConfig {
                fetch_timeout: Duration::from_secs(5),
                ..CacheConfig::default()
            },
        );

        let err = h.cache.resolve(&name("elf"), &plan("elf")).await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout { after, .. } if after == Duration::from_secs(5)));
        assert!(err.is_network_failure());
        assert!(h.cache.store().get(&name("elf")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_before_persist() {
        let (tx, rx) = watch::channel(false);
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("videos/crystal.mp4", Script::Hang)
                .with("videos/crystal.webm", Script::Hang),
        );
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(
            CacheAside::new(
                memory_store().await,
                fetcher.clone(),
                sink.clone(),
                CacheConfig::default(),
            )
            .with_shutdown(rx),
        );

        let task = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve(&name("crystal"), &plan("crystal")).await })
        };
        while fetcher.calls() < 2 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::Cancelled { .. }));
        assert!(cache.store().get(&name("crystal")).await.unwrap().is_none());
        assert!(sink.seen().is_empty());
        assert_eq!(cache.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn already_shut_down_skips_fetching() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default().video("pig", 1, 1));
        let cache = CacheAside::new(
            memory_store().await,
            fetcher.clone(),
            Arc::new(RecordingSink::default()),
            CacheConfig::default(),
        )
        .with_shutdown(rx);

        assert!(matches!(
            cache.resolve(&name("pig"), &plan("pig")).await,
            Err(CacheError::Cancelled { .. })
        ));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_within_the_timeout() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/pig.mp4", Script::Flaky(2, vec![5u8; 16].into()))
                .with("videos/pig.webm", Script::Serve(vec![6u8; 16].into())),
            CacheConfig {
                fetch_timeout: Duration::from_secs(5),
                retry: RetryPolicy::exponential(3, Duration::from_millis(100)),
            },
        );

        let asset = h.cache.resolve(&name("pig"), &plan("pig")).await.unwrap();
        assert_eq!(asset.origin, Origin::Network { persisted: true });
        assert_eq!(h.fetcher.calls_to("videos/pig.mp4"), 3);
        assert_eq!(h.fetcher.calls_to("videos/pig.webm"), 1);
    }

    #[tokio::test]
    async fn without_retry_a_transient_failure_is_final() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/pig.mp4", Script::Flaky(1, vec![5u8; 16].into()))
                .with("videos/pig.webm", Script::Serve(vec![6u8; 16].into())),
            CacheConfig::default(),
        );

        assert!(h.cache.resolve(&name("pig"), &plan("pig")).await.is_err());
        assert_eq!(h.fetcher.calls_to("videos/pig.mp4"), 1);
    }

    // ---- partial joins and plan checks ---------------------------------

    #[tokio::test]
    async fn crashed_variant_task_is_a_partial_asset() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default()
                .with("videos/elf.mp4", Script::Panic)
                .with("videos/elf.webm", Script::Hang),
            CacheConfig::default(),
        );

        let err = h.cache.resolve(&name("elf"), &plan("elf")).await.unwrap_err();
        match err {
            CacheError::PartialAsset { missing, .. } => {
                assert_eq!(missing, vec![VariantTag::mp4(), VariantTag::webm()]);
            }
            other => panic!("expected PartialAsset, got {other}"),
        }
        assert!(h.cache.store().get(&name("elf")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plan_missing_an_indexed_variant_is_rejected_up_front() {
        let h = harness(
            memory_store().await,
            ScriptedFetcher::default().video("elf", 1, 1),
            CacheConfig::default(),
        );
        let mp4_only =
            FetchPlan::new(vec![stash_types::VariantSpec::new(VariantTag::mp4(), "videos/elf.mp4")])
                .unwrap();

        let err = h.cache.resolve(&name("elf"), &mp4_only).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidPlan { .. }));
        assert_eq!(h.fetcher.calls(), 0);
    }

    // ---- store failures and durability ---------------------------------

    #[tokio::test]
    async fn closed_store_is_fatal() {
        let mgr = ConnectionManager::in_memory();
        let store = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        mgr.close(&store).await.unwrap();
        let h = harness(store, ScriptedFetcher::default(), CacheConfig::default());

        let err = h.cache.resolve(&name("pig"), &plan("pig")).await.unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable(StoreError::Closed)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn second_run_over_a_file_store_is_all_hits() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::on_disk(dir.path(), SyncMode::EveryWrite);

        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert("videos/rabbit.mp4", vec![1u8; 1200]);
        fetcher.insert("videos/rabbit.webm", vec![2u8; 900]);

        {
            let mgr = ConnectionManager::new(config.clone());
            let store = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
            let cache = CacheAside::new(
                store.clone(),
                fetcher.clone(),
                Arc::new(RecordingSink::default()),
                CacheConfig::default(),
            );
            cache.resolve(&name("rabbit"), &plan("rabbit")).await.unwrap();
            mgr.close(&store).await.unwrap();
        }
        assert_eq!(fetcher.requests(), 2);

        let mgr = ConnectionManager::new(config);
        let store = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        let cache = CacheAside::new(
            store,
            fetcher.clone(),
            Arc::new(RecordingSink::default()),
            CacheConfig::default(),
        );
        let asset = cache.resolve(&name("rabbit"), &plan("rabbit")).await.unwrap();
        assert!(asset.is_hit());
        assert_eq!(asset.total_bytes(), 2100);
        assert_eq!(fetcher.requests(), 2);
    }
}
