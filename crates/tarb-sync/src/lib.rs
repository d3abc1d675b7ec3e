//! Trend sync orchestration: fan out to adapters, score + persist, cluster, report.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tarb_adapters::{
    adapter_for_settings, AdapterContext, AdapterSettings, FetchReport, GitHubConfig,
    HackerNewsConfig, RedditConfig, RssConfig, SourceAdapter,
};
use tarb_core::{extract_keywords, score, Clock, Source, SourcedCandidate, SystemClock, TrendRecord};
use tarb_storage::{
    HttpClientConfig, HttpFetcher, InMemoryTrendStore, PgTrendStore, StoreError, TrendStore,
};
use tokio::sync::{Mutex, Semaphore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub mod cluster;
pub mod report;

pub use cluster::{Cluster, ClusterEngine, ClusterRun};

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: AdapterSettings,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let sources = [
            AdapterSettings::Reddit(RedditConfig::default()),
            AdapterSettings::HackerNews(HackerNewsConfig::default()),
            AdapterSettings::GitHub(GitHubConfig::default()),
            AdapterSettings::Rss(RssConfig::default()),
        ];
        Self {
            sources: sources
                .into_iter()
                .map(|settings| SourceConfig {
                    enabled: true,
                    settings,
                })
                .collect(),
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    /// Reads `path`, falling back to the built-in source list when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no source registry found; using built-in sources");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn enabled_adapters(&self, github_token: Option<&str>) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| match &s.settings {
                AdapterSettings::GitHub(config) => {
                    let mut config = config.clone();
                    config.token = github_token.map(str::to_string);
                    adapter_for_settings(&AdapterSettings::GitHub(config))
                }
                other => adapter_for_settings(other),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub adapter_timeout_secs: u64,
    pub max_concurrent_adapters: usize,
    pub github_token: Option<String>,
    pub write_reports: bool,
    pub top_limit: usize,
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            workspace_root: PathBuf::from("."),
            scheduler_enabled: false,
            sync_cron: "0 */15 * * * *".to_string(),
            user_agent: "TrendArbitrage/1.0".to_string(),
            http_timeout_secs: 10,
            adapter_timeout_secs: 120,
            max_concurrent_adapters: 4,
            github_token: None,
            write_reports: false,
            top_limit: 50,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_non_empty("DATABASE_URL"),
            workspace_root: env_non_empty("TARB_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            scheduler_enabled: env_flag("TARB_SCHEDULER_ENABLED", defaults.scheduler_enabled),
            sync_cron: env_non_empty("TARB_SYNC_CRON").unwrap_or(defaults.sync_cron),
            user_agent: env_non_empty("TARB_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("TARB_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            adapter_timeout_secs: env_parse("TARB_ADAPTER_TIMEOUT_SECS", defaults.adapter_timeout_secs),
            max_concurrent_adapters: env_parse(
                "TARB_MAX_CONCURRENT_ADAPTERS",
                defaults.max_concurrent_adapters,
            ),
            github_token: env_non_empty("GITHUB_TOKEN"),
            write_reports: env_flag("TARB_WRITE_REPORTS", defaults.write_reports),
            top_limit: env_parse("TARB_TOP_LIMIT", defaults.top_limit),
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

/// Opens the Postgres store (migrated) when `DATABASE_URL` is set, else an in-memory one.
pub async fn open_store(config: &SyncConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn TrendStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgTrendStore::connect(url, clock)
                .await
                .context("connecting to trend store")?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; trends are kept in memory for this process");
            Ok(Arc::new(InMemoryTrendStore::new(clock)))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub duplicate_candidates: usize,
    pub persist_failures: usize,
    pub per_source_counts: BTreeMap<Source, usize>,
    pub per_source_errors: BTreeMap<Source, Vec<String>>,
    pub clusters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reports_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunSummary),
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub adapter_timeout: Duration,
    pub max_concurrent_adapters: usize,
    pub reports_root: Option<PathBuf>,
    pub top_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(120),
            max_concurrent_adapters: 4,
            reports_root: None,
            top_limit: 50,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            adapter_timeout: Duration::from_secs(config.adapter_timeout_secs),
            max_concurrent_adapters: config.max_concurrent_adapters,
            reports_root: config.write_reports.then(|| config.reports_root()),
            top_limit: config.top_limit,
        }
    }
}

pub struct TrendPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn TrendStore>,
    clock: Arc<dyn Clock>,
    http: HttpFetcher,
    clusters: ClusterEngine,
    settings: PipelineSettings,
    run_guard: Mutex<()>,
}

impl TrendPipeline {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn TrendStore>,
        clock: Arc<dyn Clock>,
        http: HttpFetcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            adapters,
            store,
            clock,
            http,
            clusters: ClusterEngine::default(),
            settings,
            run_guard: Mutex::new(()),
        }
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = SourceRegistry::load(&config.sources_path()).await?;
        let adapters = registry.enabled_adapters(config.github_token.as_deref());
        let store = open_store(config, clock.clone()).await?;
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::new(
            adapters,
            store,
            clock,
            http,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<dyn TrendStore> {
        &self.store
    }

    /// One full pass. Returns `AlreadyRunning` without touching the store if a pass is in flight.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            info!("trend sync already in progress; skipping trigger");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let ctx = AdapterContext {
            run_id,
            fetched_at: started_at,
        };
        info!(%run_id, adapters = self.adapters.len(), "trend sync started");

        let reports = self.collect(&ctx).await;

        let mut per_source_counts: BTreeMap<Source, usize> = BTreeMap::new();
        let mut per_source_errors: BTreeMap<Source, Vec<String>> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut duplicate_candidates = 0usize;
        for (source, report) in reports {
            *per_source_counts.entry(source.clone()).or_default() += report.items.len();
            if !report.errors.is_empty() {
                per_source_errors
                    .entry(source.clone())
                    .or_default()
                    .extend(report.errors);
            }
            for item in report.items {
                let candidate = SourcedCandidate {
                    source: source.clone(),
                    item,
                };
                if seen.insert(candidate.key()) {
                    candidates.push(candidate);
                } else {
                    duplicate_candidates += 1;
                }
            }
        }

        let mut processed = 0usize;
        let mut persist_failures = 0usize;
        for candidate in &candidates {
            match self.persist(candidate).await {
                Ok(_) => processed += 1,
                Err(err) if err.is_fatal() => {
                    return Err(anyhow::Error::new(err).context(format!("trend sync {run_id} aborted")));
                }
                Err(err) => {
                    warn!(%run_id, key = %candidate.key(), error = %err, "skipping candidate");
                    persist_failures += 1;
                }
            }
        }

        let records = self.store.list_all().await.context("listing trends for clustering")?;
        let clustering = self.clusters.assign(&records);
        self.store
            .assign_clusters(&clustering.assignments)
            .await
            .context("persisting cluster assignments")?;

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            processed,
            duplicate_candidates,
            persist_failures,
            per_source_counts,
            per_source_errors,
            clusters: clustering.clusters.len(),
            reports_dir: None,
        };

        if let Some(root) = &self.settings.reports_root {
            let top = self
                .store
                .list_top_by_score(self.settings.top_limit)
                .await
                .context("listing top trends for report")?;
            let dir = report::write_run_reports(root, &summary, &top).await?;
            summary.reports_dir = Some(dir.display().to_string());
        }

        info!(
            %run_id,
            processed,
            duplicate_candidates,
            persist_failures,
            clusters = summary.clusters,
            "trend sync finished"
        );
        Ok(RunOutcome::Completed(summary))
    }

    async fn collect(&self, ctx: &AdapterContext) -> Vec<(Source, FetchReport)> {
        let limit = Semaphore::new(self.settings.max_concurrent_adapters.max(1));
        let timeout = self.settings.adapter_timeout;
        let fetches = self.adapters.iter().map(|adapter| {
            let limit = &limit;
            async move {
                let source = adapter.source();
                let report = match limit.acquire().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, adapter.fetch(&self.http, ctx)).await {
                        Ok(report) => report,
                        Err(_) => {
                            warn!(%source, timeout_secs = timeout.as_secs(), "adapter timed out");
                            FetchReport::failed(format!("{source} timed out after {}s", timeout.as_secs()))
                        }
                    },
                    Err(_) => FetchReport::failed(format!("{source} skipped: adapter limit closed")),
                };
                info!(%source, count = report.items.len(), errors = report.errors.len(), "source fetched");
                (source, report)
            }
        });
        join_all(fetches).await
    }

    async fn persist(&self, candidate: &SourcedCandidate) -> Result<TrendRecord, StoreError> {
        let previous = self
            .store
            .find_by_source_and_id(&candidate.source, &candidate.item.source_id)
            .await?;
        let now = self.clock.now();
        let keywords = extract_keywords(&candidate.item.title);
        let mut record = TrendRecord::from_sighting(previous.as_ref(), candidate, keywords, now);
        record.apply_scores(score(&record, previous.as_ref(), now));
        self.store.upsert(record).await
    }
}

/// Builds the cron scheduler that re-runs `pipeline`; `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    pipeline: Arc<TrendPipeline>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(RunOutcome::Completed(summary)) => {
                    info!(run_id = %summary.run_id, processed = summary.processed, "scheduled sync complete");
                }
                Ok(RunOutcome::AlreadyRunning) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub async fn run_sync_once(config: &SyncConfig) -> Result<RunOutcome> {
    let pipeline = TrendPipeline::from_config(config).await?;
    pipeline.run_once().await
}
