//! Zero-downtime sync of a record set into a production collection.
//!
//! ## Workflow
//!
//! ```text
//! Idle → FetchManifest → CopyToStaging → PushSettings → ApplyDiff
//!      → RebuildManifest → Promote → Done
//!                 (any step) ↘ Failed
//! ```
//!
//! Production is only written by the final `Promote` step, which moves the
//! staging collections over their production counterparts. A failure in any
//! earlier step leaves production intact and queryable. A failure during
//! `Promote` may leave production and its manifest out of step; there is no
//! rollback, the next successful run converges them again.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Config, Record, default_settings, merge_settings};
use crate::remote::{RemoteIndex, RemoteIndexClient};
use crate::sync::batch::{BatchOptions, BatchRunner};
use crate::sync::diff::calculate_diff;
use crate::sync::events::{NoopObserver, SyncEvent, SyncObserver};
use crate::sync::guard::{CircuitBreaker, CircuitBreakerConfig};
use crate::sync::manifest::{DEFAULT_BUCKET_SIZE, ManifestStore};

/// State of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    FetchManifest,
    CopyToStaging,
    PushSettings,
    ApplyDiff,
    RebuildManifest,
    Promote,
    Done,
    Failed,
}

impl SyncState {
    /// Number of working steps between `Idle` and `Done`.
    pub const STEP_COUNT: usize = 6;

    /// 1-based position of a working step.
    pub fn step_number(self) -> Option<usize> {
        match self {
            Self::FetchManifest => Some(1),
            Self::CopyToStaging => Some(2),
            Self::PushSettings => Some(3),
            Self::ApplyDiff => Some(4),
            Self::RebuildManifest => Some(5),
            Self::Promote => Some(6),
            Self::Idle | Self::Done | Self::Failed => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::FetchManifest => "Fetching production manifest",
            Self::CopyToStaging => "Copying production to staging",
            Self::PushSettings => "Pushing search settings",
            Self::ApplyDiff => "Applying diff to staging",
            Self::RebuildManifest => "Rebuilding staging manifest",
            Self::Promote => "Promoting staging to production",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The four collections a sync run works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    pub production: String,
    pub staging: String,
    pub manifest_production: String,
    pub manifest_staging: String,
}

impl IndexNames {
    /// Derive every collection name from the base name.
    pub fn new(index_name: &str) -> Self {
        let manifest = format!("{index_name}_manifest");
        Self {
            production: index_name.to_string(),
            staging: format!("{index_name}_tmp"),
            manifest_staging: format!("{manifest}_tmp"),
            manifest_production: manifest,
        }
    }
}

/// Hook rewriting the settings right before they are pushed.
pub type SettingsTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Outcome of a successful sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub index_name: String,
    /// Identifiers live before the run
    pub remote_count: usize,
    /// Records live after the run
    pub local_count: usize,
    pub added: usize,
    pub deleted: usize,
    /// Manifest documents written
    pub manifest_entries: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Diff a run would apply, computed without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub remote_count: usize,
    pub local_count: usize,
    pub to_add: usize,
    pub to_delete: usize,
}

/// Everything one sync run needs, constructed per run.
///
/// Runs against the same base name must not overlap: the staging collections
/// belong to the run in flight.
pub struct SyncContext {
    client: RemoteIndexClient,
    names: IndexNames,
    settings: Value,
    transform: Option<SettingsTransform>,
    batch: BatchOptions,
    manifest_bucket_size: usize,
    guard: Option<CircuitBreaker>,
    observer: Arc<dyn SyncObserver>,
}

impl SyncContext {
    /// Create a context with default settings, batching and no guard.
    pub fn new(remote: Arc<dyn RemoteIndex>, index_name: &str) -> Self {
        Self {
            client: RemoteIndexClient::new(remote),
            names: IndexNames::new(index_name),
            settings: default_settings(),
            transform: None,
            batch: BatchOptions::default(),
            manifest_bucket_size: DEFAULT_BUCKET_SIZE,
            guard: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Create a context from the `[index]`, `[batch]` and `[guard]` sections.
    pub fn from_config(remote: Arc<dyn RemoteIndex>, config: &Config) -> Result<Self> {
        config.validate()?;

        let settings = match &config.index.settings {
            Some(overrides) => merge_settings(default_settings(), overrides),
            None => default_settings(),
        };

        let mut context = Self::new(remote, &config.index.name)
            .with_settings(settings)
            .with_batch_options(BatchOptions::from(&config.batch))
            .with_manifest_bucket_size(config.batch.manifest_bucket_size);
        if config.guard.enabled {
            context = context.with_circuit_breaker(CircuitBreaker::with_config(
                CircuitBreakerConfig::from(&config.guard),
            ));
        }
        Ok(context)
    }

    /// Replace the base settings.
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Rewrite the settings right before they are pushed.
    pub fn with_settings_transform(
        mut self,
        transform: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_manifest_bucket_size(mut self, bucket_size: usize) -> Self {
        self.manifest_bucket_size = bucket_size.max(1);
        self
    }

    /// Abort runs whose record count drops too far below the live count.
    pub fn with_circuit_breaker(mut self, guard: CircuitBreaker) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn names(&self) -> &IndexNames {
        &self.names
    }

    pub fn client(&self) -> &RemoteIndexClient {
        &self.client
    }

    /// Settings as they will be pushed to staging.
    pub fn resolved_settings(&self) -> Value {
        match &self.transform {
            Some(transform) => transform(self.settings.clone()),
            None => self.settings.clone(),
        }
    }

    fn manifest(&self) -> ManifestStore {
        ManifestStore::with_bucket_size(self.client.clone(), self.manifest_bucket_size)
    }

    /// Identifiers currently listed in the production manifest.
    pub async fn remote_object_ids(&self) -> Result<Vec<String>> {
        self.manifest()
            .get_remote_object_ids(&self.names.manifest_production)
            .await
    }

    /// Compute the diff a run would apply, without writing.
    pub async fn plan(&self, records: &[Record]) -> Result<SyncPlan> {
        let remote_ids = self.remote_object_ids().await?;
        let diff = calculate_diff(&remote_ids, records);

        Ok(SyncPlan {
            remote_count: remote_ids.len(),
            local_count: records.len(),
            to_add: diff.records_to_add.len(),
            to_delete: diff.ids_to_delete.len(),
        })
    }

    /// Converge production to `records`.
    ///
    /// On failure the error names the step the run aborted in; see
    /// [`AppError::requires_reconciliation`] for whether production was
    /// touched.
    pub async fn run(&self, records: &[Record]) -> Result<SyncReport> {
        let started_at = Utc::now();
        let mut state = SyncState::Idle;
        log::info!(
            "Syncing {} record(s) into '{}'",
            records.len(),
            self.names.production
        );

        match self.execute(records, &mut state, started_at).await {
            Ok(report) => {
                self.enter(&mut state, SyncState::Done);
                log::info!(
                    "Sync of '{}' done: {} added, {} deleted",
                    self.names.production,
                    report.added,
                    report.deleted
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = state;
                self.enter(&mut state, SyncState::Failed);
                let error = AppError::step(failed_in, e);
                if error.requires_reconciliation() {
                    log::error!(
                        "Sync of '{}' failed during {}: {}. '{}' and '{}' may disagree until the next successful run.",
                        self.names.production,
                        failed_in,
                        error,
                        self.names.production,
                        self.names.manifest_production
                    );
                } else {
                    log::error!(
                        "Sync of '{}' failed during {}: {}. Production left untouched.",
                        self.names.production,
                        failed_in,
                        error
                    );
                }
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        records: &[Record],
        state: &mut SyncState,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let names = &self.names;
        let runner = BatchRunner::new(&self.client, self.observer.as_ref());

        self.enter(state, SyncState::FetchManifest);
        let remote_ids = self.remote_object_ids().await?;
        if let Some(guard) = &self.guard {
            guard.validate(records.len(), remote_ids.len())?;
        }

        // Staging starts from production so only the delta is written
        self.enter(state, SyncState::CopyToStaging);
        self.client
            .copy_collection(&names.production, &names.staging)
            .await?;

        self.enter(state, SyncState::PushSettings);
        self.observer.on_event(&SyncEvent::SettingsBefore);
        self.client
            .set_settings(&names.staging, &self.resolved_settings())
            .await?;
        self.observer.on_event(&SyncEvent::SettingsAfter);

        self.enter(state, SyncState::ApplyDiff);
        let diff = calculate_diff(&remote_ids, records);
        let (added, deleted) = (diff.records_to_add.len(), diff.ids_to_delete.len());
        log::info!(
            "Diff for '{}': {} to add, {} to delete",
            names.staging,
            added,
            deleted
        );
        runner
            .run_batch(&diff.into_operations(&names.staging), self.batch)
            .await?;

        self.enter(state, SyncState::RebuildManifest);
        self.client.clear_collection(&names.manifest_staging).await?;
        let manifest = self
            .manifest()
            .build_manifest_batch(records, &names.manifest_staging);
        runner.run_batch(&manifest, self.batch).await?;

        self.enter(state, SyncState::Promote);
        self.observer.on_event(&SyncEvent::OverwriteBefore);
        self.promote().await?;
        self.observer.on_event(&SyncEvent::OverwriteAfter);

        Ok(SyncReport {
            index_name: names.production.clone(),
            remote_count: remote_ids.len(),
            local_count: records.len(),
            added,
            deleted,
            manifest_entries: manifest.len(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Move both staging collections over production, concurrently.
    async fn promote(&self) -> Result<()> {
        let names = &self.names;
        let (index, manifest) = futures::join!(
            self.client
                .move_collection(&names.staging, &names.production),
            self.client
                .move_collection(&names.manifest_staging, &names.manifest_production),
        );

        match (index, manifest) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Err(_)) => Err(e),
            (Ok(()), Err(e)) => Err(AppError::PartialPromote {
                index_promoted: true,
                manifest_promoted: false,
                message: e.to_string(),
            }),
            (Err(e), Ok(())) => Err(AppError::PartialPromote {
                index_promoted: false,
                manifest_promoted: true,
                message: e.to_string(),
            }),
        }
    }

    fn enter(&self, state: &mut SyncState, next: SyncState) {
        log::debug!("'{}': {} -> {}", self.names.production, state, next);
        *state = next;
        self.observer.on_event(&SyncEvent::StateChanged(next));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::remote::MemoryIndex;
    use crate::sync::events::ChannelObserver;

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| {
                let mut fields = Map::new();
                fields.insert("title".into(), json!(format!("Talk {id}")));
                Record::with_object_id(*id, fields)
            })
            .collect()
    }

    fn context(memory: &Arc<MemoryIndex>) -> SyncContext {
        SyncContext::new(memory.clone(), "talks")
    }

    fn manifest_ids(memory: &MemoryIndex) -> Vec<String> {
        let mut ids: Vec<String> = memory
            .documents("talks_manifest")
            .iter()
            .flat_map(|entry| entry["content"].as_array().cloned().unwrap_or_default())
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }

    fn count_calls(memory: &MemoryIndex, prefix: &str) -> usize {
        memory
            .calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    #[test]
    fn test_index_names() {
        let names = IndexNames::new("talks");
        assert_eq!(names.production, "talks");
        assert_eq!(names.staging, "talks_tmp");
        assert_eq!(names.manifest_production, "talks_manifest");
        assert_eq!(names.manifest_staging, "talks_manifest_tmp");
    }

    #[tokio::test]
    async fn test_first_sync() {
        let memory = Arc::new(MemoryIndex::new());

        let report = context(&memory).run(&records(&["a", "b"])).await.unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.remote_count, 0);
        assert_eq!(memory.document_ids("talks"), vec!["a", "b"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "b"]);
        assert!(!memory.exists("talks_tmp"));
        assert!(!memory.exists("talks_manifest_tmp"));
        // Nothing to copy from on the first run
        assert_eq!(count_calls(&memory, "copy"), 0);
    }

    #[tokio::test]
    async fn test_second_identical_run_sends_no_documents() {
        let memory = Arc::new(MemoryIndex::new());
        let local = records(&["a", "b", "c"]);
        let ctx = context(&memory);

        ctx.run(&local).await.unwrap();
        memory.clear_calls();
        let report = ctx.run(&local).await.unwrap();

        assert_eq!(report.added, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(count_calls(&memory, "batch talks_tmp"), 0);
        assert_eq!(count_calls(&memory, "copy talks -> talks_tmp"), 1);
        assert_eq!(memory.document_ids("talks"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_incremental_sync_applies_delta() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b", "c"])).await.unwrap();

        let report = ctx.run(&records(&["a", "d"])).await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.deleted, 2);
        assert_eq!(memory.document_ids("talks"), vec!["a", "d"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_failure_before_promote_leaves_production_intact() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b"])).await.unwrap();
        memory.clear_calls();

        memory.fail_on("batch", "talks_tmp");
        let err = ctx.run(&records(&["a", "c"])).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Step {
                state: SyncState::ApplyDiff,
                production_touched: false,
                ..
            }
        ));
        assert!(!err.requires_reconciliation());
        assert_eq!(memory.document_ids("talks"), vec!["a", "b"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "b"]);
        assert_eq!(count_calls(&memory, "move"), 0);
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_production_intact() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b"])).await.unwrap();
        memory.clear_calls();

        memory.fail_on("copy", "talks_tmp");
        let err = ctx.run(&records(&["b", "c"])).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Step {
                state: SyncState::CopyToStaging,
                ..
            }
        ));
        assert!(!err.requires_reconciliation());
        assert_eq!(memory.document_ids("talks"), vec!["a", "b"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "b"]);
        assert_eq!(count_calls(&memory, "batch"), 0);
        assert_eq!(count_calls(&memory, "move"), 0);
    }

    #[tokio::test]
    async fn test_manifest_rebuild_failure_leaves_production_intact() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b"])).await.unwrap();
        memory.clear_calls();

        memory.fail_on("clear", "talks_manifest_tmp");
        let err = ctx.run(&records(&["b", "c"])).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Step {
                state: SyncState::RebuildManifest,
                ..
            }
        ));
        assert!(!err.requires_reconciliation());
        assert_eq!(memory.document_ids("talks"), vec!["a", "b"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "b"]);
        assert_eq!(count_calls(&memory, "move"), 0);
    }

    #[tokio::test]
    async fn test_manifest_batch_failure_leaves_production_intact() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b"])).await.unwrap();
        memory.clear_calls();

        memory.fail_on("batch", "talks_manifest_tmp");
        let err = ctx.run(&records(&["b", "c"])).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Step {
                state: SyncState::RebuildManifest,
                ..
            }
        ));
        assert!(!err.requires_reconciliation());
        assert_eq!(memory.document_ids("talks"), vec!["a", "b"]);
        assert_eq!(manifest_ids(&memory), vec!["a", "b"]);
        assert_eq!(count_calls(&memory, "move"), 0);
    }

    #[tokio::test]
    async fn test_first_sync_discards_leftover_staging() {
        let memory = Arc::new(MemoryIndex::new());
        memory.insert_documents("talks_tmp", vec![json!({ "objectID": "stale" })]);

        context(&memory).run(&records(&["a"])).await.unwrap();

        assert_eq!(memory.document_ids("talks"), vec!["a"]);
        assert_eq!(manifest_ids(&memory), vec!["a"]);
    }

    #[tokio::test]
    async fn test_settings_failure_is_reported_with_step() {
        let memory = Arc::new(MemoryIndex::new());
        memory.fail_on("set_settings", "talks_tmp");

        let err = context(&memory).run(&records(&["a"])).await.unwrap_err();

        // First sync creates staging through set_settings
        assert!(matches!(
            err,
            AppError::Step {
                state: SyncState::CopyToStaging,
                ..
            }
        ));
        assert!(!memory.exists("talks"));
    }

    #[tokio::test]
    async fn test_partial_promote_needs_reconciliation() {
        let memory = Arc::new(MemoryIndex::new());
        memory.fail_on("move", "talks_manifest");

        let err = context(&memory).run(&records(&["a"])).await.unwrap_err();

        assert!(err.requires_reconciliation());
        match err {
            AppError::Step {
                state: SyncState::Promote,
                source,
                ..
            } => assert!(matches!(
                *source,
                AppError::PartialPromote {
                    index_promoted: true,
                    manifest_promoted: false,
                    ..
                }
            )),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(memory.document_ids("talks"), vec!["a"]);
        assert!(!memory.exists("talks_manifest"));
    }

    #[tokio::test]
    async fn test_settings_transform_is_applied() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory).with_settings_transform(|mut settings| {
            settings["hitsPerPage"] = json!(42);
            settings
        });

        ctx.run(&records(&["a"])).await.unwrap();

        let settings = memory.settings("talks").unwrap();
        assert_eq!(settings["hitsPerPage"], 42);
        assert_eq!(settings["attributeForDistinct"], "video.id");
    }

    #[tokio::test]
    async fn test_from_config_merges_settings_overrides() {
        let memory = Arc::new(MemoryIndex::new());
        let config = Config::parse(
            r#"
            [index]
            name = "laracon"
            [index.settings]
            distinct = false
            "#,
        )
        .unwrap();

        let ctx = SyncContext::from_config(memory.clone(), &config).unwrap();
        ctx.run(&records(&["a"])).await.unwrap();

        assert_eq!(ctx.names().production, "laracon");
        assert_eq!(memory.settings("laracon").unwrap()["distinct"], false);
    }

    #[tokio::test]
    async fn test_events_follow_state_machine() {
        let memory = Arc::new(MemoryIndex::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = context(&memory).with_observer(Arc::new(ChannelObserver::new(tx)));

        ctx.run(&records(&["a"])).await.unwrap();

        let mut states = Vec::new();
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::StateChanged(state) = event {
                states.push(state);
            } else {
                names.push(event.name());
            }
        }
        assert_eq!(
            states,
            vec![
                SyncState::FetchManifest,
                SyncState::CopyToStaging,
                SyncState::PushSettings,
                SyncState::ApplyDiff,
                SyncState::RebuildManifest,
                SyncState::Promote,
                SyncState::Done,
            ]
        );
        assert_eq!(names.first(), Some(&"settings:before"));
        assert_eq!(names.last(), Some(&"overwrite:after"));
        assert_eq!(names.iter().filter(|n| **n == "batch:start").count(), 2);
    }

    #[tokio::test]
    async fn test_guard_aborts_before_staging() {
        let memory = Arc::new(MemoryIndex::new());
        let ids: Vec<String> = (0..20).map(|i| format!("id{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let ctx = context(&memory).with_circuit_breaker(CircuitBreaker::new());
        ctx.run(&records(&id_refs)).await.unwrap();
        memory.clear_calls();

        let err = ctx.run(&records(&id_refs[..5])).await.unwrap_err();

        match err {
            AppError::Step {
                state: SyncState::FetchManifest,
                source,
                ..
            } => assert!(matches!(*source, AppError::CircuitBreakerTriggered { .. })),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(count_calls(&memory, "copy"), 0);
        assert_eq!(memory.document_ids("talks").len(), 20);
    }

    #[tokio::test]
    async fn test_plan_does_not_write() {
        let memory = Arc::new(MemoryIndex::new());
        let ctx = context(&memory);
        ctx.run(&records(&["a", "b", "c"])).await.unwrap();
        memory.clear_calls();

        let plan = ctx.plan(&records(&["a", "b", "x", "y"])).await.unwrap();

        assert_eq!(
            plan,
            SyncPlan {
                remote_count: 3,
                local_count: 4,
                to_add: 2,
                to_delete: 1,
            }
        );
        assert!(
            memory
                .calls()
                .iter()
                .all(|c| c.starts_with("get_settings") || c.starts_with("browse"))
        );
    }
}
