//! Run driver: roots in, ranked records out
//!
//! One run resolves the caller's roots, walks every hierarchical root with a
//! single shared [`TreeWalker`], appends the flat roots after the walked
//! stream, cuts the combined stream into batches and aggregates the batches
//! concurrently. All remote calls share one rate governor and one
//! credential-bound session.
//!
//! ```text
//!  roots ──► resolve ──► fetch root nodes ──► TreeWalker ─┐
//!              │                                          ▼
//!              └──────── flat roots ─────────────────►  feed ──► Batcher ──► aggregate × K
//! ```

use crate::config::PipelineConfig;
use crate::error::{ConfigError, PlatformError, Result, StatsError, WorkerError};
use crate::governor::RateGovernor;
use crate::pipeline::aggregator::{aggregate, BatchOutcome};
use crate::pipeline::batcher::{self, Batcher, BatcherStats};
use crate::platform::types::{Discovered, Node, NodeIdentity, RootKind};
use crate::platform::{Collaborators, Credential, PlatformSession};
use crate::report::{Diagnostic, DiagnosticSink, RunSummary, StatsReport};
use crate::walker::TreeWalker;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Live counters for progress display
#[derive(Debug, Default)]
pub struct PipelineProgress {
    pub nodes_discovered: AtomicU64,
    pub batches_completed: AtomicU64,
    pub records_joined: AtomicU64,
    pub identities_dropped: AtomicU64,
}

impl PipelineProgress {
    pub fn nodes_discovered(&self) -> u64 {
        self.nodes_discovered.load(Ordering::Relaxed)
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed.load(Ordering::Relaxed)
    }

    pub fn records_joined(&self) -> u64 {
        self.records_joined.load(Ordering::Relaxed)
    }

    pub fn identities_dropped(&self) -> u64 {
        self.identities_dropped.load(Ordering::Relaxed)
    }

    fn record_outcome(&self, outcome: &BatchOutcome) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.records_joined
            .fetch_add(outcome.records.len() as u64, Ordering::Relaxed);
        self.identities_dropped
            .fetch_add(outcome.dropped.len() as u64, Ordering::Relaxed);
    }
}

/// Roots sorted by how they are processed
#[derive(Debug, Default)]
struct RootPlan {
    /// Raw reference and parsed identity of each root needing a walk
    hierarchical: Vec<(String, NodeIdentity)>,
    flat: Vec<Discovered>,
    duplicates: u64,
}

/// What the feed stage forwarded
#[derive(Debug, Default)]
struct FeedSummary {
    walked: u64,
    flat_emitted: u64,
    flat_skipped: u64,
}

/// Statistics pipeline bound to a configuration and a set of collaborators
pub struct StatsPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    progress: Arc<PipelineProgress>,
    shutdown: Arc<AtomicBool>,
}

impl StatsPipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            progress: Arc::new(PipelineProgress::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<PipelineProgress> {
        Arc::clone(&self.progress)
    }

    /// Get shutdown flag for signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Compute per-document statistics for everything under `roots`
    ///
    /// Failures scoped to one root, subtree, batch or identity are reported
    /// as diagnostics next to the partial result. Invalid configuration and
    /// a rejected credential fail the whole run.
    pub async fn compute_statistics(&self, roots: &[String], credential: &Credential) -> Result<StatsReport> {
        self.config.validate()?;
        if credential.is_empty() {
            return Err(ConfigError::MissingCredential.into());
        }

        let config = &self.config;
        let started_at = Utc::now();
        let start = Instant::now();

        let governor = Arc::new(RateGovernor::new(config.rate_limit, config.rate_period));
        let session = Arc::new(PlatformSession::new(
            self.collaborators.clone(),
            credential.clone(),
            Arc::clone(&governor),
        ));
        let diagnostics = Arc::new(DiagnosticSink::new());

        let plan = resolve_roots(&session, roots, &diagnostics).await;
        let hierarchical_roots = plan.hierarchical.len();
        let flat_roots = plan.flat.len();
        info!(
            roots = roots.len(),
            hierarchical = hierarchical_roots,
            flat = flat_roots,
            duplicates = plan.duplicates,
            "Resolved roots"
        );

        let walk_roots = fetch_root_nodes(&session, plan.hierarchical, &diagnostics).await?;
        check_credential(&session)?;

        let walker = TreeWalker::new(Arc::clone(&session), config.worker_count, config.queue_size)
            .with_max_depth(config.max_depth)
            .with_diagnostics(Arc::clone(&diagnostics))
            .with_shutdown(Arc::clone(&self.shutdown));
        let (walked, walk_done) = walker.spawn(walk_roots).split();

        let (node_tx, node_rx) = mpsc::channel(config.queue_size);
        let (batch_tx, mut batch_rx) = mpsc::channel(config.max_inflight_batches * 2);
        let batcher_stats = Arc::new(BatcherStats::default());

        let feeder = tokio::spawn(feed(walked, plan.flat, node_tx, Arc::clone(&self.progress)));
        let pump = tokio::spawn(batcher::run(
            Batcher::new(config.max_batch_size),
            node_rx,
            batch_tx,
            Arc::clone(&batcher_stats),
        ));

        let permits = Arc::new(Semaphore::new(config.max_inflight_batches));
        let mut lookups = JoinSet::new();
        while let Some(batch) = batch_rx.recv().await {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::ResultChannelClosed)?;
            let session = Arc::clone(&session);
            let progress = Arc::clone(&self.progress);
            let base_url = config.base_url.clone();
            lookups.spawn(async move {
                let outcome = aggregate(&session, batch, &base_url).await;
                progress.record_outcome(&outcome);
                drop(permit);
                outcome
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            outcomes.push(joined.map_err(stage_failed("Batch lookup"))?);
        }

        let walk = walk_done.await?;
        let fed = feeder.await.map_err(stage_failed("Feed"))??;
        pump.await.map_err(stage_failed("Batcher"))??;

        check_credential(&session)?;

        outcomes.sort_by_key(|outcome| outcome.sequence);
        let mut diagnostics = diagnostics.drain();
        let mut records = Vec::new();
        let mut dropped = 0;
        for outcome in outcomes {
            records.extend(outcome.records);
            dropped += outcome.dropped.len();
            diagnostics.extend(outcome.diagnostics);
        }

        let rank_by = config.rank_by;
        records.sort_by(|a, b| rank_by.value(b).cmp(&rank_by.value(a)));

        let summary = RunSummary {
            started_at,
            duration: start.elapsed(),
            roots: roots.len(),
            hierarchical_roots,
            flat_roots,
            nodes_discovered: fed.walked + fed.flat_emitted,
            containers_expanded: walk.containers_expanded,
            duplicates_skipped: walk.duplicates_skipped + fed.flat_skipped + plan.duplicates,
            batches: batcher_stats.batches_emitted(),
            records: records.len(),
            dropped,
            remote_calls: session.stats().total_calls(),
            rate_wait: governor.stats().total_wait,
            rank_by,
            completed: walk.completed && !self.shutdown.load(Ordering::SeqCst),
        };

        info!(
            records = summary.records,
            dropped = summary.dropped,
            diagnostics = diagnostics.len(),
            batches = summary.batches,
            remote_calls = summary.remote_calls,
            duration_ms = summary.duration.as_millis() as u64,
            "Statistics run completed"
        );

        Ok(StatsReport {
            records,
            diagnostics,
            summary,
        })
    }
}

/// Blocking entry point that owns its own runtime
pub fn compute_statistics(
    roots: &[String],
    credential: &Credential,
    collaborators: Collaborators,
    config: PipelineConfig,
) -> Result<StatsReport> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(StatsPipeline::new(config, collaborators).compute_statistics(roots, credential))
}

async fn resolve_roots(session: &PlatformSession, roots: &[String], diagnostics: &DiagnosticSink) -> RootPlan {
    let mut plan = RootPlan::default();
    let mut seen = HashSet::new();

    for raw in roots {
        let raw = raw.trim();
        let resolved = match session.resolve_root(raw).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(root = raw, error = %e, "Skipping unresolvable root");
                diagnostics.record(Diagnostic::Resolution {
                    root: raw.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !seen.insert(resolved.identity.clone()) {
            debug!(root = raw, "Duplicate root collapsed");
            plan.duplicates += 1;
            continue;
        }

        match resolved.kind {
            RootKind::Hierarchical => plan.hierarchical.push((raw.to_string(), resolved.identity)),
            RootKind::Flat => plan
                .flat
                .push(Discovered::root(Node::standalone(resolved.identity), raw)),
        }
    }
    plan
}

/// Look up every hierarchical root concurrently, keeping input order
async fn fetch_root_nodes(
    session: &Arc<PlatformSession>,
    roots: Vec<(String, NodeIdentity)>,
    diagnostics: &DiagnosticSink,
) -> std::result::Result<Vec<Discovered>, WorkerError> {
    let mut lookups = JoinSet::new();
    for (index, (raw, identity)) in roots.into_iter().enumerate() {
        let session = Arc::clone(session);
        lookups.spawn(async move {
            let result = session.fetch_node(&identity).await;
            (index, raw, result)
        });
    }

    let mut found = Vec::new();
    while let Some(joined) = lookups.join_next().await {
        let (index, raw, result) = joined.map_err(stage_failed("Root lookup"))?;
        match result {
            Ok(node) => found.push((index, Discovered::root(node, raw))),
            Err(e) => {
                if e.is_recoverable() {
                    debug!(root = %raw, error = %e, "Root not readable, skipping");
                } else {
                    warn!(root = %raw, error = %e, "Root lookup failed");
                }
                diagnostics.record(Diagnostic::Resolution {
                    root: raw,
                    reason: e.to_string(),
                });
            }
        }
    }

    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, root)| root).collect())
}

/// Forward the walked stream, then the flat roots the walk did not reach
async fn feed(
    mut walked: mpsc::Receiver<Discovered>,
    flat: Vec<Discovered>,
    output: mpsc::Sender<Discovered>,
    progress: Arc<PipelineProgress>,
) -> std::result::Result<FeedSummary, WorkerError> {
    let mut summary = FeedSummary::default();
    let mut seen = HashSet::new();

    while let Some(item) = walked.recv().await {
        seen.insert(item.identity().clone());
        forward(&output, item, &progress).await?;
        summary.walked += 1;
    }

    for item in flat {
        if seen.contains(item.identity()) {
            debug!(identity = %item.identity(), "Flat root already discovered by the walk");
            summary.flat_skipped += 1;
            continue;
        }
        forward(&output, item, &progress).await?;
        summary.flat_emitted += 1;
    }
    Ok(summary)
}

async fn forward(
    output: &mpsc::Sender<Discovered>,
    item: Discovered,
    progress: &PipelineProgress,
) -> std::result::Result<(), WorkerError> {
    progress.nodes_discovered.fetch_add(1, Ordering::Relaxed);
    output
        .send(item)
        .await
        .map_err(|_| WorkerError::ResultChannelClosed)
}

fn check_credential(session: &PlatformSession) -> Result<()> {
    match session.rejection() {
        None => Ok(()),
        Some(PlatformError::CredentialRejected { reason }) => Err(StatsError::CredentialRejected { reason }),
        Some(other) => Err(StatsError::CredentialRejected {
            reason: other.to_string(),
        }),
    }
}

/// Map a failed join of the named stage task
fn stage_failed(task: &'static str) -> impl Fn(JoinError) -> WorkerError {
    move |e| WorkerError::TaskFailed {
        task,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::ObjectType;
    use crate::platform::{PlatformSnapshot, SnapshotPlatform};

    fn pipeline(config: PipelineConfig) -> (StatsPipeline, Arc<SnapshotPlatform>) {
        let platform = Arc::new(SnapshotPlatform::new(PlatformSnapshot::default()));
        let collaborators = Collaborators::from_platform(Arc::clone(&platform));
        (StatsPipeline::new(config, collaborators), platform)
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_call() {
        let config = PipelineConfig {
            max_batch_size: 500,
            ..Default::default()
        };
        let (pipeline, platform) = pipeline(config);
        let err = pipeline
            .compute_statistics(&["https://www.larkoffice.com/wiki/w1".into()], &Credential::new("u-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, StatsError::Config(ConfigError::InvalidBatchSize { .. })));
        assert_eq!(platform.calls().node_lookups.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_empty_credential_is_rejected() {
        let (pipeline, _) = pipeline(PipelineConfig::default());
        let err = pipeline
            .compute_statistics(&[], &Credential::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Config(ConfigError::MissingCredential)));
    }

    #[tokio::test]
    async fn test_no_roots_is_an_empty_report() {
        let (pipeline, _) = pipeline(PipelineConfig::default());
        let report = pipeline
            .compute_statistics(&[], &Credential::new("u-1"))
            .await
            .unwrap();
        assert!(report.records.is_empty());
        assert!(report.is_complete());
        assert_eq!(report.summary.batches, 0);
        assert!(report.summary.completed);
    }

    #[tokio::test]
    async fn test_resolve_roots_collapses_duplicates() {
        let platform = Arc::new(SnapshotPlatform::new(PlatformSnapshot::default()));
        let session = PlatformSession::new(
            Collaborators::from_platform(platform),
            Credential::new("u-1"),
            Arc::new(RateGovernor::new(10, std::time::Duration::from_secs(1))),
        );
        let sink = DiagnosticSink::new();
        let roots = vec![
            "https://www.larkoffice.com/wiki/w1".to_string(),
            "https://www.larkoffice.com/docx/d1".to_string(),
            " https://www.larkoffice.com/wiki/w1 ".to_string(),
            "not a url".to_string(),
        ];

        let plan = resolve_roots(&session, &roots, &sink).await;
        assert_eq!(plan.hierarchical.len(), 1);
        assert_eq!(plan.flat.len(), 1);
        assert_eq!(plan.flat[0].identity(), &NodeIdentity::new("d1", ObjectType::Docx));
        assert_eq!(plan.duplicates, 1);
        assert_eq!(sink.len(), 1);
    }
}
