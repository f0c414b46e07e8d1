//! Concurrent hierarchy walker
//!
//! Discovers every node reachable from a set of roots. A fixed pool of
//! worker tasks pulls container-expansion tasks from a shared
//! [`ExpansionQueue`]; each expansion pages through the container's
//! children, emits them on the result channel and schedules the containers
//! among them. Every listing call goes through the governed
//! [`PlatformSession`].
//!
//! The result channel is bounded, so a slow consumer applies backpressure
//! to the workers. It is closed when the last worker exits, which is how the
//! consumer learns the walk is over.
//!
//! A visited set keyed by identity guarantees each node is emitted and
//! expanded at most once, even if the platform reports a node as its own
//! descendant.

use crate::error::WorkerError;
use crate::platform::types::{Discovered, Node, NodeIdentity, NodeKind};
use crate::platform::PlatformSession;
use crate::report::{Diagnostic, DiagnosticSink};
use crate::walker::queue::{ExpandTask, ExpansionQueue, PendingGuard};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Statistics collected during the walk
#[derive(Debug, Default)]
pub struct WalkStats {
    pub containers_expanded: AtomicU64,
    pub pages_fetched: AtomicU64,
    pub nodes_emitted: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub expansion_failures: AtomicU64,
    pub depth_limited: AtomicU64,
}

impl WalkStats {
    pub fn nodes_emitted(&self) -> u64 {
        self.nodes_emitted.load(Ordering::Relaxed)
    }

    pub fn containers_expanded(&self) -> u64 {
        self.containers_expanded.load(Ordering::Relaxed)
    }

    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    pub fn expansion_failures(&self) -> u64 {
        self.expansion_failures.load(Ordering::Relaxed)
    }
}

/// Result of a completed walk
#[derive(Debug, Clone)]
pub struct WalkResult {
    pub nodes_emitted: u64,
    pub containers_expanded: u64,
    pub pages_fetched: u64,
    pub duplicates_skipped: u64,
    pub expansion_failures: u64,
    pub duration: Duration,
    pub completed: bool,
}

/// A running walk: the node stream plus the task driving it
pub struct WalkHandle {
    /// Discovered nodes, closed when the walk ends
    pub nodes: mpsc::Receiver<Discovered>,

    task: JoinHandle<Result<WalkResult, WorkerError>>,
}

impl WalkHandle {
    /// Split into the node stream and a future for the walk result
    pub fn split(
        self,
    ) -> (
        mpsc::Receiver<Discovered>,
        impl std::future::Future<Output = Result<WalkResult, WorkerError>>,
    ) {
        (self.nodes, join_walk(self.task))
    }

    /// Collect every discovered node, then wait for the walk to finish
    pub async fn collect(self) -> Result<(Vec<Discovered>, WalkResult), WorkerError> {
        let WalkHandle { mut nodes, task } = self;
        let mut discovered = Vec::new();
        while let Some(item) = nodes.recv().await {
            discovered.push(item);
        }
        let result = join_walk(task).await?;
        Ok((discovered, result))
    }
}

async fn join_walk(task: JoinHandle<Result<WalkResult, WorkerError>>) -> Result<WalkResult, WorkerError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(WorkerError::TaskFailed {
            task: "Hierarchy walk",
            message: e.to_string(),
        }),
    }
}

/// Shared state handed to every worker
struct WalkContext {
    session: Arc<PlatformSession>,
    queue: ExpansionQueue,
    visited: Mutex<HashSet<NodeIdentity>>,
    results: mpsc::Sender<Discovered>,
    diagnostics: Arc<DiagnosticSink>,
    stats: Arc<WalkStats>,
    shutdown: Arc<AtomicBool>,
    max_depth: Option<usize>,
}

impl WalkContext {
    /// Record a node as seen; false if it was already visited
    fn first_visit(&self, identity: &NodeIdentity) -> bool {
        let inserted = self.visited.lock().insert(identity.clone());
        if !inserted {
            self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(identity = %identity, "Node already visited, skipping");
        }
        inserted
    }

    /// Queue a container for expansion if the depth limit allows it
    fn schedule_expansion(&self, node: &Node, depth: usize) -> Result<(), WorkerError> {
        let NodeKind::Container { container_token } = &node.kind else {
            return Ok(());
        };
        if self.max_depth.is_some_and(|max| depth > max) {
            self.stats.depth_limited.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.queue
            .schedule(ExpandTask::new(node.identity.clone(), container_token.clone(), depth))
    }

    fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.session.is_aborted()
    }
}

/// Concurrent walker over the document hierarchy
pub struct TreeWalker {
    session: Arc<PlatformSession>,
    worker_count: usize,
    capacity: usize,
    max_depth: Option<usize>,
    diagnostics: Arc<DiagnosticSink>,
    stats: Arc<WalkStats>,
    shutdown: Arc<AtomicBool>,
}

impl TreeWalker {
    /// Create a walker with `worker_count` workers and a result channel of `capacity`
    pub fn new(session: Arc<PlatformSession>, worker_count: usize, capacity: usize) -> Self {
        Self {
            session,
            worker_count: worker_count.max(1),
            capacity: capacity.max(1),
            max_depth: None,
            diagnostics: Arc::new(DiagnosticSink::new()),
            stats: Arc::new(WalkStats::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Do not expand containers deeper than `max_depth` (roots are depth 0)
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Record expansion failures into a shared sink
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Share an existing shutdown flag
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.stats)
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticSink> {
        Arc::clone(&self.diagnostics)
    }

    /// Start walking from `roots`; every root is itself emitted
    pub fn spawn(self, roots: Vec<Discovered>) -> WalkHandle {
        let (results, nodes) = mpsc::channel(self.capacity);
        let ctx = Arc::new(WalkContext {
            session: self.session,
            queue: ExpansionQueue::new(),
            visited: Mutex::new(HashSet::new()),
            results,
            diagnostics: self.diagnostics,
            stats: self.stats,
            shutdown: self.shutdown,
            max_depth: self.max_depth,
        });
        let worker_count = self.worker_count;

        let task = tokio::spawn(run_walk(ctx, roots, worker_count));
        WalkHandle { nodes, task }
    }
}

async fn run_walk(ctx: Arc<WalkContext>, roots: Vec<Discovered>, worker_count: usize) -> Result<WalkResult, WorkerError> {
    let start = Instant::now();
    info!(roots = roots.len(), workers = worker_count, "Starting hierarchy walk");

    let mut workers = JoinSet::new();
    let mut worker_ids = HashMap::with_capacity(worker_count);
    for id in 0..worker_count {
        let ctx = Arc::clone(&ctx);
        let handle = workers.spawn(async move { worker_loop(id, ctx).await });
        worker_ids.insert(handle.id(), id);
    }

    let seeded = seed_roots(&ctx, roots).await;

    let mut first_error = seeded.err();
    while let Some(joined) = workers.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(worker_failed(&worker_ids, e)),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "Walker worker failed");
            first_error.get_or_insert(e);
        }
    }

    let stats = &ctx.stats;
    let result = WalkResult {
        nodes_emitted: stats.nodes_emitted(),
        containers_expanded: stats.containers_expanded(),
        pages_fetched: stats.pages_fetched.load(Ordering::Relaxed),
        duplicates_skipped: stats.duplicates_skipped(),
        expansion_failures: stats.expansion_failures(),
        duration: start.elapsed(),
        completed: !ctx.should_stop() && ctx.queue.is_complete(),
    };

    if !ctx.queue.is_complete() {
        warn!(pending = ctx.queue.pending(), "Walk ended with unfinished expansions");
    }

    info!(
        nodes = result.nodes_emitted,
        containers = result.containers_expanded,
        pages = result.pages_fetched,
        duplicates = result.duplicates_skipped,
        failures = result.expansion_failures,
        duration_ms = result.duration.as_millis() as u64,
        "Hierarchy walk completed"
    );

    match first_error {
        Some(e) => Err(e),
        None => Ok(result),
    }
}

fn worker_failed(worker_ids: &HashMap<TaskId, usize>, e: JoinError) -> WorkerError {
    match worker_ids.get(&e.id()) {
        Some(&id) => WorkerError::Panicked {
            id,
            message: e.to_string(),
        },
        None => WorkerError::TaskFailed {
            task: "Walker worker",
            message: e.to_string(),
        },
    }
}

async fn seed_roots(ctx: &WalkContext, roots: Vec<Discovered>) -> Result<(), WorkerError> {
    let _hold = ctx.queue.hold();

    for root in roots {
        if !ctx.first_visit(root.identity()) {
            continue;
        }
        ctx.schedule_expansion(&root.node, 0)?;
        ctx.results
            .send(root)
            .await
            .map_err(|_| WorkerError::ResultChannelClosed)?;
        ctx.stats.nodes_emitted.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

async fn worker_loop(id: usize, ctx: Arc<WalkContext>) -> Result<(), WorkerError> {
    let mut expanded = 0u64;

    while let Some(task) = ctx.queue.next().await {
        let _guard = PendingGuard::for_task(&ctx.queue);
        if ctx.should_stop() {
            // Drain without calling out; the walk is being torn down
            continue;
        }
        expand(&ctx, &task).await?;
        expanded += 1;
    }

    debug!(worker = id, expanded, "Walker worker finished");
    Ok(())
}

/// List every page of one container's children
async fn expand(ctx: &WalkContext, task: &ExpandTask) -> Result<(), WorkerError> {
    let mut page_token: Option<String> = None;

    loop {
        let page = match ctx
            .session
            .list_children(&task.container_token, page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                ctx.stats.expansion_failures.fetch_add(1, Ordering::Relaxed);
                if e.is_recoverable() {
                    debug!(container = %task.container_token, error = %e, "Container not listable, skipping subtree");
                } else {
                    warn!(
                        container = %task.container_token,
                        identity = %task.identity,
                        error = %e,
                        "Child listing failed, skipping subtree"
                    );
                }
                ctx.diagnostics.record(Diagnostic::Expansion {
                    identity: task.identity.clone(),
                    container_token: task.container_token.clone(),
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };
        ctx.stats.pages_fetched.fetch_add(1, Ordering::Relaxed);

        for child in page.children {
            if !ctx.first_visit(&child.identity) {
                continue;
            }
            ctx.schedule_expansion(&child, task.depth + 1)?;
            ctx.results
                .send(Discovered::child(child))
                .await
                .map_err(|_| WorkerError::ResultChannelClosed)?;
            ctx.stats.nodes_emitted.fetch_add(1, Ordering::Relaxed);
        }

        match (page.has_more, page.next_page_token) {
            (true, Some(next)) => page_token = Some(next),
            (true, None) => {
                warn!(container = %task.container_token, "Listing reported more pages without a page token");
                break;
            }
            (false, _) => break,
        }
    }

    ctx.stats.containers_expanded.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::RateGovernor;
    use crate::platform::types::ObjectType;
    use crate::platform::{Collaborators, Credential, PlatformSnapshot, SnapshotPlatform};

    fn id(token: &str) -> NodeIdentity {
        NodeIdentity::new(token, ObjectType::Docx)
    }

    /// Root -> {A, B}, A -> {C}
    fn small_space() -> PlatformSnapshot {
        let mut snapshot = PlatformSnapshot::default();
        snapshot.insert_node(Node::container(id("root"), "Root", "wRoot"), None);
        snapshot.insert_node(Node::container(id("a"), "A", "wA"), Some("wRoot"));
        snapshot.insert_node(Node::leaf(id("b"), "B", "wB"), Some("wRoot"));
        snapshot.insert_node(Node::leaf(id("c"), "C", "wC"), Some("wA"));
        snapshot
    }

    fn session(snapshot: PlatformSnapshot) -> Arc<PlatformSession> {
        let platform = Arc::new(SnapshotPlatform::new(snapshot));
        Arc::new(PlatformSession::new(
            Collaborators::from_platform(platform),
            Credential::new("u-test"),
            Arc::new(RateGovernor::new(10_000, Duration::from_secs(1))),
        ))
    }

    fn root_of(snapshot: &PlatformSnapshot) -> Discovered {
        Discovered::root(snapshot.nodes[0].clone(), "https://www.larkoffice.com/wiki/wRoot")
    }

    fn tokens(items: &[Discovered]) -> Vec<String> {
        let mut tokens: Vec<String> = items.iter().map(|d| d.identity().token.clone()).collect();
        tokens.sort();
        tokens
    }

    #[tokio::test]
    async fn test_walk_emits_every_node_once() {
        let snapshot = small_space();
        let root = root_of(&snapshot);
        let walker = TreeWalker::new(session(snapshot), 4, 8);

        let (nodes, result) = walker.spawn(vec![root]).collect().await.unwrap();
        assert_eq!(tokens(&nodes), vec!["a", "b", "c", "root"]);
        assert_eq!(result.nodes_emitted, 4);
        assert_eq!(result.containers_expanded, 2);
        assert!(result.completed);

        let root = nodes.iter().find(|d| d.identity().token == "root").unwrap();
        assert!(root.entry_url.is_some());
        assert!(nodes
            .iter()
            .filter(|d| d.identity().token != "root")
            .all(|d| d.entry_url.is_none()));
    }

    #[tokio::test]
    async fn test_failed_listing_prunes_only_that_subtree() {
        let mut snapshot = small_space();
        snapshot.failures.list_children.push("wA".into());
        let root = root_of(&snapshot);
        let walker = TreeWalker::new(session(snapshot), 2, 8);
        let diagnostics = walker.diagnostics();

        let (nodes, result) = walker.spawn(vec![root]).collect().await.unwrap();
        assert_eq!(tokens(&nodes), vec!["a", "b", "root"]);
        assert_eq!(result.expansion_failures, 1);

        let recorded = diagnostics.drain();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(
            &recorded[0],
            Diagnostic::Expansion { container_token, .. } if container_token == "wA"
        ));
    }

    #[tokio::test]
    async fn test_failure_mid_pagination_keeps_earlier_pages() {
        let mut snapshot = PlatformSnapshot {
            page_size: 2,
            ..Default::default()
        };
        snapshot.insert_node(Node::container(id("root"), "Root", "wRoot"), None);
        for i in 0..6 {
            snapshot.insert_node(Node::leaf(id(&format!("l{}", i)), "L", format!("wL{}", i)), Some("wRoot"));
        }
        snapshot.failures.list_children_after_pages.insert("wRoot".into(), 2);
        let root = root_of(&snapshot);

        let (nodes, result) = TreeWalker::new(session(snapshot), 2, 8)
            .spawn(vec![root])
            .collect()
            .await
            .unwrap();
        // Root plus the two pages served before the failure
        assert_eq!(nodes.len(), 5);
        assert_eq!(result.expansion_failures, 1);
    }

    #[tokio::test]
    async fn test_cycle_is_walked_once() {
        let mut snapshot = small_space();
        // C lists the root as its own child
        snapshot.nodes[3] = Node::container(id("c"), "C", "wC");
        snapshot.children.entry("wC".into()).or_default().push(id("root"));
        let root = root_of(&snapshot);

        let (nodes, result) = TreeWalker::new(session(snapshot), 3, 2)
            .spawn(vec![root])
            .collect()
            .await
            .unwrap();
        assert_eq!(tokens(&nodes), vec!["a", "b", "c", "root"]);
        assert_eq!(result.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_max_depth_stops_expansion() {
        let snapshot = small_space();
        let root = root_of(&snapshot);
        let (nodes, _) = TreeWalker::new(session(snapshot), 2, 8)
            .with_max_depth(Some(0))
            .spawn(vec![root])
            .collect()
            .await
            .unwrap();
        // A is emitted but not expanded, so C is never reached
        assert_eq!(tokens(&nodes), vec!["a", "b", "root"]);
    }

    struct PanickingLister;

    #[async_trait::async_trait]
    impl crate::platform::ChildLister for PanickingLister {
        async fn list_children(
            &self,
            _credential: &Credential,
            container_token: &str,
            _page_token: Option<&str>,
        ) -> crate::error::PlatformResult<crate::platform::ChildPage> {
            panic!("listing {} blew up", container_token)
        }
    }

    #[tokio::test]
    async fn test_worker_panic_reports_worker_id() {
        let snapshot = small_space();
        let root = root_of(&snapshot);
        let mut collaborators = Collaborators::from_platform(Arc::new(SnapshotPlatform::new(snapshot)));
        collaborators.lister = Arc::new(PanickingLister);
        let walk_session = Arc::new(PlatformSession::new(
            collaborators,
            Credential::new("u-test"),
            Arc::new(RateGovernor::new(10_000, Duration::from_secs(1))),
        ));

        let err = TreeWalker::new(walk_session, 3, 8)
            .spawn(vec![root])
            .collect()
            .await
            .unwrap_err();
        match err {
            WorkerError::Panicked { id, message } => {
                assert!(id < 3);
                assert!(message.contains("panic"), "unexpected message: {}", message);
            }
            other => panic!("expected a worker panic, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_roots_and_empty_walk() {
        let snapshot = small_space();
        let root = root_of(&snapshot);
        let walker_session = session(snapshot);

        let (nodes, _) = TreeWalker::new(Arc::clone(&walker_session), 2, 8)
            .spawn(vec![root.clone(), root])
            .collect()
            .await
            .unwrap();
        assert_eq!(nodes.len(), 4);

        let (nodes, result) = TreeWalker::new(walker_session, 2, 8)
            .spawn(Vec::new())
            .collect()
            .await
            .unwrap();
        assert!(nodes.is_empty());
        assert_eq!(result.nodes_emitted, 0);
    }
}
