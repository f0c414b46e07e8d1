//! In-memory document platform backed by a JSON snapshot
//!
//! A snapshot describes a document space: its nodes, the child lists of its
//! containers, and the statistics and metadata the bulk lookups would
//! return. [`SnapshotPlatform`] serves all four collaborator contracts from
//! it, paginating child listings and enforcing the bulk-lookup ceiling the
//! way the real platform does.
//!
//! A [`FailurePlan`] injects failures (failed listings, failed batches,
//! failed root lookups, unreadable objects) and optional latency, which is how the CLI's offline
//! mode and the test suite exercise the pipeline's failure isolation.

use crate::config::{DocUrl, BATCH_CEILING, DEFAULT_DOMAIN};
use crate::error::{PlatformError, PlatformResult, StatsError};
use crate::platform::types::{
    ChildPage, MetaRecord, Node, NodeIdentity, ObjectType, ResolvedRoot, StatsRecord,
};
use crate::platform::{ChildLister, Credential, MetaFetcher, RootResolver, StatsFetcher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_PAGE_SIZE: usize = 50;

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_batch() -> usize {
    BATCH_CEILING
}

/// Failures and latency to inject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePlan {
    /// Container tokens whose listing fails on the first page
    pub list_children: Vec<String>,

    /// Container tokens whose listing fails once this many pages were served
    pub list_children_after_pages: HashMap<String, usize>,

    /// Root tokens whose node lookup fails
    pub fetch_node: Vec<String>,

    /// Node and container tokens the credential may not read
    pub denied: Vec<String>,

    /// Every statistics batch fails outright
    pub stats_batches: bool,

    /// Every metadata batch fails outright
    pub meta_batches: bool,

    /// Artificial latency per call, in milliseconds
    pub latency_ms: u64,
}

/// Statistics for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEntry {
    pub identity: NodeIdentity,
    pub stats: StatsRecord,
}

/// Metadata for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub identity: NodeIdentity,
    pub meta: MetaRecord,
}

/// Serializable description of a document space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    /// Domain accepted in root URLs
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Children served per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Largest bulk lookup accepted
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Accepted credentials (empty accepts any non-empty credential)
    #[serde(default)]
    pub credentials: Vec<String>,

    /// Every node in the space
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Container token -> ordered child identities
    #[serde(default)]
    pub children: HashMap<String, Vec<NodeIdentity>>,

    #[serde(default)]
    pub stats: Vec<StatsEntry>,

    #[serde(default)]
    pub metas: Vec<MetaEntry>,

    #[serde(default)]
    pub failures: FailurePlan,
}

impl Default for PlatformSnapshot {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            page_size: DEFAULT_PAGE_SIZE,
            max_batch: BATCH_CEILING,
            credentials: Vec::new(),
            nodes: Vec::new(),
            children: HashMap::new(),
            stats: Vec::new(),
            metas: Vec::new(),
            failures: FailurePlan::default(),
        }
    }
}

impl PlatformSnapshot {
    /// Read a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self, StatsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Add a node, appending it to `parent`'s child list when given
    pub fn insert_node(&mut self, node: Node, parent: Option<&str>) {
        if let Some(parent) = parent {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(node.identity.clone());
        }
        self.nodes.push(node);
    }

    pub fn insert_stats(&mut self, identity: NodeIdentity, stats: StatsRecord) {
        self.stats.push(StatsEntry { identity, stats });
    }

    pub fn insert_meta(&mut self, identity: NodeIdentity, meta: MetaRecord) {
        self.metas.push(MetaEntry { identity, meta });
    }
}

/// Counters for calls served by a snapshot platform
#[derive(Debug, Default)]
pub struct SnapshotCalls {
    pub node_lookups: AtomicU64,
    pub child_pages: AtomicU64,
    pub stats_batches: AtomicU64,
    pub meta_batches: AtomicU64,
    pub largest_batch: AtomicUsize,
}

/// Collaborator implementation serving a [`PlatformSnapshot`]
pub struct SnapshotPlatform {
    domain: String,
    page_size: usize,
    max_batch: usize,
    credentials: HashSet<String>,
    by_identity: HashMap<NodeIdentity, Node>,
    by_position: HashMap<String, Node>,
    children: HashMap<String, Vec<Node>>,
    stats: HashMap<NodeIdentity, StatsRecord>,
    metas: HashMap<NodeIdentity, MetaRecord>,
    failures: FailurePlan,
    calls: SnapshotCalls,
}

impl SnapshotPlatform {
    pub fn new(snapshot: PlatformSnapshot) -> Self {
        let mut by_identity = HashMap::with_capacity(snapshot.nodes.len());
        let mut by_position = HashMap::new();
        for node in snapshot.nodes {
            if let Some(position) = node.container_token() {
                by_position.insert(position.to_string(), node.clone());
            }
            by_identity.insert(node.identity.clone(), node);
        }

        let mut children = HashMap::with_capacity(snapshot.children.len());
        for (parent, identities) in snapshot.children {
            let mut resolved = Vec::with_capacity(identities.len());
            for identity in identities {
                match by_identity.get(&identity) {
                    Some(node) => resolved.push(node.clone()),
                    None => warn!(parent = %parent, identity = %identity, "Snapshot child has no node entry"),
                }
            }
            children.insert(parent, resolved);
        }

        Self {
            domain: snapshot.domain,
            page_size: snapshot.page_size.max(1),
            max_batch: snapshot.max_batch.max(1),
            credentials: snapshot.credentials.into_iter().collect(),
            by_identity,
            by_position,
            children,
            stats: snapshot.stats.into_iter().map(|e| (e.identity, e.stats)).collect(),
            metas: snapshot.metas.into_iter().map(|e| (e.identity, e.meta)).collect(),
            failures: snapshot.failures,
            calls: SnapshotCalls::default(),
        }
    }

    /// Load a snapshot file and serve it
    pub fn load(path: &Path) -> Result<Self, StatsError> {
        Ok(Self::new(PlatformSnapshot::load(path)?))
    }

    pub fn calls(&self) -> &SnapshotCalls {
        &self.calls
    }

    /// Number of nodes in the space
    pub fn node_count(&self) -> usize {
        self.by_identity.len()
    }

    fn check_credential(&self, credential: &Credential) -> PlatformResult<()> {
        if credential.is_empty() {
            return Err(PlatformError::CredentialRejected {
                reason: "empty credential".into(),
            });
        }
        if !self.credentials.is_empty() && !self.credentials.contains(credential.expose()) {
            return Err(PlatformError::CredentialRejected {
                reason: "unknown or expired access token".into(),
            });
        }
        Ok(())
    }

    fn check_readable(&self, token: &str) -> PlatformResult<()> {
        if self.failures.denied.iter().any(|t| t == token) {
            return Err(PlatformError::PermissionDenied {
                token: token.to_string(),
            });
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if self.failures.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.failures.latency_ms)).await;
        }
    }

    fn check_batch(&self, identities: &[NodeIdentity]) -> PlatformResult<()> {
        self.calls
            .largest_batch
            .fetch_max(identities.len(), Ordering::Relaxed);
        if identities.len() > self.max_batch {
            return Err(PlatformError::Protocol {
                code: 400,
                message: format!(
                    "request_docs holds {} entries, limit is {}",
                    identities.len(),
                    self.max_batch
                ),
            });
        }
        Ok(())
    }
}

fn parse_page_token(token: &str) -> PlatformResult<usize> {
    token
        .strip_prefix("page-")
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| PlatformError::Protocol {
            code: 400,
            message: format!("invalid page_token '{}'", token),
        })
}

#[async_trait]
impl RootResolver for SnapshotPlatform {
    async fn resolve_root(&self, raw: &str) -> PlatformResult<ResolvedRoot> {
        let url = DocUrl::parse(raw, &self.domain)?;
        Ok(ResolvedRoot {
            kind: url.root_kind(),
            identity: url.identity(),
        })
    }

    async fn fetch_node(&self, credential: &Credential, identity: &NodeIdentity) -> PlatformResult<Node> {
        self.calls.node_lookups.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_credential(credential)?;

        self.check_readable(&identity.token)?;
        if self.failures.fetch_node.contains(&identity.token) {
            return Err(PlatformError::Transport(format!(
                "get_node failed for '{}'",
                identity.token
            )));
        }

        // Hierarchy URLs carry the node's position token, not its object token
        let node = if identity.object_type == ObjectType::Wiki {
            self.by_position.get(&identity.token)
        } else {
            self.by_identity.get(identity)
        };

        node.cloned().ok_or_else(|| PlatformError::NotFound {
            token: identity.token.clone(),
        })
    }
}

#[async_trait]
impl ChildLister for SnapshotPlatform {
    async fn list_children(
        &self,
        credential: &Credential,
        container_token: &str,
        page_token: Option<&str>,
    ) -> PlatformResult<ChildPage> {
        let page_index = self.calls.child_pages.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_credential(credential)?;

        let offset = match page_token {
            Some(token) => parse_page_token(token)?,
            None => 0,
        };
        let served_pages = offset / self.page_size;

        self.check_readable(container_token)?;
        if self.failures.list_children.iter().any(|t| t == container_token) {
            return Err(PlatformError::Transport(format!(
                "list_children failed for '{}'",
                container_token
            )));
        }
        if let Some(&limit) = self.failures.list_children_after_pages.get(container_token) {
            if served_pages >= limit {
                return Err(PlatformError::Timeout { attempts: 3 });
            }
        }

        let all = self
            .children
            .get(container_token)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let end = (offset + self.page_size).min(all.len());
        let children = all.get(offset..end).map(<[Node]>::to_vec).unwrap_or_default();
        let has_more = end < all.len();

        debug!(
            container = container_token,
            offset,
            returned = children.len(),
            call = page_index,
            "Served child page"
        );

        Ok(ChildPage {
            children,
            next_page_token: has_more.then(|| format!("page-{}", end)),
            has_more,
        })
    }
}

#[async_trait]
impl StatsFetcher for SnapshotPlatform {
    async fn fetch_stats(
        &self,
        credential: &Credential,
        identities: &[NodeIdentity],
    ) -> PlatformResult<HashMap<NodeIdentity, StatsRecord>> {
        self.calls.stats_batches.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_credential(credential)?;
        self.check_batch(identities)?;

        if self.failures.stats_batches {
            return Err(PlatformError::Protocol {
                code: 500,
                message: "file_statistics unavailable".into(),
            });
        }

        Ok(identities
            .iter()
            .filter_map(|id| self.stats.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }
}

#[async_trait]
impl MetaFetcher for SnapshotPlatform {
    async fn fetch_meta(
        &self,
        credential: &Credential,
        identities: &[NodeIdentity],
    ) -> PlatformResult<HashMap<NodeIdentity, MetaRecord>> {
        self.calls.meta_batches.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_credential(credential)?;
        self.check_batch(identities)?;

        if self.failures.meta_batches {
            return Err(PlatformError::Protocol {
                code: 500,
                message: "batch_query meta unavailable".into(),
            });
        }

        Ok(identities
            .iter()
            .filter_map(|id| self.metas.get(id).map(|m| (id.clone(), m.clone())))
            .collect())
    }
}
