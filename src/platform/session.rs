//! Credential-bound, rate-governed access to the platform collaborators
//!
//! Every remote call the pipeline makes goes through a session: it takes a
//! [`RateGovernor`] admission, forwards the call with the caller's
//! credential, and watches for credential rejection. Once the credential is
//! rejected the session is poisoned, later calls fail fast without touching
//! the platform, and the orchestrator turns the run into a hard error.

use crate::error::{PlatformError, PlatformResult};
use crate::governor::RateGovernor;
use crate::platform::types::{ChildPage, MetaRecord, Node, NodeIdentity, ResolvedRoot, StatsRecord};
use crate::platform::{Collaborators, Credential};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Counters for calls issued through a session
#[derive(Debug, Default)]
pub struct SessionStats {
    pub node_lookups: AtomicU64,
    pub child_pages: AtomicU64,
    pub stats_batches: AtomicU64,
    pub meta_batches: AtomicU64,
    pub failed_calls: AtomicU64,
}

impl SessionStats {
    /// Total remote calls issued (successful or not)
    pub fn total_calls(&self) -> u64 {
        self.node_lookups.load(Ordering::Relaxed)
            + self.child_pages.load(Ordering::Relaxed)
            + self.stats_batches.load(Ordering::Relaxed)
            + self.meta_batches.load(Ordering::Relaxed)
    }
}

/// Governed session bound to one credential
pub struct PlatformSession {
    collaborators: Collaborators,
    credential: Credential,
    governor: Arc<RateGovernor>,
    aborted: AtomicBool,
    rejection: Mutex<Option<PlatformError>>,
    stats: SessionStats,
}

impl PlatformSession {
    pub fn new(collaborators: Collaborators, credential: Credential, governor: Arc<RateGovernor>) -> Self {
        Self {
            collaborators,
            credential,
            governor,
            aborted: AtomicBool::new(false),
            rejection: Mutex::new(None),
            stats: SessionStats::default(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// The credential rejection that poisoned this session, if any
    pub fn rejection(&self) -> Option<PlatformError> {
        self.rejection.lock().clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Parse a caller reference (local, not governed)
    pub async fn resolve_root(&self, raw: &str) -> PlatformResult<ResolvedRoot> {
        self.collaborators.resolver.resolve_root(raw).await
    }

    /// Look up a root node
    pub async fn fetch_node(&self, identity: &NodeIdentity) -> PlatformResult<Node> {
        self.admit().await?;
        self.stats.node_lookups.fetch_add(1, Ordering::Relaxed);
        let result = self
            .collaborators
            .resolver
            .fetch_node(&self.credential, identity)
            .await;
        self.observe(result)
    }

    /// List one page of a container's children
    pub async fn list_children(&self, container_token: &str, page_token: Option<&str>) -> PlatformResult<ChildPage> {
        self.admit().await?;
        self.stats.child_pages.fetch_add(1, Ordering::Relaxed);
        let result = self
            .collaborators
            .lister
            .list_children(&self.credential, container_token, page_token)
            .await;
        self.observe(result)
    }

    /// Bulk statistics lookup
    pub async fn fetch_stats(&self, identities: &[NodeIdentity]) -> PlatformResult<HashMap<NodeIdentity, StatsRecord>> {
        self.admit().await?;
        self.stats.stats_batches.fetch_add(1, Ordering::Relaxed);
        let result = self
            .collaborators
            .stats
            .fetch_stats(&self.credential, identities)
            .await;
        self.observe(result)
    }

    /// Bulk metadata lookup
    pub async fn fetch_meta(&self, identities: &[NodeIdentity]) -> PlatformResult<HashMap<NodeIdentity, MetaRecord>> {
        self.admit().await?;
        self.stats.meta_batches.fetch_add(1, Ordering::Relaxed);
        let result = self
            .collaborators
            .meta
            .fetch_meta(&self.credential, identities)
            .await;
        self.observe(result)
    }

    async fn admit(&self) -> PlatformResult<()> {
        if let Some(rejection) = self.rejection() {
            return Err(rejection);
        }
        let admission = self.governor.acquire().await;
        if !admission.waited.is_zero() {
            debug!(waited_ms = admission.waited.as_millis() as u64, "Admitted after rate wait");
        }
        // The credential may have been rejected while we waited
        match self.rejection() {
            Some(rejection) => Err(rejection),
            None => Ok(()),
        }
    }

    fn observe<T>(&self, result: PlatformResult<T>) -> PlatformResult<T> {
        if let Err(e) = &result {
            self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
            if e.is_credential_failure() {
                let mut slot = self.rejection.lock();
                if slot.is_none() {
                    error!(error = %e, "Credential rejected, aborting run");
                    *slot = Some(e.clone());
                }
                self.aborted.store(true, Ordering::SeqCst);
            }
        }
        result
    }
}
