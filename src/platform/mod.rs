//! Remote document platform contracts
//!
//! The pipeline never talks to the platform directly. It consumes four
//! capabilities, each an async trait so that a network client, the
//! in-memory [`SnapshotPlatform`] or a test double can stand behind it:
//!
//! - [`RootResolver`]: parse a caller reference, look up a root node
//! - [`ChildLister`]: list a container's direct children, paginated
//! - [`StatsFetcher`]: bulk engagement statistics
//! - [`MetaFetcher`]: bulk descriptive metadata
//!
//! All calls go through a [`PlatformSession`], which binds the caller's
//! credential and takes a rate-governor admission before every remote call.

pub mod session;
pub mod snapshot;
pub mod types;

use crate::error::PlatformResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use session::PlatformSession;
pub use snapshot::{PlatformSnapshot, SnapshotPlatform};
pub use types::{
    ChildPage, Discovered, DocumentRecord, MetaRecord, Node, NodeIdentity, NodeKind, ObjectType,
    ResolvedRoot, RootKind, StatsRecord,
};

/// Opaque caller credential (user access token)
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Parses caller references and looks up root nodes
#[async_trait]
pub trait RootResolver: Send + Sync {
    /// Parse a raw reference into an identity and declare whether it needs a walk
    async fn resolve_root(&self, raw: &str) -> PlatformResult<ResolvedRoot>;

    /// Look up the node behind a hierarchical root
    async fn fetch_node(&self, credential: &Credential, identity: &NodeIdentity) -> PlatformResult<Node>;
}

/// Lists the direct children of a container
#[async_trait]
pub trait ChildLister: Send + Sync {
    async fn list_children(
        &self,
        credential: &Credential,
        container_token: &str,
        page_token: Option<&str>,
    ) -> PlatformResult<ChildPage>;
}

/// Bulk statistics lookup; unresolved identities are omitted from the map
#[async_trait]
pub trait StatsFetcher: Send + Sync {
    async fn fetch_stats(
        &self,
        credential: &Credential,
        identities: &[NodeIdentity],
    ) -> PlatformResult<HashMap<NodeIdentity, StatsRecord>>;
}

/// Bulk metadata lookup; unresolved identities are omitted from the map
#[async_trait]
pub trait MetaFetcher: Send + Sync {
    async fn fetch_meta(
        &self,
        credential: &Credential,
        identities: &[NodeIdentity],
    ) -> PlatformResult<HashMap<NodeIdentity, MetaRecord>>;
}

/// The set of collaborators a run depends on
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn RootResolver>,
    pub lister: Arc<dyn ChildLister>,
    pub stats: Arc<dyn StatsFetcher>,
    pub meta: Arc<dyn MetaFetcher>,
}

impl Collaborators {
    /// Use one platform implementation for every capability
    pub fn from_platform<P>(platform: Arc<P>) -> Self
    where
        P: RootResolver + ChildLister + StatsFetcher + MetaFetcher + 'static,
    {
        Self {
            resolver: platform.clone(),
            lister: platform.clone(),
            stats: platform.clone(),
            meta: platform,
        }
    }
}
