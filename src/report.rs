//! Run results and diagnostics
//!
//! A run always returns whatever it could compute. Everything it had to skip
//! is described by a [`Diagnostic`]: which root, subtree, batch or identity
//! was dropped and why.

use crate::config::RankKey;
use crate::platform::types::{DocumentRecord, NodeIdentity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Which bulk lookup a diagnostic refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    Stats,
    Meta,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Stats => f.write_str("statistics"),
            Lookup::Meta => f.write_str("metadata"),
        }
    }
}

/// Which half of a join was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingHalf {
    Stats,
    Meta,
    Both,
}

impl fmt::Display for MissingHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingHalf::Stats => f.write_str("statistics"),
            MissingHalf::Meta => f.write_str("metadata"),
            MissingHalf::Both => f.write_str("statistics and metadata"),
        }
    }
}

/// A non-fatal failure recorded during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A root could not be parsed or its node could not be looked up
    Resolution { root: String, reason: String },

    /// A container's children could not be (fully) listed
    Expansion {
        identity: NodeIdentity,
        container_token: String,
        reason: String,
    },

    /// A bulk lookup failed outright; the whole batch was dropped
    BatchLookup {
        batch: u64,
        lookup: Lookup,
        identities: Vec<NodeIdentity>,
        reason: String,
    },

    /// An identity resolved in one lookup but not the other
    PartialJoin {
        identity: NodeIdentity,
        missing: MissingHalf,
    },

    /// An identity appeared more than once in one batch; only the first was kept
    DuplicateEntry { batch: u64, identity: NodeIdentity },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Resolution { root, reason } => {
                write!(f, "root '{}' skipped: {}", root, reason)
            }
            Diagnostic::Expansion {
                identity,
                container_token,
                reason,
            } => write!(
                f,
                "subtree of {} (container {}) not fully listed: {}",
                identity, container_token, reason
            ),
            Diagnostic::BatchLookup {
                batch,
                lookup,
                identities,
                reason,
            } => write!(
                f,
                "batch {} dropped ({} identities): {} lookup failed: {}",
                batch,
                identities.len(),
                lookup,
                reason
            ),
            Diagnostic::PartialJoin { identity, missing } => {
                write!(f, "{} dropped: no {}", identity, missing)
            }
            Diagnostic::DuplicateEntry { batch, identity } => {
                write!(f, "{} dropped: repeated in batch {}", identity, batch)
            }
        }
    }
}

/// Thread-safe collector shared by pipeline stages
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }

    pub fn extend(&self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.entries.lock().extend(diagnostics);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Take everything recorded so far
    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }
}

/// Counters and timings describing a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub roots: usize,
    pub hierarchical_roots: usize,
    pub flat_roots: usize,
    pub nodes_discovered: u64,
    pub containers_expanded: u64,
    pub duplicates_skipped: u64,
    pub batches: u64,
    pub records: usize,
    pub dropped: usize,
    pub remote_calls: u64,
    #[serde(with = "duration_millis")]
    pub rate_wait: Duration,
    pub rank_by: RankKey,

    /// False when the run was interrupted before the walk finished
    pub completed: bool,
}

/// Final output of a run
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Joined records, ranked
    pub records: Vec<DocumentRecord>,

    /// What could not be computed
    pub diagnostics: Vec<Diagnostic>,

    pub summary: RunSummary,
}

impl StatsReport {
    pub fn is_complete(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
