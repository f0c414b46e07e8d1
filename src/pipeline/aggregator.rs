//! Statistics/metadata join for one batch
//!
//! Both bulk lookups for a batch are issued concurrently through the
//! governed session. Every entry either becomes a [`DocumentRecord`] or is
//! reported as dropped with a diagnostic, so
//! `records.len() + dropped.len() == batch.len()` holds for every outcome.

use crate::error::PlatformError;
use crate::pipeline::batcher::Batch;
use crate::platform::types::{DocumentRecord, NodeIdentity};
use crate::platform::PlatformSession;
use crate::report::{Diagnostic, Lookup, MissingHalf};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of aggregating one batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Sequence of the batch this came from
    pub sequence: u64,

    pub records: Vec<DocumentRecord>,

    /// Identities that produced no record
    pub dropped: Vec<NodeIdentity>,

    pub diagnostics: Vec<Diagnostic>,
}

/// Look up and join one batch
pub async fn aggregate(session: &PlatformSession, batch: Batch, base_url: &str) -> BatchOutcome {
    let sequence = batch.sequence;
    let identities: Vec<NodeIdentity> = batch
        .entries
        .iter()
        .map(|entry| entry.identity().clone())
        .collect();

    if identities.is_empty() {
        return BatchOutcome {
            sequence,
            ..Default::default()
        };
    }

    let (stats, metas) = tokio::join!(session.fetch_stats(&identities), session.fetch_meta(&identities));

    let (stats, metas) = match (stats, metas) {
        (Ok(stats), Ok(metas)) => (stats, metas),
        (Err(e), _) => return dropped_batch(sequence, identities, Lookup::Stats, e),
        (_, Err(e)) => return dropped_batch(sequence, identities, Lookup::Meta, e),
    };

    let mut outcome = BatchOutcome {
        sequence,
        records: Vec::with_capacity(batch.entries.len()),
        ..Default::default()
    };
    // A batch is built from a deduplicated stream, but a repeat must not
    // turn into a second record.
    let mut joined: HashSet<&NodeIdentity> = HashSet::with_capacity(batch.entries.len());

    for entry in &batch.entries {
        let identity = entry.identity();
        let missing = match (stats.get(identity), metas.get(identity)) {
            (Some(stat), Some(meta)) => {
                if joined.insert(identity) {
                    outcome
                        .records
                        .push(DocumentRecord::join(entry, stat, meta, base_url));
                } else {
                    debug!(batch = sequence, identity = %identity, "Repeated identity in batch, dropping");
                    outcome.dropped.push(identity.clone());
                    outcome.diagnostics.push(Diagnostic::DuplicateEntry {
                        batch: sequence,
                        identity: identity.clone(),
                    });
                }
                continue;
            }
            (None, None) => MissingHalf::Both,
            (None, Some(_)) => MissingHalf::Stats,
            (Some(_), None) => MissingHalf::Meta,
        };

        debug!(identity = %identity, missing = %missing, "Incomplete join, dropping identity");
        outcome.dropped.push(identity.clone());
        outcome.diagnostics.push(Diagnostic::PartialJoin {
            identity: identity.clone(),
            missing,
        });
    }

    debug!(
        batch = sequence,
        records = outcome.records.len(),
        dropped = outcome.dropped.len(),
        "Batch aggregated"
    );
    outcome
}

fn dropped_batch(sequence: u64, identities: Vec<NodeIdentity>, lookup: Lookup, error: PlatformError) -> BatchOutcome {
    warn!(
        batch = sequence,
        size = identities.len(),
        lookup = %lookup,
        error = %error,
        "Bulk lookup failed, dropping batch"
    );
    BatchOutcome {
        sequence,
        records: Vec::new(),
        diagnostics: vec![Diagnostic::BatchLookup {
            batch: sequence,
            lookup,
            identities: identities.clone(),
            reason: error.to_string(),
        }],
        dropped: identities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::RateGovernor;
    use crate::platform::types::{Discovered, MetaRecord, Node, ObjectType, StatsRecord};
    use crate::platform::{Collaborators, Credential, PlatformSnapshot, SnapshotPlatform};
    use std::sync::Arc;
    use std::time::Duration;

    const BASE: &str = "https://www.larkoffice.com";

    fn id(token: &str) -> NodeIdentity {
        NodeIdentity::new(token, ObjectType::Docx)
    }

    fn stats(uv: i64, likes: i64) -> StatsRecord {
        StatsRecord {
            uv,
            pv: uv * 2,
            like_count: likes,
            timestamp: 1_700_000_000,
            ..Default::default()
        }
    }

    fn meta(title: &str) -> MetaRecord {
        MetaRecord {
            title: title.into(),
            doc_type: "docx".into(),
            latest_modify_time: 1_690_000_000,
            ..Default::default()
        }
    }

    fn session_for(snapshot: PlatformSnapshot) -> PlatformSession {
        PlatformSession::new(
            Collaborators::from_platform(Arc::new(SnapshotPlatform::new(snapshot))),
            Credential::new("u-test"),
            Arc::new(RateGovernor::new(1_000, Duration::from_secs(1))),
        )
    }

    fn batch(tokens: &[&str]) -> Batch {
        Batch {
            sequence: 7,
            entries: tokens
                .iter()
                .map(|t| Discovered::child(Node::leaf(id(t), format!("Node {}", t), format!("w{}", t))))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_join_drops_missing_meta() {
        let mut snapshot = PlatformSnapshot::default();
        for token in ["a", "b", "c"] {
            snapshot.insert_stats(id(token), stats(10, 1));
        }
        snapshot.insert_meta(id("a"), meta("A"));
        snapshot.insert_meta(id("b"), meta("B"));
        let session = session_for(snapshot);

        let outcome = aggregate(&session, batch(&["a", "b", "c"]), BASE).await;
        assert_eq!(outcome.sequence, 7);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.dropped, vec![id("c")]);
        assert_eq!(
            outcome.diagnostics,
            vec![Diagnostic::PartialJoin {
                identity: id("c"),
                missing: MissingHalf::Meta,
            }]
        );
    }

    #[tokio::test]
    async fn test_record_fields() {
        let mut snapshot = PlatformSnapshot::default();
        snapshot.insert_stats(id("a"), stats(42, -3));
        snapshot.insert_meta(id("a"), meta(""));
        let session = session_for(snapshot);

        let outcome = aggregate(&session, batch(&["a"]), BASE).await;
        let record = &outcome.records[0];
        assert_eq!(record.like_count, 0);
        assert_eq!(record.uv, 42);
        assert_eq!(record.title, "Node a");
        assert_eq!(record.source_url, "https://www.larkoffice.com/docx/a");
        assert_eq!(record.container_token.as_deref(), Some("wa"));
        assert_eq!(record.update_time, 1_690_000_000);
        assert_eq!(record.last_modified, 1_690_000_000);
    }

    #[tokio::test]
    async fn test_failed_lookup_drops_whole_batch() {
        let mut snapshot = PlatformSnapshot::default();
        snapshot.insert_stats(id("a"), stats(1, 1));
        snapshot.insert_meta(id("a"), meta("A"));
        snapshot.failures.meta_batches = true;
        let session = session_for(snapshot);

        let outcome = aggregate(&session, batch(&["a", "b"]), BASE).await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.dropped.len(), 2);
        assert!(matches!(
            &outcome.diagnostics[..],
            [Diagnostic::BatchLookup { batch: 7, lookup: Lookup::Meta, identities, .. }] if identities.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_missing_both_halves() {
        let session = session_for(PlatformSnapshot::default());
        let outcome = aggregate(&session, batch(&["x"]), BASE).await;
        assert_eq!(outcome.records.len() + outcome.dropped.len(), 1);
        assert!(matches!(
            outcome.diagnostics[0],
            Diagnostic::PartialJoin {
                missing: MissingHalf::Both,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_repeated_identity_is_dropped_with_reason() {
        let mut snapshot = PlatformSnapshot::default();
        snapshot.insert_stats(id("a"), stats(5, 1));
        snapshot.insert_meta(id("a"), meta("A"));
        let session = session_for(snapshot);

        let outcome = aggregate(&session, batch(&["a", "a"]), BASE).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.dropped, vec![id("a")]);
        assert_eq!(
            outcome.diagnostics,
            vec![Diagnostic::DuplicateEntry {
                batch: 7,
                identity: id("a"),
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let session = session_for(PlatformSnapshot::default());
        let outcome = aggregate(&session, batch(&[]), BASE).await;
        assert!(outcome.records.is_empty());
        assert_eq!(session.stats().total_calls(), 0);
    }
}
