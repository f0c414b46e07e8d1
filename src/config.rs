//! Configuration types for doc-stats-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Per-run pipeline configuration with validation
//! - Document URL parsing
//!
//! Tuning knobs live in a [`PipelineConfig`] value handed to each run, so
//! concurrent runs with different settings never interfere.

use crate::error::{ConfigError, ConfigResult, PlatformError, PlatformResult};
use crate::platform::types::{DocumentRecord, NodeIdentity, ObjectType, RootKind};
use clap::Parser;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum identities a single bulk lookup accepts
pub const BATCH_CEILING: usize = 200;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Minimum result channel size
const MIN_QUEUE_SIZE: usize = 16;

/// Default platform call budget: 100 calls per minute
const DEFAULT_RATE_LIMIT: u32 = 100;
const DEFAULT_RATE_PERIOD_SECS: u64 = 60;

/// Longest accepted rate window
const MAX_RATE_PERIOD_SECS: u64 = 24 * 60 * 60;

const DEFAULT_BASE_URL: &str = "https://www.larkoffice.com";
pub const DEFAULT_DOMAIN: &str = "larkoffice.com";

/// Regex for document URLs: scheme://host/<type>/<token>[/...][?query][#fragment]
static DOC_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^/\s?#]+)/([A-Za-z]+)/([A-Za-z0-9_-]+)(?:[/?#]\S*)?$")
        .expect("Invalid document URL regex")
});

/// Per-document usage statistics for document hierarchies
#[derive(Parser, Debug, Clone)]
#[command(
    name = "doc-stats-walker",
    version,
    about = "Walk document hierarchies and collect per-document usage statistics",
    long_about = "Resolves each root URL, walks wiki hierarchies concurrently, looks up \
                  statistics and metadata for every discovered document in batches, and \
                  prints the joined records ranked by unique visitors.\n\n\
                  Runs against a JSON platform snapshot.",
    after_help = "EXAMPLES:\n    \
        doc-stats-walker --snapshot space.json https://www.larkoffice.com/wiki/wikRoot\n    \
        doc-stats-walker --snapshot space.json -b 50 --rate-limit 20 URL1 URL2\n    \
        doc-stats-walker --snapshot space.json --rank-by pv -o stats.json URL"
)]
pub struct CliArgs {
    /// Document URLs to process (wiki URLs are walked, others looked up directly)
    #[arg(value_name = "URL", required = true)]
    pub roots: Vec<String>,

    /// JSON platform snapshot to run against
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// User access token
    #[arg(long, env = "DOC_STATS_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Number of hierarchy expansion workers
    #[arg(short = 'w', long, default_value_t = default_workers(), value_name = "NUM")]
    pub workers: usize,

    /// Identities per bulk lookup (at most 200)
    #[arg(short = 'b', long, default_value_t = BATCH_CEILING, value_name = "NUM")]
    pub batch_size: usize,

    /// Platform calls allowed per rate period
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT, value_name = "NUM")]
    pub rate_limit: u32,

    /// Rate period in seconds
    #[arg(long, default_value_t = DEFAULT_RATE_PERIOD_SECS, value_name = "SECS")]
    pub rate_period: u64,

    /// Batches looked up concurrently
    #[arg(long, default_value = "4", value_name = "NUM")]
    pub inflight_batches: usize,

    /// Discovered-node channel size (controls memory usage)
    #[arg(long, default_value = "1024", value_name = "NUM")]
    pub queue_size: usize,

    /// Maximum hierarchy depth to expand (unlimited if not set)
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<usize>,

    /// Ranking key for the output (uv, pv, like_count, ...)
    #[arg(long, default_value = "uv", value_name = "KEY")]
    pub rank_by: String,

    /// Base URL used to derive document links
    #[arg(long, default_value = DEFAULT_BASE_URL, value_name = "URL")]
    pub base_url: String,

    /// Platform domain accepted in root URLs (overrides the snapshot's)
    #[arg(long, value_name = "DOMAIN")]
    pub domain: Option<String>,

    /// Write the report as JSON to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Number of records to print when no output file is given
    #[arg(short = 'n', long, default_value = "20", value_name = "NUM")]
    pub top: usize,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_workers() -> usize {
    // Listing calls are I/O bound
    (num_cpus::get() * 2).min(MAX_WORKERS)
}

/// Field used to rank the final records (always descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankKey {
    #[default]
    Uv,
    Pv,
    LikeCount,
    CommentCount,
    EditCount,
    UvToday,
    PvToday,
    LastModified,
    UpdateTime,
}

impl RankKey {
    /// Extract the ranking value from a record
    pub fn value(&self, record: &DocumentRecord) -> i64 {
        match self {
            RankKey::Uv => record.uv,
            RankKey::Pv => record.pv,
            RankKey::LikeCount => record.like_count,
            RankKey::CommentCount => record.comment_count,
            RankKey::EditCount => record.edit_count,
            RankKey::UvToday => record.uv_today,
            RankKey::PvToday => record.pv_today,
            RankKey::LastModified => record.last_modified,
            RankKey::UpdateTime => record.update_time,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RankKey::Uv => "uv",
            RankKey::Pv => "pv",
            RankKey::LikeCount => "like_count",
            RankKey::CommentCount => "comment_count",
            RankKey::EditCount => "edit_count",
            RankKey::UvToday => "uv_today",
            RankKey::PvToday => "pv_today",
            RankKey::LastModified => "last_modified",
            RankKey::UpdateTime => "update_time",
        }
    }
}

impl FromStr for RankKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "uv" => Ok(RankKey::Uv),
            "pv" => Ok(RankKey::Pv),
            "like_count" | "likes" => Ok(RankKey::LikeCount),
            "comment_count" | "comments" => Ok(RankKey::CommentCount),
            "edit_count" | "edits" => Ok(RankKey::EditCount),
            "uv_today" => Ok(RankKey::UvToday),
            "pv_today" => Ok(RankKey::PvToday),
            "last_modified" => Ok(RankKey::LastModified),
            "update_time" => Ok(RankKey::UpdateTime),
            _ => Err(ConfigError::InvalidRankKey { key: s.to_string() }),
        }
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed document URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocUrl {
    /// Host the URL points at
    pub host: String,

    /// Object kind from the first path segment
    pub object_type: ObjectType,

    /// Object or hierarchy-node token from the second path segment
    pub token: String,
}

impl DocUrl {
    /// Parse a document URL, requiring the host to belong to `domain`
    ///
    /// Accepts:
    /// - https://host.domain/wiki/<node_token>
    /// - https://host.domain/<type>/<token>
    /// - either of the above with extra path segments, query or fragment
    pub fn parse(url: &str, domain: &str) -> PlatformResult<Self> {
        let url = url.trim();
        let invalid = |reason: String| PlatformError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let caps = DOC_URL_REGEX
            .captures(url)
            .ok_or_else(|| invalid("Expected format: https://<host>/<type>/<token>".into()))?;

        let host = caps
            .get(1)
            .map(|m| m.as_str().to_ascii_lowercase())
            .ok_or_else(|| invalid("Missing host".into()))?;
        let host_name = host.split(':').next().unwrap_or_default();
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        if host_name != domain && !host_name.ends_with(&format!(".{}", domain)) {
            return Err(invalid(format!("Host must belong to {}", domain)));
        }

        let object_type = caps
            .get(2)
            .map(|m| ObjectType::parse(m.as_str()))
            .ok_or_else(|| invalid("Missing document type".into()))?;
        let token = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| invalid("Missing document token".into()))?;

        Ok(Self {
            host,
            object_type,
            token,
        })
    }

    /// Whether this root must be walked
    pub fn root_kind(&self) -> RootKind {
        if self.object_type.is_hierarchy() {
            RootKind::Hierarchical
        } else {
            RootKind::Flat
        }
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.token.clone(), self.object_type.clone())
    }
}

/// Validated per-run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Identities per bulk lookup
    pub max_batch_size: usize,

    /// Platform calls per rate period
    pub rate_limit: u32,

    /// Rate window length
    pub rate_period: Duration,

    /// Hierarchy expansion workers
    pub worker_count: usize,

    /// Discovered-node and batch channel capacity
    pub queue_size: usize,

    /// Batches looked up concurrently
    pub max_inflight_batches: usize,

    /// Maximum expansion depth (roots are depth 0)
    pub max_depth: Option<usize>,

    /// Ranking key for the output
    pub rank_by: RankKey,

    /// Base URL for derived document links
    pub base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: BATCH_CEILING,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_period: Duration::from_secs(DEFAULT_RATE_PERIOD_SECS),
            worker_count: 16,
            queue_size: 1024,
            max_inflight_batches: 4,
            max_depth: None,
            rank_by: RankKey::Uv,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> ConfigResult<Self> {
        let config = Self {
            max_batch_size: args.batch_size,
            rate_limit: args.rate_limit,
            rate_period: Duration::from_secs(args.rate_period),
            worker_count: args.workers,
            queue_size: args.queue_size,
            max_inflight_batches: args.inflight_batches,
            max_depth: args.max_depth,
            rank_by: args.rank_by.parse()?,
            base_url: args.base_url.trim_end_matches('/').to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every knob is within range
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_batch_size == 0 || self.max_batch_size > BATCH_CEILING {
            return Err(ConfigError::InvalidBatchSize {
                size: self.max_batch_size,
                max: BATCH_CEILING,
            });
        }

        if self.worker_count == 0 || self.worker_count > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: self.worker_count,
                max: MAX_WORKERS,
            });
        }

        if self.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: self.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        if self.max_inflight_batches == 0 {
            return Err(ConfigError::InvalidInflightBatches {
                count: self.max_inflight_batches,
            });
        }

        if self.rate_limit == 0 {
            return Err(ConfigError::InvalidRateLimit {
                limit: self.rate_limit,
            });
        }

        if self.rate_period.is_zero() || self.rate_period > Duration::from_secs(MAX_RATE_PERIOD_SECS) {
            return Err(ConfigError::InvalidRatePeriod {
                secs: self.rate_period.as_secs(),
                max: MAX_RATE_PERIOD_SECS,
            });
        }

        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "must start with http:// or https://".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wiki_url() {
        let url = DocUrl::parse("https://acme.larkoffice.com/wiki/GQ0Owf7EmirsookHOh4cpx4XnMf", "larkoffice.com").unwrap();
        assert_eq!(url.host, "acme.larkoffice.com");
        assert_eq!(url.object_type, ObjectType::Wiki);
        assert_eq!(url.token, "GQ0Owf7EmirsookHOh4cpx4XnMf");
        assert_eq!(url.root_kind(), RootKind::Hierarchical);
    }

    #[test]
    fn test_parse_docx_url_with_query() {
        let url = DocUrl::parse("https://www.larkoffice.com/docx/Hvjcd6E7uoJP5exO8K2leqlegcc?from=from_copylink", "larkoffice.com").unwrap();
        assert_eq!(url.object_type, ObjectType::Docx);
        assert_eq!(url.token, "Hvjcd6E7uoJP5exO8K2leqlegcc");
        assert_eq!(url.root_kind(), RootKind::Flat);
    }

    #[test]
    fn test_parse_bare_domain() {
        let url = DocUrl::parse("https://larkoffice.com/sheet/shtA/", "larkoffice.com").unwrap();
        assert_eq!(url.object_type, ObjectType::Sheet);
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(DocUrl::parse("invalid", "larkoffice.com").is_err());
        assert!(DocUrl::parse("https://larkoffice.com/wiki", "larkoffice.com").is_err());
        assert!(DocUrl::parse("https://evil.com/wiki/tok", "larkoffice.com").is_err());
        assert!(DocUrl::parse("https://notlarkoffice.com/wiki/tok", "larkoffice.com").is_err());
    }

    #[test]
    fn test_rank_key_parse() {
        assert_eq!("uv".parse::<RankKey>().unwrap(), RankKey::Uv);
        assert_eq!("Like-Count".parse::<RankKey>().unwrap(), RankKey::LikeCount);
        assert!(matches!(
            "stars".parse::<RankKey>(),
            Err(ConfigError::InvalidRankKey { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_batch_over_ceiling() {
        let config = PipelineConfig {
            max_batch_size: BATCH_CEILING + 1,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBatchSize {
                size: BATCH_CEILING + 1,
                max: BATCH_CEILING
            })
        );

        let config = PipelineConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rate_and_workers() {
        assert!(PipelineConfig::default().validate().is_ok());

        let config = PipelineConfig {
            rate_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidRateLimit { limit: 0 }));

        let config = PipelineConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
    }

    #[test]
    fn test_validate_rate_period_bounds() {
        let config = PipelineConfig {
            rate_limit: 1,
            rate_period: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRatePeriod {
                secs: u64::MAX,
                max: MAX_RATE_PERIOD_SECS,
            })
        );

        let config = PipelineConfig {
            rate_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRatePeriod { secs: 0, .. })
        ));

        let config = PipelineConfig {
            rate_period: Duration::from_secs(MAX_RATE_PERIOD_SECS),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_args_rejects_huge_rate_period() {
        let args = CliArgs::parse_from([
            "doc-stats-walker",
            "--snapshot",
            "space.json",
            "--rate-period",
            "18446744073709551615",
            "https://www.larkoffice.com/wiki/wikA",
        ]);
        assert!(matches!(
            PipelineConfig::from_args(&args),
            Err(ConfigError::InvalidRatePeriod { .. })
        ));
    }

    #[test]
    fn test_from_args() {
        let args = CliArgs::parse_from([
            "doc-stats-walker",
            "--snapshot",
            "space.json",
            "-b",
            "50",
            "--rank-by",
            "pv",
            "--base-url",
            "https://docs.example.com/",
            "https://www.larkoffice.com/wiki/wikA",
        ]);
        let config = PipelineConfig::from_args(&args).unwrap();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.rank_by, RankKey::Pv);
        assert_eq!(config.base_url, "https://docs.example.com");
        assert_eq!(args.roots, vec!["https://www.larkoffice.com/wiki/wikA"]);
    }
}
