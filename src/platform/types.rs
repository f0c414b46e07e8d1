//! Document platform types and data structures
//!
//! These types describe the nodes returned by hierarchy listings and the
//! per-document attribute sets returned by the bulk lookups. They are
//! immutable once produced and are shared freely between pipeline stages.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Kind of object addressed by a token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Hierarchy node (wiki space entry)
    Wiki,
    /// New-style document
    Docx,
    /// Legacy document
    Doc,
    /// Spreadsheet
    Sheet,
    /// Multi-dimensional table
    Bitable,
    /// Mind map
    Mindnote,
    /// Uploaded file
    File,
    /// Presentation
    Slides,
    /// Kind not known to this crate
    Other(String),
}

impl ObjectType {
    /// Parse a kind name (case-insensitive)
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "wiki" => ObjectType::Wiki,
            "docx" => ObjectType::Docx,
            "doc" | "docs" => ObjectType::Doc,
            "sheet" | "sheets" => ObjectType::Sheet,
            "bitable" | "base" => ObjectType::Bitable,
            "mindnote" | "mindnotes" => ObjectType::Mindnote,
            "file" => ObjectType::File,
            "slides" => ObjectType::Slides,
            other => ObjectType::Other(other.to_string()),
        }
    }

    /// Canonical lowercase name, as used in URLs and API calls
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Wiki => "wiki",
            ObjectType::Docx => "docx",
            ObjectType::Doc => "doc",
            ObjectType::Sheet => "sheet",
            ObjectType::Bitable => "bitable",
            ObjectType::Mindnote => "mindnote",
            ObjectType::File => "file",
            ObjectType::Slides => "slides",
            ObjectType::Other(name) => name,
        }
    }

    /// Check if this kind addresses the hierarchy itself
    pub fn is_hierarchy(&self) -> bool {
        *self == ObjectType::Wiki
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ObjectType::parse(&raw))
    }
}

/// (token, type) pair addressing one document or container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub token: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}

impl NodeIdentity {
    pub fn new(token: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            token: token.into(),
            object_type,
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.token)
    }
}

/// Container vs. leaf, resolved once at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Hierarchy entry with children
    Container {
        /// Hierarchy-position token used to list children
        container_token: String,
    },
    /// Addressable document with nothing below it
    Leaf {
        /// Hierarchy-position token; absent for documents outside a hierarchy
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_token: Option<String>,
    },
}

/// A node discovered in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub identity: NodeIdentity,
    pub title: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    /// Create a container node
    pub fn container(
        identity: NodeIdentity,
        title: impl Into<String>,
        container_token: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            title: title.into(),
            kind: NodeKind::Container {
                container_token: container_token.into(),
            },
        }
    }

    /// Create a leaf node inside a hierarchy
    pub fn leaf(
        identity: NodeIdentity,
        title: impl Into<String>,
        container_token: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            title: title.into(),
            kind: NodeKind::Leaf {
                container_token: Some(container_token.into()),
            },
        }
    }

    /// Create a standalone document with no hierarchy position
    pub fn standalone(identity: NodeIdentity) -> Self {
        Self {
            title: String::new(),
            identity,
            kind: NodeKind::Leaf {
                container_token: None,
            },
        }
    }

    pub fn has_children(&self) -> bool {
        matches!(self.kind, NodeKind::Container { .. })
    }

    /// Hierarchy-position token, if the node lives in a hierarchy
    pub fn container_token(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Container { container_token } => Some(container_token),
            NodeKind::Leaf { container_token } => container_token.as_deref(),
        }
    }
}

/// A node flowing through the pipeline, with its entry URL if it is a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub node: Node,

    /// Caller-supplied URL; set only for roots
    pub entry_url: Option<String>,
}

impl Discovered {
    pub fn root(node: Node, entry_url: impl Into<String>) -> Self {
        Self {
            node,
            entry_url: Some(entry_url.into()),
        }
    }

    pub fn child(node: Node) -> Self {
        Self {
            node,
            entry_url: None,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.node.identity
    }
}

/// One page of a child listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildPage {
    pub children: Vec<Node>,
    pub next_page_token: Option<String>,
    pub has_more: bool,
}

/// Engagement statistics for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsRecord {
    pub uv: i64,
    pub pv: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub edit_count: i64,
    pub uv_today: i64,
    pub pv_today: i64,
    pub like_count_today: i64,
    /// Last time the counters were observed (epoch seconds)
    pub timestamp: i64,
}

/// Descriptive metadata for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaRecord {
    pub title: String,
    pub doc_type: String,
    pub latest_modify_time: i64,
    pub create_time: i64,
}

/// Whether a root must be walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    Hierarchical,
    Flat,
}

/// A parsed caller-supplied root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoot {
    pub kind: RootKind,
    pub identity: NodeIdentity,
}

/// Joined, normalized output record for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_token: Option<String>,
    pub source_url: String,
    pub uv: i64,
    pub pv: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub edit_count: i64,
    pub last_modified: i64,
    pub uv_today: i64,
    pub pv_today: i64,
    pub like_count_today: i64,
    pub update_time: i64,
}

impl DocumentRecord {
    /// Join one node's statistics and metadata
    ///
    /// Empty metadata title/type fall back to the node's own values, and
    /// a negative like count is floored at zero. Both `last_modified` and
    /// `update_time` come from the metadata's latest modification time.
    pub fn join(entry: &Discovered, stats: &StatsRecord, meta: &MetaRecord, base_url: &str) -> Self {
        let node = &entry.node;
        let title = if meta.title.is_empty() {
            node.title.clone()
        } else {
            meta.title.clone()
        };
        let doc_type = if meta.doc_type.is_empty() {
            node.identity.object_type.as_str().to_string()
        } else {
            meta.doc_type.clone()
        };
        let source_url = match &entry.entry_url {
            Some(url) => url.clone(),
            None => document_url(base_url, &node.identity),
        };

        Self {
            title,
            doc_type,
            token: node.identity.token.clone(),
            container_token: node.container_token().map(str::to_string),
            source_url,
            uv: stats.uv,
            pv: stats.pv,
            like_count: stats.like_count.max(0),
            comment_count: stats.comment_count,
            edit_count: stats.edit_count,
            last_modified: meta.latest_modify_time,
            uv_today: stats.uv_today,
            pv_today: stats.pv_today,
            like_count_today: stats.like_count_today,
            update_time: meta.latest_modify_time,
        }
    }
}

/// Derive a document's URL from its identity
pub fn document_url(base_url: &str, identity: &NodeIdentity) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        identity.object_type,
        identity.token
    )
}
