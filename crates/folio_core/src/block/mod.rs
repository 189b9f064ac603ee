//! Block data model.
//!
//! A chapter is an ordered list of [`Block`]s. The editor produces the list,
//! the differ turns two lists into [`DeltaBlock`]s, and the merge engine
//! reconciles a local list against the server's copy.
//!
//! # Wire Format
//!
//! Blocks and deltas serialize with camelCase field names so they can be sent
//! to the delta-sync endpoint as-is:
//!
//! ```text
//! { "id": "…", "action": "update", "date": "2024-05-01T10:00:00Z", "order": 3 }
//! ```

mod apply;
mod diff;
mod merge;

pub use apply::apply_deltas;
pub use diff::{diff_blocks, diff_blocks_at};
pub use merge::{merge_blocks, should_merge};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A rich-text node as produced by the editor (arbitrary JSON object).
pub type RichTextNode = serde_json::Value;

/// Block attributes (string/number map, insertion ordered).
pub type BlockAttrs = IndexMap<String, serde_json::Value>;

/// Kind of content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Narrative prose.
    Describe,
    /// Spoken line.
    Dialogue,
    /// Author note, not rendered in exports.
    Comment,
    /// Scene break.
    Divider,
    /// Generic paragraph.
    Paragraph,
    Heading,
    Blockquote,
    Image,
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::Describe
    }
}

/// An atomic content unit with a stable id and a render order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Stable UUID, unique within a document.
    pub id: String,

    /// Render rank. Gaps are permitted.
    pub order: f64,

    pub block_type: BlockType,

    /// Rich-text node tree.
    #[serde(default)]
    pub content: Vec<RichTextNode>,

    #[serde(default)]
    pub attr: BlockAttrs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Block {
    /// Create a block with a fresh UUID.
    pub fn new(block_type: BlockType, order: f64, content: Vec<RichTextNode>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), block_type, order, content)
    }

    /// Create a block with an explicit id.
    pub fn with_id(
        id: impl Into<String>,
        block_type: BlockType,
        order: f64,
        content: Vec<RichTextNode>,
    ) -> Self {
        Self {
            id: id.into(),
            order,
            block_type,
            content,
            attr: BlockAttrs::new(),
            updated_at: None,
        }
    }

    /// Convenience constructor for a single-text-node block.
    pub fn text(id: impl Into<String>, order: f64, text: &str) -> Self {
        Self::with_id(id, BlockType::Describe, order, vec![text_node(text)])
    }

    /// Builder: set `updatedAt`.
    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Builder: set a single attribute.
    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attr.insert(key.to_string(), value.into());
        self
    }

    /// Timestamp used for last-writer-wins comparisons. Missing → epoch.
    pub fn updated_millis(&self) -> i64 {
        self.updated_at.map(|t| t.timestamp_millis()).unwrap_or(0)
    }

    /// Concatenated plain text of all `text` nodes.
    pub fn plain_text(&self) -> String {
        fn collect(node: &RichTextNode, out: &mut String) {
            if let Some(text) = node.get("text").and_then(|t| t.as_str()) {
                out.push_str(text);
            }
            if let Some(children) = node.get("content").and_then(|c| c.as_array()) {
                for child in children {
                    collect(child, out);
                }
            }
        }

        let mut out = String::new();
        for node in &self.content {
            collect(node, &mut out);
        }
        out
    }
}

/// Build a plain `{ "type": "text", "text": … }` node.
pub fn text_node(text: &str) -> RichTextNode {
    serde_json::json!({ "type": "text", "text": text })
}

/// What a delta does to its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    Create,
    Update,
    Delete,
}

/// Minimal patch for one block.
///
/// `Create` carries every field, `Update` only the changed ones, `Delete`
/// none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBlock {
    pub id: String,
    pub action: DeltaAction,
    pub date: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<RichTextNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<BlockAttrs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

impl DeltaBlock {
    /// A delta with no field changes.
    pub fn bare(id: impl Into<String>, action: DeltaAction, date: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            action,
            date,
            content: None,
            block_type: None,
            attr: None,
            order: None,
        }
    }

    /// Whether an update delta carries any field.
    pub fn has_changes(&self) -> bool {
        self.content.is_some()
            || self.block_type.is_some()
            || self.attr.is_some()
            || self.order.is_some()
    }
}

/// Ids acknowledged by the server as of the last successful round trip.
///
/// A coarse existence marker, not a per-field version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LastSyncedIds(HashSet<String>);

impl LastSyncedIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker set covering every block in `blocks`.
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self(blocks.iter().map(|b| b.id.clone()).collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) {
        self.0.insert(id.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids in sorted order (stable output for storage and display).
    pub fn sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl<S: Into<String>> FromIterator<S> for LastSyncedIds {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
