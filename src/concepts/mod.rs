//! Self-organizing concept hierarchy
//!
//! Topic labels attached to ingested sources are arranged in a single-rooted
//! tree. New labels descend towards related, more general nodes; a label that
//! is more general than an existing node is promoted above it. The tree is
//! used to resolve query paths (`root > Auth > JWT`) and to boost hits whose
//! tags share concepts with the query.

mod generality;
mod hierarchy;

pub use generality::{compare_generality, node_id, normalize, specificity, Generality};
pub use hierarchy::{
    ConceptAction, ConceptEvent, ConceptHierarchy, ConceptNode, ConceptTree, InsertOutcome,
    NodeStatus, Placement, ROOT_ID, ROOT_LABEL,
};

use serde::{Deserialize, Serialize};

/// Concept hierarchy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConceptConfig {
    /// Maximum slug length of a node id (longer labels are truncated)
    pub max_label_len: usize,
    /// Support count at which a node becomes stable
    pub stable_support: u32,
    /// Minimum cosine for a label to be related to a node
    pub related_threshold: f32,
    /// Margin by which a node must beat the parent to count as related
    pub related_margin: f32,
}

impl Default for ConceptConfig {
    fn default() -> Self {
        Self {
            max_label_len: 48,
            stable_support: 3,
            related_threshold: 0.35,
            related_margin: 0.05,
        }
    }
}
