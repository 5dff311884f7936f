//! Threat model document data

use crate::core::node::NodeId;

/// One threat model document: the forest root or a sub-document declared
/// under a parent's `children` key.
#[derive(Debug, Clone, Default)]
pub struct ThreatModelData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub authors: Vec<String>,
    pub history: Option<String>,
    /// Free-text analysis section
    pub analysis: Option<String>,
    pub applies_to_versions: Option<String>,
    /// The document's scope statement; set once during construction
    pub scope: Option<NodeId>,
    pub security_objectives: Vec<NodeId>,
    pub assets: Vec<NodeId>,
    pub attackers: Vec<NodeId>,
    pub assumptions: Vec<NodeId>,
    pub threats: Vec<NodeId>,
    /// Child threat model documents, loaded from sibling directories.
    /// Kept separate from the generic ownership children so that
    /// descendant lookup by id stays within one document unless the
    /// forest-wide search order is requested explicitly.
    pub children: Vec<NodeId>,
}
