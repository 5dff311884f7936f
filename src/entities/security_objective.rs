//! Security objective data

use crate::core::node::NodeId;

/// A security objective. Objectives are grouped for reporting and may
/// contribute to other objectives anywhere in the forest.
#[derive(Debug, Clone)]
pub struct SecurityObjectiveData {
    pub title: Option<String>,
    pub description: String,
    /// Reporting group, mandatory for every objective
    pub group: String,
    pub priority: String,
    pub in_scope: bool,
    /// References to other objectives this one contributes to.
    /// Placeholders until resolution, reference copies afterwards.
    pub contributes_to: Vec<NodeId>,
}

impl Default for SecurityObjectiveData {
    fn default() -> Self {
        Self {
            title: None,
            description: String::new(),
            group: String::new(),
            priority: "High".to_string(),
            in_scope: true,
            contributes_to: Vec::new(),
        }
    }
}
