//! Scope statement data

/// The scope statement of one threat model document.
///
/// At authoring time the scope block also carries the document's security
/// objectives, assets, attackers, and assumptions; those are re-parented to
/// the owning threat model during construction, leaving the scope node with
/// the descriptive text only.
#[derive(Debug, Clone, Default)]
pub struct ScopeData {
    pub title: Option<String>,
    pub description: String,
}
