//! Hierarchical identifier rules for threat model nodes
//!
//! Every node carries a local identifier segment; its full identity is the
//! dot-joined chain of ancestor segments down from the document root
//! (e.g. `FullFeature.SubComponent.SUB_THREAT`).

use miette::Diagnostic;
use thiserror::Error;

/// A local identifier segment is rejected when it contains anything outside
/// ASCII letters, digits, and underscores
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("identifier '{id}' may only contain alphanumeric characters and underscores (parent: {parent})")]
#[diagnostic(
    code(tmkit::identity::invalid_identifier),
    help("rename the ID using only [A-Za-z0-9_]")
)]
pub struct InvalidIdentifier {
    /// The offending local identifier
    pub id: String,
    /// Full id of the parent node, or "none" for a root document
    pub parent: String,
}

/// Validate a local identifier segment against `[A-Za-z0-9_]*`.
pub fn validate_local_id(id: &str, parent: Option<&str>) -> Result<(), InvalidIdentifier> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(InvalidIdentifier {
            id: id.to_string(),
            parent: parent.unwrap_or("none").to_string(),
        })
    }
}

/// Join a parent's full id with a local segment.
pub fn join(parent: Option<&str>, local: &str) -> String {
    match parent {
        Some(p) => format!("{}.{}", p, local),
        None => local.to_string(),
    }
}

/// The anchor of a full id: everything after the first dot.
///
/// Used as an HTML-anchor-safe key by downstream renderers. A root id
/// (no dot) is its own anchor.
pub fn anchor(full_id: &str) -> &str {
    match full_id.find('.') {
        Some(idx) => &full_id[idx + 1..],
        None => full_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_local_id("THREAT_SQL_INJECTION", None).is_ok());
        assert!(validate_local_id("Sub2", Some("Root")).is_ok());
        assert!(validate_local_id("", None).is_ok());
    }

    #[test]
    fn test_invalid_identifier_names_parent() {
        let err = validate_local_id("bad id", Some("Root")).unwrap_err();
        assert_eq!(err.id, "bad id");
        assert_eq!(err.parent, "Root");

        let err = validate_local_id("dash-ed", None).unwrap_err();
        assert_eq!(err.parent, "none");
    }

    #[test]
    fn test_join() {
        assert_eq!(join(None, "Root"), "Root");
        assert_eq!(join(Some("Root"), "SO1"), "Root.SO1");
        assert_eq!(join(Some("Root.Sub"), "T1"), "Root.Sub.T1");
    }

    #[test]
    fn test_anchor() {
        assert_eq!(anchor("FullFeature"), "FullFeature");
        assert_eq!(anchor("FullFeature.THREAT_X"), "THREAT_X");
        assert_eq!(anchor("FullFeature.Sub.THREAT_Y"), "Sub.THREAT_Y");
    }
}
