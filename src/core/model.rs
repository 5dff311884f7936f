//! Loading pipeline entry point
//!
//! Chains the stages a caller otherwise wires by hand: load the document
//! tree, gate it through the schema, build the object graph with the record
//! filter applied, resolve references once from the root, then run the
//! consistency checks.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::core::builder::{build_forest, BuildError};
use crate::core::consistency::check_consistency;
use crate::core::filter::{FilterError, RecordFilter};
use crate::core::loader::{load_document, LoaderError};
use crate::core::node::{Forest, NodeId};
use crate::core::resolve::{resolve_references, ResolveError};
use crate::schema::{DocumentValidator, ValidationError};

/// Options controlling which records get constructed.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Skip records explicitly marked `public: false`
    pub public_only: bool,
    /// Keep only records whose `appliesToVersions` range matches at least
    /// one of these concrete versions; empty means no version filtering
    pub versions: Vec<String>,
}

/// A loaded, resolved and checked threat model forest.
#[derive(Debug)]
pub struct LoadedThreatModel {
    pub forest: Forest,
    /// Root document node
    pub root: NodeId,
    /// Non-fatal consistency findings, in threat traversal order
    pub warnings: Vec<String>,
}

/// Any error the loading pipeline can stop on.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),
}

/// Load the document at `path` and every child document it declares into a
/// fully resolved forest.
pub fn load_threat_model(
    path: &Path,
    options: &LoadOptions,
) -> Result<LoadedThreatModel, LoadError> {
    let filter = RecordFilter::from_options(options.public_only, &options.versions)?;

    let doc = load_document(path)?;
    debug!(path = %path.display(), "document tree loaded");

    DocumentValidator::new().validate_tree(&doc)?;

    let (mut forest, root) = build_forest(&doc, &filter)?;
    resolve_references(&mut forest, root)?;
    let warnings = check_consistency(&forest, root);

    debug!(
        nodes = forest.len(),
        warnings = warnings.len(),
        "threat model loaded"
    );
    Ok(LoadedThreatModel {
        forest,
        root,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeKind;
    use std::fs;
    use tempfile::tempdir;

    const ROOT: &str = "\
ID: Root
title: Demo model
analysis: Overall analysis
scope:
  description: Everything
  securityObjectives:
    - ID: SO1
      description: Keep data secret
      group: CIA
  assets:
    - ID: DB
      type: data
      description: User database
      inScope: true
threats:
  - ID: T1
    threatType: Spoofing
    attack: Password guessing
    fullyMitigated: true
    impactedSecObj:
      - REFID: SO1
    assets:
      - REFID: DB
    countermeasures:
      - ID: CM1
        description: Rate limiting
        inPlace: true
        public: true
children:
  - ID: Sub
";

    const SUB: &str = "\
ID: Sub
analysis: Child analysis
scope:
  description: Child scope
threats:
  - ID: T2
    threatType: Tampering
    fullyMitigated: false
    impactedSecObj:
      - REFID: SO1
";

    fn write_model(dir: &Path) -> std::path::PathBuf {
        let root = dir.join("Root.yaml");
        fs::write(&root, ROOT).unwrap();
        let sub_dir = dir.join("Sub");
        fs::create_dir(&sub_dir).unwrap();
        fs::write(sub_dir.join("Sub.yaml"), SUB).unwrap();
        root
    }

    #[test]
    fn test_end_to_end_load() {
        let dir = tempdir().unwrap();
        let path = write_model(dir.path());

        let loaded = load_threat_model(&path, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.forest.full_id(loaded.root), "Root");
        assert!(loaded.warnings.is_empty());

        let threats = loaded.forest.threats_down(loaded.root);
        assert_eq!(threats.len(), 2);

        // The child document's reference resolves to the root's objective
        let t2 = loaded
            .forest
            .descendant_first_by_id(loaded.root, "T2")
            .unwrap();
        let data = loaded.forest.node(t2).data.as_threat().unwrap();
        let so_ref = data.impacted_sec_objs[0];
        assert!(loaded.forest.node(so_ref).is_reference);
        assert_eq!(loaded.forest.full_id(so_ref), "Root.SO1");
    }

    #[test]
    fn test_schema_gate_runs_before_build() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Root.yaml");
        fs::write(&path, "title: no id or scope here\n").unwrap();

        let err = load_threat_model(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::Schema(_)));
    }

    #[test]
    fn test_bad_filter_version_fails_before_io() {
        let options = LoadOptions {
            public_only: false,
            versions: vec!["garbage".to_string()],
        };
        let err =
            load_threat_model(Path::new("does-not-exist.yaml"), &options).unwrap_err();
        assert!(matches!(err, LoadError::Filter(_)));
    }

    #[test]
    fn test_version_filter_drops_threat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Root.yaml");
        fs::write(
            &path,
            "ID: Root\nanalysis: a\nscope:\n  description: d\nthreats:\n  - ID: T1\n    threatType: Spoofing\n    appliesToVersions: '<2.0'\n",
        )
        .unwrap();

        let options = LoadOptions {
            public_only: false,
            versions: vec!["3.0".to_string()],
        };
        let loaded = load_threat_model(&path, &options).unwrap();
        assert!(loaded.forest.threats_down(loaded.root).is_empty());
    }

    #[test]
    fn test_unresolved_reference_aborts_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Root.yaml");
        fs::write(
            &path,
            "ID: Root\nanalysis: a\nscope:\n  description: d\nthreats:\n  - ID: T1\n    threatType: Spoofing\n    impactedSecObj:\n      - REFID: GHOST\n",
        )
        .unwrap();

        let err = load_threat_model(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::Resolve(_)));
    }

    #[test]
    fn test_warnings_are_collected_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Root.yaml");
        fs::write(
            &path,
            "ID: Root\nanalysis: a\nscope:\n  description: d\nthreats:\n  - ID: T1\n    threatType: Spoofing\n    fullyMitigated: true\n",
        )
        .unwrap();

        let loaded = load_threat_model(&path, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("Root.T1"));
    }

    #[test]
    fn test_countermeasures_counted_once() {
        let dir = tempdir().unwrap();
        let path = write_model(dir.path());

        let loaded = load_threat_model(&path, &LoadOptions::default()).unwrap();
        let cms = loaded
            .forest
            .all_down(loaded.root, NodeKind::Countermeasure);
        assert_eq!(cms.len(), 1);
    }
}
