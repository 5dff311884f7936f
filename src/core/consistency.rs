//! Threat model consistency checks
//!
//! Non-fatal cross-field checks over the resolved graph. Findings never
//! abort a load; they are returned to the caller and logged as warnings.

use tracing::warn;

use crate::core::node::{Forest, NodeId};

/// Check every threat under `root` against the mitigation bookkeeping rules:
///
/// - a fully mitigated threat needs at least one countermeasure in place
/// - a threat that is not fully mitigated must not have one in place
/// - a public threat must be fully mitigated
/// - a fully mitigated public threat needs a countermeasure that is both
///   in place and public
pub fn check_consistency(forest: &Forest, root: NodeId) -> Vec<String> {
    let mut warnings = Vec::new();

    for threat_id in forest.threats_down(root) {
        let threat = match forest.node(threat_id).data.as_threat() {
            Some(t) => t,
            None => continue,
        };
        let id = forest.full_id(threat_id);

        let countermeasures: Vec<_> = threat
            .countermeasures
            .iter()
            .filter_map(|&cm| forest.node(cm).data.as_countermeasure())
            .collect();
        let has_in_place = countermeasures.iter().any(|cm| cm.in_place);
        let is_public = threat.public == Some(true);

        if threat.fully_mitigated {
            if !has_in_place {
                warnings.push(format!(
                    "Threat '{id}' is fully mitigated but has no 'inPlace' countermeasures."
                ));
            }
        } else if has_in_place {
            warnings.push(format!(
                "Threat '{id}' is not fully mitigated but has 'inPlace' countermeasures."
            ));
        }

        if is_public && !threat.fully_mitigated {
            warnings.push(format!("Threat '{id}' is public but not fully mitigated."));
        }

        if threat.fully_mitigated && is_public {
            let has_in_place_public = countermeasures.iter().any(|cm| cm.in_place && cm.public);
            if !has_in_place_public {
                warnings.push(format!(
                    "Threat '{id}' is fully mitigated and public but has no 'inPlace' and public countermeasures."
                ));
            }
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::build_forest;
    use crate::core::filter::RecordFilter;
    use crate::core::loader::Document;
    use crate::core::resolve::resolve_references;
    use serde_yml::Value;
    use std::path::PathBuf;

    fn warnings_for(threats_yaml: &str) -> Vec<String> {
        let text = format!(
            "ID: Root\nanalysis: a\nscope:\n  description: d\nthreats:\n{threats_yaml}"
        );
        let mapping = match serde_yml::from_str(&text).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("fixture must be a mapping, got {other:?}"),
        };
        let doc = Document {
            path: PathBuf::from("model.yaml"),
            file_name: "model.yaml".to_string(),
            text,
            mapping,
            children: Vec::new(),
        };
        let (mut forest, root) = build_forest(&doc, &RecordFilter::default()).unwrap();
        resolve_references(&mut forest, root).unwrap();
        check_consistency(&forest, root)
    }

    #[test]
    fn test_fully_mitigated_without_in_place() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    fullyMitigated: true\n",
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            "Threat 'Root.T1' is fully mitigated but has no 'inPlace' countermeasures."
        );
    }

    #[test]
    fn test_unmitigated_with_in_place() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    fullyMitigated: false\n    countermeasures:\n      - ID: CM1\n        description: c\n        inPlace: true\n        public: true\n",
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            "Threat 'Root.T1' is not fully mitigated but has 'inPlace' countermeasures."
        );
    }

    #[test]
    fn test_public_but_not_mitigated() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    public: true\n    fullyMitigated: false\n",
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            "Threat 'Root.T1' is public but not fully mitigated."
        );
    }

    #[test]
    fn test_public_mitigated_needs_public_in_place_countermeasure() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    public: true\n    fullyMitigated: true\n    countermeasures:\n      - ID: CM1\n        description: c\n        inPlace: true\n        public: false\n",
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            "Threat 'Root.T1' is fully mitigated and public but has no 'inPlace' and public countermeasures."
        );
    }

    #[test]
    fn test_consistent_threat_is_quiet() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    public: true\n    fullyMitigated: true\n    countermeasures:\n      - ID: CM1\n        description: c\n        inPlace: true\n        public: true\n",
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_absent_public_key_is_not_public() {
        let warnings = warnings_for(
            "  - ID: T1\n    threatType: Spoofing\n    fullyMitigated: true\n    countermeasures:\n      - ID: CM1\n        description: c\n        inPlace: true\n        public: false\n",
        );
        assert!(warnings.is_empty());
    }
}
