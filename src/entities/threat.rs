//! Threat data

use crate::core::cvss::{Cvss, Severity};
use crate::core::node::NodeId;

/// A threat against one or more assets.
///
/// The `impacted_sec_objs`, `assets`, and `attackers` collections are
/// reference collections (placeholders until resolution, reference copies
/// afterwards); `countermeasures` mixes owned definitions with references.
#[derive(Debug, Clone, Default)]
pub struct ThreatData {
    pub title: Option<String>,
    /// How the attack is carried out; empty when the author has not
    /// described it yet
    pub attack: String,
    /// STRIDE-style classification, mandatory for every threat
    pub threat_type: String,
    pub impact_desc: Option<String>,
    /// Parsed CVSS v3 descriptor, absent when the record declares no vector
    pub cvss: Option<Cvss>,
    /// Declared numeric base score, kept for round-tripping even when a
    /// vector is present
    pub cvss_base: Option<f64>,
    pub fully_mitigated: bool,
    /// Explicit `public` marking; `None` when the record does not set one
    pub public: Option<bool>,
    pub applies_to_versions: Option<String>,
    /// Tracking link, dropped entirely from public views
    pub ticket_link: Option<String>,
    pub impacted_sec_objs: Vec<NodeId>,
    pub assets: Vec<NodeId>,
    pub attackers: Vec<NodeId>,
    pub countermeasures: Vec<NodeId>,
}

impl ThreatData {
    /// Smart score value for ranking; 0.0 when no vector was declared.
    pub fn smart_score_value(&self) -> f64 {
        self.cvss.as_ref().map(Cvss::smart_score).unwrap_or(0.0)
    }

    pub fn smart_score_name(&self) -> &'static str {
        self.cvss
            .as_ref()
            .map(Cvss::smart_score_name)
            .unwrap_or("No score")
    }

    pub fn smart_severity(&self) -> Severity {
        self.cvss
            .as_ref()
            .map(Cvss::smart_severity)
            .unwrap_or(Severity::None)
    }
}
