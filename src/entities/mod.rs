//! Typed data carried by each node kind
//!
//! A threat model forest is made of the following node kinds:
//!
//! - [`ThreatModelData`] - a root or sub-document
//! - [`ScopeData`] - the free-text scope statement of one document
//! - [`SecurityObjectiveData`] - a security objective, grouped for reporting
//! - [`AssetData`] - an asset with a mandatory type and in-scope flag
//! - [`AttackerData`] / [`AssumptionData`] - lightweight descriptive records
//! - [`ThreatData`] - a threat with CVSS scoring and reference collections
//! - [`CountermeasureData`] - a countermeasure owned by (or shared between) threats
//! - [`RefIdData`] - a forward-reference placeholder, removed during resolution

pub mod actors;
pub mod asset;
pub mod countermeasure;
pub mod refid;
pub mod scope;
pub mod security_objective;
pub mod threat;
pub mod threat_model;

pub use actors::{AssumptionData, AttackerData};
pub use asset::AssetData;
pub use countermeasure::{CountermeasureData, UNDEFINED_OPERATOR};
pub use refid::RefIdData;
pub use scope::ScopeData;
pub use security_objective::SecurityObjectiveData;
pub use threat::ThreatData;
pub use threat_model::ThreatModelData;
