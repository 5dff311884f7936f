//! Asset data

use indexmap::IndexMap;
use serde_yml::Value;

/// An asset of the modeled system. Both `asset_type` and `in_scope` are
/// required at construction; a record missing either fails the load.
#[derive(Debug, Clone, Default)]
pub struct AssetData {
    pub title: Option<String>,
    pub description: String,
    /// The `type` key of the YAML record (e.g. "data", "service")
    pub asset_type: String,
    pub in_scope: bool,
    /// Free-form property map (e.g. TLS version, storage class)
    pub properties: IndexMap<String, Value>,
    pub applies_to_versions: Option<String>,
}
