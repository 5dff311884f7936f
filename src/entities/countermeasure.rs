//! Countermeasure data

/// The sentinel operator value for operational countermeasures that do not
/// name a responsible party.
pub const UNDEFINED_OPERATOR: &str = "UNDEFINED";

/// A countermeasure owned by one threat, or shared between threats through
/// a reference copy.
#[derive(Debug, Clone)]
pub struct CountermeasureData {
    pub title: Option<String>,
    pub description: String,
    /// Whether the countermeasure is currently deployed
    pub in_place: bool,
    /// Whether the countermeasure may appear in a public view
    pub public: bool,
    /// Whether the countermeasure requires ongoing operation
    pub operational: bool,
    /// Only meaningful when `operational` is true
    pub operator: String,
    pub applies_to_versions: Option<String>,
}

impl Default for CountermeasureData {
    fn default() -> Self {
        Self {
            title: None,
            description: String::new(),
            in_place: false,
            public: false,
            operational: false,
            operator: UNDEFINED_OPERATOR.to_string(),
            applies_to_versions: None,
        }
    }
}
