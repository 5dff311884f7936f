//! Attacker and assumption data

/// An attacker profile referenced by threats.
#[derive(Debug, Clone, Default)]
pub struct AttackerData {
    pub title: Option<String>,
    pub description: String,
}

/// An analysis assumption recorded alongside the scope.
#[derive(Debug, Clone, Default)]
pub struct AssumptionData {
    pub title: Option<String>,
    pub description: String,
}
