//! Forward-reference placeholder data

/// A `{REFID: <target>}` placeholder.
///
/// Exists only between the build and resolve phases: it participates in the
/// tree like any other node so the resolution pass can locate it generically,
/// and is replaced by a reference-flagged copy of its target before the graph
/// is handed to any consumer.
#[derive(Debug, Clone, Default)]
pub struct RefIdData {
    /// The local id segment of the target node
    pub target: String,
}
