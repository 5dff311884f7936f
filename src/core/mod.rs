//! Core module - loading pipeline and forest types

pub mod builder;
pub mod consistency;
pub mod cvss;
pub mod filter;
pub mod identity;
pub mod loader;
pub mod model;
pub mod node;
pub mod resolve;

pub use builder::{build_forest, BuildError};
pub use consistency::check_consistency;
pub use cvss::{Cvss, CvssError, Severity};
pub use filter::{FilterError, RecordFilter};
pub use identity::InvalidIdentifier;
pub use loader::{load_document, Document, LoaderError};
pub use model::{load_threat_model, LoadError, LoadOptions, LoadedThreatModel};
pub use node::{Forest, Node, NodeData, NodeId, NodeKind, SourceFile};
pub use resolve::{resolve_references, ResolveError};
