//! tmkit: Threat Model Kit
//!
//! Loads a forest of hierarchical, cross-referencing YAML threat model
//! documents into a fully resolved in-memory object graph: recursive
//! multi-file ingestion, hierarchical identity, REFID forward-reference
//! resolution across the whole forest, public/version filtering at parse
//! time, and post-resolution consistency checking.

pub mod core;
pub mod entities;
pub mod schema;
pub mod yaml;

pub use crate::core::model::{load_threat_model, LoadError, LoadOptions, LoadedThreatModel};
pub use crate::core::node::{Forest, Node, NodeData, NodeId, NodeKind};
