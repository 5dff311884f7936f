//! Reference resolution
//!
//! Runs once over a fully built forest and replaces every REFID placeholder
//! with a reference copy of its target node. Targets are looked up from the
//! forest root, own subtree first, then child documents depth-first.
//!
//! Copies are shallow and keep the target's parent link and local id, so a
//! resolved slot reports the target's full id. Collection slots inside a
//! copy that still point at placeholders are remapped to the corresponding
//! copies, which keeps chained references consistent without deep cloning.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::core::node::{Forest, NodeData, NodeId, NodeKind};
use crate::yaml::{find_entry_span, first_line_span};

/// Errors raised while resolving references.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("REFID '{target}' not found in: {owner}")]
    #[diagnostic(
        code(tmkit::resolve::unresolved),
        help("the target id may be misspelled, or the record it names may be excluded by the active filter")
    )]
    Unresolved {
        target: String,
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("referenced here")]
        span: SourceSpan,
    },
}

struct Pending {
    placeholder: NodeId,
    parent: NodeId,
    target: NodeId,
}

/// Resolve every placeholder under `root`, substituting reference copies
/// into all collection slots that held one.
///
/// All targets are looked up before any slot is rewritten, so a failed
/// resolution leaves the forest untouched.
pub fn resolve_references(forest: &mut Forest, root: NodeId) -> Result<(), ResolveError> {
    let placeholders = forest.all_down(root, NodeKind::RefId);

    let mut pending = Vec::with_capacity(placeholders.len());
    for &placeholder in &placeholders {
        let node = forest.node(placeholder);
        let (target_id, parent) = match (&node.data, node.parent) {
            (NodeData::RefId(r), Some(parent)) => (r.target.clone(), parent),
            _ => continue,
        };
        let target = forest
            .descendant_first_by_id(root, &target_id)
            .ok_or_else(|| unresolved(forest, placeholder, &target_id))?;
        pending.push(Pending {
            placeholder,
            parent,
            target,
        });
    }

    // Push all copies first so the placeholder-to-copy map is complete
    // before any copied collection is remapped.
    let mut copies: HashMap<NodeId, NodeId> = HashMap::with_capacity(pending.len());
    for entry in &pending {
        let mut copy = forest.node(entry.target).clone();
        copy.is_reference = true;
        copies.insert(entry.placeholder, forest.push(copy));
    }

    for &copy_id in copies.values() {
        let node = forest.node_mut(copy_id);
        for slot in node.children.iter_mut() {
            if let Some(&mapped) = copies.get(slot) {
                *slot = mapped;
            }
        }
        for collection in node.data.collections_mut() {
            for slot in collection.iter_mut() {
                if let Some(&mapped) = copies.get(slot) {
                    *slot = mapped;
                }
            }
        }
    }

    for entry in &pending {
        if let Some(&copy_id) = copies.get(&entry.placeholder) {
            forest.replace_in_collections(entry.parent, entry.placeholder, copy_id);
        }
    }

    debug!(resolved = pending.len(), "reference resolution complete");
    Ok(())
}

fn unresolved(forest: &Forest, placeholder: NodeId, target: &str) -> ResolveError {
    let node = forest.node(placeholder);
    let owner = match node.parent {
        Some(parent) => forest.full_id(parent),
        None => forest.full_id(placeholder),
    };
    let source = forest.source(node.source);
    let span = find_entry_span(&source.text, "REFID", target)
        .unwrap_or_else(|| first_line_span(&source.text));
    ResolveError::Unresolved {
        target: target.to_string(),
        owner,
        src: NamedSource::new(&source.name, source.text.clone()),
        span,
    }
}
