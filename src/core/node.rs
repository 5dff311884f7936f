//! Forest arena and tree traversal
//!
//! All nodes of a loaded forest live in one [`Forest`] arena and refer to
//! each other through [`NodeId`] indices. Ownership links (`parent` plus the
//! generic `children` collection) are set once at construction and never
//! reassigned; the resolution pass only rewrites collection slots in place.
//!
//! Reference-bearing collections are an explicit per-kind registry
//! ([`NodeData::collections`]) rather than a reflective scan, so the set of
//! attributes that can hold a reference is a testable contract.

use indexmap::IndexMap;
use serde_yml::Value;
use std::collections::HashSet;
use std::ops::Index;

use crate::core::identity;
use crate::entities::{
    AssetData, AssumptionData, AttackerData, CountermeasureData, RefIdData, ScopeData,
    SecurityObjectiveData, ThreatData, ThreatModelData,
};

/// Index of a node inside its [`Forest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Discriminant of [`NodeData`], used for typed descendant collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ThreatModel,
    Scope,
    SecurityObjective,
    Asset,
    Attacker,
    Assumption,
    Threat,
    Countermeasure,
    RefId,
}

/// The kind-specific payload of a node.
#[derive(Debug, Clone)]
pub enum NodeData {
    ThreatModel(ThreatModelData),
    Scope(ScopeData),
    SecurityObjective(SecurityObjectiveData),
    Asset(AssetData),
    Attacker(AttackerData),
    Assumption(AssumptionData),
    Threat(ThreatData),
    Countermeasure(CountermeasureData),
    RefId(RefIdData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::ThreatModel(_) => NodeKind::ThreatModel,
            NodeData::Scope(_) => NodeKind::Scope,
            NodeData::SecurityObjective(_) => NodeKind::SecurityObjective,
            NodeData::Asset(_) => NodeKind::Asset,
            NodeData::Attacker(_) => NodeKind::Attacker,
            NodeData::Assumption(_) => NodeKind::Assumption,
            NodeData::Threat(_) => NodeKind::Threat,
            NodeData::Countermeasure(_) => NodeKind::Countermeasure,
            NodeData::RefId(_) => NodeKind::RefId,
        }
    }

    /// Every reference-bearing (or document-bearing) collection of this kind.
    pub fn collections(&self) -> Vec<&Vec<NodeId>> {
        match self {
            NodeData::ThreatModel(tm) => vec![
                &tm.security_objectives,
                &tm.assets,
                &tm.attackers,
                &tm.assumptions,
                &tm.threats,
                &tm.children,
            ],
            NodeData::SecurityObjective(so) => vec![&so.contributes_to],
            NodeData::Threat(t) => vec![
                &t.impacted_sec_objs,
                &t.assets,
                &t.attackers,
                &t.countermeasures,
            ],
            _ => Vec::new(),
        }
    }

    pub fn collections_mut(&mut self) -> Vec<&mut Vec<NodeId>> {
        match self {
            NodeData::ThreatModel(tm) => vec![
                &mut tm.security_objectives,
                &mut tm.assets,
                &mut tm.attackers,
                &mut tm.assumptions,
                &mut tm.threats,
                &mut tm.children,
            ],
            NodeData::SecurityObjective(so) => vec![&mut so.contributes_to],
            NodeData::Threat(t) => vec![
                &mut t.impacted_sec_objs,
                &mut t.assets,
                &mut t.attackers,
                &mut t.countermeasures,
            ],
            _ => Vec::new(),
        }
    }

    /// The descriptive text of this node, when its kind carries one.
    pub fn description(&self) -> Option<&str> {
        match self {
            NodeData::ThreatModel(tm) => tm.description.as_deref(),
            NodeData::Scope(s) => Some(&s.description),
            NodeData::SecurityObjective(so) => Some(&so.description),
            NodeData::Asset(a) => Some(&a.description),
            NodeData::Attacker(a) => Some(&a.description),
            NodeData::Assumption(a) => Some(&a.description),
            NodeData::Countermeasure(cm) => Some(&cm.description),
            NodeData::Threat(_) | NodeData::RefId(_) => None,
        }
    }

    fn title_field(&self) -> Option<&str> {
        match self {
            NodeData::ThreatModel(tm) => tm.title.as_deref(),
            NodeData::Scope(s) => s.title.as_deref(),
            NodeData::SecurityObjective(so) => so.title.as_deref(),
            NodeData::Asset(a) => a.title.as_deref(),
            NodeData::Attacker(a) => a.title.as_deref(),
            NodeData::Assumption(a) => a.title.as_deref(),
            NodeData::Threat(t) => t.title.as_deref(),
            NodeData::Countermeasure(cm) => cm.title.as_deref(),
            NodeData::RefId(_) => None,
        }
    }

    pub fn as_threat_model(&self) -> Option<&ThreatModelData> {
        match self {
            NodeData::ThreatModel(tm) => Some(tm),
            _ => None,
        }
    }

    pub fn as_threat(&self) -> Option<&ThreatData> {
        match self {
            NodeData::Threat(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_countermeasure(&self) -> Option<&CountermeasureData> {
        match self {
            NodeData::Countermeasure(cm) => Some(cm),
            _ => None,
        }
    }

    pub fn as_security_objective(&self) -> Option<&SecurityObjectiveData> {
        match self {
            NodeData::SecurityObjective(so) => Some(so),
            _ => None,
        }
    }

    pub fn as_asset(&self) -> Option<&AssetData> {
        match self {
            NodeData::Asset(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_refid(&self) -> Option<&RefIdData> {
        match self {
            NodeData::RefId(r) => Some(r),
            _ => None,
        }
    }
}

/// One loaded YAML source file, kept for error reporting.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// A node of the forest.
#[derive(Debug, Clone)]
pub struct Node {
    /// Local identifier segment; the full id is the dot-joined ancestor chain
    pub local_id: String,
    pub parent: Option<NodeId>,
    /// Generic ownership children (everything constructed with this node as
    /// parent, except child threat model documents)
    pub children: Vec<NodeId>,
    /// True for the reference copies substituted during resolution
    pub is_reference: bool,
    /// Index of the source file this node was declared in
    pub source: usize,
    /// Unknown YAML keys, preserved in declaration order
    pub ext: IndexMap<String, Value>,
    pub data: NodeData,
}

/// Arena holding every node of a loaded forest.
#[derive(Debug, Default)]
pub struct Forest {
    nodes: Vec<Node>,
    sources: Vec<SourceFile>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_source(&mut self, name: String, text: String) -> usize {
        self.sources.push(SourceFile { name, text });
        self.sources.len() - 1
    }

    pub fn source(&self, index: usize) -> &SourceFile {
        &self.sources[index]
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// The id the next pushed node will receive.
    pub(crate) fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Full hierarchical id: dot-joined local ids from the root down.
    ///
    /// Reference copies keep their target's parent link, so a copy reports
    /// the target's id, not the id of the collection holding it.
    pub fn full_id(&self, id: NodeId) -> String {
        let node = self.node(id);
        match node.parent {
            Some(parent) => identity::join(Some(&self.full_id(parent)), &node.local_id),
            None => node.local_id.clone(),
        }
    }

    /// The full id with the root segment stripped.
    pub fn anchor(&self, id: NodeId) -> String {
        identity::anchor(&self.full_id(id)).to_string()
    }

    /// Walk parent links to the node with no parent.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            current = parent;
        }
        current
    }

    /// Display title with per-kind fallbacks: documents fall back to their
    /// local id with underscores spaced out, threats to a generated
    /// "<type> in: <assets>" headline, everything else to a description
    /// prefix or "No title".
    pub fn title(&self, id: NodeId) -> String {
        let node = self.node(id);
        if let Some(t) = node.data.title_field() {
            return t.to_string();
        }
        match &node.data {
            NodeData::ThreatModel(_) => node.local_id.replace('_', " "),
            NodeData::Threat(t) => self.generated_threat_title(t),
            data => match data.description() {
                Some(desc) if !desc.is_empty() => {
                    let prefix: String = desc.chars().take(50).collect();
                    format!("{}[...]", prefix)
                }
                _ => "No title".to_string(),
            },
        }
    }

    fn generated_threat_title(&self, threat: &ThreatData) -> String {
        let assets: Vec<String> = threat
            .assets
            .iter()
            .map(|&asset_id| {
                let asset = self.node(asset_id);
                match &asset.data {
                    NodeData::Asset(a) => format!("{} {}", a.asset_type, self.title(asset_id)),
                    NodeData::RefId(r) => r.target.clone(),
                    _ => self.title(asset_id),
                }
            })
            .collect();
        format!("{} in: {}", threat.threat_type, assets.join(", "))
    }

    /// Search the generic ownership children for a node with the given local
    /// id: direct children first, then each child subtree recursively. Does
    /// not cross into child documents or reference collections.
    pub fn descendant_by_id(&self, start: NodeId, local_id: &str) -> Option<NodeId> {
        let node = self.node(start);
        for &child in &node.children {
            if self.node(child).local_id == local_id {
                return Some(child);
            }
        }
        for &child in &node.children {
            if let Some(found) = self.descendant_by_id(child, local_id) {
                return Some(found);
            }
        }
        None
    }

    /// Forest-wide search order: the node's own subtree first, then each
    /// child document depth-first. This is the contract the resolution pass
    /// applies starting at the forest root.
    pub fn descendant_first_by_id(&self, start: NodeId, local_id: &str) -> Option<NodeId> {
        if let Some(found) = self.descendant_by_id(start, local_id) {
            return Some(found);
        }
        if let Some(tm) = self.node(start).data.as_threat_model() {
            for &child_doc in &tm.children {
                if self.node(child_doc).local_id == local_id {
                    return Some(child_doc);
                }
                if let Some(found) = self.descendant_first_by_id(child_doc, local_id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Collect every node of the given kind in the subtree, walking the
    /// generic children, every registered collection, and child documents.
    /// Deduplicates by node identity, so a node reachable through several
    /// attributes is reported once.
    pub fn all_down(&self, start: NodeId, kind: NodeKind) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        self.collect_down(start, kind, &mut visited, &mut found);
        found
    }

    fn collect_down(
        &self,
        id: NodeId,
        kind: NodeKind,
        visited: &mut HashSet<NodeId>,
        found: &mut Vec<NodeId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let node = self.node(id);
        if node.data.kind() == kind {
            found.push(id);
        }
        for &child in &node.children {
            self.collect_down(child, kind, visited, found);
        }
        for collection in node.data.collections() {
            for &entry in collection {
                self.collect_down(entry, kind, visited, found);
            }
        }
    }

    /// All threats under this node, including child documents.
    pub fn threats_down(&self, start: NodeId) -> Vec<NodeId> {
        self.all_down(start, NodeKind::Threat)
    }

    /// All assets under this node, including the resolved asset references
    /// held by threats.
    pub fn assets_down(&self, start: NodeId) -> Vec<NodeId> {
        self.all_down(start, NodeKind::Asset)
    }

    /// Concatenate a selected collection from the root document down to the
    /// given node, root entries first.
    pub fn all_up<F>(&self, start: NodeId, select: F) -> Vec<NodeId>
    where
        F: Fn(&Node) -> &[NodeId],
    {
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            chain.push(id);
            current = self.node(id).parent;
        }
        let mut result = Vec::new();
        for &id in chain.iter().rev() {
            result.extend_from_slice(select(self.node(id)));
        }
        result
    }

    /// Assets visible to this node: its own document's assets plus those of
    /// every ancestor document.
    pub fn assets_up(&self, start: NodeId) -> Vec<NodeId> {
        self.all_up(start, |node| match &node.data {
            NodeData::ThreatModel(tm) => &tm.assets,
            _ => &[],
        })
    }

    /// Countermeasures of the given threat flagged operational, owned and
    /// referenced alike.
    pub fn operational_countermeasures(&self, threat: NodeId) -> Vec<NodeId> {
        let cms = match &self.node(threat).data {
            NodeData::Threat(t) => &t.countermeasures,
            _ => return Vec::new(),
        };
        cms.iter()
            .copied()
            .filter(|&cm| {
                self.node(cm)
                    .data
                    .as_countermeasure()
                    .is_some_and(|data| data.operational)
            })
            .collect()
    }

    pub fn has_operational_countermeasures(&self, threat: NodeId) -> bool {
        !self.operational_countermeasures(threat).is_empty()
    }

    /// The nearest value produced by `select` walking from the node up to
    /// the root.
    pub fn first_up<T, F>(&self, start: NodeId, select: F) -> Option<T>
    where
        F: Fn(&Node) -> Option<T>,
    {
        let mut current = Some(start);
        while let Some(id) = current {
            if let Some(value) = select(self.node(id)) {
                return Some(value);
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Replace every occurrence of `old` with `new` in the generic children
    /// and every registered collection of `parent`. Idempotent: slots already
    /// holding `new` are left untouched.
    pub(crate) fn replace_in_collections(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let node = self.node_mut(parent);
        for slot in node.children.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
        for collection in node.data.collections_mut() {
            for slot in collection.iter_mut() {
                if *slot == old {
                    *slot = new;
                }
            }
        }
    }
}

impl Index<NodeId> for Forest {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.node(id)
    }
}
