//! Object graph builder
//!
//! Materializes typed nodes from loaded documents, enforcing per-kind
//! required fields and wiring ownership. Reference-bearing fields always
//! produce REFID placeholder nodes here; resolution happens globally in a
//! later pass, never node-locally, because a reference may point at a node
//! in a document that has not been built yet.

use indexmap::IndexMap;
use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_yml::{Mapping, Value};
use thiserror::Error;

use crate::core::cvss::{Cvss, CvssError};
use crate::core::filter::{FilterError, RecordFilter};
use crate::core::identity::{self, InvalidIdentifier};
use crate::core::loader::Document;
use crate::core::node::{Forest, Node, NodeData, NodeId};
use crate::entities::{
    AssetData, AssumptionData, AttackerData, CountermeasureData, RefIdData, ScopeData,
    SecurityObjectiveData, ThreatData, ThreatModelData,
};
use crate::yaml::{find_entry_span, find_key_span, first_line_span};

/// Errors raised while materializing the object graph.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] InvalidIdentifier),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Filter(#[from] FilterError),

    #[error("'{field}' required for '{owner}'")]
    #[diagnostic(code(tmkit::build::missing_field))]
    MissingField {
        field: String,
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("'{key}' in '{owner}' must be {expected}")]
    #[diagnostic(code(tmkit::build::wrong_type))]
    WrongType {
        key: String,
        expected: &'static str,
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("'description' is not allowed on threat '{owner}'")]
    #[diagnostic(
        code(tmkit::build::description_not_allowed),
        help("describe the attack in 'attack' and the impact in 'impactDesc'")
    )]
    DescriptionNotAllowed {
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("REFID needed to reference {collection} in: {owner}")]
    #[diagnostic(code(tmkit::build::reference_required))]
    ReferenceRequired {
        collection: &'static str,
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("REFID or ID needed to define a countermeasure in: {owner}")]
    #[diagnostic(code(tmkit::build::countermeasure_entry))]
    CountermeasureEntry {
        owner: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("malformed CVSS vector in '{owner}'")]
    #[diagnostic(code(tmkit::build::invalid_cvss))]
    InvalidCvss {
        owner: String,
        #[source]
        source: CvssError,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },
}

/// Build the whole forest from a loaded document tree.
///
/// Returns the arena and the root document's node id. The graph still
/// contains REFID placeholders; callers run the resolution pass next.
pub fn build_forest(
    doc: &Document,
    filter: &RecordFilter,
) -> Result<(Forest, NodeId), BuildError> {
    let mut forest = Forest::new();
    let root = Builder {
        forest: &mut forest,
        filter,
    }
    .build_document(doc, None)?;
    Ok((forest, root))
}

struct Builder<'a> {
    forest: &'a mut Forest,
    filter: &'a RecordFilter,
}

/// Source context of the document currently being built.
struct SourceCtx<'d> {
    text: &'d str,
    file_name: &'d str,
    source: usize,
}

impl SourceCtx<'_> {
    fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.file_name, self.text.to_string())
    }

    /// Span of the record with the given local id, or the first line.
    fn record_span(&self, local_id: &str) -> SourceSpan {
        find_entry_span(self.text, "ID", local_id)
            .unwrap_or_else(|| first_line_span(self.text))
    }

    fn key_span(&self, key: &str) -> SourceSpan {
        find_key_span(self.text, key).unwrap_or_else(|| first_line_span(self.text))
    }
}

impl Builder<'_> {
    fn build_document(
        &mut self,
        doc: &Document,
        parent: Option<NodeId>,
    ) -> Result<NodeId, BuildError> {
        let source = self
            .forest
            .add_source(doc.file_name.clone(), doc.text.clone());
        let ctx = SourceCtx {
            text: &doc.text,
            file_name: &doc.file_name,
            source,
        };

        let parent_full = parent.map(|p| self.forest.full_id(p));
        let owner_for_errors = parent_full.clone().unwrap_or_else(|| doc.file_name.clone());

        let local_id = require_str(&doc.mapping, "ID", &owner_for_errors, &ctx)?;
        identity::validate_local_id(&local_id, parent_full.as_deref())?;

        let tm_id = self.push_node(&local_id, parent, ctx.source, ThreatModelData::default());
        if let Some(parent_id) = parent {
            if let NodeData::ThreatModel(tm) = &mut self.forest.node_mut(parent_id).data {
                tm.children.push(tm_id);
            }
        }
        let tm_full = self.forest.full_id(tm_id);

        let scope_map = match doc.mapping.get("scope") {
            Some(Value::Mapping(m)) => m.clone(),
            Some(_) => {
                return Err(BuildError::WrongType {
                    key: "scope".to_string(),
                    expected: "a mapping",
                    owner: tm_full,
                    span: ctx.key_span("scope"),
                    src: ctx.named_source(),
                })
            }
            None => {
                return Err(BuildError::MissingField {
                    field: "scope".to_string(),
                    owner: tm_full,
                    span: ctx.record_span(&local_id),
                    src: ctx.named_source(),
                })
            }
        };
        self.build_scope(&scope_map, tm_id, &tm_full, &ctx)?;

        // Remaining top-level keys in source order. Keys consumed by special
        // handling are excluded from the generic ext fallthrough.
        let mut child_docs = doc.children.iter();
        for (key, value) in &doc.mapping {
            let key = match key.as_str() {
                Some(k) => k,
                None => continue,
            };
            match key {
                "ID" | "scope" | "parent" => {}
                "title" => self.tm_data_mut(tm_id).title = scalar_string(value),
                "description" => self.tm_data_mut(tm_id).description = scalar_string(value),
                "version" => self.tm_data_mut(tm_id).version = scalar_string(value),
                "history" => self.tm_data_mut(tm_id).history = scalar_string(value),
                "analysis" => self.tm_data_mut(tm_id).analysis = scalar_string(value),
                "appliesToVersions" => {
                    self.tm_data_mut(tm_id).applies_to_versions = scalar_string(value)
                }
                "authors" => self.tm_data_mut(tm_id).authors = string_list(value),
                "threats" => {
                    for record in sequence_of_mappings(value, "threats", &tm_full, &ctx)? {
                        if let Some(threat_id) = self.build_threat(&record, tm_id, &tm_full, &ctx)? {
                            self.tm_data_mut(tm_id).threats.push(threat_id);
                        }
                    }
                }
                "children" => {
                    for child_doc in child_docs.by_ref() {
                        self.build_document(child_doc, Some(tm_id))?;
                    }
                }
                _ => {
                    self.forest
                        .node_mut(tm_id)
                        .ext
                        .insert(key.to_string(), value.clone());
                }
            }
        }

        Ok(tm_id)
    }

    fn build_scope(
        &mut self,
        scope_map: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<(), BuildError> {
        let mut data = ScopeData::default();
        let mut ext = IndexMap::new();
        for (key, value) in scope_map {
            match key.as_str() {
                Some("title") => data.title = scalar_string(value),
                Some("description") => {
                    data.description = scalar_string(value).unwrap_or_default()
                }
                Some("securityObjectives" | "assets" | "attackers" | "assumptions") | None => {}
                Some(other) => {
                    ext.insert(other.to_string(), value.clone());
                }
            }
        }

        // The scope node itself has no identity of its own
        let scope_id = self.push_node("", Some(tm_id), ctx.source, data);
        self.forest.node_mut(scope_id).ext = ext;
        self.forest.node_mut(tm_id).children.push(scope_id);
        self.tm_data_mut(tm_id).scope = Some(scope_id);

        // Scope-level collections; ownership transfers to the document
        for record in optional_records(scope_map, "securityObjectives", tm_full, ctx)? {
            let so_id = self.build_security_objective(&record, tm_id, tm_full, ctx)?;
            self.tm_data_mut(tm_id).security_objectives.push(so_id);
        }
        for record in optional_records(scope_map, "assets", tm_full, ctx)? {
            if let Some(asset_id) = self.build_asset(&record, tm_id, tm_full, ctx)? {
                self.tm_data_mut(tm_id).assets.push(asset_id);
            }
        }
        for record in optional_records(scope_map, "attackers", tm_full, ctx)? {
            let id = self.build_attacker(&record, tm_id, tm_full, ctx)?;
            self.tm_data_mut(tm_id).attackers.push(id);
        }
        for record in optional_records(scope_map, "assumptions", tm_full, ctx)? {
            let id = self.build_assumption(&record, tm_id, tm_full, ctx)?;
            self.tm_data_mut(tm_id).assumptions.push(id);
        }

        Ok(())
    }

    fn build_security_objective(
        &mut self,
        record: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<NodeId, BuildError> {
        let local_id = require_str(record, "ID", tm_full, ctx)?;
        identity::validate_local_id(&local_id, Some(tm_full))?;
        let full = identity::join(Some(tm_full), &local_id);

        let mut data = SecurityObjectiveData {
            title: opt_str(record, "title"),
            description: opt_str(record, "description").unwrap_or_default(),
            group: require_str(record, "group", &full, ctx)?,
            ..Default::default()
        };
        if let Some(priority) = opt_str(record, "priority") {
            data.priority = priority;
        }
        if let Some(in_scope) = opt_bool(record, "inScope") {
            data.in_scope = in_scope;
        }

        let so_id = self.push_node(&local_id, Some(tm_id), ctx.source, data);
        self.forest.node_mut(tm_id).children.push(so_id);
        self.attach_ext(
            so_id,
            record,
            &["ID", "title", "description", "group", "priority", "inScope", "contributesTo"],
        );

        if let Some(value) = record.get("contributesTo") {
            for entry in sequence_of_mappings(value, "contributesTo", &full, ctx)? {
                let target = refid_target(&entry).ok_or_else(|| BuildError::ReferenceRequired {
                    collection: "a contributing Security Objective",
                    owner: full.clone(),
                    span: ctx.record_span(&local_id),
                    src: ctx.named_source(),
                })?;
                let placeholder = self.push_refid(&target, so_id, ctx);
                if let NodeData::SecurityObjective(so) = &mut self.forest.node_mut(so_id).data {
                    so.contributes_to.push(placeholder);
                }
            }
        }

        Ok(so_id)
    }

    fn build_asset(
        &mut self,
        record: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<Option<NodeId>, BuildError> {
        let owner = prospective_owner(record, tm_full);
        if self.filter.excludes(record, &owner)? {
            return Ok(None);
        }

        let local_id = require_str(record, "ID", tm_full, ctx)?;
        identity::validate_local_id(&local_id, Some(tm_full))?;
        let full = identity::join(Some(tm_full), &local_id);

        let data = AssetData {
            title: opt_str(record, "title"),
            description: opt_str(record, "description").unwrap_or_default(),
            asset_type: require_str(record, "type", &full, ctx)?,
            in_scope: require_bool(record, "inScope", &full, ctx)?,
            properties: match record.get("properties") {
                Some(Value::Mapping(m)) => mapping_to_ext(m),
                _ => IndexMap::new(),
            },
            applies_to_versions: opt_str(record, "appliesToVersions"),
        };

        let asset_id = self.push_node(&local_id, Some(tm_id), ctx.source, data);
        self.forest.node_mut(tm_id).children.push(asset_id);
        self.attach_ext(
            asset_id,
            record,
            &["ID", "title", "description", "type", "inScope", "properties", "appliesToVersions"],
        );
        Ok(Some(asset_id))
    }

    fn build_attacker(
        &mut self,
        record: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<NodeId, BuildError> {
        let local_id = require_str(record, "ID", tm_full, ctx)?;
        identity::validate_local_id(&local_id, Some(tm_full))?;

        let data = AttackerData {
            title: opt_str(record, "title"),
            description: opt_str(record, "description").unwrap_or_default(),
        };
        let id = self.push_node(&local_id, Some(tm_id), ctx.source, data);
        self.forest.node_mut(tm_id).children.push(id);
        self.attach_ext(id, record, &["ID", "title", "description"]);
        Ok(id)
    }

    fn build_assumption(
        &mut self,
        record: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<NodeId, BuildError> {
        let local_id = require_str(record, "ID", tm_full, ctx)?;
        identity::validate_local_id(&local_id, Some(tm_full))?;

        let data = AssumptionData {
            title: opt_str(record, "title"),
            description: opt_str(record, "description").unwrap_or_default(),
        };
        let id = self.push_node(&local_id, Some(tm_id), ctx.source, data);
        self.forest.node_mut(tm_id).children.push(id);
        self.attach_ext(id, record, &["ID", "title", "description"]);
        Ok(id)
    }

    fn build_threat(
        &mut self,
        record: &Mapping,
        tm_id: NodeId,
        tm_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<Option<NodeId>, BuildError> {
        let owner = prospective_owner(record, tm_full);
        if self.filter.excludes(record, &owner)? {
            return Ok(None);
        }

        let local_id = require_str(record, "ID", tm_full, ctx)?;
        identity::validate_local_id(&local_id, Some(tm_full))?;
        let full = identity::join(Some(tm_full), &local_id);

        if record.contains_key("description") {
            return Err(BuildError::DescriptionNotAllowed {
                owner: full,
                span: ctx.record_span(&local_id),
                src: ctx.named_source(),
            });
        }

        let mut data = ThreatData {
            title: opt_str(record, "title"),
            attack: opt_str(record, "attack").unwrap_or_default(),
            threat_type: require_str(record, "threatType", &full, ctx)?,
            impact_desc: opt_str(record, "impactDesc"),
            fully_mitigated: opt_bool(record, "fullyMitigated").unwrap_or(false),
            public: opt_bool(record, "public"),
            applies_to_versions: opt_str(record, "appliesToVersions"),
            ticket_link: opt_str(record, "ticketLink"),
            ..Default::default()
        };

        if let Some(Value::Mapping(cvss_map)) = record.get("CVSS") {
            data.cvss_base = cvss_map.get("base").and_then(Value::as_f64);
            if let Some(vector) = cvss_map.get("vector").and_then(Value::as_str) {
                if !vector.is_empty() {
                    data.cvss = Some(vector.parse::<Cvss>().map_err(|source| {
                        BuildError::InvalidCvss {
                            owner: full.clone(),
                            source,
                            span: ctx.record_span(&local_id),
                            src: ctx.named_source(),
                        }
                    })?);
                }
            }
        }

        let threat_id = self.push_node(&local_id, Some(tm_id), ctx.source, data);
        self.forest.node_mut(tm_id).children.push(threat_id);
        self.attach_ext(
            threat_id,
            record,
            &[
                "ID",
                "title",
                "attack",
                "threatType",
                "impactDesc",
                "CVSS",
                "fullyMitigated",
                "public",
                "appliesToVersions",
                "ticketLink",
                "impactedSecObj",
                "assets",
                "attackers",
                "countermeasures",
            ],
        );

        if let Some(value) = record.get("impactedSecObj") {
            for entry in sequence_of_mappings(value, "impactedSecObj", &full, ctx)? {
                let target = refid_target(&entry).ok_or_else(|| BuildError::ReferenceRequired {
                    collection: "an impacted Security Objective",
                    owner: full.clone(),
                    span: ctx.record_span(&local_id),
                    src: ctx.named_source(),
                })?;
                let placeholder = self.push_refid(&target, threat_id, ctx);
                self.threat_data_mut(threat_id)
                    .impacted_sec_objs
                    .push(placeholder);
            }
        }

        if let Some(value) = record.get("assets") {
            for entry in sequence_of_mappings(value, "assets", &full, ctx)? {
                let target = refid_target(&entry).ok_or_else(|| BuildError::ReferenceRequired {
                    collection: "an asset",
                    owner: full.clone(),
                    span: ctx.record_span(&local_id),
                    src: ctx.named_source(),
                })?;
                let placeholder = self.push_refid(&target, threat_id, ctx);
                self.threat_data_mut(threat_id).assets.push(placeholder);
            }
        }

        if let Some(value) = record.get("attackers") {
            for entry in sequence_of_mappings(value, "attackers", &full, ctx)? {
                let target = refid_target(&entry).ok_or_else(|| BuildError::ReferenceRequired {
                    collection: "an actual attacker ID",
                    owner: full.clone(),
                    span: ctx.record_span(&local_id),
                    src: ctx.named_source(),
                })?;
                let placeholder = self.push_refid(&target, threat_id, ctx);
                self.threat_data_mut(threat_id).attackers.push(placeholder);
            }
        }

        if let Some(value) = record.get("countermeasures") {
            for entry in sequence_of_mappings(value, "countermeasures", &full, ctx)? {
                if entry.contains_key("ID") {
                    if let Some(cm_id) =
                        self.build_countermeasure(&entry, threat_id, &full, ctx)?
                    {
                        self.threat_data_mut(threat_id).countermeasures.push(cm_id);
                    }
                } else if let Some(target) = refid_target(&entry) {
                    let placeholder = self.push_refid(&target, threat_id, ctx);
                    self.threat_data_mut(threat_id)
                        .countermeasures
                        .push(placeholder);
                } else {
                    return Err(BuildError::CountermeasureEntry {
                        owner: full,
                        span: ctx.record_span(&local_id),
                        src: ctx.named_source(),
                    });
                }
            }
        }

        Ok(Some(threat_id))
    }

    fn build_countermeasure(
        &mut self,
        record: &Mapping,
        threat_id: NodeId,
        threat_full: &str,
        ctx: &SourceCtx<'_>,
    ) -> Result<Option<NodeId>, BuildError> {
        let owner = prospective_owner(record, threat_full);
        if self.filter.excludes(record, &owner)? {
            return Ok(None);
        }

        let local_id = require_str(record, "ID", threat_full, ctx)?;
        identity::validate_local_id(&local_id, Some(threat_full))?;
        let full = identity::join(Some(threat_full), &local_id);

        let mut data = CountermeasureData {
            title: opt_str(record, "title"),
            description: require_str(record, "description", &full, ctx)?,
            in_place: require_bool(record, "inPlace", &full, ctx)?,
            public: require_bool(record, "public", &full, ctx)?,
            applies_to_versions: opt_str(record, "appliesToVersions"),
            ..Default::default()
        };
        if let Some(operational) = opt_bool(record, "operational") {
            data.operational = operational;
        }
        if let Some(operator) = opt_str(record, "operator") {
            data.operator = operator;
        }

        let cm_id = self.push_node(&local_id, Some(threat_id), ctx.source, data);
        self.forest.node_mut(threat_id).children.push(cm_id);
        self.attach_ext(
            cm_id,
            record,
            &[
                "ID",
                "title",
                "description",
                "inPlace",
                "public",
                "operational",
                "operator",
                "appliesToVersions",
            ],
        );
        Ok(Some(cm_id))
    }

    fn push_node(
        &mut self,
        local_id: &str,
        parent: Option<NodeId>,
        source: usize,
        data: impl Into<NodeData>,
    ) -> NodeId {
        self.forest.push(Node {
            local_id: local_id.to_string(),
            parent,
            children: Vec::new(),
            is_reference: false,
            source,
            ext: IndexMap::new(),
            data: data.into(),
        })
    }

    /// Push a placeholder for a `{REFID: <target>}` entry. The placeholder
    /// joins the parent's generic children like any other node so the
    /// resolution pass can locate it generically.
    fn push_refid(&mut self, target: &str, parent: NodeId, ctx: &SourceCtx<'_>) -> NodeId {
        let id = self.push_node(
            &format!("REFID_{target}"),
            Some(parent),
            ctx.source,
            RefIdData {
                target: target.to_string(),
            },
        );
        self.forest.node_mut(parent).children.push(id);
        id
    }

    fn attach_ext(&mut self, id: NodeId, record: &Mapping, consumed: &[&str]) {
        let ext = &mut self.forest.node_mut(id).ext;
        for (key, value) in record {
            if let Some(key) = key.as_str() {
                if !consumed.contains(&key) {
                    ext.insert(key.to_string(), value.clone());
                }
            }
        }
    }

    fn tm_data_mut(&mut self, id: NodeId) -> &mut ThreatModelData {
        match &mut self.forest.node_mut(id).data {
            NodeData::ThreatModel(tm) => tm,
            _ => unreachable!("node {id:?} is not a threat model"),
        }
    }

    fn threat_data_mut(&mut self, id: NodeId) -> &mut ThreatData {
        match &mut self.forest.node_mut(id).data {
            NodeData::Threat(t) => t,
            _ => unreachable!("node {id:?} is not a threat"),
        }
    }
}

impl From<ThreatModelData> for NodeData {
    fn from(data: ThreatModelData) -> Self {
        NodeData::ThreatModel(data)
    }
}
impl From<ScopeData> for NodeData {
    fn from(data: ScopeData) -> Self {
        NodeData::Scope(data)
    }
}
impl From<SecurityObjectiveData> for NodeData {
    fn from(data: SecurityObjectiveData) -> Self {
        NodeData::SecurityObjective(data)
    }
}
impl From<AssetData> for NodeData {
    fn from(data: AssetData) -> Self {
        NodeData::Asset(data)
    }
}
impl From<AttackerData> for NodeData {
    fn from(data: AttackerData) -> Self {
        NodeData::Attacker(data)
    }
}
impl From<AssumptionData> for NodeData {
    fn from(data: AssumptionData) -> Self {
        NodeData::Assumption(data)
    }
}
impl From<ThreatData> for NodeData {
    fn from(data: ThreatData) -> Self {
        NodeData::Threat(data)
    }
}
impl From<CountermeasureData> for NodeData {
    fn from(data: CountermeasureData) -> Self {
        NodeData::Countermeasure(data)
    }
}
impl From<RefIdData> for NodeData {
    fn from(data: RefIdData) -> Self {
        NodeData::RefId(data)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).map(|s| vec![s]).unwrap_or_default(),
    }
}

fn opt_str(record: &Mapping, key: &str) -> Option<String> {
    record.get(key).and_then(scalar_string)
}

fn opt_bool(record: &Mapping, key: &str) -> Option<bool> {
    record.get(key).and_then(Value::as_bool)
}

fn require_str(
    record: &Mapping,
    key: &str,
    owner: &str,
    ctx: &SourceCtx<'_>,
) -> Result<String, BuildError> {
    opt_str(record, key).ok_or_else(|| BuildError::MissingField {
        field: key.to_string(),
        owner: owner.to_string(),
        span: record
            .get("ID")
            .and_then(Value::as_str)
            .and_then(|id| find_entry_span(ctx.text, "ID", id))
            .unwrap_or_else(|| ctx.key_span(key)),
        src: ctx.named_source(),
    })
}

fn require_bool(
    record: &Mapping,
    key: &str,
    owner: &str,
    ctx: &SourceCtx<'_>,
) -> Result<bool, BuildError> {
    opt_bool(record, key).ok_or_else(|| BuildError::MissingField {
        field: key.to_string(),
        owner: owner.to_string(),
        span: record
            .get("ID")
            .and_then(Value::as_str)
            .and_then(|id| find_entry_span(ctx.text, "ID", id))
            .unwrap_or_else(|| ctx.key_span(key)),
        src: ctx.named_source(),
    })
}

/// Full id the record will get once built, best-effort when the ID field is
/// still unchecked. Used for filter error messages only.
fn prospective_owner(record: &Mapping, parent_full: &str) -> String {
    match record.get("ID").and_then(Value::as_str) {
        Some(local) => identity::join(Some(parent_full), local),
        None => parent_full.to_string(),
    }
}

fn refid_target(record: &Mapping) -> Option<String> {
    record.get("REFID").and_then(Value::as_str).map(String::from)
}

/// A `null` value counts as an empty list; anything but a sequence of
/// mappings is a type error.
fn sequence_of_mappings(
    value: &Value,
    key: &str,
    owner: &str,
    ctx: &SourceCtx<'_>,
) -> Result<Vec<Mapping>, BuildError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|entry| match entry {
                Value::Mapping(m) => Ok(m.clone()),
                _ => Err(BuildError::WrongType {
                    key: key.to_string(),
                    expected: "a list of mappings",
                    owner: owner.to_string(),
                    span: ctx.key_span(key),
                    src: ctx.named_source(),
                }),
            })
            .collect(),
        _ => Err(BuildError::WrongType {
            key: key.to_string(),
            expected: "a list",
            owner: owner.to_string(),
            span: ctx.key_span(key),
            src: ctx.named_source(),
        }),
    }
}

fn optional_records(
    map: &Mapping,
    key: &str,
    owner: &str,
    ctx: &SourceCtx<'_>,
) -> Result<Vec<Mapping>, BuildError> {
    match map.get(key) {
        Some(value) => sequence_of_mappings(value, key, owner, ctx),
        None => Ok(Vec::new()),
    }
}

fn mapping_to_ext(map: &Mapping) -> IndexMap<String, Value> {
    map.iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeKind;
    use std::path::PathBuf;

    fn doc_from(text: &str) -> Document {
        let mapping = match serde_yml::from_str(text).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("fixture must be a mapping, got {other:?}"),
        };
        Document {
            path: PathBuf::from("model.yaml"),
            file_name: "model.yaml".to_string(),
            text: text.to_string(),
            mapping,
            children: Vec::new(),
        }
    }

    const BASIC: &str = "\
ID: Root
title: Example model
analysis: Overall analysis
scope:
  description: Everything in the demo
  securityObjectives:
    - ID: SO1
      title: Confidentiality
      description: Keep data secret
      group: CIA
  assets:
    - ID: DB
      type: data
      title: User database
      description: Stores users
      inScope: true
  attackers:
    - ID: MAL
      description: Malicious outsider
  assumptions:
    - ID: ASM1
      description: TLS everywhere
threats:
  - ID: T1
    threatType: Spoofing
    attack: Password guessing
    fullyMitigated: false
    CVSS:
      vector: CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H
    impactedSecObj:
      - REFID: SO1
    assets:
      - REFID: DB
    countermeasures:
      - ID: CM1
        description: Rate limiting
        inPlace: true
        public: true
";

    #[test]
    fn test_builds_basic_document() {
        let filter = RecordFilter::default();
        let (forest, root) = build_forest(&doc_from(BASIC), &filter).unwrap();

        assert_eq!(forest.full_id(root), "Root");
        let tm = forest.node(root).data.as_threat_model().unwrap();
        assert_eq!(tm.security_objectives.len(), 1);
        assert_eq!(tm.assets.len(), 1);
        assert_eq!(tm.attackers.len(), 1);
        assert_eq!(tm.assumptions.len(), 1);
        assert_eq!(tm.threats.len(), 1);

        let threat_id = tm.threats[0];
        assert_eq!(forest.full_id(threat_id), "Root.T1");
        let threat = forest.node(threat_id).data.as_threat().unwrap();
        assert_eq!(threat.threat_type, "Spoofing");
        assert!(threat.cvss.is_some());
        assert_eq!(threat.impacted_sec_objs.len(), 1);
        assert_eq!(threat.countermeasures.len(), 1);

        // Reference-bearing entries become placeholders, never resolved here
        let placeholder = threat.impacted_sec_objs[0];
        assert_eq!(
            forest.node(placeholder).data.as_refid().unwrap().target,
            "SO1"
        );
        // Owned countermeasures are real nodes
        let cm = forest.node(threat.countermeasures[0]).data.as_countermeasure();
        assert!(cm.is_some());
    }

    #[test]
    fn test_missing_threat_type() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: T1
    attack: Something
";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        match err {
            BuildError::MissingField { field, owner, .. } => {
                assert_eq!(field, "threatType");
                assert_eq!(owner, "Root.T1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_description_forbidden_on_threats() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: T1
    threatType: Tampering
    description: not allowed here
";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        assert!(matches!(err, BuildError::DescriptionNotAllowed { .. }));
    }

    #[test]
    fn test_countermeasure_entry_needs_id_or_refid() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: T1
    threatType: Tampering
    countermeasures:
      - description: neither ID nor REFID
";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        match err {
            BuildError::CountermeasureEntry { owner, .. } => assert_eq!(owner, "Root.T1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_impacted_sec_obj_requires_refid() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: T1
    threatType: Tampering
    impactedSecObj:
      - ID: SO1
";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        match err {
            BuildError::ReferenceRequired { owner, .. } => assert_eq!(owner, "Root.T1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_cvss_vector() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: T1
    threatType: Tampering
    CVSS:
      vector: not-a-vector
";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        match err {
            BuildError::InvalidCvss { owner, .. } => assert_eq!(owner, "Root.T1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_public_filter_skips_records() {
        let filter = RecordFilter::from_options(true, &[]).unwrap();
        let text = "\
ID: Root
analysis: a
scope:
  assets:
    - ID: SECRET
      type: data
      inScope: true
      public: false
threats:
  - ID: T1
    threatType: Tampering
    public: false
  - ID: T2
    threatType: Spoofing
";
        let (forest, root) = build_forest(&doc_from(text), &filter).unwrap();
        let tm = forest.node(root).data.as_threat_model().unwrap();
        assert!(tm.assets.is_empty());
        assert_eq!(tm.threats.len(), 1);
        assert_eq!(forest.node(tm.threats[0]).local_id, "T2");
    }

    #[test]
    fn test_version_filter_skips_records() {
        let filter = RecordFilter::from_options(false, &["5.1".to_string()]).unwrap();
        let text = "\
ID: Root
analysis: a
scope: {}
threats:
  - ID: OLD
    threatType: Tampering
    appliesToVersions: '<5.0'
  - ID: CUR
    threatType: Tampering
    appliesToVersions: '>=5.0'
";
        let (forest, root) = build_forest(&doc_from(text), &filter).unwrap();
        let tm = forest.node(root).data.as_threat_model().unwrap();
        assert_eq!(tm.threats.len(), 1);
        assert_eq!(forest.node(tm.threats[0]).local_id, "CUR");
    }

    #[test]
    fn test_unknown_keys_land_in_ext() {
        let filter = RecordFilter::default();
        let text = "\
ID: Root
analysis: a
customField: kept as is
scope: {}
threats:
  - ID: T1
    threatType: Tampering
    conditional: only when exposed
";
        let (forest, root) = build_forest(&doc_from(text), &filter).unwrap();
        assert_eq!(
            forest.node(root).ext.get("customField").and_then(Value::as_str),
            Some("kept as is")
        );
        let tm = forest.node(root).data.as_threat_model().unwrap();
        let threat = forest.node(tm.threats[0]);
        assert_eq!(
            threat.ext.get("conditional").and_then(Value::as_str),
            Some("only when exposed")
        );
    }

    #[test]
    fn test_countermeasure_defaults() {
        let filter = RecordFilter::default();
        let (forest, root) = build_forest(&doc_from(BASIC), &filter).unwrap();
        let tm = forest.node(root).data.as_threat_model().unwrap();
        let threat = forest.node(tm.threats[0]).data.as_threat().unwrap();
        let cm = forest
            .node(threat.countermeasures[0])
            .data
            .as_countermeasure()
            .unwrap();
        assert!(!cm.operational);
        assert_eq!(cm.operator, crate::entities::UNDEFINED_OPERATOR);
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let filter = RecordFilter::default();
        let text = "ID: Bad Id\nanalysis: a\nscope: {}\n";
        let err = build_forest(&doc_from(text), &filter).unwrap_err();
        assert!(matches!(err, BuildError::Identity(_)));
    }

    #[test]
    fn test_refids_are_generic_children_too() {
        let filter = RecordFilter::default();
        let (forest, root) = build_forest(&doc_from(BASIC), &filter).unwrap();
        let refids = forest.all_down(root, NodeKind::RefId);
        // SO1 impact + DB asset reference
        assert_eq!(refids.len(), 2);
        for id in refids {
            let parent = forest.node(id).parent.unwrap();
            assert!(forest.node(parent).children.contains(&id));
        }
    }
}
