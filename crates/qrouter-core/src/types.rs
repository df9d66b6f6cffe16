use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RouterError};

/// Identifier of a section (a node in the route graph).
pub type SectionId = String;

/// Answer pool keyed by section id.
pub type Answers = Map<String, Value>;

/// Prefix that marks a target or address as a machine reference.
pub const MACHINE_REF_PREFIX: char = '#';

/// Suffix of an applicability-status pseudo-machine id.
pub const APPLICABILITY_SUFFIX: &str = "__applicability-status";

/// State name of an applicability machine whose task is reachable.
pub const APPLICABLE_STATE: &str = "applicable";

/// Attribute holding role definitions used by role predicates.
pub const ROLES_ATTRIBUTE: &str = "q__roles";

/// Operator prefix shared by all role predicates (`|role.all`, ...).
pub const ROLE_OPERATOR_PREFIX: &str = "|role.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Final,
    #[serde(other)]
    Atomic,
}

/// One node of the route graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Outgoing transitions keyed by event name. Absent on terminal sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<IndexMap<String, Target>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SectionType>,
    /// A repeatable section may occur several times in progress, one answer
    /// per occurrence.
    #[serde(rename = "x-repeatable", default, skip_serializing_if = "is_false")]
    pub repeatable: bool,
    /// Anything else the document carries (titles, meta), kept for round-trips.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Section {
    /// A section that goes unconditionally to `target` on `event`.
    pub fn to(event: impl Into<String>, target: impl Into<String>) -> Self {
        let mut on = IndexMap::new();
        on.insert(event.into(), Target::Direct(target.into()));
        Self {
            on: Some(on),
            ..Self::default()
        }
    }

    /// A section choosing between guarded alternatives on `event`.
    pub fn guarded(event: impl Into<String>, alternatives: Vec<Alternative>) -> Self {
        let mut on = IndexMap::new();
        on.insert(event.into(), Target::Guarded(alternatives));
        Self {
            on: Some(on),
            ..Self::default()
        }
    }

    /// A `type: final` section.
    pub fn terminal() -> Self {
        Self {
            kind: Some(SectionType::Final),
            ..Self::default()
        }
    }

    /// Add another event to this section.
    pub fn with_event(mut self, event: impl Into<String>, target: Target) -> Self {
        self.on
            .get_or_insert_with(IndexMap::new)
            .insert(event.into(), target);
        self
    }

    /// Mark this section as repeatable.
    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    pub fn is_final(&self) -> bool {
        self.kind == Some(SectionType::Final)
    }

    /// Whether any transition of this section carries a guard.
    pub fn has_conditions(&self) -> bool {
        self.conditions().next().is_some()
    }

    /// Every guard declared on any of this section's transitions.
    pub fn conditions(&self) -> impl Iterator<Item = &Value> {
        self.on
            .iter()
            .flat_map(|on| on.values())
            .flat_map(|target| target.alternatives())
            .filter_map(|alt| alt.cond.as_ref())
    }
}

/// Destination of a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// Unconditional destination id.
    Direct(SectionId),
    /// Ordered alternatives; the first truthy guard wins.
    Guarded(Vec<Alternative>),
    /// A lone `{target, cond?}` object.
    Single(Alternative),
}

impl Target {
    pub fn alternatives(&self) -> &[Alternative] {
        match self {
            Target::Direct(_) => &[],
            Target::Guarded(alternatives) => alternatives,
            Target::Single(alternative) => std::slice::from_ref(alternative),
        }
    }

    /// Every destination id this target can produce.
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Target::Direct(id) => vec![id.as_str()],
            _ => self.alternatives().iter().map(|a| a.target.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub target: SectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond: Option<Value>,
}

impl Alternative {
    pub fn when(target: impl Into<String>, cond: Value) -> Self {
        Self {
            target: target.into(),
            cond: Some(cond),
        }
    }

    pub fn otherwise(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cond: None,
        }
    }
}

/// The static graph of sections a router walks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGraph {
    pub initial: SectionId,
    pub states: IndexMap<SectionId, Section>,
}

impl RouteGraph {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            states: IndexMap::new(),
        }
    }

    pub fn with_section(mut self, id: impl Into<String>, section: Section) -> Self {
        self.states.insert(id.into(), section);
        self
    }

    pub fn section(&self, id: &str) -> Result<&Section> {
        self.states
            .get(id)
            .ok_or_else(|| RouterError::UnknownSection(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    pub fn is_repeatable(&self, id: &str) -> bool {
        self.states.get(id).is_some_and(|s| s.repeatable)
    }

    /// `(section, machine id)` for every `#machine` destination.
    pub fn machine_targets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.states
            .iter()
            .filter_map(|(id, section)| section.on.as_ref().map(|on| (id, on)))
            .flat_map(|(id, on)| {
                on.values()
                    .flat_map(|target| target.destinations())
                    .filter_map(move |destination| {
                        destination
                            .strip_prefix(MACHINE_REF_PREFIX)
                            .map(|machine| (id.as_str(), machine))
                    })
            })
    }

    /// Check that `initial` and every plain transition target name a state.
    /// Machine references (`#id`) are left to the parallel layer.
    pub fn validate(&self) -> Result<()> {
        if !self.contains(&self.initial) {
            return Err(RouterError::InvalidGraph(format!(
                "initial section \"{}\" is not declared",
                self.initial
            )));
        }
        for (id, section) in &self.states {
            let Some(on) = &section.on else { continue };
            for (event, target) in on {
                for destination in target.destinations() {
                    if destination.starts_with(MACHINE_REF_PREFIX) {
                        continue;
                    }
                    if !self.contains(destination) {
                        return Err(RouterError::InvalidGraph(format!(
                            "section \"{id}\" routes \"{event}\" to undeclared section \"{destination}\""
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Everything a single-task router owns. Serializes to the persisted
/// questionnaire document and rehydrates from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub routes: RouteGraph,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub progress: Vec<SectionId>,
    #[serde(default)]
    pub retracted_answers: Answers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section_id: Option<SectionId>,
    /// Cursor position within `progress`; distinguishes occurrences of a
    /// repeatable section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl TaskContext {
    pub fn new(routes: RouteGraph) -> Self {
        Self {
            routes,
            answers: Answers::new(),
            progress: Vec::new(),
            retracted_answers: Answers::new(),
            current_section_id: None,
            current_index: None,
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphKind {
    Parallel,
}

/// One member machine of a parallel graph, with its own bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(flatten)]
    pub routes: RouteGraph,
    /// Machine the user came from; `previous` on the first section goes back
    /// there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub progress: Vec<SectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section_id: Option<SectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
}

impl MachineSpec {
    pub fn new(routes: RouteGraph) -> Self {
        Self {
            routes,
            referrer: None,
            progress: Vec::new(),
            current_section_id: None,
            current_index: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

/// A set of member machines routed side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGraph {
    #[serde(rename = "type")]
    pub kind: GraphKind,
    /// Machine whose current section is the starting point. Defaults to the
    /// first member that is not an applicability machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    pub states: IndexMap<String, MachineSpec>,
}

impl ParallelGraph {
    pub fn new() -> Self {
        Self {
            kind: GraphKind::Parallel,
            initial: None,
            states: IndexMap::new(),
        }
    }

    pub fn with_machine(mut self, id: impl Into<String>, machine: MachineSpec) -> Self {
        self.states.insert(id.into(), machine);
        self
    }
}

impl Default for ParallelGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a parallel router owns. Member progress lives on each
/// [`MachineSpec`]; answers are one shared pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelContext {
    pub routes: ParallelGraph,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub retracted_answers: Answers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section_id: Option<SectionId>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ParallelContext {
    pub fn new(routes: ParallelGraph) -> Self {
        Self {
            routes,
            answers: Answers::new(),
            retracted_answers: Answers::new(),
            current_section_id: None,
            attributes: Map::new(),
        }
    }
}

/// Id of the applicability machine that gates `machine_id`.
pub fn applicability_machine_id(machine_id: &str) -> String {
    format!("{machine_id}{APPLICABILITY_SUFFIX}")
}

/// Result of a router operation: where the user is now, and the context
/// that produced it.
#[derive(Debug, Serialize)]
pub struct Step<'a, C> {
    pub id: SectionId,
    pub context: &'a C,
}

/// Result of a parallel router operation, annotated with every member's
/// current section.
#[derive(Debug, Serialize)]
pub struct ParallelStep<'a> {
    pub id: SectionId,
    pub value: IndexMap<String, SectionId>,
    pub context: &'a ParallelContext,
}
