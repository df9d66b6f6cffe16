use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::SectionId;

/// Read-only view handed to the condition evaluator: the answer pool, the
/// progress of the machine being routed, and the document attributes.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedState<'a> {
    pub answers: &'a Map<String, Value>,
    pub progress: &'a [SectionId],
    pub attributes: &'a Map<String, Value>,
}

impl<'a> ExtendedState<'a> {
    pub fn new(
        answers: &'a Map<String, Value>,
        progress: &'a [SectionId],
        attributes: &'a Map<String, Value>,
    ) -> Self {
        Self {
            answers,
            progress,
            attributes,
        }
    }

    /// Resolve a `$.`-rooted path such as `$.answers.<section>.<question>`.
    ///
    /// Numeric segments index into arrays, which is how a particular
    /// occurrence of a repeatable section is addressed.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let rest = path.strip_prefix("$.")?;
        let mut segments = rest.split('.');
        match segments.next()? {
            "answers" => walk_map(self.answers, segments),
            "attributes" => walk_map(self.attributes, segments),
            "progress" => {
                let progress = Value::from(self.progress.to_vec());
                walk(&progress, segments)
            }
            _ => None,
        }
    }

    /// The stored answer for a section, if any.
    pub fn answer(&self, section_id: &str) -> Option<&'a Value> {
        self.answers.get(section_id)
    }
}

fn walk_map<'s>(map: &Map<String, Value>, mut segments: impl Iterator<Item = &'s str>) -> Option<Value> {
    match segments.next() {
        None => Some(Value::Object(map.clone())),
        Some(key) => walk(map.get(key)?, segments),
    }
}

fn walk<'s>(mut value: &Value, segments: impl Iterator<Item = &'s str>) -> Option<Value> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value.clone())
}

/// Condition evaluator: decides whether a guard holds for an extended state.
///
/// The router treats the condition language as opaque. Failures (unknown
/// operators, malformed trees) are the evaluator's to report and are
/// propagated to the caller unchanged.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &Value, state: &ExtendedState<'_>) -> Result<bool>;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&Value, &ExtendedState<'_>) -> Result<bool> + Send + Sync,
{
    fn evaluate(&self, condition: &Value, state: &ExtendedState<'_>) -> Result<bool> {
        self(condition, state)
    }
}
