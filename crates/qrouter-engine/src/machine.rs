use tracing::debug;

use qrouter_core::error::{Result, RouterError};
use qrouter_core::{ConditionEvaluator, ExtendedState, RouteGraph, SectionId, Target};

/// Resolve `event` on section `current`.
///
/// A section without transitions is terminal and resolves to itself.
/// Guarded alternatives are tried in order and the first one whose guard
/// holds wins; an alternative without a guard always holds.
pub fn transition(
    graph: &RouteGraph,
    current: &str,
    event: &str,
    state: &ExtendedState<'_>,
    evaluator: &dyn ConditionEvaluator,
) -> Result<SectionId> {
    let section = graph.section(current)?;
    let Some(on) = &section.on else {
        return Ok(current.to_string());
    };
    let target = on.get(event).ok_or_else(|| RouterError::EventNotFound {
        event: event.to_string(),
        section: current.to_string(),
    })?;

    if let Target::Direct(id) = target {
        return Ok(id.clone());
    }

    for alternative in target.alternatives() {
        let holds = match &alternative.cond {
            None => true,
            Some(cond) => evaluator.evaluate(cond, state)?,
        };
        if holds {
            debug!(section_id = current, event, target = %alternative.target, "Guard matched");
            return Ok(alternative.target.clone());
        }
    }

    Err(RouterError::NoMatchingTarget {
        section: current.to_string(),
    })
}
