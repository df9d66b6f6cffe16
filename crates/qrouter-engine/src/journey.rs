use serde_json::{Map, Value};
use tracing::{debug, info};

use qrouter_core::equality::answer_changed;
use qrouter_core::error::{Result, RouterError};
use qrouter_core::{
    Answers, ConditionEvaluator, ExtendedState, RouteGraph, RouterOptions, SectionId,
    MACHINE_REF_PREFIX,
};

use crate::dependency::depends_on;
use crate::machine;

/// One machine's progress and cursor, borrowed together with the answer
/// pools it writes to.
pub(crate) struct Journey<'a> {
    pub graph: &'a RouteGraph,
    pub progress: &'a mut Vec<SectionId>,
    pub current_section_id: &'a mut Option<SectionId>,
    pub current_index: &'a mut Option<usize>,
    pub answers: &'a mut Answers,
    pub retracted: &'a mut Answers,
    pub attributes: &'a Map<String, Value>,
    pub options: &'a RouterOptions,
}

/// Where a transition led.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Destination {
    Section(SectionId),
    /// A `#machine` target, prefix stripped.
    Machine(String),
}

/// What one `next` did to a machine.
#[derive(Debug)]
pub(crate) struct Advance {
    /// The section that was answered.
    pub from: SectionId,
    pub to: Destination,
    /// The submitted answer differed from the stored one.
    pub changed: bool,
    /// Ids truncated from progress by the cascade, in progress order.
    pub removed: Vec<SectionId>,
}

impl<'a> Journey<'a> {
    /// Seed empty progress, check rehydrated state and settle the cursor.
    pub fn normalize(&mut self) -> Result<()> {
        let graph = self.graph;
        graph.validate()?;
        if self.progress.is_empty() {
            self.progress.push(graph.initial.clone());
        }
        if let Some(unknown) = self.progress.iter().find(|id| !graph.contains(id)) {
            return Err(RouterError::InvalidContext(format!(
                "progress names undeclared section \"{unknown}\""
            )));
        }

        let current = self
            .current_section_id
            .clone()
            .or_else(|| self.progress.last().cloned())
            .unwrap_or_else(|| graph.initial.clone());
        let index = match *self.current_index {
            Some(i) if self.progress.get(i) == Some(&current) => i,
            _ => self
                .progress
                .iter()
                .rposition(|id| *id == current)
                .ok_or_else(|| {
                    RouterError::InvalidContext(format!(
                        "current section \"{current}\" is not in progress"
                    ))
                })?,
        };
        self.focus(index);
        Ok(())
    }

    pub fn cursor(&self) -> usize {
        self.current_index
            .filter(|i| *i < self.progress.len())
            .unwrap_or_else(|| self.progress.len().saturating_sub(1))
    }

    pub fn focus(&mut self, index: usize) {
        *self.current_index = Some(index);
        *self.current_section_id = self.progress.get(index).cloned();
    }

    /// Index `section_id` resolves to: the cursor if it is already on that
    /// id, otherwise the id's first occurrence. `None` means the cursor.
    pub fn position_of(&self, section_id: Option<&str>) -> Option<usize> {
        let cursor = self.cursor();
        match section_id {
            None => Some(cursor),
            Some(id) if self.progress.get(cursor).is_some_and(|c| c == id) => Some(cursor),
            Some(id) => self.progress.iter().position(|p| p == id),
        }
    }

    pub fn state(&self) -> ExtendedState<'_> {
        ExtendedState::new(&*self.answers, self.progress.as_slice(), self.attributes)
    }

    /// How many earlier occurrences of the same id precede `index`.
    fn occurrence(&self, index: usize) -> usize {
        let id = &self.progress[index];
        self.progress[..index].iter().filter(|p| *p == id).count()
    }

    fn stored_answer(&self, index: usize) -> Option<&Value> {
        let id = &self.progress[index];
        if self.graph.is_repeatable(id) {
            self.answers
                .get(id)?
                .as_array()?
                .get(self.occurrence(index))
                .filter(|answer| !answer.is_null())
        } else {
            self.answers.get(id)
        }
    }

    fn store_answer(&mut self, index: usize, answer: Value) {
        let id = self.progress[index].clone();
        if !self.graph.is_repeatable(&id) {
            self.retracted.remove(&id);
            self.answers.insert(id, answer);
            return;
        }
        let occurrence = self.occurrence(index);
        let slot = self
            .answers
            .entry(id)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(items) = slot {
            if items.len() <= occurrence {
                items.resize(occurrence + 1, Value::Null);
            }
            items[occurrence] = answer;
        }
    }

    /// First progress index, scanning from `from`, whose routing depends on
    /// `changed`. A section that routes on its own answer keeps itself and
    /// cascades from the element after it.
    pub fn find_cascade_index(&self, changed: &str, from: usize) -> Option<usize> {
        for (i, id) in self.progress.iter().enumerate().skip(from) {
            let Some(section) = self.graph.states.get(id) else {
                continue;
            };
            if !section.has_conditions() {
                continue;
            }
            if depends_on(section, changed, self.attributes, self.options.cascade_detection) {
                let point = if id == changed { i + 1 } else { i };
                return (point < self.progress.len()).then_some(point);
            }
        }
        None
    }

    /// Cascade point for an answer changed in another machine. The first
    /// section is never truncated.
    pub fn find_foreign_cascade_index(&self, changed: &str) -> Option<usize> {
        self.find_cascade_index(changed, 0)
            .map(|point| point.max(1))
            .filter(|point| *point < self.progress.len())
    }

    /// Drop progress from `at` onwards and retract the removed answers.
    pub fn truncate(&mut self, at: usize) -> Vec<SectionId> {
        let at = at.max(1);
        if at >= self.progress.len() {
            return Vec::new();
        }
        let removed = self.progress.split_off(at);
        self.retract(&removed);
        if self.current_index.map_or(true, |i| i >= self.progress.len()) {
            self.focus(self.progress.len() - 1);
        }
        removed
    }

    fn retract(&mut self, removed: &[SectionId]) {
        let mut repeatable: Vec<&SectionId> = Vec::new();
        for id in removed {
            if self.graph.is_repeatable(id) {
                if !repeatable.contains(&id) {
                    repeatable.push(id);
                }
                continue;
            }
            if let Some(answer) = self.answers.remove(id) {
                debug!(section_id = %id, "Retracted answer");
                self.retracted.insert(id.clone(), answer);
            }
        }

        for id in repeatable {
            let remaining = self.progress.iter().filter(|p| *p == id).count();
            let Some(Value::Array(items)) = self.answers.get_mut(id) else {
                continue;
            };
            let tail = items.split_off(remaining.min(items.len()));
            if remaining == 0 {
                self.answers.remove(id);
            }
            if !tail.is_empty() {
                debug!(section_id = %id, occurrences = tail.len(), "Retracted repeated answers");
                self.retracted.insert(id.clone(), Value::Array(tail));
            }
        }
    }

    /// Move to `target` after answering the section at `from`, extending
    /// progress when the target is new. Returns the target's index.
    fn advance(&mut self, from: usize, target: &str) -> usize {
        if self.progress.get(from + 1).is_some_and(|id| id == target) {
            return from + 1;
        }
        if !self.graph.is_repeatable(target) {
            if let Some(index) = self.progress.iter().position(|id| id == target) {
                return index;
            }
            self.progress.push(target.to_string());
            self.restore(target);
            return self.progress.len() - 1;
        }
        let at = from + 1;
        self.progress.insert(at, target.to_string());
        self.open_occurrence(at);
        at
    }

    fn restore(&mut self, id: &str) {
        if let Some(answer) = self.retracted.remove(id) {
            debug!(section_id = id, "Restored retracted answer");
            self.answers.entry(id).or_insert(answer);
        }
    }

    /// Make room in the answer array for a newly inserted occurrence, or
    /// restore the first retracted one when it lands at the end.
    fn open_occurrence(&mut self, index: usize) {
        let id = self.progress[index].clone();
        let occurrence = self.occurrence(index);
        let stored = self
            .answers
            .get(&id)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        if occurrence < stored {
            if let Some(Value::Array(items)) = self.answers.get_mut(&id) {
                items.insert(occurrence, Value::Null);
            }
            return;
        }
        if occurrence > stored {
            return;
        }

        let Some(Value::Array(pending)) = self.retracted.get_mut(&id) else {
            return;
        };
        if pending.is_empty() {
            self.retracted.remove(&id);
            return;
        }
        let answer = pending.remove(0);
        let exhausted = pending.is_empty();
        if exhausted {
            self.retracted.remove(&id);
        }
        debug!(section_id = %id, occurrence, "Restored retracted occurrence");
        let slot = self
            .answers
            .entry(id)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = slot {
            items.push(answer);
        }
    }

    /// Answer (optionally) and leave the section at `section_id` on `event`.
    pub fn next(
        &mut self,
        evaluator: &dyn ConditionEvaluator,
        answers: Option<Value>,
        section_id: Option<&str>,
        event: &str,
    ) -> Result<Advance> {
        let graph = self.graph;
        let index = self
            .position_of(section_id)
            .ok_or_else(|| RouterError::SectionUnavailable {
                section: section_id.unwrap_or_default().to_string(),
            })?;
        let id = self.progress[index].clone();
        let section = graph.section(&id)?;
        if section.is_final() {
            return Err(RouterError::NoNextSection { section: id });
        }

        let mut changed = false;
        let mut removed = Vec::new();
        if let Some(answer) = answers {
            if answer_changed(self.stored_answer(index), &answer) {
                self.store_answer(index, answer);
                changed = true;
                if let Some(point) = self.find_cascade_index(&id, index) {
                    info!(section_id = %id, cascade_index = point, "Changed answer invalidates later progress");
                    removed = self.truncate(point);
                }
            } else {
                debug!(section_id = %id, "Answer unchanged");
            }
        }

        if section.on.is_none() {
            self.focus(index);
            return Ok(Advance {
                to: Destination::Section(id.clone()),
                from: id,
                changed,
                removed,
            });
        }

        let target = machine::transition(graph, &id, event, &self.state(), evaluator)?;
        debug!(section_id = %id, event, target = %target, "Transition");

        let to = match target.strip_prefix(MACHINE_REF_PREFIX) {
            Some(machine_id) => {
                self.focus(index);
                Destination::Machine(machine_id.to_string())
            }
            None => {
                let next_index = self.advance(index, &target);
                self.focus(next_index);
                Destination::Section(target)
            }
        };
        Ok(Advance {
            from: id,
            to,
            changed,
            removed,
        })
    }
}
