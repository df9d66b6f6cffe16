use std::sync::Arc;

use serde_json::Value;

use qrouter_core::error::{Result, RouterError};
use qrouter_core::{ConditionEvaluator, RouterOptions, SectionId, Step, TaskContext};

use crate::journey::{Destination, Journey};

/// Routes one questionnaire task over its route graph.
///
/// The router owns its [`TaskContext`]; every operation returns a [`Step`]
/// borrowing it, and [`TaskRouter::into_context`] hands it back for
/// persistence. A router rebuilt from a returned context continues where
/// the old one stopped.
pub struct TaskRouter {
    context: TaskContext,
    evaluator: Arc<dyn ConditionEvaluator>,
    options: RouterOptions,
}

impl TaskRouter {
    pub fn new(context: TaskContext, evaluator: Arc<dyn ConditionEvaluator>) -> Result<Self> {
        Self::with_options(context, evaluator, RouterOptions::default())
    }

    pub fn with_options(
        context: TaskContext,
        evaluator: Arc<dyn ConditionEvaluator>,
        options: RouterOptions,
    ) -> Result<Self> {
        if let Some((section, machine_id)) = context.routes.machine_targets().next() {
            return Err(RouterError::InvalidGraph(format!(
                "section \"{section}\" targets machine \"#{machine_id}\" outside a parallel graph"
            )));
        }
        let mut router = Self {
            context,
            evaluator,
            options,
        };
        router.journey().normalize()?;
        Ok(router)
    }

    fn journey(&mut self) -> Journey<'_> {
        let context = &mut self.context;
        Journey {
            graph: &context.routes,
            progress: &mut context.progress,
            current_section_id: &mut context.current_section_id,
            current_index: &mut context.current_index,
            answers: &mut context.answers,
            retracted: &mut context.retracted_answers,
            attributes: &context.attributes,
            options: &self.options,
        }
    }

    fn step(&self) -> Step<'_, TaskContext> {
        Step {
            id: self.current_section_id().to_string(),
            context: &self.context,
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn into_context(self) -> TaskContext {
        self.context
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn current_section_id(&self) -> &str {
        self.context
            .current_section_id
            .as_deref()
            .unwrap_or(&self.context.routes.initial)
    }

    /// The current step, or move to `section_id` first. `None` when the
    /// section has not been reached.
    pub fn current(&mut self, section_id: Option<&str>) -> Option<Step<'_, TaskContext>> {
        if let Some(id) = section_id {
            let mut journey = self.journey();
            let index = journey.position_of(Some(id))?;
            journey.focus(index);
        }
        Some(self.step())
    }

    /// Answer `section_id` (the current section by default) and move on by
    /// `event` (the configured default event when `None`).
    pub fn next(
        &mut self,
        answers: Option<Value>,
        section_id: Option<&str>,
        event: Option<&str>,
    ) -> Result<Step<'_, TaskContext>> {
        let event = event.unwrap_or(&self.options.default_event).to_string();
        let evaluator = Arc::clone(&self.evaluator);
        let advance = self
            .journey()
            .next(evaluator.as_ref(), answers, section_id, &event)?;
        if let Destination::Machine(machine_id) = advance.to {
            return Err(RouterError::InvalidGraph(format!(
                "section \"{}\" targets machine \"#{machine_id}\" outside a parallel graph",
                advance.from
            )));
        }
        Ok(self.step())
    }

    /// Step back to the progress element before `section_id`.
    pub fn previous(&mut self, section_id: Option<&str>) -> Result<Step<'_, TaskContext>> {
        let mut journey = self.journey();
        let index =
            journey
                .position_of(section_id)
                .ok_or_else(|| RouterError::SectionUnavailable {
                    section: section_id.unwrap_or_default().to_string(),
                })?;
        if index == 0 {
            return Err(RouterError::NoPreviousSection {
                section: journey.progress[0].clone(),
            });
        }
        journey.focus(index - 1);
        Ok(self.step())
    }

    pub fn first(&self) -> &str {
        self.context
            .progress
            .first()
            .unwrap_or(&self.context.routes.initial)
    }

    pub fn last(&self) -> &str {
        self.context
            .progress
            .last()
            .unwrap_or(&self.context.routes.initial)
    }

    pub fn available(&self, section_id: &str) -> bool {
        self.context.progress.iter().any(|id| id == section_id)
    }

    pub fn progress(&self) -> &[SectionId] {
        &self.context.progress
    }
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("current", &self.current_section_id())
            .field("progress", &self.context.progress)
            .finish_non_exhaustive()
    }
}
