use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use qrouter_core::error::{Result, RouterError};
use qrouter_core::event::UPDATE_STATUS_EVENT;
use qrouter_core::{
    applicability_machine_id, ConditionEvaluator, MachineSpec, ParallelContext, ParallelStep,
    RouterEvent, RouterOptions, SectionId, APPLICABILITY_SUFFIX, APPLICABLE_STATE,
    MACHINE_REF_PREFIX,
};

use crate::address::Address;
use crate::journey::{Destination, Journey};
use crate::queue::EventQueue;

/// Routes several member machines over one shared answer pool. Members
/// gated by an `<id>__applicability-status` machine are only reachable
/// while it sits at `applicable`.
pub struct ParallelRouter {
    context: ParallelContext,
    evaluator: Arc<dyn ConditionEvaluator>,
    options: RouterOptions,
    queue: EventQueue,
}

/// Borrow one member machine together with the shared pools.
fn member<'a>(
    context: &'a mut ParallelContext,
    options: &'a RouterOptions,
    machine_id: &str,
) -> Result<Journey<'a>> {
    let ParallelContext {
        routes,
        answers,
        retracted_answers,
        attributes,
        ..
    } = context;
    let machine = routes
        .states
        .get_mut(machine_id)
        .ok_or_else(|| RouterError::UnknownMachine(machine_id.to_string()))?;
    let MachineSpec {
        routes: graph,
        progress,
        current_section_id,
        current_index,
        ..
    } = machine;
    Ok(Journey {
        graph,
        progress,
        current_section_id,
        current_index,
        answers,
        retracted: retracted_answers,
        attributes,
        options,
    })
}

fn is_applicability_machine(machine_id: &str) -> bool {
    machine_id.ends_with(APPLICABILITY_SUFFIX)
}

impl ParallelRouter {
    pub fn new(context: ParallelContext, evaluator: Arc<dyn ConditionEvaluator>) -> Result<Self> {
        Self::with_options(context, evaluator, RouterOptions::default())
    }

    pub fn with_options(
        context: ParallelContext,
        evaluator: Arc<dyn ConditionEvaluator>,
        options: RouterOptions,
    ) -> Result<Self> {
        let mut router = Self {
            context,
            evaluator,
            options,
            queue: EventQueue::new(),
        };
        router.validate_machine_refs()?;

        for machine_id in router.machine_ids() {
            member(&mut router.context, &router.options, &machine_id)?.normalize()?;
        }

        match router.context.current_section_id.clone() {
            Some(section_id) => {
                let owner = router
                    .owner_of(&section_id)
                    .ok_or_else(|| RouterError::UnknownSection(section_id.clone()))?;
                if !router.context.routes.states[owner].progress.contains(&section_id) {
                    return Err(RouterError::InvalidContext(format!(
                        "current section \"{section_id}\" is not in the progress of \"{owner}\""
                    )));
                }
            }
            None => {
                let machine_id = router.default_machine_id().ok_or_else(|| {
                    RouterError::InvalidGraph("parallel graph declares no machines".into())
                })?;
                router.context.current_section_id =
                    router.context.routes.states[machine_id].current_section_id.clone();
            }
        }
        Ok(router)
    }

    /// Every `#machine` target and referrer must name a member.
    fn validate_machine_refs(&self) -> Result<()> {
        let states = &self.context.routes.states;
        if states.is_empty() {
            return Err(RouterError::InvalidGraph(
                "parallel graph declares no machines".into(),
            ));
        }
        if let Some(initial) = &self.context.routes.initial {
            if !states.contains_key(initial) {
                return Err(RouterError::UnknownMachine(initial.clone()));
            }
        }
        for machine in states.values() {
            let referenced = machine.routes.machine_targets().map(|(_, id)| id);
            let referrer = machine
                .referrer
                .as_deref()
                .map(|r| r.trim_start_matches(MACHINE_REF_PREFIX));
            for id in referenced.chain(referrer) {
                if !states.contains_key(id) {
                    return Err(RouterError::UnknownMachine(id.to_string()));
                }
            }
        }
        Ok(())
    }

    fn machine_ids(&self) -> Vec<String> {
        self.context.routes.states.keys().cloned().collect()
    }

    /// `routes.initial`, else the first member that is not an applicability
    /// machine.
    fn default_machine_id(&self) -> Option<&str> {
        let states = &self.context.routes.states;
        self.context
            .routes
            .initial
            .as_deref()
            .or_else(|| {
                states
                    .keys()
                    .find(|id| !is_applicability_machine(id))
                    .map(String::as_str)
            })
            .or_else(|| states.keys().next().map(String::as_str))
    }

    /// Member whose graph declares `section_id`; task machines are searched
    /// before applicability machines.
    fn owner_of(&self, section_id: &str) -> Option<&str> {
        let states = &self.context.routes.states;
        let tasks = states.iter().filter(|(id, _)| !is_applicability_machine(id));
        let statuses = states.iter().filter(|(id, _)| is_applicability_machine(id));
        tasks
            .chain(statuses)
            .find(|(_, machine)| machine.routes.contains(section_id))
            .map(|(id, _)| id.as_str())
    }

    fn is_applicable(&self, machine_id: &str) -> bool {
        match self
            .context
            .routes
            .states
            .get(&applicability_machine_id(machine_id))
        {
            Some(status) => status.current_section_id.as_deref() == Some(APPLICABLE_STATE),
            None => true,
        }
    }

    /// Owning machine and section an address points at.
    fn resolve(&self, address: &Address) -> Option<(String, SectionId)> {
        match address {
            Address::Machine(id) => {
                let machine = self.context.routes.states.get(id)?;
                Some((id.clone(), machine.current_section_id.clone()?))
            }
            Address::Section(id) => Some((self.owner_of(id)?.to_string(), id.clone())),
        }
    }

    fn is_available(&self, address: &Address) -> bool {
        let Some((machine_id, section_id)) = self.resolve(address) else {
            return false;
        };
        if !self.is_applicable(&machine_id) {
            return false;
        }
        match address {
            Address::Machine(_) => true,
            Address::Section(_) => self.context.routes.states[machine_id.as_str()]
                .progress
                .contains(&section_id),
        }
    }

    fn address_or_current(&self, raw: Option<&str>) -> Address {
        match raw {
            Some(raw) => Address::parse(raw),
            None => Address::Section(self.current_section_id().to_string()),
        }
    }

    fn unavailable(address: &Address) -> RouterError {
        RouterError::SectionUnavailable {
            section: address.to_string(),
        }
    }

    pub fn context(&self) -> &ParallelContext {
        &self.context
    }

    pub fn into_context(self) -> ParallelContext {
        self.context
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn current_section_id(&self) -> &str {
        self.context.current_section_id.as_deref().unwrap_or_default()
    }

    /// Member owning the overall current section.
    pub fn current_machine_id(&self) -> Option<&str> {
        self.owner_of(self.current_section_id())
    }

    /// Every member's current section, applicability machines included.
    pub fn value(&self) -> IndexMap<String, SectionId> {
        self.context
            .routes
            .states
            .iter()
            .filter_map(|(id, machine)| {
                machine
                    .current_section_id
                    .clone()
                    .map(|section| (id.clone(), section))
            })
            .collect()
    }

    /// Events still queued; zero whenever a public call has returned.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    fn step(&self) -> ParallelStep<'_> {
        ParallelStep {
            id: self.current_section_id().to_string(),
            value: self.value(),
            context: &self.context,
        }
    }

    /// Whether a section id or `#machine` address can be navigated to.
    pub fn available(&self, target: &str) -> bool {
        self.is_available(&Address::parse(target))
    }

    pub fn current(&mut self, target: Option<&str>) -> Option<ParallelStep<'_>> {
        if let Some(raw) = target {
            let address = Address::parse(raw);
            if !self.is_available(&address) {
                return None;
            }
            let (machine_id, section_id) = self.resolve(&address)?;
            if let Address::Section(_) = address {
                let mut journey = member(&mut self.context, &self.options, &machine_id).ok()?;
                let index = journey.position_of(Some(section_id.as_str()))?;
                journey.focus(index);
            }
            self.context.current_section_id = Some(section_id);
        }
        Some(self.step())
    }

    pub fn next(
        &mut self,
        answers: Option<Value>,
        target: Option<&str>,
        event: Option<&str>,
    ) -> Result<ParallelStep<'_>> {
        let address = self.address_or_current(target);
        if !self.is_available(&address) {
            return Err(Self::unavailable(&address));
        }
        let (machine_id, section_id) = self
            .resolve(&address)
            .ok_or_else(|| Self::unavailable(&address))?;
        let event = event.unwrap_or(&self.options.default_event).to_string();
        let evaluator = Arc::clone(&self.evaluator);

        let advance = member(&mut self.context, &self.options, &machine_id)?.next(
            evaluator.as_ref(),
            answers,
            Some(section_id.as_str()),
            &event,
        )?;

        if advance.changed {
            self.queue
                .push(RouterEvent::cascade(&advance.from, &machine_id));
        }
        for removed in &advance.removed {
            self.queue.push(RouterEvent::cascade(removed, &machine_id));
        }
        if !advance.removed.is_empty() {
            self.queue.push(RouterEvent::scoped("CASCADE", &machine_id));
        }
        self.queue.push(RouterEvent::scoped(&event, &machine_id));

        let landing = match advance.to {
            Destination::Machine(target) => {
                if !self.context.routes.states.contains_key(&target) {
                    self.queue.clear();
                    return Err(RouterError::UnknownMachine(target));
                }
                info!(machine_id = %machine_id, target = %target, "Cross-machine transition");
                self.queue.push(RouterEvent::scoped("COMPLETE", &machine_id));
                target
            }
            Destination::Section(_) => machine_id.clone(),
        };
        self.queue.push(RouterEvent::fire(UPDATE_STATUS_EVENT));
        self.drain()?;

        self.settle(&landing, &machine_id);
        Ok(self.step())
    }

    /// Move the overall current section to `landing`, or to the answering
    /// machine, or to the default machine, whichever is available first.
    /// Left untouched when none is.
    fn settle(&mut self, landing: &str, origin: &str) {
        let settled = [landing, origin]
            .into_iter()
            .chain(self.default_machine_id())
            .find(|id| self.is_available(&Address::Machine((*id).to_string())))
            .map(str::to_string);
        let Some(machine_id) = settled else {
            debug!(landing, origin, "No applicable machine to land on");
            return;
        };
        if machine_id != landing {
            debug!(landing, machine_id = %machine_id, "Landing machine not applicable");
        }
        if let Some(section) = self.context.routes.states[machine_id.as_str()]
            .current_section_id
            .clone()
        {
            self.context.current_section_id = Some(section);
        }
    }

    /// Step back within the owning member; from a member's first section,
    /// go back to its referrer machine.
    pub fn previous(&mut self, target: Option<&str>) -> Result<ParallelStep<'_>> {
        let address = self.address_or_current(target);
        if !self.is_available(&address) {
            return Err(Self::unavailable(&address));
        }
        let (machine_id, section_id) = self
            .resolve(&address)
            .ok_or_else(|| Self::unavailable(&address))?;

        let mut journey = member(&mut self.context, &self.options, &machine_id)?;
        let index = journey
            .position_of(Some(section_id.as_str()))
            .ok_or_else(|| Self::unavailable(&address))?;
        if index > 0 {
            journey.focus(index - 1);
            let section = journey.progress[index - 1].clone();
            self.context.current_section_id = Some(section);
            return Ok(self.step());
        }

        let states = &self.context.routes.states;
        let referrer = states[machine_id.as_str()]
            .referrer
            .as_deref()
            .map(|r| r.trim_start_matches(MACHINE_REF_PREFIX))
            .ok_or_else(|| RouterError::NoPreviousSection {
                section: section_id.clone(),
            })?;
        let section = states
            .get(referrer)
            .ok_or_else(|| RouterError::UnknownMachine(referrer.to_string()))?
            .current_section_id
            .clone();
        info!(machine_id = %machine_id, referrer, "Back to referring machine");
        self.context.current_section_id = section;
        Ok(self.step())
    }

    /// First section of the member owning the current section.
    pub fn first(&self) -> &str {
        self.current_machine_id()
            .and_then(|id| self.context.routes.states[id].progress.first())
            .map_or(self.current_section_id(), String::as_str)
    }

    /// Last section of the member owning the current section.
    pub fn last(&self) -> &str {
        self.current_machine_id()
            .and_then(|id| self.context.routes.states[id].progress.last())
            .map_or(self.current_section_id(), String::as_str)
    }

    /// Run queued events until none remain. The queue is left empty on
    /// failure too.
    fn drain(&mut self) -> Result<()> {
        let result = self.run_queue();
        if result.is_err() {
            self.queue.clear();
        }
        result
    }

    fn run_queue(&mut self) -> Result<()> {
        let limit = self.options.max_event_iterations;
        let mut iterations = 0;
        while let Some(event) = self.queue.pop() {
            iterations += 1;
            if iterations > limit {
                warn!(limit, pending = self.queue.len() + 1, "Event propagation did not settle");
                return Err(RouterError::PropagationLimit(limit));
            }
            match event {
                RouterEvent::FireEvent { event_name } => self.broadcast(&event_name)?,
                RouterEvent::Cascade {
                    question_id,
                    origin,
                } => self.propagate_cascade(&question_id, &origin)?,
            }
        }
        Ok(())
    }

    /// Fire `event_name` at every member. Members with no transition for
    /// it, or already at a final section, are skipped.
    fn broadcast(&mut self, event_name: &str) -> Result<()> {
        let evaluator = Arc::clone(&self.evaluator);
        for machine_id in self.machine_ids() {
            let mut journey = member(&mut self.context, &self.options, &machine_id)?;
            match journey.next(evaluator.as_ref(), None, None, event_name) {
                Ok(advance) => {
                    if let Destination::Machine(target) = advance.to {
                        debug!(machine_id = %machine_id, target = %target, event = event_name, "Ignoring machine target during broadcast");
                    }
                }
                Err(err) if err.is_ignorable_broadcast() => {
                    debug!(machine_id = %machine_id, event = event_name, error = %err, "Broadcast not handled");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Truncate every other member whose routing depends on `question_id`.
    fn propagate_cascade(&mut self, question_id: &str, origin: &str) -> Result<()> {
        for machine_id in self.machine_ids() {
            if machine_id == origin {
                continue;
            }
            let mut journey = member(&mut self.context, &self.options, &machine_id)?;
            let Some(point) = journey.find_foreign_cascade_index(question_id) else {
                continue;
            };
            let removed = journey.truncate(point);
            if removed.is_empty() {
                continue;
            }
            info!(
                machine_id = %machine_id,
                section_id = question_id,
                cascade_index = point,
                removed = removed.len(),
                "Cascade truncated sibling machine"
            );
            for id in &removed {
                self.queue.push(RouterEvent::cascade(id, &machine_id));
            }
            self.queue.push(RouterEvent::scoped("CASCADE", &machine_id));
            self.queue.push(RouterEvent::fire(UPDATE_STATUS_EVENT));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ParallelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRouter")
            .field("current", &self.current_section_id())
            .field("value", &self.value())
            .field("pending_events", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrouter_core::{Alternative, ParallelGraph, RouteGraph, Section};
    use qrouter_test_utils::{
        assert_parallel_consistent, evaluator, household_graph, parallel_context,
        EMPLOYMENT_STATUS, TASK_ABOUT_YOU, TASK_EMPLOYMENT,
    };
    use serde_json::json;

    fn router() -> ParallelRouter {
        ParallelRouter::new(parallel_context(household_graph()), evaluator()).unwrap()
    }

    /// Name and age answered, sitting on the summary.
    fn adult_router() -> ParallelRouter {
        let mut router = router();
        router.next(Some(json!({"q-name": "Ann"})), None, None).unwrap();
        router.next(Some(json!({"q-age": 30})), None, None).unwrap();
        router
    }

    #[test]
    fn test_initial_state() {
        let mut router = router();
        let step = router.current(None).unwrap();
        assert_eq!(step.id, "a-name");
        assert_eq!(step.value[TASK_ABOUT_YOU], "a-name");
        assert_eq!(step.value[TASK_EMPLOYMENT], "b-start");
        assert_eq!(step.value[EMPLOYMENT_STATUS], "inapplicable");
        assert_eq!(router.current_machine_id(), Some(TASK_ABOUT_YOU));
    }

    #[test]
    fn test_availability_is_gated_by_status_machine() {
        let mut router = router();
        assert!(router.available("a-name"));
        assert!(router.available("#task-about-you"));
        assert!(!router.available("a-age"));
        assert!(!router.available("#task-employment"));
        assert!(!router.available("b-start"));
        assert!(!router.available("nowhere"));
        assert!(router.current(Some("b-start")).is_none());
        assert!(matches!(
            router.next(None, Some("#task-employment"), None),
            Err(RouterError::SectionUnavailable { ref section }) if section == "#task-employment"
        ));
    }

    #[test]
    fn test_answers_update_applicability() {
        let mut router = router();
        let step = router.next(Some(json!({"q-name": "Ann"})), None, None).unwrap();
        assert_eq!(step.id, "a-age");
        assert_eq!(step.value[EMPLOYMENT_STATUS], "inapplicable");

        let step = router.next(Some(json!({"q-age": 30})), None, None).unwrap();
        assert_eq!(step.id, "a-summary");
        assert_eq!(step.value[EMPLOYMENT_STATUS], "applicable");
        assert!(router.available("#task-employment"));
        assert_eq!(router.pending_events(), 0);
        assert_eq!(router.first(), "a-name");
        assert_eq!(router.last(), "a-summary");
        assert_parallel_consistent(router.context(), router.options());
    }

    #[test]
    fn test_cross_machine_jump_and_referrer() {
        let mut router = adult_router();
        let step = router.next(Some(json!({})), None, None).unwrap();
        assert_eq!(step.id, "b-start");
        assert_eq!(step.value[TASK_ABOUT_YOU], "a-summary");
        assert_eq!(
            step.context.routes.states[TASK_ABOUT_YOU].progress,
            ["a-name", "a-age", "a-summary"]
        );
        assert_eq!(router.current_machine_id(), Some(TASK_EMPLOYMENT));
        assert_eq!(router.first(), "b-start");

        let step = router.previous(None).unwrap();
        assert_eq!(step.id, "a-summary");

        let step = router.current(Some("#task-employment")).unwrap();
        assert_eq!(step.id, "b-start");
    }

    #[test]
    fn test_previous_without_referrer_fails_at_start() {
        let mut router = router();
        assert!(matches!(
            router.previous(None),
            Err(RouterError::NoPreviousSection { ref section }) if section == "a-name"
        ));
        let mut router = adult_router();
        assert_eq!(router.previous(None).unwrap().id, "a-age");
    }

    #[test]
    fn test_answer_change_cascades_into_sibling_machine() {
        let mut router = adult_router();
        router.next(Some(json!({})), None, None).unwrap();
        router.next(Some(json!({"q-working": "yes"})), None, None).unwrap();
        let step = router.next(Some(json!({"employer": "Acme"})), None, None).unwrap();
        assert_eq!(step.id, "b-end");
        assert_eq!(
            step.context.routes.states[TASK_EMPLOYMENT].progress,
            ["b-start", "b-job", "b-end"]
        );

        router.current(Some("a-age")).unwrap();
        let step = router.next(Some(json!({"q-age": 16})), None, None).unwrap();
        assert_eq!(step.id, "a-summary");
        assert_eq!(step.value[EMPLOYMENT_STATUS], "inapplicable");
        assert_eq!(step.value[TASK_EMPLOYMENT], "b-start");
        let employment = &step.context.routes.states[TASK_EMPLOYMENT];
        assert_eq!(employment.progress, ["b-start"]);
        assert_eq!(step.context.retracted_answers["b-job"], json!({"employer": "Acme"}));
        assert_eq!(step.context.answers["b-start"], json!({"q-working": "yes"}));
        assert!(!router.available("b-start"));
        assert_eq!(router.pending_events(), 0);
        assert_parallel_consistent(router.context(), router.options());

        // Back to adult: the retracted job answer returns on revisit.
        router.current(Some("a-age")).unwrap();
        router.next(Some(json!({"q-age": 30})), None, None).unwrap();
        assert_eq!(router.current(Some("#task-employment")).unwrap().id, "b-start");
        let step = router.next(Some(json!({"q-working": "yes"})), None, None).unwrap();
        assert_eq!(step.id, "b-job");
        assert_eq!(step.context.answers["b-job"], json!({"employer": "Acme"}));
        assert!(!step.context.retracted_answers.contains_key("b-job"));
        assert_parallel_consistent(router.context(), router.options());
    }

    #[test]
    fn test_guard_reads_answer_from_other_machine() {
        let mut router = router();
        router.next(Some(json!({"q-name": "Bob"})), None, None).unwrap();
        router.next(Some(json!({"q-age": 70})), None, None).unwrap();
        router.next(Some(json!({})), None, None).unwrap();
        let step = router.next(Some(json!({"q-working": "no"})), None, None).unwrap();
        assert_eq!(step.id, "b-retired");
    }

    #[test]
    fn test_propagation_limit_empties_queue() {
        let options = RouterOptions {
            max_event_iterations: 2,
            ..RouterOptions::default()
        };
        let mut router =
            ParallelRouter::with_options(parallel_context(household_graph()), evaluator(), options)
                .unwrap();
        let err = router.next(Some(json!({"q-name": "Ann"})), None, None).unwrap_err();
        assert!(matches!(err, RouterError::PropagationLimit(2)));
        assert_eq!(router.pending_events(), 0);
    }

    #[test]
    fn test_broadcast_propagates_real_errors() {
        let mut graph = household_graph();
        graph.states[EMPLOYMENT_STATUS].routes.states["inapplicable"] = Section::guarded(
            "UPDATE__STATUS",
            vec![Alternative::when("applicable", json!(false))],
        );
        let mut router = ParallelRouter::new(parallel_context(graph), evaluator()).unwrap();
        let err = router.next(Some(json!({"q-name": "Ann"})), None, None).unwrap_err();
        assert!(matches!(err, RouterError::NoMatchingTarget { ref section } if section == "inapplicable"));
        assert_eq!(router.pending_events(), 0);
    }

    #[test]
    fn test_rejects_unknown_machine_references() {
        let mut graph = household_graph();
        graph.states[TASK_EMPLOYMENT].referrer = Some("#task-missing".into());
        let err = ParallelRouter::new(parallel_context(graph), evaluator()).unwrap_err();
        assert!(matches!(err, RouterError::UnknownMachine(ref id) if id == "task-missing"));

        let mut graph = household_graph();
        graph.states[TASK_ABOUT_YOU].routes.states["a-summary"] =
            Section::to("ANSWER", "#task-missing");
        assert!(ParallelRouter::new(parallel_context(graph), evaluator()).is_err());

        let mut context = parallel_context(household_graph());
        context.current_section_id = Some("a-age".into());
        let err = ParallelRouter::new(context, evaluator()).unwrap_err();
        assert!(matches!(err, RouterError::InvalidContext(_)));
    }

    /// `task-a` jumps to `task-b`, which stays closed.
    fn closed_target_graph() -> ParallelGraph {
        let task_a = RouteGraph::new("a1").with_section("a1", Section::to("ANSWER", "#task-b"));
        let task_b = RouteGraph::new("b1").with_section("b1", Section::terminal());
        let status = RouteGraph::new("inapplicable").with_section("inapplicable", Section::terminal());
        ParallelGraph::new()
            .with_machine("task-a", MachineSpec::new(task_a))
            .with_machine("task-b", MachineSpec::new(task_b))
            .with_machine("task-b__applicability-status", MachineSpec::new(status))
    }

    #[test]
    fn test_jump_into_inapplicable_machine_stays_on_origin() {
        let mut router =
            ParallelRouter::new(parallel_context(closed_target_graph()), evaluator()).unwrap();
        let step = router.next(Some(json!({"q": 1})), None, None).unwrap();
        assert_eq!(step.id, "a1");
        assert_eq!(step.value["task-b"], "b1");
        assert!(router.available(router.current_section_id()));
        assert!(!router.available("#task-b"));

        let step = router.next(None, None, None).unwrap();
        assert_eq!(step.id, "a1");
        assert_eq!(router.pending_events(), 0);
    }

    #[test]
    fn test_answer_closing_own_machine_falls_back_to_default() {
        let home = RouteGraph::new("h1").with_section("h1", Section::terminal());
        let task_a = RouteGraph::new("a1")
            .with_section("a1", Section::to("ANSWER", "a2"))
            .with_section("a2", Section::terminal());
        let status = RouteGraph::new("applicable")
            .with_section("applicable", Section::to("ANSWER__TASK-A", "inapplicable"))
            .with_section("inapplicable", Section::terminal());
        let graph = ParallelGraph::new()
            .with_machine("task-home", MachineSpec::new(home))
            .with_machine("task-a", MachineSpec::new(task_a))
            .with_machine("task-a__applicability-status", MachineSpec::new(status));
        let mut router = ParallelRouter::new(parallel_context(graph), evaluator()).unwrap();
        assert_eq!(router.current(Some("#task-a")).unwrap().id, "a1");

        let step = router.next(Some(json!({"q": 1})), None, None).unwrap();
        assert_eq!(step.id, "h1");
        assert_eq!(step.value["task-a"], "a2");
        assert_eq!(step.value["task-a__applicability-status"], "inapplicable");
        assert!(router.available(router.current_section_id()));
    }

    /// `a1` routes on its own answer; the status machine follows scoped
    /// `ANSWER__`/`CASCADE__` events and a tracker counts completions.
    fn scoped_events_graph() -> ParallelGraph {
        let task_a = RouteGraph::new("a1")
            .with_section(
                "a1",
                Section::guarded(
                    "ANSWER",
                    vec![
                        Alternative::when("a2", json!(["==", "$.answers.a1.q", "yes"])),
                        Alternative::otherwise("a3"),
                    ],
                ),
            )
            .with_section("a2", Section::to("ANSWER", "#task-b"))
            .with_section("a3", Section::to("ANSWER", "#task-b"));
        let task_b = RouteGraph::new("b1").with_section("b1", Section::terminal());
        let status = RouteGraph::new("inapplicable")
            .with_section("inapplicable", Section::to("ANSWER__TASK-A", "applicable"))
            .with_section("applicable", Section::to("CASCADE__TASK-A", "inapplicable"));
        let tracker = RouteGraph::new("t0")
            .with_section("t0", Section::to("COMPLETE__TASK-A", "t1"))
            .with_section("t1", Section::terminal());
        ParallelGraph::new()
            .with_machine("task-a", MachineSpec::new(task_a))
            .with_machine("task-b", MachineSpec::new(task_b))
            .with_machine("task-b__applicability-status", MachineSpec::new(status))
            .with_machine("tracker", MachineSpec::new(tracker))
    }

    #[test]
    fn test_scoped_events_drive_sibling_machines() {
        let mut router =
            ParallelRouter::new(parallel_context(scoped_events_graph()), evaluator()).unwrap();

        let step = router.next(Some(json!({"q": "yes"})), None, None).unwrap();
        assert_eq!(step.id, "a2");
        assert_eq!(step.value["task-b__applicability-status"], "applicable");
        assert_eq!(step.value["tracker"], "t0");

        let step = router.next(Some(json!({})), None, None).unwrap();
        assert_eq!(step.id, "b1");
        assert_eq!(step.value["tracker"], "t1");

        // CASCADE__ closes task-b, then the ANSWER__ queued after it reopens it.
        router.current(Some("a1")).unwrap();
        let step = router.next(Some(json!({"q": "no"})), None, None).unwrap();
        assert_eq!(step.id, "a3");
        assert_eq!(
            step.context.routes.states["task-a"].progress,
            ["a1", "a3"]
        );
        assert_eq!(step.context.retracted_answers["a2"], json!({}));
        let expected: IndexMap<String, SectionId> = [
            ("task-a", "a3"),
            ("task-b", "b1"),
            ("task-b__applicability-status", "applicable"),
            ("tracker", "t1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(router.value(), expected);
        assert_eq!(router.pending_events(), 0);
        assert_parallel_consistent(router.context(), router.options());
    }

    #[test]
    fn test_rehydrates_from_returned_context() {
        let router = adult_router();
        let saved = serde_json::to_string(router.context()).unwrap();
        let value = router.value();

        let context: ParallelContext = serde_json::from_str(&saved).unwrap();
        let mut router = ParallelRouter::new(context, evaluator()).unwrap();
        assert_eq!(router.value(), value);
        assert_eq!(router.current(None).unwrap().id, "a-summary");
        assert!(router.available("#task-employment"));
    }
}
