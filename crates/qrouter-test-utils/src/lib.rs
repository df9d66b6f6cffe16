//! Fixture route graphs, contexts and assertions shared by the qrouter test
//! suites.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};

use qrouter_core::{
    Alternative, ConditionEvaluator, MachineSpec, ParallelContext, ParallelGraph, RouteGraph,
    RouterOptions, Section, Target, TaskContext,
};
use qrouter_expr::ExpressionEvaluator;

pub const TASK_ABOUT_YOU: &str = "task-about-you";
pub const TASK_EMPLOYMENT: &str = "task-employment";
pub const EMPLOYMENT_STATUS: &str = "task-employment__applicability-status";

/// Default evaluator with "today" pinned to 2024-06-15.
pub fn evaluator() -> Arc<dyn ConditionEvaluator> {
    let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default();
    Arc::new(ExpressionEvaluator::new().with_today(today))
}

/// `a` goes to `b` for scotland and straight to `c` for england; `b` goes
/// to `c`, which is final.
pub fn country_graph() -> RouteGraph {
    RouteGraph::new("a")
        .with_section(
            "a",
            Section::guarded(
                "ANSWER",
                vec![
                    Alternative::when("b", json!(["==", "$.answers.a.q1", "scotland"])),
                    Alternative::when("c", json!(["==", "$.answers.a.q1", "england"])),
                ],
            ),
        )
        .with_section("b", Section::to("ANSWER", "c"))
        .with_section("c", Section::terminal())
}

/// Intro, a repeatable list of attacker names (`REPEAT` adds another),
/// `section3` and a final page.
pub fn attacker_names_graph() -> RouteGraph {
    RouteGraph::new("p-intro")
        .with_section("p-intro", Section::to("ANSWER", "p-attacker-names"))
        .with_section(
            "p-attacker-names",
            Section::to("ANSWER", "section3")
                .with_event("REPEAT", Target::Direct("p-attacker-names".into()))
                .repeatable(),
        )
        .with_section("section3", Section::to("ANSWER", "p-end"))
        .with_section("p-end", Section::terminal())
}

pub fn task_context(graph: RouteGraph) -> TaskContext {
    TaskContext::new(graph)
}

fn adult() -> Value {
    json!([">=", "$.answers.a-age.q-age", 18])
}

/// Two tasks sharing one answer pool. Employment questions only apply to
/// adults, and its first section routes on the age given in the other task.
pub fn household_graph() -> ParallelGraph {
    let about_you = RouteGraph::new("a-name")
        .with_section("a-name", Section::to("ANSWER", "a-age"))
        .with_section("a-age", Section::to("ANSWER", "a-summary"))
        .with_section(
            "a-summary",
            Section::to("ANSWER", format!("#{TASK_EMPLOYMENT}")),
        );

    let employment = RouteGraph::new("b-start")
        .with_section(
            "b-start",
            Section::guarded(
                "ANSWER",
                vec![
                    Alternative::when("b-job", json!(["==", "$.answers.b-start.q-working", "yes"])),
                    Alternative::when("b-retired", json!([">=", "$.answers.a-age.q-age", 66])),
                    Alternative::otherwise("b-end"),
                ],
            ),
        )
        .with_section("b-job", Section::to("ANSWER", "b-end"))
        .with_section("b-retired", Section::to("ANSWER", "b-end"))
        .with_section("b-end", Section::terminal());

    let status_update = || {
        Target::Guarded(vec![
            Alternative::when("applicable", adult()),
            Alternative::otherwise("inapplicable"),
        ])
    };
    let status = RouteGraph::new("inapplicable")
        .with_section(
            "inapplicable",
            Section::default().with_event("UPDATE__STATUS", status_update()),
        )
        .with_section(
            "applicable",
            Section::default().with_event("UPDATE__STATUS", status_update()),
        );

    let mut graph = ParallelGraph::new()
        .with_machine(TASK_ABOUT_YOU, MachineSpec::new(about_you))
        .with_machine(
            TASK_EMPLOYMENT,
            MachineSpec::new(employment).with_referrer(format!("#{TASK_ABOUT_YOU}")),
        )
        .with_machine(EMPLOYMENT_STATUS, MachineSpec::new(status));
    graph.initial = Some(TASK_ABOUT_YOU.to_string());
    graph
}

pub fn parallel_context(graph: ParallelGraph) -> ParallelContext {
    ParallelContext::new(graph)
}

/// Every non-system answer belongs to a section in progress, repeatable
/// arrays never outgrow their occurrences, and a non-repeatable section is
/// never both answered and retracted.
pub fn assert_consistent(
    answers: &serde_json::Map<String, Value>,
    retracted: &serde_json::Map<String, Value>,
    journeys: &[(&RouteGraph, &[String])],
    options: &RouterOptions,
) {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for (_, progress) in journeys {
        for id in progress.iter() {
            *occurrences.entry(id.as_str()).or_default() += 1;
        }
    }
    let repeatable = |id: &str| journeys.iter().any(|(graph, _)| graph.is_repeatable(id));

    for (key, answer) in answers {
        if options.is_system_key(key) {
            continue;
        }
        let seen = occurrences.get(key.as_str()).copied().unwrap_or(0);
        assert!(seen > 0, "answer for \"{key}\" has no section in progress");
        if repeatable(key) {
            let stored = answer.as_array().map_or(0, Vec::len);
            assert!(
                stored <= seen,
                "\"{key}\" stores {stored} answers for {seen} occurrences"
            );
        } else {
            assert!(
                !retracted.contains_key(key),
                "\"{key}\" is both answered and retracted"
            );
        }
    }
}

/// [`assert_consistent`] for a single-task context.
pub fn assert_task_consistent(context: &TaskContext, options: &RouterOptions) {
    assert_consistent(
        &context.answers,
        &context.retracted_answers,
        &[(&context.routes, context.progress.as_slice())],
        options,
    );
    let current = context.current_section_id.as_deref().unwrap_or_default();
    assert!(
        context.progress.iter().any(|id| id == current),
        "current section \"{current}\" is not in progress"
    );
}

/// [`assert_consistent`] over every member of a parallel context.
pub fn assert_parallel_consistent(context: &ParallelContext, options: &RouterOptions) {
    let journeys: Vec<(&RouteGraph, &[String])> = context
        .routes
        .states
        .values()
        .map(|machine| (&machine.routes, machine.progress.as_slice()))
        .collect();
    assert_consistent(&context.answers, &context.retracted_answers, &journeys, options);
}
