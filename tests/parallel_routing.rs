//! End-to-end routing over a persisted parallel document.

use serde_json::{json, Value};

use qrouter_core::{ParallelContext, RouterError, RouterOptions};
use qrouter_engine::ParallelRouter;
use qrouter_test_utils::{assert_parallel_consistent, evaluator};

fn document() -> Value {
    json!({
        "routes": {
            "type": "parallel",
            "initial": "task-your-details",
            "states": {
                "task-your-details": {
                    "initial": "p-name",
                    "states": {
                        "p-name": {"on": {"ANSWER": "p-has-partner"}},
                        "p-has-partner": {"on": {"ANSWER": "p-details-done"}},
                        "p-details-done": {"on": {"ANSWER": "#task-partner"}}
                    }
                },
                "task-partner": {
                    "initial": "p-partner-name",
                    "referrer": "#task-your-details",
                    "states": {
                        "p-partner-name": {"on": {"ANSWER": "p-partner-income"}},
                        "p-partner-income": {"on": {"ANSWER": "p-partner-done"}},
                        "p-partner-done": {"type": "final"}
                    }
                },
                "task-partner__applicability-status": {
                    "initial": "notApplicable",
                    "states": {
                        "notApplicable": {"on": {"UPDATE__STATUS": [
                            {"target": "applicable", "cond": ["==", "$.answers.p-has-partner.q-partner", true]},
                            {"target": "notApplicable"}
                        ]}},
                        "applicable": {"on": {"UPDATE__STATUS": [
                            {"target": "applicable", "cond": ["==", "$.answers.p-has-partner.q-partner", true]},
                            {"target": "notApplicable"}
                        ]}}
                    }
                }
            }
        },
        "answers": {"system": {"case-reference": "24\\654321"}}
    })
}

fn router() -> ParallelRouter {
    let context: ParallelContext = serde_json::from_value(document()).expect("document");
    ParallelRouter::new(context, evaluator()).expect("router")
}

#[test]
fn test_partner_task_opens_and_closes() {
    let mut router = router();
    router.next(Some(json!({"q-name": "Sam"})), None, None).unwrap();
    let step = router
        .next(Some(json!({"q-partner": true})), None, None)
        .unwrap();
    assert_eq!(step.id, "p-details-done");
    assert_eq!(step.value["task-partner__applicability-status"], "applicable");
    assert!(router.available("#task-partner"));

    let step = router.next(Some(json!({})), None, None).unwrap();
    assert_eq!(step.id, "p-partner-name");
    router.next(Some(json!({"q-partner-name": "Alex"})), None, None).unwrap();
    assert_eq!(router.current_section_id(), "p-partner-income");

    // Saying there is no partner closes the task but keeps its progress.
    router.current(Some("p-has-partner")).unwrap();
    let step = router
        .next(Some(json!({"q-partner": false})), None, None)
        .unwrap();
    assert_eq!(step.id, "p-details-done");
    assert_eq!(step.value["task-partner__applicability-status"], "notApplicable");
    assert!(!router.available("#task-partner"));
    assert!(!router.available("p-partner-name"));
    assert!(router.current(Some("#task-partner")).is_none());
    assert!(matches!(
        router.next(None, Some("p-partner-income"), None),
        Err(RouterError::SectionUnavailable { .. })
    ));
    assert_eq!(router.pending_events(), 0);
    assert_parallel_consistent(router.context(), &RouterOptions::default());
}

#[test]
fn test_machine_addresses_and_back_navigation() {
    let mut router = router();
    router.next(Some(json!({"q-name": "Sam"})), None, None).unwrap();
    router.next(Some(json!({"q-partner": true})), None, None).unwrap();
    router.next(Some(json!({})), None, None).unwrap();

    // Answering through a machine address routes that machine's current section.
    let step = router
        .next(Some(json!({"q-partner-name": "Alex"})), Some("#task-partner"), None)
        .unwrap();
    assert_eq!(step.id, "p-partner-income");
    assert_eq!(router.first(), "p-partner-name");
    assert_eq!(router.last(), "p-partner-income");

    assert_eq!(router.previous(None).unwrap().id, "p-partner-name");
    assert_eq!(router.previous(None).unwrap().id, "p-details-done");
    assert_eq!(router.previous(None).unwrap().id, "p-has-partner");
    assert_eq!(router.current(Some("#task-partner")).unwrap().id, "p-partner-name");
}

#[test]
fn test_context_survives_serialization() {
    let mut router = router();
    router.next(Some(json!({"q-name": "Sam"})), None, None).unwrap();
    router.next(Some(json!({"q-partner": true})), None, None).unwrap();

    let saved = serde_json::to_value(router.context()).unwrap();
    assert_eq!(saved["currentSectionId"], "p-details-done");
    assert_eq!(
        saved["routes"]["states"]["task-your-details"]["progress"],
        json!(["p-name", "p-has-partner", "p-details-done"])
    );
    assert_eq!(saved["answers"]["system"]["case-reference"], "24\\654321");

    let context: ParallelContext = serde_json::from_value(saved).unwrap();
    let mut router = ParallelRouter::new(context, evaluator()).unwrap();
    assert!(router.available("#task-partner"));
    assert_eq!(router.next(Some(json!({})), None, None).unwrap().id, "p-partner-name");
}

#[test]
fn test_jump_to_closed_task_keeps_user_on_reachable_section() {
    let mut router = router();
    router.next(Some(json!({"q-name": "Sam"})), None, None).unwrap();
    router.next(Some(json!({"q-partner": false})), None, None).unwrap();

    let step = router.next(Some(json!({})), None, None).unwrap();
    assert_eq!(step.id, "p-details-done");
    assert_eq!(step.value["task-partner"], "p-partner-name");
    assert!(router.available(router.current_section_id()));
    assert!(!router.available("#task-partner"));

    // Still navigable from where it landed.
    assert_eq!(router.previous(None).unwrap().id, "p-has-partner");
    assert_eq!(router.pending_events(), 0);
}
