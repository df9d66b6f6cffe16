use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use qrouter_core::{CascadeDetection, Section, ROLES_ATTRIBUTE, ROLE_OPERATOR_PREFIX};

/// Operators whose string arguments are bare section ids.
const ANSWERED_OPERATORS: &[&str] = &["|answered", "|answered.count"];

fn answer_path() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$\.answers\.([^.]+)").expect("static pattern"))
}

/// Whether any guard on `section` depends on the answer to `section_id`.
pub fn depends_on(
    section: &Section,
    section_id: &str,
    attributes: &Map<String, Value>,
    detection: CascadeDetection,
) -> bool {
    section.conditions().any(|cond| match detection {
        CascadeDetection::Structural => referenced_sections(cond, attributes).contains(section_id),
        CascadeDetection::Textual => mentions_textually(cond, section_id, attributes),
    })
}

/// Every section id a guard reads, following role predicates into their
/// definitions under `attributes.q__roles`.
pub fn referenced_sections(cond: &Value, attributes: &Map<String, Value>) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut roles_seen = BTreeSet::new();
    collect(cond, attributes, &mut found, &mut roles_seen);
    found
}

fn collect(
    node: &Value,
    attributes: &Map<String, Value>,
    found: &mut BTreeSet<String>,
    roles_seen: &mut BTreeSet<String>,
) {
    match node {
        Value::String(s) => {
            if let Some(caps) = answer_path().captures(s) {
                found.insert(caps[1].to_string());
            }
        }
        Value::Array(items) => {
            if let Some((Value::String(head), args)) = items.split_first() {
                if ANSWERED_OPERATORS.contains(&head.as_str()) {
                    found.extend(args.iter().filter_map(Value::as_str).map(str::to_string));
                } else if head.starts_with(ROLE_OPERATOR_PREFIX) {
                    for role in args.iter().filter_map(Value::as_str) {
                        if !roles_seen.insert(role.to_string()) {
                            continue;
                        }
                        if let Some(definition) = role_definition(attributes, role) {
                            collect(definition, attributes, found, roles_seen);
                        }
                    }
                }
            }
            for item in items {
                collect(item, attributes, found, roles_seen);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect(value, attributes, found, roles_seen);
            }
        }
        _ => {}
    }
}

/// The serialized guard contains `.<id>.`, or a role predicate inside it
/// resolves to a definition that does.
pub fn mentions_textually(cond: &Value, section_id: &str, attributes: &Map<String, Value>) -> bool {
    let needle = format!(".{section_id}.");
    cond.to_string().contains(&needle)
        || has_role_routing_match(cond, section_id, &needle, attributes, &mut BTreeSet::new())
}

fn has_role_routing_match(
    node: &Value,
    section_id: &str,
    needle: &str,
    attributes: &Map<String, Value>,
    roles_seen: &mut BTreeSet<String>,
) -> bool {
    let Value::Array(items) = node else {
        return false;
    };
    if let Some((Value::String(head), args)) = items.split_first() {
        if head.starts_with(ROLE_OPERATOR_PREFIX) {
            for role in args.iter().filter_map(Value::as_str) {
                if !roles_seen.insert(role.to_string()) {
                    continue;
                }
                let Some(definition) = role_definition(attributes, role) else {
                    continue;
                };
                if definition.to_string().contains(needle)
                    || has_role_routing_match(definition, section_id, needle, attributes, roles_seen)
                {
                    return true;
                }
            }
        }
    }
    items.iter().any(|item| {
        item.as_str() == Some(section_id)
            || has_role_routing_match(item, section_id, needle, attributes, roles_seen)
    })
}

fn role_definition<'a>(attributes: &'a Map<String, Value>, role: &str) -> Option<&'a Value> {
    attributes.get(ROLES_ATTRIBUTE)?.get(role)?.get("condition")
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrouter_core::Alternative;
    use serde_json::json;

    fn roles() -> Map<String, Value> {
        json!({
            "q__roles": {
                "proxy": {"condition": ["==", "$.answers.p-who.q-who", "someone-else"]},
                "proxy-adult": {"condition": ["and",
                    ["|role.all", "proxy"],
                    [">=", "$.answers.p-age.q-age", 18]]},
                "circular": {"condition": ["|role.any", "circular", "proxy"]}
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_collects_answer_paths() {
        let cond = json!(["and",
            ["==", "$.answers.a.q1", "scotland"],
            ["includes", "$.answers.p-names.0.q-name", "x"]]);
        let found = referenced_sections(&cond, &Map::new());
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["a", "p-names"]);
    }

    #[test]
    fn test_answered_operator_arguments() {
        let cond = json!(["or", ["|answered", "p-one"], [">", ["|answered.count", "p-two"], 1]]);
        let found = referenced_sections(&cond, &Map::new());
        assert!(found.contains("p-one"));
        assert!(found.contains("p-two"));
    }

    #[test]
    fn test_role_definitions_are_expanded() {
        let attributes = roles();
        let found = referenced_sections(&json!(["|role.all", "proxy-adult"]), &attributes);
        assert!(found.contains("p-who"));
        assert!(found.contains("p-age"));

        let found = referenced_sections(&json!(["|role.any", "circular"]), &attributes);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["p-who"]);
    }

    #[test]
    fn test_structural_ignores_lookalike_ids() {
        // `a` is a prefix of `a-extra`; a structural walk keeps them apart.
        let cond = json!(["==", "$.answers.a-extra.q1", "x"]);
        let found = referenced_sections(&cond, &Map::new());
        assert!(!found.contains("a"));
    }

    #[test]
    fn test_textual_detection() {
        let attributes = roles();
        let cond = json!(["==", "$.answers.a.q1", "x"]);
        assert!(mentions_textually(&cond, "a", &attributes));
        assert!(!mentions_textually(&cond, "b", &attributes));

        assert!(mentions_textually(&json!(["|role.all", "proxy-adult"]), "p-age", &attributes));
        assert!(mentions_textually(&json!(["|answered", "p-one"]), "p-one", &attributes));
        assert!(!mentions_textually(&json!(["|role.all", "circular"]), "p-age", &attributes));
    }

    #[test]
    fn test_depends_on_section() {
        let section = Section::guarded(
            "ANSWER",
            vec![
                Alternative::when("b", json!(["==", "$.answers.a.q1", "scotland"])),
                Alternative::otherwise("c"),
            ],
        );
        for detection in [CascadeDetection::Structural, CascadeDetection::Textual] {
            assert!(depends_on(&section, "a", &Map::new(), detection));
            assert!(!depends_on(&section, "c", &Map::new(), detection));
        }
        assert!(!depends_on(&Section::to("ANSWER", "a"), "a", &Map::new(), CascadeDetection::Structural));
    }
}
