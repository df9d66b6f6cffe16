use serde::{Deserialize, Serialize};

/// Default event fired by `next` when the caller names none.
pub const ANSWER_EVENT: &str = "ANSWER";

/// Implicit event broadcast after every parallel `next`.
pub const UPDATE_STATUS_EVENT: &str = "UPDATE__STATUS";

/// Pending consequence of a parallel router step, drained before the call
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RouterEvent {
    /// The answer for `question_id` changed or was retracted in `origin`;
    /// sibling machines routing on it must be re-checked.
    Cascade {
        #[serde(rename = "questionId")]
        question_id: String,
        origin: String,
    },
    /// Broadcast `event_name` to every member machine.
    FireEvent {
        #[serde(rename = "eventName")]
        event_name: String,
    },
}

impl RouterEvent {
    pub fn cascade(question_id: impl Into<String>, origin: impl Into<String>) -> Self {
        RouterEvent::Cascade {
            question_id: question_id.into(),
            origin: origin.into(),
        }
    }

    pub fn fire(event_name: impl Into<String>) -> Self {
        RouterEvent::FireEvent {
            event_name: event_name.into(),
        }
    }

    /// `<PREFIX>__<MACHINE ID IN UPPER CASE>`, e.g. `CASCADE__P-TASK-A`.
    pub fn scoped(prefix: &str, machine_id: &str) -> Self {
        Self::fire(format!("{prefix}__{}", machine_id.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = RouterEvent::cascade("p-applicant-age", "task-a");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "cascade", "questionId": "p-applicant-age", "origin": "task-a"})
        );

        let fire = RouterEvent::fire(UPDATE_STATUS_EVENT);
        let json = serde_json::to_string(&fire).unwrap();
        assert_eq!(json, r#"{"type":"fire-event","eventName":"UPDATE__STATUS"}"#);
    }

    #[test]
    fn test_scoped_event_name() {
        assert_eq!(
            RouterEvent::scoped("COMPLETE", "task-about-you"),
            RouterEvent::fire("COMPLETE__TASK-ABOUT-YOU")
        );
    }
}
