use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized form of a finished task's result.
///
/// Failures travel through the result store exactly like values, so a waiter
/// can tell "ran and failed" apart from "never produced a result" (which is
/// signaled by the expiry sentinel instead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Value { value: Value },
    Failure { reason: String },
}

impl TaskOutcome {
    pub fn value(value: Value) -> Self {
        TaskOutcome::Value { value }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        TaskOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use serde_json::json;

    #[test]
    fn outcome_round_trip() {
        let ok = TaskOutcome::value(json!([1, 2, 3]));
        let failed = TaskOutcome::failure("division by zero");
        for outcome in [ok, failed] {
            let message = codec::serialize(&outcome).unwrap();
            let back: TaskOutcome = codec::deserialize(&message).unwrap();
            assert_eq!(back, outcome);
        }
    }

    #[test]
    fn tagged_form_is_unambiguous() {
        // A task whose value is itself an object with a "reason" key must not
        // decode as a failure.
        let outcome = TaskOutcome::value(json!({"reason": "not an error"}));
        let message = codec::serialize(&outcome).unwrap();
        let back: TaskOutcome = codec::deserialize(&message).unwrap();
        assert!(!back.is_failure());
    }
}
