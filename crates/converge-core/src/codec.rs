use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a task, result, or status payload to its wire form.
///
/// JSON is used throughout because task arguments and results are arbitrary
/// self-describing values; any byte-exact codec with round-trip fidelity
/// would satisfy the backend contract.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a wire message produced by [`serialize`].
pub fn deserialize<T: DeserializeOwned>(message: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn value_round_trip() {
        let value = json!({"n": 42, "items": ["a", "b"], "nested": {"ok": true}});
        let message = serialize(&value).unwrap();
        let back: Value = deserialize(&message).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn malformed_message_is_an_error() {
        assert!(deserialize::<Value>(b"not json").is_err());
    }

    proptest! {
        #[test]
        fn task_round_trip(name in "[a-z][a-z0-9_.]{0,24}", n in any::<i64>(), s in ".{0,64}") {
            let task = Task::new(&name, vec![json!(n), json!(s)]);
            let message = serialize(&task).unwrap();
            let back: Task = deserialize(&message).unwrap();
            prop_assert_eq!(back, task);
        }
    }
}
