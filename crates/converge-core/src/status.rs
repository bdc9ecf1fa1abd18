use crate::codec;
use crate::error::Result;
use serde_json::Value;

/// Fixed status tokens, stored on the wire as raw bytes (no JSON quoting).
///
/// A reader distinguishes these from application status payloads by exact
/// membership test before attempting deserialization; a custom status that
/// happens to be the string `"processing"` serializes with quotes and can
/// never collide with a token.
pub const STATUS_VALUES: &[&str] = &["enqueued", "processing", "completed"];

/// Marker stored in a result slot whose task expired before producing a
/// result. Deliberately not valid JSON, so it is distinct from every
/// legitimate serialized result.
pub const TASK_EXPIRED: &[u8] = b"<task expired>";

/// Status of a tracked task: one of the fixed lifecycle values or an
/// arbitrary payload reported by the running task itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Enqueued,
    Processing,
    Completed,
    Custom(Value),
}

impl Status {
    /// The raw wire token for fixed values, `None` for custom payloads.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            Status::Enqueued => Some("enqueued"),
            Status::Processing => Some("processing"),
            Status::Completed => Some("completed"),
            Status::Custom(_) => None,
        }
    }

    fn from_token(message: &[u8]) -> Option<Status> {
        match message {
            b"enqueued" => Some(Status::Enqueued),
            b"processing" => Some(Status::Processing),
            b"completed" => Some(Status::Completed),
            _ => None,
        }
    }

    /// Encode for the backend status store.
    pub fn to_message(&self) -> Result<Vec<u8>> {
        match self.token() {
            Some(token) => Ok(token.as_bytes().to_vec()),
            None => match self {
                Status::Custom(value) => codec::serialize(value),
                _ => unreachable!("fixed values always have a token"),
            },
        }
    }

    /// Decode a message read back from the backend status store.
    pub fn from_message(message: &[u8]) -> Result<Status> {
        if let Some(status) = Status::from_token(message) {
            return Ok(status);
        }
        Ok(Status::Custom(codec::deserialize(message)?))
    }
}
