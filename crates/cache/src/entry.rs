//! Cache entries as persisted in the Action Store

use serde::{Deserialize, Serialize};

/// Serialized form of [`ActionState::Started`], written by the leader's claim
pub const STARTED: &str = r#"{"status":"started"}"#;

/// Lifecycle of a single cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionState<O> {
    /// A leader is running the factory
    Started,
    /// The factory returned a value
    Completed { result: O },
    /// The factory failed or timed out
    Failed { error: FailureRecord },
}

/// Error replayed to followers; only the kind and the message survive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Timeout,
    Generic,
}

impl FailureRecord {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Generic,
            message: message.into(),
        }
    }
}

pub fn encode_completed<O: Serialize>(result: &O) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ActionState::Completed { result })
}

pub fn encode_failed(error: FailureRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ActionState::<()>::Failed { error })
}

pub fn decode<O>(raw: &str) -> Result<ActionState<O>, serde_json::Error>
where
    O: for<'de> Deserialize<'de>,
{
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_constant_matches_encoding() {
        let encoded = serde_json::to_string(&ActionState::<()>::Started).unwrap();
        assert_eq!(encoded, STARTED);
        assert_eq!(
            decode::<Vec<String>>(STARTED).unwrap(),
            ActionState::Started
        );
    }

    #[test]
    fn test_completed_entry() {
        let encoded = encode_completed(&vec!["supergraph".to_string()]).unwrap();
        assert_eq!(encoded, r#"{"status":"completed","result":["supergraph"]}"#);
        assert_eq!(
            decode::<Vec<String>>(&encoded).unwrap(),
            ActionState::Completed {
                result: vec!["supergraph".to_string()]
            }
        );
    }

    #[test]
    fn test_failed_entry_carries_kind() {
        let encoded = encode_failed(FailureRecord::timeout("took too long")).unwrap();
        assert_eq!(
            encoded,
            r#"{"status":"failed","error":{"kind":"timeout","message":"took too long"}}"#
        );
        match decode::<String>(&encoded).unwrap() {
            ActionState::Failed { error } => {
                assert_eq!(error.kind, FailureKind::Timeout);
                assert_eq!(error.message, "took too long");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(decode::<String>(r#"{"status":"pending"}"#).is_err());
    }
}
