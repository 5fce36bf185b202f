//! Operation type guard
//!
//! The narrowest choke point of the pipeline: everything upstream is untrusted,
//! everything downstream of a `true` result is treated as protocol-valid. The guard
//! looks at the `type` tag only, so its cost is constant and it never walks into
//! nested (possibly huge) payloads.

use super::operation::{DomOperation, OperationKind};
use serde_json::Value;
use std::fmt;

/// Longest `type` string worth comparing against the whitelist
pub const MAX_TYPE_LEN: usize = 64;

/// Default ceiling for a single serialized operation emitted by a guest
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Why a raw guest operation was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Serialized operation exceeded the payload ceiling
    PayloadTooLarge { size: usize, max: usize },
    /// Not valid JSON
    Malformed(String),
    /// Failed the type guard
    NotAnOperation,
    /// Tag was valid but the variant fields were not
    InvalidShape { kind: OperationKind, reason: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PayloadTooLarge { size, max } => {
                write!(f, "operation payload too large ({} > {} bytes)", size, max)
            }
            RejectReason::Malformed(e) => write!(f, "malformed operation: {}", e),
            RejectReason::NotAnOperation => f.write_str("not a recognised operation"),
            RejectReason::InvalidShape { kind, reason } => {
                write!(f, "invalid {} operation: {}", kind, reason)
            }
        }
    }
}

/// Stateless structural validator for tree mutation operations
#[derive(Debug, Clone)]
pub struct OperationValidator {
    max_payload_bytes: usize,
}

impl Default for OperationValidator {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl OperationValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ceiling applied by [`decode`](Self::decode)
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Type guard: `true` only for objects whose `type` is a whitelisted tag.
    ///
    /// Never panics and never inspects anything but the `type` field.
    pub fn validate(&self, candidate: &Value) -> bool {
        self.kind_of(candidate).is_some()
    }

    /// The operation tag of a candidate that passes the guard
    pub fn kind_of(&self, candidate: &Value) -> Option<OperationKind> {
        let object = candidate.as_object()?;
        let tag = object.get("type")?.as_str()?;
        if tag.is_empty() || tag.len() > MAX_TYPE_LEN {
            return None;
        }
        tag.parse().ok()
    }

    /// Keep the valid entries of an untrusted batch, in order
    pub fn filter_valid<'a>(&self, candidates: &'a [Value]) -> Vec<&'a Value> {
        candidates.iter().filter(|c| self.validate(c)).collect()
    }

    /// Convert a guarded candidate into a typed operation
    pub fn parse(&self, candidate: &Value) -> Result<DomOperation, RejectReason> {
        let kind = self.kind_of(candidate).ok_or(RejectReason::NotAnOperation)?;
        serde_json::from_value(candidate.clone()).map_err(|e| RejectReason::InvalidShape {
            kind,
            reason: e.to_string(),
        })
    }

    /// Decode a serialized operation emitted by guest code
    pub fn decode(&self, raw: &str) -> Result<DomOperation, RejectReason> {
        if raw.len() > self.max_payload_bytes {
            return Err(RejectReason::PayloadTooLarge {
                size: raw.len(),
                max: self.max_payload_bytes,
            });
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RejectReason::Malformed(e.to_string()))?;
        self.parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_all_seven_tags() {
        let validator = OperationValidator::new();
        for kind in OperationKind::ALL {
            assert!(validator.validate(&json!({"type": kind.as_str()})), "{}", kind);
        }
    }

    #[test]
    fn test_spec_examples() {
        let validator = OperationValidator::new();
        assert!(!validator.validate(&json!({"type": "executeScript"})));
        assert!(validator.validate(&json!({"type": "createElement", "id": "e1", "tag": "div"})));
    }

    #[test]
    fn test_rejects_non_objects() {
        let validator = OperationValidator::new();
        let rejected = [
            Value::Null,
            json!([{"type": "createElement"}]),
            json!("createElement"),
            json!(42),
            json!(true),
            json!({}),
            json!({"type": 1}),
            json!({"type": null}),
            json!({"type": ""}),
            json!({"type": {"nested": "createElement"}}),
            json!({"type": "CreateElement"}),
            json!({"type": format!("createElement{}", "x".repeat(100))}),
        ];
        for candidate in &rejected {
            assert!(!validator.validate(candidate), "{}", candidate);
        }
    }

    #[test]
    fn test_filter_valid_keeps_order_and_drops_junk() {
        let validator = OperationValidator::new();
        let batch = vec![
            json!({"type": "createElement", "id": "a", "tag": "div"}),
            Value::Null,
            json!({"type": "eval"}),
            json!({"type": "appendChild", "parentId": "root", "childId": "a"}),
        ];
        let kept = validator.filter_valid(&batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0]["id"], "a");
        assert_eq!(kept[1]["type"], "appendChild");
    }

    #[test]
    fn test_guard_ignores_deep_payloads() {
        let validator = OperationValidator::new();
        let mut deep = json!("leaf");
        for _ in 0..500 {
            deep = json!({ "child": deep });
        }
        let candidate = json!({"type": "callHost", "action": "noop", "payload": deep});
        assert!(validator.validate(&candidate));
    }

    #[test]
    fn test_parse_reports_shape_errors() {
        let validator = OperationValidator::new();
        let err = validator
            .parse(&json!({"type": "appendChild", "parentId": "root"}))
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::InvalidShape {
                kind: OperationKind::AppendChild,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_enforces_payload_ceiling() {
        let validator = OperationValidator::new().with_max_payload_bytes(32);
        let raw = json!({"type": "setTextContent", "elementId": "e1", "text": "x".repeat(64)})
            .to_string();
        assert!(matches!(
            validator.decode(&raw),
            Err(RejectReason::PayloadTooLarge { max: 32, .. })
        ));
        assert!(matches!(
            validator.decode("{not json"),
            Err(RejectReason::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_valid_operation() {
        let validator = OperationValidator::new();
        let op = validator
            .decode(r#"{"type":"addEventListener","elementId":"b1","event":"click","handlerId":"h1"}"#)
            .unwrap();
        assert_eq!(
            op,
            DomOperation::AddEventListener {
                element_id: "b1".into(),
                event: "click".into(),
                handler_id: "h1".into(),
            }
        );
    }
}
