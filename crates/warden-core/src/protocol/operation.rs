//! Remote tree mutation operations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A structural mutation of the host's remote tree.
///
/// Handles (`id`, `element_id`, ...) are opaque strings scoped to a rendering
/// session. The sandbox forwards them without dereferencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomOperation {
    CreateElement {
        id: String,
        tag: String,
        #[serde(default)]
        props: Map<String, Value>,
    },
    SetAttribute {
        element_id: String,
        name: String,
        value: Value,
    },
    AppendChild {
        parent_id: String,
        child_id: String,
    },
    RemoveChild {
        parent_id: String,
        child_id: String,
    },
    SetTextContent {
        element_id: String,
        text: String,
    },
    AddEventListener {
        element_id: String,
        event: String,
        handler_id: String,
    },
    CallHost {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

impl DomOperation {
    /// The variant tag of this operation
    pub fn kind(&self) -> OperationKind {
        match self {
            DomOperation::CreateElement { .. } => OperationKind::CreateElement,
            DomOperation::SetAttribute { .. } => OperationKind::SetAttribute,
            DomOperation::AppendChild { .. } => OperationKind::AppendChild,
            DomOperation::RemoveChild { .. } => OperationKind::RemoveChild,
            DomOperation::SetTextContent { .. } => OperationKind::SetTextContent,
            DomOperation::AddEventListener { .. } => OperationKind::AddEventListener,
            DomOperation::CallHost { .. } => OperationKind::CallHost,
        }
    }

    /// Whether the host must apply this operation without waiting for a batch
    pub fn requires_immediate_delivery(&self) -> bool {
        matches!(self, DomOperation::CallHost { .. })
    }
}

/// The closed set of operation tags accepted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    CreateElement,
    SetAttribute,
    AppendChild,
    RemoveChild,
    SetTextContent,
    AddEventListener,
    CallHost,
}

impl OperationKind {
    /// Every accepted tag
    pub const ALL: [OperationKind; 7] = [
        OperationKind::CreateElement,
        OperationKind::SetAttribute,
        OperationKind::AppendChild,
        OperationKind::RemoveChild,
        OperationKind::SetTextContent,
        OperationKind::AddEventListener,
        OperationKind::CallHost,
    ];

    /// Get the wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateElement => "createElement",
            OperationKind::SetAttribute => "setAttribute",
            OperationKind::AppendChild => "appendChild",
            OperationKind::RemoveChild => "removeChild",
            OperationKind::SetTextContent => "setTextContent",
            OperationKind::AddEventListener => "addEventListener",
            OperationKind::CallHost => "callHost",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createElement" => Ok(OperationKind::CreateElement),
            "setAttribute" => Ok(OperationKind::SetAttribute),
            "appendChild" => Ok(OperationKind::AppendChild),
            "removeChild" => Ok(OperationKind::RemoveChild),
            "setTextContent" => Ok(OperationKind::SetTextContent),
            "addEventListener" => Ok(OperationKind::AddEventListener),
            "callHost" => Ok(OperationKind::CallHost),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_uses_camel_case() {
        let op = DomOperation::SetAttribute {
            element_id: "e1".into(),
            name: "class".into(),
            value: json!("primary"),
        };
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(
            wire,
            json!({"type": "setAttribute", "elementId": "e1", "name": "class", "value": "primary"})
        );
    }

    #[test]
    fn test_create_element_props_default() {
        let op: DomOperation =
            serde_json::from_value(json!({"type": "createElement", "id": "e1", "tag": "div"}))
                .unwrap();
        assert_eq!(op.kind(), OperationKind::CreateElement);
        match op {
            DomOperation::CreateElement { props, .. } => assert!(props.is_empty()),
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_kind_tags_parse_back() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>(), Ok(kind));
        }
        assert!("executeScript".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_only_call_host_is_immediate() {
        let call = DomOperation::CallHost {
            action: "navigate".into(),
            payload: json!({"to": "/home"}),
        };
        let text = DomOperation::SetTextContent {
            element_id: "e1".into(),
            text: "hi".into(),
        };
        assert!(call.requires_immediate_delivery());
        assert!(!text.requires_immediate_delivery());
    }
}
