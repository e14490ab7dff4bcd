//! Watch events in the Kubernetes wire shape.

use serde::{Deserialize, Serialize};

use crate::DynObject;

/// A single change notification from a watch stream, serialized as
/// `{"type": "ADDED", "object": {...}}`.
///
/// `Error` carries a status document rather than a resource and is
/// exempt from identity remapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchEvent {
    Added(DynObject),
    Modified(DynObject),
    Deleted(DynObject),
    Error(DynObject),
}

impl WatchEvent {
    /// The carried document, status object included.
    pub fn object(&self) -> &DynObject {
        match self {
            WatchEvent::Added(obj)
            | WatchEvent::Modified(obj)
            | WatchEvent::Deleted(obj)
            | WatchEvent::Error(obj) => obj,
        }
    }

    /// Mutable access to the carried resource; `None` for `Error`
    /// events, which must pass through unmodified.
    pub fn resource_mut(&mut self) -> Option<&mut DynObject> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                Some(obj)
            }
            WatchEvent::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WatchEvent::Error(_))
    }

    /// Wire name of the event kind, for logs.
    pub fn kind_str(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
            WatchEvent::Error(_) => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_in_wire_shape() {
        let obj = DynObject::from_value(json!({ "metadata": { "name": "web" } })).unwrap();
        let value = serde_json::to_value(WatchEvent::Added(obj)).unwrap();
        assert_eq!(value["type"], "ADDED");
        assert_eq!(value["object"]["metadata"]["name"], "web");
    }

    #[test]
    fn deserializes_error_events() {
        let value = json!({
            "type": "ERROR",
            "object": { "kind": "Status", "apiVersion": "v1", "code": 410 },
        });
        let event: WatchEvent = serde_json::from_value(value).unwrap();
        assert!(event.is_error());
        assert_eq!(event.kind_str(), "ERROR");
    }

    #[test]
    fn resource_mut_excludes_error_events() {
        let obj = DynObject::from_value(json!({ "kind": "Status" })).unwrap();
        let mut event = WatchEvent::Error(obj);
        assert!(event.resource_mut().is_none());
        let obj = DynObject::from_value(json!({ "metadata": { "name": "x" } })).unwrap();
        let mut event = WatchEvent::Modified(obj);
        assert!(event.resource_mut().is_some());
    }
}
