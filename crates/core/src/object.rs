//! Schema-agnostic object documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// One resource instance as an opaque JSON document: `apiVersion`,
/// `kind`, a `metadata` sub-document, and whatever payload the backing
/// store holds. Identity stamping only ever touches `apiVersion`/`kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynObject(Map<String, Value>);

impl DynObject {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value; anything but an object document is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Validation(format!(
                "expected an object document, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    pub fn set_api_version(&mut self, api_version: &str) {
        self.0
            .insert("apiVersion".into(), Value::String(api_version.into()));
    }

    pub fn set_kind(&mut self, kind: &str) {
        self.0.insert("kind".into(), Value::String(kind.into()));
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let slot = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("metadata slot was just made an object"),
        }
    }

    fn meta_str(&self, field: &str) -> Option<&str> {
        self.metadata().and_then(|m| m.get(field)).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.meta_str("name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta_str("namespace")
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta_str("uid")
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta_str("resourceVersion")
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut().insert("name".into(), Value::String(name.into()));
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".into(), Value::String(namespace.into()));
    }

    pub fn set_uid(&mut self, uid: &str) {
        self.metadata_mut().insert("uid".into(), Value::String(uid.into()));
    }

    pub fn set_resource_version(&mut self, resource_version: &str) {
        self.metadata_mut().insert(
            "resourceVersion".into(),
            Value::String(resource_version.into()),
        );
    }
}

impl From<Map<String, Value>> for DynObject {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// List-level metadata forwarded from the backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// An ordered list of objects. Item order follows the backing store's
/// response; the list is never re-sorted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynObjectList {
    pub api_version: String,
    pub kind: String,
    pub metadata: ListMeta,
    pub items: Vec<DynObject>,
}

impl DynObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_on_empty_object() {
        let obj = DynObject::new();
        assert_eq!(obj.api_version(), None);
        assert_eq!(obj.kind(), None);
        assert_eq!(obj.name(), None);
        assert_eq!(obj.uid(), None);
    }

    #[test]
    fn from_value_rejects_non_objects() {
        let err = DynObject::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("an array"), "{err}");
    }

    #[test]
    fn setters_create_metadata_on_demand() {
        let mut obj = DynObject::new();
        obj.set_name("web");
        obj.set_namespace("default");
        obj.set_uid("u-1");
        obj.set_resource_version("7");
        assert_eq!(obj.name(), Some("web"));
        assert_eq!(obj.namespace(), Some("default"));
        assert_eq!(obj.uid(), Some("u-1"));
        assert_eq!(obj.resource_version(), Some("7"));
    }

    #[test]
    fn payload_survives_serde_round_trip() {
        let value = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": { "replicas": 3 },
        });
        let obj = DynObject::from_value(value.clone()).unwrap();
        assert_eq!(obj.get("spec"), Some(&json!({ "replicas": 3 })));
        assert_eq!(obj.into_value(), value);
    }

    #[test]
    fn list_serde_uses_wire_field_names() {
        let list = DynObjectList {
            api_version: "apps/v1".into(),
            kind: "DeploymentList".into(),
            metadata: ListMeta {
                resource_version: Some("42".into()),
                continue_token: Some("tok".into()),
            },
            items: vec![],
        };
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["metadata"]["continue"], "tok");
        assert_eq!(value["metadata"]["resourceVersion"], "42");
    }
}
