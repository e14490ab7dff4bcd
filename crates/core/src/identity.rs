//! Resource identities and the external/internal mapper.

use serde::{Deserialize, Serialize};

use crate::{DynObject, DynObjectList, Error, Result};

/// Immutable descriptor of one served resource: group, version, kind and
/// the plural resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
}

impl ResourceIdentity {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            resource: resource.into(),
        }
    }

    /// Rendered `apiVersion`: `group/version`, or bare `version` for the
    /// core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }

    /// Parse an identity key: `version/Kind/resource` or
    /// `group/version/Kind/resource`.
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind, resource] => Ok(Self::new("", *version, *kind, *resource)),
            [group, version, kind, resource] => Ok(Self::new(*group, *version, *kind, *resource)),
            _ => Err(Error::Validation(format!(
                "invalid identity key: {key} (expect v1/Kind/resource or group/v1/Kind/resource)"
            ))),
        }
    }

    /// Stamp `apiVersion`/`kind` on an object. Metadata and payload stay
    /// untouched.
    pub fn stamp(&self, obj: &mut DynObject) {
        obj.set_api_version(&self.api_version());
        obj.set_kind(&self.kind);
    }

    /// Stamp a list (kind gets the `List` suffix) and every item in it.
    pub fn stamp_list(&self, list: &mut DynObjectList) {
        list.api_version = self.api_version();
        list.kind = self.list_kind();
        for item in &mut list.items {
            self.stamp(item);
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Pairs the identity callers see with the identity the backing store
/// persists under. Built once per storage instance, never mutated.
///
/// Mapping takes the object by value: callers that need to keep the
/// original make the copy explicitly, so no caller-owned object is ever
/// restamped behind its back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapper {
    pub external: ResourceIdentity,
    pub internal: ResourceIdentity,
}

impl IdentityMapper {
    pub fn new(external: ResourceIdentity, internal: ResourceIdentity) -> Self {
        Self { external, internal }
    }

    /// Return `obj` stamped with the internal identity.
    pub fn to_internal(&self, mut obj: DynObject) -> DynObject {
        self.internal.stamp(&mut obj);
        obj
    }

    /// Return `obj` stamped with the external identity.
    pub fn to_external(&self, mut obj: DynObject) -> DynObject {
        self.external.stamp(&mut obj);
        obj
    }

    /// Return `list` stamped with the external identity, items included.
    pub fn to_external_list(&self, mut list: DynObjectList) -> DynObjectList {
        self.external.stamp_list(&mut list);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> IdentityMapper {
        IdentityMapper::new(
            ResourceIdentity::new("apps.proxy.dev", "v1", "Deployment", "deployments"),
            ResourceIdentity::new("apps", "v1", "Deployment", "deployments"),
        )
    }

    #[test]
    fn api_version_omits_empty_group() {
        let core = ResourceIdentity::new("", "v1", "ConfigMap", "configmaps");
        assert_eq!(core.api_version(), "v1");
        let grouped = ResourceIdentity::new("apps", "v1", "Deployment", "deployments");
        assert_eq!(grouped.api_version(), "apps/v1");
    }

    #[test]
    fn parse_accepts_three_and_four_segments() {
        let core = ResourceIdentity::parse("v1/ConfigMap/configmaps").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.kind, "ConfigMap");
        let grouped = ResourceIdentity::parse("apps/v1/Deployment/deployments").unwrap();
        assert_eq!(grouped.group, "apps");
        assert_eq!(grouped.resource, "deployments");
        assert!(ResourceIdentity::parse("v1/ConfigMap").is_err());
        assert!(ResourceIdentity::parse("a/b/c/d/e").is_err());
    }

    #[test]
    fn stamp_touches_only_identity_fields() {
        let mut obj = DynObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "uid": "u-1", "resourceVersion": "5" },
            "spec": { "replicas": 2 },
        }))
        .unwrap();
        ResourceIdentity::new("apps.proxy.dev", "v1", "Deployment", "deployments").stamp(&mut obj);
        assert_eq!(obj.api_version(), Some("apps.proxy.dev/v1"));
        assert_eq!(obj.kind(), Some("Deployment"));
        assert_eq!(obj.name(), Some("web"));
        assert_eq!(obj.uid(), Some("u-1"));
        assert_eq!(obj.resource_version(), Some("5"));
        assert_eq!(obj.get("spec"), Some(&json!({ "replicas": 2 })));
    }

    #[test]
    fn stamp_list_suffixes_kind_and_stamps_items() {
        let mut list = DynObjectList {
            items: vec![
                DynObject::from_value(json!({ "metadata": { "name": "a" } })).unwrap(),
                DynObject::from_value(json!({ "metadata": { "name": "b" } })).unwrap(),
            ],
            ..DynObjectList::default()
        };
        ResourceIdentity::new("apps.proxy.dev", "v1", "Deployment", "deployments")
            .stamp_list(&mut list);
        assert_eq!(list.api_version, "apps.proxy.dev/v1");
        assert_eq!(list.kind, "DeploymentList");
        for item in &list.items {
            assert_eq!(item.api_version(), Some("apps.proxy.dev/v1"));
            assert_eq!(item.kind(), Some("Deployment"));
        }
        assert_eq!(list.items[0].name(), Some("a"));
    }

    #[test]
    fn internal_then_external_round_trip_restores_identity() {
        let m = mapper();
        let original = DynObject::from_value(json!({
            "apiVersion": "apps.proxy.dev/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "default", "uid": "u-9" },
            "spec": { "paused": true },
        }))
        .unwrap();
        let roundtripped = m.to_external(m.to_internal(original.clone()));
        assert_eq!(roundtripped, original);
    }
}
