//! Declarative wiring: proxy rules and the per-group storage set the
//! surrounding server installs into its route table.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use veneer_client::BackingClient;
use veneer_core::{Error, IdentityMapper, ResourceIdentity, Result};

use crate::ProxyStorage;

/// One proxied resource: the identity callers see, the identity the
/// backing store persists under, and the serving attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    pub external: ResourceIdentity,
    pub internal: ResourceIdentity,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default)]
    pub short_names: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Storages for one API group/version, keyed by lowercased resource
/// name.
pub struct StorageSet {
    group: String,
    version: String,
    by_resource: HashMap<String, Arc<ProxyStorage>>,
}

impl std::fmt::Debug for StorageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSet")
            .field("group", &self.group)
            .field("version", &self.version)
            .field("resources", &self.by_resource.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StorageSet {
    /// Build storages from rules. `make_client` receives each rule's
    /// internal identity and returns the backing client to persist
    /// through. All external identities must share one group/version and
    /// resource names must be unique within the set.
    pub fn build<F>(rules: &[ProxyRule], mut make_client: F) -> Result<Self>
    where
        F: FnMut(&ResourceIdentity) -> Arc<dyn BackingClient>,
    {
        let first = rules
            .first()
            .ok_or_else(|| Error::Validation("no proxy rules given".into()))?;
        let group = first.external.group.clone();
        let version = first.external.version.clone();
        let mut by_resource = HashMap::new();
        for rule in rules {
            if rule.external.group != group || rule.external.version != version {
                return Err(Error::Validation(format!(
                    "rule for {} does not belong to group/version {}/{}",
                    rule.external.resource, group, version
                )));
            }
            let key = rule.external.resource.to_lowercase();
            let backing = make_client(&rule.internal);
            let storage = ProxyStorage::new(
                IdentityMapper::new(rule.external.clone(), rule.internal.clone()),
                rule.namespaced,
                rule.short_names.clone(),
                rule.categories.clone(),
                backing,
            );
            if by_resource.insert(key.clone(), Arc::new(storage)).is_some() {
                return Err(Error::Validation(format!(
                    "duplicate resource name: {key}"
                )));
            }
            info!(
                resource = %key,
                external = %rule.external,
                internal = %rule.internal,
                "registry: storage installed"
            );
        }
        Ok(Self {
            group,
            version,
            by_resource,
        })
    }

    /// Group/version every storage in this set serves under.
    pub fn group_version(&self) -> (&str, &str) {
        (&self.group, &self.version)
    }

    pub fn get(&self, resource: &str) -> Option<&Arc<ProxyStorage>> {
        self.by_resource.get(&resource.to_lowercase())
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.by_resource.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veneer_client::MemBackingClient;

    fn rule(resource: &str, kind: &str) -> ProxyRule {
        ProxyRule {
            external: ResourceIdentity::new("apps.proxy.dev", "v1", kind, resource),
            internal: ResourceIdentity::new("apps", "v1", kind, resource),
            namespaced: true,
            short_names: vec![],
            categories: vec![],
        }
    }

    fn make_client(_identity: &ResourceIdentity) -> Arc<dyn BackingClient> {
        Arc::new(MemBackingClient::new())
    }

    #[test]
    fn builds_a_set_keyed_by_lowercased_resource() {
        let rules = vec![rule("Deployments", "Deployment"), rule("statefulsets", "StatefulSet")];
        let set = StorageSet::build(&rules, make_client).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.group_version(), ("apps.proxy.dev", "v1"));
        let storage = set.get("deployments").expect("installed");
        assert!(storage.namespace_scoped());
        assert_eq!(storage.resource(), "Deployments");
        assert!(set.get("DEPLOYMENTS").is_some());
    }

    #[test]
    fn rejects_empty_rule_sets() {
        assert!(StorageSet::build(&[], make_client).is_err());
    }

    #[test]
    fn rejects_duplicate_resources() {
        let rules = vec![rule("deployments", "Deployment"), rule("Deployments", "Deployment")];
        let err = StorageSet::build(&rules, make_client).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn rejects_mixed_group_versions() {
        let mut other = rule("jobs", "Job");
        other.external.group = "batch.proxy.dev".into();
        let rules = vec![rule("deployments", "Deployment"), other];
        let err = StorageSet::build(&rules, make_client).unwrap_err();
        assert!(err.to_string().contains("group/version"), "{err}");
    }
}
