//! Kube-backed client speaking to a real apiserver through the dynamic
//! API (`Api<DynamicObject>`).

use std::sync::Arc;

use futures::TryStreamExt;
use kube::api::{Api, DeleteParams, GetParams, ListParams, PostParams, WatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, WatchEvent as KubeWatchEvent};
use kube::Client;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use veneer_core::{
    CreateOptions, DeleteOptions, DynObject, DynObjectList, Error, GetOptions, ListQuery, Result,
    ResourceIdentity, UpdateOptions, WatchEvent,
};

use crate::{client_queue_cap, BackingClient, CancelHandle, WatchHandle};

/// Backing client for one resource on a live cluster.
#[derive(Clone)]
pub struct KubeBackingClient {
    client: Client,
    resource: ApiResource,
    namespace: Option<String>,
}

impl KubeBackingClient {
    /// Build a client for the given (internal) identity. The plural
    /// comes from the identity itself, so the proxied resource does not
    /// have to be discoverable through the target cluster's discovery
    /// documents.
    pub fn new(client: Client, identity: &ResourceIdentity) -> Self {
        let gvk = GroupVersionKind {
            group: identity.group.clone(),
            version: identity.version.clone(),
            kind: identity.kind.clone(),
        };
        let resource = ApiResource::from_gvk_with_plural(&gvk, &identity.resource);
        Self {
            client,
            resource,
            namespace: None,
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        match self.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

fn map_kube_err(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message),
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(resp.message),
        other => Error::Backend(other.to_string()),
    }
}

fn to_dynamic(obj: &DynObject) -> Result<DynamicObject> {
    serde_json::from_value(obj.clone().into_value())
        .map_err(|e| Error::Backend(format!("encoding object for the backing store: {e}")))
}

fn from_dynamic(obj: &DynamicObject) -> Result<DynObject> {
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::Backend(format!("decoding object from the backing store: {e}")))?;
    DynObject::from_value(value)
}

fn convert_event(event: KubeWatchEvent<DynamicObject>) -> Option<WatchEvent> {
    let converted = match event {
        KubeWatchEvent::Added(o) => from_dynamic(&o).map(WatchEvent::Added),
        KubeWatchEvent::Modified(o) => from_dynamic(&o).map(WatchEvent::Modified),
        KubeWatchEvent::Deleted(o) => from_dynamic(&o).map(WatchEvent::Deleted),
        KubeWatchEvent::Bookmark(_) => return None,
        KubeWatchEvent::Error(status) => serde_json::to_value(&status)
            .map_err(|e| Error::Backend(e.to_string()))
            .and_then(DynObject::from_value)
            .map(WatchEvent::Error),
    };
    match converted {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "dropping unconvertible watch event");
            None
        }
    }
}

#[async_trait::async_trait]
impl BackingClient for KubeBackingClient {
    async fn get(&self, name: &str, options: &GetOptions) -> Result<DynObject> {
        let gp = GetParams {
            resource_version: options.resource_version.clone(),
        };
        let obj = self.api().get_with(name, &gp).await.map_err(map_kube_err)?;
        from_dynamic(&obj)
    }

    async fn list(&self, query: &ListQuery) -> Result<DynObjectList> {
        let mut lp = ListParams::default();
        if let Some(selector) = &query.label_selector {
            lp = lp.labels(selector);
        }
        if let Some(selector) = &query.field_selector {
            lp = lp.fields(selector);
        }
        if let Some(limit) = query.limit {
            lp = lp.limit(limit);
        }
        if let Some(token) = &query.continue_token {
            lp = lp.continue_token(token);
        }
        lp.resource_version = query.resource_version.clone();
        let listed = self.api().list(&lp).await.map_err(map_kube_err)?;
        let mut out = DynObjectList::new();
        out.metadata.resource_version = listed.metadata.resource_version.clone();
        out.metadata.continue_token = listed.metadata.continue_.clone();
        out.items = listed
            .items
            .iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>>>()?;
        Ok(out)
    }

    async fn create(&self, obj: &DynObject, options: &CreateOptions) -> Result<DynObject> {
        let pp = PostParams {
            dry_run: options.dry_run,
            field_manager: options.field_manager.clone(),
        };
        let created = self
            .api()
            .create(&pp, &to_dynamic(obj)?)
            .await
            .map_err(map_kube_err)?;
        from_dynamic(&created)
    }

    async fn update(&self, obj: &DynObject, options: &UpdateOptions) -> Result<DynObject> {
        let name = obj
            .name()
            .ok_or_else(|| Error::Validation("object has no metadata.name".into()))?
            .to_string();
        let pp = PostParams {
            dry_run: options.dry_run,
            field_manager: options.field_manager.clone(),
        };
        let replaced = self
            .api()
            .replace(&name, &pp, &to_dynamic(obj)?)
            .await
            .map_err(map_kube_err)?;
        from_dynamic(&replaced)
    }

    async fn delete(&self, name: &str, options: &DeleteOptions) -> Result<()> {
        let dp = DeleteParams {
            dry_run: options.dry_run,
            grace_period_seconds: options.grace_period_seconds,
            preconditions: options.preconditions.as_ref().map(|p| kube::api::Preconditions {
                uid: p.uid.clone(),
                resource_version: p.resource_version.clone(),
            }),
            ..DeleteParams::default()
        };
        self.api()
            .delete(name, &dp)
            .await
            .map(|_| ())
            .map_err(map_kube_err)
    }

    async fn watch(&self, query: &ListQuery) -> Result<WatchHandle> {
        let mut wp = WatchParams::default();
        if let Some(selector) = &query.label_selector {
            wp = wp.labels(selector);
        }
        if let Some(selector) = &query.field_selector {
            wp = wp.fields(selector);
        }
        // The event model has no bookmark variant.
        wp.bookmarks = false;
        let version = query.resource_version.clone().unwrap_or_default();
        let stream = self.api().watch(&wp, &version).await.map_err(map_kube_err)?;

        let (tx, rx) = mpsc::channel(client_queue_cap());
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("kube watch pump cancelled");
                        break;
                    }
                    next = stream.try_next() => match next {
                        Ok(Some(event)) => {
                            let Some(event) = convert_event(event) else { continue };
                            if tx.send(event).await.is_err() {
                                // Consumer gone.
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("kube watch stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "kube watch stream failed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(WatchHandle {
            rx,
            cancel: CancelHandle::new(cancel_tx),
        })
    }

    fn with_namespace(&self, namespace: &str) -> Arc<dyn BackingClient> {
        Arc::new(Self {
            client: self.client.clone(),
            resource: self.resource.clone(),
            namespace: Some(namespace.to_string()),
        })
    }
}
