//! In-memory backing client: a small real object store for tests and
//! demos. It counts calls and lets tests script failures, so the storage
//! tests can verify exactly which backing operations the adapter issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use veneer_core::{
    CreateOptions, DeleteOptions, DynObject, DynObjectList, Error, GetOptions, ListQuery, Result,
    UpdateOptions, WatchEvent,
};

use crate::{client_queue_cap, BackingClient, CancelHandle, WatchHandle};

/// Backing operations a test can count or script a failure for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackingOp {
    Get,
    List,
    Create,
    Update,
    Delete,
    Watch,
}

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    list: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    watch: AtomicUsize,
}

impl Counters {
    fn slot(&self, op: BackingOp) -> &AtomicUsize {
        match op {
            BackingOp::Get => &self.get,
            BackingOp::List => &self.list,
            BackingOp::Create => &self.create,
            BackingOp::Update => &self.update,
            BackingOp::Delete => &self.delete,
            BackingOp::Watch => &self.watch,
        }
    }
}

type Key = (Option<String>, String);

struct Inner {
    objects: Mutex<BTreeMap<Key, DynObject>>,
    next_rv: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    counters: Counters,
    fail_next: Mutex<HashMap<BackingOp, Error>>,
    fail_delete_of: Mutex<HashMap<String, Error>>,
}

/// Shared-state in-memory store; `with_namespace` hands out scoped views
/// over the same data.
pub struct MemBackingClient {
    inner: Arc<Inner>,
    namespace: Option<String>,
}

impl MemBackingClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                objects: Mutex::new(BTreeMap::new()),
                next_rv: AtomicU64::new(1),
                events,
                counters: Counters::default(),
                fail_next: Mutex::new(HashMap::new()),
                fail_delete_of: Mutex::new(HashMap::new()),
            }),
            namespace: None,
        }
    }

    /// Calls seen for `op`, across all scoped views.
    pub fn calls(&self, op: BackingOp) -> usize {
        self.inner.counters.slot(op).load(Ordering::SeqCst)
    }

    /// Fail the next call of `op` with `err`; consumed by that call.
    pub fn fail_next(&self, op: BackingOp, err: Error) {
        self.inner
            .fail_next
            .lock()
            .expect("lock poisoned")
            .insert(op, err);
    }

    /// Fail the next delete of the named object with `err`.
    pub fn fail_delete_of(&self, name: &str, err: Error) {
        self.inner
            .fail_delete_of
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), err);
    }

    /// Raw stored copy, exactly as the backing store holds it.
    pub fn stored(&self, namespace: Option<&str>, name: &str) -> Option<DynObject> {
        self.inner
            .objects
            .lock()
            .expect("lock poisoned")
            .get(&(namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    /// Insert directly, bypassing create semantics and events. Missing
    /// uid/resourceVersion are filled in; the stored copy is returned.
    pub fn seed(&self, namespace: Option<&str>, mut obj: DynObject) -> Result<DynObject> {
        let name = obj
            .name()
            .ok_or_else(|| Error::Validation("seeded object has no metadata.name".into()))?
            .to_string();
        if obj.uid().is_none() {
            obj.set_uid(&Uuid::new_v4().to_string());
        }
        if obj.resource_version().is_none() {
            obj.set_resource_version(&self.bump_rv());
        }
        self.inner
            .objects
            .lock()
            .expect("lock poisoned")
            .insert((namespace.map(str::to_string), name), obj.clone());
        Ok(obj)
    }

    fn bump_rv(&self) -> String {
        self.inner.next_rv.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn current_rv(&self) -> String {
        self.inner.next_rv.load(Ordering::SeqCst).to_string()
    }

    fn take_failure(&self, op: BackingOp) -> Result<()> {
        self.inner.counters.slot(op).fetch_add(1, Ordering::SeqCst);
        match self
            .inner
            .fail_next
            .lock()
            .expect("lock poisoned")
            .remove(&op)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn key(&self, name: &str) -> Key {
        (self.namespace.clone(), name.to_string())
    }

    /// Scoped lookup: exact key when namespaced, first name match when
    /// the view is cluster-wide.
    fn lookup(&self, name: &str) -> Option<(Key, DynObject)> {
        let objects = self.inner.objects.lock().expect("lock poisoned");
        match &self.namespace {
            Some(_) => {
                let key = self.key(name);
                objects.get(&key).cloned().map(|obj| (key, obj))
            }
            None => objects
                .iter()
                .find(|((_, n), _)| n == name)
                .map(|(key, obj)| (key.clone(), obj.clone())),
        }
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

impl Default for MemBackingClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality-only label selector matching (`k=v,k2=v2`); expression
/// selectors are not understood by this store.
fn matches_labels(obj: &DynObject, selector: Option<&str>) -> bool {
    let Some(selector) = selector else { return true };
    let labels = obj
        .metadata()
        .and_then(|m| m.get("labels"))
        .and_then(|v| v.as_object());
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => {
                labels.and_then(|l| l.get(k.trim())).and_then(|x| x.as_str()) == Some(v.trim())
            }
            None => true,
        })
}

fn in_scope(event: &WatchEvent, scope: Option<&str>) -> bool {
    match scope {
        None => true,
        Some(ns) => event.is_error() || event.object().namespace() == Some(ns),
    }
}

#[async_trait::async_trait]
impl BackingClient for MemBackingClient {
    async fn get(&self, name: &str, _options: &GetOptions) -> Result<DynObject> {
        self.take_failure(BackingOp::Get)?;
        self.lookup(name)
            .map(|(_, obj)| obj)
            .ok_or_else(|| Error::NotFound(format!("object {name:?} not found")))
    }

    async fn list(&self, query: &ListQuery) -> Result<DynObjectList> {
        self.take_failure(BackingOp::List)?;
        let objects = self.inner.objects.lock().expect("lock poisoned");
        let mut items: Vec<DynObject> = objects
            .iter()
            .filter(|((ns, _), _)| match &self.namespace {
                Some(scope) => ns.as_deref() == Some(scope.as_str()),
                None => true,
            })
            .map(|(_, obj)| obj.clone())
            .filter(|obj| matches_labels(obj, query.label_selector.as_deref()))
            .collect();
        drop(objects);
        if let Some(limit) = query.limit {
            items.truncate(limit as usize);
        }
        let mut list = DynObjectList::new();
        list.metadata.resource_version = Some(self.current_rv());
        list.items = items;
        Ok(list)
    }

    async fn create(&self, obj: &DynObject, _options: &CreateOptions) -> Result<DynObject> {
        self.take_failure(BackingOp::Create)?;
        let name = obj
            .name()
            .ok_or_else(|| Error::Validation("object has no metadata.name".into()))?
            .to_string();
        let key = self.key(&name);
        let mut stored = obj.clone();
        if stored.uid().is_none() {
            stored.set_uid(&Uuid::new_v4().to_string());
        }
        stored.set_resource_version(&self.bump_rv());
        {
            let mut objects = self.inner.objects.lock().expect("lock poisoned");
            if objects.contains_key(&key) {
                return Err(Error::Conflict(format!("object {name:?} already exists")));
            }
            objects.insert(key, stored.clone());
        }
        self.publish(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, obj: &DynObject, _options: &UpdateOptions) -> Result<DynObject> {
        self.take_failure(BackingOp::Update)?;
        let name = obj
            .name()
            .ok_or_else(|| Error::Validation("object has no metadata.name".into()))?
            .to_string();
        let (key, existing) = self
            .lookup(&name)
            .ok_or_else(|| Error::NotFound(format!("object {name:?} not found")))?;
        let mut stored = obj.clone();
        if stored.uid().is_none() {
            if let Some(uid) = existing.uid() {
                stored.set_uid(uid);
            }
        }
        stored.set_resource_version(&self.bump_rv());
        self.inner
            .objects
            .lock()
            .expect("lock poisoned")
            .insert(key, stored.clone());
        self.publish(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, name: &str, options: &DeleteOptions) -> Result<()> {
        if let Some(err) = self
            .inner
            .fail_delete_of
            .lock()
            .expect("lock poisoned")
            .remove(name)
        {
            self.inner
                .counters
                .slot(BackingOp::Delete)
                .fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        self.take_failure(BackingOp::Delete)?;
        let (key, existing) = self
            .lookup(name)
            .ok_or_else(|| Error::NotFound(format!("object {name:?} not found")))?;
        if let Some(pc) = &options.preconditions {
            if let Some(expect) = pc.uid.as_deref() {
                if existing.uid() != Some(expect) {
                    return Err(Error::Conflict(format!(
                        "uid precondition failed for {name:?}"
                    )));
                }
            }
            if let Some(expect) = pc.resource_version.as_deref() {
                if existing.resource_version() != Some(expect) {
                    return Err(Error::Conflict(format!(
                        "resourceVersion precondition failed for {name:?}"
                    )));
                }
            }
        }
        self.inner
            .objects
            .lock()
            .expect("lock poisoned")
            .remove(&key);
        self.publish(WatchEvent::Deleted(existing));
        Ok(())
    }

    async fn watch(&self, _query: &ListQuery) -> Result<WatchHandle> {
        self.take_failure(BackingOp::Watch)?;
        let mut sub = self.inner.events.subscribe();
        let scope = self.namespace.clone();
        let (tx, rx) = mpsc::channel(client_queue_cap());
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = sub.recv() => match next {
                        Ok(event) => {
                            if !in_scope(&event, scope.as_deref()) {
                                continue;
                            }
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "mem watch subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
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
            inner: Arc::clone(&self.inner),
            namespace: Some(namespace.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn obj(name: &str, ns: &str) -> DynObject {
        DynObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": ns },
        }))
        .expect("object document")
    }

    #[tokio::test]
    async fn create_assigns_uid_and_resource_version() {
        let mem = MemBackingClient::new();
        let scoped = mem.with_namespace("default");
        let created = scoped
            .create(&obj("web", "default"), &CreateOptions::default())
            .await
            .unwrap();
        assert!(created.uid().is_some());
        assert!(created.resource_version().is_some());
        assert_eq!(mem.calls(BackingOp::Create), 1);
        assert!(mem.stored(Some("default"), "web").is_some());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let mem = MemBackingClient::new();
        let scoped = mem.with_namespace("default");
        scoped
            .create(&obj("web", "default"), &CreateOptions::default())
            .await
            .unwrap();
        let err = scoped
            .create(&obj("web", "default"), &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_of_missing_object_is_not_found() {
        let mem = MemBackingClient::new();
        let err = mem
            .with_namespace("default")
            .update(&obj("ghost", "default"), &UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_honors_scope_labels_and_limit() {
        let mem = MemBackingClient::new();
        let ns1 = mem.with_namespace("ns1");
        let ns2 = mem.with_namespace("ns2");
        let mut labeled = obj("a", "ns1");
        labeled.insert("metadata", json!({ "name": "a", "namespace": "ns1", "labels": { "app": "web" } }));
        ns1.create(&labeled, &CreateOptions::default()).await.unwrap();
        ns1.create(&obj("b", "ns1"), &CreateOptions::default()).await.unwrap();
        ns2.create(&obj("c", "ns2"), &CreateOptions::default()).await.unwrap();

        let all_ns1 = ns1.list(&ListQuery::default()).await.unwrap();
        assert_eq!(all_ns1.len(), 2);

        let selected = ns1
            .list(&ListQuery {
                label_selector: Some("app=web".into()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.items[0].name(), Some("a"));

        let limited = ns1
            .list(&ListQuery {
                limit: Some(1),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let everything = mem.list(&ListQuery::default()).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn watch_filters_by_namespace() {
        let mem = MemBackingClient::new();
        let ns1 = mem.with_namespace("ns1");
        let ns2 = mem.with_namespace("ns2");
        let mut handle = ns1.watch(&ListQuery::default()).await.unwrap();

        ns2.create(&obj("other", "ns2"), &CreateOptions::default())
            .await
            .unwrap();
        ns1.create(&obj("mine", "ns1"), &CreateOptions::default())
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), handle.rx.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        assert_eq!(event.object().name(), Some("mine"));
        handle.cancel.cancel();
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let mem = MemBackingClient::new();
        let scoped = mem.with_namespace("default");
        scoped
            .create(&obj("web", "default"), &CreateOptions::default())
            .await
            .unwrap();
        mem.fail_next(BackingOp::Get, Error::Backend("etcd sneeze".into()));
        let err = scoped
            .get("web", &GetOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::Backend("etcd sneeze".into()));
        assert!(scoped.get("web", &GetOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn delete_honors_preconditions() {
        let mem = MemBackingClient::new();
        let scoped = mem.with_namespace("default");
        let created = scoped
            .create(&obj("web", "default"), &CreateOptions::default())
            .await
            .unwrap();
        let wrong = DeleteOptions {
            preconditions: Some(veneer_core::Preconditions {
                uid: Some("someone-else".into()),
                resource_version: None,
            }),
            ..DeleteOptions::default()
        };
        assert!(scoped.delete("web", &wrong).await.unwrap_err().is_conflict());
        let right = DeleteOptions {
            preconditions: Some(veneer_core::Preconditions {
                uid: created.uid().map(str::to_string),
                resource_version: None,
            }),
            ..DeleteOptions::default()
        };
        scoped.delete("web", &right).await.unwrap();
        assert!(mem.stored(Some("default"), "web").is_none());
    }
}
