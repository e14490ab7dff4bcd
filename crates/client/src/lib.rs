//! Backing object-store clients: the capability trait the storage
//! adapter delegates all persistence to, a kube-backed implementation
//! over the dynamic API, and an in-memory one for tests and demos.

#![forbid(unsafe_code)]

mod dynamic;
mod mem;

pub use dynamic::KubeBackingClient;
pub use mem::{BackingOp, MemBackingClient};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use veneer_core::{
    CreateOptions, DeleteOptions, DynObject, DynObjectList, GetOptions, ListQuery, Result,
    UpdateOptions, WatchEvent,
};

/// Cancellation handle for the task pumping a backing watch. Dropping
/// the handle without calling `cancel` also stops the pump.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Wrap the sender half of a cancellation signal.
    pub fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A handle with nothing to cancel, for sources without a pump task.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A live backing watch: ordered events plus the cancel handle for the
/// producing task.
pub struct WatchHandle {
    pub rx: mpsc::Receiver<WatchEvent>,
    pub cancel: CancelHandle,
}

/// Generic, late-bound object-store client the storage adapter persists
/// through. Implementations are schema-agnostic and surface failures in
/// the shared taxonomy, so `NotFound` stays recognizable across the
/// trait boundary.
#[async_trait::async_trait]
pub trait BackingClient: Send + Sync {
    async fn get(&self, name: &str, options: &GetOptions) -> Result<DynObject>;

    async fn list(&self, query: &ListQuery) -> Result<DynObjectList>;

    async fn create(&self, obj: &DynObject, options: &CreateOptions) -> Result<DynObject>;

    async fn update(&self, obj: &DynObject, options: &UpdateOptions) -> Result<DynObject>;

    async fn delete(&self, name: &str, options: &DeleteOptions) -> Result<()>;

    async fn watch(&self, query: &ListQuery) -> Result<WatchHandle>;

    /// A handle scoped to one namespace: a cheap clone sharing the
    /// underlying store/connection state.
    fn with_namespace(&self, namespace: &str) -> Arc<dyn BackingClient>;
}

/// Capacity of the channel between a watch pump task and its consumer.
pub(crate) fn client_queue_cap() -> usize {
    std::env::var("VENEER_CLIENT_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|cap| *cap > 0)
        .unwrap_or(1024)
}
