//! Veneer core types: generic objects, resource identities, watch events.
//!
//! Everything here is pure data shared by the storage adapter and the
//! backing clients; no I/O lives in this crate.

#![forbid(unsafe_code)]

mod identity;
mod object;
mod options;
mod update;
mod watch;

pub use identity::{IdentityMapper, ResourceIdentity};
pub use object::{DynObject, DynObjectList, ListMeta};
pub use options::{
    CreateOptions, DeleteOptions, GetOptions, ListOptions, ListQuery, Preconditions, UpdateOptions,
};
pub use update::{ReplaceWith, UpdatedObjectInfo};
pub use watch::WatchEvent;

use serde::{Deserialize, Serialize};

/// Error taxonomy shared by the storage adapter and the backing clients.
///
/// Backing clients surface their failures through the same enum so that
/// `NotFound` stays recognizable to callers across the trait boundary
/// (the create-on-update fallback depends on it). String payloads keep
/// the type transportable over an RPC seam later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Request-scoped data the surrounding framework resolves before calling
/// into storage. Namespace scoping of backing calls derives from this,
/// never from adapter state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub namespace: Option<String>,
}

impl RequestContext {
    /// Context without a namespace (cluster-scoped request).
    pub fn cluster() -> Self {
        Self::default()
    }

    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }
}

/// Caller-supplied admission check for a single object. A failure must
/// abort the operation before any backing-store call.
pub type Validator = dyn Fn(&DynObject) -> Result<()> + Send + Sync;

/// Caller-supplied admission check for an update, called as `(new, old)`.
pub type UpdateValidator = dyn Fn(&DynObject, &DynObject) -> Result<()> + Send + Sync;
