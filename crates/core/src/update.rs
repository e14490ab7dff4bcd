//! Update transforms and their preconditions.

use crate::{DynObject, Preconditions, Result};

/// Produces the desired object from the current one during an update,
/// plus the preconditions that must hold before the commit. The
/// transform runs on the external form of the object.
pub trait UpdatedObjectInfo: Send + Sync {
    fn preconditions(&self) -> Option<Preconditions> {
        None
    }

    fn updated_object(&self, current: DynObject) -> Result<DynObject>;
}

impl<F> UpdatedObjectInfo for F
where
    F: Fn(DynObject) -> Result<DynObject> + Send + Sync,
{
    fn updated_object(&self, current: DynObject) -> Result<DynObject> {
        self(current)
    }
}

/// Replace the stored object with a fixed desired state, optionally
/// guarded by preconditions.
#[derive(Debug, Clone)]
pub struct ReplaceWith {
    object: DynObject,
    preconditions: Option<Preconditions>,
}

impl ReplaceWith {
    pub fn new(object: DynObject) -> Self {
        Self {
            object,
            preconditions: None,
        }
    }

    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = Some(preconditions);
        self
    }
}

impl UpdatedObjectInfo for ReplaceWith {
    fn preconditions(&self) -> Option<Preconditions> {
        self.preconditions.clone()
    }

    fn updated_object(&self, _current: DynObject) -> Result<DynObject> {
        Ok(self.object.clone())
    }
}
