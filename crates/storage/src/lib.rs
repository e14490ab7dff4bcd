//! Veneer storage adapter: serves objects under an external resource
//! identity while persisting them under an internal one through a
//! generic backing client. The adapter owns the REST semantics
//! (validation short-circuits, preconditions, create-on-update, partial
//! delete-collection results, watch remapping); persistence itself is
//! entirely the backing client's problem.

#![forbid(unsafe_code)]

mod registry;
mod relay;

pub use registry::{ProxyRule, StorageSet};
pub use relay::{RelayBuffer, WatchRelay};

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use veneer_client::BackingClient;
use veneer_core::{
    CreateOptions, DeleteOptions, DynObject, DynObjectList, Error, GetOptions, IdentityMapper,
    ListOptions, ListQuery, RequestContext, Result, UpdateOptions, UpdateValidator,
    UpdatedObjectInfo, Validator,
};

/// Outcome of a delete-collection sweep: everything deleted before the
/// first failure, plus that failure if one occurred. Deletion is not
/// atomic; prior deletions are never rolled back.
#[derive(Debug)]
pub struct DeleteCollectionResult {
    pub deleted: DynObjectList,
    pub error: Option<Error>,
}

/// REST storage for one proxied resource. Constructed once at server
/// startup and immutable afterwards; safe to share across concurrent
/// requests.
pub struct ProxyStorage {
    mapper: IdentityMapper,
    namespace_scoped: bool,
    short_names: Vec<String>,
    categories: Vec<String>,
    backing: Arc<dyn BackingClient>,
}

impl ProxyStorage {
    pub fn new(
        mapper: IdentityMapper,
        namespace_scoped: bool,
        short_names: Vec<String>,
        categories: Vec<String>,
        backing: Arc<dyn BackingClient>,
    ) -> Self {
        Self {
            mapper,
            namespace_scoped,
            short_names,
            categories,
            backing,
        }
    }

    /// Plural resource name this storage serves under.
    pub fn resource(&self) -> &str {
        &self.mapper.external.resource
    }

    pub fn namespace_scoped(&self) -> bool {
        self.namespace_scoped
    }

    pub fn short_names(&self) -> &[String] {
        &self.short_names
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    /// Fresh decode target stamped with the external identity.
    pub fn new_object(&self) -> DynObject {
        let mut obj = DynObject::new();
        self.mapper.external.stamp(&mut obj);
        obj
    }

    /// Fresh list decode target stamped with the external identity.
    pub fn new_list(&self) -> DynObjectList {
        let mut list = DynObjectList::new();
        self.mapper.external.stamp_list(&mut list);
        list
    }

    /// Backing handle for this request: namespace-scoped when the
    /// resource is namespaced and the context carries a namespace,
    /// cluster-wide otherwise.
    fn scoped(&self, ctx: &RequestContext) -> Arc<dyn BackingClient> {
        match ctx.namespace.as_deref() {
            Some(ns) if self.namespace_scoped => self.backing.with_namespace(ns),
            _ => Arc::clone(&self.backing),
        }
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: Option<&GetOptions>,
    ) -> Result<DynObject> {
        let default = GetOptions::default();
        let options = options.unwrap_or(&default);
        let obj = self.scoped(ctx).get(name, options).await?;
        Ok(self.mapper.to_external(obj))
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        options: Option<&ListOptions>,
    ) -> Result<DynObjectList> {
        let query = ListQuery::from_options(options);
        let list = self.scoped(ctx).list(&query).await?;
        debug!(resource = %self.resource(), items = list.len(), "storage: list ok");
        Ok(self.mapper.to_external_list(list))
    }

    /// Validate the caller's object in external form, then send a copy
    /// stamped with the internal identity to the backing store. The
    /// caller's object is never mutated.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        obj: &DynObject,
        validate: Option<&Validator>,
        options: Option<&CreateOptions>,
    ) -> Result<DynObject> {
        counter!("veneer_create_attempts", 1u64);
        if let Some(validate) = validate {
            validate(obj)?;
        }
        let internal = self.mapper.to_internal(obj.clone());
        let default = CreateOptions::default();
        let options = options.unwrap_or(&default);
        let created = self.scoped(ctx).create(&internal, options).await?;
        counter!("veneer_create_ok", 1u64);
        info!(
            resource = %self.resource(),
            name = %created.name().unwrap_or(""),
            "storage: create ok"
        );
        Ok(self.mapper.to_external(created))
    }

    /// Update by name. Returns the resulting object and whether it was
    /// created by the create-on-update fallback.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj_info: &dyn UpdatedObjectInfo,
        create_validate: Option<&Validator>,
        update_validate: Option<&UpdateValidator>,
        force_allow_create: bool,
        options: Option<&UpdateOptions>,
    ) -> Result<(DynObject, bool)> {
        counter!("veneer_update_attempts", 1u64);
        let current = match self.get(ctx, name, None).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() && force_allow_create => {
                // Build the desired object from an external-form template
                // and go through the create path.
                let desired = obj_info.updated_object(self.new_object())?;
                let created = self.create(ctx, &desired, create_validate, None).await?;
                info!(resource = %self.resource(), name = %name, "storage: update created missing object");
                return Ok((created, true));
            }
            Err(err) => return Err(err),
        };

        // The transform and validations run on the external form.
        let updated = obj_info.updated_object(current.clone())?;
        if let Some(validate) = update_validate {
            validate(&updated, &current)?;
        }

        let internal = self.mapper.to_internal(updated);

        // Preconditions are enforced before the backing update ever runs.
        if let Some(pc) = obj_info.preconditions() {
            if let Some(expect) = pc.uid.as_deref() {
                let have = internal.uid().unwrap_or("");
                if have != expect {
                    return Err(Error::Conflict(format!(
                        "uid precondition failed: have {have:?}, want {expect:?}"
                    )));
                }
            }
            if let Some(expect) = pc.resource_version.as_deref() {
                let have = internal.resource_version().unwrap_or("");
                if have != expect {
                    return Err(Error::Conflict(format!(
                        "resourceVersion precondition failed: have {have:?}, want {expect:?}"
                    )));
                }
            }
        }

        let default = UpdateOptions::default();
        let options = options.unwrap_or(&default);
        let returned = self.scoped(ctx).update(&internal, options).await?;
        counter!("veneer_update_ok", 1u64);
        info!(resource = %self.resource(), name = %name, "storage: update ok");
        Ok((self.mapper.to_external(returned), false))
    }

    /// Delete by name after running the caller's validation against the
    /// current object. Returns the pre-delete object; the boolean is
    /// always true since no asynchronous deletion path exists here.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<&Validator>,
        options: Option<&DeleteOptions>,
    ) -> Result<(DynObject, bool)> {
        let obj = self.get(ctx, name, None).await?;
        if let Some(validate) = validate {
            validate(&obj)?;
        }
        let default = DeleteOptions::default();
        let options = options.unwrap_or(&default);
        self.scoped(ctx).delete(name, options).await?;
        counter!("veneer_delete_ok", 1u64);
        info!(resource = %self.resource(), name = %name, "storage: delete ok");
        Ok((obj, true))
    }

    /// Delete everything the list options select, sequentially, stopping
    /// at the first failure. The result carries both the successfully
    /// deleted objects and that failure, if any; only a failure of the
    /// initial list is returned as a bare error.
    pub async fn delete_collection(
        &self,
        ctx: &RequestContext,
        validate: Option<&Validator>,
        options: Option<&DeleteOptions>,
        list_options: Option<&ListOptions>,
    ) -> Result<DeleteCollectionResult> {
        let listed = self.list(ctx, list_options).await?;
        let total = listed.len();
        let mut deleted = self.new_list();
        for item in &listed.items {
            let name = match item.name() {
                Some(name) => name.to_string(),
                None => {
                    return Ok(DeleteCollectionResult {
                        deleted,
                        error: Some(Error::Validation(
                            "listed object has no metadata.name".into(),
                        )),
                    })
                }
            };
            match self.delete(ctx, &name, validate, options).await {
                Ok((obj, _)) => deleted.items.push(obj),
                Err(err) => {
                    counter!("veneer_delete_collection_partial", 1u64);
                    warn!(
                        resource = %self.resource(),
                        name = %name,
                        error = %err,
                        deleted = deleted.len(),
                        "storage: delete collection aborted"
                    );
                    return Ok(DeleteCollectionResult {
                        deleted,
                        error: Some(err),
                    });
                }
            }
        }
        info!(resource = %self.resource(), count = total, "storage: delete collection ok");
        Ok(DeleteCollectionResult {
            deleted,
            error: None,
        })
    }

    /// Open a backing watch and relay its events with the external
    /// identity stamped on. The relay's buffering policy comes from the
    /// environment; see [`RelayBuffer`].
    pub async fn watch(
        &self,
        ctx: &RequestContext,
        options: Option<&ListOptions>,
    ) -> Result<WatchRelay> {
        let query = ListQuery::from_options(options);
        let handle = self.scoped(ctx).watch(&query).await?;
        counter!("veneer_watch_starts", 1u64);
        info!(
            resource = %self.resource(),
            ns = %ctx.namespace.as_deref().unwrap_or("(all)"),
            "storage: watch started"
        );
        Ok(WatchRelay::spawn(
            self.mapper.external.clone(),
            handle,
            RelayBuffer::from_env(),
        ))
    }
}
