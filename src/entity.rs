//! Lazily synchronized resource wrappers and per-kind collections.
//!
//! A wrapper obtained by name holds only its identity. The first accessor
//! call loads the provider payload; later calls reuse it. A failed load is
//! not cached, so the next accessor call retries.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::dependency::ExistingRef;
use crate::error::{CloudError, TransportError};
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags};
use crate::stage::{Blank, Definition};
use crate::transport::{ListScope, Transport};
use crate::update::Update;

/// Lifecycle of a wrapper's local view of provider state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitState {
    /// Only the identity is known.
    Uninitialized,
    /// A refresh is in flight.
    Initializing,
    /// Provider data has been loaded at least once.
    Initialized,
}

/// Identity plus lazily loaded provider payload, shared by every wrapper.
#[derive(Clone, Debug)]
pub struct Entity<T> {
    id: ResourceId,
    ctx: Context<T>,
    state: InitState,
    inner: Option<Payload>,
}

impl<T: Transport> Entity<T> {
    pub(crate) const fn uninitialized(ctx: Context<T>, id: ResourceId) -> Self {
        Self {
            id,
            ctx,
            state: InitState::Uninitialized,
            inner: None,
        }
    }

    pub(crate) const fn initialized(ctx: Context<T>, id: ResourceId, payload: Payload) -> Self {
        Self {
            id,
            ctx,
            state: InitState::Initialized,
            inner: Some(payload),
        }
    }

    /// A response without a body leaves the wrapper uninitialized so the
    /// next accessor fetches the resource.
    pub(crate) fn from_response(ctx: Context<T>, id: ResourceId, payload: Option<Payload>) -> Self {
        let mut entity = Self::uninitialized(ctx, id);
        if payload.is_some() {
            entity.inner = payload;
            entity.state = InitState::Initialized;
        }
        entity
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> InitState {
        self.state
    }

    /// Identity the wrapper was created with. Never touches the network.
    #[must_use]
    pub const fn identity(&self) -> &ResourceId {
        &self.id
    }

    /// Context the wrapper talks to the provider through.
    #[must_use]
    pub const fn context(&self) -> &Context<T> {
        &self.ctx
    }

    /// Payload if one has been loaded, without triggering a refresh.
    #[must_use]
    pub(crate) const fn loaded(&self) -> Option<&Payload> {
        self.inner.as_ref()
    }

    /// Reloads the payload from the provider.
    ///
    /// On failure the previous state and payload are kept: an uninitialized
    /// wrapper stays uninitialized, an initialized one keeps its old data.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the provider call fails or
    /// reports the resource as absent.
    pub fn refresh(&mut self) -> Result<(), CloudError> {
        let previous = self.state;
        self.state = InitState::Initializing;
        debug!(resource = %self.id, "refreshing resource");
        let outcome = self
            .ctx
            .transport()
            .get(&self.id)
            .and_then(|found| found.ok_or_else(|| TransportError::not_found(self.id.to_string())));
        match outcome {
            Ok(payload) => {
                self.inner = Some(payload);
                self.state = InitState::Initialized;
                Ok(())
            }
            Err(source) => {
                self.state = previous;
                Err(CloudError::RefreshFailed {
                    id: self.id.to_string(),
                    source,
                })
            }
        }
    }

    /// Loads the payload on first use and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the load fails.
    pub fn ensure_initialized(&mut self) -> Result<&Payload, CloudError> {
        if self.state != InitState::Initialized {
            self.refresh()?;
        }
        self.inner.as_ref().ok_or_else(|| CloudError::RefreshFailed {
            id: self.id.to_string(),
            source: TransportError::not_found(self.id.to_string()),
        })
    }

    /// Name reported by the provider, falling back to the identity's name.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn name(&mut self) -> Result<String, CloudError> {
        let reported = self.ensure_initialized()?.name().map(str::to_owned);
        Ok(reported.unwrap_or_else(|| self.id.short_name().to_owned()))
    }

    /// Identity reported by the provider, falling back to the local one.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn id(&mut self) -> Result<ResourceId, CloudError> {
        let reported = self
            .ensure_initialized()?
            .id()
            .and_then(|text| ResourceId::parse(text).ok());
        Ok(reported.unwrap_or_else(|| self.id.clone()))
    }

    /// Region the resource lives in.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn region(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.ensure_initialized()?.location().map(str::to_owned))
    }

    /// Tags attached to the resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn tags(&mut self) -> Result<Tags, CloudError> {
        Ok(self.ensure_initialized()?.tags())
    }
}

/// Common behavior of every resource wrapper.
///
/// Accessors take `&mut self` because the first call may load data from the
/// provider. Wrappers are not meant to be shared between threads without
/// external synchronization.
pub trait Wrapper<T: Transport>: Sized {
    /// Resource type the wrapper represents.
    const RESOURCE_TYPE: ResourceType;

    /// Nested-definition form used by [`Entities::define`].
    type Spec: Default;

    /// Wraps an entity.
    fn from_entity(entity: Entity<T>) -> Self;

    /// Shared entity state.
    fn entity(&self) -> &Entity<T>;

    /// Mutable entity state, used by lazy accessors.
    fn entity_mut(&mut self) -> &mut Entity<T>;

    /// Identity known without any network call.
    fn identity<'a>(&'a self) -> &'a ResourceId
    where
        T: 'a,
    {
        self.entity().identity()
    }

    /// Returns `true` once provider data has been loaded.
    fn is_initialized(&self) -> bool {
        self.entity().state() == InitState::Initialized
    }

    /// Resource name.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    fn name(&mut self) -> Result<String, CloudError> {
        self.entity_mut().name()
    }

    /// Fully-qualified identity reported by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    fn id(&mut self) -> Result<ResourceId, CloudError> {
        self.entity_mut().id()
    }

    /// Region the resource lives in.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    fn region(&mut self) -> Result<Option<String>, CloudError> {
        self.entity_mut().region()
    }

    /// Tags attached to the resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    fn tags(&mut self) -> Result<Tags, CloudError> {
        self.entity_mut().tags()
    }

    /// Provider-native payload.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    fn inner<'a>(&'a mut self) -> Result<&'a Payload, CloudError>
    where
        T: 'a,
    {
        self.entity_mut().ensure_initialized()
    }

    /// Reloads provider data.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the provider call fails.
    fn refresh(&mut self) -> Result<(), CloudError> {
        self.entity_mut().refresh()
    }

    /// Starts an update from the wrapper's current provider state.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the current state cannot be
    /// loaded.
    fn update(self) -> Result<Update<T, Self>, CloudError> {
        Update::new(self)
    }
}

/// Declares a wrapper struct over [`Entity`] for one resource kind.
macro_rules! wrapper {
    ($(#[$meta:meta])* $name:ident, $resource_type:expr, $spec:ty) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name<T> {
            entity: $crate::entity::Entity<T>,
        }

        impl<T: $crate::transport::Transport> $crate::entity::Wrapper<T> for $name<T> {
            const RESOURCE_TYPE: $crate::identity::ResourceType = $resource_type;
            type Spec = $spec;

            fn from_entity(entity: $crate::entity::Entity<T>) -> Self {
                Self { entity }
            }

            fn entity(&self) -> &$crate::entity::Entity<T> {
                &self.entity
            }

            fn entity_mut(&mut self) -> &mut $crate::entity::Entity<T> {
                &mut self.entity
            }
        }

        impl<T: $crate::transport::Transport> From<&$name<T>> for $crate::dependency::ExistingRef {
            fn from(value: &$name<T>) -> Self {
                Self::Id($crate::entity::Wrapper::identity(value).clone())
            }
        }
    };
}

pub(crate) use wrapper;

/// Collection facade for one resource kind.
#[derive(Clone, Debug)]
pub struct Entities<T, W> {
    ctx: Context<T>,
    _kind: PhantomData<fn() -> W>,
}

impl<T: Transport, W: Wrapper<T>> Entities<T, W> {
    pub(crate) const fn new(ctx: Context<T>) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    /// Lists every resource of this kind in the subscription.
    ///
    /// Enumeration failures are logged and yield an empty map: a failed
    /// listing is reported as "nothing found".
    #[must_use]
    pub fn list(&self) -> BTreeMap<ResourceId, W> {
        self.list_scope(&ListScope::subscription(
            self.ctx.subscription(),
            W::RESOURCE_TYPE,
        ))
    }

    /// Lists resources of this kind in one group. Failures yield an empty
    /// map, as with [`Entities::list`].
    #[must_use]
    pub fn list_in_group(&self, group: &str) -> BTreeMap<ResourceId, W> {
        self.list_scope(
            &ListScope::subscription(self.ctx.subscription(), W::RESOURCE_TYPE).in_group(group),
        )
    }

    fn list_scope(&self, scope: &ListScope) -> BTreeMap<ResourceId, W> {
        let payloads = match self.ctx.transport().list(scope) {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!(
                    kind = %W::RESOURCE_TYPE,
                    scope = %scope.path(),
                    error = %err,
                    "listing failed; returning an empty collection"
                );
                return BTreeMap::new();
            }
        };
        payloads
            .into_iter()
            .filter_map(|payload| {
                let Some(id) = payload.id().and_then(|text| ResourceId::parse(text).ok()) else {
                    warn!(kind = %W::RESOURCE_TYPE, "skipping listed item without a usable id");
                    return None;
                };
                let entity = Entity::initialized(self.ctx.clone(), id.clone(), payload);
                Some((id, W::from_entity(entity)))
            })
            .collect()
    }

    /// Returns an uninitialized wrapper; provider data loads on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when `name_or_id` is not a
    /// path and no default group is configured.
    pub fn get(&self, name_or_id: &str) -> Result<W, CloudError> {
        let id = self.ctx.resolve(name_or_id, W::RESOURCE_TYPE)?;
        Ok(W::from_entity(Entity::uninitialized(self.ctx.clone(), id)))
    }

    /// Starts a definition for a new resource.
    #[must_use]
    pub fn define(&self, name: impl Into<String>) -> Definition<T, W::Spec, Blank> {
        Definition::new(self.ctx.clone(), name.into())
    }

    /// Starts an update of an existing resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] for unusable references
    /// and [`CloudError::RefreshFailed`] when the current state cannot be
    /// loaded.
    pub fn update(&self, name_or_id: &str) -> Result<Update<T, W>, CloudError> {
        Update::new(self.get(name_or_id)?)
    }

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] for unusable references and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects the
    /// call.
    pub fn delete(&self, name_or_id: &str) -> Result<(), CloudError> {
        let id = self.ctx.resolve(name_or_id, W::RESOURCE_TYPE)?;
        info!(resource = %id, kind = %W::RESOURCE_TYPE, "deleting resource");
        self.ctx
            .transport()
            .delete(&id)
            .map_err(|source| CloudError::provider("delete", &id, source))
    }

    /// Reference to an existing resource of this kind, for use in
    /// dependency slots.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when the reference cannot
    /// be resolved.
    pub fn reference(&self, name_or_id: &str) -> Result<ExistingRef, CloudError> {
        self.ctx
            .resolve(name_or_id, W::RESOURCE_TYPE)
            .map(ExistingRef::Id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cloud;
    use crate::test_support::StubTransport;
    use rstest::{fixture, rstest};
    use serde_json::json;

    const NETWORK: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/net1";

    #[fixture]
    fn stub() -> StubTransport {
        let stub = StubTransport::new();
        stub.insert_json(json!({
            "id": NETWORK,
            "name": "net1",
            "location": "westus",
            "tags": {"team": "core"},
        }));
        stub
    }

    #[rstest]
    fn accessors_refresh_exactly_once(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut network = cloud
            .networks()
            .get(NETWORK)
            .unwrap_or_else(|err| panic!("get: {err}"));
        assert!(!network.is_initialized());
        assert_eq!(stub.get_count(), 0);

        let region = network.region().unwrap_or_else(|err| panic!("region: {err}"));
        assert_eq!(region.as_deref(), Some("westus"));
        assert_eq!(stub.get_count(), 1);

        let name = network.name().unwrap_or_else(|err| panic!("name: {err}"));
        let tags = network.tags().unwrap_or_else(|err| panic!("tags: {err}"));
        assert_eq!(name, "net1");
        assert_eq!(tags.get("team").map(String::as_str), Some("core"));
        assert_eq!(stub.get_count(), 1);
    }

    #[rstest]
    fn failed_refresh_is_not_cached(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut network = cloud
            .networks()
            .get(NETWORK)
            .unwrap_or_else(|err| panic!("get: {err}"));
        stub.fail_next(503, "throttled");

        let Err(err) = network.name() else {
            panic!("first access should fail");
        };
        assert!(matches!(err, CloudError::RefreshFailed { ref source, .. } if source.status == Some(503)));
        assert_eq!(network.entity().state(), InitState::Uninitialized);

        let name = network.name().unwrap_or_else(|err| panic!("retry: {err}"));
        assert_eq!(name, "net1");
        assert_eq!(stub.get_count(), 2);
    }

    #[rstest]
    fn absent_resource_fails_refresh(stub: StubTransport) {
        let cloud = Cloud::new(stub, "sub").with_default_group("rg");
        let mut missing = cloud
            .networks()
            .get("ghost")
            .unwrap_or_else(|err| panic!("get: {err}"));
        let Err(CloudError::RefreshFailed { source, .. }) = missing.region() else {
            panic!("expected refresh failure");
        };
        assert!(source.is_not_found());
    }

    #[rstest]
    fn explicit_refresh_failure_keeps_loaded_data(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut network = cloud
            .networks()
            .get(NETWORK)
            .unwrap_or_else(|err| panic!("get: {err}"));
        network
            .refresh()
            .unwrap_or_else(|err| panic!("refresh: {err}"));
        stub.fail_next(500, "boom");
        assert!(network.refresh().is_err());
        assert!(network.is_initialized());
        assert_eq!(
            network
                .region()
                .unwrap_or_else(|err| panic!("region: {err}"))
                .as_deref(),
            Some("westus")
        );
    }

    #[rstest]
    fn list_failure_yields_empty_map(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        stub.fail_next(500, "unavailable");
        assert!(cloud.networks().list().is_empty());
        assert_eq!(cloud.networks().list().len(), 1);
    }

    #[rstest]
    fn listed_wrappers_are_initialized(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let listed = cloud.networks().list_in_group("RG");
        let Some(network) = listed.values().next() else {
            panic!("expected one network");
        };
        assert!(network.is_initialized());
        assert_eq!(stub.get_count(), 0);
    }

    #[rstest]
    #[case("not/a/valid/path")]
    #[case("bare-name")]
    fn delete_rejects_unusable_references(stub: StubTransport, #[case] reference: &str) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud.networks().delete(reference);
        assert!(matches!(
            result,
            Err(CloudError::MalformedIdentifier { .. })
        ));
        assert_eq!(stub.delete_count(), 0);
    }

    #[rstest]
    fn delete_removes_resource(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub").with_default_group("rg");
        cloud
            .networks()
            .delete("NET1")
            .unwrap_or_else(|err| panic!("delete: {err}"));
        assert!(cloud.networks().list().is_empty());
    }
}
