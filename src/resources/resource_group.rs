//! Resource groups.

use crate::context::Context;
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType, check_group_name};
use crate::payload::Tags;
use crate::provision::{Inherited, Provision, base_payload, submit};
use crate::stage::{Blank, Definition, Provisionable, Regional, WithTags};
use crate::transport::Transport;
use crate::update::Update;

wrapper!(
    /// A resource group: the container every other resource lives in.
    ResourceGroup,
    ResourceType::ResourceGroup,
    ResourceGroupSpec
);

/// Resource group definition at stage `S`.
pub type ResourceGroupDefinition<T, S = Blank> = Definition<T, ResourceGroupSpec, S>;

/// Pending changes to a resource group.
pub type ResourceGroupUpdate<T> = Update<T, ResourceGroup<T>>;

/// Values needed to create a resource group. The region is inherited from
/// the primary resource when the group is created as a dependency.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceGroupSpec {
    region: Option<String>,
    tags: Tags,
}

impl ResourceGroupSpec {
    /// Empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the region instead of inheriting it.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl Regional for ResourceGroupSpec {
    type AfterRegion = Provisionable;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl WithTags for ResourceGroupSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for ResourceGroupSpec {
    type Output = ResourceGroup<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        check_group_name(name).map_err(|reason| CloudError::invalid(name, reason))
    }

    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<ResourceGroup<T>, CloudError> {
        Provision::<T>::check(&self, name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let id = ResourceId::resource_group(ctx.subscription(), name);
        submit(ctx, id, &base_payload(&region, &self.tags), "create")
    }
}

impl<T: Transport> ResourceGroupDefinition<T, Provisionable> {
    /// Creates the group.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::ProviderRequestFailed`] when the provider
    /// rejects the request.
    pub fn provision(self) -> Result<ResourceGroup<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> ResourceGroup<T> {
    /// Provisioning state reported by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn provisioning_state(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.provisioning_state().map(str::to_owned))
    }
}
