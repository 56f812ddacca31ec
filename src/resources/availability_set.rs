//! Availability sets.

use crate::context::Context;
use crate::dependency::Slot;
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, submit};
use crate::resources::{ResourceGroupSpec, reference_ids};
use crate::stage::{Blank, Definition, Grouped, NeedsGroup, Provisionable, Regional, WithTags};
use crate::transport::Transport;
use crate::update::Update;

const FAULT_DOMAINS: &str = "properties.platformFaultDomainCount";
const UPDATE_DOMAINS: &str = "properties.platformUpdateDomainCount";
const VIRTUAL_MACHINES: &str = "properties.virtualMachines";
const FAULT_DOMAIN_RANGE: std::ops::RangeInclusive<u32> = 1..=3;
const UPDATE_DOMAIN_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

wrapper!(
    /// An availability set spreading machines across fault and update
    /// domains.
    AvailabilitySet,
    ResourceType::AvailabilitySet,
    AvailabilitySetSpec
);

/// Availability set definition at stage `S`.
pub type AvailabilitySetDefinition<T, S = Blank> = Definition<T, AvailabilitySetSpec, S>;

/// Pending changes to an availability set.
pub type AvailabilitySetUpdate<T> = Update<T, AvailabilitySet<T>>;

/// Values needed to create an availability set. Defaults to two fault
/// domains and five update domains.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailabilitySetSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    fault_domains: u32,
    update_domains: u32,
}

impl Default for AvailabilitySetSpec {
    fn default() -> Self {
        Self {
            region: None,
            group: Slot::Unset,
            tags: Tags::new(),
            fault_domains: 2,
            update_domains: 5,
        }
    }
}

impl AvailabilitySetSpec {
    /// Default spec; region and group are inherited when nested.
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

    /// Sets the fault domain count (1 to 3).
    #[must_use]
    pub const fn with_fault_domain_count(mut self, count: u32) -> Self {
        self.fault_domains = count;
        self
    }

    /// Sets the update domain count (1 to 20).
    #[must_use]
    pub const fn with_update_domain_count(mut self, count: u32) -> Self {
        self.update_domains = count;
        self
    }

    fn payload(&self, region: &str) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        payload.set(FAULT_DOMAINS, self.fault_domains);
        payload.set(UPDATE_DOMAINS, self.update_domains);
        payload
    }
}

fn check_domains(fault: u32, update: u32) -> Result<(), String> {
    if !FAULT_DOMAIN_RANGE.contains(&fault) {
        return Err(format!("fault domain count {fault} is outside 1..=3"));
    }
    if !UPDATE_DOMAIN_RANGE.contains(&update) {
        return Err(format!("update domain count {update} is outside 1..=20"));
    }
    Ok(())
}

impl Regional for AvailabilitySetSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for AvailabilitySetSpec {
    type AfterGroup = Provisionable;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl WithTags for AvailabilitySetSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for AvailabilitySetSpec {
    type Output = AvailabilitySet<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        check_domains(self.fault_domains, self.update_domains)
            .map_err(|reason| CloudError::invalid(name, reason))
    }

    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<AvailabilitySet<T>, CloudError> {
        Provision::<T>::check(&self, name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let payload = self.payload(&region);
        let resolved = DependencyGraph::new(name)
            .with(Step::Group(self.group))
            .resolve(ctx, &region, inherited)?;
        let group = resolved.group(name)?;
        let id = ResourceId::new(
            ctx.subscription(),
            group.group(),
            ResourceType::AvailabilitySet,
            name,
        );
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> AvailabilitySetDefinition<T, S> {
    /// Sets the fault domain count (1 to 3).
    #[must_use]
    pub const fn with_fault_domain_count(mut self, count: u32) -> Self {
        self.spec.fault_domains = count;
        self
    }

    /// Sets the update domain count (1 to 20).
    #[must_use]
    pub const fn with_update_domain_count(mut self, count: u32) -> Self {
        self.spec.update_domains = count;
        self
    }
}

impl<T: Transport> AvailabilitySetDefinition<T, Provisionable> {
    /// Creates the availability set, and its group if requested.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for domain counts out of
    /// range, dependency errors for the group, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects a
    /// request.
    pub fn provision(self) -> Result<AvailabilitySet<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> AvailabilitySet<T> {
    /// Number of fault domains.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn fault_domain_count(&mut self) -> Result<Option<u64>, CloudError> {
        Ok(self.inner()?.get_u64(FAULT_DOMAINS))
    }

    /// Number of update domains.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn update_domain_count(&mut self) -> Result<Option<u64>, CloudError> {
        Ok(self.inner()?.get_u64(UPDATE_DOMAINS))
    }

    /// Machines placed in the set.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn virtual_machine_ids(&mut self) -> Result<Vec<ResourceId>, CloudError> {
        Ok(reference_ids(self.inner()?, VIRTUAL_MACHINES))
    }
}

impl<T: Transport> AvailabilitySetUpdate<T> {
    /// Changes the update domain count.
    #[must_use]
    pub fn with_update_domain_count(mut self, count: u32) -> Self {
        let fault = self
            .payload()
            .get_u64(FAULT_DOMAINS)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(1);
        match check_domains(fault, count) {
            Ok(()) => self.payload_mut().set(UPDATE_DOMAINS, count),
            Err(reason) => self.reject(reason),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cloud;
    use crate::stage::{WithGroup, WithRegion};
    use crate::test_support::StubTransport;
    use rstest::rstest;

    #[rstest]
    #[case(2, 5, true)]
    #[case(3, 20, true)]
    #[case(0, 5, false)]
    #[case(2, 0, false)]
    #[case(4, 5, false)]
    #[case(2, 21, false)]
    fn domain_ranges(#[case] fault: u32, #[case] update: u32, #[case] valid: bool) {
        assert_eq!(check_domains(fault, update).is_ok(), valid);
    }

    #[rstest]
    fn defaults_are_sent() {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        let cloud = Cloud::new(stub, "sub");
        let mut set = cloud
            .availability_sets()
            .define("avset1")
            .with_region("westus")
            .with_existing_group("rg")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));
        let fault = set
            .fault_domain_count()
            .unwrap_or_else(|err| panic!("fault: {err}"));
        let update = set
            .update_domain_count()
            .unwrap_or_else(|err| panic!("update: {err}"));
        assert_eq!((fault, update), (Some(2), Some(5)));
        let machines = set
            .virtual_machine_ids()
            .unwrap_or_else(|err| panic!("machines: {err}"));
        assert!(machines.is_empty());
    }

    #[rstest]
    fn zero_fault_domains_are_rejected_locally() {
        let stub = StubTransport::new();
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .availability_sets()
            .define("avset1")
            .with_region("westus")
            .with_new_group()
            .with_fault_domain_count(0)
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn update_rejects_out_of_range_domains() {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        let cloud = Cloud::new(stub.clone(), "sub").with_default_group("rg");
        cloud
            .availability_sets()
            .define("avset1")
            .with_region("westus")
            .with_existing_group("rg")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let result = cloud
            .availability_sets()
            .update("avset1")
            .unwrap_or_else(|err| panic!("update: {err}"))
            .with_update_domain_count(40)
            .apply();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert_eq!(stub.put_count(ResourceType::AvailabilitySet), 1);
    }
}
