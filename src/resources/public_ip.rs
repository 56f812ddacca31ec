//! Public IP addresses.

use std::fmt;
use std::str::FromStr;

use crate::context::Context;
use crate::dependency::Slot;
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, submit};
use crate::resources::ResourceGroupSpec;
use crate::stage::{Blank, Definition, Grouped, NeedsGroup, Provisionable, Regional, WithTags};
use crate::transport::Transport;
use crate::update::Update;

const ALLOCATION: &str = "properties.publicIPAllocationMethod";
const IP_ADDRESS: &str = "properties.ipAddress";
const DNS_SETTINGS: &str = "properties.dnsSettings";
const LEAF_LABEL: &str = "properties.dnsSettings.domainNameLabel";
const FQDN: &str = "properties.dnsSettings.fqdn";

wrapper!(
    /// A public IP address.
    PublicIpAddress,
    ResourceType::PublicIpAddress,
    PublicIpSpec
);

/// Public IP definition at stage `S`.
pub type PublicIpDefinition<T, S = Blank> = Definition<T, PublicIpSpec, S>;

/// Pending changes to a public IP address.
pub type PublicIpUpdate<T> = Update<T, PublicIpAddress<T>>;

/// How an address is assigned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IpAllocation {
    /// Assigned when attached; may change across restarts.
    #[default]
    Dynamic,
    /// Reserved for the lifetime of the resource.
    Static,
}

impl IpAllocation {
    /// Provider spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "Dynamic",
            Self::Static => "Static",
        }
    }
}

impl fmt::Display for IpAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpAllocation {
    type Err = CloudError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_ascii_lowercase().as_str() {
            "dynamic" => Ok(Self::Dynamic),
            "static" => Ok(Self::Static),
            _ => Err(CloudError::invalid(text, "unknown IP allocation method")),
        }
    }
}

/// Values needed to create a public IP address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublicIpSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    allocation: IpAllocation,
    leaf_domain_label: Option<String>,
}

impl PublicIpSpec {
    /// Dynamic address without a DNS label; region and group are inherited
    /// when nested.
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

    /// Reserves a static address.
    #[must_use]
    pub const fn with_static_ip(mut self) -> Self {
        self.allocation = IpAllocation::Static;
        self
    }

    /// Sets the DNS label under the region's public domain.
    #[must_use]
    pub fn with_leaf_domain_label(mut self, label: impl Into<String>) -> Self {
        self.leaf_domain_label = Some(label.into());
        self
    }

    fn payload(&self, region: &str) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        payload.set(ALLOCATION, self.allocation.as_str());
        if let Some(label) = &self.leaf_domain_label {
            payload.set(LEAF_LABEL, label.as_str());
        }
        payload
    }
}

/// DNS labels are 3-63 characters of lowercase letters, digits, and
/// hyphens, starting with a letter and ending with a letter or digit.
fn check_leaf_label(label: &str) -> Result<(), String> {
    let valid_length = (3..=63).contains(&label.len());
    let valid_chars = label
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    let starts_with_letter = label.starts_with(|ch: char| ch.is_ascii_lowercase());
    let ends_alphanumeric = !label.ends_with('-');
    if valid_length && valid_chars && starts_with_letter && ends_alphanumeric {
        Ok(())
    } else {
        Err(format!("'{label}' is not a valid DNS label"))
    }
}

impl Regional for PublicIpSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for PublicIpSpec {
    type AfterGroup = Provisionable;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl WithTags for PublicIpSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for PublicIpSpec {
    type Output = PublicIpAddress<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        self.leaf_domain_label
            .as_deref()
            .map_or(Ok(()), check_leaf_label)
            .map_err(|reason| CloudError::invalid(name, reason))
    }

    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<PublicIpAddress<T>, CloudError> {
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
            ResourceType::PublicIpAddress,
            name,
        );
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> PublicIpDefinition<T, S> {
    /// Reserves a static address.
    #[must_use]
    pub const fn with_static_ip(mut self) -> Self {
        self.spec.allocation = IpAllocation::Static;
        self
    }

    /// Uses a dynamic address (the default).
    #[must_use]
    pub const fn with_dynamic_ip(mut self) -> Self {
        self.spec.allocation = IpAllocation::Dynamic;
        self
    }

    /// Sets the DNS label under the region's public domain.
    #[must_use]
    pub fn with_leaf_domain_label(mut self, label: impl Into<String>) -> Self {
        self.spec.leaf_domain_label = Some(label.into());
        self
    }
}

impl<T: Transport> PublicIpDefinition<T, Provisionable> {
    /// Creates the address, and its group if requested.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for malformed DNS
    /// labels, dependency errors for the group, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects a
    /// request.
    pub fn provision(self) -> Result<PublicIpAddress<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> PublicIpAddress<T> {
    /// Assigned address, once the provider has allocated one.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn ip_address(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.get_str(IP_ADDRESS).map(str::to_owned))
    }

    /// Allocation method reported by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn allocation(&mut self) -> Result<Option<IpAllocation>, CloudError> {
        Ok(self
            .inner()?
            .get_str(ALLOCATION)
            .and_then(|text| text.parse().ok()))
    }

    /// DNS label, if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn leaf_domain_label(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.get_str(LEAF_LABEL).map(str::to_owned))
    }

    /// Fully-qualified domain name assigned by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn fqdn(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.get_str(FQDN).map(str::to_owned))
    }
}

impl<T: Transport> PublicIpUpdate<T> {
    /// Switches to a static address.
    #[must_use]
    pub fn with_static_ip(mut self) -> Self {
        self.payload_mut()
            .set(ALLOCATION, IpAllocation::Static.as_str());
        self
    }

    /// Switches to a dynamic address.
    #[must_use]
    pub fn with_dynamic_ip(mut self) -> Self {
        self.payload_mut()
            .set(ALLOCATION, IpAllocation::Dynamic.as_str());
        self
    }

    /// Sets or replaces the DNS label.
    #[must_use]
    pub fn with_leaf_domain_label(mut self, label: &str) -> Self {
        match check_leaf_label(label) {
            Ok(()) => self.payload_mut().set(LEAF_LABEL, label),
            Err(reason) => self.reject(reason),
        }
        self
    }

    /// Removes the DNS label.
    #[must_use]
    pub fn without_leaf_domain_label(mut self) -> Self {
        self.payload_mut().remove(DNS_SETTINGS);
        self
    }
}
