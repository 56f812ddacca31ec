//! Network interface cards.

use std::mem;
use std::net::IpAddr;

use serde_json::{Value, json};

use crate::context::Context;
use crate::dependency::{DependencyKind, ExistingRef, NewDependency, Requirement, Slot};
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags, reference};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, missing, submit};
use crate::resources::{NetworkSpec, PublicIpSpec, ResourceGroupSpec, first_item_str};
use crate::stage::{
    Blank, Definition, Grouped, NeedsGroup, NeedsNetwork, Networked, Provisionable,
    PublicIpAttachable, Regional, WithTags,
};
use crate::transport::Transport;
use crate::update::{Deferred, Update};

pub(crate) const IP_CONFIGURATIONS: &str = "properties.ipConfigurations";
const PRIMARY_CONFIGURATION: &str = "primary";
const VIRTUAL_MACHINE: &str = "properties.virtualMachine.id";

wrapper!(
    /// A network interface card.
    NetworkInterface,
    ResourceType::NetworkInterface,
    NetworkInterfaceSpec
);

/// Network interface definition at stage `S`.
pub type NetworkInterfaceDefinition<T, S = Blank> = Definition<T, NetworkInterfaceSpec, S>;

/// Pending changes to a network interface.
pub type NetworkInterfaceUpdate<T> = Update<T, NetworkInterface<T>>;

/// Values needed to create a network interface.
///
/// When nested under a virtual machine, unset network, subnet, and public IP
/// choices are taken from the machine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkInterfaceSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    network: Slot<NetworkSpec>,
    subnet: Option<String>,
    public_ip: Slot<PublicIpSpec>,
    private_ip: Option<String>,
}

impl NetworkInterfaceSpec {
    /// Empty spec; region, group, and network are inherited when nested.
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

    /// Uses an existing network instead of inheriting one.
    #[must_use]
    pub fn with_existing_network(mut self, network: impl Into<ExistingRef>) -> Self {
        self.network = Slot::existing(network);
        self
    }

    /// Places the card in a named subnet.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>) -> Self {
        self.subnet = Some(name.into());
        self
    }

    /// Uses a static private address.
    #[must_use]
    pub fn with_static_private_ip(mut self, address: impl Into<String>) -> Self {
        self.private_ip = Some(address.into());
        self
    }

    fn payload(&self, region: &str, subnet: &ResourceId, public_ip: Option<&ResourceId>) -> Payload {
        let mut configuration = Payload::new();
        configuration.set("name", PRIMARY_CONFIGURATION);
        configuration.set("properties.subnet", reference(subnet));
        match &self.private_ip {
            Some(address) => {
                configuration.set("properties.privateIPAllocationMethod", "Static");
                configuration.set("properties.privateIPAddress", address.as_str());
            }
            None => configuration.set("properties.privateIPAllocationMethod", "Dynamic"),
        }
        if let Some(id) = public_ip {
            configuration.set("properties.publicIPAddress", reference(id));
        }
        let mut payload = base_payload(region, &self.tags);
        payload.set(IP_CONFIGURATIONS, json!([configuration.into_value()]));
        payload
    }
}

impl Regional for NetworkInterfaceSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for NetworkInterfaceSpec {
    type AfterGroup = NeedsNetwork;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl Networked for NetworkInterfaceSpec {
    type AfterNetwork = Provisionable;

    fn set_network(&mut self, slot: Slot<NetworkSpec>) {
        self.network = slot;
    }
}

impl PublicIpAttachable for NetworkInterfaceSpec {
    fn public_ip_slot(&mut self) -> &mut Slot<PublicIpSpec> {
        &mut self.public_ip
    }
}

impl WithTags for NetworkInterfaceSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for NetworkInterfaceSpec {
    type Output = NetworkInterface<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        match &self.private_ip {
            Some(address) if address.parse::<IpAddr>().is_err() => Err(CloudError::invalid(
                name,
                format!("'{address}' is not an IP address"),
            )),
            _ => Ok(()),
        }
    }

    fn provision(
        mut self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<NetworkInterface<T>, CloudError> {
        Provision::<T>::check(&self, name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let resolved = DependencyGraph::new(name)
            .with(Step::Group(mem::take(&mut self.group)))
            .with(Step::Network(mem::take(&mut self.network), Requirement::Mandatory))
            .with(Step::Subnet(self.subnet.take()))
            .with(Step::PublicIps(
                vec![mem::take(&mut self.public_ip)],
                Requirement::Optional,
            ))
            .resolve(ctx, &region, inherited)?;
        let group = resolved.group(name)?;
        let subnet = resolved
            .subnet
            .as_ref()
            .ok_or_else(|| missing(name, DependencyKind::Subnet))?;
        let payload = self.payload(&region, subnet, resolved.public_ips.first());
        let id = ResourceId::new(
            ctx.subscription(),
            group.group(),
            ResourceType::NetworkInterface,
            name,
        );
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> NetworkInterfaceDefinition<T, S> {
    /// Places the card in a named subnet; the network's first subnet is used
    /// otherwise.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>) -> Self {
        self.spec.subnet = Some(name.into());
        self
    }

    /// Uses a static private address.
    #[must_use]
    pub fn with_static_private_ip(mut self, address: impl Into<String>) -> Self {
        self.spec.private_ip = Some(address.into());
        self
    }

    /// Lets the provider assign the private address (the default).
    #[must_use]
    pub fn with_dynamic_private_ip(mut self) -> Self {
        self.spec.private_ip = None;
        self
    }
}

impl<T: Transport> NetworkInterfaceDefinition<T, Provisionable> {
    /// Creates the card and any dependency requested as new.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for malformed
    /// addresses, dependency errors for the group, network, subnet, or public
    /// IP, and [`CloudError::ProviderRequestFailed`] when the provider
    /// rejects a request.
    pub fn provision(self) -> Result<NetworkInterface<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> NetworkInterface<T> {
    /// Private address of the primary IP configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn primary_private_ip(&mut self) -> Result<Option<String>, CloudError> {
        Ok(first_item_str(self.inner()?, IP_CONFIGURATIONS, "/properties/privateIPAddress")
            .map(str::to_owned))
    }

    /// Subnet of the primary IP configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn primary_subnet_id(&mut self) -> Result<Option<ResourceId>, CloudError> {
        Ok(
            first_item_str(self.inner()?, IP_CONFIGURATIONS, "/properties/subnet/id")
                .and_then(|text| ResourceId::parse(text).ok()),
        )
    }

    /// Public IP address attached to the primary IP configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn public_ip_id(&mut self) -> Result<Option<ResourceId>, CloudError> {
        Ok(first_item_str(
            self.inner()?,
            IP_CONFIGURATIONS,
            "/properties/publicIPAddress/id",
        )
        .and_then(|text| ResourceId::parse(text).ok()))
    }

    /// Machine the card is attached to, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn virtual_machine_id(&mut self) -> Result<Option<ResourceId>, CloudError> {
        Ok(self
            .inner()?
            .get_str(VIRTUAL_MACHINE)
            .and_then(|text| ResourceId::parse(text).ok()))
    }

    /// Backend pools of load balancers the primary configuration belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn backend_pool_ids(&mut self) -> Result<Vec<ResourceId>, CloudError> {
        let pools = self
            .inner()?
            .get_array(IP_CONFIGURATIONS)
            .first()
            .and_then(|item| item.pointer("/properties/loadBalancerBackendAddressPools"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .filter_map(|text| ResourceId::parse(text).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(pools)
    }
}

impl<T: Transport> NetworkInterfaceUpdate<T> {
    /// Attaches an existing public IP address on `apply()`.
    #[must_use]
    pub fn with_existing_public_ip(mut self, address: impl Into<ExistingRef>) -> Self {
        self.defer(Deferred::AttachPublicIp(Slot::existing(address)));
        self
    }

    /// Creates a dynamic public IP address and attaches it on `apply()`.
    #[must_use]
    pub fn with_new_public_ip_named(mut self, name: impl Into<String>) -> Self {
        self.defer(Deferred::AttachPublicIp(Slot::New(NewDependency::named(name))));
        self
    }

    /// Detaches the public IP address on `apply()`. The address itself is
    /// kept.
    #[must_use]
    pub fn without_public_ip(mut self) -> Self {
        self.defer(Deferred::DetachPublicIp);
        self
    }
}
