//! Virtual networks and their subnets.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde_json::{Value, json};

use crate::context::Context;
use crate::dependency::Slot;
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType, names_match};
use crate::payload::{Payload, Tags};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, submit};
use crate::resources::ResourceGroupSpec;
use crate::stage::{
    Blank, Definition, Grouped, NeedsAddressSpace, NeedsGroup, Provisionable, Regional, WithTags,
};
use crate::transport::Transport;
use crate::update::Update;

const DEFAULT_ADDRESS_SPACE: &str = "10.0.0.0/16";
const DEFAULT_SUBNET: &str = "subnet1";
const ADDRESS_PREFIXES: &str = "properties.addressSpace.addressPrefixes";
const SUBNETS: &str = "properties.subnets";

wrapper!(
    /// A virtual network.
    Network,
    ResourceType::Network,
    NetworkSpec
);

/// Network definition at stage `S`.
pub type NetworkDefinition<T, S = Blank> = Definition<T, NetworkSpec, S>;

/// Pending changes to a network.
pub type NetworkUpdate<T> = Update<T, Network<T>>;

/// A named address range inside a network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subnet {
    /// Subnet name, unique within its network.
    pub name: String,
    /// CIDR block, for example `10.0.1.0/24`.
    pub address_prefix: String,
}

impl Subnet {
    /// Creates a subnet description.
    pub fn new(name: impl Into<String>, address_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address_prefix: address_prefix.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "properties": { "addressPrefix": self.address_prefix },
        })
    }

    fn from_json(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?;
        let prefix = value
            .pointer("/properties/addressPrefix")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Self::new(name, prefix))
    }
}

/// Values needed to create a network.
///
/// Without address spaces the network covers `10.0.0.0/16`; without subnets
/// a single `subnet1` spanning the first address space is created.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    address_spaces: Vec<String>,
    subnets: Vec<Subnet>,
}

impl NetworkSpec {
    /// Empty spec; region and group are inherited when nested.
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

    /// Adds an address space.
    #[must_use]
    pub fn with_address_space(mut self, cidr: impl Into<String>) -> Self {
        self.address_spaces.push(cidr.into());
        self
    }

    /// Adds a subnet. Subnets are created in the order they are added.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>, cidr: impl Into<String>) -> Self {
        self.subnets.push(Subnet::new(name, cidr));
        self
    }

    /// Address spaces added so far.
    #[must_use]
    pub fn address_spaces(&self) -> &[String] {
        &self.address_spaces
    }

    /// Subnets added so far.
    #[must_use]
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    fn payload(&self, region: &str) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        let spaces = if self.address_spaces.is_empty() {
            vec![DEFAULT_ADDRESS_SPACE.to_owned()]
        } else {
            self.address_spaces.clone()
        };
        let subnets: Vec<Value> = if self.subnets.is_empty() {
            let prefix = spaces
                .first()
                .map_or(DEFAULT_ADDRESS_SPACE, String::as_str);
            vec![Subnet::new(DEFAULT_SUBNET, prefix).to_json()]
        } else {
            self.subnets.iter().map(Subnet::to_json).collect()
        };
        payload.set(ADDRESS_PREFIXES, json!(spaces));
        payload.set(SUBNETS, Value::Array(subnets));
        payload
    }
}

/// Returns `true` for `address/length` with a valid address and length.
pub(crate) fn is_cidr(text: &str) -> bool {
    let Some((host, length)) = text.split_once('/') else {
        return false;
    };
    let Ok(address) = host.parse::<IpAddr>() else {
        return false;
    };
    let max = if address.is_ipv4() { 32 } else { 128 };
    length.parse::<u8>().is_ok_and(|bits| bits <= max)
}

impl Regional for NetworkSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for NetworkSpec {
    type AfterGroup = NeedsAddressSpace;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl WithTags for NetworkSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for NetworkSpec {
    type Output = Network<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        let mut prefixes = self
            .address_spaces
            .iter()
            .chain(self.subnets.iter().map(|subnet| &subnet.address_prefix));
        if let Some(bad) = prefixes.find(|prefix| !is_cidr(prefix)) {
            return Err(CloudError::invalid(
                name,
                format!("'{bad}' is not a CIDR block"),
            ));
        }
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = self
            .subnets
            .iter()
            .find(|subnet| !seen.insert(subnet.name.to_lowercase()))
        {
            return Err(CloudError::invalid(
                name,
                format!("subnet '{}' is defined twice", duplicate.name),
            ));
        }
        Ok(())
    }

    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<Network<T>, CloudError> {
        Provision::<T>::check(&self, name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let payload = self.payload(&region);
        let resolved = DependencyGraph::new(name)
            .with(Step::Group(self.group))
            .resolve(ctx, &region, inherited)?;
        let group = resolved.group(name)?;
        let id = ResourceId::new(ctx.subscription(), group.group(), ResourceType::Network, name);
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> NetworkDefinition<T, S> {
    /// Adds a subnet. Subnets are created in the order they are added.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>, cidr: impl Into<String>) -> Self {
        self.spec.subnets.push(Subnet::new(name, cidr));
        self
    }
}

impl<T> NetworkDefinition<T, NeedsAddressSpace> {
    /// Adds the first address space.
    #[must_use]
    pub fn with_address_space(mut self, cidr: impl Into<String>) -> NetworkDefinition<T, Provisionable> {
        self.spec.address_spaces.push(cidr.into());
        self.advance()
    }
}

impl<T: Transport> NetworkDefinition<T, Provisionable> {
    /// Adds another address space.
    #[must_use]
    pub fn with_address_space(mut self, cidr: impl Into<String>) -> Self {
        self.spec.address_spaces.push(cidr.into());
        self
    }

    /// Creates the network, and its group if requested.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for malformed address
    /// ranges, dependency errors for the group, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects a
    /// request.
    pub fn provision(self) -> Result<Network<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> Network<T> {
    /// Address spaces of the network.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn address_spaces(&mut self) -> Result<Vec<String>, CloudError> {
        Ok(self
            .inner()?
            .get_array(ADDRESS_PREFIXES)
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect())
    }

    /// Subnets in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn subnets(&mut self) -> Result<Vec<Subnet>, CloudError> {
        Ok(self
            .inner()?
            .get_array(SUBNETS)
            .iter()
            .filter_map(Subnet::from_json)
            .collect())
    }

    /// Identity of a subnet of this network. Makes no provider call.
    #[must_use]
    pub fn subnet_id(&self, name: &str) -> ResourceId {
        self.identity().child("subnets", name)
    }
}

impl<T: Transport> NetworkUpdate<T> {
    /// Adds an address space unless it is already present.
    #[must_use]
    pub fn with_address_space(mut self, range: impl Into<String>) -> Self {
        let cidr = range.into();
        if !is_cidr(&cidr) {
            self.reject(format!("'{cidr}' is not a CIDR block"));
            return self;
        }
        let mut spaces = self.payload().get_array(ADDRESS_PREFIXES).to_vec();
        if !spaces.iter().any(|space| space.as_str() == Some(cidr.as_str())) {
            spaces.push(Value::String(cidr));
        }
        self.payload_mut().set(ADDRESS_PREFIXES, Value::Array(spaces));
        self
    }

    /// Adds a subnet, or changes the prefix of an existing one.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>, cidr: impl Into<String>) -> Self {
        let subnet = Subnet::new(name, cidr);
        if !is_cidr(&subnet.address_prefix) {
            self.reject(format!("'{}' is not a CIDR block", subnet.address_prefix));
            return self;
        }
        let mut subnets = self.payload().get_array(SUBNETS).to_vec();
        let existing = subnets.iter_mut().find(|item| {
            item.get("name")
                .and_then(Value::as_str)
                .is_some_and(|current| names_match(current, &subnet.name))
        });
        match existing {
            Some(item) => {
                let mut edited = Payload::from_value(item.take()).unwrap_or_default();
                edited.set("properties.addressPrefix", subnet.address_prefix.as_str());
                *item = edited.into_value();
            }
            None => subnets.push(subnet.to_json()),
        }
        self.payload_mut().set(SUBNETS, Value::Array(subnets));
        self
    }

    /// Removes a subnet if present.
    #[must_use]
    pub fn without_subnet(mut self, name: &str) -> Self {
        let subnets: Vec<Value> = self
            .payload()
            .get_array(SUBNETS)
            .iter()
            .filter(|item| {
                !item
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|current| names_match(current, name))
            })
            .cloned()
            .collect();
        self.payload_mut().set(SUBNETS, Value::Array(subnets));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cloud;
    use crate::stage::{WithGroup, WithRegion};
    use crate::test_support::StubTransport;
    use rstest::{fixture, rstest};

    #[fixture]
    fn stub() -> StubTransport {
        StubTransport::new()
    }

    #[rstest]
    #[case("10.0.0.0/16", true)]
    #[case("fd00::/64", true)]
    #[case("10.0.0.0/33", false)]
    #[case("10.0.0.0", false)]
    #[case("ten/8", false)]
    fn cidr_validation(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(is_cidr(text), expected);
    }

    #[rstest]
    fn network_with_new_group_creates_group_first(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");

        let mut network = cloud
            .networks()
            .define("net1")
            .with_region("westus")
            .with_new_group()
            .with_address_space("10.1.0.0/16")
            .with_subnet("front", "10.1.1.0/24")
            .with_subnet("back", "10.1.2.0/24")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        assert_eq!(
            stub.put_order(),
            vec![
                String::from("/subscriptions/sub/resourceGroups/net1group"),
                String::from(
                    "/subscriptions/sub/resourceGroups/net1group/providers/Microsoft.Network/virtualNetworks/net1"
                ),
            ]
        );
        let subnets = network.subnets().unwrap_or_else(|err| panic!("subnets: {err}"));
        assert_eq!(
            subnets,
            vec![
                Subnet::new("front", "10.1.1.0/24"),
                Subnet::new("back", "10.1.2.0/24")
            ]
        );
    }

    #[rstest]
    fn default_subnet_spans_first_address_space(stub: StubTransport) {
        stub.seed_group("sub", "rg", "westus");
        let cloud = Cloud::new(stub, "sub");
        let mut network = cloud
            .networks()
            .define("net1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_address_space("192.168.0.0/24")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));
        let subnets = network.subnets().unwrap_or_else(|err| panic!("subnets: {err}"));
        assert_eq!(subnets, vec![Subnet::new("subnet1", "192.168.0.0/24")]);
    }

    #[rstest]
    fn malformed_address_space_fails_before_any_call(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .networks()
            .define("net1")
            .with_region("westus")
            .with_new_group()
            .with_address_space("not-a-range")
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn update_adds_subnet_and_rejects_bad_ranges(stub: StubTransport) {
        stub.seed_group("sub", "rg", "westus");
        let cloud = Cloud::new(stub.clone(), "sub").with_default_group("rg");
        cloud
            .networks()
            .define("net1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_address_space("10.0.0.0/16")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let mut updated = cloud
            .networks()
            .update("net1")
            .unwrap_or_else(|err| panic!("update: {err}"))
            .with_subnet("extra", "10.0.9.0/24")
            .without_subnet("subnet1")
            .apply()
            .unwrap_or_else(|err| panic!("apply: {err}"));
        let subnets = updated.subnets().unwrap_or_else(|err| panic!("subnets: {err}"));
        assert_eq!(subnets, vec![Subnet::new("extra", "10.0.9.0/24")]);

        let rejected = cloud
            .networks()
            .update("net1")
            .unwrap_or_else(|err| panic!("update: {err}"))
            .with_address_space("bogus")
            .apply();
        assert!(matches!(
            rejected,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
    }
}
