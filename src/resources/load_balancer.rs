//! Load balancers.
//!
//! A load balancer needs at least one public frontend. Backend machines must
//! already exist and are looked up before anything is created; once the
//! balancer is created, each machine's primary network interface is updated
//! to join the backend pool.

use std::collections::BTreeSet;
use std::mem;

use serde_json::{Value, json};
use tracing::info;

use crate::context::Context;
use crate::dependency::{DependencyKind, ExistingRef, NewDependency, Requirement, Slot};
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags, reference};
use crate::provision::{
    DependencyGraph, Inherited, Provision, Step, base_payload, not_found, submit,
};
use crate::resources::network_interface::IP_CONFIGURATIONS;
use crate::resources::{NetworkInterface, PublicIpSpec, ResourceGroupSpec};
use crate::stage::{Blank, Definition, Grouped, NeedsGroup, Provisionable, Regional, WithTags};
use crate::transport::Transport;
use crate::update::Update;

const FRONTENDS: &str = "properties.frontendIPConfigurations";
const BACKEND_POOLS: &str = "properties.backendAddressPools";
const RULES: &str = "properties.loadBalancingRules";
const BACKEND_POOL: &str = "backend";
const FRONTEND: &str = "frontend";
const VM_INTERFACES: &str = "properties.networkProfile.networkInterfaces";

wrapper!(
    /// A load balancer.
    LoadBalancer,
    ResourceType::LoadBalancer,
    LoadBalancerSpec
);

/// Load balancer definition at stage `S`.
pub type LoadBalancerDefinition<T, S = Blank> = Definition<T, LoadBalancerSpec, S>;

/// Pending changes to a load balancer.
pub type LoadBalancerUpdate<T> = Update<T, LoadBalancer<T>>;

/// TCP forwarding from a frontend port to a backend port.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct TcpRule {
    /// Port exposed on the public frontend.
    pub frontend_port: u16,
    /// Port the backend machines listen on.
    pub backend_port: u16,
}

impl TcpRule {
    /// Creates a rule.
    #[must_use]
    pub const fn new(frontend_port: u16, backend_port: u16) -> Self {
        Self {
            frontend_port,
            backend_port,
        }
    }

    fn name(self) -> String {
        format!("tcp{}", self.frontend_port)
    }

    fn to_json(self, balancer: &ResourceId) -> Value {
        json!({
            "name": self.name(),
            "properties": {
                "protocol": "Tcp",
                "frontendPort": self.frontend_port,
                "backendPort": self.backend_port,
                "frontendIPConfiguration": reference(&balancer.child("frontendIPConfigurations", FRONTEND)),
                "backendAddressPool": reference(&balancer.child("backendAddressPools", BACKEND_POOL)),
            },
        })
    }

    fn from_json(value: &Value) -> Option<Self> {
        let port = |pointer: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_u64)
                .and_then(|number| u16::try_from(number).ok())
        };
        Some(Self::new(
            port("/properties/frontendPort")?,
            port("/properties/backendPort")?,
        ))
    }
}

/// Values needed to create a load balancer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadBalancerSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    frontends: Vec<Slot<PublicIpSpec>>,
    backends: Vec<ExistingRef>,
    rules: Vec<TcpRule>,
}

impl LoadBalancerSpec {
    fn check_rules(&self, name: &str) -> Result<(), CloudError> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if rule.frontend_port == 0 || rule.backend_port == 0 {
                return Err(CloudError::invalid(name, "rule ports must be non-zero"));
            }
            if !seen.insert(rule.frontend_port) {
                return Err(CloudError::invalid(
                    name,
                    format!("frontend port {} is used by two rules", rule.frontend_port),
                ));
            }
        }
        Ok(())
    }

    fn payload(&self, region: &str, id: &ResourceId, frontends: &[ResourceId]) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        let configurations: Vec<Value> = frontends
            .iter()
            .enumerate()
            .map(|(index, public_ip)| {
                json!({
                    "name": frontend_name(index),
                    "properties": { "publicIPAddress": reference(public_ip) },
                })
            })
            .collect();
        payload.set(FRONTENDS, Value::Array(configurations));
        payload.set(BACKEND_POOLS, json!([{ "name": BACKEND_POOL }]));
        payload.set(
            RULES,
            Value::Array(self.rules.iter().map(|rule| rule.to_json(id)).collect()),
        );
        payload
    }
}

fn frontend_name(index: usize) -> String {
    if index == 0 {
        FRONTEND.to_owned()
    } else {
        format!("{FRONTEND}{index}")
    }
}

impl Regional for LoadBalancerSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for LoadBalancerSpec {
    type AfterGroup = Provisionable;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl WithTags for LoadBalancerSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for LoadBalancerSpec {
    type Output = LoadBalancer<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        self.check_rules(name)
    }

    fn provision(
        mut self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<LoadBalancer<T>, CloudError> {
        self.check_rules(name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let graph = DependencyGraph::new(name)
            .with(Step::Group(mem::take(&mut self.group)))
            .with(Step::PublicIps(
                mem::take(&mut self.frontends),
                Requirement::Mandatory,
            ));
        let planned = graph.plan(ctx, inherited)?;
        let members = self
            .backends
            .iter()
            .map(|backend| primary_interface(ctx, name, &planned, backend))
            .collect::<Result<Vec<_>, _>>()?;
        let resolved = graph.resolve(ctx, &region, inherited)?;
        let group = resolved.group(name)?;
        let id = ResourceId::new(
            ctx.subscription(),
            group.group(),
            ResourceType::LoadBalancer,
            name,
        );
        let payload = self.payload(&region, &id, &resolved.public_ips);
        let pool = id.child("backendAddressPools", BACKEND_POOL);
        let balancer: LoadBalancer<T> = submit(ctx, id, &payload, "create")?;
        for interface in members {
            join_pool(ctx, &interface, &pool)?;
        }
        Ok(balancer)
    }
}

/// Looks up a backend machine and returns its primary network interface.
fn primary_interface<T: Transport>(
    ctx: &Context<T>,
    resource: &str,
    group: &str,
    backend: &ExistingRef,
) -> Result<ResourceId, CloudError> {
    let machine = backend.resolve(
        ctx.subscription(),
        ResourceType::VirtualMachine,
        Some(group),
    )?;
    let payload = ctx
        .transport()
        .get(&machine)
        .map_err(|source| CloudError::provider("lookup", &machine, source))?
        .ok_or_else(|| not_found(resource, DependencyKind::VirtualMachine, &machine))?;
    let interfaces = payload.get_array(VM_INTERFACES);
    interfaces
        .iter()
        .find(|item| {
            item.pointer("/properties/primary")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .or_else(|| interfaces.first())
        .and_then(|item| item.get("id").and_then(Value::as_str))
        .and_then(|text| ResourceId::parse(text).ok())
        .ok_or_else(|| {
            CloudError::invalid(
                resource,
                format!("backend {machine} has no network interface"),
            )
        })
}

/// Adds the backend pool to the primary IP configuration of `interface`.
fn join_pool<T: Transport>(
    ctx: &Context<T>,
    interface: &ResourceId,
    pool: &ResourceId,
) -> Result<(), CloudError> {
    let mut payload = ctx
        .transport()
        .get(interface)
        .map_err(|source| CloudError::provider("lookup", interface, source))?
        .ok_or_else(|| {
            not_found(
                pool.short_name(),
                DependencyKind::NetworkInterface,
                interface,
            )
        })?;
    let joined = payload.edit_first(IP_CONFIGURATIONS, |configuration| {
        let mut pools = configuration
            .get_array("properties.loadBalancerBackendAddressPools")
            .to_vec();
        let wanted = pool.to_string();
        let present = pools.iter().any(|item| {
            item.get("id")
                .and_then(Value::as_str)
                .is_some_and(|current| current.eq_ignore_ascii_case(&wanted))
        });
        if !present {
            pools.push(reference(&wanted));
        }
        configuration.set("properties.loadBalancerBackendAddressPools", Value::Array(pools));
    });
    if !joined {
        return Err(CloudError::invalid(
            interface.short_name(),
            "network interface has no IP configuration",
        ));
    }
    info!(interface = %interface, pool = %pool, "joining backend pool");
    submit::<T, NetworkInterface<T>>(ctx, interface.clone(), &payload, "update").map(drop)
}

impl<T, S> LoadBalancerDefinition<T, S> {
    fn with_frontend(mut self, slot: Slot<PublicIpSpec>) -> Self {
        self.spec.frontends.push(slot);
        self
    }

    /// Adds an existing public IP address as a frontend.
    #[must_use]
    pub fn with_existing_frontend(self, address: impl Into<ExistingRef>) -> Self {
        self.with_frontend(Slot::existing(address))
    }

    /// Adds a new dynamic public IP frontend with a derived name. Additional
    /// frontends get a numeric suffix.
    #[must_use]
    pub fn with_new_frontend(self) -> Self {
        self.with_frontend(Slot::New(NewDependency::derived()))
    }

    /// Adds a new dynamic public IP frontend with an explicit name.
    #[must_use]
    pub fn with_new_frontend_named(self, name: impl Into<String>) -> Self {
        self.with_frontend(Slot::New(NewDependency::named(name)))
    }

    /// Adds a public IP frontend from a nested definition.
    #[must_use]
    pub fn with_new_frontend_definition(
        self,
        definition: impl Into<NewDependency<PublicIpSpec>>,
    ) -> Self {
        self.with_frontend(Slot::New(definition.into()))
    }

    /// Adds existing machines to the backend pool.
    #[must_use]
    pub fn with_existing_virtual_machines<R: Into<ExistingRef>>(
        mut self,
        machines: impl IntoIterator<Item = R>,
    ) -> Self {
        self.spec.backends.extend(machines.into_iter().map(Into::into));
        self
    }

    /// Forwards TCP traffic from a frontend port to a backend port.
    #[must_use]
    pub fn with_tcp_rule(mut self, frontend_port: u16, backend_port: u16) -> Self {
        self.spec
            .rules
            .push(TcpRule::new(frontend_port, backend_port));
        self
    }
}

impl<T: Transport> LoadBalancerDefinition<T, Provisionable> {
    /// Creates the balancer, its frontends, and joins the backend machines.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MissingRequiredDependency`] when no frontend was
    /// given, [`CloudError::DependencyNotFound`] for absent backend
    /// machines, [`CloudError::InvalidDefinitionState`] for conflicting
    /// rules, and [`CloudError::ProviderRequestFailed`] when the provider
    /// rejects a request.
    pub fn provision(self) -> Result<LoadBalancer<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> LoadBalancer<T> {
    /// Public IP addresses of every frontend.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn public_ip_ids(&mut self) -> Result<Vec<ResourceId>, CloudError> {
        Ok(self
            .inner()?
            .get_array(FRONTENDS)
            .iter()
            .filter_map(|item| item.pointer("/properties/publicIPAddress/id"))
            .filter_map(Value::as_str)
            .filter_map(|text| ResourceId::parse(text).ok())
            .collect())
    }

    /// Names of the backend pools.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn backend_pools(&mut self) -> Result<Vec<String>, CloudError> {
        Ok(self
            .inner()?
            .get_array(BACKEND_POOLS)
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect())
    }

    /// TCP forwarding rules.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn tcp_rules(&mut self) -> Result<Vec<TcpRule>, CloudError> {
        Ok(self
            .inner()?
            .get_array(RULES)
            .iter()
            .filter_map(TcpRule::from_json)
            .collect())
    }
}

impl<T: Transport> LoadBalancerUpdate<T> {
    /// Adds a rule, replacing any rule on the same frontend port.
    #[must_use]
    pub fn with_tcp_rule(mut self, frontend_port: u16, backend_port: u16) -> Self {
        let rule = TcpRule::new(frontend_port, backend_port);
        if frontend_port == 0 || backend_port == 0 {
            self.reject("rule ports must be non-zero");
            return self;
        }
        let balancer = self.identity().clone();
        let mut rules = self.rules_without(frontend_port);
        rules.push(rule.to_json(&balancer));
        self.payload_mut().set(RULES, Value::Array(rules));
        self
    }

    /// Removes the rule on a frontend port if present.
    #[must_use]
    pub fn without_tcp_rule(mut self, frontend_port: u16) -> Self {
        let rules = self.rules_without(frontend_port);
        self.payload_mut().set(RULES, Value::Array(rules));
        self
    }

    fn rules_without(&self, frontend_port: u16) -> Vec<Value> {
        self.payload()
            .get_array(RULES)
            .iter()
            .filter(|item| {
                TcpRule::from_json(item).is_none_or(|rule| rule.frontend_port != frontend_port)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cloud;
    use crate::stage::{WithGroup, WithRegion};
    use crate::test_support::StubTransport;
    use rstest::{fixture, rstest};

    const GROUP: &str = "/subscriptions/sub/resourceGroups/rg";

    #[fixture]
    fn stub() -> StubTransport {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        stub
    }

    fn seed_machine(stub: &StubTransport, name: &str) -> String {
        let nic = format!("{GROUP}/providers/Microsoft.Network/networkInterfaces/{name}nic");
        stub.insert_json(json!({
            "id": nic,
            "name": format!("{name}nic"),
            "location": "westus",
            "properties": { "ipConfigurations": [{ "name": "primary", "properties": {} }] },
        }));
        stub.insert_json(json!({
            "id": format!("{GROUP}/providers/Microsoft.Compute/virtualMachines/{name}"),
            "name": name,
            "location": "westus",
            "properties": {
                "networkProfile": {
                    "networkInterfaces": [{ "id": nic, "properties": { "primary": true } }],
                },
            },
        }));
        nic
    }

    #[rstest]
    fn frontend_is_mandatory(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_tcp_rule(80, 8080)
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::MissingRequiredDependency {
                kind: DependencyKind::PublicIpAddress,
                ..
            })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn frontends_get_ordinal_names(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut balancer = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend()
            .with_new_frontend()
            .with_tcp_rule(80, 8080)
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let names: Vec<String> = balancer
            .public_ip_ids()
            .unwrap_or_else(|err| panic!("frontends: {err}"))
            .iter()
            .map(|id| id.short_name().to_owned())
            .collect();
        assert_eq!(names, vec![String::from("lb1pip"), String::from("lb1pip1")]);
        let rules = balancer
            .tcp_rules()
            .unwrap_or_else(|err| panic!("rules: {err}"));
        assert_eq!(rules, vec![TcpRule::new(80, 8080)]);
        assert_eq!(stub.put_count(ResourceType::PublicIpAddress), 2);
    }

    #[rstest]
    fn backend_machines_join_the_pool(stub: StubTransport) {
        let nic = seed_machine(&stub, "web1");
        let cloud = Cloud::new(stub.clone(), "sub").with_default_group("rg");
        let mut balancer = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend_named("lbfront")
            .with_existing_virtual_machines(["web1"])
            .with_tcp_rule(443, 8443)
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let pools = balancer
            .backend_pools()
            .unwrap_or_else(|err| panic!("pools: {err}"));
        assert_eq!(pools, vec![String::from(BACKEND_POOL)]);

        let mut card = cloud
            .network_interfaces()
            .get(&nic)
            .unwrap_or_else(|err| panic!("nic: {err}"));
        let joined = card
            .backend_pool_ids()
            .unwrap_or_else(|err| panic!("pools: {err}"));
        assert_eq!(
            joined,
            vec![balancer.identity().child("backendAddressPools", BACKEND_POOL)]
        );
    }

    #[rstest]
    fn absent_backend_leaves_no_frontends_behind(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend()
            .with_existing_virtual_machines(["ghost"])
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::DependencyNotFound {
                kind: DependencyKind::VirtualMachine,
                ..
            })
        ));
        assert!(stub.put_order().is_empty(), "created {:?}", stub.put_order());
        assert_eq!(stub.put_count(ResourceType::PublicIpAddress), 0);
    }

    #[rstest]
    fn backend_of_another_type_is_rejected_before_lookup(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend()
            .with_existing_virtual_machines([
                "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/net1",
            ])
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn duplicate_frontend_ports_are_rejected(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend()
            .with_tcp_rule(80, 8080)
            .with_tcp_rule(80, 9090)
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn update_replaces_rules_by_frontend_port(stub: StubTransport) {
        let cloud = Cloud::new(stub, "sub").with_default_group("rg");
        let balancer = cloud
            .load_balancers()
            .define("lb1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_frontend()
            .with_tcp_rule(80, 8080)
            .with_tcp_rule(22, 22)
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let mut updated = balancer
            .update()
            .unwrap_or_else(|err| panic!("update: {err}"))
            .with_tcp_rule(80, 8081)
            .without_tcp_rule(22)
            .apply()
            .unwrap_or_else(|err| panic!("apply: {err}"));
        let rules = updated
            .tcp_rules()
            .unwrap_or_else(|err| panic!("rules: {err}"));
        assert_eq!(rules, vec![TcpRule::new(80, 8081)]);
    }
}
