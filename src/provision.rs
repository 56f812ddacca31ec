//! Dependency resolution and provisioning.
//!
//! A primary resource's dependency slots become [`Step`]s of a
//! [`DependencyGraph`]. The graph is sorted into the fixed topological order
//! of [`DependencyKind`], validated without touching the network, and then
//! resolved one step at a time. Only once every step has resolved is the
//! primary resource submitted. Dependencies created along the way are not
//! rolled back if a later step fails.

use tracing::{debug, info};

use crate::context::Context;
use crate::dependency::{DependencyKind, ExistingRef, NewDependency, Requirement, Slot};
use crate::entity::{Entity, Wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType, names_match};
use crate::payload::{Payload, Tags};
use crate::resources::{
    AvailabilitySetSpec, NetworkInterfaceSpec, NetworkSpec, PublicIpSpec, ResourceGroupSpec,
    StorageAccountSpec,
};
use crate::transport::Transport;

/// Specs that can be submitted on their own or as nested dependencies.
pub(crate) trait Provision<T: Transport>: Default {
    /// Wrapper returned once the resource exists.
    type Output: Wrapper<T>;

    /// Value-level checks that need no provider call.
    fn check(&self, _name: &str) -> Result<(), CloudError> {
        Ok(())
    }

    /// Resolves dependencies and creates the resource.
    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<Self::Output, CloudError>;
}

/// Values a nested definition takes from the resource that asked for it
/// when its own slots are unset.
#[derive(Clone, Debug, Default)]
pub(crate) struct Inherited {
    pub(crate) region: Option<String>,
    pub(crate) group: Option<ResourceId>,
    pub(crate) network: Option<ResourceId>,
    pub(crate) subnet: Option<ResourceId>,
    pub(crate) public_ip: Option<ResourceId>,
}

impl Inherited {
    /// Region for `resource`: its own when set, otherwise the inherited one.
    pub(crate) fn region(&self, resource: &str, own: Option<&str>) -> Result<String, CloudError> {
        own.or(self.region.as_deref())
            .map(str::to_owned)
            .ok_or_else(|| CloudError::invalid(resource, "no region was set and none can be inherited"))
    }
}

/// A dependency whose identity is known, with its payload when one was
/// returned.
#[derive(Clone, Debug)]
pub(crate) struct Located {
    pub(crate) id: ResourceId,
    pub(crate) payload: Option<Payload>,
}

impl Located {
    /// Payload of the dependency, fetched if it is not known yet.
    pub(crate) fn payload<T: Transport>(
        &mut self,
        ctx: &Context<T>,
        resource: &str,
        kind: DependencyKind,
    ) -> Result<&Payload, CloudError> {
        if self.payload.is_none() {
            let fetched = ctx
                .transport()
                .get(&self.id)
                .map_err(|source| CloudError::provider("lookup", &self.id, source))?
                .ok_or_else(|| not_found(resource, kind, &self.id))?;
            self.payload = Some(fetched);
        }
        self.payload
            .as_ref()
            .ok_or_else(|| not_found(resource, kind, &self.id))
    }
}

/// Outcome of resolving a graph, in the shape primary payloads need.
#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub(crate) group: Option<ResourceId>,
    pub(crate) network: Option<Located>,
    pub(crate) subnet: Option<ResourceId>,
    pub(crate) storage_account: Option<Located>,
    pub(crate) availability_set: Option<ResourceId>,
    pub(crate) public_ips: Vec<ResourceId>,
    pub(crate) network_interface: Option<ResourceId>,
}

impl Resolved {
    /// Group the primary resource is placed in.
    pub(crate) fn group(&self, resource: &str) -> Result<&ResourceId, CloudError> {
        self.group
            .as_ref()
            .ok_or_else(|| missing(resource, DependencyKind::ResourceGroup))
    }
}

/// One dependency slot of a primary resource.
#[derive(Clone, Debug)]
pub(crate) enum Step {
    Group(Slot<ResourceGroupSpec>),
    Network(Slot<NetworkSpec>, Requirement),
    /// Subnet of the resolved network; the first listed one when unnamed.
    Subnet(Option<String>),
    StorageAccount(Slot<StorageAccountSpec>, Requirement),
    AvailabilitySet(Slot<AvailabilitySetSpec>),
    PublicIps(Vec<Slot<PublicIpSpec>>, Requirement),
    NetworkInterface(Slot<NetworkInterfaceSpec>, Requirement),
}

impl Step {
    const fn kind(&self) -> DependencyKind {
        match self {
            Self::Group(_) => DependencyKind::ResourceGroup,
            Self::Network(..) => DependencyKind::Network,
            Self::Subnet(_) => DependencyKind::Subnet,
            Self::StorageAccount(..) => DependencyKind::StorageAccount,
            Self::AvailabilitySet(_) => DependencyKind::AvailabilitySet,
            Self::PublicIps(..) => DependencyKind::PublicIpAddress,
            Self::NetworkInterface(..) => DependencyKind::NetworkInterface,
        }
    }
}

/// Ordered dependency slots of one primary resource.
#[derive(Debug)]
pub(crate) struct DependencyGraph<'a> {
    resource: &'a str,
    steps: Vec<Step>,
}

impl<'a> DependencyGraph<'a> {
    pub(crate) const fn new(resource: &'a str) -> Self {
        Self {
            resource,
            steps: Vec::new(),
        }
    }

    pub(crate) fn with(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Fails fast on unset mandatory slots, malformed references, and
    /// invalid nested definitions. Makes no provider calls.
    pub(crate) fn validate<T: Transport>(
        &self,
        ctx: &Context<T>,
        inherited: &Inherited,
    ) -> Result<(), CloudError> {
        let group = self.planned_group(ctx, inherited)?;
        let checker = Checker {
            ctx,
            resource: self.resource,
            group: group.as_deref(),
        };
        for step in &self.steps {
            match step {
                Step::Group(_) | Step::Subnet(_) => {}
                Step::Network(slot, requirement) => checker.slot(
                    slot,
                    *requirement,
                    inherited.network.is_some(),
                    DependencyKind::Network,
                    0,
                )?,
                Step::StorageAccount(slot, requirement) => checker.slot(
                    slot,
                    *requirement,
                    false,
                    DependencyKind::StorageAccount,
                    0,
                )?,
                Step::AvailabilitySet(slot) => checker.slot(
                    slot,
                    Requirement::Optional,
                    false,
                    DependencyKind::AvailabilitySet,
                    0,
                )?,
                Step::PublicIps(slots, requirement) => {
                    if slots.iter().all(Slot::is_unset)
                        && *requirement == Requirement::Mandatory
                        && inherited.public_ip.is_none()
                    {
                        return Err(missing(self.resource, DependencyKind::PublicIpAddress));
                    }
                    for (ordinal, slot) in slots.iter().enumerate() {
                        checker.slot(
                            slot,
                            Requirement::Optional,
                            false,
                            DependencyKind::PublicIpAddress,
                            ordinal,
                        )?;
                    }
                }
                Step::NetworkInterface(slot, requirement) => checker.slot(
                    slot,
                    *requirement,
                    false,
                    DependencyKind::NetworkInterface,
                    0,
                )?,
            }
        }
        Ok(())
    }

    /// Validates the graph and returns the name of the group the primary
    /// resource will land in. Makes no provider calls.
    pub(crate) fn plan<T: Transport>(
        &self,
        ctx: &Context<T>,
        inherited: &Inherited,
    ) -> Result<String, CloudError> {
        self.validate(ctx, inherited)?;
        self.planned_group(ctx, inherited)?
            .ok_or_else(|| missing(self.resource, DependencyKind::ResourceGroup))
    }

    /// Name of the group the primary resource will land in, worked out
    /// without provider calls.
    fn planned_group<T: Transport>(
        &self,
        ctx: &Context<T>,
        inherited: &Inherited,
    ) -> Result<Option<String>, CloudError> {
        let inherited_group = inherited.group.as_ref().map(|id| id.group().to_owned());
        let Some(slot) = self.steps.iter().find_map(|step| match step {
            Step::Group(slot) => Some(slot),
            _ => None,
        }) else {
            return Ok(inherited_group);
        };
        match slot {
            Slot::Unset => inherited_group
                .map(Some)
                .ok_or_else(|| missing(self.resource, DependencyKind::ResourceGroup)),
            Slot::Existing(reference) => reference
                .resolve(ctx.subscription(), ResourceType::ResourceGroup, None)
                .map(|id| Some(id.group().to_owned())),
            Slot::New(dependency) => {
                let name = dependency.name.clone().unwrap_or_else(|| {
                    ctx.derive_name(self.resource, DependencyKind::ResourceGroup, 0)
                });
                check_new::<T, _>(dependency, &name)?;
                Ok(Some(name))
            }
        }
    }

    /// Validates, then resolves every step in topological order.
    pub(crate) fn resolve<T: Transport>(
        mut self,
        ctx: &Context<T>,
        region: &str,
        inherited: &Inherited,
    ) -> Result<Resolved, CloudError> {
        self.steps.sort_by_key(Step::kind);
        self.validate(ctx, inherited)?;
        let mut resolver = Resolver {
            ctx,
            resource: self.resource,
            region,
            inherited,
            resolved: Resolved::default(),
            network_inherited: false,
        };
        for step in self.steps {
            resolver.step(step)?;
        }
        Ok(resolver.resolved)
    }
}

struct Checker<'a, T> {
    ctx: &'a Context<T>,
    resource: &'a str,
    group: Option<&'a str>,
}

impl<T: Transport> Checker<'_, T> {
    fn slot<S: Provision<T>>(
        &self,
        slot: &Slot<S>,
        requirement: Requirement,
        inherited: bool,
        kind: DependencyKind,
        ordinal: usize,
    ) -> Result<(), CloudError> {
        match slot {
            Slot::Unset if requirement == Requirement::Mandatory && !inherited => {
                Err(missing(self.resource, kind))
            }
            Slot::Unset => Ok(()),
            Slot::Existing(reference) => reference
                .resolve(
                    self.ctx.subscription(),
                    <S::Output as Wrapper<T>>::RESOURCE_TYPE,
                    self.group,
                )
                .map(drop),
            Slot::New(dependency) => {
                let name = dependency
                    .name
                    .clone()
                    .unwrap_or_else(|| self.ctx.derive_name(self.resource, kind, ordinal));
                check_new::<T, S>(dependency, &name)
            }
        }
    }
}

fn check_new<T: Transport, S: Provision<T>>(
    dependency: &NewDependency<S>,
    name: &str,
) -> Result<(), CloudError> {
    match &dependency.spec {
        Some(spec) => spec.check(name),
        None => S::default().check(name),
    }
}

struct Resolver<'a, T> {
    ctx: &'a Context<T>,
    resource: &'a str,
    region: &'a str,
    inherited: &'a Inherited,
    resolved: Resolved,
    network_inherited: bool,
}

impl<T: Transport> Resolver<'_, T> {
    fn step(&mut self, step: Step) -> Result<(), CloudError> {
        match step {
            Step::Group(slot) => {
                let inherited = self.inherited.group.as_ref();
                self.resolved.group = self
                    .fill(slot, Requirement::Mandatory, DependencyKind::ResourceGroup, 0, inherited)?
                    .map(|located| located.id);
            }
            Step::Network(slot, requirement) => {
                self.network_inherited = slot.is_unset();
                let inherited = self.inherited.network.as_ref();
                self.resolved.network =
                    self.fill(slot, requirement, DependencyKind::Network, 0, inherited)?;
            }
            Step::Subnet(name) => self.subnet(name.as_deref())?,
            Step::StorageAccount(slot, requirement) => {
                self.resolved.storage_account =
                    self.fill(slot, requirement, DependencyKind::StorageAccount, 0, None)?;
            }
            Step::AvailabilitySet(slot) => {
                self.resolved.availability_set = self
                    .fill(
                        slot,
                        Requirement::Optional,
                        DependencyKind::AvailabilitySet,
                        0,
                        None,
                    )?
                    .map(|located| located.id);
            }
            Step::PublicIps(slots, requirement) => self.public_ips(slots, requirement)?,
            Step::NetworkInterface(slot, requirement) => {
                self.resolved.network_interface = self
                    .fill(slot, requirement, DependencyKind::NetworkInterface, 0, None)?
                    .map(|located| located.id);
            }
        }
        Ok(())
    }

    fn fill<S: Provision<T>>(
        &self,
        slot: Slot<S>,
        requirement: Requirement,
        kind: DependencyKind,
        ordinal: usize,
        inherited: Option<&ResourceId>,
    ) -> Result<Option<Located>, CloudError> {
        match slot {
            Slot::Unset => match inherited {
                Some(id) => {
                    debug!(resource = self.resource, dependency = %kind, id = %id, "inheriting dependency");
                    Ok(Some(Located {
                        id: id.clone(),
                        payload: None,
                    }))
                }
                None if requirement == Requirement::Mandatory => Err(missing(self.resource, kind)),
                None => Ok(None),
            },
            Slot::Existing(reference) => self.existing::<S>(&reference, kind).map(Some),
            Slot::New(dependency) => self.create(dependency, kind, ordinal).map(Some),
        }
    }

    fn group_name(&self) -> Option<String> {
        self.resolved
            .group
            .as_ref()
            .or(self.inherited.group.as_ref())
            .map(|id| id.group().to_owned())
    }

    fn existing<S: Provision<T>>(
        &self,
        reference: &ExistingRef,
        kind: DependencyKind,
    ) -> Result<Located, CloudError> {
        let group = self.group_name();
        let id = reference.resolve(
            self.ctx.subscription(),
            <S::Output as Wrapper<T>>::RESOURCE_TYPE,
            group.as_deref(),
        )?;
        debug!(resource = self.resource, dependency = %kind, id = %id, "looking up existing dependency");
        match self.ctx.transport().get(&id) {
            Ok(Some(payload)) => Ok(Located {
                id,
                payload: Some(payload),
            }),
            Ok(None) => Err(not_found(self.resource, kind, &id)),
            Err(source) => Err(CloudError::provider("lookup", &id, source)),
        }
    }

    fn create<S: Provision<T>>(
        &self,
        dependency: NewDependency<S>,
        kind: DependencyKind,
        ordinal: usize,
    ) -> Result<Located, CloudError> {
        let name = dependency
            .name
            .unwrap_or_else(|| self.ctx.derive_name(self.resource, kind, ordinal));
        debug!(resource = self.resource, dependency = %kind, name = %name, "creating dependency");
        let wrapper = dependency
            .spec
            .unwrap_or_default()
            .provision(self.ctx, &name, &self.child_inherited())?;
        Ok(Located {
            id: wrapper.identity().clone(),
            payload: wrapper.entity().loaded().cloned(),
        })
    }

    fn child_inherited(&self) -> Inherited {
        Inherited {
            region: Some(self.region.to_owned()),
            group: self
                .resolved
                .group
                .clone()
                .or_else(|| self.inherited.group.clone()),
            network: self
                .resolved
                .network
                .as_ref()
                .map(|network| network.id.clone()),
            subnet: self.resolved.subnet.clone(),
            public_ip: self.resolved.public_ips.first().cloned(),
        }
    }

    fn subnet(&mut self, name: Option<&str>) -> Result<(), CloudError> {
        if self.network_inherited && name.is_none() && self.inherited.subnet.is_some() {
            self.resolved.subnet.clone_from(&self.inherited.subnet);
            return Ok(());
        }
        let Some(network) = self.resolved.network.as_mut() else {
            self.resolved.subnet.clone_from(&self.inherited.subnet);
            return Ok(());
        };
        let network_id = network.id.clone();
        let payload = network.payload(self.ctx, self.resource, DependencyKind::Network)?;
        let mut listed = payload
            .get_array("properties.subnets")
            .iter()
            .filter_map(|subnet| subnet.get("name").and_then(serde_json::Value::as_str));
        let chosen = match name {
            Some(wanted) => listed.find(|candidate| names_match(candidate, wanted)),
            None => listed.next(),
        }
        .map(str::to_owned);
        let Some(subnet) = chosen else {
            let wanted = network_id.child("subnets", name.unwrap_or("*"));
            return Err(not_found(self.resource, DependencyKind::Subnet, &wanted));
        };
        let id = network_id.child("subnets", subnet);
        debug!(resource = self.resource, subnet = %id, "selected subnet");
        self.resolved.subnet = Some(id);
        Ok(())
    }

    fn public_ips(
        &mut self,
        slots: Vec<Slot<PublicIpSpec>>,
        requirement: Requirement,
    ) -> Result<(), CloudError> {
        if slots.iter().all(Slot::is_unset) {
            let inherited = self.inherited.public_ip.clone();
            match inherited {
                Some(id) => self.resolved.public_ips.push(id),
                None if requirement == Requirement::Mandatory => {
                    return Err(missing(self.resource, DependencyKind::PublicIpAddress));
                }
                None => {}
            }
            return Ok(());
        }
        for (ordinal, slot) in slots.into_iter().enumerate() {
            if let Some(located) = self.fill(
                slot,
                Requirement::Optional,
                DependencyKind::PublicIpAddress,
                ordinal,
                None,
            )? {
                self.resolved.public_ips.push(located.id);
            }
        }
        Ok(())
    }
}

/// Submits a create or update and wraps the provider's answer.
///
/// A response without a body yields an uninitialized wrapper.
pub(crate) fn submit<T: Transport, W: Wrapper<T>>(
    ctx: &Context<T>,
    id: ResourceId,
    payload: &Payload,
    operation: &'static str,
) -> Result<W, CloudError> {
    info!(resource = %id, kind = %W::RESOURCE_TYPE, operation, "submitting resource");
    let response = ctx
        .transport()
        .put(&id, payload)
        .map_err(|source| CloudError::provider(operation, &id, source))?;
    Ok(W::from_entity(Entity::from_response(ctx.clone(), id, response)))
}

/// Location and tags shared by every create payload.
pub(crate) fn base_payload(region: &str, tags: &Tags) -> Payload {
    let mut payload = Payload::new();
    payload.set("location", region);
    payload.set_tags(tags);
    payload
}

pub(crate) fn missing(resource: &str, kind: DependencyKind) -> CloudError {
    CloudError::MissingRequiredDependency {
        resource: resource.to_owned(),
        kind,
    }
}

pub(crate) fn not_found(resource: &str, kind: DependencyKind, id: &ResourceId) -> CloudError {
    CloudError::DependencyNotFound {
        resource: resource.to_owned(),
        kind,
        id: id.to_string(),
    }
}
