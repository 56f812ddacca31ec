//! Staged definitions.
//!
//! A [`Definition`] carries a stage marker type. Each stage only exposes the
//! methods valid at that point, so calling `provision()` before the region,
//! group, and kind-specific required properties are set does not compile.
//! Shared steps are expressed as capability traits ([`WithRegion`],
//! [`WithGroup`], [`WithNetwork`], [`WithPublicIp`], [`WithTags`]);
//! kind-specific steps are inherent methods on the relevant stage.

use std::fmt;
use std::marker::PhantomData;

use crate::context::Context;
use crate::dependency::{ExistingRef, NewDependency, Slot};
use crate::payload::Tags;
use crate::resources::{NetworkSpec, PublicIpSpec, ResourceGroupSpec};

/// Nothing has been set yet; only the region can be chosen.
#[derive(Clone, Copy, Debug)]
pub struct Blank;

/// Region is set; a resource group must be chosen next.
#[derive(Clone, Copy, Debug)]
pub struct NeedsGroup;

/// Group is set; a network needs at least one address space.
#[derive(Clone, Copy, Debug)]
pub struct NeedsAddressSpace;

/// Group is set; a network must be chosen next.
#[derive(Clone, Copy, Debug)]
pub struct NeedsNetwork;

/// Network is set; a virtual machine needs an image.
#[derive(Clone, Copy, Debug)]
pub struct NeedsImage;

/// Image is set; a virtual machine needs admin credentials.
#[derive(Clone, Copy, Debug)]
pub struct NeedsCredentials;

/// Every mandatory property is set; `provision()` is available.
#[derive(Clone, Copy, Debug)]
pub struct Provisionable;

/// In-progress definition of a resource named `name`.
///
/// `Sp` is the kind's spec (the plain data collected so far) and `S` is the
/// stage marker. The definition owns its dependency slots until
/// `provision()` consumes it.
pub struct Definition<T, Sp, S> {
    pub(crate) ctx: Context<T>,
    pub(crate) name: String,
    pub(crate) spec: Sp,
    _stage: PhantomData<S>,
}

impl<T: fmt::Debug, Sp: fmt::Debug, S> fmt::Debug for Definition<T, Sp, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("stage", &std::any::type_name::<S>())
            .field("spec", &self.spec)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<T, Sp: Default> Definition<T, Sp, Blank> {
    pub(crate) fn new(ctx: Context<T>, name: String) -> Self {
        Self {
            ctx,
            name,
            spec: Sp::default(),
            _stage: PhantomData,
        }
    }
}

impl<T, Sp, S> Definition<T, Sp, S> {
    /// Name the resource will be created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values collected so far.
    #[must_use]
    pub const fn spec(&self) -> &Sp {
        &self.spec
    }

    /// Moves the definition to another stage.
    pub(crate) fn advance<N>(self) -> Definition<T, Sp, N> {
        Definition {
            ctx: self.ctx,
            name: self.name,
            spec: self.spec,
            _stage: PhantomData,
        }
    }
}

impl<T, Sp, S> From<Definition<T, Sp, S>> for NewDependency<Sp> {
    /// Uses a definition as a nested dependency; its name is kept and unset
    /// region or group are inherited from the primary resource.
    fn from(value: Definition<T, Sp, S>) -> Self {
        Self {
            name: Some(value.name),
            spec: Some(value.spec),
        }
    }
}

impl<Sp: Regional> From<Sp> for NewDependency<Sp> {
    fn from(value: Sp) -> Self {
        Self::from_spec(value)
    }
}

/// Specs that carry a region.
pub trait Regional {
    /// Stage reached once the region is set.
    type AfterRegion;

    /// Stores the region.
    fn set_region(&mut self, region: String);
}

/// Specs that live inside a resource group.
pub trait Grouped {
    /// Stage reached once the group is chosen.
    type AfterGroup;

    /// Slot holding the group choice.
    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec>;
}

/// Specs attached to a virtual network.
pub trait Networked {
    /// Stage reached once the network is chosen.
    type AfterNetwork;

    /// Stores the network choice.
    fn set_network(&mut self, slot: Slot<NetworkSpec>);
}

/// Maps a stage to the stage reached after choosing a group.
pub trait GroupTransition<Sp> {
    /// Resulting stage.
    type Next;
}

/// Maps a stage to the stage reached after choosing a network.
pub trait NetworkTransition<Sp> {
    /// Resulting stage.
    type Next;
}

impl<Sp: Grouped> GroupTransition<Sp> for NeedsGroup {
    type Next = Sp::AfterGroup;
}

impl<Sp: Networked> NetworkTransition<Sp> for NeedsNetwork {
    type Next = Sp::AfterNetwork;
}

macro_rules! keeps_stage {
    ($transition:ident: $($stage:ty),+) => {
        $(
            impl<Sp> $transition<Sp> for $stage {
                type Next = Self;
            }
        )+
    };
}

keeps_stage!(GroupTransition: NeedsAddressSpace, NeedsNetwork, NeedsImage, NeedsCredentials, Provisionable);
keeps_stage!(NetworkTransition: NeedsImage, NeedsCredentials, Provisionable);

/// Sets the region of a blank definition.
pub trait WithRegion {
    /// Stage reached after the call.
    type Next;

    /// Sets the region.
    fn with_region(self, region: impl Into<String>) -> Self::Next;
}

impl<T, Sp: Regional> WithRegion for Definition<T, Sp, Blank> {
    type Next = Definition<T, Sp, Sp::AfterRegion>;

    fn with_region(mut self, region: impl Into<String>) -> Self::Next {
        self.spec.set_region(region.into());
        self.advance()
    }
}

/// Chooses the resource group. Setting it again replaces the earlier
/// choice.
pub trait WithGroup: Sized {
    /// Stage reached after the call.
    type Next;

    /// Stores a group choice.
    #[doc(hidden)]
    fn set_group(self, slot: Slot<ResourceGroupSpec>) -> Self::Next;

    /// Uses an existing group, by name, path, or wrapper.
    fn with_existing_group(self, group: impl Into<ExistingRef>) -> Self::Next {
        self.set_group(Slot::existing(group))
    }

    /// Creates a group named after the resource.
    fn with_new_group(self) -> Self::Next {
        self.set_group(Slot::New(NewDependency::derived()))
    }

    /// Creates a group with an explicit name.
    fn with_new_group_named(self, name: impl Into<String>) -> Self::Next {
        self.set_group(Slot::New(NewDependency::named(name)))
    }

    /// Creates a group from a nested definition.
    fn with_new_group_definition(
        self,
        definition: impl Into<NewDependency<ResourceGroupSpec>>,
    ) -> Self::Next {
        self.set_group(Slot::New(definition.into()))
    }
}

impl<T, Sp: Grouped, S: GroupTransition<Sp>> WithGroup for Definition<T, Sp, S> {
    type Next = Definition<T, Sp, S::Next>;

    fn set_group(mut self, slot: Slot<ResourceGroupSpec>) -> Self::Next {
        *self.spec.group_slot() = slot;
        self.advance()
    }
}

/// Chooses the virtual network. Setting it again replaces the earlier
/// choice.
pub trait WithNetwork: Sized {
    /// Stage reached after the call.
    type Next;

    /// Stores a network choice.
    #[doc(hidden)]
    fn set_network(self, slot: Slot<NetworkSpec>) -> Self::Next;

    /// Uses an existing network, by name, path, or wrapper.
    fn with_existing_network(self, network: impl Into<ExistingRef>) -> Self::Next {
        self.set_network(Slot::existing(network))
    }

    /// Creates a network named after the resource with a default address
    /// space.
    fn with_new_network(self) -> Self::Next {
        self.set_network(Slot::New(NewDependency::derived()))
    }

    /// Creates a network with an explicit name and a default address space.
    fn with_new_network_named(self, name: impl Into<String>) -> Self::Next {
        self.set_network(Slot::New(NewDependency::named(name)))
    }

    /// Creates a network from a nested definition.
    fn with_new_network_definition(
        self,
        definition: impl Into<NewDependency<NetworkSpec>>,
    ) -> Self::Next {
        self.set_network(Slot::New(definition.into()))
    }
}

impl<T, Sp: Networked, S: NetworkTransition<Sp>> WithNetwork for Definition<T, Sp, S> {
    type Next = Definition<T, Sp, S::Next>;

    fn set_network(mut self, slot: Slot<NetworkSpec>) -> Self::Next {
        self.spec.set_network(slot);
        self.advance()
    }
}

/// Specs that can carry a public IP address.
pub trait PublicIpAttachable {
    /// Slot holding the public IP choice.
    fn public_ip_slot(&mut self) -> &mut Slot<PublicIpSpec>;
}

/// Chooses a public IP address at any stage. Setting it again replaces the
/// earlier choice.
pub trait WithPublicIp: Sized {
    /// Stores a public IP choice.
    #[doc(hidden)]
    #[must_use]
    fn set_public_ip(self, slot: Slot<PublicIpSpec>) -> Self;

    /// Uses an existing public IP address, by name, path, or wrapper.
    #[must_use]
    fn with_existing_public_ip(self, address: impl Into<ExistingRef>) -> Self {
        self.set_public_ip(Slot::existing(address))
    }

    /// Creates a dynamic public IP address named after the resource.
    #[must_use]
    fn with_new_public_ip(self) -> Self {
        self.set_public_ip(Slot::New(NewDependency::derived()))
    }

    /// Creates a dynamic public IP address with an explicit name.
    #[must_use]
    fn with_new_public_ip_named(self, name: impl Into<String>) -> Self {
        self.set_public_ip(Slot::New(NewDependency::named(name)))
    }

    /// Creates a public IP address from a nested definition.
    #[must_use]
    fn with_new_public_ip_definition(self, definition: impl Into<NewDependency<PublicIpSpec>>) -> Self {
        self.set_public_ip(Slot::New(definition.into()))
    }
}

impl<T, Sp: PublicIpAttachable, S> WithPublicIp for Definition<T, Sp, S> {
    fn set_public_ip(mut self, slot: Slot<PublicIpSpec>) -> Self {
        *self.spec.public_ip_slot() = slot;
        self
    }
}

/// Tag mutators, valid on definitions, specs, and updates. Tags set on an
/// update take effect on `apply()`.
pub trait WithTags: Sized {
    /// Tag map being edited.
    fn tags_mut(&mut self) -> &mut Tags;

    /// Adds or replaces one tag.
    #[must_use]
    fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags_mut().insert(key.into(), value.into());
        self
    }

    /// Adds or replaces several tags.
    #[must_use]
    fn with_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags_mut()
            .extend(tags.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Removes a tag if present.
    #[must_use]
    fn without_tag(mut self, key: &str) -> Self {
        self.tags_mut().remove(key);
        self
    }
}

impl<T, Sp: WithTags, S> WithTags for Definition<T, Sp, S> {
    fn tags_mut(&mut self) -> &mut Tags {
        self.spec.tags_mut()
    }
}
