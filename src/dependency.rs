//! Dependency slots and default naming.
//!
//! Each auxiliary resource a definition needs lives in a [`Slot`]. A slot is
//! either unset, a reference to something that already exists, or a request
//! to create something new. Setting a slot twice keeps the last value.

use std::fmt;

use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};

/// Auxiliary resource kinds, ordered by provisioning priority.
///
/// The derived ordering is the topological order the executor follows:
/// group, network, subnet, storage account, availability set, public IP,
/// network interface, and finally machines attached after creation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DependencyKind {
    /// Containing resource group.
    ResourceGroup,
    /// Virtual network.
    Network,
    /// Subnet inside the chosen network.
    Subnet,
    /// Storage account holding disks.
    StorageAccount,
    /// Availability set.
    AvailabilitySet,
    /// Public IP address.
    PublicIpAddress,
    /// Network interface card.
    NetworkInterface,
    /// Virtual machine placed behind a load balancer.
    VirtualMachine,
}

impl DependencyKind {
    /// Resource type looked up for this dependency, if it is a top-level
    /// resource.
    #[must_use]
    pub const fn resource_type(self) -> Option<ResourceType> {
        match self {
            Self::ResourceGroup => Some(ResourceType::ResourceGroup),
            Self::Network => Some(ResourceType::Network),
            Self::Subnet => None,
            Self::StorageAccount => Some(ResourceType::StorageAccount),
            Self::AvailabilitySet => Some(ResourceType::AvailabilitySet),
            Self::PublicIpAddress => Some(ResourceType::PublicIpAddress),
            Self::NetworkInterface => Some(ResourceType::NetworkInterface),
            Self::VirtualMachine => Some(ResourceType::VirtualMachine),
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subnet => f.write_str("subnet"),
            other => match other.resource_type() {
                Some(resource_type) => f.write_str(resource_type.label()),
                None => f.write_str("dependency"),
            },
        }
    }
}

/// Whether a primary resource can be provisioned without a dependency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requirement {
    /// Provisioning fails with `MissingRequiredDependency` when unset.
    Mandatory,
    /// Unset slots are skipped.
    Optional,
}

/// Reference to a resource that should already exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExistingRef {
    /// Fully resolved identity.
    Id(ResourceId),
    /// Caller text: a composite path or a bare name. Bare names are placed
    /// in the primary resource's group when resolved.
    Text(String),
}

impl ExistingRef {
    /// Resolves the reference to an identity of the given type.
    ///
    /// A reference to a resource group accepts any identity and yields its
    /// group. Every other kind must name a resource of exactly that type.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when the text is neither a
    /// path nor a usable bare name, and [`CloudError::InvalidDefinitionState`]
    /// when a path names a resource of another type.
    pub fn resolve(
        &self,
        subscription: &str,
        resource_type: ResourceType,
        group: Option<&str>,
    ) -> Result<ResourceId, CloudError> {
        let id = match self {
            Self::Id(id) => id.clone(),
            Self::Text(text) => {
                ResourceId::from_name_or_id(text, subscription, resource_type, group)?
            }
        };
        if resource_type == ResourceType::ResourceGroup {
            return Ok(id.group_id());
        }
        match id.resource_type() {
            Some(actual) if actual == resource_type => Ok(id),
            actual => Err(CloudError::invalid(
                id.short_name(),
                format!(
                    "{id} is a {}, expected a {resource_type}",
                    actual.map_or("nested resource", ResourceType::label)
                ),
            )),
        }
    }
}

impl From<&str> for ExistingRef {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ExistingRef {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<ResourceId> for ExistingRef {
    fn from(value: ResourceId) -> Self {
        Self::Id(value)
    }
}

impl From<&ResourceId> for ExistingRef {
    fn from(value: &ResourceId) -> Self {
        Self::Id(value.clone())
    }
}

/// Request to create a dependency as part of provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewDependency<S> {
    /// Explicit name; derived from the primary resource when absent.
    pub name: Option<String>,
    /// Nested definition; a minimal default is synthesized when absent.
    pub spec: Option<S>,
}

impl<S> NewDependency<S> {
    /// New dependency with a derived name and default definition.
    #[must_use]
    pub const fn derived() -> Self {
        Self {
            name: None,
            spec: None,
        }
    }

    /// New dependency with an explicit name and default definition.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            spec: None,
        }
    }

    /// New dependency built from a nested definition; the name is derived.
    #[must_use]
    pub const fn from_spec(spec: S) -> Self {
        Self {
            name: None,
            spec: Some(spec),
        }
    }
}

/// A single dependency reference within a definition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Slot<S> {
    /// Nothing chosen yet.
    #[default]
    Unset,
    /// Reuse a resource that already exists.
    Existing(ExistingRef),
    /// Create a new resource while provisioning.
    New(NewDependency<S>),
}

impl<S> Slot<S> {
    /// Slot referencing an existing resource.
    #[must_use]
    pub fn existing(reference: impl Into<ExistingRef>) -> Self {
        Self::Existing(reference.into())
    }

    /// Returns `true` while nothing has been chosen.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// Strategy for naming dependencies created without an explicit name.
pub trait NamingPolicy: fmt::Debug {
    /// Derives a dependency name from the primary resource's name.
    ///
    /// `ordinal` counts dependencies of the same kind created for one
    /// primary resource, starting at zero.
    fn derive_name(&self, primary: &str, kind: DependencyKind, ordinal: usize) -> String;
}

/// Appends a fixed suffix per kind (`<name>group`, `<name>net`, ...).
///
/// Storage account names are lowercased, stripped to alphanumerics, and
/// truncated to 24 characters since the provider rejects anything else.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SuffixNaming;

const STORAGE_NAME_MAX: usize = 24;

impl SuffixNaming {
    const fn suffix(kind: DependencyKind) -> &'static str {
        match kind {
            DependencyKind::ResourceGroup => "group",
            DependencyKind::Network => "net",
            DependencyKind::Subnet => "subnet",
            DependencyKind::StorageAccount => "store",
            DependencyKind::AvailabilitySet => "avset",
            DependencyKind::PublicIpAddress => "pip",
            DependencyKind::NetworkInterface => "nic",
            DependencyKind::VirtualMachine => "vm",
        }
    }
}

impl NamingPolicy for SuffixNaming {
    fn derive_name(&self, primary: &str, kind: DependencyKind, ordinal: usize) -> String {
        let mut name = format!("{primary}{}", Self::suffix(kind));
        if ordinal > 0 {
            name.push_str(&ordinal.to_string());
        }
        if kind == DependencyKind::StorageAccount {
            return name
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|ch| ch.to_ascii_lowercase())
                .take(STORAGE_NAME_MAX)
                .collect();
        }
        name
    }
}
