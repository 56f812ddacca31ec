//! Resource identity and addressing.
//!
//! Resources are addressed either by a short name scoped to a resource group
//! or by a fully-qualified path of the form
//! `/subscriptions/{sub}/resourceGroups/{group}/providers/{ns}/{type}/{name}`.
//! A single nested `{childType}/{childName}` pair may follow, which is how
//! subnets are addressed inside their network.
//!
//! Provider names are case-insensitive, so equality, hashing and map keys all
//! work on the lowercase form while [`ResourceId`] keeps the caller's casing
//! for display.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::CloudError;

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

/// Kinds of resources the library knows how to define and look up.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum ResourceType {
    /// A resource group; addressed without a provider segment.
    ResourceGroup,
    /// A virtual network.
    Network,
    /// A storage account.
    StorageAccount,
    /// An availability set.
    AvailabilitySet,
    /// A public IP address.
    PublicIpAddress,
    /// A network interface card.
    NetworkInterface,
    /// A load balancer.
    LoadBalancer,
    /// A virtual machine.
    VirtualMachine,
}

impl ResourceType {
    /// Every known resource type, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::ResourceGroup,
        Self::Network,
        Self::StorageAccount,
        Self::AvailabilitySet,
        Self::PublicIpAddress,
        Self::NetworkInterface,
        Self::LoadBalancer,
        Self::VirtualMachine,
    ];

    /// Provider namespace and type segment, or `None` for resource groups.
    #[must_use]
    pub const fn provider_path(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::ResourceGroup => None,
            Self::Network => Some(("Microsoft.Network", "virtualNetworks")),
            Self::StorageAccount => Some(("Microsoft.Storage", "storageAccounts")),
            Self::AvailabilitySet => Some(("Microsoft.Compute", "availabilitySets")),
            Self::PublicIpAddress => Some(("Microsoft.Network", "publicIPAddresses")),
            Self::NetworkInterface => Some(("Microsoft.Network", "networkInterfaces")),
            Self::LoadBalancer => Some(("Microsoft.Network", "loadBalancers")),
            Self::VirtualMachine => Some(("Microsoft.Compute", "virtualMachines")),
        }
    }

    /// Looks up the resource type for a provider namespace and type segment.
    #[must_use]
    pub fn from_provider_path(namespace: &str, type_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| {
            candidate.provider_path().is_some_and(|(ns, ty)| {
                ns.eq_ignore_ascii_case(namespace) && ty.eq_ignore_ascii_case(type_name)
            })
        })
    }

    /// Human readable label used in logs and error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResourceGroup => "resource group",
            Self::Network => "network",
            Self::StorageAccount => "storage account",
            Self::AvailabilitySet => "availability set",
            Self::PublicIpAddress => "public IP address",
            Self::NetworkInterface => "network interface",
            Self::LoadBalancer => "load balancer",
            Self::VirtualMachine => "virtual machine",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug)]
struct ChildSegment {
    resource_type: String,
    name: String,
}

#[derive(Clone, Debug)]
struct ProviderSegment {
    namespace: String,
    type_name: String,
    name: String,
    child: Option<ChildSegment>,
}

/// Fully-qualified identity of a provider resource.
#[derive(Clone, Debug)]
pub struct ResourceId {
    subscription: String,
    group: String,
    provider: Option<ProviderSegment>,
}

impl ResourceId {
    /// Identity of a resource group.
    #[must_use]
    pub fn resource_group(subscription: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            group: group.into(),
            provider: None,
        }
    }

    /// Identity of a top-level resource of a known type.
    ///
    /// Passing [`ResourceType::ResourceGroup`] yields the identity of the group
    /// called `name`; `group` is ignored in that case.
    #[must_use]
    pub fn new(
        subscription: impl Into<String>,
        group: impl Into<String>,
        resource_type: ResourceType,
        name: impl Into<String>,
    ) -> Self {
        match resource_type.provider_path() {
            None => Self::resource_group(subscription, name),
            Some((namespace, type_name)) => Self {
                subscription: subscription.into(),
                group: group.into(),
                provider: Some(ProviderSegment {
                    namespace: namespace.to_owned(),
                    type_name: type_name.to_owned(),
                    name: name.into(),
                    child: None,
                }),
            },
        }
    }

    /// Composes the fully-qualified path for a resource.
    #[must_use]
    pub fn compose(
        subscription: &str,
        group: &str,
        namespace: &str,
        type_name: &str,
        short_name: &str,
    ) -> String {
        format!(
            "/{SUBSCRIPTIONS}/{subscription}/{RESOURCE_GROUPS}/{group}/{PROVIDERS}/{namespace}/{type_name}/{short_name}"
        )
    }

    /// Parses a fully-qualified path.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when the path does not
    /// follow the `subscriptions/resourceGroups/providers` segment layout.
    pub fn parse(path: &str) -> Result<Self, CloudError> {
        let malformed = |reason: &str| CloudError::MalformedIdentifier {
            input: path.to_owned(),
            reason: reason.to_owned(),
        };

        let Some(rest) = path.strip_prefix('/') else {
            return Err(malformed("identifier must start with '/'"));
        };
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(malformed("identifier contains an empty segment"));
        }

        match segments.as_slice() {
            [subs, subscription, groups, group, tail @ ..]
                if subs.eq_ignore_ascii_case(SUBSCRIPTIONS)
                    && groups.eq_ignore_ascii_case(RESOURCE_GROUPS) =>
            {
                let provider = Self::parse_provider(tail).map_err(|reason| malformed(reason))?;
                Ok(Self {
                    subscription: (*subscription).to_owned(),
                    group: (*group).to_owned(),
                    provider,
                })
            }
            _ => Err(malformed(
                "expected /subscriptions/{sub}/resourceGroups/{group}",
            )),
        }
    }

    fn parse_provider(tail: &[&str]) -> Result<Option<ProviderSegment>, &'static str> {
        match tail {
            [] => Ok(None),
            [providers, namespace, type_name, name, child @ ..]
                if providers.eq_ignore_ascii_case(PROVIDERS) =>
            {
                let child = match child {
                    [] => None,
                    [resource_type, child_name] => Some(ChildSegment {
                        resource_type: (*resource_type).to_owned(),
                        name: (*child_name).to_owned(),
                    }),
                    _ => return Err("only one nested child segment is supported"),
                };
                Ok(Some(ProviderSegment {
                    namespace: (*namespace).to_owned(),
                    type_name: (*type_name).to_owned(),
                    name: (*name).to_owned(),
                    child,
                }))
            }
            _ => Err("expected /providers/{namespace}/{type}/{name} after the group"),
        }
    }

    /// Resolves a caller-supplied reference that may be a full path or a bare
    /// short name.
    ///
    /// Bare names are scoped to `default_group`; for resource groups the bare
    /// name is the group itself.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when the text is neither a
    /// valid path nor a bare name that can be placed in a group.
    pub fn from_name_or_id(
        text: &str,
        subscription: &str,
        resource_type: ResourceType,
        default_group: Option<&str>,
    ) -> Result<Self, CloudError> {
        let trimmed = text.trim();
        if trimmed.contains('/') {
            return Self::parse(trimmed);
        }
        if trimmed.is_empty() {
            return Err(CloudError::MalformedIdentifier {
                input: text.to_owned(),
                reason: String::from("name is empty"),
            });
        }
        if resource_type == ResourceType::ResourceGroup {
            return Ok(Self::resource_group(subscription, trimmed));
        }
        match default_group {
            Some(group) if !group.trim().is_empty() => {
                Ok(Self::new(subscription, group.trim(), resource_type, trimmed))
            }
            _ => Err(CloudError::MalformedIdentifier {
                input: text.to_owned(),
                reason: String::from("bare name given but no default group is configured"),
            }),
        }
    }

    /// Returns the identity of a nested child resource.
    #[must_use]
    pub fn child(&self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(provider) = next.provider.as_mut() {
            provider.child = Some(ChildSegment {
                resource_type: resource_type.into(),
                name: name.into(),
            });
        }
        next
    }

    /// Strips a nested child segment, yielding the parent resource.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut next = self.clone();
        if let Some(provider) = next.provider.as_mut() {
            provider.child = None;
        }
        next
    }

    /// Identity of the resource group containing this resource.
    #[must_use]
    pub fn group_id(&self) -> Self {
        Self::resource_group(&self.subscription, &self.group)
    }

    /// Subscription segment.
    #[must_use]
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Resource group segment.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Provider namespace, absent for resource groups.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.provider.as_ref().map(|provider| provider.namespace.as_str())
    }

    /// Provider type segment, absent for resource groups.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.provider.as_ref().map(|provider| provider.type_name.as_str())
    }

    /// Known resource type for this identity, if any.
    #[must_use]
    pub fn resource_type(&self) -> Option<ResourceType> {
        match &self.provider {
            None => Some(ResourceType::ResourceGroup),
            Some(provider) if provider.child.is_none() => {
                ResourceType::from_provider_path(&provider.namespace, &provider.type_name)
            }
            Some(_) => None,
        }
    }

    /// Innermost short name: the child, resource, or group name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        match &self.provider {
            None => &self.group,
            Some(provider) => provider
                .child
                .as_ref()
                .map_or(provider.name.as_str(), |child| child.name.as_str()),
        }
    }

    /// Case-normalized key used for comparisons and map lookups.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{SUBSCRIPTIONS}/{}/{RESOURCE_GROUPS}/{}",
            self.subscription, self.group
        )?;
        if let Some(provider) = &self.provider {
            write!(
                f,
                "/{PROVIDERS}/{}/{}/{}",
                provider.namespace, provider.type_name, provider.name
            )?;
            if let Some(child) = &provider.child {
                write!(f, "/{}/{}", child.resource_type, child.name)?;
            }
        }
        Ok(())
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ResourceId {}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Extracts the group from a composite identifier.
///
/// Returns `None` for bare names so callers can fall back to their default
/// group instead of failing.
#[must_use]
pub fn group_from_id(text: &str) -> Option<String> {
    ResourceId::parse(text)
        .ok()
        .map(|id| id.group().to_owned())
}

/// Extracts the short name from a composite identifier, or `None` for a bare
/// name.
#[must_use]
pub fn short_name_from_id(text: &str) -> Option<String> {
    ResourceId::parse(text)
        .ok()
        .map(|id| id.short_name().to_owned())
}

/// Case-insensitive name comparison used for every provider lookup.
#[must_use]
pub fn names_match(lhs: &str, rhs: &str) -> bool {
    lhs.to_lowercase() == rhs.to_lowercase()
}

const GROUP_NAME_MAX: usize = 90;

/// Checks a resource group name against the provider's naming rules.
///
/// Names hold 1 to 90 letters, digits, underscores, hyphens, periods, or
/// parentheses, and may not end with a period.
///
/// # Errors
///
/// Returns the reason the name is rejected.
pub fn check_group_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(String::from("group name is empty"));
    }
    if name.chars().count() > GROUP_NAME_MAX {
        return Err(format!("group name exceeds {GROUP_NAME_MAX} characters"));
    }
    if let Some(bad) = name
        .chars()
        .find(|ch| !(ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.' | '(' | ')')))
    {
        return Err(format!("group name may not contain '{bad}'"));
    }
    if name.ends_with('.') {
        return Err(String::from("group name may not end with a period"));
    }
    Ok(())
}
