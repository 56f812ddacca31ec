//! Shared client context and the top-level [`Cloud`] facade.

use std::fmt;
use std::sync::Arc;

use crate::config::CloudConfig;
use crate::dependency::{DependencyKind, NamingPolicy, SuffixNaming};
use crate::entity::{Entities, Wrapper};
use crate::error::CloudError;
use crate::http::HttpTransport;
use crate::identity::{ResourceId, ResourceType};
use crate::resources::{
    AvailabilitySet, LoadBalancer, Network, NetworkInterface, PublicIpAddress, ResourceGroup,
    StorageAccount, VirtualMachine,
};
use crate::transport::Transport;

/// Everything a definition, wrapper, or collection needs to reach the
/// provider: the transport, the subscription, the default group, and the
/// naming policy for derived dependency names.
#[derive(Clone)]
pub struct Context<T> {
    transport: T,
    subscription: String,
    default_group: Option<String>,
    naming: Arc<dyn NamingPolicy + Send + Sync>,
}

impl<T: fmt::Debug> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport)
            .field("subscription", &self.subscription)
            .field("default_group", &self.default_group)
            .field("naming", &self.naming)
            .finish()
    }
}

impl<T: Transport> Context<T> {
    /// Creates a context with suffix naming and no default group.
    pub fn new(transport: T, subscription: impl Into<String>) -> Self {
        Self {
            transport,
            subscription: subscription.into(),
            default_group: None,
            naming: Arc::new(SuffixNaming),
        }
    }

    /// Transport used for every provider call.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Subscription all identities are scoped to.
    #[must_use]
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Group bare names resolve against in collection calls.
    #[must_use]
    pub fn default_group(&self) -> Option<&str> {
        self.default_group.as_deref()
    }

    /// Derives a dependency name through the configured policy.
    #[must_use]
    pub fn derive_name(&self, primary: &str, kind: DependencyKind, ordinal: usize) -> String {
        self.naming.derive_name(primary, kind, ordinal)
    }

    /// Resolves a name or path against the default group.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MalformedIdentifier`] when the text is not a path
    /// and no default group is configured.
    pub fn resolve(
        &self,
        name_or_id: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceId, CloudError> {
        ResourceId::from_name_or_id(
            name_or_id,
            &self.subscription,
            resource_type,
            self.default_group(),
        )
    }
}

/// Entry point to every resource collection.
///
/// ```no_run
/// use fluentcloud::prelude::*;
/// use fluentcloud::test_support::StubTransport;
///
/// # fn main() -> Result<(), fluentcloud::CloudError> {
/// let cloud = Cloud::new(StubTransport::new(), "subscription-id");
/// let mut group = cloud
///     .resource_groups()
///     .define("rg1")
///     .with_region("West US")
///     .with_tag("env", "dev")
///     .provision()?;
/// assert_eq!(group.region()?.as_deref(), Some("West US"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Cloud<T> {
    ctx: Context<T>,
}

impl<T: Transport> Cloud<T> {
    /// Creates a facade over `transport` for one subscription.
    pub fn new(transport: T, subscription: impl Into<String>) -> Self {
        Self {
            ctx: Context::new(transport, subscription),
        }
    }

    /// Sets the group bare names resolve against in collection calls.
    #[must_use]
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.ctx.default_group = Some(group.into());
        self
    }

    /// Replaces the policy used to name dependencies created implicitly.
    #[must_use]
    pub fn with_naming_policy(mut self, policy: impl NamingPolicy + Send + Sync + 'static) -> Self {
        self.ctx.naming = Arc::new(policy);
        self
    }

    /// Shared context handed to collections and wrappers.
    #[must_use]
    pub const fn context(&self) -> &Context<T> {
        &self.ctx
    }

    fn entities<W: Wrapper<T>>(&self) -> Entities<T, W> {
        Entities::new(self.ctx.clone())
    }

    /// Resource group collection.
    #[must_use]
    pub fn resource_groups(&self) -> Entities<T, ResourceGroup<T>> {
        self.entities()
    }

    /// Virtual network collection.
    #[must_use]
    pub fn networks(&self) -> Entities<T, Network<T>> {
        self.entities()
    }

    /// Storage account collection.
    #[must_use]
    pub fn storage_accounts(&self) -> Entities<T, StorageAccount<T>> {
        self.entities()
    }

    /// Availability set collection.
    #[must_use]
    pub fn availability_sets(&self) -> Entities<T, AvailabilitySet<T>> {
        self.entities()
    }

    /// Public IP address collection.
    #[must_use]
    pub fn public_ip_addresses(&self) -> Entities<T, PublicIpAddress<T>> {
        self.entities()
    }

    /// Network interface collection.
    #[must_use]
    pub fn network_interfaces(&self) -> Entities<T, NetworkInterface<T>> {
        self.entities()
    }

    /// Load balancer collection.
    #[must_use]
    pub fn load_balancers(&self) -> Entities<T, LoadBalancer<T>> {
        self.entities()
    }

    /// Virtual machine collection.
    #[must_use]
    pub fn virtual_machines(&self) -> Entities<T, VirtualMachine<T>> {
        self.entities()
    }
}

impl Cloud<HttpTransport> {
    /// Builds an HTTP-backed facade from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Config`] when required settings are missing or
    /// the HTTP client cannot be built.
    pub fn authenticate(config: &CloudConfig) -> Result<Self, CloudError> {
        config
            .validate()
            .map_err(|err| CloudError::Config(err.to_string()))?;
        let transport = HttpTransport::new(config)?;
        let cloud = Self::new(transport, config.subscription_id.trim());
        Ok(match config.default_group.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => cloud.with_default_group(group),
            _ => cloud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use rstest::rstest;

    #[derive(Debug)]
    struct Prefixed;

    impl NamingPolicy for Prefixed {
        fn derive_name(&self, primary: &str, kind: DependencyKind, _ordinal: usize) -> String {
            format!("{}-{primary}", kind.to_string().replace(' ', "-"))
        }
    }

    #[rstest]
    fn naming_policy_can_be_swapped() {
        let cloud = Cloud::new(StubTransport::new(), "sub").with_naming_policy(Prefixed);
        assert_eq!(
            cloud
                .context()
                .derive_name("web", DependencyKind::StorageAccount, 0),
            "storage-account-web"
        );
    }

    #[rstest]
    fn resolve_uses_default_group() {
        let cloud = Cloud::new(StubTransport::new(), "sub").with_default_group("rg");
        let id = cloud
            .context()
            .resolve("net1", ResourceType::Network)
            .unwrap_or_else(|err| panic!("resolve: {err}"));
        assert_eq!(id, ResourceId::new("sub", "rg", ResourceType::Network, "net1"));
    }
}
