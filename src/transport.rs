//! Transport abstraction over the provider's management API.
//!
//! The core never talks to the network directly. Every create, read, update,
//! delete, and list goes through a [`Transport`], which keeps the state
//! machine testable against an in-memory provider and leaves retries,
//! timeouts, and authentication to the implementation.

use crate::error::TransportError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::Payload;

/// Scope of a list request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListScope {
    /// Subscription being enumerated.
    pub subscription: String,
    /// Kind of resource to enumerate.
    pub resource_type: ResourceType,
    /// Restricts the listing to one resource group when set.
    pub group: Option<String>,
}

impl ListScope {
    /// Builds a subscription-wide scope.
    #[must_use]
    pub fn subscription(subscription: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            subscription: subscription.into(),
            resource_type,
            group: None,
        }
    }

    /// Restricts the scope to a resource group.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Collection path relative to the management endpoint.
    #[must_use]
    pub fn path(&self) -> String {
        let base = format!("/subscriptions/{}", self.subscription);
        match (self.resource_type.provider_path(), &self.group) {
            (None, _) => format!("{base}/resourceGroups"),
            (Some((namespace, type_name)), None) => {
                format!("{base}/providers/{namespace}/{type_name}")
            }
            (Some((namespace, type_name)), Some(group)) => {
                format!("{base}/resourceGroups/{group}/providers/{namespace}/{type_name}")
            }
        }
    }
}

/// Synchronous request/response operations against the provider.
///
/// Implementations are cheap to clone; clones share the same connection
/// state. A single transport may be used from one thread at a time unless
/// the implementation documents otherwise.
pub trait Transport: Clone {
    /// Fetches a resource, returning `None` when the provider reports it as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for any other provider or network failure.
    fn get(&self, id: &ResourceId) -> Result<Option<Payload>, TransportError>;

    /// Lists resources in provider enumeration order.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when enumeration fails.
    fn list(&self, scope: &ListScope) -> Result<Vec<Payload>, TransportError>;

    /// Creates or replaces a resource. Returns the provider's view of the
    /// resource, or `None` when the response carried no body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the provider rejects the request.
    fn put(&self, id: &ResourceId, payload: &Payload) -> Result<Option<Payload>, TransportError>;

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the provider rejects the request.
    fn delete(&self, id: &ResourceId) -> Result<(), TransportError>;
}
