//! Error types shared across the library.

use thiserror::Error;

use crate::dependency::DependencyKind;

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("status {status_text}: {message}")]
pub struct TransportError {
    /// HTTP-like status code, when the provider returned one.
    pub status: Option<u16>,
    /// Human readable representation of the status.
    pub status_text: String,
    /// Message returned by the provider or the transport.
    pub message: String,
}

impl TransportError {
    /// Builds an error from an optional status code and a message.
    #[must_use]
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        let status_text = status.map_or_else(|| String::from("unknown"), |code| code.to_string());
        Self {
            status,
            status_text,
            message: message.into(),
        }
    }

    /// Error used when the provider reports the resource as absent.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(Some(404), format!("{} was not found", what.into()))
    }

    /// Returns `true` when the provider reported the resource as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status, Some(404))
    }
}

/// Errors raised by definitions, wrappers, and collections.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// An address could not be parsed into a resource identity. Raised
    /// locally; nothing is sent to the provider.
    #[error("malformed resource identifier '{input}': {reason}")]
    MalformedIdentifier {
        /// Text supplied by the caller.
        input: String,
        /// Why the text was rejected.
        reason: String,
    },
    /// Lazily loading a wrapper failed. Not cached; the next accessor call
    /// retries.
    #[error("failed to refresh {id}: {source}")]
    RefreshFailed {
        /// Identity of the wrapper being loaded.
        id: String,
        /// Underlying transport failure.
        source: TransportError,
    },
    /// A dependency referenced as existing is absent at the provider.
    #[error("{kind} {id} referenced by {resource} does not exist")]
    DependencyNotFound {
        /// Resource being provisioned.
        resource: String,
        /// Kind of dependency that was looked up.
        kind: DependencyKind,
        /// Identity that was looked up.
        id: String,
    },
    /// A mandatory dependency slot was left unset.
    #[error("{resource} requires a {kind} but none was specified")]
    MissingRequiredDependency {
        /// Resource being provisioned.
        resource: String,
        /// Kind of the missing dependency.
        kind: DependencyKind,
    },
    /// A definition carries values no provider request could satisfy.
    #[error("invalid definition for {resource}: {reason}")]
    InvalidDefinitionState {
        /// Resource being defined or updated.
        resource: String,
        /// What is wrong with the definition.
        reason: String,
    },
    /// The provider rejected a create, update, delete, or lookup call.
    #[error("provider rejected {operation} of {id}: {source}")]
    ProviderRequestFailed {
        /// Operation attempted (`create`, `delete`, ...).
        operation: &'static str,
        /// Identity the request targeted.
        id: String,
        /// Underlying transport failure.
        source: TransportError,
    },
    /// Raised when configuration is incomplete or unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CloudError {
    pub(crate) fn provider(operation: &'static str, id: impl ToString, source: TransportError) -> Self {
        Self::ProviderRequestFailed {
            operation,
            id: id.to_string(),
            source,
        }
    }

    pub(crate) fn invalid(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinitionState {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}
