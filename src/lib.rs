//! Fluent, staged builders for defining and provisioning cloud resources.
//!
//! A [`Cloud`] hands out one collection per resource kind. Each collection
//! starts a staged definition whose methods only become available once the
//! properties they depend on are set, so `provision()` cannot be called on an
//! incomplete definition. Dependencies such as a resource group, a network,
//! or a storage account can be referenced as existing or declared inline;
//! they are resolved, and created when needed, only when the primary
//! resource is provisioned.
//!
//! ```no_run
//! use fluentcloud::prelude::*;
//! use fluentcloud::test_support::StubTransport;
//!
//! # fn main() -> Result<(), fluentcloud::CloudError> {
//! let cloud = Cloud::new(StubTransport::new(), "subscription-id");
//! let mut network = cloud
//!     .networks()
//!     .define("net1")
//!     .with_region("westus")
//!     .with_new_group()
//!     .with_address_space("10.0.0.0/16")
//!     .provision()?;
//! assert_eq!(network.address_spaces()?, vec![String::from("10.0.0.0/16")]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod config_store;
pub mod context;
pub mod dependency;
pub mod entity;
pub mod error;
pub mod http;
pub mod identity;
pub mod payload;
mod provision;
pub mod resources;
pub mod stage;
pub mod test_support;
pub mod transport;
pub mod update;

pub use config::{CloudConfig, ConfigError};
pub use config_store::{ConfigStore, ConfigStoreError, ConfigWriter, DefaultGroup};
pub use context::{Cloud, Context};
pub use dependency::{DependencyKind, ExistingRef, NamingPolicy, NewDependency, SuffixNaming};
pub use entity::{Entities, InitState, Wrapper};
pub use error::{CloudError, TransportError};
pub use http::HttpTransport;
pub use identity::{ResourceId, ResourceType};
pub use payload::{Payload, Tags};
pub use transport::{ListScope, Transport};
pub use update::Update;

/// Traits needed to drive definitions and wrappers fluently.
pub mod prelude {
    pub use crate::context::Cloud;
    pub use crate::entity::Wrapper;
    pub use crate::stage::{WithGroup, WithNetwork, WithPublicIp, WithRegion, WithTags};
}
