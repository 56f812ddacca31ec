//! Storage accounts.

use std::fmt;
use std::str::FromStr;

use crate::context::Context;
use crate::dependency::Slot;
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, submit};
use crate::resources::ResourceGroupSpec;
use crate::stage::{Blank, Definition, Grouped, NeedsGroup, Provisionable, Regional, WithTags};
use crate::transport::Transport;
use crate::update::Update;

const ACCOUNT_TYPE: &str = "properties.accountType";
const BLOB_ENDPOINT: &str = "properties.primaryEndpoints.blob";
const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=24;

wrapper!(
    /// A storage account.
    StorageAccount,
    ResourceType::StorageAccount,
    StorageAccountSpec
);

/// Storage account definition at stage `S`.
pub type StorageAccountDefinition<T, S = Blank> = Definition<T, StorageAccountSpec, S>;

/// Pending changes to a storage account.
pub type StorageAccountUpdate<T> = Update<T, StorageAccount<T>>;

/// Replication and performance tier of a storage account.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AccountType {
    /// Locally redundant standard storage.
    #[default]
    StandardLrs,
    /// Geo-redundant standard storage.
    StandardGrs,
    /// Read-access geo-redundant standard storage.
    StandardRagrs,
    /// Zone-redundant standard storage.
    StandardZrs,
    /// Locally redundant premium storage.
    PremiumLrs,
}

impl AccountType {
    const ALL: [Self; 5] = [
        Self::StandardLrs,
        Self::StandardGrs,
        Self::StandardRagrs,
        Self::StandardZrs,
        Self::PremiumLrs,
    ];

    /// Provider spelling, for example `Standard_LRS`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StandardLrs => "Standard_LRS",
            Self::StandardGrs => "Standard_GRS",
            Self::StandardRagrs => "Standard_RAGRS",
            Self::StandardZrs => "Standard_ZRS",
            Self::PremiumLrs => "Premium_LRS",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = CloudError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(text.trim()))
            .ok_or_else(|| CloudError::invalid(text, "unknown storage account type"))
    }
}

/// Values needed to create a storage account.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageAccountSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    account_type: AccountType,
}

impl StorageAccountSpec {
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

    /// Sets the account type; `Standard_LRS` when unset.
    #[must_use]
    pub const fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    fn payload(&self, region: &str) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        payload.set(ACCOUNT_TYPE, self.account_type.as_str());
        payload
    }
}

/// Storage account names are 3-24 lowercase letters and digits.
pub(crate) fn check_account_name(name: &str) -> Result<(), CloudError> {
    if !NAME_LENGTH.contains(&name.len()) {
        return Err(CloudError::invalid(
            name,
            "storage account names must be 3 to 24 characters long",
        ));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
    {
        return Err(CloudError::invalid(
            name,
            "storage account names may only contain lowercase letters and digits",
        ));
    }
    Ok(())
}

/// Blob endpoint of an account, from its payload or the public default.
pub(crate) fn blob_endpoint(name: &str, payload: Option<&Payload>) -> String {
    let endpoint = payload
        .and_then(|found| found.get_str(BLOB_ENDPOINT))
        .map_or_else(
            || format!("https://{name}.blob.core.windows.net/"),
            str::to_owned,
        );
    if endpoint.ends_with('/') {
        endpoint
    } else {
        format!("{endpoint}/")
    }
}

impl Regional for StorageAccountSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for StorageAccountSpec {
    type AfterGroup = Provisionable;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl WithTags for StorageAccountSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for StorageAccountSpec {
    type Output = StorageAccount<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        check_account_name(name)
    }

    fn provision(
        self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<StorageAccount<T>, CloudError> {
        check_account_name(name)?;
        let region = inherited.region(name, self.region.as_deref())?;
        let payload = self.payload(&region);
        let resolved = DependencyGraph::new(name)
            .with(Step::Group(self.group))
            .resolve(ctx, &region, inherited)?;
        let group = resolved.group(name)?;
        let id = ResourceId::new(
            ctx.subscription(),
            group.group(),
            ResourceType::StorageAccount,
            name,
        );
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> StorageAccountDefinition<T, S> {
    /// Sets the account type; `Standard_LRS` when unset.
    #[must_use]
    pub const fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.spec.account_type = account_type;
        self
    }
}

impl<T: Transport> StorageAccountDefinition<T, Provisionable> {
    /// Creates the account, and its group if requested.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for names the provider
    /// would reject, dependency errors for the group, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects a
    /// request.
    pub fn provision(self) -> Result<StorageAccount<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> StorageAccount<T> {
    /// Account type reported by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn account_type(&mut self) -> Result<Option<AccountType>, CloudError> {
        Ok(self
            .inner()?
            .get_str(ACCOUNT_TYPE)
            .and_then(|text| text.parse().ok()))
    }

    /// Endpoint for blob storage, ending in `/`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn blob_endpoint(&mut self) -> Result<String, CloudError> {
        let name = self.identity().short_name().to_owned();
        Ok(blob_endpoint(&name, Some(self.inner()?)))
    }
}

impl<T: Transport> StorageAccountUpdate<T> {
    /// Changes the account type.
    #[must_use]
    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.payload_mut().set(ACCOUNT_TYPE, account_type.as_str());
        self
    }
}
