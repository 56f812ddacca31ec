//! Virtual machines.
//!
//! A machine attaches to the network through a primary network interface.
//! Unless an existing interface is supplied, one named after the machine is
//! created from the machine's network, subnet, and public IP choices.

use std::fmt;
use std::mem;

use serde_json::{Value, json};

use crate::context::Context;
use crate::dependency::{DependencyKind, ExistingRef, NewDependency, Requirement, Slot};
use crate::entity::{Wrapper, wrapper};
use crate::error::CloudError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::{Payload, Tags, reference};
use crate::provision::{DependencyGraph, Inherited, Provision, Step, base_payload, missing, submit};
use crate::resources::storage_account::blob_endpoint;
use crate::resources::{
    AvailabilitySetSpec, NetworkInterfaceSpec, NetworkSpec, PublicIpSpec, ResourceGroupSpec,
    StorageAccountSpec, first_item_str,
};
use crate::stage::{
    Blank, Definition, Grouped, NeedsCredentials, NeedsGroup, NeedsImage, NeedsNetwork,
    Networked, Provisionable, PublicIpAttachable, Regional, WithTags,
};
use crate::transport::Transport;
use crate::update::Update;

const DEFAULT_SIZE: &str = "Standard_D1";
const VM_SIZE: &str = "properties.hardwareProfile.vmSize";
const IMAGE: &str = "properties.storageProfile.imageReference";
const OS_DISK: &str = "properties.storageProfile.osDisk";
const ADMIN_USERNAME: &str = "properties.osProfile.adminUsername";
const INTERFACES: &str = "properties.networkProfile.networkInterfaces";
const AVAILABILITY_SET: &str = "properties.availabilitySet";

wrapper!(
    /// A virtual machine.
    VirtualMachine,
    ResourceType::VirtualMachine,
    VirtualMachineSpec
);

/// Virtual machine definition at stage `S`.
pub type VirtualMachineDefinition<T, S = Blank> = Definition<T, VirtualMachineSpec, S>;

/// Pending changes to a virtual machine.
pub type VirtualMachineUpdate<T> = Update<T, VirtualMachine<T>>;

/// Marketplace image a machine boots from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageReference {
    /// Image publisher, for example `Canonical`.
    pub publisher: String,
    /// Offer, for example `UbuntuServer`.
    pub offer: String,
    /// SKU, for example `14.04.2-LTS`.
    pub sku: String,
    /// Version, `latest` unless pinned.
    pub version: String,
}

impl ImageReference {
    /// Latest version of a marketplace image.
    pub fn new(
        publisher: impl Into<String>,
        offer: impl Into<String>,
        sku: impl Into<String>,
    ) -> Self {
        Self {
            publisher: publisher.into(),
            offer: offer.into(),
            sku: sku.into(),
            version: String::from("latest"),
        }
    }

    /// Pins the image version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "publisher": self.publisher,
            "offer": self.offer,
            "sku": self.sku,
            "version": self.version,
        })
    }

    fn from_json(value: &Value) -> Option<Self> {
        let field = |key: &str| value.get(key).and_then(Value::as_str);
        Some(
            Self::new(field("publisher")?, field("offer")?, field("sku")?)
                .with_version(field("version").unwrap_or("latest")),
        )
    }
}

/// Administrator login for a new machine.
#[derive(Clone, Eq, PartialEq)]
pub enum Credentials {
    /// Password login.
    Password {
        /// Administrator user name.
        username: String,
        /// Administrator password.
        password: String,
    },
    /// Public key login; password authentication is disabled.
    SshKey {
        /// Administrator user name.
        username: String,
        /// OpenSSH public key.
        public_key: String,
    },
}

impl Credentials {
    fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::SshKey { username, .. } => username,
        }
    }

    fn apply(&self, payload: &mut Payload) {
        payload.set(ADMIN_USERNAME, self.username());
        match self {
            Self::Password { password, .. } => {
                payload.set("properties.osProfile.adminPassword", password.as_str());
            }
            Self::SshKey {
                username,
                public_key,
            } => {
                payload.set(
                    "properties.osProfile.linuxConfiguration",
                    json!({
                        "disablePasswordAuthentication": true,
                        "ssh": {
                            "publicKeys": [{
                                "path": format!("/home/{username}/.ssh/authorized_keys"),
                                "keyData": public_key,
                            }],
                        },
                    }),
                );
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::SshKey { username, .. } => f
                .debug_struct("SshKey")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Values needed to create a virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualMachineSpec {
    region: Option<String>,
    group: Slot<ResourceGroupSpec>,
    tags: Tags,
    network: Slot<NetworkSpec>,
    subnet: Option<String>,
    private_ip: Option<String>,
    public_ip: Slot<PublicIpSpec>,
    network_interface: Option<ExistingRef>,
    storage_account: Slot<StorageAccountSpec>,
    availability_set: Slot<AvailabilitySetSpec>,
    size: String,
    image: Option<ImageReference>,
    credentials: Option<Credentials>,
}

impl Default for VirtualMachineSpec {
    fn default() -> Self {
        Self {
            region: None,
            group: Slot::Unset,
            tags: Tags::new(),
            network: Slot::Unset,
            subnet: None,
            private_ip: None,
            public_ip: Slot::Unset,
            network_interface: None,
            storage_account: Slot::Unset,
            availability_set: Slot::Unset,
            size: DEFAULT_SIZE.to_owned(),
            image: None,
            credentials: None,
        }
    }
}

impl VirtualMachineSpec {
    fn check_choices(&self, name: &str) -> Result<(), CloudError> {
        if self.image.is_none() {
            return Err(CloudError::invalid(name, "no image was chosen"));
        }
        if self.credentials.is_none() {
            return Err(CloudError::invalid(name, "no admin credentials were given"));
        }
        if self.size.trim().is_empty() {
            return Err(CloudError::invalid(name, "size must not be empty"));
        }
        if self.network_interface.is_some() {
            let conflicting = [
                (!self.public_ip.is_unset(), "a public IP"),
                (self.subnet.is_some(), "a subnet"),
                (self.private_ip.is_some(), "a private IP"),
            ];
            if let Some((_, what)) = conflicting.iter().find(|(set, _)| *set) {
                return Err(CloudError::invalid(
                    name,
                    format!("{what} cannot be combined with an existing network interface"),
                ));
            }
        }
        Ok(())
    }

    fn steps(&mut self) -> Vec<Step> {
        let mut steps = vec![
            Step::Group(mem::take(&mut self.group)),
            Step::StorageAccount(
                mem::take(&mut self.storage_account),
                Requirement::Mandatory,
            ),
            Step::AvailabilitySet(mem::take(&mut self.availability_set)),
        ];
        if let Some(existing) = self.network_interface.take() {
            steps.push(Step::NetworkInterface(
                Slot::Existing(existing),
                Requirement::Mandatory,
            ));
            return steps;
        }
        let mut interface = NetworkInterfaceSpec::new();
        if let Some(address) = self.private_ip.take() {
            interface = interface.with_static_private_ip(address);
        }
        steps.extend([
            Step::Network(mem::take(&mut self.network), Requirement::Mandatory),
            Step::Subnet(self.subnet.take()),
            Step::PublicIps(vec![mem::take(&mut self.public_ip)], Requirement::Optional),
            Step::NetworkInterface(
                Slot::New(NewDependency::from_spec(interface)),
                Requirement::Mandatory,
            ),
        ]);
        steps
    }

    fn payload(
        &self,
        name: &str,
        region: &str,
        image: &ImageReference,
        credentials: &Credentials,
        disk_uri: &str,
    ) -> Payload {
        let mut payload = base_payload(region, &self.tags);
        payload.set(VM_SIZE, self.size.as_str());
        payload.set(IMAGE, image.to_json());
        payload.set(
            OS_DISK,
            json!({
                "name": format!("{name}-osdisk"),
                "vhd": { "uri": disk_uri },
                "caching": "ReadWrite",
                "createOption": "FromImage",
            }),
        );
        payload.set("properties.osProfile.computerName", name);
        credentials.apply(&mut payload);
        payload
    }
}

impl Regional for VirtualMachineSpec {
    type AfterRegion = NeedsGroup;

    fn set_region(&mut self, region: String) {
        self.region = Some(region);
    }
}

impl Grouped for VirtualMachineSpec {
    type AfterGroup = NeedsNetwork;

    fn group_slot(&mut self) -> &mut Slot<ResourceGroupSpec> {
        &mut self.group
    }
}

impl Networked for VirtualMachineSpec {
    type AfterNetwork = NeedsImage;

    /// Choosing a network replaces an existing interface choice.
    fn set_network(&mut self, slot: Slot<NetworkSpec>) {
        self.network = slot;
        self.network_interface = None;
    }
}

impl PublicIpAttachable for VirtualMachineSpec {
    fn public_ip_slot(&mut self) -> &mut Slot<PublicIpSpec> {
        &mut self.public_ip
    }
}

impl WithTags for VirtualMachineSpec {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

impl<T: Transport> Provision<T> for VirtualMachineSpec {
    type Output = VirtualMachine<T>;

    fn check(&self, name: &str) -> Result<(), CloudError> {
        self.check_choices(name)
    }

    fn provision(
        mut self,
        ctx: &Context<T>,
        name: &str,
        inherited: &Inherited,
    ) -> Result<VirtualMachine<T>, CloudError> {
        self.check_choices(name)?;
        let (Some(image), Some(credentials)) = (self.image.take(), self.credentials.take()) else {
            return Err(CloudError::invalid(name, "image and credentials are required"));
        };
        let region = inherited.region(name, self.region.as_deref())?;
        let graph = self
            .steps()
            .into_iter()
            .fold(DependencyGraph::new(name), DependencyGraph::with);
        let mut resolved = graph.resolve(ctx, &region, inherited)?;

        let storage = resolved
            .storage_account
            .take()
            .ok_or_else(|| missing(name, DependencyKind::StorageAccount))?;
        let disk_uri = format!(
            "{}vhds/{name}-osdisk.vhd",
            blob_endpoint(storage.id.short_name(), storage.payload.as_ref())
        );
        let interface = resolved
            .network_interface
            .as_ref()
            .ok_or_else(|| missing(name, DependencyKind::NetworkInterface))?;
        let mut payload = self.payload(name, &region, &image, &credentials, &disk_uri);
        payload.set(
            INTERFACES,
            json!([{ "id": interface.to_string(), "properties": { "primary": true } }]),
        );
        if let Some(set) = &resolved.availability_set {
            payload.set(AVAILABILITY_SET, reference(set));
        }
        let group = resolved.group(name)?;
        let id = ResourceId::new(
            ctx.subscription(),
            group.group(),
            ResourceType::VirtualMachine,
            name,
        );
        submit(ctx, id, &payload, "create")
    }
}

impl<T, S> VirtualMachineDefinition<T, S> {
    /// Sets the machine size; `Standard_D1` when unset.
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.spec.size = size.into();
        self
    }

    /// Places the implicit network interface in a named subnet.
    #[must_use]
    pub fn with_subnet(mut self, name: impl Into<String>) -> Self {
        self.spec.subnet = Some(name.into());
        self
    }

    /// Gives the implicit network interface a static private address.
    #[must_use]
    pub fn with_static_private_ip(mut self, address: impl Into<String>) -> Self {
        self.spec.private_ip = Some(address.into());
        self
    }

    fn with_storage(mut self, slot: Slot<StorageAccountSpec>) -> Self {
        self.spec.storage_account = slot;
        self
    }

    /// Keeps the OS disk in an existing storage account.
    #[must_use]
    pub fn with_existing_storage_account(self, account: impl Into<ExistingRef>) -> Self {
        self.with_storage(Slot::existing(account))
    }

    /// Creates a storage account named after the machine for the OS disk.
    #[must_use]
    pub fn with_new_storage_account(self) -> Self {
        self.with_storage(Slot::New(NewDependency::derived()))
    }

    /// Creates a storage account with an explicit name for the OS disk.
    #[must_use]
    pub fn with_new_storage_account_named(self, name: impl Into<String>) -> Self {
        self.with_storage(Slot::New(NewDependency::named(name)))
    }

    /// Creates the OS disk storage account from a nested definition.
    #[must_use]
    pub fn with_new_storage_account_definition(
        self,
        definition: impl Into<NewDependency<StorageAccountSpec>>,
    ) -> Self {
        self.with_storage(Slot::New(definition.into()))
    }

    fn with_availability(mut self, slot: Slot<AvailabilitySetSpec>) -> Self {
        self.spec.availability_set = slot;
        self
    }

    /// Places the machine in an existing availability set.
    #[must_use]
    pub fn with_existing_availability_set(self, set: impl Into<ExistingRef>) -> Self {
        self.with_availability(Slot::existing(set))
    }

    /// Creates an availability set named after the machine.
    #[must_use]
    pub fn with_new_availability_set(self) -> Self {
        self.with_availability(Slot::New(NewDependency::derived()))
    }

    /// Creates an availability set with an explicit name.
    #[must_use]
    pub fn with_new_availability_set_named(self, name: impl Into<String>) -> Self {
        self.with_availability(Slot::New(NewDependency::named(name)))
    }

    /// Creates an availability set from a nested definition.
    #[must_use]
    pub fn with_new_availability_set_definition(
        self,
        definition: impl Into<NewDependency<AvailabilitySetSpec>>,
    ) -> Self {
        self.with_availability(Slot::New(definition.into()))
    }
}

impl<T> VirtualMachineDefinition<T, NeedsNetwork> {
    /// Attaches an existing network interface instead of creating one. The
    /// interface decides the network, subnet, and public IP.
    #[must_use]
    pub fn with_existing_network_interface(
        mut self,
        interface: impl Into<ExistingRef>,
    ) -> VirtualMachineDefinition<T, NeedsImage> {
        self.spec.network_interface = Some(interface.into());
        self.spec.network = Slot::Unset;
        self.advance()
    }
}

impl<T> VirtualMachineDefinition<T, NeedsImage> {
    /// Boots from a marketplace image.
    #[must_use]
    pub fn with_image(mut self, image: ImageReference) -> VirtualMachineDefinition<T, NeedsCredentials> {
        self.spec.image = Some(image);
        self.advance()
    }

    /// Boots from the latest version of a marketplace image.
    #[must_use]
    pub fn with_marketplace_image(
        self,
        publisher: impl Into<String>,
        offer: impl Into<String>,
        sku: impl Into<String>,
    ) -> VirtualMachineDefinition<T, NeedsCredentials> {
        self.with_image(ImageReference::new(publisher, offer, sku))
    }
}

impl<T> VirtualMachineDefinition<T, NeedsCredentials> {
    /// Logs in with a password.
    #[must_use]
    pub fn with_admin_password(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> VirtualMachineDefinition<T, Provisionable> {
        self.spec.credentials = Some(Credentials::Password {
            username: username.into(),
            password: password.into(),
        });
        self.advance()
    }

    /// Logs in with an SSH public key.
    #[must_use]
    pub fn with_ssh_key(
        mut self,
        username: impl Into<String>,
        public_key: impl Into<String>,
    ) -> VirtualMachineDefinition<T, Provisionable> {
        self.spec.credentials = Some(Credentials::SshKey {
            username: username.into(),
            public_key: public_key.into(),
        });
        self.advance()
    }
}

impl<T: Transport> VirtualMachineDefinition<T, Provisionable> {
    /// Creates the machine and every dependency requested as new, in
    /// dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MissingRequiredDependency`] when no storage
    /// account was chosen, [`CloudError::InvalidDefinitionState`] for
    /// conflicting choices, dependency errors for referenced resources, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects a
    /// request. Dependencies created before a failure are left in place.
    pub fn provision(self) -> Result<VirtualMachine<T>, CloudError> {
        Provision::<T>::provision(self.spec, &self.ctx, &self.name, &Inherited::default())
    }
}

impl<T: Transport> VirtualMachine<T> {
    /// Machine size.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn size(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.get_str(VM_SIZE).map(str::to_owned))
    }

    /// Image the machine booted from.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn image(&mut self) -> Result<Option<ImageReference>, CloudError> {
        Ok(self.inner()?.get(IMAGE).and_then(ImageReference::from_json))
    }

    /// Administrator user name.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn admin_username(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self.inner()?.get_str(ADMIN_USERNAME).map(str::to_owned))
    }

    /// Location of the OS disk image.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn os_disk_uri(&mut self) -> Result<Option<String>, CloudError> {
        Ok(self
            .inner()?
            .get_str("properties.storageProfile.osDisk.vhd.uri")
            .map(str::to_owned))
    }

    /// Primary network interface.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn primary_network_interface_id(&mut self) -> Result<Option<ResourceId>, CloudError> {
        Ok(first_item_str(self.inner()?, INTERFACES, "/id")
            .and_then(|text| ResourceId::parse(text).ok()))
    }

    /// Availability set the machine belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RefreshFailed`] when the lazy load fails.
    pub fn availability_set_id(&mut self) -> Result<Option<ResourceId>, CloudError> {
        Ok(self
            .inner()?
            .get_str("properties.availabilitySet.id")
            .and_then(|text| ResourceId::parse(text).ok()))
    }
}

impl<T: Transport> VirtualMachineUpdate<T> {
    /// Resizes the machine.
    #[must_use]
    pub fn with_size(mut self, size: &str) -> Self {
        if size.trim().is_empty() {
            self.reject("size must not be empty");
        } else {
            self.payload_mut().set(VM_SIZE, size);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cloud;
    use crate::stage::{WithGroup, WithNetwork, WithPublicIp, WithRegion};
    use crate::test_support::StubTransport;
    use rstest::{fixture, rstest};

    const GROUP: &str = "/subscriptions/sub/resourceGroups/rg";

    #[fixture]
    fn stub() -> StubTransport {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        stub
    }

    fn ubuntu() -> ImageReference {
        ImageReference::new("Canonical", "UbuntuServer", "14.04.2-LTS")
    }

    #[rstest]
    fn everything_new_is_created_in_dependency_order() {
        let stub = StubTransport::new();
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut machine = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_new_group()
            .with_new_network()
            .with_image(ubuntu())
            .with_admin_password("azureuser", "S3cret!pass")
            .with_new_storage_account()
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let base = "/subscriptions/sub/resourceGroups/vm1group";
        assert_eq!(
            stub.put_order(),
            vec![
                base.to_owned(),
                format!("{base}/providers/Microsoft.Network/virtualNetworks/vm1net"),
                format!("{base}/providers/Microsoft.Storage/storageAccounts/vm1store"),
                format!("{base}/providers/Microsoft.Network/networkInterfaces/vm1nic"),
                format!("{base}/providers/Microsoft.Compute/virtualMachines/vm1"),
            ]
        );
        let disk = machine
            .os_disk_uri()
            .unwrap_or_else(|err| panic!("disk: {err}"));
        assert_eq!(
            disk.as_deref(),
            Some("https://vm1store.blob.core.windows.net/vhds/vm1-osdisk.vhd")
        );
        let size = machine.size().unwrap_or_else(|err| panic!("size: {err}"));
        assert_eq!(size.as_deref(), Some(DEFAULT_SIZE));
        let interface = machine
            .primary_network_interface_id()
            .unwrap_or_else(|err| panic!("nic: {err}"));
        assert_eq!(
            interface.map(|id| id.short_name().to_owned()),
            Some(String::from("vm1nic"))
        );
    }

    #[rstest]
    fn implicit_interface_inherits_subnet_and_public_ip(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network_definition(
                NetworkSpec::new()
                    .with_address_space("10.2.0.0/16")
                    .with_subnet("front", "10.2.1.0/24")
                    .with_subnet("back", "10.2.2.0/24"),
            )
            .with_image(ubuntu())
            .with_ssh_key("ops", "ssh-rsa AAAA")
            .with_subnet("back")
            .with_new_public_ip()
            .with_new_storage_account_named("vmdisks")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let mut interface = cloud
            .network_interfaces()
            .get(&format!(
                "{GROUP}/providers/Microsoft.Network/networkInterfaces/vm1nic"
            ))
            .unwrap_or_else(|err| panic!("get: {err}"));
        let subnet = interface
            .primary_subnet_id()
            .unwrap_or_else(|err| panic!("subnet: {err}"));
        assert_eq!(
            subnet.map(|id| id.short_name().to_owned()),
            Some(String::from("back"))
        );
        let public_ip = interface
            .public_ip_id()
            .unwrap_or_else(|err| panic!("public ip: {err}"));
        assert_eq!(
            public_ip.map(|id| id.short_name().to_owned()),
            Some(String::from("vm1pip"))
        );
    }

    #[rstest]
    fn first_listed_subnet_is_used_when_none_is_named(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut machine = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network_definition(
                NetworkSpec::new()
                    .with_address_space("10.3.0.0/16")
                    .with_subnet("s1", "10.3.1.0/24")
                    .with_subnet("s2", "10.3.2.0/24"),
            )
            .with_image(ubuntu())
            .with_ssh_key("ops", "ssh-rsa AAAA")
            .with_new_storage_account()
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        let card = machine
            .primary_network_interface_id()
            .unwrap_or_else(|err| panic!("interface: {err}"))
            .unwrap_or_else(|| panic!("machine has no interface"));
        let mut interface = cloud
            .network_interfaces()
            .get(&card.to_string())
            .unwrap_or_else(|err| panic!("get: {err}"));
        let subnet = interface
            .primary_subnet_id()
            .unwrap_or_else(|err| panic!("subnet: {err}"))
            .map(|id| id.to_string());
        assert_eq!(
            subnet,
            Some(format!(
                "{GROUP}/providers/Microsoft.Network/virtualNetworks/vm1net/subnets/s1"
            ))
        );
    }

    #[rstest]
    fn later_storage_choice_replaces_earlier_one(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let mut machine = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network()
            .with_image(ubuntu())
            .with_ssh_key("ops", "ssh-rsa AAAA")
            .with_existing_storage_account("ghoststore")
            .with_new_storage_account_named("vmdisks")
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));

        assert_eq!(stub.put_count(ResourceType::StorageAccount), 1);
        assert!(
            stub.put_order()
                .iter()
                .any(|id| id.ends_with("storageAccounts/vmdisks"))
        );
        let uri = machine
            .os_disk_uri()
            .unwrap_or_else(|err| panic!("disk: {err}"))
            .unwrap_or_default();
        assert!(uri.contains("vmdisks"), "unexpected disk uri {uri}");
    }

    #[rstest]
    fn storage_account_is_required(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network()
            .with_marketplace_image("Canonical", "UbuntuServer", "14.04.2-LTS")
            .with_admin_password("azureuser", "S3cret!pass")
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::MissingRequiredDependency {
                kind: DependencyKind::StorageAccount,
                ..
            })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn public_ip_conflicts_with_existing_interface(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_existing_network_interface("nic9")
            .with_image(ubuntu())
            .with_admin_password("azureuser", "S3cret!pass")
            .with_existing_storage_account("store1")
            .with_new_public_ip()
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::InvalidDefinitionState { .. })
        ));
        assert!(stub.calls().is_empty());
    }

    #[rstest]
    fn absent_existing_network_creates_nothing(stub: StubTransport) {
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_existing_network("ghost")
            .with_image(ubuntu())
            .with_admin_password("azureuser", "S3cret!pass")
            .with_new_storage_account()
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::DependencyNotFound {
                kind: DependencyKind::Network,
                ..
            })
        ));
        assert!(stub.put_order().is_empty());
    }

    #[rstest]
    fn failure_midway_keeps_created_dependencies(stub: StubTransport) {
        stub.fail_next_put(ResourceType::StorageAccount, 409, "name taken");
        let cloud = Cloud::new(stub.clone(), "sub");
        let result = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network()
            .with_image(ubuntu())
            .with_admin_password("azureuser", "S3cret!pass")
            .with_new_storage_account()
            .provision();
        assert!(matches!(
            result,
            Err(CloudError::ProviderRequestFailed {
                operation: "create",
                ..
            })
        ));
        assert_eq!(cloud.networks().list().len(), 1);
        assert_eq!(stub.put_count(ResourceType::VirtualMachine), 0);
    }

    #[rstest]
    fn availability_set_is_referenced(stub: StubTransport) {
        let cloud = Cloud::new(stub, "sub");
        let mut machine = cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network()
            .with_image(ubuntu())
            .with_ssh_key("ops", "ssh-rsa AAAA")
            .with_new_storage_account()
            .with_new_availability_set()
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));
        let set = machine
            .availability_set_id()
            .unwrap_or_else(|err| panic!("set: {err}"));
        assert_eq!(
            set.map(|id| id.short_name().to_owned()),
            Some(String::from("vm1avset"))
        );
        let user = machine
            .admin_username()
            .unwrap_or_else(|err| panic!("user: {err}"));
        assert_eq!(user.as_deref(), Some("ops"));
    }

    #[rstest]
    fn update_resizes(stub: StubTransport) {
        let cloud = Cloud::new(stub, "sub").with_default_group("rg");
        cloud
            .virtual_machines()
            .define("vm1")
            .with_region("westus")
            .with_existing_group("rg")
            .with_new_network()
            .with_image(ubuntu())
            .with_admin_password("azureuser", "S3cret!pass")
            .with_new_storage_account()
            .provision()
            .unwrap_or_else(|err| panic!("provision: {err}"));
        let mut resized = cloud
            .virtual_machines()
            .update("vm1")
            .unwrap_or_else(|err| panic!("update: {err}"))
            .with_size("Standard_D2")
            .apply()
            .unwrap_or_else(|err| panic!("apply: {err}"));
        let size = resized.size().unwrap_or_else(|err| panic!("size: {err}"));
        assert_eq!(size.as_deref(), Some("Standard_D2"));
    }

    #[rstest]
    fn credentials_debug_hides_secrets() {
        let credentials = Credentials::Password {
            username: String::from("azureuser"),
            password: String::from("hunter2"),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
