//! Resource kinds: specs, staged definitions, wrappers, and updates.

mod availability_set;
mod load_balancer;
mod network;
mod network_interface;
mod public_ip;
mod resource_group;
mod storage_account;
mod virtual_machine;

pub use availability_set::{
    AvailabilitySet, AvailabilitySetDefinition, AvailabilitySetSpec, AvailabilitySetUpdate,
};
pub use load_balancer::{
    LoadBalancer, LoadBalancerDefinition, LoadBalancerSpec, LoadBalancerUpdate, TcpRule,
};
pub use network::{Network, NetworkDefinition, NetworkSpec, NetworkUpdate, Subnet};
pub use network_interface::{
    NetworkInterface, NetworkInterfaceDefinition, NetworkInterfaceSpec, NetworkInterfaceUpdate,
};
pub use public_ip::{
    IpAllocation, PublicIpAddress, PublicIpDefinition, PublicIpSpec, PublicIpUpdate,
};
pub use resource_group::{
    ResourceGroup, ResourceGroupDefinition, ResourceGroupSpec, ResourceGroupUpdate,
};
pub use storage_account::{
    AccountType, StorageAccount, StorageAccountDefinition, StorageAccountSpec,
    StorageAccountUpdate,
};
pub use virtual_machine::{
    Credentials, ImageReference, VirtualMachine, VirtualMachineDefinition, VirtualMachineSpec,
    VirtualMachineUpdate,
};

/// Reads `/properties/...` style pointers from the first element of an
/// array field.
fn first_item_str<'a>(
    payload: &'a crate::payload::Payload,
    array: &str,
    pointer: &str,
) -> Option<&'a str> {
    payload
        .get_array(array)
        .first()
        .and_then(|item| item.pointer(pointer))
        .and_then(serde_json::Value::as_str)
}

/// Collects the `id` of every `{ "id": ... }` object in an array field.
fn reference_ids(payload: &crate::payload::Payload, array: &str) -> Vec<crate::identity::ResourceId> {
    payload
        .get_array(array)
        .iter()
        .filter_map(|item| item.get("id").and_then(serde_json::Value::as_str))
        .filter_map(|text| crate::identity::ResourceId::parse(text).ok())
        .collect()
}
