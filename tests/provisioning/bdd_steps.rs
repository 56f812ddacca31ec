//! BDD step definitions for provisioning flows.

use fluentcloud::prelude::*;
use fluentcloud::resources::ImageReference;
use fluentcloud::{CloudError, ResourceType};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ProvisionContext, SUBSCRIPTION};

const GROUP: &str = "rg";
const REGION: &str = "westus";

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

fn ubuntu() -> ImageReference {
    ImageReference::new("Canonical", "UbuntuServer", "14.04.2-LTS")
}

#[given("an empty subscription")]
fn empty_subscription(provision_context: &ProvisionContext) {
    let _ = provision_context;
}

#[given("a subscription with resource group \"{group}\" in \"{region}\"")]
fn subscription_with_group(provision_context: &ProvisionContext, group: String, region: String) {
    provision_context
        .stub
        .seed_group(SUBSCRIPTION, group.trim(), region.trim());
}

#[given("the provider rejects the next storage account")]
fn provider_rejects_storage(provision_context: &ProvisionContext) {
    provision_context
        .stub
        .fail_next_put(ResourceType::StorageAccount, 409, "account name is taken");
}

#[when("I provision virtual machine \"{name}\" with a new network and a new storage account")]
fn provision_machine_with_new_network(provision_context: &ProvisionContext, name: String) {
    let outcome = provision_context
        .cloud
        .virtual_machines()
        .define(name)
        .with_region(REGION)
        .with_existing_group(GROUP)
        .with_new_network()
        .with_image(ubuntu())
        .with_admin_password("azureuser", "S3cret!pass")
        .with_new_storage_account()
        .provision()
        .map(|machine| machine.identity().clone());
    provision_context.record(outcome);
}

#[when("I provision virtual machine \"{name}\" on existing network \"{network}\"")]
fn provision_machine_on_existing_network(
    provision_context: &ProvisionContext,
    name: String,
    network: String,
) {
    let outcome = provision_context
        .cloud
        .virtual_machines()
        .define(name)
        .with_region(REGION)
        .with_existing_group(GROUP)
        .with_existing_network(network)
        .with_image(ubuntu())
        .with_admin_password("azureuser", "S3cret!pass")
        .with_new_storage_account()
        .provision()
        .map(|machine| machine.identity().clone());
    provision_context.record(outcome);
}

#[when("I create resource group \"{name}\" in \"{region}\" tagged \"{key}\" as \"{value}\"")]
fn create_tagged_group(
    provision_context: &ProvisionContext,
    name: String,
    region: String,
    key: String,
    value: String,
) {
    let outcome = provision_context
        .cloud
        .resource_groups()
        .define(name)
        .with_region(region)
        .with_tag(key, value)
        .provision()
        .map(|group| group.identity().clone());
    provision_context.record(outcome);
}

#[then("provisioning succeeds")]
fn provisioning_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match provision_context.outcome() {
        Some(Ok(_)) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("provisioning fails with a missing \"{kind}\" dependency")]
fn fails_with_missing_dependency(
    provision_context: &ProvisionContext,
    kind: String,
) -> Result<(), StepError> {
    match provision_context.outcome() {
        Some(Err(CloudError::DependencyNotFound { kind: actual, .. }))
            if actual.to_string() == kind.trim() =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected missing {kind} dependency, got {other:?}"
        ))),
    }
}

#[then("provisioning fails with a provider rejection")]
fn fails_with_provider_rejection(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match provision_context.outcome() {
        Some(Err(CloudError::ProviderRequestFailed { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected provider rejection, got {other:?}"
        ))),
    }
}

#[then("the created resources are \"{names}\"")]
fn created_resources(provision_context: &ProvisionContext, names: String) -> Result<(), StepError> {
    let expected: Vec<String> = names
        .split(',')
        .map(|name| name.trim().to_owned())
        .collect();
    let actual = provision_context.put_names();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected creates {expected:?}, got {actual:?}"
        )))
    }
}

#[then("no resources are created")]
fn no_resources_created(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let actual = provision_context.put_names();
    if actual.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no creates, got {actual:?}"
        )))
    }
}

#[then("resource group \"{group}\" holds a network named \"{name}\"")]
fn group_holds_network(
    provision_context: &ProvisionContext,
    group: String,
    name: String,
) -> Result<(), StepError> {
    let networks = provision_context.cloud.networks().list_in_group(group.trim());
    if networks.keys().any(|id| id.short_name() == name.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "network {name} not found in {group}"
        )))
    }
}

#[then("resource group \"{group}\" holds no virtual machines")]
fn group_holds_no_machines(
    provision_context: &ProvisionContext,
    group: String,
) -> Result<(), StepError> {
    let machines = provision_context
        .cloud
        .virtual_machines()
        .list_in_group(group.trim());
    if machines.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no machines in {group}, found {}",
            machines.len()
        )))
    }
}

#[then("resource group \"{group}\" carries tag \"{key}\" with value \"{value}\"")]
fn group_carries_tag(
    provision_context: &ProvisionContext,
    group: String,
    key: String,
    value: String,
) -> Result<(), StepError> {
    let mut wrapper = provision_context.cloud.resource_groups().get(group.trim())?;
    let tags = wrapper.tags()?;
    if tags.get(key.trim()).map(String::as_str) == Some(value.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected tag {key}={value}, got {tags:?}"
        )))
    }
}
