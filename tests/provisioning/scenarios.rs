//! BDD scenarios for provisioning flows.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision a virtual machine with implicit dependencies"
)]
fn scenario_implicit_dependencies(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Stop before any create when an existing network is absent"
)]
fn scenario_absent_network(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Keep dependencies created before a provider rejection"
)]
fn scenario_partial_failure(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Create a tagged resource group"
)]
fn scenario_tagged_group(provision_context: ProvisionContext) {
    let _ = provision_context;
}
