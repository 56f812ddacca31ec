//! Command-line interface definitions for the `fluentcloud` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `fluentcloud` binary.
#[derive(Debug, Parser)]
#[command(
    name = "fluentcloud",
    about = "Inspect and manage cloud resources through the management API",
    long_about = "Inspect and manage resource groups, networks, storage accounts, \
availability sets, public IP addresses, network interfaces, load balancers, \
and virtual machines through the resource management API.\n\n\
Credentials come from fluentcloud.toml or the FLUENTCLOUD_SUBSCRIPTION_ID and \
FLUENTCLOUD_ACCESS_TOKEN environment variables. Bare resource names resolve \
against the group persisted with `fluentcloud use-group`.",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List resources of one kind.
    #[command(name = "list", about = "List resources of one kind")]
    List(ListCommand),
    /// Print a resource's provider payload as JSON.
    #[command(name = "show", about = "Print a resource's provider payload as JSON")]
    Show(TargetCommand),
    /// Delete a resource.
    #[command(name = "delete", about = "Delete a resource")]
    Delete(TargetCommand),
    /// Create a resource group.
    #[command(name = "create-group", about = "Create a resource group")]
    CreateGroup(CreateGroupCommand),
    /// Persist the group bare names resolve against.
    #[command(
        name = "use-group",
        about = "Persist the group bare names resolve against"
    )]
    UseGroup(UseGroupCommand),
}

/// Resource kinds reachable from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Kind {
    /// Resource groups.
    Group,
    /// Virtual networks.
    Network,
    /// Storage accounts.
    StorageAccount,
    /// Availability sets.
    AvailabilitySet,
    /// Public IP addresses.
    PublicIp,
    /// Network interfaces.
    NetworkInterface,
    /// Load balancers.
    LoadBalancer,
    /// Virtual machines.
    VirtualMachine,
}

/// Arguments for the `fluentcloud list` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListCommand {
    /// Kind of resource to list.
    #[arg(value_enum)]
    pub(crate) kind: Kind,
    /// Restrict the listing to one resource group.
    #[arg(long, value_name = "GROUP")]
    pub(crate) group: Option<String>,
}

/// Arguments shared by `show` and `delete`.
#[derive(Debug, Parser)]
pub(crate) struct TargetCommand {
    /// Kind of resource addressed.
    #[arg(value_enum)]
    pub(crate) kind: Kind,
    /// Resource name (resolved against the default group) or full path.
    #[arg(value_name = "NAME_OR_ID")]
    pub(crate) target: String,
}

/// Arguments for the `fluentcloud create-group` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateGroupCommand {
    /// Name of the new group.
    pub(crate) name: String,
    /// Region the group is created in.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: String,
    /// Tag to attach, as `key=value`. May be repeated.
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub(crate) tags: Vec<(String, String)>,
}

/// Arguments for the `fluentcloud use-group` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct UseGroupCommand {
    /// Group name, or a `/subscriptions/<id>/resourceGroups/<name>` path.
    pub(crate) name: String,
    /// Overwrite a different default group already in configuration.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Parses a `key=value` tag argument.
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("tag '{raw}' must have the form key=value"))?;
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(format!("tag '{raw}' has an empty key"));
    }
    Ok((trimmed.to_owned(), value.trim().to_owned()))
}
