//! Binary entry point for the fluentcloud CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use fluentcloud::prelude::*;
use fluentcloud::{
    CloudConfig, CloudError, ConfigStore, ConfigStoreError, ConfigWriter, DefaultGroup, Entities,
    Transport,
};

mod cli;

use cli::{Cli, CreateGroupCommand, Kind, ListCommand, TargetCommand, UseGroupCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error("config store error: {0}")]
    Store(#[from] ConfigStoreError),
    #[error("failed to render payload: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, &mut io::stdout()) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    match cli {
        Cli::UseGroup(command) => use_group(&ConfigStore::new(), &command, out),
        Cli::List(command) => list(&connect()?, &command, out),
        Cli::Show(command) => show(&connect()?, &command, out),
        Cli::Delete(command) => delete(&connect()?, &command, out),
        Cli::CreateGroup(command) => create_group(&connect()?, command, out),
    }
}

fn connect() -> Result<Cloud<fluentcloud::HttpTransport>, CliError> {
    let config =
        CloudConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    Ok(Cloud::authenticate(&config)?)
}

/// Runs `$action` against the collection matching `$kind`.
macro_rules! with_collection {
    ($cloud:expr, $kind:expr, $action:ident($($arg:expr),*)) => {
        match $kind {
            Kind::Group => $action(&$cloud.resource_groups(), $($arg),*),
            Kind::Network => $action(&$cloud.networks(), $($arg),*),
            Kind::StorageAccount => $action(&$cloud.storage_accounts(), $($arg),*),
            Kind::AvailabilitySet => $action(&$cloud.availability_sets(), $($arg),*),
            Kind::PublicIp => $action(&$cloud.public_ip_addresses(), $($arg),*),
            Kind::NetworkInterface => $action(&$cloud.network_interfaces(), $($arg),*),
            Kind::LoadBalancer => $action(&$cloud.load_balancers(), $($arg),*),
            Kind::VirtualMachine => $action(&$cloud.virtual_machines(), $($arg),*),
        }
    };
}

fn list<T: Transport>(
    cloud: &Cloud<T>,
    command: &ListCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    with_collection!(cloud, command.kind, write_ids(command.group.as_deref(), out))
}

fn write_ids<T: Transport, W: Wrapper<T>>(
    entities: &Entities<T, W>,
    group: Option<&str>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let listed = match group {
        Some(name) => entities.list_in_group(name),
        None => entities.list(),
    };
    for id in listed.keys() {
        writeln!(out, "{id}")?;
    }
    Ok(())
}

fn show<T: Transport>(
    cloud: &Cloud<T>,
    command: &TargetCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    with_collection!(cloud, command.kind, write_payload(&command.target, out))
}

fn write_payload<T: Transport, W: Wrapper<T>>(
    entities: &Entities<T, W>,
    target: &str,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let mut wrapper = entities.get(target)?;
    let rendered = serde_json::to_string_pretty(&wrapper.inner()?.to_value())?;
    writeln!(out, "{rendered}")?;
    Ok(())
}

fn delete<T: Transport>(
    cloud: &Cloud<T>,
    command: &TargetCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    with_collection!(cloud, command.kind, remove(&command.target, out))
}

fn remove<T: Transport, W: Wrapper<T>>(
    entities: &Entities<T, W>,
    target: &str,
    out: &mut impl Write,
) -> Result<(), CliError> {
    entities.delete(target)?;
    writeln!(out, "deleted {target}")?;
    Ok(())
}

fn create_group<T: Transport>(
    cloud: &Cloud<T>,
    command: CreateGroupCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let group = cloud
        .resource_groups()
        .define(command.name)
        .with_region(command.region)
        .with_tags(command.tags)
        .provision()?;
    writeln!(out, "{}", group.identity())?;
    Ok(())
}

fn use_group(
    store: &impl ConfigWriter,
    command: &UseGroupCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let group = DefaultGroup::parse(&command.name)?;
    let path = store.write_default_group(&group, command.force)?;
    writeln!(out, "default group set to {} in {path}", group.name())?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentcloud::ResourceType;
    use fluentcloud::test_support::StubTransport;
    use rstest::{fixture, rstest};
    use serde_json::json;

    const NETWORK: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/net1";

    #[fixture]
    fn stub() -> StubTransport {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        stub.insert_json(json!({"id": NETWORK, "name": "net1", "location": "westus"}));
        stub
    }

    fn cloud(stub: &StubTransport) -> Cloud<StubTransport> {
        Cloud::new(stub.clone(), "sub").with_default_group("rg")
    }

    fn rendered(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).unwrap_or_else(|err| panic!("utf8 output: {err}"))
    }

    #[rstest]
    fn list_prints_one_identity_per_line(stub: StubTransport) {
        let mut out = Vec::new();
        let command = ListCommand {
            kind: Kind::Network,
            group: Some(String::from("rg")),
        };
        list(&cloud(&stub), &command, &mut out).unwrap_or_else(|err| panic!("list: {err}"));
        assert_eq!(rendered(out), format!("{NETWORK}\n"));
    }

    #[rstest]
    fn show_prints_payload_json(stub: StubTransport) {
        let mut out = Vec::new();
        let command = TargetCommand {
            kind: Kind::Network,
            target: String::from("net1"),
        };
        show(&cloud(&stub), &command, &mut out).unwrap_or_else(|err| panic!("show: {err}"));
        let value: serde_json::Value = serde_json::from_str(&rendered(out))
            .unwrap_or_else(|err| panic!("json output: {err}"));
        assert_eq!(value.get("name").and_then(|name| name.as_str()), Some("net1"));
    }

    #[rstest]
    fn show_reports_absent_resource(stub: StubTransport) {
        let command = TargetCommand {
            kind: Kind::VirtualMachine,
            target: String::from("vm-missing"),
        };
        let result = show(&cloud(&stub), &command, &mut Vec::new());
        assert!(matches!(
            result,
            Err(CliError::Cloud(CloudError::RefreshFailed { .. }))
        ));
    }

    #[rstest]
    fn delete_removes_resource(stub: StubTransport) {
        let mut out = Vec::new();
        let command = TargetCommand {
            kind: Kind::Network,
            target: String::from("net1"),
        };
        delete(&cloud(&stub), &command, &mut out).unwrap_or_else(|err| panic!("delete: {err}"));
        assert_eq!(stub.delete_count(), 1);
        assert!(rendered(out).starts_with("deleted "));
        assert!(cloud(&stub).networks().list().is_empty());
    }

    #[rstest]
    fn create_group_submits_tags(stub: StubTransport) {
        let mut out = Vec::new();
        let command = CreateGroupCommand {
            name: String::from("rg2"),
            region: String::from("eastus"),
            tags: vec![(String::from("env"), String::from("dev"))],
        };
        create_group(&cloud(&stub), command, &mut out)
            .unwrap_or_else(|err| panic!("create group: {err}"));
        assert_eq!(stub.put_count(ResourceType::ResourceGroup), 1);
        assert_eq!(rendered(out), "/subscriptions/sub/resourceGroups/rg2\n");
    }

    #[rstest]
    fn bare_name_without_default_group_is_rejected(stub: StubTransport) {
        let command = TargetCommand {
            kind: Kind::Network,
            target: String::from("net1"),
        };
        let result = delete(&Cloud::new(stub.clone(), "sub"), &command, &mut Vec::new());
        assert!(matches!(
            result,
            Err(CliError::Cloud(CloudError::MalformedIdentifier { .. }))
        ));
        assert_eq!(stub.delete_count(), 0);
    }

    #[rstest]
    fn write_error_renders_message() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::Config(String::from("missing token")));
        assert_eq!(rendered(buffer), "configuration error: missing token\n");
    }
}
