//! Renders the `fluentcloud` manual pages into `OUT_DIR`.
//!
//! One page covers the top-level command and one more is written per
//! subcommand (`fluentcloud-list.1`, `fluentcloud-use-group.1`, ...), all
//! stamped with the package version.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const MANUAL: &str = "fluentcloud manual";
const SECTION: &str = "1";

fn render(command: Command, name: &str, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command)
        .title(name.to_uppercase())
        .section(SECTION)
        .manual(MANUAL)
        .source(format!("fluentcloud {}", env!("CARGO_PKG_VERSION")))
        .render(&mut buffer)?;
    fs::write(out_dir.join(format!("{name}.{SECTION}")), buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command().version(env!("CARGO_PKG_VERSION"));
    for sub in command.get_subcommands() {
        let name = format!("fluentcloud-{}", sub.get_name());
        render(sub.clone(), &name, &out_dir)?;
    }
    render(command, "fluentcloud", &out_dir)
}
