//! Build script for the `snapstage` manual pages.
//!
//! Renders `snapstage.1` plus one `snapstage-{subcommand}.1` page per
//! subcommand into `OUT_DIR` for packaging.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render_page(command: clap::Command, out_dir: &Path, file_name: &str) -> io::Result<()> {
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    fs::write(out_dir.join(file_name), page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(
        env::var_os("OUT_DIR")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?,
    );

    let command = cli::Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("snapstage-{}", sub.get_name());
        render_page(sub.clone().bin_name(name.clone()), &out_dir, &format!("{name}.1"))?;
    }
    render_page(command, &out_dir, "snapstage.1")?;

    Ok(())
}
