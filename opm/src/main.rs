// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use opcat_cmdlib::{GlobalOptions, ImageClientOptions};
use opm::{
    DiffOptions, InitOptions, ListOptions, RenderOptions, ServeOptions, ValidateOptions,
};

#[derive(Debug, Parser)]
#[command(name = "opm", about = "Manage operator catalogs")]
struct Args {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(flatten)]
    images: ImageClientOptions,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Materialize catalog refs into a declarative config
    Render(RenderOptions),
    /// Compute the bundles needed to move from one catalog to another
    Diff(DiffOptions),
    /// Serve a declarative config directory over the catalog API
    Serve(ServeOptions),
    /// List the contents of a catalog ref
    #[command(subcommand)]
    List(ListOptions),
    /// Generate an olm.package document
    Init(InitOptions),
    /// Validate a declarative config directory
    Validate(ValidateOptions),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    args.global.init_logging();

    match args.cmd {
        Command::Render(options) => options.exec(&args.images),
        Command::Diff(options) => options.exec(&args.images),
        Command::Serve(options) => options.exec(),
        Command::List(options) => options.exec(&args.images),
        Command::Init(options) => options.exec(),
        Command::Validate(options) => options.exec(),
    }
}
