//! Command-line interface definitions for the `ofen` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI for the `ofen` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ofen",
    version,
    about = "Bake reusable machine images on Scaleway, OpenStack or libvirt"
)]
pub(crate) struct Cli {
    /// Backend to use; defaults to the spec's `provider` key, then scaleway.
    #[arg(
        long,
        global = true,
        value_name = "PROVIDER",
        value_parser = ["scaleway", "openstack", "libvirt"]
    )]
    pub(crate) provider: Option<String>,
    /// libvirt connection URI, overriding the spec's `region` and
    /// `OFEN_LIBVIRT_URI`.
    #[arg(long, global = true, value_name = "URI")]
    pub(crate) uri: Option<String>,
    /// Directory holding libvirt images, overriding `OFEN_LIBVIRT_IMAGE_DIR`.
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) image_dir: Option<PathBuf>,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

/// Operations offered by `ofen`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Build an image from a JSON build spec.
    #[command(name = "bake")]
    Bake(BakeCommand),
    /// List images owned by the current account.
    #[command(name = "list")]
    List,
    /// Delete an image by identifier or name.
    #[command(name = "delete")]
    Delete(ImageArg),
    /// Show the properties of an image, by identifier or name.
    #[command(name = "info")]
    Info(ImageArg),
}

/// Arguments for `ofen bake`.
#[derive(Debug, Parser)]
pub(crate) struct BakeCommand {
    /// Path to the build spec.
    #[arg(value_name = "SPEC")]
    pub(crate) spec: PathBuf,
}

/// Arguments naming one image.
#[derive(Debug, Parser)]
pub(crate) struct ImageArg {
    /// Image identifier as printed by `bake` and `list`, or the image name.
    #[arg(value_name = "IMAGE")]
    pub(crate) image: String,
}
