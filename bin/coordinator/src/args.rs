//! Parses command-line arguments for the coordinator.

use std::path::PathBuf;

use clap::{crate_version, Parser};

#[derive(Debug, Parser)]
#[clap(
    name = "wabisabi-coordinator",
    about = "The WabiSabi coinjoin coordinator",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'c',
        help = "The file containing the configuration for the coordinator",
        default_value = "config.toml"
    )]
    pub config: PathBuf,
}
