//! Command-line interface definitions for the `stackhop` binary.
//!
//! Shared by the binary and the build script, which renders the manual page
//! from the same parser. Positional arguments are optional at the clap level
//! so the binary can report missing values with its own message and exit
//! status.

use clap::Parser;

/// Top-level CLI for the `stackhop` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stackhop",
    version,
    about = "Deploy a bastion-fronted network stack and the database stack behind it",
    long_about = "Deploy a bastion-fronted network stack and the database stack behind it.\n\n\
                  The database stack is deployed through an SSH tunnel opened via the \
                  bastion host once the network stack exports its address."
)]
pub(crate) struct Cli {
    /// Command to run: preview, up, refresh, or destroy.
    #[arg(value_name = "COMMAND")]
    pub(crate) command: Option<String>,
    /// Stack name used in both the network and database units.
    #[arg(value_name = "STACK")]
    pub(crate) stack_name: Option<String>,
    /// SSH public key installed on the bastion host; required by `up`.
    #[arg(value_name = "PUBLIC_KEY_FILE")]
    pub(crate) public_key_file: Option<String>,
}
