// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the connect and plan subcommands and global output flags.

use crate::output::OutputMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sshdial")]
#[command(about = "Open a stream to a remote unix socket over SSH")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Resolver defaults (YAML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit JSON events instead of text
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Print only the essential result
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve URI and bridge stdin/stdout to the remote socket
    Connect {
        /// Connection URI, e.g. qemu+ssh://user@host/system?sshauth=agent
        uri: String,
    },

    /// Show how URI would be resolved, without dialing the host
    Plan {
        /// Connection URI
        uri: String,
    },
}
