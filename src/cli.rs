//! Command-line interface built on clap.
//!
//! Defines [`Cli`] with its [`Command`]s and the global `--config` and
//! `--verbose` flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::state_machine::ImportId;

/// Renders uploaded conference talks into finished intro/outro videos.
#[derive(Debug, Parser)]
#[command(name = "talk-render", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./talk-render.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validates the external toolchain.
    Check,

    /// Registers an uploaded talk so it can be rendered.
    Register {
        import_id: ImportId,
        source_path: PathBuf,
    },

    /// Renders one talk in the foreground.
    Render { import_id: ImportId },

    /// Shows the render state of one talk, or of all talks.
    Status { import_id: Option<ImportId> },

    /// Resets renders interrupted by a previous shutdown.
    Recover,

    /// Resolves an artifact token to the finished video.
    Artifact { token: String },

    /// Runs as a service, reading import ids to render from stdin.
    Serve,
}
