//! # Hyperstate CLI Module
//!
//! This module implements the CLI interface for Hyperstate.
//!
//! ## Available Commands
//!
//! - `validate` - Load and build a graph definition
//! - `states` - List states, paths and allowed methods
//! - `request` - Resolve one request and print the rendered response

mod commands;

use clap::{Parser, Subcommand};
use hyperstate_core::HyperstateError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Hyperstate - hypermedia resource-state engine
///
/// Loads a declarative graph of resource states and resolves requests
/// against it, printing responses with links and embedded resources.
#[derive(Parser, Debug)]
#[command(name = "hyperstate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the graph definition
    #[arg(short = 'g', long, global = true, default_value = "hyperstate.toml")]
    pub graph: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the graph definition and report its size
    Validate,

    /// List states with their paths and allowed methods
    States,

    /// Resolve one request
    Request {
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request path (a `?a=b` suffix is parsed as query parameters)
        #[arg(short, long)]
        path: String,

        /// Query parameter as name=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,

        /// Request header as name=value (repeatable)
        #[arg(short = 'H', long = "header")]
        header: Vec<String>,

        /// Do not inject links
        #[arg(long)]
        no_links: bool,

        /// Do not embed resources
        #[arg(long)]
        no_embed: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), HyperstateError> {
    let json_mode = cli.json_mode;

    let output = match cli.command {
        Some(Commands::Validate) | None => cmd_validate(&cli.graph, json_mode)?,
        Some(Commands::States) => cmd_states(&cli.graph, json_mode, cli.verbose)?,
        Some(Commands::Request {
            method,
            path,
            query,
            header,
            no_links,
            no_embed,
        }) => {
            let options = RequestOptions {
                method,
                path,
                query,
                headers: header,
                inject_links: !no_links,
                embed_resources: !no_embed,
            };
            cmd_request(&cli.graph, &options)?
        }
    };

    println!("{}", output);
    Ok(())
}
