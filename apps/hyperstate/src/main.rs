//! # Hyperstate
//!
//! The binary for the Hyperstate resource-state engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/hyperstate (THE BINARY)          │
//! │                                                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐   │
//! │  │    CLI      │  │ TOML graph  │  │  Fixture    │   │
//! │  │   (clap)    │  │   loader    │  │   store     │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘   │
//! │         └────────────────┼────────────────┘          │
//! │                          ▼                           │
//! │                 ┌─────────────────┐                  │
//! │                 │ hyperstate-core │                  │
//! │                 │   (THE LOGIC)   │                  │
//! │                 └─────────────────┘                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! hyperstate validate -g demos/customers.toml
//! hyperstate states -g demos/customers.toml --verbose
//! hyperstate request -g demos/customers.toml -m GET -p /customers/1
//! hyperstate request -g demos/customers.toml -m POST -p /customers -q name=Carol
//! ```

use clap::Parser;
use hyperstate::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // HYPERSTATE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("HYPERSTATE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "hyperstate=debug,hyperstate_core=debug"
    } else {
        "hyperstate=info,hyperstate_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
