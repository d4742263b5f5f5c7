//! # hyperstate
//!
//! Command-line front end for the Hyperstate engine.
//!
//! - `config`: TOML graph definitions and engine bootstrap
//! - `store`: in-memory fixture records and the entity commands over them
//! - `render`: HAL-like JSON projection of responses
//! - `cli`: clap commands

pub mod cli;
pub mod config;
pub mod render;
pub mod store;

pub use config::{Bootstrap, GraphConfig};
pub use render::{render_resource, render_response};
pub use store::{Created, FixtureStore};
