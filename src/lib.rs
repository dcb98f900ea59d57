//! Extension execution core for the r2r CLI.
//!
//! Extensions are versioned container images declared in a layered YAML
//! configuration. This crate loads and validates that configuration, decides
//! whether an image must be pulled, launches containers with the agreed
//! environment/stdio contract, sanitizes their terminal output, and cleans up
//! containers they spawn through the Docker socket.
//!
//! ```text
//! ConfigStore ──▶ Extension ──▶ ContainerHost ──▶ ensure image (policy, auth, cache)
//!                                     │
//!                                     ├─▶ create / attach / start / wait
//!                                     │        └─▶ AnsiFilter ──▶ stdout/stderr
//!                                     └─▶ CleanupService (child containers)
//! ```

pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod installer;
pub mod pinning;
pub mod registry;
pub mod session;
pub mod terminal;

pub use config::{Config, ConfigStore, Extension, load_config};
pub use container::{ContainerHost, PullPolicy};
pub use error::ConfigError;
