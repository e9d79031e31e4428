//! Configuration for the pontis bridge.
//!
//! A single [`BridgeConfig`] covers both bot accounts, the WhatsApp sidecar,
//! the registry file, the media APIs and the liveness listener. Files are
//! discovered project-local first, then in the user config directory, and
//! support TOML, YAML and JSON with `${ENV_VAR}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::BridgeConfig,
};
