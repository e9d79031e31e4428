//! Persisted link registry for the pontis bridge.
//!
//! Maps a Telegram chat ID to the WhatsApp numbers it has linked. Backed by
//! a single JSON file that is rewritten wholesale on every mutation and read
//! once at startup.

pub mod error;
pub mod store;

pub use {
    error::{Error, Result},
    store::{LinkRecord, UserRegistry},
};
