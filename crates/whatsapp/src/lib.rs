//! WhatsApp session management for the pontis bridge.
//!
//! Protocol work (handshake, encryption, framing) lives in a Baileys
//! sidecar process; this crate owns the session table, the lifecycle
//! controller that opens, pairs and reconnects sessions, and the WebSocket
//! client that talks to the sidecar.

pub mod client;
pub mod config;
pub mod process;
pub mod reconnect;
pub mod session;
pub mod sidecar;
pub mod sink;
pub mod types;

pub use {
    client::{OpenedSession, ProtocolClient},
    config::WhatsAppConfig,
    process::{SidecarProcess, find_sidecar_dir, start_sidecar},
    reconnect::ReconnectPolicy,
    session::{BroadcastReport, SessionHandle, SessionManager, UnlinkOutcome, format_pairing_code},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarClient},
    sink::SessionEventSink,
    types::{ConnectionEvent, GroupUpdate, InboundMessage, SessionOrigin},
};
