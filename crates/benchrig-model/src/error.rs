use std::path::PathBuf;

use uuid::Uuid;

/// Errors visible at the core boundary.
///
/// Locally recovered conditions (EEPROM read failures, invalid BIB ids,
/// log-directory failures) never appear here; components fall back and log
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("BIB '{bib_id}' not found in configuration")]
    BibNotFound { bib_id: String },

    #[error("UUT '{uut_id}' not found in BIB '{bib_id}'")]
    UutNotFound { bib_id: String, uut_id: String },

    #[error("port {port_index} not found in UUT '{uut_id}' of BIB '{bib_id}'")]
    PortNotFound {
        bib_id: String,
        uut_id: String,
        port_index: u32,
    },

    #[error("no port available matching the requested criteria")]
    PortNotAvailable,

    #[error("protocol '{requested}' is not supported (supported: {})", supported.join(", "))]
    ProtocolUnsupported {
        requested: String,
        supported: Vec<String>,
    },

    #[error("failed to open session on {port_name}: {reason}")]
    SessionOpenFailed { port_name: String, reason: String },

    #[error("command timed out after {timeout_ms} ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("command failed: {reason}")]
    CommandFailed { reason: String },

    #[error("reservation {reservation_id} has expired")]
    ReservationExpired { reservation_id: Uuid },

    #[error("reservation {reservation_id} is not owned by client '{client_id}'")]
    ReservationOwnerMismatch {
        reservation_id: Uuid,
        client_id: String,
    },

    #[error("transport error on {port_name}: {reason}")]
    Transport { port_name: String, reason: String },

    #[error("no active session")]
    NoActiveSession,
}
