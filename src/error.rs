//! Error types for device access and rule editing

use thiserror::Error;

/// Failures of MIDI device access, binding and dispatch
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device access was requested a second time. The existing access
    /// handle stays usable.
    #[error("MIDI access already initialized")]
    AlreadyInitialized,

    #[error("MIDI access not initialized")]
    NotInitialized,

    #[error("MIDI access denied: {0}")]
    AccessDenied(String),

    #[error("{direction} port '{selector}' not found")]
    PortNotFound {
        direction: &'static str,
        selector: String,
    },

    #[error("failed to connect to '{port}': {reason}")]
    Connect { port: String, reason: String },

    #[error("input '{0}' already has a listener")]
    AlreadyAttached(String),

    #[error("failed to send to '{port}': {reason}")]
    Send { port: String, reason: String },
}

/// Invalid values in rule edits (editor commands or config file)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("invalid channel '{0}' (must be 0-15)")]
    InvalidChannel(String),

    #[error("invalid note '{0}' (must be 0-127)")]
    InvalidNote(String),

    #[error("unknown command '{0}' (try 'help')")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}
