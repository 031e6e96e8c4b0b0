//! Error taxonomy for the print relay.
//!
//! Three failure domains, kept separate so the coordinator can apply the
//! right policy to each:
//! - `DeviceError` — serial transport open/write/close failures
//! - `StoreError` — remote receipt store fetch/update/aggregate failures
//! - `PrintError` — per-receipt union of the two, isolated inside a tick

use thiserror::Error;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Failures from the serial printer transport.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The port does not exist or is in use by another process.
    #[error("printer unavailable at {port}: {detail}")]
    Unavailable { port: String, detail: String },

    /// The OS denied access to the port.
    #[error("permission denied opening {port}")]
    PermissionDenied { port: String },

    /// `open` was called on a handle that is already open.
    #[error("printer port already open")]
    AlreadyOpen,

    /// A writer is already held for this handle.
    #[error("printer writer already acquired")]
    WriterHeld,

    /// The handle was closed before the operation.
    #[error("printer port not open")]
    NotOpen,

    /// Underlying I/O failure during write or flush.
    #[error("printer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

/// Failures from the remote receipt store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or server-side failure. The polling loop treats this as
    /// "no items this tick", never as fatal.
    #[error("receipt store unavailable: {0}")]
    Unavailable(String),

    /// The referenced receipt does not exist on the store.
    #[error("receipt {0} not found")]
    NotFound(String),

    /// Credentials rejected by the store.
    #[error("receipt store rejected credentials: {0}")]
    Auth(String),

    /// A fetched record failed boundary validation and was quarantined.
    #[error("malformed receipt record: {0}")]
    MalformedRecord(String),
}

// ---------------------------------------------------------------------------
// Per-receipt and coordinator errors
// ---------------------------------------------------------------------------

/// Anything that can go wrong while resolving a single receipt inside a
/// tick. Caught and logged per receipt; never aborts the batch.
#[derive(Debug, Error)]
pub enum PrintError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle misuse of the polling coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// `bind` called while a transport is already bound.
    #[error("coordinator already bound to a printer")]
    AlreadyBound,

    /// `unbind` called with no transport bound.
    #[error("coordinator is not bound")]
    NotBound,

    /// `bind` called with a handle whose port is already closed.
    #[error("printer handle is not open")]
    PrinterNotOpen,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
