//! Serial transport to the thermal printer.
//!
//! Wraps one open serial port behind a handle with an exclusive-writer
//! discipline:
//! - **One writer at a time**: `acquire_writer` fails with `WriterHeld`
//!   while another writer is alive
//! - **Guaranteed release**: the writer is a guard; dropping it releases
//!   the port on every exit path
//! - **Best-effort close**: `close` never reports failure to the caller
//!
//! The byte device itself sits behind the `PrinterPort` trait so tests can
//! substitute an in-memory port for the physical printer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DeviceError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Serial line parameters. Framing is fixed at 8 data bits, 1 stop bit,
/// no parity, no flow control — the printer's native configuration —
/// and passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name, e.g. "COM3" or "/dev/ttyUSB0".
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    38_400
}

fn default_write_timeout_ms() -> u64 {
    1_000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Port seam
// ---------------------------------------------------------------------------

/// Byte sink behind the handle. The production implementation is a
/// `serialport` port; tests plug in an in-memory buffer.
pub trait PrinterPort: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

struct SerialPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl PrinterPort for SerialPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.inner, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.inner)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// An open connection to the printer. Created by [`open`], owned by the
/// embedding layer, and handed to the polling coordinator by reference.
pub struct PrinterHandle {
    id: String,
    label: String,
    open: AtomicBool,
    port: Mutex<Option<Box<dyn PrinterPort>>>,
}

impl PrinterHandle {
    /// Wrap an already-open port. Used by tests and by callers that bring
    /// their own `PrinterPort` implementation.
    pub fn with_port(port: Box<dyn PrinterPort>, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            open: AtomicBool::new(true),
            port: Mutex::new(Some(port)),
        }
    }

    /// Short identifier for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the port is still open. Does not block on a held writer.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Acquire the exclusive writer for this handle.
    ///
    /// Fails with `WriterHeld` if a writer is already alive, `NotOpen` if
    /// the handle was closed. The writer releases itself when dropped.
    pub fn acquire_writer(&self) -> Result<PrinterWriter<'_>, DeviceError> {
        let guard = match self.port.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => return Err(DeviceError::WriterHeld),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if guard.is_none() {
            return Err(DeviceError::NotOpen);
        }
        debug!(handle = %self.id, "printer writer acquired");
        Ok(PrinterWriter {
            handle_id: self.id.clone(),
            guard,
        })
    }

    /// Close the port. Best-effort: the handle is unusable afterwards
    /// regardless of the outcome, and closing twice is a no-op. Waits for
    /// an in-flight writer to release before dropping the port.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut guard = self.port.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            info!(handle = %self.id, label = %self.label, "printer port closed");
        }
    }
}

/// Exclusive write access to the printer, released on drop.
pub struct PrinterWriter<'a> {
    handle_id: String,
    guard: MutexGuard<'a, Option<Box<dyn PrinterPort>>>,
}

impl PrinterWriter<'_> {
    /// Write one complete document to the printer and flush it.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let port = self.guard.as_mut().ok_or(DeviceError::NotOpen)?;
        port.write_all(data)?;
        port.flush()?;
        debug!(handle = %self.handle_id, bytes = data.len(), "document written");
        Ok(())
    }
}

impl Drop for PrinterWriter<'_> {
    fn drop(&mut self) {
        debug!(handle = %self.handle_id, "printer writer released");
    }
}

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

/// Open the serial port described by `config` and return its handle.
pub fn open(config: &SerialConfig) -> Result<PrinterHandle, DeviceError> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(config.write_timeout_ms))
        .open()
        .map_err(|e| map_open_error(&config.port, e))?;

    let handle = PrinterHandle::with_port(
        Box::new(SerialPort { inner: port }),
        format!("{}@{}", config.port, config.baud_rate),
    );
    info!(
        handle = %handle.id,
        port = %config.port,
        baud = config.baud_rate,
        "printer port opened"
    );
    Ok(handle)
}

fn map_open_error(port: &str, err: serialport::Error) -> DeviceError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => DeviceError::Unavailable {
            port: port.to_string(),
            detail: err.to_string(),
        },
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            DeviceError::PermissionDenied {
                port: port.to_string(),
            }
        }
        _ => {
            let description = err.to_string();
            let lowered = description.to_ascii_lowercase();
            if lowered.contains("busy") || lowered.contains("in use") {
                warn!(port = port, "port busy — another process holds it open");
                DeviceError::AlreadyOpen
            } else {
                DeviceError::Unavailable {
                    port: port.to_string(),
                    detail: description,
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
