//! receipt-relay — serial receipt printing agent for the order backend.
//!
//! Polls the backend for unprinted receipt records belonging to a store,
//! renders each as an ESC/POS document (merchant copy + customer copy),
//! writes the bytes to a serial thermal printer, marks the record printed,
//! and keeps a running daily order/revenue tally that resets at local
//! midnight.
//!
//! The embedding front-end owns the printer lifecycle: it opens the port
//! with [`transport::open`], hands the handle to a [`PollingCoordinator`]
//! via `bind`, and calls `unbind` when the operator disconnects. Everything
//! in between — polling, formatting, writing, marking done, tallying — is
//! the coordinator's job.
//!
//! ```rust,ignore
//! let config = AgentConfig::load("relay.json")?;
//! let store = Arc::new(config.remote_store()?);
//! let printer = Arc::new(transport::open(&config.serial)?);
//! let coordinator = PollingCoordinator::new(store, config.poll_settings());
//! coordinator.bind(printer, &config.store_id).await?;
//! // ... operator hits disconnect ...
//! coordinator.unbind()?;
//! ```

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod coordinator;
pub mod error;
pub mod escpos;
pub mod formatter;
pub mod receipt;
pub mod store;
pub mod tally;
pub mod transport;

pub use config::AgentConfig;
pub use coordinator::{ConnectionState, PollSettings, PollingCoordinator, TickOutcome, TickReport};
pub use error::{CoordinatorError, DeviceError, PrintError, StoreError};
pub use formatter::{CopyLabel, PrintDocument};
pub use receipt::{FulfillmentMode, LineItem, PrintStatus, Receipt, Variant};
pub use store::{ReceiptStore, RemoteReceiptStore, TallySnapshot};
pub use tally::DailyTally;
pub use transport::{PrinterHandle, PrinterPort, PrinterWriter, SerialConfig};

/// Initialize structured logging (console + daily rolling file).
///
/// Call once at startup. The returned guard flushes the file appender;
/// keep it alive for the lifetime of the process.
pub fn init_logging(log_dir: impl AsRef<std::path::Path>) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,receipt_relay=debug"));

    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "relay");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("receipt-relay v{} logging initialized", env!("CARGO_PKG_VERSION"));
    guard
}
