//! Polling coordinator — the print relay's work loop.
//!
//! Owns the poll → format → write → mark-done cycle and the daily tally.
//! Lifecycle:
//! - `bind` attaches an open printer handle, rebuilds the tally, runs one
//!   tick immediately, and schedules a recurring tick
//! - `tick` is **single-flight**: a tick that fires while the previous one
//!   is still running is a silent no-op, never queued
//! - `unbind` cancels the schedule; an in-flight tick finishes its current
//!   receipt but starts no new one
//!
//! Within a tick, receipts print strictly sequentially in fetched order.
//! Per-receipt failures are logged and skipped; the failed receipt stays
//! pending on the store and is picked up again on a later tick. That
//! re-fetch IS the retry mechanism — there is no separate retry queue.
//!
//! Known limitation: a crash between a successful write and `mark_done`
//! reprints that receipt on the next run (at-least-once).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CoordinatorError, PrintError};
use crate::formatter::{self, CopyLabel};
use crate::receipt::Receipt;
use crate::store::ReceiptStore;
use crate::tally::DailyTally;
use crate::transport::PrinterHandle;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Poll loop parameters.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between scheduled ticks.
    pub interval: Duration,
    /// Maximum receipts fetched per tick.
    pub batch_limit: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            batch_limit: 10,
        }
    }
}

/// Coordinator lifecycle state, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No printer bound; loop not running.
    Idle,
    /// Printer bound; waiting for the next tick.
    Bound,
    /// One tick in progress.
    Ticking,
}

/// What one `tick` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No printer bound — nothing to do.
    NotBound,
    /// A previous tick is still running; this call was a no-op.
    AlreadyTicking,
    /// The tick ran to completion (possibly over an empty batch).
    Completed(TickReport),
}

/// Per-tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub printed: usize,
    pub failed: usize,
}

/// Everything tied to one bound printer. Dropped as a unit on `unbind`.
struct Binding {
    printer: Arc<PrinterHandle>,
    store_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct CoordinatorInner {
    store: Arc<dyn ReceiptStore>,
    settings: PollSettings,
    busy: AtomicBool,
    tally: tokio::sync::Mutex<DailyTally>,
    binding: std::sync::Mutex<Option<Binding>>,
}

/// Clears the single-flight flag on every exit path out of a tick.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Polls the store for pending receipts and relays them to the printer.
///
/// Each coordinator instance owns its own tally and binding; multiple
/// stores run multiple independent coordinators.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PollingCoordinator {
    pub fn new(store: Arc<dyn ReceiptStore>, settings: PollSettings) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                settings,
                busy: AtomicBool::new(false),
                tally: tokio::sync::Mutex::new(DailyTally::new(Local::now().date_naive())),
                binding: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        let bound = self
            .inner
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if !bound {
            ConnectionState::Idle
        } else if self.inner.busy.load(Ordering::SeqCst) {
            ConnectionState::Ticking
        } else {
            ConnectionState::Bound
        }
    }

    /// Snapshot of today's tally for display.
    pub async fn tally(&self) -> DailyTally {
        self.inner.tally.lock().await.clone()
    }

    /// Attach an open printer and start the polling loop.
    ///
    /// Rebuilds the tally from the store aggregate (zeroed if the store is
    /// unreachable — the tally never blocks printing), runs one tick
    /// immediately, then ticks every `settings.interval`.
    pub async fn bind(
        &self,
        printer: Arc<PrinterHandle>,
        store_id: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        if !printer.is_open() {
            return Err(CoordinatorError::PrinterNotOpen);
        }
        let store_id = store_id.into();
        let cancel = CancellationToken::new();

        {
            let mut binding = self.inner.binding.lock().unwrap_or_else(|e| e.into_inner());
            if binding.is_some() {
                return Err(CoordinatorError::AlreadyBound);
            }
            *binding = Some(Binding {
                printer,
                store_id: store_id.clone(),
                cancel: cancel.clone(),
                task: None,
            });
        }
        info!(store_id = %store_id, "coordinator bound, starting poll loop");

        {
            let mut tally = self.inner.tally.lock().await;
            tally
                .rebuild(self.inner.store.as_ref(), &store_id, Local::now().date_naive())
                .await;
        }

        self.tick().await;

        let coordinator = self.clone();
        let interval = self.inner.settings.interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
                coordinator.tick().await;
            }
            info!("poll loop stopped");
        });

        let mut binding = self.inner.binding.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut b) = *binding {
            b.task = Some(task);
        } else {
            // Unbound while we were starting up; stop the loop we just spawned.
            task.abort();
        }
        Ok(())
    }

    /// Detach the printer and cancel the recurring schedule.
    ///
    /// Cooperative: an in-flight tick finishes the receipt it is writing —
    /// interrupting a transmission would leave the paper torn mid-document —
    /// and then stops. Cancelling twice is harmless.
    pub fn unbind(&self) -> Result<(), CoordinatorError> {
        let binding = self
            .inner
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match binding {
            Some(b) => {
                b.cancel.cancel();
                info!(store_id = %b.store_id, "coordinator unbound");
                Ok(())
            }
            None => Err(CoordinatorError::NotBound),
        }
    }

    /// Run one polling iteration.
    ///
    /// Single-flight: if a tick is already running this returns
    /// `AlreadyTicking` without touching the store or the printer.
    pub async fn tick(&self) -> TickOutcome {
        // Snapshot the binding so an unbind mid-tick cannot pull the
        // printer out from under us; the token tells us to stop instead.
        let (printer, store_id, cancel) = {
            let binding = self.inner.binding.lock().unwrap_or_else(|e| e.into_inner());
            match binding.as_ref() {
                Some(b) => (b.printer.clone(), b.store_id.clone(), b.cancel.clone()),
                None => return TickOutcome::NotBound,
            }
        };

        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::AlreadyTicking;
        }
        let _busy = BusyGuard(&self.inner.busy);

        let mut report = TickReport::default();

        {
            let mut tally = self.inner.tally.lock().await;
            tally
                .rollover_if_needed(
                    self.inner.store.as_ref(),
                    &store_id,
                    Local::now().date_naive(),
                )
                .await;
        }

        let batch = match self
            .inner
            .store
            .fetch_pending(&store_id, self.inner.settings.batch_limit)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                // Store trouble means no items this tick, not a dead loop.
                warn!(error = %e, "fetch failed, will retry next tick");
                return TickOutcome::Completed(report);
            }
        };
        report.fetched = batch.len();

        for receipt in &batch {
            if cancel.is_cancelled() {
                info!(
                    remaining = report.fetched - report.printed - report.failed,
                    "unbound mid-batch, leaving remaining receipts pending"
                );
                break;
            }
            match self.print_one(&printer, receipt).await {
                Ok(amount) => {
                    report.printed += 1;
                    self.inner.tally.lock().await.record_print(amount);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        receipt_id = %receipt.id,
                        order = %receipt.short_order_code(),
                        error = %e,
                        "receipt failed, continuing with the rest of the batch"
                    );
                }
            }
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                printed = report.printed,
                failed = report.failed,
                "tick complete"
            );
        }
        TickOutcome::Completed(report)
    }

    /// Print both copies of one receipt, then mark it done.
    ///
    /// The writer is held only for the two document writes and released
    /// before the store round-trip. A `mark_done` failure is logged but
    /// does not fail the receipt: the copies are already on paper, so the
    /// tally still counts it; the store will re-serve it next tick and it
    /// prints again (at-least-once).
    async fn print_one(
        &self,
        printer: &PrinterHandle,
        receipt: &Receipt,
    ) -> Result<i64, PrintError> {
        let merchant = formatter::format(receipt, CopyLabel::Merchant);
        let customer = formatter::format(receipt, CopyLabel::Customer);

        {
            let mut writer = printer.acquire_writer()?;
            writer.write_all(merchant.as_bytes())?;
            writer.write_all(customer.as_bytes())?;
        }

        if let Err(e) = self.inner.store.mark_done(&receipt.id).await {
            warn!(
                receipt_id = %receipt.id,
                error = %e,
                "mark_done failed, receipt will be re-served next tick"
            );
        }
        Ok(receipt.total())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
