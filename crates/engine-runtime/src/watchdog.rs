use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Enforces the wall-clock deadline implied by the currently held lease.
///
/// Renewals push the deadline forward through a watch channel. If the
/// deadline passes before the pipeline finishes, the watchdog cancels the
/// pipeline token and trips the fired flag; the worker reports `LeaseLost`
/// and the process terminates without attempting rollback. Exclusivity of
/// the next claimant's lease is what makes the abrupt stop safe.
pub struct LeaseWatchdog {
    expiry_tx: watch::Sender<DateTime<Utc>>,
    fired: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl LeaseWatchdog {
    pub fn start(initial_expiry: DateTime<Utc>, cancel: CancellationToken) -> Self {
        let (expiry_tx, mut expiry_rx) = watch::channel(initial_expiry);
        let (fired_tx, fired) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                let deadline = *expiry_rx.borrow();
                let now = Utc::now();
                let remaining = (deadline - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Pipeline finished before the lease deadline");
                        return;
                    }
                    changed = expiry_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // New expiry, recompute the deadline.
                        continue;
                    }
                    _ = tokio::time::sleep(remaining) => {
                        error!(deadline = %deadline, "Lease deadline passed, terminating shard pipeline");
                        let _ = fired_tx.send(true);
                        cancel.cancel();
                        return;
                    }
                }
            }
        });

        Self {
            expiry_tx,
            fired,
            handle,
        }
    }

    /// Pushes the deadline forward after a successful lease renewal.
    pub fn extend(&self, new_expiry: DateTime<Utc>) {
        let _ = self.expiry_tx.send(new_expiry);
    }

    /// True once the deadline fired; distinguishes a lease-loss cancellation
    /// from an operator-initiated one.
    pub fn fired(&self) -> bool {
        *self.fired.borrow()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
