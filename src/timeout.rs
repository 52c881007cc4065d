//! C5: Timeout Binding, plus a production [`TimeoutWheel`] implementation.
//!
//! §4.5: a negative `timeout_ms` means "fail immediately if not already
//! available"; zero means "wait indefinitely" (no binding is registered at
//! all); any positive value schedules exactly one callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::external::TimeoutWheel;

/// Saturates to `i64::MAX` instead of overflowing, per §4.5 `end_time`.
pub fn saturating_deadline_ms(now_ms: i64, timeout_ms: i64) -> i64 {
    now_ms.checked_add(timeout_ms).unwrap_or(i64::MAX)
}

/// A `TimeoutWheel` backed by `tokio::spawn` + `tokio::time::delay_for`.
/// Simple rather than a real hashed wheel: at the scale of one timer per
/// in-flight lock attempt this is what `tikv_util`'s own timer facilities
/// reduce to anyway, and it keeps this crate free of a custom scheduler.
/// Cancellation races the delay against a oneshot so `remove` never has to
/// reach into a running task.
#[derive(Default)]
pub struct TokioTimeoutWheel {
    cancels: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
}

impl TokioTimeoutWheel {
    pub fn new() -> Arc<Self> {
        Arc::new(TokioTimeoutWheel {
            cancels: Mutex::new(HashMap::new()),
        })
    }
}

impl TimeoutWheel for TokioTimeoutWheel {
    fn add(&self, timeout_id: Uuid, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.lock().insert(timeout_id, cancel_tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::delay_for(delay) => callback(),
                _ = cancel_rx => {}
            }
        });
    }

    fn remove(&self, timeout_id: Uuid) {
        if let Some(cancel_tx) = self.cancels.lock().remove(&timeout_id) {
            let _ = cancel_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_instead_of_overflowing() {
        assert_eq!(saturating_deadline_ms(i64::MAX - 1, 10), i64::MAX);
        assert_eq!(saturating_deadline_ms(0, 50), 50);
    }
}
