//! Ordered teardown of everything the run opened.
//!
//! Transports, sessions, and whatever else needs releasing register here in
//! acquisition order. [`ResourceLedger::unwind_all`] releases them strictly
//! last-in-first-out, runs every release exactly once, and collects failures
//! instead of stopping at the first one.

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::core::error::ShutdownError;

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

#[derive(Default)]
pub struct ResourceLedger {
    entries: Vec<(String, ReleaseFn)>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release operation. `label` names the resource in
    /// diagnostics; the closure runs once, during unwinding.
    pub fn acquire<F, Fut>(&mut self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let label = label.into();
        debug!(resource = %label, "resource acquired");
        self.entries
            .push((label, Box::new(move || Box::pin(release()))));
    }

    /// Releases everything in reverse acquisition order. Failures are
    /// returned, not raised; the drain never stops early. Calling this on an
    /// empty or already-unwound ledger is a no-op.
    pub async fn unwind_all(&mut self) -> Vec<ShutdownError> {
        let mut failures = Vec::new();
        while let Some((label, release)) = self.entries.pop() {
            debug!(resource = %label, "releasing resource");
            if let Err(message) = release().await {
                debug!(resource = %label, error = %message, "release failed");
                failures.push(ShutdownError { label, message });
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
