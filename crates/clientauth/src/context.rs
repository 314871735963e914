//! Per-run reconciliation context.
//!
//! Carries cancellation, an optional deadline and the behavior options. The
//! pipeline calls [`ReconcileContext::checkpoint`] before every remote call so
//! a cancelled run stops between calls; calls already made are never undone.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::CredResult;
use crate::error::CredentialsError;

/// Behavior switches for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delete credentials detached by a method switch instead of keeping them.
    pub prune_detached_credentials: bool,
}

/// Cancellation and deadline for one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    options: ReconcileOptions,
}

impl ReconcileContext {
    /// Creates a context with no deadline and default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Aborts the run once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Sets the behavior options.
    #[must_use]
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the behavior options.
    #[must_use]
    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Fails if the run was cancelled or the deadline passed.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` naming the step that was about to run.
    pub fn checkpoint(&self, step: &str) -> CredResult<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(step, "reconciliation cancelled");
            return Err(CredentialsError::cancelled(step));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            tracing::warn!(step, "reconciliation deadline exceeded");
            return Err(CredentialsError::cancelled(step));
        }
        Ok(())
    }
}
