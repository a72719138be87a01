// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation primitives for tracked executions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Why an execution was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller asked for cancellation.
    UserRequested,
    /// The effective deadline expired.
    DeadlineExpired,
    /// A sibling workflow node failed; the orchestrator is unwinding.
    WorkflowFailed,
    /// The process is shutting down.
    Shutdown,
}

impl CancelReason {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::UserRequested => "cancelled by caller request",
            Self::DeadlineExpired => "cancelled because the deadline expired",
            Self::WorkflowFailed => "cancelled because a workflow sibling failed",
            Self::Shutdown => "cancelled because the server is shutting down",
        }
    }
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    reason: Mutex<Option<CancelReason>>,
}

/// A cloneable token signalling cancellation to the worker that owns an
/// execution. All clones share state; the first recorded reason wins.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Signal cancellation with a reason. Idempotent; later reasons are
    /// ignored so the original cause stays visible.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut guard = self.inner.reason.lock().expect("reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The recorded reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock().expect("reason lock poisoned")
    }

    /// Completes when the token is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clean() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_records_first_reason_only() {
        let token = CancelToken::new();
        token.cancel(CancelReason::DeadlineExpired);
        token.cancel(CancelReason::UserRequested);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExpired));
    }

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel(CancelReason::WorkflowFailed);
        assert!(a.is_cancelled());
        assert_eq!(a.reason(), Some(CancelReason::WorkflowFailed));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_signal() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::task::yield_now().await;
        token.cancel(CancelReason::UserRequested);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Shutdown);
        // Must not hang.
        token.cancelled().await;
    }

    #[test]
    fn reasons_have_descriptions() {
        for reason in [
            CancelReason::UserRequested,
            CancelReason::DeadlineExpired,
            CancelReason::WorkflowFailed,
            CancelReason::Shutdown,
        ] {
            assert!(!reason.description().is_empty());
        }
    }
}
