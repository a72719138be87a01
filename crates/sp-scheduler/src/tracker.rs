// SPDX-License-Identifier: MIT OR Apache-2.0
//! The execution-records table.
//!
//! One shared mutable structure, one owner. The scheduler creates records,
//! the owning worker advances them, and everyone else reads snapshots.
//! Writers go through [`ExecutionTracker::update`], which funnels every
//! mutation through the record's own state machine, so an illegal
//! transition can be attempted but never observed.

use crate::cancel::CancelToken;
use chrono::{DateTime, Utc};
use sp_core::{ExecutionId, ExecutionRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

struct Tracked {
    record: ExecutionRecord,
    token: CancelToken,
    terminal: Arc<Notify>,
}

/// In-process table of execution records with terminal-state notification.
#[derive(Default)]
pub struct ExecutionTracker {
    entries: RwLock<HashMap<ExecutionId, Tracked>>,
}

impl ExecutionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record, returning its cancel token.
    pub async fn insert(&self, record: ExecutionRecord) -> CancelToken {
        let token = CancelToken::new();
        let id = record.execution_id.clone();
        let tracked = Tracked {
            record,
            token: token.clone(),
            terminal: Arc::new(Notify::new()),
        };
        self.entries.write().await.insert(id, tracked);
        token
    }

    /// Snapshot a record by id.
    pub async fn get(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        self.entries.read().await.get(id).map(|t| t.record.clone())
    }

    /// The cancel token for a record, if it exists.
    pub async fn token(&self, id: &ExecutionId) -> Option<CancelToken> {
        self.entries.read().await.get(id).map(|t| t.token.clone())
    }

    /// Mutate a record under the table lock. Returns the closure result, or
    /// `None` when the record does not exist. Waiters on
    /// [`wait_terminal`](Self::wait_terminal) are woken when the closure
    /// leaves the record terminal.
    pub async fn update<R>(
        &self,
        id: &ExecutionId,
        mutate: impl FnOnce(&mut ExecutionRecord) -> R,
    ) -> Option<R> {
        let mut guard = self.entries.write().await;
        let tracked = guard.get_mut(id)?;
        let result = mutate(&mut tracked.record);
        if tracked.record.is_terminal() {
            tracked.terminal.notify_waiters();
        }
        Some(result)
    }

    /// Wait until the record reaches a terminal state, returning the final
    /// snapshot. Returns `None` for unknown ids.
    pub async fn wait_terminal(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        loop {
            let terminal = {
                let guard = self.entries.read().await;
                let tracked = guard.get(id)?;
                if tracked.record.is_terminal() {
                    return Some(tracked.record.clone());
                }
                Arc::clone(&tracked.terminal)
            };

            let notified = terminal.notified();
            tokio::pin!(notified);
            // Register interest, then re-check: a transition may have landed
            // between dropping the lock and enabling the waiter.
            notified.as_mut().enable();
            {
                let guard = self.entries.read().await;
                let tracked = guard.get(id)?;
                if tracked.record.is_terminal() {
                    return Some(tracked.record.clone());
                }
            }
            notified.await;
        }
    }

    /// Number of records currently tracked.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` when no records are tracked.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop terminal records older than `cutoff` (by completion time).
    /// Non-terminal records are never pruned. Returns how many were removed.
    pub async fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, t| {
            !(t.record.is_terminal()
                && t.record.completed_at.is_some_and(|done| done < cutoff))
        });
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use serde_json::json;
    use sp_core::ExecutionState;
    use sp_error::{ErrorCode, SkillError};

    fn record() -> ExecutionRecord {
        ExecutionRecord::new("s", Version::new(1, 0, 0), json!({}))
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let tracker = ExecutionTracker::new();
        let rec = record();
        let id = rec.execution_id.clone();
        tracker.insert(rec).await;
        let got = tracker.get(&id).await.unwrap();
        assert_eq!(got.state, ExecutionState::Pending);
        assert!(tracker.token(&id).await.is_some());
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let tracker = ExecutionTracker::new();
        assert!(tracker.get(&ExecutionId::new()).await.is_none());
        assert!(tracker.wait_terminal(&ExecutionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn update_goes_through_the_state_machine() {
        let tracker = ExecutionTracker::new();
        let rec = record();
        let id = rec.execution_id.clone();
        tracker.insert(rec).await;

        let accepted = tracker
            .update(&id, |r| r.transition(ExecutionState::Running))
            .await
            .unwrap();
        assert!(accepted);

        // Illegal transition is refused, record untouched.
        let accepted = tracker
            .update(&id, |r| r.transition(ExecutionState::Pending))
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(tracker.get(&id).await.unwrap().state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn wait_terminal_wakes_on_completion() {
        let tracker = Arc::new(ExecutionTracker::new());
        let rec = record();
        let id = rec.execution_id.clone();
        tracker.insert(rec).await;

        let waiter = {
            let tracker = Arc::clone(&tracker);
            let id = id.clone();
            tokio::spawn(async move { tracker.wait_terminal(&id).await })
        };

        tracker
            .update(&id, |r| {
                r.transition(ExecutionState::Running);
                r.complete(json!({"done": true}))
            })
            .await;

        let rec = waiter.await.unwrap().unwrap();
        assert_eq!(rec.state, ExecutionState::Completed);
        assert_eq!(rec.result.unwrap(), json!({"done": true}));
    }

    #[tokio::test]
    async fn wait_terminal_returns_immediately_for_terminal_records() {
        let tracker = ExecutionTracker::new();
        let rec = record();
        let id = rec.execution_id.clone();
        tracker.insert(rec).await;
        tracker
            .update(&id, |r| {
                r.fail(
                    ExecutionState::Cancelled,
                    SkillError::new(ErrorCode::ExecutionFailed, "cancelled"),
                )
            })
            .await;
        let rec = tracker.wait_terminal(&id).await.unwrap();
        assert_eq!(rec.state, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn prune_drops_only_old_terminal_records() {
        let tracker = ExecutionTracker::new();

        let done = record();
        let done_id = done.execution_id.clone();
        tracker.insert(done).await;
        tracker
            .update(&done_id, |r| {
                r.transition(ExecutionState::Running);
                r.complete(json!(1))
            })
            .await;

        let live = record();
        let live_id = live.execution_id.clone();
        tracker.insert(live).await;

        // Cutoff in the future: every terminal record is older than it.
        let removed = tracker
            .prune_terminal_before(Utc::now() + chrono::Duration::seconds(5))
            .await;
        assert_eq!(removed, 1);
        assert!(tracker.get(&done_id).await.is_none());
        assert!(tracker.get(&live_id).await.is_some());
    }
}
