//! Observable session state
//!
//! The live session is published on a `watch` channel so observers always see
//! the latest snapshot, and transient notices go out on a `broadcast` channel.

use crate::delivery::DeliveryPath;
use crate::error::truncate_for_notice;
use crate::quote::QuoteSnapshot;
use solana_sdk::signature::Signature;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};

/// Longest error text carried by a transient notice
pub const NOTICE_MAX_CHARS: usize = 100;

const NOTIFICATION_CAPACITY: usize = 64;

/// Phase of the live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SwapPhase {
    #[default]
    Idle,
    FetchingQuote,
    BuildingTransaction,
    Signing,
    Submitting,
    Confirming,
    Success,
    Error,
}

impl SwapPhase {
    /// Between the start of a build and a verdict
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            SwapPhase::BuildingTransaction
                | SwapPhase::Signing
                | SwapPhase::Submitting
                | SwapPhase::Confirming
        )
    }
}

/// Snapshot of the live session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapSnapshot {
    pub phase: SwapPhase,
    pub quote: Option<QuoteSnapshot>,
    /// Expected output in display units
    pub output_estimate: Option<f64>,
    /// Full error message, kept until the next attempt or reset
    pub error: Option<String>,
    pub signature: Option<String>,
    /// Path that carried the transaction, once submitted
    pub delivery_path: Option<DeliveryPath>,
}

/// Transient user-facing notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Loading(String),
    Success(String),
    Error(String),
    Info(String),
}

/// Where the delivery engine reports progress
pub trait ProgressSink: Send + Sync {
    fn phase(&self, phase: SwapPhase);

    /// The transaction identifier is known and its carrier chosen
    fn signature(&self, signature: &Signature, path: DeliveryPath);

    fn notify(&self, notification: Notification);
}

/// Admits one execution at a time
#[derive(Debug, Default)]
pub struct ExecutionSlot(AtomicBool);

/// Held for the duration of an execution; dropping it frees the slot
pub struct ExecutionPermit<'a>(&'a AtomicBool);

impl ExecutionSlot {
    pub fn try_acquire(&self) -> Option<ExecutionPermit<'_>> {
        if self.0.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(ExecutionPermit(&self.0))
        }
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for ExecutionPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of one session's snapshot and notice channels
pub struct SessionStore {
    state: watch::Sender<SwapSnapshot>,
    notices: broadcast::Sender<Notification>,
    /// Bumped on every attempt and reset; delayed resets check it first
    generation: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SwapSnapshot::default());
        let (notices, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state,
            notices,
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SwapSnapshot> {
        self.state.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notices.subscribe()
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SwapPhase {
        self.state.borrow().phase
    }

    pub fn update(&self, modify: impl FnOnce(&mut SwapSnapshot)) {
        self.state.send_modify(modify);
    }

    pub fn set_phase(&self, phase: SwapPhase) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.phase == phase {
                return false;
            }
            tracing::debug!(from = ?snapshot.phase, to = ?phase, "Session phase");
            snapshot.phase = phase;
            true
        });
    }

    /// Send a notice; nobody listening is fine
    pub fn notify(&self, notification: Notification) {
        let _ = self.notices.send(notification);
    }

    /// Enter `error` with the full message and send a shortened notice
    pub fn fail(&self, message: &str) {
        tracing::error!(error = %message, "Session failed");
        self.update(|snapshot| {
            snapshot.phase = SwapPhase::Error;
            snapshot.error = Some(message.to_string());
        });
        self.notify(Notification::Error(truncate_for_notice(
            message,
            NOTICE_MAX_CHARS,
        )));
    }

    /// Start a new attempt: clears the previous verdict and returns its generation
    pub fn begin_attempt(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|snapshot| {
            snapshot.error = None;
            snapshot.signature = None;
            snapshot.delivery_path = None;
        });
        generation
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Back to a blank idle session
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(SwapSnapshot::default());
    }

    /// Reset only if nothing started since `generation` was issued
    pub fn reset_if_current(&self, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.reset();
        true
    }
}

impl ProgressSink for SessionStore {
    fn phase(&self, phase: SwapPhase) {
        self.set_phase(phase);
    }

    fn signature(&self, signature: &Signature, path: DeliveryPath) {
        let signature = signature.to_string();
        self.update(|snapshot| {
            snapshot.signature = Some(signature);
            snapshot.delivery_path = Some(path);
        });
    }

    fn notify(&self, notification: Notification) {
        SessionStore::notify(self, notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_keeps_full_message_and_truncates_notice() {
        let session = SessionStore::new();
        let mut notices = session.notifications();
        let message = "x".repeat(150);

        session.fail(&message);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SwapPhase::Error);
        assert_eq!(snapshot.error.as_deref(), Some(message.as_str()));
        match notices.try_recv().unwrap() {
            Notification::Error(notice) => {
                assert_eq!(notice.chars().count(), NOTICE_MAX_CHARS + 3);
                assert!(notice.ends_with("..."));
            }
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[test]
    fn test_stale_reset_is_ignored() {
        let session = SessionStore::new();
        let first = session.begin_attempt();
        session.set_phase(SwapPhase::Success);

        let second = session.begin_attempt();
        session.set_phase(SwapPhase::BuildingTransaction);

        assert!(!session.reset_if_current(first));
        assert_eq!(session.phase(), SwapPhase::BuildingTransaction);
        assert!(session.reset_if_current(second));
        assert_eq!(session.snapshot(), SwapSnapshot::default());
    }

    #[test]
    fn test_watchers_see_phase_changes() {
        let session = SessionStore::new();
        let mut rx = session.subscribe();

        session.set_phase(SwapPhase::Signing);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().phase, SwapPhase::Signing);

        // same phase again is not a change
        session.set_phase(SwapPhase::Signing);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_signature_records_path() {
        let session = SessionStore::new();
        let signature = Signature::from([7u8; 64]);
        ProgressSink::signature(&session, &signature, DeliveryPath::FastPath);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.signature, Some(signature.to_string()));
        assert_eq!(snapshot.delivery_path, Some(DeliveryPath::FastPath));
    }

    #[test]
    fn test_execution_slot_admits_one() {
        let slot = ExecutionSlot::default();
        let permit = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(permit);
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn test_executing_phases() {
        assert!(SwapPhase::Signing.is_executing());
        assert!(!SwapPhase::FetchingQuote.is_executing());
        assert!(!SwapPhase::Error.is_executing());
    }
}
