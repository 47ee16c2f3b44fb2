//! Asynchronous flush session bookkeeping.
//!
//! At most one session is live at a time. The pending count doubles as the
//! session state: zero means idle, anything else is the number of owner
//! writes still outstanding.

use crate::error::{CoreError, CoreResult};
use crate::types::ContextOwner;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Result of a finished flush session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushOutcome {
    /// Owner images that reached storage.
    pub stored: u32,
    /// Owner images whose write failed or was never issued.
    pub failed: u32,
}

impl FlushOutcome {
    /// Returns true if every owner image was stored.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Called once when a flush session finishes.
pub type FlushCallback = Box<dyn FnOnce(FlushOutcome) + Send + 'static>;

/// Reported exactly once, by whichever completion ends the session.
pub struct SessionEnd {
    /// Final tally of the session.
    pub outcome: FlushOutcome,
    /// Callback registered when the session began, if it is still owed.
    pub callback: Option<FlushCallback>,
}

impl std::fmt::Debug for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEnd")
            .field("outcome", &self.outcome)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Default)]
struct SessionSlot {
    callback: Option<FlushCallback>,
    outcome: FlushOutcome,
}

/// The zero-or-one in-flight flush session.
#[derive(Default)]
pub struct FlushSession {
    pending: AtomicU32,
    slot: Mutex<SessionSlot>,
}

impl std::fmt::Debug for FlushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushSession")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl FlushSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session expecting `writes` completions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushInProgress`] if a session is already live.
    ///
    /// # Panics
    ///
    /// Panics if `writes` is zero.
    pub fn try_begin(&self, writes: u32, callback: Option<FlushCallback>) -> CoreResult<()> {
        assert!(writes > 0, "flush session needs at least one write");
        let mut slot = self.slot.lock();
        self.pending
            .compare_exchange(0, writes, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CoreError::FlushInProgress)?;
        *slot = SessionSlot {
            callback,
            outcome: FlushOutcome::default(),
        };
        Ok(())
    }

    /// Records the completion of one owner's write.
    ///
    /// Returns the session end if this was the last outstanding write.
    ///
    /// # Panics
    ///
    /// Panics if no session is live.
    pub fn complete(&self, owner: ContextOwner, stored: bool) -> Option<SessionEnd> {
        let mut slot = self.slot.lock();
        if stored {
            slot.outcome.stored += 1;
        } else {
            slot.outcome.failed += 1;
        }
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "{owner} completed outside a flush session");
        (prev == 1).then(|| Self::finish(&mut slot))
    }

    /// Accounts for `writes` owners that were never issued.
    ///
    /// The caller reports the failure synchronously, so the registered
    /// callback is discarded. Returns the session end if nothing else is
    /// outstanding.
    ///
    /// # Panics
    ///
    /// Panics if more writes are retired than are pending.
    pub fn retire(&self, writes: u32) -> Option<SessionEnd> {
        if writes == 0 {
            return None;
        }
        let mut slot = self.slot.lock();
        slot.callback = None;
        slot.outcome.failed += writes;
        let prev = self.pending.fetch_sub(writes, Ordering::SeqCst);
        assert!(prev >= writes, "retired {writes} writes but only {prev} pending");
        (prev == writes).then(|| Self::finish(&mut slot))
    }

    fn finish(slot: &mut SessionSlot) -> SessionEnd {
        let done = std::mem::take(slot);
        SessionEnd {
            outcome: done.outcome,
            callback: done.callback,
        }
    }

    /// Returns true while a session is live.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.pending() != 0
    }

    /// Outstanding writes of the live session.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn flag_callback(flag: &Arc<AtomicBool>) -> Option<FlushCallback> {
        let flag = Arc::clone(flag);
        Some(Box::new(move |_| flag.store(true, Ordering::SeqCst)))
    }

    #[test]
    fn second_session_is_rejected_until_first_ends() {
        let session = FlushSession::new();
        session.try_begin(2, None).unwrap();
        assert!(matches!(
            session.try_begin(2, None),
            Err(CoreError::FlushInProgress)
        ));

        assert!(session.complete(ContextOwner::AllocatorCtx, true).is_none());
        assert!(session.is_in_progress());
        let end = session.complete(ContextOwner::SegmentCtx, true).unwrap();
        assert_eq!(end.outcome, FlushOutcome { stored: 2, failed: 0 });
        assert!(!session.is_in_progress());

        session.try_begin(1, None).unwrap();
    }

    #[test]
    fn callback_is_handed_out_once() {
        let session = FlushSession::new();
        let fired = Arc::new(AtomicBool::new(false));
        session.try_begin(1, flag_callback(&fired)).unwrap();

        let end = session.complete(ContextOwner::SegmentCtx, false).unwrap();
        assert!(!end.outcome.is_success());
        (end.callback.unwrap())(end.outcome);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn retire_discards_callback() {
        let session = FlushSession::new();
        let fired = Arc::new(AtomicBool::new(false));
        session.try_begin(2, flag_callback(&fired)).unwrap();

        assert!(session.retire(1).is_none());
        let end = session.complete(ContextOwner::SegmentCtx, true).unwrap();
        assert!(end.callback.is_none());
        assert_eq!(end.outcome, FlushOutcome { stored: 1, failed: 1 });
        assert!(!session.is_in_progress());
    }

    #[test]
    fn retiring_everything_ends_session() {
        let session = FlushSession::new();
        session.try_begin(2, None).unwrap();
        let end = session.retire(2).unwrap();
        assert_eq!(end.outcome.failed, 2);
        assert_eq!(session.pending(), 0);
    }
}
