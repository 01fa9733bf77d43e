//! In-flight utterance tracking

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

/// Handle for one assistant utterance being synthesized and streamed.
///
/// Owned by the session that created it; at most one handle is active
/// per session. Cancellation is cooperative: the chunk pump checks the
/// flag before every chunk write, so a cancelled utterance stops within
/// one chunk's latency.
#[derive(Debug, Clone)]
pub struct UtteranceHandle {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl UtteranceHandle {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Mark the utterance cancelled. Returns true only for the call that
    /// flipped the flag, so repeated barge-in signals stay idempotent.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for UtteranceHandle {
    fn default() -> Self {
        Self::new()
    }
}
