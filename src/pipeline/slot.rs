use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ack::AckSender;

/// System-wide "trade in flight" flag
#[derive(Clone, Default)]
pub struct TradeSlot {
    busy: Arc<AtomicBool>,
}

impl TradeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot if free. The guard acknowledges the tick it was taken
    /// for when dropped.
    pub fn try_acquire(&self, acks: AckSender) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                busy: self.busy.clone(),
                acks,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one trade attempt.
///
/// Dropping it acknowledges one tick and frees the slot, except while
/// unwinding from a panic: the slot then stays taken and no further trade
/// is ever attempted.
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
    acks: AckSender,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.acks.ack(1);

        if std::thread::panicking() {
            tracing::error!("Trade task panicked, trading halted until restart");
            return;
        }
        self.busy.store(false, Ordering::Release);
    }
}
