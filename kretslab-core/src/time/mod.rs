//! ## kretslab-core::time
//! **Virtual simulation clock**
//!
//! Scripts observe time only through this clock: `delay(ms)` advances it and
//! `millis()` reads it. Wall-clock time never leaks into a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Millisecond counter shared between the session and its hardware bus.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    offset: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Saturates instead of wrapping.
    #[inline]
    pub fn advance(&self, ms: u64) {
        let _ = self
            .offset
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(ms))
            });
    }

    pub fn reset(&self) {
        self.offset.store(0, Ordering::Release);
    }
}
