//! Interrupt-to-worker deferral.
//!
//! A conversion-complete interrupt acknowledges its source, bumps a per-module
//! counter and wakes the acquisition worker. Nothing else happens in ISR
//! context: no bus traffic, no floating point, no queue operations.
//!
//! Counters saturate rather than collapse to a flag, so a second completion
//! that lands while the worker is still draining the first is never lost.
//! The worker does not rely on the exact count: it re-checks every enabled
//! channel, which is safe because result reads are keyed on per-channel
//! ready flags.

use core::future::poll_fn;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;
use platform::InterruptLine;

use crate::config::MAX_MODULES;

/// Per-module bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeState {
    /// Waiting for the hardware.
    Armed,
    /// Completion signalled; worker has not drained it yet.
    DeferredPending,
}

/// Completions collected by one worker wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingSet {
    counts: [u32; MAX_MODULES],
}

impl PendingSet {
    /// Completions recorded for `module` (0 if none).
    pub fn count(&self, module: u8) -> u32 {
        self.counts.get(usize::from(module)).copied().unwrap_or(0)
    }

    /// Modules with at least one completion, in module order.
    #[allow(clippy::cast_possible_truncation)] // Safety: index < MAX_MODULES <= u8::MAX
    pub fn modules(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(index, count)| (index as u8, *count))
    }

    /// Whether no completion is recorded.
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|count| *count == 0)
    }
}

#[allow(clippy::declare_interior_mutable_const)] // array initialiser only
const ARMED: AtomicU32 = AtomicU32::new(0);

/// Coalescing completion counters shared between ISRs and the worker.
pub struct DeferralBridge {
    pending: [AtomicU32; MAX_MODULES],
    waker: AtomicWaker,
}

impl Default for DeferralBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferralBridge {
    /// All modules armed, no waiter.
    pub const fn new() -> Self {
        Self {
            pending: [ARMED; MAX_MODULES],
            waker: AtomicWaker::new(),
        }
    }

    /// ISR entry point: acknowledge `line`, then record a completion.
    pub fn on_completion<L: InterruptLine + ?Sized>(&self, module: u8, line: &mut L) {
        line.clear_interrupt();
        self.notify(module);
    }

    /// Record a completion for `module` and wake the worker.
    ///
    /// Unknown module indices are ignored.
    pub fn notify(&self, module: u8) {
        let Some(counter) = self.pending.get(usize::from(module)) else {
            return;
        };
        // fetch_update never fails here: the closure always returns Some.
        let _ = counter.fetch_update(Ordering::Release, Ordering::Relaxed, |n| {
            Some(n.saturating_add(1))
        });
        self.waker.wake();
    }

    /// Current state of `module`.
    pub fn state(&self, module: u8) -> BridgeState {
        match self.pending.get(usize::from(module)) {
            Some(counter) if counter.load(Ordering::Acquire) > 0 => BridgeState::DeferredPending,
            _ => BridgeState::Armed,
        }
    }

    /// Collect and re-arm every pending module without waiting.
    pub fn take(&self) -> Option<PendingSet> {
        let mut set = PendingSet::default();
        for (slot, counter) in set.counts.iter_mut().zip(self.pending.iter()) {
            *slot = counter.swap(0, Ordering::AcqRel);
        }
        (!set.is_empty()).then_some(set)
    }

    /// Wait until at least one module has completed.
    ///
    /// Cancellation safe: counters live in the bridge, so dropping this
    /// future loses nothing.
    pub async fn wait(&self) -> PendingSet {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.take() {
                Some(set) => Poll::Ready(set),
                None => Poll::Pending,
            }
        })
        .await
    }
}
