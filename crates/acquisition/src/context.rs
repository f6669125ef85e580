//! State shared by the acquisition worker and the streaming task.
//!
//! One [`AcquisitionContext`] owns the sample pool, both queues, the
//! interrupt bridge, the runtime configuration and the pipeline counters.
//! Everything in it is usable through `&self`, so both tasks (and the
//! interrupt handlers, for the bridge) hold a shared reference.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::bridge::DeferralBridge;
use crate::config::RuntimeConfig;
use crate::pool::{SamplePool, SlotHandle};
use crate::queue::BoundedQueue;
use crate::sample::{DigitalSample, SampleBatch};

// ── Counters ────────────────────────────────────────────────────────────────

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Batches dropped because no pool slot was free.
    pub pool_exhausted: u32,
    /// Batches dropped because the analog queue was full.
    pub queue_full: u32,
    /// Digital samples dropped because the digital queue was full.
    pub digital_dropped: u32,
    /// Driver reads that failed after a completion.
    pub read_failures: u32,
    /// Failed `init_hardware` attempts.
    pub init_failures: u32,
    /// Packets handed to the transport.
    pub packets_sent: u32,
    /// Bytes handed to the transport.
    pub bytes_sent: u32,
    /// Records dropped because they could not fit an empty packet.
    pub oversize_dropped: u32,
}

/// Lock-free drop and throughput counters. All counters wrap.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pool_exhausted: AtomicU32,
    queue_full: AtomicU32,
    digital_dropped: AtomicU32,
    read_failures: AtomicU32,
    init_failures: AtomicU32,
    packets_sent: AtomicU32,
    bytes_sent: AtomicU32,
    oversize_dropped: AtomicU32,
}

fn bump(counter: &AtomicU32, by: u32) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    /// All counters at zero.
    pub const fn new() -> Self {
        Self {
            pool_exhausted: AtomicU32::new(0),
            queue_full: AtomicU32::new(0),
            digital_dropped: AtomicU32::new(0),
            read_failures: AtomicU32::new(0),
            init_failures: AtomicU32::new(0),
            packets_sent: AtomicU32::new(0),
            bytes_sent: AtomicU32::new(0),
            oversize_dropped: AtomicU32::new(0),
        }
    }

    pub(crate) fn pool_exhausted(&self) {
        bump(&self.pool_exhausted, 1);
    }

    pub(crate) fn queue_full(&self) {
        bump(&self.queue_full, 1);
    }

    pub(crate) fn digital_dropped(&self) {
        bump(&self.digital_dropped, 1);
    }

    pub(crate) fn read_failure(&self) {
        bump(&self.read_failures, 1);
    }

    pub(crate) fn init_failure(&self) {
        bump(&self.init_failures, 1);
    }

    pub(crate) fn oversize_dropped(&self) {
        bump(&self.oversize_dropped, 1);
    }

    #[allow(clippy::cast_possible_truncation)] // Safety: packets are far below 4 GiB
    pub(crate) fn packet_sent(&self, bytes: usize) {
        bump(&self.packets_sent, 1);
        bump(&self.bytes_sent, bytes as u32);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            digital_dropped: self.digital_dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            init_failures: self.init_failures.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            oversize_dropped: self.oversize_dropped.load(Ordering::Relaxed),
        }
    }
}

// ── Shared context ──────────────────────────────────────────────────────────

/// Why [`AcquisitionContext::publish`] dropped a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// No free pool slot.
    PoolExhausted,
    /// Analog queue full; the slot went straight back to the pool.
    QueueFull,
}

impl PublishError {
    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoolExhausted => "pool exhausted",
            Self::QueueFull => "queue full",
        }
    }
}

/// Pipeline state shared between tasks.
///
/// `N` pool slots, `Q` analog queue entries, `D` digital queue entries.
/// `Q` should not exceed `N`: every queued handle owns a slot.
pub struct AcquisitionContext<M: RawMutex, const N: usize, const Q: usize, const D: usize> {
    /// Batch storage.
    pub pool: SamplePool<M, N>,
    /// Filled batches, oldest first.
    pub analog: BoundedQueue<M, SlotHandle, Q>,
    /// Digital port samples, oldest first.
    pub digital: BoundedQueue<M, DigitalSample, D>,
    /// Completion signalling from interrupt handlers.
    pub bridge: DeferralBridge,
    /// Drop and throughput counters.
    pub stats: PipelineStats,
    runtime: Mutex<M, RefCell<RuntimeConfig>>,
    revision: AtomicU32,
}

impl<M: RawMutex, const N: usize, const Q: usize, const D: usize> AcquisitionContext<M, N, Q, D> {
    /// Empty pipeline running `runtime`.
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            pool: SamplePool::new(),
            analog: BoundedQueue::new(),
            digital: BoundedQueue::new(),
            bridge: DeferralBridge::new(),
            stats: PipelineStats::new(),
            runtime: Mutex::new(RefCell::new(runtime)),
            revision: AtomicU32::new(0),
        }
    }

    /// Copy of the current runtime configuration.
    pub fn runtime(&self) -> RuntimeConfig {
        self.runtime.lock(|runtime| runtime.borrow().clone())
    }

    /// Modify the runtime configuration in place.
    pub fn update_runtime<R>(&self, f: impl FnOnce(&mut RuntimeConfig) -> R) -> R {
        self.runtime.lock(|runtime| {
            let result = f(&mut runtime.borrow_mut());
            self.revision.fetch_add(1, Ordering::Release);
            result
        })
    }

    /// Bring a task's private copy of the runtime configuration up to date.
    ///
    /// `seen` is the revision `copy` was taken at (`None` for never). The
    /// copy is only refreshed after an [`update_runtime`](Self::update_runtime),
    /// so a pass works on a stable copy and the lock is never held across
    /// driver I/O. Returns whether `copy` changed.
    pub fn sync_runtime(&self, copy: &mut RuntimeConfig, seen: &mut Option<u32>) -> bool {
        let current = self.revision.load(Ordering::Acquire);
        if *seen == Some(current) {
            return false;
        }
        self.runtime.lock(|runtime| copy.clone_from(&runtime.borrow()));
        *seen = Some(current);
        true
    }

    /// Whether a streaming session is active.
    pub fn is_streaming(&self) -> bool {
        self.runtime.lock(|runtime| runtime.borrow().streaming)
    }

    /// Hand a filled batch to the streaming side.
    ///
    /// Copies `batch` into a fresh pool slot and queues it. On any failure
    /// the batch is dropped, the matching counter is bumped and no slot is
    /// leaked.
    pub fn publish(&self, batch: &SampleBatch) -> Result<(), PublishError> {
        let Some(handle) = self.pool.allocate() else {
            self.stats.pool_exhausted();
            return Err(PublishError::PoolExhausted);
        };
        self.pool
            .with_batch_mut(&handle, |slot| slot.clone_from(batch));
        if let Err(handle) = self.analog.push(handle) {
            self.pool.free(handle);
            self.stats.queue_full();
            return Err(PublishError::QueueFull);
        }
        Ok(())
    }

    /// Queue a digital sample, dropping it if the queue is full.
    pub fn publish_digital(&self, sample: DigitalSample) -> bool {
        if self.digital.push(sample).is_err() {
            self.stats.digital_dropped();
            return false;
        }
        true
    }

    /// Release every queued batch and digital sample.
    pub fn drain(&self) {
        while let Some(handle) = self.analog.try_pop() {
            self.pool.free(handle);
        }
        while self.digital.try_pop().is_some() {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::BoardConfig;
    use crate::sample::Sample;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    type Ctx = AcquisitionContext<NoopRawMutex, 4, 2, 2>;

    fn ctx() -> Ctx {
        let board = BoardConfig::nq3().unwrap();
        Ctx::new(RuntimeConfig::nq3(&board))
    }

    fn batch(timestamp: u32) -> SampleBatch {
        let mut batch = SampleBatch::new();
        batch
            .push(Sample {
                timestamp,
                channel: 1,
                raw: 7,
            })
            .unwrap();
        batch
    }

    #[test]
    fn publish_copies_into_pool_and_queues() {
        let ctx = ctx();
        ctx.publish(&batch(10)).unwrap();
        assert_eq!(ctx.pool.in_use(), 1);
        let handle = ctx.analog.try_pop().unwrap();
        let ts = ctx.pool.with_batch(&handle, SampleBatch::timestamp).unwrap();
        assert_eq!(ts, Some(10));
        assert!(ctx.pool.free(handle));
    }

    #[test]
    fn full_queue_returns_slot_to_pool() {
        let ctx = ctx();
        ctx.publish(&batch(1)).unwrap();
        ctx.publish(&batch(2)).unwrap();
        assert_eq!(ctx.publish(&batch(3)), Err(PublishError::QueueFull));
        assert_eq!(ctx.pool.in_use(), 2, "rejected batch does not leak");
        assert_eq!(ctx.stats.snapshot().queue_full, 1);
    }

    #[test]
    fn exhausted_pool_is_counted() {
        // Queue larger than pool so the pool runs out first.
        let board = BoardConfig::nq3().unwrap();
        let ctx: AcquisitionContext<NoopRawMutex, 1, 4, 1> =
            AcquisitionContext::new(RuntimeConfig::nq3(&board));
        ctx.publish(&batch(1)).unwrap();
        assert_eq!(ctx.publish(&batch(2)), Err(PublishError::PoolExhausted));
        assert_eq!(ctx.stats.snapshot().pool_exhausted, 1);
    }

    #[test]
    fn drain_releases_everything() {
        let ctx = ctx();
        ctx.publish(&batch(1)).unwrap();
        ctx.publish_digital(DigitalSample {
            timestamp: 0,
            mask: 1,
            values: 1,
        });
        ctx.drain();
        assert_eq!(ctx.pool.in_use(), 0);
        assert!(ctx.analog.is_empty());
        assert!(ctx.digital.is_empty());
    }

    #[test]
    fn runtime_updates_are_visible_to_the_next_snapshot() {
        let ctx = ctx();
        let before = ctx.runtime();
        ctx.update_runtime(|runtime| runtime.streaming = true);
        assert!(!before.streaming);
        assert!(ctx.is_streaming());
    }

    #[test]
    fn private_copy_refreshes_only_after_an_update() {
        let ctx = ctx();
        let board = BoardConfig::nq3().unwrap();
        let mut copy = RuntimeConfig::defaults_for(&board);
        let mut seen = None;

        assert!(ctx.sync_runtime(&mut copy, &mut seen));
        assert_eq!(copy, ctx.runtime());
        assert!(!ctx.sync_runtime(&mut copy, &mut seen));

        ctx.update_runtime(|runtime| runtime.dio.input_mask = 0x0F);
        assert!(ctx.sync_runtime(&mut copy, &mut seen));
        assert_eq!(copy.dio.input_mask, 0x0F);
        assert!(!ctx.sync_runtime(&mut copy, &mut seen));
    }
}
