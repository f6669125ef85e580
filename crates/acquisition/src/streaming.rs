//! Streaming multiplexer: queued samples to transport sinks.
//!
//! Runs on its own periodic tick, independent of the sampling rate. Each
//! tick:
//!
//! 1. returns at once if nothing is queued;
//! 2. selects the sinks reporting at least [`MIN_PACKET_BYTES`] free and
//!    skips the tick (queues untouched) if there are none;
//! 3. takes the smallest free space among them as the tick budget, then
//!    builds packets (digital records first, then analog) and appends each
//!    one to every selected sink until the budget or the queues run out.
//!
//! A batch is copied out of the pool and its slot freed as soon as it is
//! taken. Records that do not fit the current packet are carried over to
//! the next one, so nothing taken from a queue is lost to packet
//! boundaries.
//!
//! All floating point (voltage conversion) happens here.

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;
use platform::TransportSink;

use crate::config::{BoardConfig, RuntimeConfig};
use crate::context::{AcquisitionContext, PipelineStats};
use crate::encode::{
    AnalogRecord, DigitalRecord, Encoding, Field, FieldSet, PacketHeader, PacketWriter,
    SessionMeta,
};
use crate::sample::{DigitalSample, Sample, SampleBatch};
use crate::voltage::convert_to_voltage;

/// Smallest free space for a sink to take part in a tick.
pub const MIN_PACKET_BYTES: usize = 128;

/// Largest packet built in one go.
pub const PACKET_BUFFER_BYTES: usize = 2048;

/// Sinks considered per tick; further sinks are ignored.
pub const MAX_SINKS: usize = 4;

/// Session output settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSettings {
    /// Wire format.
    pub encoding: Encoding,
    /// Fields the client asked for.
    pub fields: FieldSet,
    /// Device metadata sent at the start of each session.
    pub meta: Option<SessionMeta>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued.
    Idle,
    /// Data is queued but no sink had room for it.
    Deferred,
    /// Packets were delivered.
    Sent {
        /// Packets built this tick.
        packets: u32,
        /// Bytes appended to each sink.
        bytes: usize,
    },
}

/// Records taken from the queues but not yet written.
#[derive(Default)]
struct Carry {
    digital: Option<DigitalSample>,
    analog: Option<(SampleBatch, usize)>,
}

/// Builds packets from the sample queues and hands them to the sinks.
pub struct StreamingMultiplexer<'b> {
    board: &'b BoardConfig,
    settings: StreamSettings,
    epoch: u32,
    header_pending: bool,
    carry: Carry,
    runtime: RuntimeConfig,
    runtime_seen: Option<u32>,
    buffer: [u8; PACKET_BUFFER_BYTES],
}

impl<'b> StreamingMultiplexer<'b> {
    /// Multiplexer for `board`'s channels. No session is active.
    #[allow(clippy::large_stack_arrays)] // packet buffer lives with the task
    pub fn new(board: &'b BoardConfig, settings: StreamSettings) -> Self {
        Self {
            board,
            settings,
            epoch: 0,
            header_pending: false,
            carry: Carry::default(),
            runtime: RuntimeConfig::defaults_for(board),
            runtime_seen: None,
            buffer: [0; PACKET_BUFFER_BYTES],
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Change settings; takes effect at the next packet.
    pub fn set_settings(&mut self, settings: StreamSettings) {
        self.settings = settings;
    }

    /// Trigger epoch of the current session.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Begin a session. Record times are reported relative to `epoch`.
    ///
    /// Anything still queued from an earlier session is discarded.
    pub fn start_session<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        epoch: u32,
    ) {
        ctx.drain();
        self.carry = Carry::default();
        self.epoch = epoch;
        self.header_pending = self.settings.meta.is_some();
        ctx.update_runtime(|runtime| runtime.streaming = true);
        info!("session started ({}), epoch {}", self.settings.encoding.as_str(), epoch);
    }

    /// End the session: stop triggering, drop everything queued and return
    /// every slot to the pool.
    pub fn stop_session<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) {
        ctx.update_runtime(|runtime| runtime.streaming = false);
        ctx.drain();
        self.carry = Carry::default();
        self.header_pending = false;
        info!("session stopped");
    }

    /// One streaming pass. See the module documentation.
    pub fn tick<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        sinks: &[&dyn TransportSink],
    ) -> TickOutcome {
        self.discard_unrequested(ctx);
        if !self.has_pending(ctx) {
            return TickOutcome::Idle;
        }

        let mut ready: Vec<&dyn TransportSink, MAX_SINKS> = Vec::new();
        let mut budget = usize::MAX;
        for sink in sinks {
            let free = sink.free_space();
            if free < MIN_PACKET_BYTES {
                continue;
            }
            if ready.push(*sink).is_err() {
                break;
            }
            budget = budget.min(free);
        }
        if ready.is_empty() {
            trace!("no sink ready, tick deferred");
            return TickOutcome::Deferred;
        }

        ctx.sync_runtime(&mut self.runtime, &mut self.runtime_seen);
        let mut packets = 0u32;
        let mut bytes = 0usize;
        while budget >= MIN_PACKET_BYTES && self.has_pending(ctx) {
            let len = self.build_packet(ctx, budget.min(PACKET_BUFFER_BYTES));
            if len == 0 {
                break;
            }
            let packet = self.buffer.get(..len).unwrap_or_default();
            for sink in &ready {
                let accepted = sink.try_append(packet);
                if accepted != len {
                    warn!("sink accepted {} of {} bytes", accepted, len);
                }
            }
            budget = budget.saturating_sub(len);
            packets = packets.saturating_add(1);
            bytes = bytes.saturating_add(len);
            ctx.stats.packet_sent(len);
        }

        if packets == 0 {
            TickOutcome::Deferred
        } else {
            TickOutcome::Sent { packets, bytes }
        }
    }

    fn has_pending<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &self,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) -> bool {
        self.carry.digital.is_some()
            || self.carry.analog.is_some()
            || !ctx.digital.is_empty()
            || !ctx.analog.is_empty()
    }

    /// Release queued data of categories the client did not ask for.
    fn discard_unrequested<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) {
        if !self.settings.fields.contains(Field::DigitalIn) {
            self.carry.digital = None;
            while ctx.digital.try_pop().is_some() {}
        }
        if !self.settings.fields.contains(Field::AnalogIn) {
            self.carry.analog = None;
            while let Some(handle) = ctx.analog.try_pop() {
                ctx.pool.free(handle);
            }
        }
    }

    /// Build one packet of at most `limit` bytes into the buffer.
    ///
    /// Returns its length, or 0 if no record could be written.
    fn build_packet<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        limit: usize,
    ) -> usize {
        let runtime = &self.runtime;
        let digital_waiting = self.carry.digital.is_some() || !ctx.digital.is_empty();
        let header = PacketHeader {
            epoch: self.epoch,
            port_direction: digital_waiting.then_some(runtime.dio.direction_mask),
            fields: self.settings.fields,
            meta: if self.header_pending {
                self.settings.meta.as_ref()
            } else {
                None
            },
        };
        let Ok(mut writer) =
            PacketWriter::begin(&mut self.buffer, limit, self.settings.encoding, &header)
        else {
            return 0;
        };

        let mut fill = Fill {
            board: self.board,
            runtime,
            stats: &ctx.stats,
            epoch: self.epoch,
            full_size: limit >= PACKET_BUFFER_BYTES,
        };
        if fill.digital(&mut writer, &mut self.carry, ctx) {
            fill.analog(&mut writer, &mut self.carry, ctx);
        }

        if writer.is_empty() {
            return 0;
        }
        self.header_pending = false;
        writer.finish().len()
    }
}

/// Per-packet record source.
struct Fill<'a> {
    board: &'a BoardConfig,
    runtime: &'a RuntimeConfig,
    stats: &'a PipelineStats,
    epoch: u32,
    full_size: bool,
}

impl Fill<'_> {
    /// Write digital records until the queue is empty (`true`) or the
    /// packet is full (`false`).
    fn digital<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        writer: &mut PacketWriter<'_>,
        carry: &mut Carry,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) -> bool {
        loop {
            let Some(sample) = carry.digital.take().or_else(|| ctx.digital.try_pop()) else {
                return true;
            };
            let record = DigitalRecord {
                time: sample.timestamp.wrapping_sub(self.epoch),
                mask: sample.mask,
                data: sample.values,
            };
            if writer.digital(&record).is_err() {
                if writer.is_empty() && self.full_size {
                    self.stats.oversize_dropped();
                    continue;
                }
                carry.digital = Some(sample);
                return false;
            }
        }
    }

    /// Write analog records until the queue is empty or the packet is full.
    fn analog<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        writer: &mut PacketWriter<'_>,
        carry: &mut Carry,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) {
        loop {
            let (batch, mut next) = match carry.analog.take() {
                Some(partial) => partial,
                None => {
                    let Some(handle) = ctx.analog.try_pop() else {
                        return;
                    };
                    let batch = ctx.pool.with_batch(&handle, SampleBatch::clone);
                    ctx.pool.free(handle);
                    (batch.unwrap_or_default(), 0)
                }
            };

            while let Some(sample) = batch.as_slice().get(next) {
                let Some(record) = self.record(sample) else {
                    next = next.saturating_add(1);
                    continue;
                };
                if writer.analog(&record).is_err() {
                    if writer.is_empty() && self.full_size {
                        self.stats.oversize_dropped();
                        next = next.saturating_add(1);
                        continue;
                    }
                    carry.analog = Some((batch, next));
                    return;
                }
                next = next.saturating_add(1);
            }
        }
    }

    fn record(&self, sample: &Sample) -> Option<AnalogRecord> {
        let (position, channel) = self.board.channel(sample.channel)?;
        let state = self.runtime.channels.get(position)?;
        Some(AnalogRecord {
            time: sample.timestamp.wrapping_sub(self.epoch),
            channel: sample.channel,
            raw: sample.raw,
            volts: convert_to_voltage(channel, state, sample),
        })
    }
}
