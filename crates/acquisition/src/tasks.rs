//! Async task loops.
//!
//! The firmware binary spawns one task per loop and hands each a shared
//! reference to the [`AcquisitionContext`]. Both loops are generic, so the
//! binary wraps them in its own `#[embassy_executor::task]` functions with
//! concrete types.
//!
//! ```text
//!  timer ISR ──► Ticker ─┐
//!                        ├─► acquisition_task ──► pool/queues ──► streaming_task ──► sinks
//!  ADC ISR ──► bridge ───┘                                          ▲
//!                                                SessionCommand ────┘
//! ```

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Ticker};
use heapless::Vec;
use platform::{PinGroup, PowerMonitor, TimestampCounter, TransportSink};

use crate::bridge::PendingSet;
use crate::config::{ChannelRuntime, RuntimeConfig, MAX_CHANNELS};
use crate::context::AcquisitionContext;
use crate::dio::DioScanner;
use crate::driver::Converter;
use crate::engine::AcquisitionEngine;
use crate::streaming::{StreamSettings, StreamingMultiplexer, TickOutcome};

// ── Acquisition worker ──────────────────────────────────────────────────────

/// Everything the acquisition task owns.
pub struct AcquisitionWorker<'b, M, S, G, P, T> {
    engine: AcquisitionEngine<'b, M, S>,
    dio: DioScanner<G>,
    power: P,
    clock: T,
    runtime: RuntimeConfig,
    runtime_seen: Option<u32>,
    applied: Vec<ChannelRuntime, MAX_CHANNELS>,
}

impl<'b, M, S, G, P, T> AcquisitionWorker<'b, M, S, G, P, T>
where
    M: Converter,
    S: Converter,
    G: PinGroup,
    P: PowerMonitor,
    T: TimestampCounter,
{
    /// Bundle the engine with its board-level inputs.
    pub fn new(engine: AcquisitionEngine<'b, M, S>, dio: DioScanner<G>, power: P, clock: T) -> Self {
        let runtime = RuntimeConfig::defaults_for(engine.board());
        Self {
            engine,
            dio,
            power,
            clock,
            runtime,
            runtime_seen: None,
            applied: Vec::new(),
        }
    }

    /// The engine, for state inspection.
    pub fn engine(&self) -> &AcquisitionEngine<'b, M, S> {
        &self.engine
    }

    /// Sampling tick: lifecycle scan, channel updates, trigger and DIO scan.
    ///
    /// Returns the number of modules triggered.
    pub fn on_tick<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
    ) -> usize {
        ctx.sync_runtime(&mut self.runtime, &mut self.runtime_seen);
        self.engine.scan(ctx, &self.runtime, self.power.power_state());
        self.sync_channels();

        let now = self.clock.now();
        let triggered = self.engine.trigger(&self.runtime, now);
        if self.runtime.streaming {
            self.dio.scan(ctx, &self.runtime.dio, now);
        }
        triggered
    }

    /// Completion wake-up: drain every module in `pending`.
    ///
    /// Returns the number of batches published.
    pub fn on_completion<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        pending: &PendingSet,
    ) -> usize {
        ctx.sync_runtime(&mut self.runtime, &mut self.runtime_seen);
        self.engine
            .service(ctx, &self.runtime, pending, self.clock.now())
    }

    /// Push channel enables to the drivers when they changed since the
    /// last push.
    fn sync_channels(&mut self) {
        if self.applied == self.runtime.channels {
            return;
        }
        self.engine.apply_channel_state(&self.runtime);
        self.applied.clone_from(&self.runtime.channels);
    }
}

/// Acquisition worker loop. Never returns.
///
/// Completions are serviced before the next tick when both are ready, so a
/// read is never starved by triggering.
pub async fn acquisition_task<R, const N: usize, const Q: usize, const D: usize, M, S, G, P, T>(
    ctx: &AcquisitionContext<R, N, Q, D>,
    worker: &mut AcquisitionWorker<'_, M, S, G, P, T>,
    period: Duration,
) where
    R: RawMutex,
    M: Converter,
    S: Converter,
    G: PinGroup,
    P: PowerMonitor,
    T: TimestampCounter,
{
    info!("acquisition task started, period {} us", period.as_micros());
    let mut ticker = Ticker::every(period);
    loop {
        match select(ctx.bridge.wait(), ticker.next()).await {
            Either::First(pending) => {
                worker.on_completion(ctx, &pending);
            }
            Either::Second(()) => {
                worker.on_tick(ctx);
            }
        }
    }
}

// ── Streaming ───────────────────────────────────────────────────────────────

/// Session control sent to the streaming task by the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start streaming with record times relative to `epoch`.
    Start {
        /// Trigger epoch of the new session.
        epoch: u32,
    },
    /// Stop streaming and drop everything queued.
    Stop,
    /// Replace the output settings.
    Configure(StreamSettings),
}

impl SessionCommand {
    /// Short label for log output.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::Configure(_) => "configure",
        }
    }
}

/// Streaming loop. Never returns.
///
/// Session commands are applied between ticks, never during one.
pub async fn streaming_task<R, const N: usize, const Q: usize, const D: usize, C, const K: usize>(
    ctx: &AcquisitionContext<R, N, Q, D>,
    mux: &mut StreamingMultiplexer<'_>,
    sinks: &[&dyn TransportSink],
    commands: Receiver<'_, C, SessionCommand, K>,
    period: Duration,
) where
    R: RawMutex,
    C: RawMutex,
{
    info!("streaming task started, period {} us", period.as_micros());
    let mut ticker = Ticker::every(period);
    loop {
        match select(commands.receive(), ticker.next()).await {
            Either::First(command) => {
                debug!("session command: {}", command.as_str());
                match command {
                    SessionCommand::Start { epoch } => mux.start_session(ctx, epoch),
                    SessionCommand::Stop => mux.stop_session(ctx),
                    SessionCommand::Configure(settings) => mux.set_settings(settings),
                }
            }
            Either::Second(()) => {
                if let TickOutcome::Sent { packets, bytes } = mux.tick(ctx, sinks) {
                    trace!("sent {} packets, {} bytes", packets, bytes);
                }
            }
        }
    }
}
