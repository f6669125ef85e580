//! Acquisition worker logic.
//!
//! The engine owns every converter driver and its lifecycle. The
//! acquisition task calls it in three steps:
//!
//! 1. [`scan`](AcquisitionEngine::scan) once per pass: power and enable
//!    gating, (re-)initialisation, stale-busy recovery.
//! 2. [`trigger`](AcquisitionEngine::trigger) on the sampling tick: start a
//!    conversion on every idle module and remember the trigger time.
//! 3. [`service`](AcquisitionEngine::service) after the deferral bridge
//!    reports completions: read each completed module into a batch and
//!    publish it.
//!
//! No floating point happens here.

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;
use platform::PowerState;

use crate::bridge::PendingSet;
use crate::config::{BoardConfig, RuntimeConfig, MAX_MODULES};
use crate::context::AcquisitionContext;
use crate::driver::{Converter, ModuleChannels};
use crate::error::ConfigError;
use crate::lifecycle::{ModuleLifecycle, ModuleState, ScanAction};
use crate::module::AcquisitionModule;
use crate::sample::SampleBatch;

struct Slot<M, S> {
    driver: AcquisitionModule<M, S>,
    lifecycle: ModuleLifecycle,
    trigger_timestamp: u32,
}

/// Drivers and lifecycles of every converter module on the board.
pub struct AcquisitionEngine<'b, M, S> {
    board: &'b BoardConfig,
    slots: Vec<Slot<M, S>, MAX_MODULES>,
}

impl<'b, M, S> AcquisitionEngine<'b, M, S>
where
    M: Converter,
    S: Converter,
{
    /// Bind one driver to each configured module, in module order.
    ///
    /// Fails if the board configuration is invalid, the number of drivers
    /// differs from the number of modules, or a driver's backend does not
    /// match its module.
    pub fn new(
        board: &'b BoardConfig,
        drivers: impl IntoIterator<Item = AcquisitionModule<M, S>>,
    ) -> Result<Self, ConfigError> {
        board.validate()?;
        let mut slots = Vec::new();
        for driver in drivers {
            slots
                .push(Slot {
                    driver,
                    lifecycle: ModuleLifecycle::new(),
                    trigger_timestamp: 0,
                })
                .map_err(|_| ConfigError::TooManyModules)?;
        }
        if slots.len() != board.modules().len() {
            return Err(ConfigError::ModuleCountMismatch {
                expected: module_index(board.modules().len()),
                actual: module_index(slots.len()),
            });
        }
        for (index, (slot, module)) in slots.iter().zip(board.modules()).enumerate() {
            if slot.driver.kind() != module.kind() {
                return Err(ConfigError::BackendMismatch {
                    module: module_index(index),
                });
            }
        }
        Ok(Self { board, slots })
    }

    /// Board this engine drives.
    pub fn board(&self) -> &'b BoardConfig {
        self.board
    }

    /// Lifecycle state of `module`.
    pub fn state(&self, module: u8) -> Option<ModuleState> {
        self.slots
            .get(usize::from(module))
            .map(|slot| slot.lifecycle.state())
    }

    /// Borrow a module's driver.
    pub fn module(&self, module: u8) -> Option<&AcquisitionModule<M, S>> {
        self.slots.get(usize::from(module)).map(|slot| &slot.driver)
    }

    /// Periodic scheduling pass: apply power and enable gating to every
    /// module and (re-)initialise the ones that need it.
    pub fn scan<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        runtime: &RuntimeConfig,
        power: PowerState,
    ) {
        let board = self.board;
        for (index, (slot, config)) in self.slots.iter_mut().zip(board.modules()).enumerate() {
            let module = module_index(index);
            let enabled = runtime
                .modules
                .get(index)
                .is_some_and(|state| state.enabled);
            let channels = ModuleChannels::new(module, board.channels(), &runtime.channels);

            match slot.lifecycle.evaluate(config.power_domain, power, enabled) {
                ScanAction::Skip | ScanAction::Ready => {}
                ScanAction::Disable { from } => {
                    info!("module {} disabled from {}", config.name, from.as_str());
                    if !matches!(from, ModuleState::Initializing) {
                        if let Err(err) = slot.driver.write_module_state(config, &channels, false) {
                            debug!("module {} disable write failed: {}", config.name, err.as_str());
                        }
                    }
                }
                ScanAction::RecoveredStale => {
                    warn!("module {} never completed, back to idle", config.name);
                }
                ScanAction::Initialize => {
                    let result = slot
                        .driver
                        .init_hardware(config)
                        .and_then(|()| slot.driver.write_channel_state(&channels))
                        .and_then(|()| slot.driver.write_module_state(config, &channels, true));
                    match result {
                        Ok(()) => {
                            // Initializing is guaranteed by the Initialize action.
                            let _ = slot.lifecycle.init_succeeded();
                            info!("module {} ready", config.name);
                        }
                        Err(err) => {
                            slot.lifecycle.init_failed();
                            ctx.stats.init_failure();
                            error!(
                                "FATAL: module {} init failed ({}), attempt {}",
                                config.name,
                                err.as_str(),
                                slot.lifecycle.init_failures()
                            );
                        }
                    }
                }
            }
        }
    }

    /// Push changed channel enables to every initialised module.
    pub fn apply_channel_state(&mut self, runtime: &RuntimeConfig) {
        let board = self.board;
        for (index, (slot, config)) in self.slots.iter_mut().zip(board.modules()).enumerate() {
            if !slot.lifecycle.is_initialised() {
                continue;
            }
            let channels = ModuleChannels::new(module_index(index), board.channels(), &runtime.channels);
            if let Err(err) = slot.driver.write_channel_state(&channels) {
                warn!("module {} channel update failed: {}", config.name, err.as_str());
            }
        }
    }

    /// Start a conversion on every idle module, stamped `now`.
    ///
    /// Returns the number of modules triggered. Nothing is triggered while
    /// no streaming session is active.
    pub fn trigger(&mut self, runtime: &RuntimeConfig, now: u32) -> usize {
        if !runtime.streaming {
            return 0;
        }
        let board = self.board;
        let mut triggered = 0usize;
        for (index, (slot, config)) in self.slots.iter_mut().zip(board.modules()).enumerate() {
            if slot.lifecycle.begin_trigger().is_err() {
                continue;
            }
            let channels = ModuleChannels::new(module_index(index), board.channels(), &runtime.channels);
            match slot.driver.trigger_conversion(config, &channels) {
                Ok(()) => {
                    slot.lifecycle.trigger_started();
                    slot.trigger_timestamp = now;
                    triggered = triggered.saturating_add(1);
                }
                Err(err) => {
                    slot.lifecycle.trigger_failed();
                    trace!("module {} trigger skipped: {}", config.name, err.as_str());
                }
            }
        }
        triggered
    }

    /// Drain every module with a pending completion, in module order.
    ///
    /// A successful read is published to the context; a failed one is
    /// counted and the cycle is skipped. `now` becomes the trigger time of
    /// a conversion the read itself restarted.
    ///
    /// Outside a session a completion only returns the module to idle: the
    /// result is not read, not published and no new conversion starts.
    pub fn service<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &mut self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        runtime: &RuntimeConfig,
        pending: &PendingSet,
        now: u32,
    ) -> usize {
        let board = self.board;
        let mut published = 0usize;
        for (module, _) in pending.modules() {
            let Some((slot, config)) = self
                .slots
                .get_mut(usize::from(module))
                .zip(board.module(module))
            else {
                continue;
            };
            if !slot.lifecycle.complete() {
                trace!("module {} spurious completion", config.name);
                continue;
            }
            if !runtime.streaming {
                slot.lifecycle.drained(false);
                trace!("module {} completion after session end", config.name);
                continue;
            }

            let channels = ModuleChannels::new(module, board.channels(), &runtime.channels);
            let mut batch = SampleBatch::new();
            let retriggered =
                match slot
                    .driver
                    .read_samples(&mut batch, config, &channels, slot.trigger_timestamp)
                {
                    Ok(outcome) => {
                        match ctx.publish(&batch) {
                            Ok(()) => published = published.saturating_add(1),
                            Err(err) => debug!("batch dropped: {}", err.as_str()),
                        }
                        outcome.retriggered
                    }
                    Err(err) => {
                        ctx.stats.read_failure();
                        warn!("module {} read failed: {}", config.name, err.as_str());
                        false
                    }
                };

            slot.lifecycle.drained(retriggered);
            if retriggered {
                slot.trigger_timestamp = now;
            }
        }
        published
    }
}

#[allow(clippy::cast_possible_truncation)] // Safety: bounded by MAX_MODULES
fn module_index(n: usize) -> u8 {
    n.min(usize::from(u8::MAX)) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::driver::ad7609::testing::{Expect, Lines, MockAd7609};
    use crate::driver::ad7609::FRAME_BYTES;
    use crate::driver::Mc12bAdc;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use platform::mocks::{AdcScript, MockAdc};

    type Mc = Mc12bAdc<MockAdc<'static>>;
    type Ctx = AcquisitionContext<NoopRawMutex, 4, 4, 4>;

    fn drivers(
        expect: Expect,
    ) -> (&'static AdcScript, Lines, [AcquisitionModule<Mc, MockAd7609>; 2]) {
        let adc: &'static AdcScript = std::boxed::Box::leak(std::boxed::Box::new(AdcScript::new()));
        let (lines, ad) = expect.build();
        (
            adc,
            lines,
            [
                AcquisitionModule::Multiplexed(Mc12bAdc::new(MockAdc::new(adc))),
                AcquisitionModule::Simultaneous(ad),
            ],
        )
    }

    fn streaming(board: &BoardConfig) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::nq3(board);
        runtime.streaming = true;
        runtime
    }

    /// Streaming with user input 0 (AD7609 lane 4) on.
    fn streaming_user_input(board: &BoardConfig) -> RuntimeConfig {
        let mut runtime = streaming(board);
        runtime.set_channel_enabled(board, 0, true);
        runtime
    }

    #[test]
    fn mismatched_drivers_are_rejected() {
        let board = BoardConfig::nq3().unwrap();
        let (_, mut lines, [mc, ad]) = drivers(Expect::default());
        assert!(matches!(
            AcquisitionEngine::new(&board, [ad, mc]),
            Err(ConfigError::BackendMismatch { module: 0 })
        ));
        lines.done();

        let (_, mut lines, [mc, _]) = drivers(Expect::default());
        assert!(matches!(
            AcquisitionEngine::new(&board, [mc]),
            Err(ConfigError::ModuleCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
        lines.done();
    }

    #[test]
    fn scan_initialises_modules_on_available_power() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = streaming(&board);
        let ctx = Ctx::new(runtime.clone());
        let (adc, mut lines, drivers) = drivers(Expect::default().bring_up());
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();

        engine.scan(&ctx, &runtime, PowerState::Down);
        assert_eq!(engine.state(0), Some(ModuleState::Idle));
        assert_eq!(engine.state(1), Some(ModuleState::Disabled));
        assert!(adc.calibrated());

        engine.scan(&ctx, &runtime, PowerState::FullPower);
        assert_eq!(engine.state(1), Some(ModuleState::Idle));
        lines.done();
    }

    #[test]
    fn failed_init_is_counted_and_retried() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = streaming(&board);
        let ctx = Ctx::new(runtime.clone());
        let (adc, mut lines, drivers) = drivers(Expect::default());
        adc.fail_calibration(true);
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();

        engine.scan(&ctx, &runtime, PowerState::Down);
        engine.scan(&ctx, &runtime, PowerState::Down);
        assert_eq!(engine.state(0), Some(ModuleState::Initializing));
        assert_eq!(ctx.stats.snapshot().init_failures, 2);
        assert_eq!(engine.trigger(&runtime, 1), 0);

        adc.fail_calibration(false);
        engine.scan(&ctx, &runtime, PowerState::Down);
        assert_eq!(engine.state(0), Some(ModuleState::Idle));
        lines.done();
    }

    #[test]
    fn trigger_then_service_publishes_one_batch_per_module() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = streaming_user_input(&board);
        let ctx = Ctx::new(runtime.clone());
        let (adc, mut lines, drivers) = drivers(
            Expect::default()
                .bring_up()
                .trigger()
                .read_and_retrigger(&[0; FRAME_BYTES]),
        );
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);

        assert_eq!(engine.trigger(&runtime, 1000), 2);
        assert_eq!(engine.state(0), Some(ModuleState::Busy));
        assert_eq!(engine.trigger(&runtime, 1001), 0, "busy modules are not retriggered");

        adc.latch(19, 2048);
        ctx.bridge.notify(0);
        ctx.bridge.notify(1);
        let pending = ctx.bridge.take().unwrap();
        assert_eq!(engine.service(&ctx, &runtime, &pending, 1500), 2);

        assert_eq!(engine.state(0), Some(ModuleState::Idle));
        assert_eq!(
            engine.state(1),
            Some(ModuleState::Busy),
            "AD7609 read restarts the conversion"
        );
        let first = ctx.analog.try_pop().unwrap();
        let ts = ctx.pool.with_batch(&first, SampleBatch::timestamp).unwrap();
        assert_eq!(ts, Some(1000));
        ctx.pool.free(first);
        let second = ctx.analog.try_pop().unwrap();
        ctx.pool.free(second);
        lines.done();
    }

    #[test]
    fn failed_read_is_skipped_and_counted() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = streaming_user_input(&board);
        let ctx = Ctx::new(runtime.clone());
        let (_, mut lines, drivers) =
            drivers(Expect::default().bring_up().trigger().busy(true));
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);
        engine.trigger(&runtime, 10);

        ctx.bridge.notify(1);
        let pending = ctx.bridge.take().unwrap();
        assert_eq!(engine.service(&ctx, &runtime, &pending, 20), 0);
        assert_eq!(ctx.stats.snapshot().read_failures, 1);
        assert_eq!(engine.state(1), Some(ModuleState::Idle));
        assert!(ctx.analog.is_empty());
        lines.done();
    }

    #[test]
    fn completions_after_session_end_start_nothing() {
        let board = BoardConfig::nq3().unwrap();
        let mut runtime = streaming_user_input(&board);
        let ctx = Ctx::new(runtime.clone());
        // One conversion pulse from the trigger; the stop must add none.
        let (_, mut lines, drivers) = drivers(Expect::default().bring_up().trigger());
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);
        assert_eq!(engine.trigger(&runtime, 100), 2);

        runtime.streaming = false;
        for now in 200..205 {
            ctx.bridge.notify(0);
            ctx.bridge.notify(1);
            let pending = ctx.bridge.take().unwrap();
            assert_eq!(engine.service(&ctx, &runtime, &pending, now), 0);
            assert_eq!(engine.trigger(&runtime, now), 0);
        }

        assert_eq!(engine.state(0), Some(ModuleState::Idle));
        assert_eq!(engine.state(1), Some(ModuleState::Idle));
        assert_eq!(ctx.pool.in_use(), 0);
        assert!(ctx.analog.is_empty());
        assert_eq!(ctx.stats.snapshot().read_failures, 0);
        lines.done();
    }

    #[test]
    fn external_module_without_lanes_is_left_alone() {
        let board = BoardConfig::nq3().unwrap();
        // Monitoring channels only: nothing enabled on the AD7609.
        let runtime = streaming(&board);
        let ctx = Ctx::new(runtime.clone());
        let (_, mut lines, drivers) = drivers(Expect::default().bring_up());
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);

        assert_eq!(engine.trigger(&runtime, 0), 1);
        assert_eq!(engine.state(1), Some(ModuleState::Idle));
        ctx.bridge.notify(1);
        let pending = ctx.bridge.take().unwrap();
        assert_eq!(engine.service(&ctx, &runtime, &pending, 1), 0);
        assert_eq!(ctx.stats.snapshot().read_failures, 0);
        lines.done();
    }

    #[test]
    fn rail_drop_disables_external_module() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = streaming_user_input(&board);
        let ctx = Ctx::new(runtime.clone());
        let (_, mut lines, drivers) =
            drivers(Expect::default().bring_up().trigger().standby(false));
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);
        engine.trigger(&runtime, 0);
        engine.scan(&ctx, &runtime, PowerState::Down);
        assert_eq!(engine.state(1), Some(ModuleState::Disabled));
        assert_eq!(engine.state(0), Some(ModuleState::Busy));
        lines.done();
    }

    #[test]
    fn nothing_triggers_outside_a_session() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = RuntimeConfig::nq3(&board);
        let ctx = Ctx::new(runtime.clone());
        let (_, mut lines, drivers) = drivers(Expect::default().bring_up());
        let mut engine = AcquisitionEngine::new(&board, drivers).unwrap();
        engine.scan(&ctx, &runtime, PowerState::FullPower);
        assert_eq!(engine.trigger(&runtime, 0), 0);
        lines.done();
    }
}
