//! End-to-end pipeline scenarios: converter to batch, backpressure at the
//! sinks, and epoch-relative record times.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use acquisition::config::{
    Channel, ChannelWiring, Mc12bChannel, Mc12bModule, ModuleConfig, ModuleVariant,
};
use acquisition::streaming::{StreamSettings, StreamingMultiplexer, TickOutcome};
use acquisition::{
    AcquisitionContext, AcquisitionEngine, AcquisitionModule, AcquisitionWorker, Ad7609,
    BoardConfig, DigitalSample, DioScanner, Mc12bAdc, RuntimeConfig, Sample, SampleBatch,
};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::digital::Mock as PinMock;
use embedded_hal_mock::eh1::spi::Mock as SpiMock;
use platform::mocks::{AdcScript, MockAdc, MockPinGroup, MockPower, MockSink, MockTimestamp};
use platform::{PowerDomain, PowerState};

type Mc<'a> = Mc12bAdc<MockAdc<'a>>;
// Single-converter boards never bind the external driver.
type Ad = Ad7609<SpiMock<u8>, PinMock, PinMock, NoopDelay>;
type Ctx = AcquisitionContext<NoopRawMutex, 8, 8, 8>;

fn input(id: u8, input: u8) -> Channel {
    Channel {
        id,
        module: 0,
        wiring: ChannelWiring::Mc12b(Mc12bChannel {
            input,
            sar_mask: 1 << 7,
            dedicated: false,
            internal_scale: 1.0,
            resolution: 4096,
        }),
    }
}

fn two_channel_board() -> BoardConfig {
    let module = ModuleConfig {
        name: "mc12b",
        variant: ModuleVariant::Mc12b(Mc12bModule { sar_mask: 1 << 7 }),
        power_domain: PowerDomain::Intrinsic,
    };
    BoardConfig::new(&[module], &[input(0, 3), input(1, 4)]).unwrap()
}

#[test]
fn triggered_module_produces_one_batch_with_both_channels() {
    let board = two_channel_board();
    let mut runtime = RuntimeConfig::defaults_for(&board);
    assert!(runtime.set_channel_enabled(&board, 0, true));
    assert!(runtime.set_channel_enabled(&board, 1, true));
    runtime.streaming = true;
    let ctx = Ctx::new(runtime);

    let adc = AdcScript::new();
    let clock = MockTimestamp::new(7_000, 1_000_000);
    let drivers: [AcquisitionModule<Mc<'_>, Ad>; 1] =
        [AcquisitionModule::Multiplexed(Mc12bAdc::new(MockAdc::new(&adc)))];
    let engine = AcquisitionEngine::new(&board, drivers).unwrap();
    let mut worker = AcquisitionWorker::new(
        engine,
        DioScanner::new(MockPinGroup::new(0)),
        MockPower::new(PowerState::FullPower),
        &clock,
    );

    assert_eq!(worker.on_tick(&ctx), 1);
    clock.advance(40);
    adc.latch(3, 100);
    adc.latch(4, 4095);
    ctx.bridge.notify(0);
    let pending = ctx.bridge.take().unwrap();
    assert_eq!(worker.on_completion(&ctx, &pending), 1);

    let handle = ctx.analog.try_pop().unwrap();
    let batch = ctx.pool.with_batch(&handle, SampleBatch::clone).unwrap();
    assert!(ctx.pool.free(handle));
    assert_eq!(
        batch.as_slice(),
        [
            Sample {
                timestamp: 7_000,
                channel: 0,
                raw: 100
            },
            Sample {
                timestamp: 7_000,
                channel: 1,
                raw: 4095
            },
        ]
    );
}

#[test]
fn blocked_sinks_leave_the_queue_untouched() {
    let board = BoardConfig::nq3().unwrap();
    let ctx = Ctx::new(RuntimeConfig::nq3(&board));
    let mut mux = StreamingMultiplexer::new(&board, StreamSettings::default());
    mux.start_session(&ctx, 0);
    for ts in 0..5 {
        let mut batch = SampleBatch::new();
        batch
            .push(Sample {
                timestamp: ts,
                channel: 248,
                raw: 1000,
            })
            .unwrap();
        ctx.publish(&batch).unwrap();
    }

    let serial = MockSink::<1024>::new(0);
    let network = MockSink::<1024>::new(0);
    for _ in 0..3 {
        assert_eq!(mux.tick(&ctx, &[&serial, &network]), TickOutcome::Deferred);
    }
    assert_eq!(ctx.analog.len(), 5);
    assert_eq!(ctx.pool.in_use(), 5);
    let stats = ctx.stats.snapshot();
    assert_eq!((stats.queue_full, stats.pool_exhausted, stats.packets_sent), (0, 0, 0));
    assert_eq!(serial.appends() + network.appends(), 0);
}

#[test]
fn digital_record_time_is_relative_to_the_session_epoch() {
    let board = BoardConfig::nq3().unwrap();
    let ctx = Ctx::new(RuntimeConfig::nq3(&board));
    let mut mux = StreamingMultiplexer::new(&board, StreamSettings::default());
    mux.start_session(&ctx, 100);
    assert!(ctx.publish_digital(DigitalSample {
        timestamp: 500,
        mask: 0xFFFF,
        values: 0x00FF,
    }));

    let sink = MockSink::<1024>::new(1024);
    assert!(matches!(mux.tick(&ctx, &[&sink]), TickOutcome::Sent { packets: 1, .. }));
    sink.with_bytes(|bytes| {
        let text = std::str::from_utf8(bytes).unwrap();
        assert!(text.contains("\"time\":400"), "{text}");
        assert!(text.contains("\"ts\":100"), "{text}");
    });
}

#[test]
fn batches_share_their_trigger_time_and_advance_between_triggers() {
    let board = two_channel_board();
    let mut runtime = RuntimeConfig::defaults_for(&board);
    runtime.set_channel_enabled(&board, 0, true);
    runtime.set_channel_enabled(&board, 1, true);
    runtime.streaming = true;
    let ctx = Ctx::new(runtime);

    let adc = AdcScript::new();
    let clock = MockTimestamp::new(u32::MAX - 150, 1_000_000);
    let drivers: [AcquisitionModule<Mc<'_>, Ad>; 1] =
        [AcquisitionModule::Multiplexed(Mc12bAdc::new(MockAdc::new(&adc)))];
    let mut worker = AcquisitionWorker::new(
        AcquisitionEngine::new(&board, drivers).unwrap(),
        DioScanner::new(MockPinGroup::new(0)),
        MockPower::new(PowerState::FullPower),
        &clock,
    );

    let mut stamps = Vec::new();
    for _ in 0..4 {
        worker.on_tick(&ctx);
        clock.advance(60);
        adc.latch(3, 1);
        adc.latch(4, 2);
        ctx.bridge.notify(0);
        worker.on_completion(&ctx, &ctx.bridge.take().unwrap());
        clock.advance(40);

        let handle = ctx.analog.try_pop().unwrap();
        let batch = ctx.pool.with_batch(&handle, SampleBatch::clone).unwrap();
        ctx.pool.free(handle);
        let first = batch.timestamp().unwrap();
        assert!(batch.iter().all(|sample| sample.timestamp == first));
        stamps.push(first);
    }
    // Non-decreasing in wrapping tick arithmetic, across the counter wrap.
    let start = stamps[0];
    assert!(stamps
        .windows(2)
        .all(|pair| pair[1].wrapping_sub(start) >= pair[0].wrapping_sub(start)));
    assert_eq!(stamps[1].wrapping_sub(stamps[0]), 100);
}
