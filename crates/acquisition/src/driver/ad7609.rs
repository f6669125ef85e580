//! AD7609 8-lane 18-bit simultaneous-sampling converter.
//!
//! Control lines: CONVST starts a conversion on all lanes at once, BUSY
//! falls when the results are ready (that edge is the completion interrupt),
//! RESET, RANGE, STBY and OS0/OS1 are static configuration. Results are
//! clocked out over SPI as one 144-bit frame, lane 0 first, MSB first.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use super::{Converter, ModuleChannels, ReadOutcome};
use crate::config::{
    Ad7609Module, ChannelWiring, ConverterKind, ModuleConfig, ModuleVariant, AD7609_LANES,
};
use crate::error::DriverError;
use crate::sample::{Sample, SampleBatch};

/// Bytes in one full read-out (8 lanes x 18 bits).
pub const FRAME_BYTES: usize = 18;

/// Bits per lane in the read-out frame.
const LANE_BITS: usize = 18;

/// CONVST high time.
const CONVST_PULSE_NS: u32 = 200;

/// RESET high time, and settle time after release.
const RESET_MS: u32 = 1;

/// Control lines wired to the converter.
pub struct Ad7609Pins<O, I> {
    /// Conversion start (active high pulse).
    pub convst: O,
    /// Reset (active high).
    pub reset: O,
    /// Range select: low = ±10 V, high = ±5 V.
    pub range: O,
    /// Standby, active low.
    pub standby: O,
    /// Oversampling select bit 0.
    pub os0: O,
    /// Oversampling select bit 1.
    pub os1: O,
    /// BUSY output of the converter.
    pub busy: I,
}

/// Driver for the external converter.
pub struct Ad7609<S, O, I, D> {
    spi: S,
    pins: Ad7609Pins<O, I>,
    delay: D,
    initialised: bool,
    enabled: bool,
}

/// Whether any enabled channel of the module sits on a lane.
fn has_lanes(channels: &ModuleChannels<'_>) -> bool {
    channels
        .enabled()
        .any(|channel| matches!(channel.wiring, ChannelWiring::Ad7609(_)))
}

fn set<O: OutputPin>(pin: &mut O, high: bool) -> Result<(), DriverError> {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
    .map_err(|_| DriverError::Pin)
}

/// Pull one lane's 18-bit code out of a read-out frame.
#[allow(clippy::arithmetic_side_effects)] // Safety: shifts and divisors are constant and in range
pub fn extract_lane(frame: &[u8; FRAME_BYTES], lane: u8) -> u32 {
    let first = usize::from(lane).saturating_mul(LANE_BITS);
    let mut code = 0u32;
    for bit in first..first.saturating_add(LANE_BITS) {
        let byte = frame.get(bit / 8).copied().unwrap_or(0);
        let shift = 7usize.saturating_sub(bit % 8);
        code = (code << 1) | u32::from((byte >> shift) & 1);
    }
    code & 0x3_FFFF
}

impl<S, O, I, D> Ad7609<S, O, I, D>
where
    S: SpiDevice,
    O: OutputPin,
    I: InputPin,
    D: DelayNs,
{
    /// Take ownership of the bus device and control lines.
    pub fn new(spi: S, pins: Ad7609Pins<O, I>, delay: D) -> Self {
        Self {
            spi,
            pins,
            delay,
            initialised: false,
            enabled: false,
        }
    }

    /// Give back the bus device, control lines and delay.
    pub fn release(self) -> (S, Ad7609Pins<O, I>, D) {
        (self.spi, self.pins, self.delay)
    }

    fn settings(module: &ModuleConfig) -> Result<Ad7609Module, DriverError> {
        match module.variant {
            ModuleVariant::Ad7609(settings) => Ok(settings),
            ModuleVariant::Mc12b(_) => Err(DriverError::WrongVariant),
        }
    }

    fn is_busy(&mut self) -> Result<bool, DriverError> {
        self.pins.busy.is_high().map_err(|_| DriverError::Pin)
    }

    fn pulse_convst(&mut self) -> Result<(), DriverError> {
        set(&mut self.pins.convst, true)?;
        self.delay.delay_ns(CONVST_PULSE_NS);
        set(&mut self.pins.convst, false)
    }
}

impl<S, O, I, D> Converter for Ad7609<S, O, I, D>
where
    S: SpiDevice,
    O: OutputPin,
    I: InputPin,
    D: DelayNs,
{
    const KIND: ConverterKind = ConverterKind::Ad7609;

    fn init_hardware(&mut self, module: &ModuleConfig) -> Result<(), DriverError> {
        let settings = Self::settings(module)?;
        let (os0, os1) = settings.oversampling.pins();

        set(&mut self.pins.range, !settings.range_10v)?;
        set(&mut self.pins.os0, os0)?;
        set(&mut self.pins.os1, os1)?;
        set(&mut self.pins.convst, false)?;
        set(&mut self.pins.standby, true)?;

        set(&mut self.pins.reset, true)?;
        self.delay.delay_ms(RESET_MS);
        set(&mut self.pins.reset, false)?;
        self.delay.delay_ms(RESET_MS);

        self.initialised = true;
        self.enabled = true;
        Ok(())
    }

    fn write_module_state(
        &mut self,
        _module: &ModuleConfig,
        _channels: &ModuleChannels<'_>,
        enabled: bool,
    ) -> Result<(), DriverError> {
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        set(&mut self.pins.standby, enabled)?;
        self.enabled = enabled;
        Ok(())
    }

    fn write_channel_state(&mut self, _channels: &ModuleChannels<'_>) -> Result<(), DriverError> {
        // All lanes convert together; channel enables only filter the read.
        if self.initialised {
            Ok(())
        } else {
            Err(DriverError::NotInitialised)
        }
    }

    fn trigger_conversion(
        &mut self,
        _module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
    ) -> Result<(), DriverError> {
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        if !self.enabled {
            return Err(DriverError::NotEnabled);
        }
        if !has_lanes(channels) {
            return Err(DriverError::NoData);
        }
        if self.is_busy()? {
            return Err(DriverError::Busy);
        }
        self.pulse_convst()
    }

    fn read_samples(
        &mut self,
        out: &mut SampleBatch,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        trigger_timestamp: u32,
    ) -> Result<ReadOutcome, DriverError> {
        let settings = Self::settings(module)?;
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        if !has_lanes(channels) {
            return Err(DriverError::NoData);
        }
        if self.is_busy()? {
            return Err(DriverError::Busy);
        }

        let mut frame = [0u8; FRAME_BYTES];
        self.spi.read(&mut frame).map_err(|_| DriverError::Bus)?;

        for channel in channels.enabled() {
            let ChannelWiring::Ad7609(wiring) = channel.wiring else {
                continue;
            };
            if wiring.lane >= AD7609_LANES {
                continue;
            }
            let sample = Sample {
                timestamp: trigger_timestamp,
                channel: channel.id,
                raw: extract_lane(&frame, wiring.lane),
            };
            if out.push(sample).is_err() {
                break;
            }
        }

        if out.is_empty() {
            return Err(DriverError::NoData);
        }

        let retriggered = settings.retrigger_on_read && self.enabled;
        if retriggered {
            self.pulse_convst()?;
        }
        Ok(ReadOutcome { retriggered })
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::testing::Expect;
    use super::*;
    use crate::config::{BoardConfig, RuntimeConfig};

    /// Frame with `codes[lane]` packed MSB first.
    fn frame(codes: [u32; 8]) -> [u8; FRAME_BYTES] {
        let mut out = [0u8; FRAME_BYTES];
        let mut bit = 0usize;
        for code in codes {
            for i in (0..18).rev() {
                if (code >> i) & 1 == 1 {
                    out[bit / 8] |= 0x80 >> (bit % 8);
                }
                bit += 1;
            }
        }
        out
    }

    fn user_inputs_on(board: &BoardConfig) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::defaults_for(board);
        for id in 0..8 {
            runtime.set_channel_enabled(board, id, true);
        }
        runtime
    }

    #[test]
    fn lane_extraction_is_msb_first() {
        let codes = [0x3_FFFF, 0, 0x1_2345, 0x2_0000, 1, 0x0_FFFF, 0x3_0001, 0x2_AAAA];
        let packed = frame(codes);
        for (lane, code) in codes.iter().enumerate() {
            assert_eq!(extract_lane(&packed, lane as u8), *code, "lane {lane}");
        }
    }

    #[test]
    fn init_drives_configuration_lines_and_resets() {
        let board = BoardConfig::nq3().unwrap();
        let (mut lines, mut adc) = Expect::default().init().build();

        adc.init_hardware(&board.modules()[1]).unwrap();
        lines.done();
    }

    #[test]
    fn trigger_is_refused_while_busy() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = user_inputs_on(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let module = &board.modules()[1];
        let (mut lines, mut adc) = Expect::default().init().busy(true).trigger().build();

        assert_eq!(
            adc.trigger_conversion(module, &channels),
            Err(DriverError::NotInitialised)
        );
        adc.init_hardware(module).unwrap();
        assert_eq!(adc.trigger_conversion(module, &channels), Err(DriverError::Busy));
        adc.trigger_conversion(module, &channels).unwrap();
        lines.done();
    }

    #[test]
    fn read_maps_lanes_to_logical_channels_and_retriggers() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = user_inputs_on(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let module = &board.modules()[1];
        let (mut lines, mut adc) = Expect::default()
            .init()
            .read_and_retrigger(&frame([10, 11, 12, 13, 14, 15, 16, 17]))
            .build();
        adc.init_hardware(module).unwrap();

        let mut batch = SampleBatch::new();
        let outcome = adc.read_samples(&mut batch, module, &channels, 4242).unwrap();
        assert!(outcome.retriggered);
        assert_eq!(batch.len(), 8);
        // Logical 0 sits on lane 4, logical 4 on lane 0.
        assert_eq!(batch.as_slice()[0], Sample { timestamp: 4242, channel: 0, raw: 14 });
        assert_eq!(batch.as_slice()[4], Sample { timestamp: 4242, channel: 4, raw: 10 });
        lines.done();
    }

    #[test]
    fn read_leaves_converter_idle_without_retrigger() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = user_inputs_on(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let mut module = board.modules()[1];
        if let ModuleVariant::Ad7609(settings) = &mut module.variant {
            settings.retrigger_on_read = false;
        }
        let (mut lines, mut adc) = Expect::default().init().read(&[0; FRAME_BYTES]).build();
        adc.init_hardware(&module).unwrap();

        let mut batch = SampleBatch::new();
        let outcome = adc.read_samples(&mut batch, &module, &channels, 1).unwrap();
        assert!(!outcome.retriggered);
        lines.done();
    }

    #[test]
    fn read_failures_produce_no_samples() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = user_inputs_on(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let module = &board.modules()[1];
        let (mut lines, mut adc) = Expect::default().init().busy(true).busy_fault().build();
        adc.init_hardware(module).unwrap();

        let mut batch = SampleBatch::new();
        assert_eq!(
            adc.read_samples(&mut batch, module, &channels, 0),
            Err(DriverError::Busy)
        );
        assert_eq!(
            adc.read_samples(&mut batch, module, &channels, 0),
            Err(DriverError::Pin)
        );
        assert!(batch.is_empty());
        lines.done();
    }

    #[test]
    fn no_enabled_lane_touches_neither_bus_nor_convst() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = RuntimeConfig::defaults_for(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let module = &board.modules()[1];
        let (mut lines, mut adc) = Expect::default().init().build();
        adc.init_hardware(module).unwrap();

        assert_eq!(
            adc.trigger_conversion(module, &channels),
            Err(DriverError::NoData)
        );
        let mut batch = SampleBatch::new();
        assert_eq!(
            adc.read_samples(&mut batch, module, &channels, 0),
            Err(DriverError::NoData)
        );
        lines.done();
    }

    #[test]
    fn standby_follows_module_state() {
        let board = BoardConfig::nq3().unwrap();
        let runtime = user_inputs_on(&board);
        let channels = ModuleChannels::new(1, board.channels(), &runtime.channels);
        let module = &board.modules()[1];
        let (mut lines, mut adc) = Expect::default().init().standby(false).build();
        adc.init_hardware(module).unwrap();
        adc.write_module_state(module, &channels, false).unwrap();
        assert_eq!(
            adc.trigger_conversion(module, &channels),
            Err(DriverError::NotEnabled)
        );
        lines.done();
    }
}
