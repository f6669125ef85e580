//! On-chip multiplexed SAR converter.
//!
//! Dedicated inputs own a SAR module each and are gated per channel; shared
//! inputs are scanned by the shared module, which stays on while the
//! converter is enabled. Conversions are software triggered per input and
//! results are collected by polling the per-input ready flags, so a
//! coalesced wake-up simply reads whatever is latched.

use platform::AdcPeripheral;

use super::{Converter, ModuleChannels, ReadOutcome};
use crate::config::{ChannelWiring, ConverterKind, ModuleConfig, ModuleVariant};
use crate::error::DriverError;
use crate::sample::{Sample, SampleBatch};

/// Driver for the on-chip converter.
pub struct Mc12bAdc<A> {
    adc: A,
    initialised: bool,
    enabled: bool,
}

impl<A: AdcPeripheral> Mc12bAdc<A> {
    /// Wrap the register interface. No hardware access until
    /// [`Converter::init_hardware`].
    pub fn new(adc: A) -> Self {
        Self {
            adc,
            initialised: false,
            enabled: false,
        }
    }

    /// Give back the register interface.
    pub fn release(self) -> A {
        self.adc
    }

    fn sar_mask(module: &ModuleConfig) -> Result<u32, DriverError> {
        match module.variant {
            ModuleVariant::Mc12b(config) => Ok(config.sar_mask),
            ModuleVariant::Ad7609(_) => Err(DriverError::WrongVariant),
        }
    }
}

impl<A: AdcPeripheral> Converter for Mc12bAdc<A> {
    const KIND: ConverterKind = ConverterKind::Mc12b;

    fn init_hardware(&mut self, module: &ModuleConfig) -> Result<(), DriverError> {
        Self::sar_mask(module)?;
        self.adc
            .load_factory_calibration()
            .map_err(|_| DriverError::Bus)?;
        self.initialised = true;
        self.enabled = false;
        Ok(())
    }

    fn write_module_state(
        &mut self,
        module: &ModuleConfig,
        _channels: &ModuleChannels<'_>,
        enabled: bool,
    ) -> Result<(), DriverError> {
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        if self.enabled == enabled {
            return Ok(());
        }
        let mask = Self::sar_mask(module)?;
        if enabled {
            self.adc.set_analog_bias(true).map_err(|_| DriverError::Bus)?;
            self.adc
                .set_modules_enabled(mask, true)
                .map_err(|_| DriverError::Bus)?;
        } else {
            self.adc
                .set_modules_enabled(mask, false)
                .map_err(|_| DriverError::Bus)?;
            self.adc
                .set_analog_bias(false)
                .map_err(|_| DriverError::Bus)?;
        }
        self.enabled = enabled;
        Ok(())
    }

    fn write_channel_state(&mut self, channels: &ModuleChannels<'_>) -> Result<(), DriverError> {
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        for (channel, runtime) in channels.iter() {
            let ChannelWiring::Mc12b(wiring) = channel.wiring else {
                continue;
            };
            if wiring.dedicated {
                self.adc
                    .set_modules_enabled(wiring.sar_mask, runtime.enabled)
                    .map_err(|_| DriverError::Bus)?;
            }
            self.adc
                .set_result_interrupt(wiring.input, runtime.enabled)
                .map_err(|_| DriverError::Bus)?;
        }
        Ok(())
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
        let mut started = false;
        for channel in channels.enabled() {
            if let ChannelWiring::Mc12b(wiring) = channel.wiring {
                self.adc
                    .start_conversion(wiring.input)
                    .map_err(|_| DriverError::Bus)?;
                started = true;
            }
        }
        if started {
            Ok(())
        } else {
            Err(DriverError::NoData)
        }
    }

    fn read_samples(
        &mut self,
        out: &mut SampleBatch,
        _module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        trigger_timestamp: u32,
    ) -> Result<ReadOutcome, DriverError> {
        if !self.initialised {
            return Err(DriverError::NotInitialised);
        }
        for channel in channels.enabled() {
            let ChannelWiring::Mc12b(wiring) = channel.wiring else {
                continue;
            };
            if !self.adc.is_result_ready(wiring.input) {
                continue;
            }
            let raw = self.adc.read_result(wiring.input);
            let sample = Sample {
                timestamp: trigger_timestamp,
                channel: channel.id,
                raw,
            };
            if out.push(sample).is_err() {
                break;
            }
        }
        if out.is_empty() {
            Err(DriverError::NoData)
        } else {
            Ok(ReadOutcome { retriggered: false })
        }
    }
}
