//! Converter module: one configured converter bound to its driver.
//!
//! The backend is chosen when the engine is built and never changes, so the
//! per-call dispatch is a plain `match` over two driver types rather than a
//! trait object.

use crate::config::{Channel, ChannelRuntime, ConverterKind, ModuleConfig};
use crate::driver::{Converter, ModuleChannels, ReadOutcome};
use crate::error::DriverError;
use crate::sample::{Sample, SampleBatch};
use crate::voltage;

/// A converter module with its backend driver.
pub enum AcquisitionModule<M, S> {
    /// Multiplexed on-chip converter.
    Multiplexed(M),
    /// Simultaneous-sampling external converter.
    Simultaneous(S),
}

impl<M, S> AcquisitionModule<M, S>
where
    M: Converter,
    S: Converter,
{
    /// Backend tag of the bound driver.
    pub fn kind(&self) -> ConverterKind {
        match self {
            Self::Multiplexed(_) => M::KIND,
            Self::Simultaneous(_) => S::KIND,
        }
    }

    /// See [`Converter::init_hardware`].
    pub fn init_hardware(&mut self, module: &ModuleConfig) -> Result<(), DriverError> {
        match self {
            Self::Multiplexed(driver) => driver.init_hardware(module),
            Self::Simultaneous(driver) => driver.init_hardware(module),
        }
    }

    /// See [`Converter::write_module_state`].
    pub fn write_module_state(
        &mut self,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        enabled: bool,
    ) -> Result<(), DriverError> {
        match self {
            Self::Multiplexed(driver) => driver.write_module_state(module, channels, enabled),
            Self::Simultaneous(driver) => driver.write_module_state(module, channels, enabled),
        }
    }

    /// See [`Converter::write_channel_state`].
    pub fn write_channel_state(&mut self, channels: &ModuleChannels<'_>) -> Result<(), DriverError> {
        match self {
            Self::Multiplexed(driver) => driver.write_channel_state(channels),
            Self::Simultaneous(driver) => driver.write_channel_state(channels),
        }
    }

    /// See [`Converter::trigger_conversion`].
    pub fn trigger_conversion(
        &mut self,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
    ) -> Result<(), DriverError> {
        match self {
            Self::Multiplexed(driver) => driver.trigger_conversion(module, channels),
            Self::Simultaneous(driver) => driver.trigger_conversion(module, channels),
        }
    }

    /// See [`Converter::read_samples`].
    pub fn read_samples(
        &mut self,
        out: &mut SampleBatch,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        trigger_timestamp: u32,
    ) -> Result<ReadOutcome, DriverError> {
        match self {
            Self::Multiplexed(driver) => driver.read_samples(out, module, channels, trigger_timestamp),
            Self::Simultaneous(driver) => {
                driver.read_samples(out, module, channels, trigger_timestamp)
            }
        }
    }

    /// Convert one of this module's samples to volts.
    pub fn convert_to_voltage(
        &self,
        channel: &Channel,
        runtime: &ChannelRuntime,
        sample: &Sample,
    ) -> f64 {
        voltage::convert_to_voltage(channel, runtime, sample)
    }
}
