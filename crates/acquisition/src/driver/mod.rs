//! Converter backend drivers.
//!
//! Every backend implements [`Converter`], the one operation set the rest of
//! the pipeline uses. Which backend a module runs is decided once, when the
//! engine is built, by [`crate::module::AcquisitionModule`].

pub mod ad7609;
pub mod mc12b;

pub use ad7609::{Ad7609, Ad7609Pins};
pub use mc12b::Mc12bAdc;

use crate::config::{Channel, ChannelRuntime, ConverterKind, ModuleConfig};
use crate::error::DriverError;
use crate::sample::SampleBatch;

/// Channels of one module together with their runtime state.
#[derive(Debug, Clone, Copy)]
pub struct ModuleChannels<'a> {
    module: u8,
    channels: &'a [Channel],
    runtime: &'a [ChannelRuntime],
}

impl<'a> ModuleChannels<'a> {
    /// View of `module`'s channels. `runtime` is indexed like `channels`.
    pub fn new(module: u8, channels: &'a [Channel], runtime: &'a [ChannelRuntime]) -> Self {
        Self {
            module,
            channels,
            runtime,
        }
    }

    /// Module index this view selects.
    pub fn module(&self) -> u8 {
        self.module
    }

    /// Every channel of the module, in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a Channel, &'a ChannelRuntime)> + 'a {
        let module = self.module;
        self.channels
            .iter()
            .zip(self.runtime.iter())
            .filter(move |(channel, _)| channel.module == module)
    }

    /// Enabled channels of the module, in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &'a Channel> + 'a {
        self.iter()
            .filter(|(_, runtime)| runtime.enabled)
            .map(|(channel, _)| channel)
    }
}

/// Result of a successful [`Converter::read_samples`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// The read also started the next conversion.
    pub retriggered: bool,
}

/// Uniform driver contract for every converter backend.
pub trait Converter {
    /// Backend this driver implements.
    const KIND: ConverterKind;

    /// Configure bus peripherals and control lines. Not idempotent: call once
    /// per power-up.
    fn init_hardware(&mut self, module: &ModuleConfig) -> Result<(), DriverError>;

    /// Apply the module enable state to hardware (clock gating, standby).
    fn write_module_state(
        &mut self,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        enabled: bool,
    ) -> Result<(), DriverError>;

    /// Apply per-channel enable state to hardware (interrupts, SAR modules).
    fn write_channel_state(&mut self, channels: &ModuleChannels<'_>) -> Result<(), DriverError>;

    /// Assert start-of-conversion. Fails if busy or not enabled; never waits
    /// for the conversion to finish.
    fn trigger_conversion(
        &mut self,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
    ) -> Result<(), DriverError>;

    /// Retrieve one scan: one sample per enabled channel with a result,
    /// every sample stamped with `trigger_timestamp`.
    fn read_samples(
        &mut self,
        out: &mut SampleBatch,
        module: &ModuleConfig,
        channels: &ModuleChannels<'_>,
        trigger_timestamp: u32,
    ) -> Result<ReadOutcome, DriverError>;
}
