//! Register-level interface of the on-chip multiplexed ADC
//!
//! The internal converter is a set of SAR modules fed through an analog
//! multiplexer. Dedicated modules sample a single input; the shared module
//! scans several inputs. The acquisition driver only needs the operations
//! below, so the concrete HAL binding stays outside this workspace.

/// On-chip SAR ADC register interface.
///
/// Channel arguments are hardware input numbers (`ADCHS_CHn`), module masks
/// have bit `n` set for SAR module `n`.
pub trait AdcPeripheral {
    /// Error type
    type Error: core::fmt::Debug;

    /// Copy factory calibration words into the SAR modules.
    fn load_factory_calibration(&mut self) -> Result<(), Self::Error>;

    /// Power the analog bias circuitry and wait until it reports ready.
    fn set_analog_bias(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Enable or disable (clock gate) the SAR modules in `mask`.
    fn set_modules_enabled(&mut self, mask: u32, enabled: bool) -> Result<(), Self::Error>;

    /// Enable or disable the result-ready interrupt of one input.
    fn set_result_interrupt(&mut self, channel: u8, enabled: bool) -> Result<(), Self::Error>;

    /// Start a software-triggered conversion of one input.
    fn start_conversion(&mut self, channel: u8) -> Result<(), Self::Error>;

    /// Whether a new result is latched for `channel`.
    fn is_result_ready(&mut self, channel: u8) -> bool;

    /// Read the latched result; clears the ready flag.
    fn read_result(&mut self, channel: u8) -> u32;
}
