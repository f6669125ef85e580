//! Error types for the acquisition pipeline.

use thiserror_no_std::Error;

use crate::lifecycle::ModuleState;

/// Converter driver failure.
///
/// Every variant means "this cycle produced no data"; callers log it and
/// move on. Nothing here is retried mid-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// BUSY line asserted: a conversion is still running.
    #[error("converter busy")]
    Busy,
    /// Module is administratively disabled or powered down.
    #[error("module not enabled")]
    NotEnabled,
    /// `init_hardware` has not completed since the last power-up.
    #[error("module not initialised")]
    NotInitialised,
    /// Bus transaction or peripheral register access failed.
    #[error("bus transaction failed")]
    Bus,
    /// A control line could not be driven or read.
    #[error("control line access failed")]
    Pin,
    /// The read completed but no enabled channel had a result.
    #[error("no channel produced data")]
    NoData,
    /// Module configuration is not meant for this driver.
    #[error("configuration does not match driver")]
    WrongVariant,
}

impl DriverError {
    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::NotEnabled => "not enabled",
            Self::NotInitialised => "not initialised",
            Self::Bus => "bus",
            Self::Pin => "pin",
            Self::NoData => "no data",
            Self::WrongVariant => "wrong variant",
        }
    }
}

/// Board configuration rejected at startup.
///
/// This is the only fatal error class in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A channel names a module index that does not exist.
    #[error("channel {channel} references missing module {module}")]
    UnknownModule {
        /// Logical channel id
        channel: u8,
        /// Module index it points at
        module: u8,
    },
    /// A channel's wiring is for a different converter than its module.
    #[error("channel {channel} wiring does not match module {module}")]
    VariantMismatch {
        /// Logical channel id
        channel: u8,
        /// Module index it points at
        module: u8,
    },
    /// Two channels share one logical id.
    #[error("duplicate channel id {channel}")]
    DuplicateChannel {
        /// The repeated id
        channel: u8,
    },
    /// An AD7609 lane outside 0..=7.
    #[error("channel {channel} uses lane {lane} beyond the converter")]
    LaneOutOfRange {
        /// Logical channel id
        channel: u8,
        /// Offending lane
        lane: u8,
    },
    /// More modules than [`crate::config::MAX_MODULES`].
    #[error("too many modules")]
    TooManyModules,
    /// More channels than [`crate::config::MAX_CHANNELS`].
    #[error("too many channels")]
    TooManyChannels,
    /// A module owns more channels than one sample batch holds.
    #[error("module {module} has {channels} channels, more than a batch holds")]
    BatchOverflow {
        /// Module index
        module: u8,
        /// Channels wired to it
        channels: u8,
    },
    /// Runtime configuration does not line up with the board.
    #[error("runtime configuration shape does not match board")]
    RuntimeShape,
    /// Number of converter instances differs from configured modules.
    #[error("expected {expected} converters, got {actual}")]
    ModuleCountMismatch {
        /// Modules in the board configuration
        expected: u8,
        /// Converters supplied
        actual: u8,
    },
    /// A converter instance is of a different kind than its module.
    #[error("converter for module {module} is the wrong kind")]
    BackendMismatch {
        /// Module index
        module: u8,
    },
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleError {
    /// Trigger requested outside `Idle`.
    #[error("module is not idle")]
    NotIdle(ModuleState),
    /// Init completion reported while not initialising.
    #[error("module is not initialising")]
    NotInitializing(ModuleState),
}
