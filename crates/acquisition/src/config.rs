//! Board and runtime configuration.
//!
//! [`BoardConfig`] is the static description of the analog front end:
//! which converter modules exist and how every logical channel is wired to
//! them. It is built once at startup and never mutated.
//!
//! [`RuntimeConfig`] holds what the command interpreter may change while
//! running: enable flags, calibration and ranges. The pipeline only reads a
//! snapshot of it per pass.

use heapless::Vec;
use platform::PowerDomain;

use crate::error::ConfigError;
use crate::sample::BATCH_CAPACITY;

/// Maximum converter modules on one board.
pub const MAX_MODULES: usize = 2;

/// Maximum logical analog channels on one board.
pub const MAX_CHANNELS: usize = 48;

/// Simultaneous-sampling lanes on the AD7609.
pub const AD7609_LANES: u8 = 8;

// ── Static board description ────────────────────────────────────────────────

/// Backend family of a converter module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConverterKind {
    /// On-chip multiplexed 12-bit SAR converter.
    Mc12b,
    /// External 8-lane 18-bit simultaneous-sampling converter.
    Ad7609,
}

impl ConverterKind {
    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mc12b => "MC12b",
            Self::Ad7609 => "AD7609",
        }
    }
}

/// On-chip converter module settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mc12bModule {
    /// SAR modules powered when the converter is enabled (bit n = module n).
    pub sar_mask: u32,
}

/// AD7609 oversampling ratio, set through the OS0/OS1 pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oversampling {
    /// No oversampling
    Off,
    /// 2x
    X2,
    /// 4x
    X4,
    /// 8x
    X8,
}

impl Oversampling {
    /// Levels for the (OS0, OS1) pins.
    pub const fn pins(self) -> (bool, bool) {
        match self {
            Self::Off => (false, false),
            Self::X2 => (true, false),
            Self::X4 => (false, true),
            Self::X8 => (true, true),
        }
    }
}

/// External converter module settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ad7609Module {
    /// ±10 V input range when set, ±5 V otherwise.
    pub range_10v: bool,
    /// Oversampling ratio.
    pub oversampling: Oversampling,
    /// Start the next conversion as soon as a result has been read.
    ///
    /// The board relies on this to keep the converter sampling between
    /// timer triggers; without it every other trigger finds the module busy.
    pub retrigger_on_read: bool,
}

/// Backend-specific module settings; the variant is the module's backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleVariant {
    /// On-chip multiplexed converter
    Mc12b(Mc12bModule),
    /// External simultaneous-sampling converter
    Ad7609(Ad7609Module),
}

impl ModuleVariant {
    /// Backend tag.
    pub const fn kind(&self) -> ConverterKind {
        match self {
            Self::Mc12b(_) => ConverterKind::Mc12b,
            Self::Ad7609(_) => ConverterKind::Ad7609,
        }
    }
}

/// One physical converter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Name used in diagnostics.
    pub name: &'static str,
    /// Backend and its settings.
    pub variant: ModuleVariant,
    /// Supply the module depends on.
    pub power_domain: PowerDomain,
}

impl ModuleConfig {
    /// Backend tag.
    pub const fn kind(&self) -> ConverterKind {
        self.variant.kind()
    }
}

/// Wiring of a channel on the on-chip converter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mc12bChannel {
    /// Hardware input number (`ADCHS_CHn`).
    pub input: u8,
    /// SAR module(s) sampling this input.
    pub sar_mask: u32,
    /// Input owns a dedicated SAR module (otherwise shared scan).
    pub dedicated: bool,
    /// Front-end divider ratio folded into the voltage.
    pub internal_scale: f64,
    /// Converter full scale in codes.
    pub resolution: u32,
}

/// Wiring of a channel on the AD7609.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ad7609Channel {
    /// Converter lane 0..=7.
    pub lane: u8,
}

/// Backend-specific channel wiring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelWiring {
    /// On-chip converter input
    Mc12b(Mc12bChannel),
    /// AD7609 lane
    Ad7609(Ad7609Channel),
}

impl ChannelWiring {
    /// Backend tag the wiring belongs to.
    pub const fn kind(&self) -> ConverterKind {
        match self {
            Self::Mc12b(_) => ConverterKind::Mc12b,
            Self::Ad7609(_) => ConverterKind::Ad7609,
        }
    }
}

/// Immutable description of one logical analog channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    /// Stable logical id reported in packets.
    pub id: u8,
    /// Index of the owning module in [`BoardConfig::modules`].
    pub module: u8,
    /// Physical wiring.
    pub wiring: ChannelWiring,
}

/// Static analog front-end description.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    modules: Vec<ModuleConfig, MAX_MODULES>,
    channels: Vec<Channel, MAX_CHANNELS>,
}

impl BoardConfig {
    /// Build and validate a board description.
    pub fn new(modules: &[ModuleConfig], channels: &[Channel]) -> Result<Self, ConfigError> {
        let board = Self {
            modules: Vec::from_slice(modules).map_err(|_| ConfigError::TooManyModules)?,
            channels: Vec::from_slice(channels).map_err(|_| ConfigError::TooManyChannels)?,
        };
        board.validate()?;
        Ok(board)
    }

    /// Check that every channel points at an existing module of the same
    /// backend, ids are unique, lanes exist and no module owns more channels
    /// than one [`SampleBatch`](crate::sample::SampleBatch) holds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (position, channel) in self.channels.iter().enumerate() {
            let module = self
                .module(channel.module)
                .ok_or(ConfigError::UnknownModule {
                    channel: channel.id,
                    module: channel.module,
                })?;
            if module.kind() != channel.wiring.kind() {
                return Err(ConfigError::VariantMismatch {
                    channel: channel.id,
                    module: channel.module,
                });
            }
            if let ChannelWiring::Ad7609(Ad7609Channel { lane }) = channel.wiring {
                if lane >= AD7609_LANES {
                    return Err(ConfigError::LaneOutOfRange {
                        channel: channel.id,
                        lane,
                    });
                }
            }
            if self
                .channels
                .iter()
                .skip(position.saturating_add(1))
                .any(|other| other.id == channel.id)
            {
                return Err(ConfigError::DuplicateChannel { channel: channel.id });
            }
        }
        for index in 0..self.modules.len() {
            let owned = self
                .channels
                .iter()
                .filter(|channel| usize::from(channel.module) == index)
                .count();
            if owned > BATCH_CAPACITY {
                return Err(ConfigError::BatchOverflow {
                    module: saturate_u8(index),
                    channels: saturate_u8(owned),
                });
            }
        }
        Ok(())
    }

    /// All modules, in index order.
    pub fn modules(&self) -> &[ModuleConfig] {
        &self.modules
    }

    /// All channels, in configuration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Module by index.
    pub fn module(&self, index: u8) -> Option<&ModuleConfig> {
        self.modules.get(usize::from(index))
    }

    /// Channel by logical id, with its position (the runtime index).
    pub fn channel(&self, id: u8) -> Option<(usize, &Channel)> {
        self.channels.iter().enumerate().find(|(_, c)| c.id == id)
    }

    /// NQ3 board: on-chip converter for board monitoring, AD7609 for the
    /// eight user inputs.
    pub fn nq3() -> Result<Self, ConfigError> {
        const MONITOR_SAR: u32 = 1 << 7;

        fn monitor(id: u8, input: u8, internal_scale: f64) -> Channel {
            Channel {
                id,
                module: 0,
                wiring: ChannelWiring::Mc12b(Mc12bChannel {
                    input,
                    sar_mask: MONITOR_SAR,
                    dedicated: false,
                    internal_scale,
                    resolution: 4096,
                }),
            }
        }

        fn user(id: u8, lane: u8) -> Channel {
            Channel {
                id,
                module: 1,
                wiring: ChannelWiring::Ad7609(Ad7609Channel { lane }),
            }
        }

        let modules = [
            ModuleConfig {
                name: "mc12b",
                variant: ModuleVariant::Mc12b(Mc12bModule {
                    sar_mask: MONITOR_SAR,
                }),
                power_domain: PowerDomain::Intrinsic,
            },
            ModuleConfig {
                name: "ad7609",
                variant: ModuleVariant::Ad7609(Ad7609Module {
                    range_10v: true,
                    oversampling: Oversampling::Off,
                    retrigger_on_read: true,
                }),
                power_domain: PowerDomain::ExternalRail,
            },
        ];

        // User inputs 0-7 land on lanes 4-7 then 0-3 (PCB routing).
        let channels = [
            user(0, 4),
            user(1, 5),
            user(2, 6),
            user(3, 7),
            user(4, 0),
            user(5, 1),
            user(6, 2),
            user(7, 3),
            monitor(channel_ids::RAIL_3V3, 19, 1.0),
            monitor(channel_ids::VREF_2V5, 31, 1.0),
            monitor(channel_ids::VBATT, 30, 1.0),
            monitor(channel_ids::RAIL_5V, 42, 2.166_666_666_67),
            monitor(channel_ids::RAIL_10V, 32, 3.905),
            monitor(channel_ids::TEMPERATURE, 44, 1.0),
            monitor(channel_ids::VREF_5V, 29, 2.166_666_666_67),
            monitor(channel_ids::VSYS, 41, 1.409_090_909_091),
        ];

        Self::new(&modules, &channels)
    }
}

#[allow(clippy::cast_possible_truncation)] // Safety: clamped to u8::MAX first
fn saturate_u8(n: usize) -> u8 {
    n.min(usize::from(u8::MAX)) as u8
}

/// Logical ids of the board monitoring channels.
pub mod channel_ids {
    /// +3.3 V rail
    pub const RAIL_3V3: u8 = 248;
    /// 2.5 V reference
    pub const VREF_2V5: u8 = 249;
    /// Battery
    pub const VBATT: u8 = 250;
    /// +5 V protected rail
    pub const RAIL_5V: u8 = 251;
    /// +10 V protected rail
    pub const RAIL_10V: u8 = 252;
    /// On-board temperature sensor
    pub const TEMPERATURE: u8 = 253;
    /// System power
    pub const VSYS: u8 = 254;
    /// 5 V reference
    pub const VREF_5V: u8 = 255;
}

// ── Runtime state ───────────────────────────────────────────────────────────

/// Mutable per-channel state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelRuntime {
    /// Channel is sampled and streamed.
    pub enabled: bool,
    /// Calibration slope.
    pub cal_m: f64,
    /// Calibration intercept in volts.
    pub cal_b: f64,
    /// Last applied input range in volts.
    pub range: f64,
}

impl ChannelRuntime {
    /// Disabled, uncalibrated channel on `range`.
    pub fn new(range: f64) -> Self {
        Self {
            enabled: false,
            cal_m: 1.0,
            cal_b: 0.0,
            range,
        }
    }
}

/// Mutable per-module state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleRuntime {
    /// Administrative enable.
    pub enabled: bool,
}

/// Digital I/O port runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DioRuntime {
    /// Scanning of the port is on.
    pub enabled: bool,
    /// Input pins included in each digital sample.
    pub input_mask: u32,
    /// Pin directions (bit set = output), reported in packets.
    pub direction_mask: u32,
}

/// Everything the command interpreter may change at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// One entry per [`BoardConfig::modules`] entry.
    pub modules: Vec<ModuleRuntime, MAX_MODULES>,
    /// One entry per [`BoardConfig::channels`] entry, same order.
    pub channels: Vec<ChannelRuntime, MAX_CHANNELS>,
    /// Digital port.
    pub dio: DioRuntime,
    /// Streaming session active; triggers are only issued while set.
    pub streaming: bool,
}

/// Default range for a module's channels, in volts.
fn default_range(variant: &ModuleVariant) -> f64 {
    match variant {
        ModuleVariant::Mc12b(_) => 5.0,
        ModuleVariant::Ad7609(Ad7609Module { range_10v: true, .. }) => 10.0,
        ModuleVariant::Ad7609(_) => 5.0,
    }
}

impl RuntimeConfig {
    /// All modules enabled, all channels disabled and uncalibrated.
    pub fn defaults_for(board: &BoardConfig) -> Self {
        let mut modules = Vec::new();
        for _ in board.modules() {
            // Lengths are bounded by the board's own capacity.
            let _ = modules.push(ModuleRuntime { enabled: true });
        }
        let mut channels = Vec::new();
        for channel in board.channels() {
            let range = board
                .module(channel.module)
                .map_or(0.0, |m| default_range(&m.variant));
            let _ = channels.push(ChannelRuntime::new(range));
        }
        Self {
            modules,
            channels,
            dio: DioRuntime::default(),
            streaming: false,
        }
    }

    /// NQ3 defaults: monitoring channels on, user inputs off.
    pub fn nq3(board: &BoardConfig) -> Self {
        let mut runtime = Self::defaults_for(board);
        for (channel, state) in board.channels().iter().zip(runtime.channels.iter_mut()) {
            state.enabled = matches!(channel.wiring, ChannelWiring::Mc12b(_));
        }
        runtime
    }

    /// Check this runtime state lines up with `board`.
    pub fn check_shape(&self, board: &BoardConfig) -> Result<(), ConfigError> {
        if self.modules.len() == board.modules().len()
            && self.channels.len() == board.channels().len()
        {
            Ok(())
        } else {
            Err(ConfigError::RuntimeShape)
        }
    }

    /// Enable or disable a channel by logical id. Returns `false` if unknown.
    pub fn set_channel_enabled(&mut self, board: &BoardConfig, id: u8, enabled: bool) -> bool {
        let Some(state) = self.channel_mut(board, id) else {
            return false;
        };
        state.enabled = enabled;
        true
    }

    /// Set calibration of a channel by logical id. Returns `false` if unknown.
    pub fn set_calibration(&mut self, board: &BoardConfig, id: u8, cal_m: f64, cal_b: f64) -> bool {
        let Some(state) = self.channel_mut(board, id) else {
            return false;
        };
        state.cal_m = cal_m;
        state.cal_b = cal_b;
        true
    }

    /// Apply a new range to every channel of `module`.
    pub fn set_module_range(&mut self, board: &BoardConfig, module: u8, range: f64) {
        for (channel, state) in board.channels().iter().zip(self.channels.iter_mut()) {
            if channel.module == module {
                state.range = range;
            }
        }
    }

    /// Administratively enable or disable a module.
    pub fn set_module_enabled(&mut self, module: u8, enabled: bool) -> bool {
        let Some(state) = self.modules.get_mut(usize::from(module)) else {
            return false;
        };
        state.enabled = enabled;
        true
    }

    fn channel_mut(&mut self, board: &BoardConfig, id: u8) -> Option<&mut ChannelRuntime> {
        let (position, _) = board.channel(id)?;
        self.channels.get_mut(position)
    }
}
