//! Power state abstraction
//!
//! The acquisition core only ever asks one question of the power subsystem:
//! "is this supply domain up?". Rail sequencing, charger control and battery
//! monitoring live elsewhere and are not modelled here.

/// Board power state as reported by the power subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Board is powered down; only always-on logic runs.
    Down,
    /// Board logic is up but the external supply rails are off.
    PartialPower,
    /// Board logic and all external rails are up.
    FullPower,
}

impl PowerState {
    /// Returns `true` when the external supply rail may be relied on.
    ///
    /// Both full and partial power count as "up" for rail-gated modules;
    /// a module on a rail that is genuinely off simply fails initialisation
    /// and is retried on the next pass.
    pub const fn rail_available(self) -> bool {
        matches!(self, Self::FullPower | Self::PartialPower)
    }

    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::PartialPower => "partial",
            Self::FullPower => "full",
        }
    }
}

/// Which supply a converter module draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDomain {
    /// Part of the MCU itself; available whenever firmware runs.
    Intrinsic,
    /// Powered from a switched external rail.
    ExternalRail,
}

impl PowerDomain {
    /// Whether a module in this domain may be evaluated under `state`.
    pub const fn is_available(self, state: PowerState) -> bool {
        match self {
            Self::Intrinsic => true,
            Self::ExternalRail => state.rail_available(),
        }
    }
}

/// Read-only view of the board power state.
///
/// Implemented by the power-management task; the acquisition core never
/// mutates power state.
pub trait PowerMonitor {
    /// Current board power state.
    fn power_state(&self) -> PowerState;
}

impl<T: PowerMonitor + ?Sized> PowerMonitor for &T {
    fn power_state(&self) -> PowerState {
        (**self).power_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_domain_ignores_power_state() {
        for state in [PowerState::Down, PowerState::PartialPower, PowerState::FullPower] {
            assert!(PowerDomain::Intrinsic.is_available(state));
        }
    }

    #[test]
    fn external_rail_needs_full_or_partial_power() {
        assert!(!PowerDomain::ExternalRail.is_available(PowerState::Down));
        assert!(PowerDomain::ExternalRail.is_available(PowerState::PartialPower));
        assert!(PowerDomain::ExternalRail.is_available(PowerState::FullPower));
    }
}
