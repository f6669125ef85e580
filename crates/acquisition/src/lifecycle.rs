//! Per-module lifecycle state machine.
//!
//! ```text
//!              init ok                trigger          started
//! Initializing ───────▶ Idle ───────▶ ConvStart ───────▶ Busy
//!      ▲   │ init failed  ▲               │ failed          │ completion
//!      │   └──(stay)      ├───────────────┘                 ▼
//!      │                  └──────────────────────────── ConvComplete
//!      │ power back / re-enabled                  (drained, or Busy again
//!      │                                           when the read retriggers)
//!   Disabled ◀── any state when the rail drops or the module is disabled
//! ```
//!
//! Pure state machine: no hardware access. The acquisition engine drives it
//! and performs the I/O each transition implies.

use platform::{PowerDomain, PowerState};

use crate::error::LifecycleError;

/// Scan passes a module may sit in `ConvStart`/`Busy` without a completion
/// before it is forced back to `Idle`.
pub const STALE_BUSY_PASSES: u8 = 8;

/// Lifecycle state of one converter module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleState {
    /// Waiting for a successful `init_hardware`.
    Initializing,
    /// Ready for a trigger.
    Idle,
    /// Trigger being issued.
    ConvStart,
    /// Conversion running.
    Busy,
    /// Completion signalled, results being drained.
    ConvComplete,
    /// Powered down or administratively disabled; skipped by the scan.
    Disabled,
}

impl ModuleState {
    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::ConvStart => "convstart",
            Self::Busy => "busy",
            Self::ConvComplete => "convcomplete",
            Self::Disabled => "disabled",
        }
    }
}

/// What the periodic scan must do for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    /// Module is disabled; nothing to do.
    Skip,
    /// Module just became disabled, coming from `from`.
    Disable {
        /// State before the transition.
        from: ModuleState,
    },
    /// Module needs `init_hardware` (first attempt or retry).
    Initialize,
    /// Module was stuck waiting for a completion and has been reset to idle.
    RecoveredStale,
    /// Module is operational.
    Ready,
}

/// Lifecycle of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLifecycle {
    state: ModuleState,
    init_failures: u32,
    stale_passes: u8,
}

impl Default for ModuleLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLifecycle {
    /// New module, waiting for initialisation.
    pub const fn new() -> Self {
        Self {
            state: ModuleState::Initializing,
            init_failures: 0,
            stale_passes: 0,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ModuleState {
        self.state
    }

    /// Consecutive failed initialisation attempts.
    pub const fn init_failures(&self) -> u32 {
        self.init_failures
    }

    /// Whether `init_hardware` has succeeded since the last disable.
    pub const fn is_initialised(&self) -> bool {
        !matches!(self.state, ModuleState::Initializing | ModuleState::Disabled)
    }

    /// Periodic scan step: apply power and enable gating.
    ///
    /// An intrinsic module is evaluated whatever the power state; a module on
    /// an external rail only while the rail is up.
    pub fn evaluate(&mut self, domain: PowerDomain, power: PowerState, enabled: bool) -> ScanAction {
        if !enabled || !domain.is_available(power) {
            let from = self.state;
            self.state = ModuleState::Disabled;
            self.stale_passes = 0;
            return if from == ModuleState::Disabled {
                ScanAction::Skip
            } else {
                ScanAction::Disable { from }
            };
        }

        match self.state {
            ModuleState::Disabled => {
                self.state = ModuleState::Initializing;
                ScanAction::Initialize
            }
            ModuleState::Initializing => ScanAction::Initialize,
            ModuleState::ConvStart | ModuleState::Busy => {
                self.stale_passes = self.stale_passes.saturating_add(1);
                if self.stale_passes > STALE_BUSY_PASSES {
                    self.state = ModuleState::Idle;
                    self.stale_passes = 0;
                    ScanAction::RecoveredStale
                } else {
                    ScanAction::Ready
                }
            }
            ModuleState::Idle | ModuleState::ConvComplete => ScanAction::Ready,
        }
    }

    /// `init_hardware` and channel setup succeeded.
    pub fn init_succeeded(&mut self) -> Result<(), LifecycleError> {
        if self.state != ModuleState::Initializing {
            return Err(LifecycleError::NotInitializing(self.state));
        }
        self.state = ModuleState::Idle;
        self.init_failures = 0;
        Ok(())
    }

    /// `init_hardware` failed; stay in `Initializing` until the next pass.
    pub fn init_failed(&mut self) {
        self.init_failures = self.init_failures.saturating_add(1);
    }

    /// Claim the module for a trigger. Rejected unless `Idle`.
    pub fn begin_trigger(&mut self) -> Result<(), LifecycleError> {
        if self.state != ModuleState::Idle {
            return Err(LifecycleError::NotIdle(self.state));
        }
        self.state = ModuleState::ConvStart;
        Ok(())
    }

    /// Start-of-conversion was asserted.
    pub fn trigger_started(&mut self) {
        if self.state == ModuleState::ConvStart {
            self.state = ModuleState::Busy;
            self.stale_passes = 0;
        }
    }

    /// Start-of-conversion could not be asserted.
    pub fn trigger_failed(&mut self) {
        if self.state == ModuleState::ConvStart {
            self.state = ModuleState::Idle;
        }
    }

    /// Completion signalled. Returns `false` if no conversion was running.
    pub fn complete(&mut self) -> bool {
        if self.state != ModuleState::Busy {
            return false;
        }
        self.state = ModuleState::ConvComplete;
        self.stale_passes = 0;
        true
    }

    /// Results drained. A read that started the next conversion leaves the
    /// module `Busy`.
    pub fn drained(&mut self, retriggered: bool) {
        if self.state == ModuleState::ConvComplete {
            self.state = if retriggered {
                ModuleState::Busy
            } else {
                ModuleState::Idle
            };
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn idle() -> ModuleLifecycle {
        let mut lifecycle = ModuleLifecycle::new();
        assert_eq!(
            lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::FullPower, true),
            ScanAction::Initialize
        );
        lifecycle.init_succeeded().unwrap();
        lifecycle
    }

    // ── Conversion cycle ────────────────────────────────────────────────────

    #[test]
    fn full_conversion_cycle() {
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        assert_eq!(lifecycle.state(), ModuleState::ConvStart);
        lifecycle.trigger_started();
        assert_eq!(lifecycle.state(), ModuleState::Busy);
        assert!(lifecycle.complete());
        assert_eq!(lifecycle.state(), ModuleState::ConvComplete);
        lifecycle.drained(false);
        assert_eq!(lifecycle.state(), ModuleState::Idle);
    }

    #[test]
    fn retriggering_read_stays_busy() {
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        lifecycle.trigger_started();
        assert!(lifecycle.complete());
        lifecycle.drained(true);
        assert_eq!(lifecycle.state(), ModuleState::Busy);
        assert!(lifecycle.complete(), "next completion is accepted");
    }

    #[test]
    fn failed_trigger_returns_to_idle() {
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        lifecycle.trigger_failed();
        assert_eq!(lifecycle.state(), ModuleState::Idle);
    }

    #[test]
    fn trigger_rejected_outside_idle() {
        let mut lifecycle = ModuleLifecycle::new();
        assert_eq!(
            lifecycle.begin_trigger(),
            Err(LifecycleError::NotIdle(ModuleState::Initializing))
        );
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        lifecycle.trigger_started();
        assert_eq!(
            lifecycle.begin_trigger(),
            Err(LifecycleError::NotIdle(ModuleState::Busy))
        );
    }

    #[test]
    fn spurious_completion_is_ignored() {
        let mut lifecycle = idle();
        assert!(!lifecycle.complete());
        assert_eq!(lifecycle.state(), ModuleState::Idle);
    }

    // ── Initialisation ──────────────────────────────────────────────────────

    #[test]
    fn init_failure_stays_initializing_and_retries() {
        let mut lifecycle = ModuleLifecycle::new();
        for attempt in 1..=3 {
            assert_eq!(
                lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::FullPower, true),
                ScanAction::Initialize
            );
            lifecycle.init_failed();
            assert_eq!(lifecycle.state(), ModuleState::Initializing);
            assert_eq!(lifecycle.init_failures(), attempt);
        }
        lifecycle.init_succeeded().unwrap();
        assert_eq!(lifecycle.init_failures(), 0);
    }

    // ── Power gating ────────────────────────────────────────────────────────

    #[test]
    fn rail_drop_disables_from_any_state() {
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        lifecycle.trigger_started();
        assert_eq!(
            lifecycle.evaluate(PowerDomain::ExternalRail, PowerState::Down, true),
            ScanAction::Disable {
                from: ModuleState::Busy
            }
        );
        assert_eq!(lifecycle.state(), ModuleState::Disabled);
        assert_eq!(
            lifecycle.evaluate(PowerDomain::ExternalRail, PowerState::Down, true),
            ScanAction::Skip
        );
    }

    #[test]
    fn power_return_reinitialises() {
        let mut lifecycle = idle();
        lifecycle.evaluate(PowerDomain::ExternalRail, PowerState::Down, true);
        assert_eq!(
            lifecycle.evaluate(PowerDomain::ExternalRail, PowerState::PartialPower, true),
            ScanAction::Initialize
        );
        assert_eq!(lifecycle.state(), ModuleState::Initializing);
    }

    #[test]
    fn intrinsic_module_ignores_power_but_not_enable() {
        let mut lifecycle = idle();
        assert_eq!(
            lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::Down, true),
            ScanAction::Ready
        );
        assert_eq!(
            lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::FullPower, false),
            ScanAction::Disable {
                from: ModuleState::Idle
            }
        );
    }

    #[test]
    fn stuck_busy_module_recovers() {
        let mut lifecycle = idle();
        lifecycle.begin_trigger().unwrap();
        lifecycle.trigger_started();
        for _ in 0..STALE_BUSY_PASSES {
            assert_eq!(
                lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::FullPower, true),
                ScanAction::Ready
            );
        }
        assert_eq!(
            lifecycle.evaluate(PowerDomain::Intrinsic, PowerState::FullPower, true),
            ScanAction::RecoveredStale
        );
        assert_eq!(lifecycle.state(), ModuleState::Idle);
    }
}
