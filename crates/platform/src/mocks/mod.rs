//! Mock implementations for testing
//!
//! Host-side fakes for every platform trait. Mocks that end up owned by a
//! driver take a shared `*Script` by reference, so a test keeps a handle to
//! inspect and steer the hardware while the driver owns the mock.
//!
//! The `embedded-hal` lines of external converters are mocked with
//! `embedded-hal-mock` in the tests that drive them.

#![cfg(any(test, feature = "std"))]

use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use crate::{
    AdcPeripheral, InterruptLine, PinGroup, PowerMonitor, PowerState,
    TimestampCounter, TransportSink,
};

// ── Internal ADC ────────────────────────────────────────────────────────────

/// Number of hardware inputs the mock ADC models.
pub const MOCK_ADC_INPUTS: usize = 64;

/// Shared state behind [`MockAdc`].
pub struct AdcScript {
    latched: RefCell<[Option<u32>; MOCK_ADC_INPUTS]>,
    started: Cell<u64>,
    conversions: Cell<u32>,
    interrupts: Cell<u64>,
    modules: Cell<u32>,
    bias: Cell<bool>,
    calibrated: Cell<bool>,
    fail_calibration: Cell<bool>,
}

impl Default for AdcScript {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcScript {
    /// Fresh ADC: nothing enabled, nothing latched.
    pub fn new() -> Self {
        Self {
            latched: RefCell::new([None; MOCK_ADC_INPUTS]),
            started: Cell::new(0),
            conversions: Cell::new(0),
            interrupts: Cell::new(0),
            modules: Cell::new(0),
            bias: Cell::new(false),
            calibrated: Cell::new(false),
            fail_calibration: Cell::new(false),
        }
    }

    /// Latch a conversion result as if the hardware had finished.
    pub fn latch(&self, channel: u8, value: u32) {
        if let Some(slot) = self.latched.borrow_mut().get_mut(usize::from(channel)) {
            *slot = Some(value);
        }
    }

    /// Make the next calibration load fail.
    pub fn fail_calibration(&self, fail: bool) {
        self.fail_calibration.set(fail);
    }

    /// Bitmask of inputs a conversion was started on.
    pub fn started_mask(&self) -> u64 {
        self.started.get()
    }

    /// Total conversions started.
    pub fn conversions(&self) -> u32 {
        self.conversions.get()
    }

    /// Bitmask of inputs with the result interrupt enabled.
    pub fn interrupt_mask(&self) -> u64 {
        self.interrupts.get()
    }

    /// Bitmask of enabled SAR modules.
    pub fn module_mask(&self) -> u32 {
        self.modules.get()
    }

    /// Whether analog bias is on.
    pub fn bias_enabled(&self) -> bool {
        self.bias.get()
    }

    /// Whether factory calibration was loaded.
    pub fn calibrated(&self) -> bool {
        self.calibrated.get()
    }
}

/// Error returned by the mock peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockHardwareError;

/// Mock on-chip ADC driven by an [`AdcScript`].
pub struct MockAdc<'a> {
    script: &'a AdcScript,
}

impl<'a> MockAdc<'a> {
    /// Bind a mock ADC to its script.
    pub fn new(script: &'a AdcScript) -> Self {
        Self { script }
    }
}

fn set_bit64(cell: &Cell<u64>, bit: u8, on: bool) {
    let mask = 1u64.checked_shl(u32::from(bit)).unwrap_or(0);
    if on {
        cell.set(cell.get() | mask);
    } else {
        cell.set(cell.get() & !mask);
    }
}

impl AdcPeripheral for MockAdc<'_> {
    type Error = MockHardwareError;

    fn load_factory_calibration(&mut self) -> Result<(), Self::Error> {
        if self.script.fail_calibration.get() {
            return Err(MockHardwareError);
        }
        self.script.calibrated.set(true);
        Ok(())
    }

    fn set_analog_bias(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.script.bias.set(enabled);
        Ok(())
    }

    fn set_modules_enabled(&mut self, mask: u32, enabled: bool) -> Result<(), Self::Error> {
        let current = self.script.modules.get();
        self.script
            .modules
            .set(if enabled { current | mask } else { current & !mask });
        Ok(())
    }

    fn set_result_interrupt(&mut self, channel: u8, enabled: bool) -> Result<(), Self::Error> {
        set_bit64(&self.script.interrupts, channel, enabled);
        Ok(())
    }

    fn start_conversion(&mut self, channel: u8) -> Result<(), Self::Error> {
        set_bit64(&self.script.started, channel, true);
        self.script
            .conversions
            .set(self.script.conversions.get().saturating_add(1));
        Ok(())
    }

    fn is_result_ready(&mut self, channel: u8) -> bool {
        self.script
            .latched
            .borrow()
            .get(usize::from(channel))
            .is_some_and(Option::is_some)
    }

    fn read_result(&mut self, channel: u8) -> u32 {
        self.script
            .latched
            .borrow_mut()
            .get_mut(usize::from(channel))
            .and_then(Option::take)
            .unwrap_or(0)
    }
}

// ── Interrupts & digital port ───────────────────────────────────────────────

/// Interrupt line that counts acknowledgements.
#[derive(Debug, Default)]
pub struct MockInterruptLine {
    cleared: u32,
}

impl MockInterruptLine {
    /// Line with nothing acknowledged yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acknowledgements.
    pub fn cleared(&self) -> u32 {
        self.cleared
    }
}

impl InterruptLine for MockInterruptLine {
    fn clear_interrupt(&mut self) {
        self.cleared = self.cleared.saturating_add(1);
    }
}

/// Digital I/O port backed by a plain word.
#[derive(Debug, Default)]
pub struct MockPinGroup {
    value: Cell<u32>,
}

impl MockPinGroup {
    /// Port reading `value`.
    pub fn new(value: u32) -> Self {
        Self {
            value: Cell::new(value),
        }
    }

    /// Change the input levels.
    pub fn set(&self, value: u32) {
        self.value.set(value);
    }
}

impl PinGroup for MockPinGroup {
    type Error = Infallible;

    fn read(&self) -> Result<u32, Self::Error> {
        Ok(self.value.get())
    }
}

// ── Power & time ────────────────────────────────────────────────────────────

/// Power monitor whose state the test sets directly.
#[derive(Debug)]
pub struct MockPower {
    state: Cell<PowerState>,
}

impl MockPower {
    /// Monitor reporting `state`.
    pub fn new(state: PowerState) -> Self {
        Self {
            state: Cell::new(state),
        }
    }

    /// Change the reported state.
    pub fn set(&self, state: PowerState) {
        self.state.set(state);
    }
}

impl PowerMonitor for MockPower {
    fn power_state(&self) -> PowerState {
        self.state.get()
    }
}

/// Manually advanced timestamp counter.
#[derive(Debug)]
pub struct MockTimestamp {
    now: Cell<u32>,
    frequency_hz: u32,
}

impl MockTimestamp {
    /// Counter at `start` ticking at `frequency_hz`.
    pub fn new(start: u32, frequency_hz: u32) -> Self {
        Self {
            now: Cell::new(start),
            frequency_hz,
        }
    }

    /// Jump to `ticks`.
    pub fn set(&self, ticks: u32) {
        self.now.set(ticks);
    }

    /// Move forward by `ticks` (wrapping).
    pub fn advance(&self, ticks: u32) {
        self.now.set(self.now.get().wrapping_add(ticks));
    }
}

impl TimestampCounter for MockTimestamp {
    fn now(&self) -> u32 {
        self.now.get()
    }

    fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }
}

// ── Transport ───────────────────────────────────────────────────────────────

/// Transport sink with a test-controlled free-space limit.
pub struct MockSink<const N: usize> {
    limit: Cell<usize>,
    data: RefCell<heapless::Vec<u8, N>>,
    appends: Cell<u32>,
}

impl<const N: usize> MockSink<N> {
    /// Sink reporting at most `limit` bytes free.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: Cell::new(limit),
            data: RefCell::new(heapless::Vec::new()),
            appends: Cell::new(0),
        }
    }

    /// Change the free-space limit.
    pub fn set_limit(&self, limit: usize) {
        self.limit.set(limit);
    }

    /// Successful appends so far.
    pub fn appends(&self) -> u32 {
        self.appends.get()
    }

    /// Run `f` over everything appended so far.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.borrow())
    }

    /// Forget recorded bytes (transport drained them).
    pub fn clear(&self) {
        self.data.borrow_mut().clear();
    }
}

impl<const N: usize> TransportSink for MockSink<N> {
    fn free_space(&self) -> usize {
        let room = N.saturating_sub(self.data.borrow().len());
        room.min(self.limit.get())
    }

    fn try_append(&self, bytes: &[u8]) -> usize {
        if bytes.len() > self.free_space() {
            return 0;
        }
        if self.data.borrow_mut().extend_from_slice(bytes).is_err() {
            return 0;
        }
        self.limit.set(self.limit.get().saturating_sub(bytes.len()));
        self.appends.set(self.appends.get().saturating_add(1));
        bytes.len()
    }
}
