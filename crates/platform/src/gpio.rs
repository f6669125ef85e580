//! GPIO abstractions used by the acquisition pipeline
//!
//! Converter control lines (CONVST, RESET, BUSY, ...) use the `embedded-hal`
//! 1.0 pin traits directly. This module only adds what `embedded-hal` does
//! not cover: acknowledging an external interrupt line from ISR context and
//! reading a whole digital I/O port in one access.

/// Interrupt source that signals conversion completion.
///
/// Only [`clear_interrupt`](Self::clear_interrupt) is called from ISR
/// context. It must be a single register write: no bus traffic, no locks.
pub trait InterruptLine {
    /// Acknowledge a pending interrupt.
    fn clear_interrupt(&mut self);
}

/// Pin group for efficient multi-pin operations
///
/// Used for the digital I/O port: one read returns every input bit.
pub trait PinGroup {
    /// Error type
    type Error;

    /// Read all pins at once
    fn read(&self) -> Result<u32, Self::Error>;
}
