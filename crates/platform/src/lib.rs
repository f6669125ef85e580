//! Hardware Abstraction Layer (HAL) for the DAQ acquisition core
//!
//! This crate provides the trait seams between the acquisition pipeline and
//! the board, so the pipeline can be developed and tested without hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware binary, command interpreter)
//!         ↓
//! Acquisition Pipeline (acquisition crate)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (Embassy HAL + PAC)
//! ```
//!
//! # Seams
//!
//! - [`power`] - board power state and supply domains
//! - [`timer`] - free-running timestamp counter
//! - [`peripheral`] - register interface of the on-chip multiplexed ADC
//! - [`gpio`] - interrupt acknowledge and digital I/O port access
//! - [`transport`] - non-blocking byte sinks for the serial and network links
//!
//! External converters are driven through the `embedded-hal` 1.0 traits
//! (`SpiDevice`, `OutputPin`, `InputPin`, `DelayNs`) directly.
//!
//! # Features
//!
//! - `std`: expose [`mocks`] outside this crate's own tests
//! - `defmt`: derive `defmt::Format` on platform types

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod gpio;
pub mod mocks;
pub mod peripheral;
pub mod power;
pub mod timer;
pub mod transport;

pub use gpio::{InterruptLine, PinGroup};
pub use peripheral::AdcPeripheral;
pub use power::{PowerDomain, PowerMonitor, PowerState};
pub use timer::{EmbassyTimestamp, TimestampCounter};
pub use transport::{ByteRing, RingSink, TransportSink};
