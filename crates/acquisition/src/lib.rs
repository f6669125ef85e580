//! Acquisition-to-streaming pipeline for the DAQ board
//!
//! Converter modules are triggered on a sampling tick, their completion
//! interrupts are deferred to a worker, the worker reads each module into a
//! sample batch held in a fixed pool, and a separately paced streaming task
//! serialises queued batches into packets for every transport with room.
//!
//! ```text
//!  ISR ─► DeferralBridge ─► AcquisitionEngine ─► SamplePool + BoundedQueue
//!                               │                          │
//!                      AcquisitionModule              StreamingMultiplexer ─► TransportSink(s)
//!                     (Mc12bAdc | Ad7609)              (JSON | binary | CSV)
//! ```
//!
//! Nothing allocates. All shared state lives in one [`AcquisitionContext`]
//! passed by reference; there are no globals.
//!
//! # Features
//!
//! - `defmt`: log through `defmt` and derive `defmt::Format` (hardware)
//! - `tracing`: log through `tracing` (host)

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
#![warn(clippy::print_stdout)]
#![allow(clippy::doc_markdown)] // part numbers in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)] // raw codes are at most 18 bits

#[macro_use]
mod log;

pub mod bridge;
pub mod config;
pub mod context;
pub mod dio;
pub mod driver;
pub mod encode;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod pool;
pub mod queue;
pub mod sample;
pub mod streaming;
pub mod tasks;
pub mod voltage;

pub use bridge::{DeferralBridge, PendingSet};
pub use config::{BoardConfig, ConverterKind, RuntimeConfig};
pub use context::{AcquisitionContext, PipelineStats, StatsSnapshot};
pub use dio::DioScanner;
pub use driver::{Ad7609, Ad7609Pins, Converter, Mc12bAdc};
pub use encode::{Encoding, Field, FieldSet, SessionMeta};
pub use engine::AcquisitionEngine;
pub use error::{ConfigError, DriverError, LifecycleError};
pub use lifecycle::ModuleState;
pub use module::AcquisitionModule;
pub use pool::{SamplePool, SlotHandle};
pub use queue::BoundedQueue;
pub use sample::{DigitalSample, Sample, SampleBatch};
pub use streaming::{StreamSettings, StreamingMultiplexer, TickOutcome};
pub use tasks::{acquisition_task, streaming_task, AcquisitionWorker, SessionCommand};
