//! Digital I/O port scanning.

use embassy_sync::blocking_mutex::raw::RawMutex;
use platform::PinGroup;

use crate::config::DioRuntime;
use crate::context::AcquisitionContext;
use crate::sample::DigitalSample;

/// Samples the digital port into the digital queue.
pub struct DioScanner<P> {
    port: P,
}

impl<P: PinGroup> DioScanner<P> {
    /// Scanner over `port`.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Give back the port.
    pub fn release(self) -> P {
        self.port
    }

    /// Take one sample of the enabled inputs, stamped `now`.
    ///
    /// Returns `None` when scanning is off, no input is selected or the
    /// port cannot be read.
    pub fn sample(&self, dio: &DioRuntime, now: u32) -> Option<DigitalSample> {
        if !dio.enabled || dio.input_mask == 0 {
            return None;
        }
        let Ok(levels) = self.port.read() else {
            debug!("dio port read failed");
            return None;
        };
        Some(DigitalSample {
            timestamp: now,
            mask: dio.input_mask,
            values: levels & dio.input_mask,
        })
    }

    /// Sample and queue. A full queue drops the new sample (counted).
    pub fn scan<R: RawMutex, const N: usize, const Q: usize, const D: usize>(
        &self,
        ctx: &AcquisitionContext<R, N, Q, D>,
        dio: &DioRuntime,
        now: u32,
    ) -> bool {
        match self.sample(dio, now) {
            Some(sample) => ctx.publish_digital(sample),
            None => false,
        }
    }
}
