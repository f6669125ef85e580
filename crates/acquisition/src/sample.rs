//! Sample records exchanged between the acquisition worker and the
//! streaming task.

use heapless::Vec;

/// Samples one module can produce per trigger.
pub const BATCH_CAPACITY: usize = 16;

/// One raw conversion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    /// Timestamp counter at trigger time.
    pub timestamp: u32,
    /// Logical channel id.
    pub channel: u8,
    /// Raw converter code. AD7609 codes are 18-bit two's complement,
    /// not yet sign-extended.
    pub raw: u32,
}

/// All samples produced by one trigger of one module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleBatch {
    samples: Vec<Sample, BATCH_CAPACITY>,
}

impl SampleBatch {
    /// Empty batch.
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Append a sample; hands it back if the batch is full.
    pub fn push(&mut self, sample: Sample) -> Result<(), Sample> {
        self.samples.push(sample)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fixed capacity.
    pub const fn capacity(&self) -> usize {
        BATCH_CAPACITY
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples in drain order.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Iterate over samples.
    pub fn iter(&self) -> core::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Trigger timestamp shared by every sample.
    pub fn timestamp(&self) -> Option<u32> {
        self.samples.first().map(|s| s.timestamp)
    }
}

impl<'a> IntoIterator for &'a SampleBatch {
    type Item = &'a Sample;
    type IntoIter = core::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// One scan of the digital I/O port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DigitalSample {
    /// Timestamp counter at scan time.
    pub timestamp: u32,
    /// Pins represented in `values`.
    pub mask: u32,
    /// Pin levels, one bit per pin.
    pub values: u32,
}
