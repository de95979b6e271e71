//! In-memory logic capture
//!
//! [`LogicCapture`] holds packed-bit channel data and streams it as
//! run-length encoded [`Sample`]s, only emitting a sample when some channel
//! changes. It is the sample source used by tests and demos.
//!
//! ## Bit Packing Format
//!
//! LSB-first within each byte: bit N of a channel is at `data[N/8] >> (N%8) & 1`.

use super::sample::{Levels, Sample};

/// Packed multi-channel capture
#[derive(Clone, Debug)]
pub struct LogicCapture {
    /// One packed bit vector per channel
    channels: Vec<Vec<u8>>,
    /// Absolute index of the first sample
    start_position: u64,
    /// Number of valid samples
    num_samples: u64,
}

impl LogicCapture {
    /// Create an empty capture with `num_channels` channels (1-64)
    pub fn new(num_channels: usize) -> Self {
        debug_assert!(
            (1..=64).contains(&num_channels),
            "capture needs 1-64 channels"
        );
        Self {
            channels: vec![Vec::new(); num_channels.clamp(1, 64)],
            start_position: 0,
            num_samples: 0,
        }
    }

    /// Place the first sample at an absolute index other than zero
    pub fn with_start_position(mut self, start_position: u64) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples in the capture
    pub fn len(&self) -> u64 {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Absolute index of the first sample
    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    /// The absolute index one past the last sample
    pub fn end_position(&self) -> u64 {
        self.start_position + self.num_samples
    }

    /// Append `count` samples all at the given levels
    pub fn push(&mut self, levels: Levels, count: u64) {
        for _ in 0..count {
            let local = self.num_samples as usize;
            let byte_index = local / 8;
            let bit_offset = local % 8;
            for (channel, data) in self.channels.iter_mut().enumerate() {
                if data.len() <= byte_index {
                    data.push(0);
                }
                if levels.get(channel) {
                    data[byte_index] |= 1 << bit_offset;
                }
            }
            self.num_samples += 1;
        }
    }

    /// O(1) bit lookup. `position` is an absolute sample index.
    #[inline]
    pub fn get_bit(&self, channel: usize, position: u64) -> bool {
        let local = (position - self.start_position) as usize;
        (self.channels[channel][local / 8] >> (local % 8)) & 1 == 1
    }

    /// Levels of all channels at an absolute sample index
    pub fn levels_at(&self, position: u64) -> Levels {
        (0..self.channels.len()).fold(Levels::default(), |levels, channel| {
            levels.with(channel, self.get_bit(channel, position))
        })
    }

    /// Run-length encoded samples: the first sample, every change, and the
    /// final sample so the end of the capture is known downstream.
    pub fn samples(&self) -> CaptureSamples<'_> {
        CaptureSamples {
            capture: self,
            next: self.start_position,
            last: None,
        }
    }
}

/// Iterator returned by [`LogicCapture::samples`]
pub struct CaptureSamples<'a> {
    capture: &'a LogicCapture,
    next: u64,
    last: Option<Levels>,
}

impl Iterator for CaptureSamples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        let end = self.capture.end_position();
        while self.next < end {
            let position = self.next;
            self.next += 1;
            let levels = self.capture.levels_at(position);
            let is_last = position + 1 == end;
            if self.last != Some(levels) || is_last {
                self.last = Some(levels);
                return Some(Sample::new(position, levels));
            }
        }
        None
    }
}
