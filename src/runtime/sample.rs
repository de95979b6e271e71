//! Core data types for sample streams

use std::fmt;

/// Logic levels of up to 64 channels at one sample, one bit per channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Levels(u64);

impl Levels {
    /// Levels from a raw bit set (bit N = channel N)
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bit set
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Level of one channel
    #[inline]
    pub const fn get(&self, channel: usize) -> bool {
        (self.0 >> channel) & 1 == 1
    }

    /// Copy with one channel set to `level`
    #[inline]
    pub const fn with(self, channel: usize, level: bool) -> Self {
        if level {
            Self(self.0 | (1 << channel))
        } else {
            Self(self.0 & !(1 << channel))
        }
    }
}

/// Sample: absolute index into the capture timeline plus channel levels.
///
/// Streams may be run-length encoded: a sample's levels hold until the
/// index of the next sample. Sources that emit every sample are equally valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Absolute sample index
    pub index: u64,
    /// Channel levels from this index on
    pub levels: Levels,
}

impl Sample {
    /// Create a new sample
    pub fn new(index: u64, levels: Levels) -> Self {
        Self { index, levels }
    }

    /// Level of one channel
    #[inline]
    pub fn level(&self, channel: usize) -> bool {
        self.levels.get(channel)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sample[i={}, levels={:#b}]", self.index, self.levels.bits())
    }
}

/// Span of absolute sample indices, `start <= end`.
///
/// Every annotation and packet carries one, so output stays traceable to the
/// waveform region that produced it after any number of stacked layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleRange {
    start: u64,
    end: u64,
}

impl SampleRange {
    /// Create a range. Bounds given in the wrong order are swapped.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} after end {}", start, end);
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// A range covering a single sample
    pub fn point(index: u64) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of samples between start and end
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest range covering both `self` and `other`
    pub fn union(self, other: SampleRange) -> SampleRange {
        SampleRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(&self, other: &SampleRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Union of a sequence of ranges, `None` when empty
    pub fn cover<I: IntoIterator<Item = SampleRange>>(ranges: I) -> Option<SampleRange> {
        ranges.into_iter().reduce(SampleRange::union)
    }
}

impl fmt::Display for SampleRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A value tagged with the sample range it was decoded from.
///
/// This is the unit carried on the packet bus between stacked decoders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub range: SampleRange,
    pub value: T,
}

impl<T> Spanned<T> {
    pub fn new(range: SampleRange, value: T) -> Self {
        Self { range, value }
    }

    /// Transform the value, keeping the range
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            range: self.range,
            value: f(self.value),
        }
    }
}

/// Union of the ranges of a run of spanned items
pub fn span_of<T>(items: &[Spanned<T>]) -> Option<SampleRange> {
    SampleRange::cover(items.iter().map(|item| item.range))
}
