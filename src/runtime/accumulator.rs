//! Symbol accumulation
//!
//! [`SymbolAccumulator`] folds bits (or wider units) into a fixed-width value
//! while tracking the sample range of the unit under construction.
//! [`SlidingWindow`] keeps the last N bits for sync-pattern hunting, and
//! [`Destuffer`] removes stuff bits while keeping the raw stream queryable.

use super::sample::{SampleRange, Spanned};
use std::collections::VecDeque;

/// Order in which bits of a unit arrive on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

/// A closed, fixed-or-variable width value with the range it spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub value: u64,
    pub bits: u8,
    pub range: SampleRange,
}

/// Result of pushing a unit into an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// More bits are needed
    Pending,
    /// The configured width is reached; call `flush()`
    Complete,
    /// The completed value was the configured framing value. The accumulator
    /// has already restarted; the framing symbol is returned.
    Sync(Symbol),
}

/// Shift register with configurable width and bit order
#[derive(Debug, Clone)]
pub struct SymbolAccumulator {
    width: u8,
    order: BitOrder,
    value: u64,
    count: u8,
    range: Option<SampleRange>,
    sync: Option<u64>,
}

impl SymbolAccumulator {
    /// Create an accumulator for `width` bits (1-64)
    pub fn new(width: u8, order: BitOrder) -> Self {
        debug_assert!((1..=64).contains(&width), "width must be 1-64");
        Self {
            width: width.clamp(1, 64),
            order,
            value: 0,
            count: 0,
            range: None,
            sync: None,
        }
    }

    /// Restart accumulation whenever a completed value equals `value`
    pub fn reset_on(mut self, value: u64) -> Self {
        self.sync = Some(value);
        self
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn order(&self) -> BitOrder {
        self.order
    }

    /// Number of bits accumulated so far
    pub fn len(&self) -> u8 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.width
    }

    /// Range covered so far
    pub fn range(&self) -> Option<SampleRange> {
        self.range
    }

    /// Fold one bit in
    pub fn push(&mut self, bit: bool, range: SampleRange) -> PushOutcome {
        self.push_unit(u64::from(bit), 1, range)
    }

    /// Fold a `unit_bits`-wide unit in (nibbles, bytes). The unit's own bits
    /// are taken MSB-first for `MsbFirst` and LSB-first for `LsbFirst`.
    pub fn push_unit(&mut self, unit: u64, unit_bits: u8, range: SampleRange) -> PushOutcome {
        let unit_bits = unit_bits.min(self.width.saturating_sub(self.count));
        if unit_bits == 0 {
            return PushOutcome::Complete;
        }
        let mask = if unit_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << unit_bits) - 1
        };
        let unit = unit & mask;
        match self.order {
            BitOrder::MsbFirst => {
                self.value = if unit_bits >= 64 {
                    unit
                } else {
                    (self.value << unit_bits) | unit
                };
            }
            BitOrder::LsbFirst => {
                self.value |= unit << self.count;
            }
        }
        self.count += unit_bits;
        self.range = Some(match self.range {
            Some(r) => r.union(range),
            None => range,
        });

        if !self.is_complete() {
            return PushOutcome::Pending;
        }
        match self.sync {
            Some(sync) if sync == self.value => match self.flush() {
                Some(symbol) => PushOutcome::Sync(symbol),
                None => PushOutcome::Pending,
            },
            _ => PushOutcome::Complete,
        }
    }

    /// Return the accumulated value and its range, and reset.
    ///
    /// Allowed before completion for units whose end is only known from
    /// what follows them. Returns `None` when nothing was accumulated.
    pub fn flush(&mut self) -> Option<Symbol> {
        let range = self.range.take()?;
        let symbol = Symbol {
            value: self.value,
            bits: self.count,
            range,
        };
        self.value = 0;
        self.count = 0;
        Some(symbol)
    }

    /// Drop whatever was accumulated
    pub fn clear(&mut self) {
        self.value = 0;
        self.count = 0;
        self.range = None;
    }
}

/// The last `width` bits seen, MSB = oldest, with their ranges
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    width: usize,
    bits: VecDeque<Spanned<bool>>,
}

impl SlidingWindow {
    pub fn new(width: usize) -> Self {
        debug_assert!((1..=64).contains(&width), "width must be 1-64");
        Self {
            width: width.clamp(1, 64),
            bits: VecDeque::with_capacity(width),
        }
    }

    pub fn push(&mut self, bit: bool, range: SampleRange) {
        if self.bits.len() == self.width {
            self.bits.pop_front();
        }
        self.bits.push_back(Spanned::new(range, bit));
    }

    pub fn is_full(&self) -> bool {
        self.bits.len() == self.width
    }

    /// Window contents, oldest bit most significant
    pub fn value(&self) -> u64 {
        self.bits
            .iter()
            .fold(0, |value, bit| (value << 1) | u64::from(bit.value))
    }

    /// Whether the full window equals `pattern`
    pub fn matches(&self, pattern: u64) -> bool {
        self.is_full() && self.value() == pattern
    }

    pub fn range(&self) -> Option<SampleRange> {
        SampleRange::cover(self.bits.iter().map(|bit| bit.range))
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

/// Result of feeding one raw bit to a [`Destuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuffOutcome {
    /// A bit that counts toward the framed value
    Data(bool),
    /// A stuff bit, removed from the destuffed stream
    Stuff,
    /// A stuff bit was due but had the same level as the run before it
    StuffError,
}

/// Bit destuffer for protocols that insert a complement bit after a run of
/// identical bits (CAN: run length 5).
#[derive(Debug, Clone)]
pub struct Destuffer {
    run_length: u8,
    enabled: bool,
    last: Option<bool>,
    run: u8,
    raw: Vec<Spanned<bool>>,
    destuffed: Vec<Spanned<bool>>,
}

impl Destuffer {
    pub fn new(run_length: u8) -> Self {
        Self {
            run_length,
            enabled: true,
            last: None,
            run: 0,
            raw: Vec::new(),
            destuffed: Vec::new(),
        }
    }

    /// Feed one raw bit
    pub fn push(&mut self, bit: bool, range: SampleRange) -> StuffOutcome {
        self.raw.push(Spanned::new(range, bit));

        if self.enabled && self.run >= self.run_length {
            if self.last == Some(bit) {
                return StuffOutcome::StuffError;
            }
            self.last = Some(bit);
            self.run = 1;
            return StuffOutcome::Stuff;
        }

        if self.last == Some(bit) {
            self.run += 1;
        } else {
            self.last = Some(bit);
            self.run = 1;
        }
        self.destuffed.push(Spanned::new(range, bit));
        StuffOutcome::Data(bit)
    }

    /// Whether the next raw bit must be a stuff bit
    pub fn stuff_due(&self) -> bool {
        self.enabled && self.run >= self.run_length
    }

    /// Stop removing stuff bits (end of the stuffed region)
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Every bit as received, stuff bits included
    pub fn raw(&self) -> &[Spanned<bool>] {
        &self.raw
    }

    /// Bits that count toward the frame
    pub fn destuffed(&self) -> &[Spanned<bool>] {
        &self.destuffed
    }

    /// Accumulate `len` destuffed bits starting at `start`, MSB first
    pub fn field(&self, start: usize, len: usize) -> Option<Symbol> {
        let bits = self.destuffed.get(start..start + len)?;
        let mut acc = SymbolAccumulator::new(len.clamp(1, 64) as u8, BitOrder::MsbFirst);
        for bit in bits {
            acc.push(bit.value, bit.range);
        }
        acc.flush()
    }

    pub fn clear(&mut self) {
        self.enabled = true;
        self.last = None;
        self.run = 0;
        self.raw.clear();
        self.destuffed.clear();
    }
}
