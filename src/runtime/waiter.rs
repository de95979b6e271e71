//! Edge waiter: cooperative suspension over a sample stream
//!
//! A decoder describes what it is waiting for as a list of [`Term`]s. Each
//! term is a conjunction of per-channel [`Condition`]s; the list is a
//! disjunction. [`EdgeWaiter::wait`] advances the sample cursor to the first
//! sample where any term holds and reports every term that held there, so a
//! decoder can branch on "clock edge OR chip-select edge OR timeout".
//!
//! Edges compare a sample's levels with the levels of the sample before it.
//! The very first sample of a stream only establishes levels, so no edge is
//! ever reported on it. Level and skip conditions may match in the middle of
//! a run-length encoded stretch; such samples are synthesized with the held
//! levels.

use super::errors::WorkResult;
use super::receiver::SampleCursor;
use super::sample::{Levels, Sample};
use tracing::trace;

/// A single condition on one channel, or a sample-count timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Channel goes low to high
    Rising(usize),
    /// Channel goes high to low
    Falling(usize),
    /// Channel changes level
    Edge(usize),
    /// Channel is high
    High(usize),
    /// Channel is low
    Low(usize),
    /// Exactly N samples after the position the wait started from.
    /// `Skip(0)` means the next sample.
    Skip(u64),
}

/// A conjunction of conditions that must all hold at the same sample.
///
/// An empty term behaves like `Skip(0)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Term {
    conditions: Vec<Condition>,
}

impl Term {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rising(self, channel: usize) -> Self {
        self.with(Condition::Rising(channel))
    }

    pub fn falling(self, channel: usize) -> Self {
        self.with(Condition::Falling(channel))
    }

    pub fn edge(self, channel: usize) -> Self {
        self.with(Condition::Edge(channel))
    }

    pub fn high(self, channel: usize) -> Self {
        self.with(Condition::High(channel))
    }

    pub fn low(self, channel: usize) -> Self {
        self.with(Condition::Low(channel))
    }

    pub fn skip(self, samples: u64) -> Self {
        self.with(Condition::Skip(samples))
    }

    /// Add a condition to the conjunction
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn has_edge(&self) -> bool {
        self.conditions.iter().any(|c| {
            matches!(
                c,
                Condition::Rising(_) | Condition::Falling(_) | Condition::Edge(_)
            )
        })
    }

    /// Skip target for this term, if it has one. Targets never land on the
    /// origin itself unless `inclusive` (the first sample of a stream).
    fn skip_target(&self, origin: u64, inclusive: bool) -> Option<u64> {
        let samples = if self.conditions.is_empty() {
            Some(0)
        } else {
            self.conditions.iter().find_map(|c| match c {
                Condition::Skip(n) => Some(*n),
                _ => None,
            })
        };
        samples.map(|n| {
            if inclusive {
                origin.saturating_add(n)
            } else {
                origin.saturating_add(n.max(1))
            }
        })
    }

    fn levels_hold(&self, levels: Levels) -> bool {
        self.conditions.iter().all(|c| match *c {
            Condition::High(ch) => levels.get(ch),
            Condition::Low(ch) => !levels.get(ch),
            _ => true,
        })
    }

    fn matches(&self, prev: Levels, cur: Levels, index: u64, origin: u64, inclusive: bool) -> bool {
        if let Some(target) = self.skip_target(origin, inclusive) {
            if index != target {
                return false;
            }
        }
        self.conditions.iter().all(|c| match *c {
            Condition::Rising(ch) => !prev.get(ch) && cur.get(ch),
            Condition::Falling(ch) => prev.get(ch) && !cur.get(ch),
            Condition::Edge(ch) => prev.get(ch) != cur.get(ch),
            Condition::High(ch) => cur.get(ch),
            Condition::Low(ch) => !cur.get(ch),
            Condition::Skip(_) => true,
        })
    }
}

impl From<Condition> for Term {
    fn from(condition: Condition) -> Self {
        Term::new().with(condition)
    }
}

/// Result of a wait: the matching sample and which terms held there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Matched {
    pub sample: Sample,
    /// Bit N set when term N held
    pub matched: u64,
}

impl Matched {
    /// Whether term `term` held at the matching sample
    pub fn fired(&self, term: usize) -> bool {
        term < 64 && (self.matched >> term) & 1 == 1
    }

    pub fn index(&self) -> u64 {
        self.sample.index
    }

    pub fn level(&self, channel: usize) -> bool {
        self.sample.level(channel)
    }
}

/// Cursor-driven suspension primitive handed to logic-level decoders.
pub struct EdgeWaiter<'a> {
    cursor: SampleCursor<'a>,
    current: Option<Sample>,
}

impl<'a> EdgeWaiter<'a> {
    pub fn new<I>(source: I) -> Self
    where
        I: Iterator<Item = Sample> + 'a,
    {
        Self {
            cursor: SampleCursor::new(source),
            current: None,
        }
    }

    /// Index of the current sample, `None` before the first wait
    pub fn position(&self) -> Option<u64> {
        self.current.map(|s| s.index)
    }

    /// Level of a channel at the current sample
    pub fn level(&self, channel: usize) -> Option<bool> {
        self.current.map(|s| s.level(channel))
    }

    /// The current sample, pulling the first one from the stream if nothing
    /// has been consumed yet. Never advances past the first sample.
    pub fn current(&mut self) -> WorkResult<Sample> {
        match self.current {
            Some(sample) => Ok(sample),
            None => {
                let first = self.cursor.recv()?;
                self.current = Some(first);
                Ok(first)
            }
        }
    }

    /// Advance to an absolute sample index. Indices at or before the
    /// current position advance to the next sample.
    pub fn skip_to(&mut self, index: u64) -> WorkResult<Sample> {
        let origin = self.current()?.index;
        let matched = self.wait(&[Term::new().skip(index.saturating_sub(origin))])?;
        Ok(matched.sample)
    }

    /// Suspend until any of `terms` holds.
    ///
    /// Returns `WorkError::EndOfStream` when the stream ends first; the
    /// caller's decode run is then over.
    pub fn wait(&mut self, terms: &[Term]) -> WorkResult<Matched> {
        debug_assert!(terms.len() <= 64, "at most 64 alternative terms");

        let (origin, mut held) = match self.current {
            Some(sample) => (sample.index, sample.levels),
            None => {
                let first = self.cursor.recv()?;
                self.current = Some(first);
                let mask = Self::mask(terms, |t| {
                    t.matches(first.levels, first.levels, first.index, first.index, true)
                });
                if mask != 0 {
                    return Ok(Matched {
                        sample: first,
                        matched: mask,
                    });
                }
                (first.index, first.levels)
            }
        };

        let mut position = origin;
        loop {
            let next = *self.cursor.peek()?;

            // Levels are constant over (position, next.index): only terms
            // without edge conditions can hold in there.
            if next.index > position + 1 {
                let stretch_end = next.index - 1;
                let earliest = terms
                    .iter()
                    .filter(|t| !t.has_edge() && t.levels_hold(held))
                    .filter_map(|t| match t.skip_target(origin, false) {
                        Some(target) if target > position && target <= stretch_end => {
                            Some(target)
                        }
                        Some(_) => None,
                        None => Some(position + 1),
                    })
                    .min();
                if let Some(index) = earliest {
                    let mask =
                        Self::mask(terms, |t| t.matches(held, held, index, origin, false));
                    let sample = Sample::new(index, held);
                    self.current = Some(sample);
                    trace!("wait matched synthesized sample {}", sample);
                    return Ok(Matched {
                        sample,
                        matched: mask,
                    });
                }
            }

            let sample = self.cursor.recv()?;
            let mask = Self::mask(terms, |t| {
                t.matches(held, sample.levels, sample.index, origin, false)
            });
            held = sample.levels;
            position = sample.index;
            self.current = Some(sample);
            if mask != 0 {
                return Ok(Matched {
                    sample,
                    matched: mask,
                });
            }
        }
    }

    /// Wait for a single term
    pub fn wait_for(&mut self, term: impl Into<Term>) -> WorkResult<Sample> {
        let term = term.into();
        Ok(self.wait(std::slice::from_ref(&term))?.sample)
    }

    fn mask(terms: &[Term], mut holds: impl FnMut(&Term) -> bool) -> u64 {
        terms
            .iter()
            .take(64)
            .enumerate()
            .filter(|(_, t)| holds(t))
            .fold(0u64, |mask, (i, _)| mask | (1u64 << i))
    }
}

impl std::fmt::Debug for EdgeWaiter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeWaiter")
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::capture::LogicCapture;
    use crate::runtime::errors::WorkError;

    fn capture(levels: &[(u64, u64)]) -> LogicCapture {
        let mut capture = LogicCapture::new(2);
        for &(bits, count) in levels {
            capture.push(Levels::from_bits(bits), count);
        }
        capture
    }

    #[test]
    fn test_rising_edge_on_run_length_stream() {
        let cap = capture(&[(0b00, 10), (0b01, 10), (0b00, 10)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let m = waiter.wait(&[Condition::Rising(0).into()]).unwrap();
        assert_eq!(m.index(), 10);
        let m = waiter.wait(&[Condition::Falling(0).into()]).unwrap();
        assert_eq!(m.index(), 20);
    }

    #[test]
    fn test_first_sample_reports_no_edge() {
        let cap = capture(&[(0b01, 5), (0b00, 5), (0b01, 5)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        // Channel 0 starts high: that is not a rising edge
        let m = waiter.wait(&[Condition::Rising(0).into()]).unwrap();
        assert_eq!(m.index(), 10);
    }

    #[test]
    fn test_level_matches_at_first_sample() {
        let cap = capture(&[(0b01, 5), (0b00, 5)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let m = waiter.wait(&[Condition::High(0).into()]).unwrap();
        assert_eq!(m.index(), 0);
        // Next wait starts strictly after the current sample
        let m = waiter.wait(&[Condition::High(0).into()]).unwrap();
        assert_eq!(m.index(), 1);
    }

    #[test]
    fn test_skip_synthesizes_sample_inside_stretch() {
        let cap = capture(&[(0b00, 3), (0b01, 100)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        waiter.wait(&[Condition::Rising(0).into()]).unwrap();
        let m = waiter.wait(&[Condition::Skip(25).into()]).unwrap();
        assert_eq!(m.index(), 28);
        assert!(m.level(0));
        assert_eq!(waiter.position(), Some(28));
    }

    #[test]
    fn test_alternatives_report_which_fired() {
        // Channel 1 falls at 20, channel 0 rises at 40
        let cap = capture(&[(0b10, 20), (0b00, 20), (0b01, 20)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let terms = [
            Condition::Rising(0).into(),
            Condition::Falling(1).into(),
            Condition::Skip(1000).into(),
        ];
        let m = waiter.wait(&terms).unwrap();
        assert_eq!(m.index(), 20);
        assert!(!m.fired(0));
        assert!(m.fired(1));
        assert!(!m.fired(2));

        let m = waiter.wait(&terms).unwrap();
        assert_eq!(m.index(), 40);
        assert!(m.fired(0));
    }

    #[test]
    fn test_timeout_before_edge() {
        let cap = capture(&[(0b00, 10), (0b01, 90)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        waiter.current().unwrap();
        let terms = [Condition::Rising(0).into(), Condition::Skip(4).into()];
        let m = waiter.wait(&terms).unwrap();
        assert_eq!(m.index(), 4);
        assert!(m.fired(1));
        assert!(!m.fired(0));
    }

    #[test]
    fn test_conjunction_start_condition() {
        // SCL (ch0) high the whole time, SDA (ch1) falls at 30
        let cap = capture(&[(0b11, 30), (0b01, 30)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let start = Term::new().high(0).falling(1);
        let sample = waiter.wait_for(start).unwrap();
        assert_eq!(sample.index, 30);
    }

    #[test]
    fn test_end_of_stream_without_match() {
        let cap = capture(&[(0b00, 50)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let result = waiter.wait(&[Condition::Rising(0).into()]);
        assert!(matches!(result, Err(WorkError::EndOfStream)));
        // Skips past the last sample never match either
        let result = waiter.wait(&[Condition::Skip(1000).into()]);
        assert!(matches!(result, Err(WorkError::EndOfStream)));
    }

    #[test]
    fn test_huge_skip_does_not_wrap() {
        let cap = capture(&[(0b00, 50), (0b01, 50)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        let m = waiter
            .wait(&[Condition::Skip(u64::MAX).into(), Condition::Rising(0).into()])
            .unwrap();
        assert!(m.fired(1));
        assert!(!m.fired(0));
        assert_eq!(m.index(), 50);
    }

    #[test]
    fn test_skip_to_absolute_index() {
        let cap = capture(&[(0b00, 100)]);
        let mut waiter = EdgeWaiter::new(cap.samples());
        assert_eq!(waiter.skip_to(42).unwrap().index, 42);
        assert_eq!(waiter.skip_to(60).unwrap().index, 60);
    }
}
