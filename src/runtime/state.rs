//! Frame state machine support
//!
//! Every decoder keeps its protocol state in a closed enum implementing
//! [`FrameState`] and drives it through a [`FrameMachine`]. Transitions are
//! expressed as [`Step`]s; an [`InvalidPolicy`] decides where an invalid
//! event leaves the machine, and the returned [`Outcome`] forces the caller
//! to surface it (decoders turn `Outcome::Invalid` into a warning annotation).
//!
//! Multi-field records are built in a [`Scratch`] and only leave it through
//! an explicit `commit()`.

use super::sample::{SampleRange, Spanned};
use std::fmt::Debug;
use tracing::trace;

/// A decoder's closed set of states
pub trait FrameState: Copy + Eq + Debug + 'static {
    /// State entered on construction and on every reset
    const INITIAL: Self;
    /// Every state the decoder can be in
    const ALL: &'static [Self];

    fn name(&self) -> &'static str;
}

/// Transition requested by a decoder for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<S> {
    Goto(S),
    Stay,
    /// The event is declared irrelevant in this state
    Ignore,
    /// The event has no handler in this state
    Invalid(&'static str),
}

/// Where an invalid event leaves the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPolicy<S> {
    Stay,
    Reset,
    Enter(S),
}

/// Result of applying a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S> {
    Moved { from: S, to: S },
    Stayed(S),
    Ignored(S),
    /// The caller must emit a warning for this
    Invalid { state: S, reason: &'static str },
}

impl<S> Outcome<S> {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Outcome::Invalid { .. })
    }
}

/// Holder of exactly one live state
#[derive(Debug, Clone)]
pub struct FrameMachine<S: FrameState> {
    state: S,
    policy: InvalidPolicy<S>,
}

impl<S: FrameState> FrameMachine<S> {
    pub fn new(policy: InvalidPolicy<S>) -> Self {
        Self {
            state: S::INITIAL,
            policy,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn is(&self, state: S) -> bool {
        self.state == state
    }

    pub fn goto(&mut self, state: S) -> Outcome<S> {
        self.apply(Step::Goto(state))
    }

    pub fn reset(&mut self) {
        self.state = S::INITIAL;
    }

    pub fn apply(&mut self, step: Step<S>) -> Outcome<S> {
        match step {
            Step::Goto(to) => {
                debug_assert!(S::ALL.contains(&to), "undeclared state {:?}", to);
                let from = self.state;
                self.state = to;
                if from != to {
                    trace!("{} -> {}", from.name(), to.name());
                }
                Outcome::Moved { from, to }
            }
            Step::Stay => Outcome::Stayed(self.state),
            Step::Ignore => Outcome::Ignored(self.state),
            Step::Invalid(reason) => {
                let state = self.state;
                self.state = match self.policy {
                    InvalidPolicy::Stay => state,
                    InvalidPolicy::Reset => S::INITIAL,
                    InvalidPolicy::Enter(error) => error,
                };
                trace!("invalid event in {}: {}", state.name(), reason);
                Outcome::Invalid { state, reason }
            }
        }
    }
}

impl<S: FrameState> Default for FrameMachine<S> {
    fn default() -> Self {
        Self::new(InvalidPolicy::Reset)
    }
}

/// A record under construction with the union of its constituents' ranges
#[derive(Debug, Clone)]
pub struct Scratch<T> {
    record: Option<T>,
    range: Option<SampleRange>,
}

impl<T> Scratch<T> {
    pub fn new() -> Self {
        Self {
            record: None,
            range: None,
        }
    }

    /// Start a fresh record, dropping any previous one
    pub fn begin(&mut self, record: T, range: SampleRange) {
        self.record = Some(record);
        self.range = Some(range);
    }

    pub fn is_open(&self) -> bool {
        self.record.is_some()
    }

    pub fn record(&self) -> Option<&T> {
        self.record.as_ref()
    }

    pub fn record_mut(&mut self) -> Option<&mut T> {
        self.record.as_mut()
    }

    pub fn range(&self) -> Option<SampleRange> {
        self.range
    }

    /// Grow the record's range to cover `range`
    pub fn extend(&mut self, range: SampleRange) {
        if self.record.is_some() {
            self.range = Some(match self.range {
                Some(r) => r.union(range),
                None => range,
            });
        }
    }

    /// Take the finished record out
    pub fn commit(&mut self) -> Option<Spanned<T>> {
        let record = self.record.take()?;
        let range = self.range.take()?;
        Some(Spanned::new(range, record))
    }

    /// Drop the record; it is never emitted
    pub fn discard(&mut self) {
        self.record = None;
        self.range = None;
    }
}

impl<T> Default for Scratch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tagged result of a parsing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parse<T> {
    Ok(T),
    /// Structure violated; the caller warns and resyncs
    Framing(String),
    /// Input belongs to a different protocol; the caller skips it quietly
    NotThisProtocol,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Bus {
        Idle,
        Header,
        Payload,
        Error,
    }

    impl FrameState for Bus {
        const INITIAL: Self = Bus::Idle;
        const ALL: &'static [Self] = &[Bus::Idle, Bus::Header, Bus::Payload, Bus::Error];

        fn name(&self) -> &'static str {
            match self {
                Bus::Idle => "IDLE",
                Bus::Header => "HEADER",
                Bus::Payload => "PAYLOAD",
                Bus::Error => "ERROR",
            }
        }
    }

    #[test]
    fn test_goto_and_reset() {
        let mut machine = FrameMachine::<Bus>::default();
        assert!(machine.is(Bus::Idle));
        let outcome = machine.goto(Bus::Header);
        assert_eq!(
            outcome,
            Outcome::Moved {
                from: Bus::Idle,
                to: Bus::Header
            }
        );
        machine.goto(Bus::Payload);
        machine.reset();
        assert_eq!(machine.state(), Bus::INITIAL);
    }

    #[test]
    fn test_invalid_policies() {
        let mut stay = FrameMachine::new(InvalidPolicy::Stay);
        stay.goto(Bus::Header);
        assert!(stay.apply(Step::Invalid("bad")).is_invalid());
        assert_eq!(stay.state(), Bus::Header);

        let mut reset = FrameMachine::new(InvalidPolicy::Reset);
        reset.goto(Bus::Payload);
        reset.apply(Step::Invalid("bad"));
        assert_eq!(reset.state(), Bus::Idle);

        let mut absorb = FrameMachine::new(InvalidPolicy::Enter(Bus::Error));
        absorb.goto(Bus::Header);
        let outcome = absorb.apply(Step::Invalid("bad"));
        assert_eq!(
            outcome,
            Outcome::Invalid {
                state: Bus::Header,
                reason: "bad"
            }
        );
        assert_eq!(absorb.state(), Bus::Error);
    }

    #[test]
    fn test_ignore_and_stay_keep_state() {
        let mut machine = FrameMachine::<Bus>::default();
        machine.goto(Bus::Header);
        assert_eq!(machine.apply(Step::Ignore), Outcome::Ignored(Bus::Header));
        assert_eq!(machine.apply(Step::Stay), Outcome::Stayed(Bus::Header));
        assert_eq!(machine.state(), Bus::Header);
    }

    #[test]
    fn test_every_reachable_state_is_declared() {
        let mut machine = FrameMachine::new(InvalidPolicy::Enter(Bus::Error));
        for &state in Bus::ALL {
            machine.goto(state);
            assert!(Bus::ALL.contains(&machine.state()));
            machine.apply(Step::Invalid("x"));
            assert!(Bus::ALL.contains(&machine.state()));
        }
    }

    #[test]
    fn test_scratch_commit_covers_all_parts() {
        let mut scratch = Scratch::new();
        assert!(scratch.commit().is_none());

        scratch.begin(vec![1u8], SampleRange::new(100, 180));
        scratch.record_mut().unwrap().push(2);
        scratch.extend(SampleRange::new(180, 260));
        let record = scratch.commit().unwrap();
        assert_eq!(record.value, vec![1, 2]);
        assert_eq!(record.range, SampleRange::new(100, 260));
        assert!(!scratch.is_open());
    }

    #[test]
    fn test_scratch_discard_never_emits() {
        let mut scratch = Scratch::new();
        scratch.begin(7u32, SampleRange::point(5));
        scratch.discard();
        scratch.extend(SampleRange::point(9));
        assert!(scratch.commit().is_none());
    }
}
