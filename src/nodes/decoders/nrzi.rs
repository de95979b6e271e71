//! NRZ-I line decoder
//!
//! A level transition at a cell boundary is a 1, no transition is a 0. The
//! number of cells between two edges is their distance divided by the bit
//! period, rounded. Bits are emitted one edge late: the 1 that starts at an
//! edge is closed when the next edge shows how many zeros followed it.
//!
//! No edge for `max_run` bit periods is a loss of signal: the pending 1 is
//! flushed, a warning is annotated, and the decoder waits to lock again.

use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, EdgeWaiter, LOGIC, LogicDecoder,
    Metadata, Output, WorkResult,
};
use crate::runtime::sample::SampleRange;
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy};
use crate::runtime::waiter::{Condition, Term};
use tracing::debug;

/// Output tag: a stream of `bool` bits
pub const BITS: &str = "bits";

const BIT: usize = 0;
const WARNING: usize = 1;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("bit", "Bit"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("bits", "Bits", &[BIT]),
    AnnotationRow::new("warnings", "Warnings", &[WARNING]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct NrziConfig {
    pub channel: usize,
    /// Bits per second
    pub bitrate: u64,
    /// Longest run of zeros before the signal counts as lost
    pub max_run: u32,
}

impl Default for NrziConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            bitrate: 125_000_000,
            max_run: 8,
        }
    }
}

impl NrziConfig {
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_max_run(mut self, max_run: u32) -> Self {
        self.max_run = max_run;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrziState {
    /// Waiting for the first transition
    Idle,
    /// Tracking cells from the last transition
    Locked,
}

impl FrameState for NrziState {
    const INITIAL: Self = NrziState::Idle;
    const ALL: &'static [Self] = &[NrziState::Idle, NrziState::Locked];

    fn name(&self) -> &'static str {
        match self {
            NrziState::Idle => "IDLE",
            NrziState::Locked => "LOCKED",
        }
    }
}

/// NRZ-I decoder
///
/// Input: one logic channel
/// Output: `bool` bits, one range per bit cell
pub struct NrziDecoder {
    name: String,
    config: NrziConfig,
    /// Samples per bit
    period: f64,
    machine: FrameMachine<NrziState>,
    last_edge: u64,
}

impl NrziDecoder {
    pub fn new(config: NrziConfig) -> Self {
        Self {
            name: "nrzi".to_string(),
            config,
            period: 0.0,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            last_edge: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> NrziState {
        self.machine.state()
    }

    fn emit(out: &mut Output<'_, bool>, bit: bool, range: SampleRange) -> WorkResult<()> {
        out.annotate(range, BIT, [if bit { "1" } else { "0" }])?;
        out.packet(range, bit)
    }
}

impl Decoder for NrziDecoder {
    type Output = bool;

    fn id(&self) -> &'static str {
        "nrzi"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        LOGIC
    }

    fn outputs(&self) -> &'static str {
        BITS
    }

    fn annotation_classes(&self) -> &'static [AnnotationClass] {
        CLASSES
    }

    fn annotation_rows(&self) -> &'static [AnnotationRow] {
        ROWS
    }

    fn start(&mut self, metadata: &Metadata) -> Result<(), ConfigError> {
        let samplerate = metadata.require_samplerate()?;
        if self.config.channel >= 64 {
            return Err(ConfigError::InvalidChannel(self.config.channel));
        }
        if self.config.bitrate == 0 {
            return Err(ConfigError::InvalidOption {
                option: "bitrate",
                reason: "must be positive".into(),
            });
        }
        if self.config.max_run == 0 {
            return Err(ConfigError::InvalidOption {
                option: "max_run",
                reason: "must be positive".into(),
            });
        }
        let period = samplerate as f64 / self.config.bitrate as f64;
        if period < 2.0 {
            return Err(ConfigError::InvalidOption {
                option: "bitrate",
                reason: format!("bit period of {:.2} samples is too short", period),
            });
        }
        self.period = period;
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.last_edge = 0;
    }
}

impl LogicDecoder for NrziDecoder {
    fn decode(&mut self, waiter: &mut EdgeWaiter<'_>, out: &mut Output<'_, bool>) -> WorkResult<()> {
        let channel = self.config.channel;

        match self.machine.state() {
            NrziState::Idle => {
                let edge = waiter.wait_for(Condition::Edge(channel))?;
                debug!("NRZ-I locked at sample {}", edge.index);
                self.last_edge = edge.index;
                self.machine.goto(NrziState::Locked);
            }
            NrziState::Locked => {
                let position = waiter.current()?.index;
                let timeout_at = self.last_edge
                    + ((f64::from(self.config.max_run) + 0.5) * self.period).round() as u64;
                let terms = [
                    Condition::Edge(channel).into(),
                    Term::new().skip(timeout_at.saturating_sub(position)),
                ];
                let matched = waiter.wait(&terms)?;

                if matched.fired(0) {
                    let delta = matched.index() - self.last_edge;
                    let cells = ((delta as f64 / self.period).round() as u64).max(1);
                    let width = delta as f64 / cells as f64;
                    for k in 0..cells {
                        let start = self.last_edge + (k as f64 * width).round() as u64;
                        let end = self.last_edge + ((k + 1) as f64 * width).round() as u64;
                        Self::emit(out, k == 0, SampleRange::new(start, end))?;
                    }
                    self.last_edge = matched.index();
                } else {
                    let end = self.last_edge + self.period.round() as u64;
                    Self::emit(out, true, SampleRange::new(self.last_edge, end))?;
                    out.annotate(
                        SampleRange::new(self.last_edge, matched.index()),
                        WARNING,
                        ["Loss of signal", "LOS"],
                    )?;
                    debug!("NRZ-I lost signal at sample {}", matched.index());
                    self.machine.goto(NrziState::Idle);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::annotation::AnnotationLog;
    use crate::runtime::pipeline::{DecoderStack, StageStatus};
    use crate::runtime::ports::PacketCollector;
    use crate::synth::SignalBuilder;

    fn decode(bits: &[bool]) -> (Vec<(bool, SampleRange)>, AnnotationLog) {
        let mut signal = SignalBuilder::new(1);
        signal.hold(25);
        signal.nrzi(0, bits, 10);
        signal.hold(200);
        let capture = signal.into_capture();

        let mut stack = DecoderStack::new(NrziDecoder::new(NrziConfig::default().with_bitrate(100)))
            .with_samplerate(1000);
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<bool>::new();
        let report = stack
            .run_with_tap(capture.samples(), &mut log, &mut collector)
            .unwrap();
        assert!(report.is_clean());
        let bits = collector
            .into_packets()
            .into_iter()
            .map(|p| (p.value, p.range))
            .collect();
        (bits, log)
    }

    #[test]
    fn test_bits_and_ranges() {
        // The leading 1 locks the decoder; the trailing 1 closes the last cell
        let (bits, log) = decode(&[true, false, false, true, true]);
        let values: Vec<bool> = bits.iter().map(|b| b.0).collect();
        assert_eq!(values, vec![true, false, false, true, true]);
        assert_eq!(bits[0].1, SampleRange::new(25, 35));
        assert_eq!(bits[1].1, SampleRange::new(35, 45));
        assert_eq!(bits[3].1, SampleRange::new(55, 65));
        // Adjacent cells share their boundary
        for pair in bits.windows(2) {
            assert_eq!(pair[0].1.end(), pair[1].1.start());
        }
        assert!(log.contains_text("nrzi", "LOS"));
    }

    #[test]
    fn test_loss_of_signal_relocks() {
        let mut signal = SignalBuilder::new(1);
        signal.hold(5);
        signal.nrzi(0, &[true, true], 10);
        signal.hold(300);
        signal.nrzi(0, &[true, false, true], 10);
        signal.hold(300);
        let capture = signal.into_capture();

        let mut stack = DecoderStack::new(NrziDecoder::new(NrziConfig::default().with_bitrate(100)))
            .with_samplerate(1000);
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<bool>::new();
        stack
            .run_with_tap(capture.samples(), &mut log, &mut collector)
            .unwrap();
        let values: Vec<bool> = collector.values().copied().collect();
        assert_eq!(values, vec![true, true, true, false, true]);
        assert_eq!(log.class("nrzi", WARNING).count(), 2);
    }

    #[test]
    fn test_missing_samplerate_disables_decoder() {
        let mut stack = DecoderStack::new(NrziDecoder::new(NrziConfig::default()));
        let mut log = AnnotationLog::new();
        let report = stack
            .run(Vec::<crate::runtime::sample::Sample>::new(), &mut log)
            .unwrap();
        assert_eq!(
            report.stages[0].status,
            StageStatus::Disabled(ConfigError::MissingSamplerate)
        );
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut decoder = NrziDecoder::new(NrziConfig::default());
        decoder.machine.goto(NrziState::Locked);
        decoder.last_edge = 99;
        decoder.reset();
        assert_eq!(decoder.state(), NrziState::INITIAL);
        assert_eq!(decoder.last_edge, 0);
        decoder.reset();
        assert_eq!(decoder.state(), NrziState::INITIAL);
    }
}
