//! UART decoder
//!
//! Flow per frame:
//!   1. Wait for the start edge (falling, or rising when inverted). When idle
//!      detection is on, a timeout on the same wait reports the line idle.
//!   2. Sample the start bit, each data bit, the parity bit, and the first
//!      stop bit at their centres.
//!   3. A frame of all zeros with a low stop bit is a break: wait for the line
//!      to return to idle and report the whole low period.
//!
//! Parity and stop bit errors are flags on the emitted data packet.

use crate::runtime::accumulator::{BitOrder, SymbolAccumulator};
use crate::runtime::checksum::{even_parity, odd_parity};
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, EdgeWaiter, LOGIC, LogicDecoder,
    Metadata, Output, WorkResult,
};
use crate::runtime::sample::SampleRange;
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy};
use crate::runtime::waiter::{Condition, Term};
use tracing::{debug, trace};

/// Output tag
pub const UART: &str = "uart";

const DATA: usize = 0;
const PARITY_ERROR: usize = 1;
const FRAME_ERROR: usize = 2;
const BREAK: usize = 3;
const IDLE: usize = 4;
const WARNING: usize = 5;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("data", "Data"),
    AnnotationClass::new("parity-error", "Parity error"),
    AnnotationClass::new("frame-error", "Frame error"),
    AnnotationClass::new("break", "Break condition"),
    AnnotationClass::new("idle", "Idle line"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("data", "Data", &[DATA, BREAK, IDLE]),
    AnnotationRow::new("errors", "Errors", &[PARITY_ERROR, FRAME_ERROR, WARNING]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    /// Parity bit always 0
    Zero,
    /// Parity bit always 1
    One,
}

impl Parity {
    /// Expected parity bit for `value`
    pub fn bit(self, value: u64) -> Option<bool> {
        match self {
            Parity::None => None,
            Parity::Odd => Some(odd_parity(value)),
            Parity::Even => Some(even_parity(value)),
            Parity::Zero => Some(false),
            Parity::One => Some(true),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopBits {
    #[default]
    One,
    OneAndHalf,
    Two,
}

impl StopBits {
    pub fn bit_times(self) -> f64 {
        match self {
            StopBits::One => 1.0,
            StopBits::OneAndHalf => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UartConfig {
    pub channel: usize,
    pub baudrate: u64,
    /// 5 to 9
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub bit_order: BitOrder,
    /// Idle level low instead of high
    pub invert: bool,
    /// Report the line idle after this many bit times without a frame
    pub idle_bits: Option<u32>,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            baudrate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            bit_order: BitOrder::LsbFirst,
            invert: false,
            idle_bits: None,
        }
    }
}

impl UartConfig {
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_baudrate(mut self, baudrate: u64) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = bit_order;
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn with_idle_bits(mut self, idle_bits: u32) -> Self {
        self.idle_bits = Some(idle_bits);
        self
    }
}

/// One received character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartFrame {
    pub value: u16,
    /// `None` without parity
    pub parity_ok: Option<bool>,
    pub stop_ok: bool,
}

/// Packets handed to stacked decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartPacket {
    Data(UartFrame),
    Break,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartState {
    WaitStart,
    /// Break seen, line still held at the start level
    BreakHeld,
}

impl FrameState for UartState {
    const INITIAL: Self = UartState::WaitStart;
    const ALL: &'static [Self] = &[UartState::WaitStart, UartState::BreakHeld];

    fn name(&self) -> &'static str {
        match self {
            UartState::WaitStart => "WAIT START",
            UartState::BreakHeld => "BREAK",
        }
    }
}

/// UART decoder
///
/// Input: one logic channel (RX or TX)
/// Output: [`UartPacket`]s
pub struct UartDecoder {
    name: String,
    config: UartConfig,
    /// Samples per bit
    width: f64,
    machine: FrameMachine<UartState>,
    /// End of the last frame, while an idle report is still due
    idle_from: Option<u64>,
    break_start: u64,
}

impl UartDecoder {
    pub fn new(config: UartConfig) -> Self {
        Self {
            name: "uart".to_string(),
            config,
            width: 0.0,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            idle_from: None,
            break_start: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> UartState {
        self.machine.state()
    }

    fn offset(&self, start: u64, bits: f64) -> u64 {
        start + (bits * self.width).round() as u64
    }

    fn bit_range(&self, start: u64, bit: usize) -> SampleRange {
        SampleRange::new(
            self.offset(start, bit as f64),
            self.offset(start, bit as f64 + 1.0),
        )
    }

    /// Level of bit `bit` of the frame starting at `start`, in logical polarity
    fn sample_bit(&self, waiter: &mut EdgeWaiter<'_>, start: u64, bit: usize) -> WorkResult<bool> {
        let sample = waiter.skip_to(self.offset(start, bit as f64 + 0.5))?;
        Ok(sample.level(self.config.channel) != self.config.invert)
    }

    fn start_condition(&self) -> Condition {
        if self.config.invert {
            Condition::Rising(self.config.channel)
        } else {
            Condition::Falling(self.config.channel)
        }
    }

    fn release_condition(&self) -> Condition {
        if self.config.invert {
            Condition::Falling(self.config.channel)
        } else {
            Condition::Rising(self.config.channel)
        }
    }

    /// Wait for a start edge. Returns `None` when the idle timeout fired first.
    fn wait_start(
        &mut self,
        waiter: &mut EdgeWaiter<'_>,
        out: &mut Output<'_, UartPacket>,
    ) -> WorkResult<Option<u64>> {
        let start = Term::from(self.start_condition());
        let (Some(frame_end), Some(idle_bits)) = (self.idle_from, self.config.idle_bits) else {
            return Ok(Some(waiter.wait_for(start)?.index));
        };

        let idle_at = self.offset(frame_end, f64::from(idle_bits));
        let position = waiter.current()?.index;
        let matched = waiter.wait(&[start, Term::new().skip(idle_at.saturating_sub(position))])?;
        if matched.fired(0) {
            return Ok(Some(matched.index()));
        }

        self.idle_from = None;
        let range = SampleRange::new(frame_end, matched.index());
        out.annotate(range, IDLE, ["Idle", "I"])?;
        out.packet(range, UartPacket::Idle)?;
        Ok(None)
    }

    fn decode_frame(
        &mut self,
        waiter: &mut EdgeWaiter<'_>,
        out: &mut Output<'_, UartPacket>,
        start: u64,
    ) -> WorkResult<()> {
        if self.sample_bit(waiter, start, 0)? {
            trace!("UART false start at {}", start);
            return Ok(());
        }

        let data_bits = usize::from(self.config.data_bits);
        let mut acc = SymbolAccumulator::new(self.config.data_bits, self.config.bit_order);
        let mut all_low = true;
        for bit in 1..=data_bits {
            let level = self.sample_bit(waiter, start, bit)?;
            all_low &= !level;
            acc.push(level, self.bit_range(start, bit));
        }
        let value = acc.flush().map(|symbol| symbol.value).unwrap_or(0);

        let mut stop_index = data_bits + 1;
        let parity_ok = match self.config.parity.bit(value) {
            Some(expected) => {
                let level = self.sample_bit(waiter, start, stop_index)?;
                all_low &= !level;
                stop_index += 1;
                Some(level == expected)
            }
            None => None,
        };

        let stop_ok = self.sample_bit(waiter, start, stop_index)?;
        if all_low && !stop_ok {
            debug!("UART break starting at {}", start);
            self.break_start = start;
            self.idle_from = None;
            self.machine.goto(UartState::BreakHeld);
            return Ok(());
        }

        let frame_end = self.offset(start, stop_index as f64 + self.config.stop_bits.bit_times());
        let range = SampleRange::new(start, frame_end);
        let frame = UartFrame {
            value: value as u16,
            parity_ok,
            stop_ok,
        };

        let short = format!("0x{:02X}", value);
        let long = match char::from_u32(value as u32) {
            Some(c) if c.is_ascii_graphic() || c == ' ' => format!("Data: {} '{}'", short, c),
            _ => format!("Data: {}", short),
        };
        out.annotate(range, DATA, [long, short])?;
        if parity_ok == Some(false) {
            out.annotate(self.bit_range(start, stop_index - 1), PARITY_ERROR, ["Parity error", "PE"])?;
        }
        if !stop_ok {
            out.annotate(self.bit_range(start, stop_index), FRAME_ERROR, ["Frame error", "FE"])?;
        }
        trace!("UART frame {:?} at {}", frame, range);
        out.packet(range, UartPacket::Data(frame))?;

        if self.config.idle_bits.is_some() {
            self.idle_from = Some(frame_end);
        }
        Ok(())
    }
}

impl Decoder for UartDecoder {
    type Output = UartPacket;

    fn id(&self) -> &'static str {
        "uart"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        LOGIC
    }

    fn outputs(&self) -> &'static str {
        UART
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
        if !(5..=9).contains(&self.config.data_bits) {
            return Err(ConfigError::InvalidOption {
                option: "data_bits",
                reason: format!("{} is not in 5..=9", self.config.data_bits),
            });
        }
        if self.config.baudrate == 0 {
            return Err(ConfigError::InvalidOption {
                option: "baudrate",
                reason: "must be positive".into(),
            });
        }
        if self.config.idle_bits == Some(0) {
            return Err(ConfigError::InvalidOption {
                option: "idle_bits",
                reason: "must be positive".into(),
            });
        }
        let width = samplerate as f64 / self.config.baudrate as f64;
        if width < 4.0 {
            return Err(ConfigError::InvalidOption {
                option: "baudrate",
                reason: format!("bit width of {:.2} samples is too short", width),
            });
        }
        self.width = width;
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.idle_from = None;
        self.break_start = 0;
    }
}

impl LogicDecoder for UartDecoder {
    fn decode(
        &mut self,
        waiter: &mut EdgeWaiter<'_>,
        out: &mut Output<'_, UartPacket>,
    ) -> WorkResult<()> {
        match self.machine.state() {
            UartState::WaitStart => {
                if let Some(start) = self.wait_start(waiter, out)? {
                    self.decode_frame(waiter, out, start)?;
                }
            }
            UartState::BreakHeld => {
                let release = waiter.wait_for(self.release_condition())?;
                let range = SampleRange::new(self.break_start, release.index);
                out.annotate(range, BREAK, ["Break condition", "Break", "B"])?;
                out.packet(range, UartPacket::Break)?;
                if self.config.idle_bits.is_some() {
                    self.idle_from = Some(release.index);
                }
                self.machine.goto(UartState::WaitStart);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::annotation::AnnotationLog;
    use crate::runtime::pipeline::DecoderStack;
    use crate::runtime::ports::PacketCollector;
    use crate::runtime::sample::Spanned;
    use crate::synth::SignalBuilder;

    const BIT: u64 = 10;

    fn run(config: UartConfig, signal: SignalBuilder) -> (Vec<Spanned<UartPacket>>, AnnotationLog) {
        let capture = signal.into_capture();
        let mut stack = DecoderStack::new(UartDecoder::new(config)).with_samplerate(1000);
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<UartPacket>::new();
        let report = stack
            .run_with_tap(capture.samples(), &mut log, &mut collector)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report);
        (collector.into_packets(), log)
    }

    fn config() -> UartConfig {
        UartConfig::default().with_baudrate(100)
    }

    fn data(value: u16, parity_ok: Option<bool>, stop_ok: bool) -> UartPacket {
        UartPacket::Data(UartFrame {
            value,
            parity_ok,
            stop_ok,
        })
    }

    #[test]
    fn test_decodes_bytes_with_ranges() {
        let config = config();
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(30);
        signal.uart(0, &config, BIT, 0x41);
        signal.uart(0, &config, BIT, 0x0F);
        signal.hold(50);

        let (packets, log) = run(config, signal);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].value, data(0x41, None, true));
        assert_eq!(packets[0].range, SampleRange::new(30, 130));
        assert_eq!(packets[1].value, data(0x0F, None, true));
        assert_eq!(packets[1].range, SampleRange::new(130, 230));
        assert!(log.contains_text("uart", "Data: 0x41 'A'"));
    }

    #[test]
    fn test_parity_and_frame_errors_are_flags() {
        let even = config().with_parity(Parity::Even);
        let odd = config().with_parity(Parity::Odd);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(30);
        signal.uart(0, &even, BIT, 0x03);
        // Odd parity bit where even is expected
        signal.uart(0, &odd, BIT, 0x03);
        // Stop bit forced low, then released
        signal.set(0, false).hold(BIT);
        for bit in [true, false, false, false, false, false, false, false] {
            signal.set(0, bit).hold(BIT);
        }
        signal.set(0, false).hold(2 * BIT);
        signal.set(0, true).hold(50);

        let (packets, log) = run(even, signal);
        assert_eq!(packets[0].value, data(0x03, Some(true), true));
        assert_eq!(packets[1].value, data(0x03, Some(false), true));
        assert!(matches!(
            packets[2].value,
            UartPacket::Data(UartFrame { value: 0x01, stop_ok: false, .. })
        ));
        assert_eq!(log.class("uart", PARITY_ERROR).count(), 2);
        assert_eq!(log.class("uart", FRAME_ERROR).count(), 1);
    }

    #[test]
    fn test_break_and_idle() {
        let config = config().with_idle_bits(4);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(30);
        signal.uart_break(0, 13, BIT);
        signal.hold(BIT);
        signal.uart(0, &config, BIT, 0x55);
        signal.hold(200);

        let (packets, _log) = run(config, signal);
        let kinds: Vec<UartPacket> = packets.iter().map(|p| p.value).collect();
        // The next start edge comes before the idle timeout after the break
        assert_eq!(
            kinds,
            vec![UartPacket::Break, data(0x55, None, true), UartPacket::Idle]
        );
        assert_eq!(packets[0].range, SampleRange::new(30, 160));
        assert_eq!(packets[1].range, SampleRange::new(170, 270));
        assert_eq!(packets[2].range, SampleRange::new(270, 310));
    }

    #[test]
    fn test_reset_inside_break() {
        let config = config().with_idle_bits(4);
        let mut decoder = UartDecoder::new(config.clone());
        decoder.machine.goto(UartState::BreakHeld);
        decoder.break_start = 40;
        decoder.idle_from = Some(10);
        decoder.reset();
        assert_eq!(decoder.state(), UartState::INITIAL);
        assert_eq!(decoder.idle_from, None);

        let mut cut = SignalBuilder::new(1);
        cut.set(0, true).hold(30);
        cut.uart_break(0, 20, BIT);
        let cut = cut.into_capture();
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(30);
        signal.uart(0, &config, BIT, 0x41);
        signal.hold(20);
        let capture = signal.into_capture();

        // The first capture ends with the line still held low
        let mut stack = DecoderStack::new(decoder).with_samplerate(1000);
        let mut collector = PacketCollector::<UartPacket>::new();
        stack
            .run_with_tap(
                cut.samples().take_while(|s| s.index < 200),
                &mut AnnotationLog::new(),
                &mut collector,
            )
            .unwrap();
        assert!(collector.packets().is_empty());

        let mut collector = PacketCollector::<UartPacket>::new();
        let report = stack
            .run_with_tap(capture.samples(), &mut AnnotationLog::new(), &mut collector)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report);
        let values: Vec<UartPacket> = collector.values().copied().collect();
        assert_eq!(values, vec![data(0x41, None, true)]);
    }

    #[test]
    fn test_inverted_line() {
        let config = config().with_invert(true);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, false).hold(30);
        signal.uart(0, &config, BIT, 0xA5);
        signal.hold(50);
        let (packets, _) = run(config, signal);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].value, data(0xA5, None, true));
    }

    #[test]
    fn test_config_validation() {
        let mut decoder = UartDecoder::new(config().with_data_bits(10));
        let metadata = Metadata::new().with_samplerate(1000);
        assert!(matches!(
            decoder.start(&metadata),
            Err(ConfigError::InvalidOption { option: "data_bits", .. })
        ));
        let mut fast = UartDecoder::new(config().with_baudrate(500));
        assert!(fast.start(&metadata).is_err());
        let mut ok = UartDecoder::new(config());
        assert!(ok.start(&metadata).is_ok());
        assert_eq!(ok.start(&Metadata::new()), Err(ConfigError::MissingSamplerate));
    }
}
