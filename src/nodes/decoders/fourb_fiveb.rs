//! 4B5B block code decoder
//!
//! Bits from the line decoder are scanned for the J/K start delimiter. From
//! there every five bits form a code group: data groups carry one nibble
//! (low nibble first), T/R closes the stream. Anything else inside a stream
//! is a code violation: a warning is annotated and the decoder hunts for the
//! next J/K.

use super::nrzi::BITS;
use crate::runtime::accumulator::{BitOrder, PushOutcome, SlidingWindow, SymbolAccumulator};
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{SampleRange, Spanned};
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Step};
use tracing::{debug, trace};

/// Output tag
pub const FOURB_FIVEB: &str = "4b5b";

/// Idle
pub const CODE_I: u8 = 0b11111;
/// First half of the start delimiter
pub const CODE_J: u8 = 0b11000;
/// Second half of the start delimiter
pub const CODE_K: u8 = 0b10001;
/// First half of the end delimiter
pub const CODE_T: u8 = 0b01101;
/// Second half of the end delimiter
pub const CODE_R: u8 = 0b00111;
pub const CODE_H: u8 = 0b00100;
pub const CODE_Q: u8 = 0b00000;

/// J followed by K, oldest bit first
const START_DELIMITER: u64 = ((CODE_J as u64) << 5) | CODE_K as u64;

const DATA_CODES: [u8; 16] = [
    0b11110, 0b01001, 0b10100, 0b10101, 0b01010, 0b01011, 0b01110, 0b01111, 0b10010, 0b10011,
    0b10110, 0b10111, 0b11010, 0b11011, 0b11100, 0b11101,
];

const CONTROL: usize = 0;
const NIBBLE: usize = 1;
const BYTE: usize = 2;
const WARNING: usize = 3;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("control", "Control code"),
    AnnotationClass::new("nibble", "Data code"),
    AnnotationClass::new("byte", "Byte"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("codes", "Codes", &[CONTROL, NIBBLE]),
    AnnotationRow::new("bytes", "Bytes", &[BYTE]),
    AnnotationRow::new("warnings", "Warnings", &[WARNING]),
];

/// Code group for a data nibble
pub fn encode_nibble(nibble: u8) -> u8 {
    DATA_CODES[usize::from(nibble & 0x0F)]
}

/// Meaning of one 5-bit code group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Data(u8),
    Idle,
    J,
    K,
    T,
    R,
    Halt,
    Quiet,
    Invalid(u8),
}

impl Code {
    pub fn decode(code: u8) -> Self {
        if let Some(nibble) = DATA_CODES.iter().position(|&c| c == code) {
            return Code::Data(nibble as u8);
        }
        match code {
            CODE_I => Code::Idle,
            CODE_J => Code::J,
            CODE_K => Code::K,
            CODE_T => Code::T,
            CODE_R => Code::R,
            CODE_H => Code::Halt,
            CODE_Q => Code::Quiet,
            other => Code::Invalid(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Code::Data(nibble) => format!("0x{:X}", nibble),
            Code::Idle => "I".to_string(),
            Code::J => "J".to_string(),
            Code::K => "K".to_string(),
            Code::T => "T".to_string(),
            Code::R => "R".to_string(),
            Code::Halt => "H".to_string(),
            Code::Quiet => "Q".to_string(),
            Code::Invalid(code) => format!("0b{:05b}", code),
        }
    }
}

/// Packets handed to the framing layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourBFiveB {
    /// J/K seen
    StreamStart,
    Byte(u8),
    /// T/R seen
    StreamEnd,
    /// Unexpected code group inside a stream; the stream is over
    Violation(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourBFiveBState {
    Hunt,
    LowNibble,
    HighNibble,
    /// T seen, R must follow
    Terminate,
}

impl FrameState for FourBFiveBState {
    const INITIAL: Self = FourBFiveBState::Hunt;
    const ALL: &'static [Self] = &[
        FourBFiveBState::Hunt,
        FourBFiveBState::LowNibble,
        FourBFiveBState::HighNibble,
        FourBFiveBState::Terminate,
    ];

    fn name(&self) -> &'static str {
        match self {
            FourBFiveBState::Hunt => "HUNT",
            FourBFiveBState::LowNibble => "LOW NIBBLE",
            FourBFiveBState::HighNibble => "HIGH NIBBLE",
            FourBFiveBState::Terminate => "TERMINATE",
        }
    }
}

/// 4B5B decoder
///
/// Input: `bool` bits ([`BITS`])
/// Output: [`FourBFiveB`] packets
pub struct FourBFiveBDecoder {
    name: String,
    machine: FrameMachine<FourBFiveBState>,
    window: SlidingWindow,
    code: SymbolAccumulator,
    /// Low nibble waiting for its high half
    low: Option<Spanned<u8>>,
    /// Range of the T code
    terminate: Option<SampleRange>,
}

impl FourBFiveBDecoder {
    pub fn new() -> Self {
        Self {
            name: "4b5b".to_string(),
            machine: FrameMachine::new(InvalidPolicy::Reset),
            window: SlidingWindow::new(10),
            code: SymbolAccumulator::new(5, BitOrder::MsbFirst),
            low: None,
            terminate: None,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> FourBFiveBState {
        self.machine.state()
    }

    fn clear(&mut self) {
        self.window.clear();
        self.code.clear();
        self.low = None;
        self.terminate = None;
    }

    fn on_code(
        &mut self,
        code: u8,
        range: SampleRange,
        out: &mut Output<'_, FourBFiveB>,
    ) -> WorkResult<()> {
        let decoded = Code::decode(code);
        trace!("4B5B code {} in {}", decoded.label(), self.machine.state().name());

        match (self.machine.state(), decoded) {
            (FourBFiveBState::LowNibble, Code::Data(nibble)) => {
                out.annotate(range, NIBBLE, [format!("Nibble 0x{:X}", nibble), format!("{:X}", nibble)])?;
                self.low = Some(Spanned::new(range, nibble));
                self.machine.goto(FourBFiveBState::HighNibble);
            }
            (FourBFiveBState::LowNibble, Code::T) => {
                out.annotate(range, CONTROL, ["End of stream (T)", "T"])?;
                self.terminate = Some(range);
                self.machine.goto(FourBFiveBState::Terminate);
            }
            (FourBFiveBState::HighNibble, Code::Data(nibble)) => {
                out.annotate(range, NIBBLE, [format!("Nibble 0x{:X}", nibble), format!("{:X}", nibble)])?;
                let Some(low) = self.low.take() else {
                    return self.violation(code, decoded, range, out);
                };
                let byte = (nibble << 4) | low.value;
                let range = low.range.union(range);
                out.annotate(range, BYTE, [format!("Byte 0x{:02X}", byte), format!("{:02X}", byte)])?;
                out.packet(range, FourBFiveB::Byte(byte))?;
                self.machine.goto(FourBFiveBState::LowNibble);
            }
            (FourBFiveBState::Terminate, Code::R) => {
                out.annotate(range, CONTROL, ["End of stream (R)", "R"])?;
                let range = self.terminate.take().map_or(range, |t| t.union(range));
                debug!("4B5B end of stream at {}", range);
                out.packet(range, FourBFiveB::StreamEnd)?;
                self.machine.goto(FourBFiveBState::Hunt);
                self.clear();
            }
            _ => return self.violation(code, decoded, range, out),
        }
        Ok(())
    }

    fn violation(
        &mut self,
        code: u8,
        decoded: Code,
        range: SampleRange,
        out: &mut Output<'_, FourBFiveB>,
    ) -> WorkResult<()> {
        let state = self.machine.state();
        self.machine.apply(Step::Invalid("unexpected code group"));
        debug!("4B5B violation: {} in {}", decoded.label(), state.name());
        out.annotate(
            range,
            WARNING,
            [
                format!("Unexpected {} in {}", decoded.label(), state.name()),
                "Code violation".to_string(),
                "V".to_string(),
            ],
        )?;
        out.packet(range, FourBFiveB::Violation(code))?;
        self.clear();
        Ok(())
    }
}

impl Default for FourBFiveBDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FourBFiveBDecoder {
    type Output = FourBFiveB;

    fn id(&self) -> &'static str {
        "4b5b"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        BITS
    }

    fn outputs(&self) -> &'static str {
        FOURB_FIVEB
    }

    fn annotation_classes(&self) -> &'static [AnnotationClass] {
        CLASSES
    }

    fn annotation_rows(&self) -> &'static [AnnotationRow] {
        ROWS
    }

    fn start(&mut self, _metadata: &Metadata) -> Result<(), ConfigError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.clear();
    }
}

impl StackedDecoder for FourBFiveBDecoder {
    type Input = bool;

    fn feed(&mut self, packet: Spanned<bool>, out: &mut Output<'_, FourBFiveB>) -> WorkResult<()> {
        if self.machine.is(FourBFiveBState::Hunt) {
            self.window.push(packet.value, packet.range);
            if !self.window.matches(START_DELIMITER) {
                return Ok(());
            }
            if let Some(range) = self.window.range() {
                debug!("4B5B start of stream at {}", range);
                out.annotate(range, CONTROL, ["Start of stream (J/K)", "J/K"])?;
                out.packet(range, FourBFiveB::StreamStart)?;
            }
            self.window.clear();
            self.machine.goto(FourBFiveBState::LowNibble);
            return Ok(());
        }

        if self.code.push(packet.value, packet.range) == PushOutcome::Pending {
            return Ok(());
        }
        match self.code.flush() {
            Some(symbol) => self.on_code(symbol.value as u8, symbol.range, out),
            None => Ok(()),
        }
    }
}
