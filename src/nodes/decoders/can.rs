//! CAN 2.0 decoder
//!
//! Bits are sampled at the configured sample point of each bit time. Every
//! recessive to dominant edge restarts the bit timing at that edge, which
//! keeps the sample point in place across long frames.
//!
//! From SOF to the end of the CRC the raw bits go through a [`Destuffer`];
//! field positions index the destuffed stream:
//!
//! ```text
//! standard: SOF | ID 1..12 | RTR 12 | IDE 13 | r0 14 | DLC 15..19 | data | CRC 15
//! extended: SOF | ID 1..12 | SRR 12 | IDE 13 | ID 14..32 | RTR 32 | r1 33 | r0 34 | DLC 35..39 | data | CRC 15
//! ```
//!
//! The trailer (CRC delimiter, ACK slot, ACK delimiter, 7 EOF bits) is not
//! stuffed. Stuff and form errors drop the frame; decoding resumes once the
//! bus has been recessive for 7 bit times.

use super::types::hex_bytes;
use crate::runtime::accumulator::{Destuffer, StuffOutcome};
use crate::runtime::checksum::Crc15Can;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, EdgeWaiter, LOGIC, LogicDecoder,
    Metadata, Output, WorkResult,
};
use crate::runtime::sample::SampleRange;
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Scratch, Step};
use crate::runtime::waiter::{Condition, Term};
use tracing::{debug, trace};

/// Output tag
pub const CAN: &str = "can";

const START: usize = 0;
const IDENTIFIER: usize = 1;
const CONTROL: usize = 2;
const DATA: usize = 3;
const CRC: usize = 4;
const ACK: usize = 5;
const END: usize = 6;
const STUFF: usize = 7;
const FRAME: usize = 8;
const WARNING: usize = 9;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("sof", "Start of frame"),
    AnnotationClass::new("id", "Identifier"),
    AnnotationClass::new("control", "Control field"),
    AnnotationClass::new("data", "Data byte"),
    AnnotationClass::new("crc", "CRC"),
    AnnotationClass::new("ack", "ACK"),
    AnnotationClass::new("eof", "End of frame"),
    AnnotationClass::new("stuff", "Stuff bit"),
    AnnotationClass::new("frame", "Frame"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("fields", "Fields", &[START, IDENTIFIER, CONTROL, DATA, CRC, ACK, END]),
    AnnotationRow::new("stuff", "Stuff bits", &[STUFF]),
    AnnotationRow::new("frames", "Frames", &[FRAME]),
    AnnotationRow::new("warnings", "Warnings", &[WARNING]),
];

const RECESSIVE_RESYNC_BITS: f64 = 7.0;
const EOF_BITS: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct CanConfig {
    pub channel: usize,
    /// Bits per second
    pub bitrate: u64,
    /// Sample point in percent of the bit time, 50 to 90
    pub sample_point: u8,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            bitrate: 500_000,
            sample_point: 70,
        }
    }
}

impl CanConfig {
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_sample_point(mut self, sample_point: u8) -> Self {
        self.sample_point = sample_point;
        self
    }
}

/// One data or remote frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanFrame {
    /// 11 or 29 bit identifier
    pub id: u32,
    pub extended: bool,
    /// Remote frame, no data field
    pub rtr: bool,
    /// Data length code as sent (0-15)
    pub dlc: u8,
    pub data: Vec<u8>,
    pub crc: u16,
    pub crc_valid: bool,
    /// ACK slot was dominant
    pub acked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanState {
    /// Waiting for SOF
    Idle,
    /// Waiting for 7 recessive bits after an error
    WaitIdle,
    Arbitration,
    Control,
    Data,
    Crc,
    CrcDelimiter,
    AckSlot,
    AckDelimiter,
    EndOfFrame,
}

impl FrameState for CanState {
    const INITIAL: Self = CanState::Idle;
    const ALL: &'static [Self] = &[
        CanState::Idle,
        CanState::WaitIdle,
        CanState::Arbitration,
        CanState::Control,
        CanState::Data,
        CanState::Crc,
        CanState::CrcDelimiter,
        CanState::AckSlot,
        CanState::AckDelimiter,
        CanState::EndOfFrame,
    ];

    fn name(&self) -> &'static str {
        match self {
            CanState::Idle => "IDLE",
            CanState::WaitIdle => "WAIT IDLE",
            CanState::Arbitration => "ARBITRATION",
            CanState::Control => "CONTROL",
            CanState::Data => "DATA",
            CanState::Crc => "CRC",
            CanState::CrcDelimiter => "CRC DELIMITER",
            CanState::AckSlot => "ACK SLOT",
            CanState::AckDelimiter => "ACK DELIMITER",
            CanState::EndOfFrame => "EOF",
        }
    }
}

/// Destuffed bit positions of the variable part of the frame
#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    dlc_at: usize,
    data_at: usize,
    crc_at: usize,
}

/// CAN decoder
///
/// Input: one logic channel (CAN RX)
/// Output: [`CanFrame`]s
pub struct CanDecoder {
    name: String,
    config: CanConfig,
    /// Samples per bit
    width: f64,
    machine: FrameMachine<CanState>,
    destuffer: Destuffer,
    frame: Scratch<CanFrame>,
    layout: Layout,
    /// CRC received, one trailing stuff bit still expected
    crc_done: bool,
    eof_bits: u8,
    eof_start: u64,
    /// Start of the bit timing, moved by every falling edge
    sync_at: u64,
    /// Bits since `sync_at`
    bit: u64,
}

impl CanDecoder {
    pub fn new(config: CanConfig) -> Self {
        Self {
            name: "can".to_string(),
            config,
            width: 0.0,
            machine: FrameMachine::new(InvalidPolicy::Enter(CanState::WaitIdle)),
            destuffer: Destuffer::new(5),
            frame: Scratch::new(),
            layout: Layout::default(),
            crc_done: false,
            eof_bits: 0,
            eof_start: 0,
            sync_at: 0,
            bit: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> CanState {
        self.machine.state()
    }

    fn offset(&self, bits: f64) -> u64 {
        self.sync_at + (bits * self.width).round() as u64
    }

    fn resync(&mut self, edge: u64) {
        self.sync_at = edge;
        self.bit = 0;
    }

    /// Sample the next bit, following every falling edge on the way
    fn next_bit(&mut self, waiter: &mut EdgeWaiter<'_>) -> WorkResult<(bool, SampleRange)> {
        let channel = self.config.channel;
        let sample_point = f64::from(self.config.sample_point) / 100.0;
        loop {
            let target = self.offset(self.bit as f64 + sample_point);
            let position = waiter.current()?.index;
            let matched = waiter.wait(&[
                Term::new().falling(channel),
                Term::new().skip(target.saturating_sub(position)),
            ])?;
            if matched.fired(0) {
                self.resync(matched.index());
                continue;
            }
            let range = SampleRange::new(
                self.offset(self.bit as f64),
                self.offset(self.bit as f64 + 1.0),
            );
            self.bit += 1;
            return Ok((matched.level(channel), range));
        }
    }

    fn bit_at(&self, index: usize) -> bool {
        self.destuffer
            .destuffed()
            .get(index)
            .is_some_and(|bit| bit.value)
    }

    fn begin_frame(&mut self, range: SampleRange, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        self.destuffer.clear();
        self.destuffer.push(false, range);
        self.frame.begin(CanFrame::default(), range);
        self.layout = Layout::default();
        self.crc_done = false;
        self.eof_bits = 0;
        out.annotate(range, START, ["Start of frame", "SOF", "S"])?;
        self.machine.goto(CanState::Arbitration);
        Ok(())
    }

    /// Drop the frame and wait for the bus to go idle
    fn framing_error(
        &mut self,
        range: SampleRange,
        reason: &'static str,
        out: &mut Output<'_, CanFrame>,
    ) -> WorkResult<()> {
        let state = self.machine.state();
        self.machine.apply(Step::Invalid(reason));
        self.frame.discard();
        debug!("CAN {} in {} at {}", reason, state.name(), range);
        out.annotate(range, WARNING, [format!("{} in {}", reason, state.name()), reason.to_string()])
    }

    fn on_bit(&mut self, bit: bool, range: SampleRange, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        match self.machine.state() {
            CanState::CrcDelimiter => {
                if !bit {
                    return self.framing_error(range, "Form error", out);
                }
                self.machine.goto(CanState::AckSlot);
                Ok(())
            }
            CanState::AckSlot => {
                if let Some(frame) = self.frame.record_mut() {
                    frame.acked = !bit;
                }
                if bit {
                    out.annotate(range, ACK, ["No ACK", "NA"])?;
                } else {
                    out.annotate(range, ACK, ["ACK", "A"])?;
                }
                self.machine.goto(CanState::AckDelimiter);
                Ok(())
            }
            CanState::AckDelimiter => {
                if !bit {
                    return self.framing_error(range, "Form error", out);
                }
                self.machine.goto(CanState::EndOfFrame);
                Ok(())
            }
            CanState::EndOfFrame => self.end_of_frame(bit, range, out),
            _ => self.on_stuffed_bit(bit, range, out),
        }
    }

    fn on_stuffed_bit(
        &mut self,
        bit: bool,
        range: SampleRange,
        out: &mut Output<'_, CanFrame>,
    ) -> WorkResult<()> {
        match self.destuffer.push(bit, range) {
            StuffOutcome::StuffError => return self.framing_error(range, "Stuff error", out),
            StuffOutcome::Stuff => {
                trace!("CAN stuff bit at {}", range);
                out.annotate(range, STUFF, ["Stuff bit", "S"])?;
                if self.crc_done {
                    self.destuffer.disable();
                    self.machine.goto(CanState::CrcDelimiter);
                }
                return Ok(());
            }
            StuffOutcome::Data(_) => {}
        }

        let index = self.destuffer.destuffed().len() - 1;
        match self.machine.state() {
            CanState::Arbitration => self.arbitration(index, out),
            CanState::Control => self.control(index, out),
            CanState::Data => self.data(index, out),
            CanState::Crc => self.crc(index, out),
            _ => Ok(()),
        }
    }

    fn arbitration(&mut self, index: usize, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        let (id, range, rtr, dlc_at) = match index {
            13 if self.bit_at(13) => {
                if let Some(frame) = self.frame.record_mut() {
                    frame.extended = true;
                }
                return Ok(());
            }
            13 => {
                let Some(id) = self.destuffer.field(1, 11) else {
                    return Ok(());
                };
                (id.value as u32, id.range, self.bit_at(12), 15)
            }
            32 => {
                let (Some(high), Some(low)) = (self.destuffer.field(1, 11), self.destuffer.field(14, 18)) else {
                    return Ok(());
                };
                let id = ((high.value as u32) << 18) | low.value as u32;
                (id, high.range.union(low.range), self.bit_at(32), 35)
            }
            _ => return Ok(()),
        };

        let extended = index == 32;
        if let Some(frame) = self.frame.record_mut() {
            frame.id = id;
            frame.rtr = rtr;
        }
        self.layout.dlc_at = dlc_at;
        if extended {
            out.annotate(
                range,
                IDENTIFIER,
                [
                    format!("Extended identifier: 0x{:08X}", id),
                    format!("ID 0x{:08X}", id),
                    format!("0x{:08X}", id),
                ],
            )?;
        } else {
            out.annotate(
                range,
                IDENTIFIER,
                [
                    format!("Identifier: 0x{:03X}", id),
                    format!("ID 0x{:03X}", id),
                    format!("0x{:03X}", id),
                ],
            )?;
        }
        if let Some(rtr_bit) = self.destuffer.destuffed().get(index - 1 + usize::from(extended)) {
            if rtr {
                out.annotate(rtr_bit.range, CONTROL, ["Remote frame", "RTR"])?;
            } else {
                out.annotate(rtr_bit.range, CONTROL, ["Data frame", "DF"])?;
            }
        }
        self.machine.goto(CanState::Control);
        Ok(())
    }

    fn control(&mut self, index: usize, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        if index != self.layout.dlc_at + 3 {
            return Ok(());
        }
        let Some(dlc) = self.destuffer.field(self.layout.dlc_at, 4) else {
            return Ok(());
        };
        let rtr = self.frame.record().is_some_and(|frame| frame.rtr);
        let data_len = if rtr { 0 } else { (dlc.value as usize).min(8) };
        if let Some(frame) = self.frame.record_mut() {
            frame.dlc = dlc.value as u8;
        }
        self.layout.data_at = index + 1;
        self.layout.crc_at = self.layout.data_at + 8 * data_len;
        out.annotate(
            dlc.range,
            CONTROL,
            [
                format!("Data length: {}", dlc.value),
                format!("DLC {}", dlc.value),
                format!("{}", dlc.value),
            ],
        )?;
        if data_len == 0 {
            self.machine.goto(CanState::Crc);
        } else {
            self.machine.goto(CanState::Data);
        }
        Ok(())
    }

    fn data(&mut self, index: usize, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        let offset = index + 1 - self.layout.data_at;
        if offset % 8 != 0 {
            return Ok(());
        }
        let Some(byte) = self.destuffer.field(index - 7, 8) else {
            return Ok(());
        };
        let number = offset / 8 - 1;
        if let Some(frame) = self.frame.record_mut() {
            frame.data.push(byte.value as u8);
        }
        out.annotate(
            byte.range,
            DATA,
            [
                format!("Data byte {}: 0x{:02X}", number, byte.value),
                format!("0x{:02X}", byte.value),
                format!("{:02X}", byte.value),
            ],
        )?;
        if index + 1 == self.layout.crc_at {
            self.machine.goto(CanState::Crc);
        }
        Ok(())
    }

    fn crc(&mut self, index: usize, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        let crc_at = self.layout.crc_at;
        if index + 1 != crc_at + 15 {
            return Ok(());
        }
        let Some(received) = self.destuffer.field(crc_at, 15) else {
            return Ok(());
        };
        let mut crc = Crc15Can::new();
        for bit in &self.destuffer.destuffed()[..crc_at] {
            crc.update_bit(bit.value);
        }
        let expected = crc.finish();
        let received_crc = received.value as u16;
        let valid = expected == received_crc;
        if let Some(frame) = self.frame.record_mut() {
            frame.crc = received_crc;
            frame.crc_valid = valid;
        }

        out.annotate(
            received.range,
            CRC,
            [format!("CRC: 0x{:04X}", received_crc), format!("{:04X}", received_crc)],
        )?;
        if !valid {
            out.annotate(
                received.range,
                WARNING,
                [format!("CRC mismatch: expected 0x{:04X}", expected), "CRC error".to_string()],
            )?;
        }

        if self.destuffer.stuff_due() {
            self.crc_done = true;
        } else {
            self.destuffer.disable();
            self.machine.goto(CanState::CrcDelimiter);
        }
        Ok(())
    }

    fn end_of_frame(&mut self, bit: bool, range: SampleRange, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        if !bit {
            return self.framing_error(range, "Form error", out);
        }
        if self.eof_bits == 0 {
            self.eof_start = range.start();
        }
        self.eof_bits += 1;
        if self.eof_bits < EOF_BITS {
            return Ok(());
        }

        out.annotate(
            SampleRange::new(self.eof_start, range.end()),
            END,
            ["End of frame", "EOF", "E"],
        )?;
        self.frame.extend(range);
        self.machine.goto(CanState::Idle);
        let Some(frame) = self.frame.commit() else {
            return Ok(());
        };

        let value = frame.value;
        let id = if value.extended {
            format!("0x{:08X}", value.id)
        } else {
            format!("0x{:03X}", value.id)
        };
        let kind = match (value.extended, value.rtr) {
            (false, false) => "Standard frame",
            (true, false) => "Extended frame",
            (false, true) => "Standard remote frame",
            (true, true) => "Extended remote frame",
        };
        let data = hex_bytes(&value.data);
        out.annotate(
            frame.range,
            FRAME,
            [
                format!("{} {}: {}", kind, id, data),
                format!("{}: {}", id, data),
                id.clone(),
            ],
        )?;
        debug!("CAN {} {} [{}] {}", kind, id, value.dlc, data);
        out.packet(frame.range, value)
    }
}

impl Decoder for CanDecoder {
    type Output = CanFrame;

    fn id(&self) -> &'static str {
        "can"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        LOGIC
    }

    fn outputs(&self) -> &'static str {
        CAN
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
        if !(50..=90).contains(&self.config.sample_point) {
            return Err(ConfigError::InvalidOption {
                option: "sample_point",
                reason: format!("{}% is not in 50..=90", self.config.sample_point),
            });
        }
        let width = samplerate as f64 / self.config.bitrate as f64;
        if width < 4.0 {
            return Err(ConfigError::InvalidOption {
                option: "bitrate",
                reason: format!("bit width of {:.2} samples is too short", width),
            });
        }
        self.width = width;
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.destuffer.clear();
        self.frame.discard();
        self.layout = Layout::default();
        self.crc_done = false;
        self.eof_bits = 0;
        self.eof_start = 0;
        self.sync_at = 0;
        self.bit = 0;
    }
}

impl LogicDecoder for CanDecoder {
    fn decode(&mut self, waiter: &mut EdgeWaiter<'_>, out: &mut Output<'_, CanFrame>) -> WorkResult<()> {
        let channel = self.config.channel;
        match self.machine.state() {
            CanState::Idle => {
                let edge = waiter.wait_for(Condition::Falling(channel))?.index;
                self.resync(edge);
                let (bit, range) = self.next_bit(waiter)?;
                if bit {
                    trace!("CAN glitch at {}", edge);
                    return Ok(());
                }
                self.begin_frame(range, out)
            }
            CanState::WaitIdle => {
                let quiet = (RECESSIVE_RESYNC_BITS * self.width).round() as u64;
                let matched = waiter.wait(&[Term::new().edge(channel), Term::new().skip(quiet)])?;
                if !matched.fired(0) && matched.level(channel) {
                    trace!("CAN bus idle at {}", matched.index());
                    self.machine.goto(CanState::Idle);
                }
                Ok(())
            }
            _ => {
                let (bit, range) = self.next_bit(waiter)?;
                self.on_bit(bit, range, out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::annotation::AnnotationLog;
    use crate::runtime::pipeline::DecoderStack;
    use crate::runtime::ports::PacketCollector;
    use crate::runtime::sample::Spanned;
    use crate::synth::{SignalBuilder, can_frame_bits};

    const BIT: u64 = 10;

    fn config() -> CanConfig {
        CanConfig::default().with_bitrate(100)
    }

    fn run(signal: SignalBuilder) -> (Vec<Spanned<CanFrame>>, AnnotationLog) {
        let capture = signal.into_capture();
        let mut stack = DecoderStack::new(CanDecoder::new(config())).with_samplerate(1000);
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<CanFrame>::new();
        let report = stack
            .run_with_tap(capture.samples(), &mut log, &mut collector)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report);
        (collector.into_packets(), log)
    }

    #[test]
    fn test_standard_data_frame() {
        let bits = can_frame_bits(0x123, false, false, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        signal.bits(0, &bits, BIT);
        signal.set(0, true).hold(100);

        let (frames, log) = run(signal);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.range, SampleRange::new(50, 50 + bits.len() as u64 * BIT));
        assert_eq!(frame.value.id, 0x123);
        assert!(!frame.value.extended);
        assert!(!frame.value.rtr);
        assert_eq!(frame.value.dlc, 4);
        assert_eq!(frame.value.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(frame.value.crc_valid);
        assert!(frame.value.acked);
        assert!(log.contains_text("can", "Standard frame 0x123: DE AD BE EF"));
        assert_eq!(log.class("can", WARNING).count(), 0);
    }

    #[test]
    fn test_extended_and_remote_frames() {
        let extended = can_frame_bits(0x0ABC_DEF1, true, false, &[0x01, 0x02]);
        let remote = can_frame_bits(0x7FF, false, true, &[0; 2]);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        signal.bits(0, &extended, BIT);
        signal.set(0, true).hold(3 * BIT);
        signal.bits(0, &remote, BIT);
        signal.set(0, true).hold(100);

        let (frames, _) = run(signal);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].value.id, 0x0ABC_DEF1);
        assert!(frames[0].value.extended);
        assert_eq!(frames[0].value.data, vec![0x01, 0x02]);
        assert!(frames[0].value.crc_valid);

        assert_eq!(frames[1].value.id, 0x7FF);
        assert!(frames[1].value.rtr);
        assert_eq!(frames[1].value.dlc, 2);
        assert!(frames[1].value.data.is_empty());
        assert!(frames[1].value.crc_valid);
    }

    #[test]
    fn test_missing_ack_is_reported() {
        let mut bits = can_frame_bits(0x042, false, false, &[0x55]);
        let ack_slot = bits.len() - 9;
        bits[ack_slot] = true;
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        signal.bits(0, &bits, BIT);
        signal.set(0, true).hold(100);

        let (frames, log) = run(signal);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].value.acked);
        assert!(frames[0].value.crc_valid);
        assert!(log.contains_text("can", "No ACK"));
    }

    #[test]
    fn test_stuff_error_resyncs_on_idle_bus() {
        let bits = can_frame_bits(0x321, false, false, &[0xA5]);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        // SOF and seven dominant bits: the sixth in a row breaks stuffing
        signal.bits(0, &[false; 8], BIT);
        signal.set(0, true).hold(100);
        let frame_start = signal.position();
        signal.bits(0, &bits, BIT);
        signal.set(0, true).hold(100);

        let (frames, log) = run(signal);
        assert_eq!(log.class("can", WARNING).count(), 1);
        assert!(log.contains_text("can", "Stuff error in ARBITRATION"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].value.id, 0x321);
        assert_eq!(frames[0].value.data, vec![0xA5]);
        assert_eq!(
            frames[0].range,
            SampleRange::new(frame_start, frame_start + bits.len() as u64 * BIT)
        );
    }

    #[test]
    fn test_reference_frame_bits() {
        // ID 0x123, DLC 2, data 55 01, CRC 0x169D, with stuff bits, ACKed
        const WIRE: &str = "0001001000110000011001010101000001001001011010011101\
                            1011111111";
        let bits: Vec<bool> = WIRE.bytes().map(|c| c == b'1').collect();
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        signal.bits(0, &bits, BIT);
        signal.set(0, true).hold(100);

        let (frames, log) = run(signal);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0].value;
        assert_eq!(frame.id, 0x123);
        assert!(!frame.extended);
        assert_eq!(frame.dlc, 2);
        assert_eq!(frame.data, vec![0x55, 0x01]);
        assert_eq!(frame.crc, 0x169D);
        assert!(frame.crc_valid);
        assert!(frame.acked);
        assert_eq!(log.class("can", WARNING).count(), 0);
    }

    #[test]
    fn test_reset_mid_frame() {
        let mut decoder = CanDecoder::new(config());
        decoder.machine.goto(CanState::WaitIdle);
        decoder.destuffer.push(false, SampleRange::point(1));
        decoder.crc_done = true;
        decoder.eof_bits = 3;
        decoder.sync_at = 400;
        decoder.bit = 12;
        decoder.reset();
        assert_eq!(decoder.state(), CanState::INITIAL);
        assert!(decoder.destuffer.raw().is_empty());
        assert!(!decoder.crc_done);
        assert_eq!((decoder.eof_bits, decoder.sync_at, decoder.bit), (0, 0, 0));

        let bits = can_frame_bits(0x0AB, false, false, &[0x11, 0x22]);
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(50);
        signal.bits(0, &bits, BIT);
        signal.set(0, true).hold(100);
        let capture = signal.into_capture();

        // Same stack: the capture cut inside the data field, then in full
        let mut stack = DecoderStack::new(decoder).with_samplerate(1000);
        let mut collector = PacketCollector::<CanFrame>::new();
        stack
            .run_with_tap(
                capture.samples().take_while(|s| s.index < 50 + 25 * BIT),
                &mut AnnotationLog::new(),
                &mut collector,
            )
            .unwrap();
        assert!(collector.packets().is_empty());

        let mut collector = PacketCollector::<CanFrame>::new();
        let report = stack
            .run_with_tap(capture.samples(), &mut AnnotationLog::new(), &mut collector)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report);
        let frames: Vec<&CanFrame> = collector.values().collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, 0x0AB);
        assert_eq!(frames[0].data, vec![0x11, 0x22]);
        assert!(frames[0].crc_valid);
    }

    #[test]
    fn test_config_validation() {
        let metadata = Metadata::new().with_samplerate(1000);
        let mut early = CanDecoder::new(config().with_sample_point(30));
        assert!(matches!(
            early.start(&metadata),
            Err(ConfigError::InvalidOption { option: "sample_point", .. })
        ));
        let mut fast = CanDecoder::new(CanConfig::default());
        assert!(fast.start(&metadata).is_err());
        let mut ok = CanDecoder::new(config());
        assert!(ok.start(&metadata).is_ok());
        assert_eq!(ok.start(&Metadata::new()), Err(ConfigError::MissingSamplerate));
    }
}
