//! LIN decoder on top of UART
//!
//! A frame is a break, the sync byte 0x55, the protected identifier, up to
//! eight data bytes, and a checksum. The response length is not on the wire,
//! so the frame is closed by the next break and the last byte received is
//! taken as the checksum. An idle line drops whatever was accumulated.

use super::uart::{UART, UartFrame, UartPacket};
use crate::runtime::checksum::LinChecksum;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{SampleRange, Spanned};
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Scratch, Step};
use tracing::{debug, warn};

/// Output tag
pub const LIN: &str = "lin";

pub const SYNC: u8 = 0x55;

const MAX_DATA: usize = 8;

const BREAK: usize = 0;
const SYNC_CLASS: usize = 1;
const PID: usize = 2;
const DATA: usize = 3;
const CHECKSUM: usize = 4;
const CHECKSUM_ERROR: usize = 5;
const WARNING: usize = 6;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("break", "Break"),
    AnnotationClass::new("sync", "Sync field"),
    AnnotationClass::new("pid", "Protected identifier"),
    AnnotationClass::new("data", "Data"),
    AnnotationClass::new("checksum", "Checksum"),
    AnnotationClass::new("checksum-error", "Checksum mismatch"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("frame", "Frame", &[BREAK, SYNC_CLASS, PID, DATA, CHECKSUM]),
    AnnotationRow::new("errors", "Errors", &[CHECKSUM_ERROR, WARNING]),
];

/// Checksum model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinVersion {
    /// Classic checksum over the data bytes only
    V1,
    /// Enhanced checksum that also covers the protected identifier
    #[default]
    V2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinConfig {
    pub version: LinVersion,
}

impl LinConfig {
    pub fn with_version(mut self, version: LinVersion) -> Self {
        self.version = version;
        self
    }
}

/// Identifier with its two parity bits
pub fn protected_id(id: u8) -> u8 {
    let bit = |n: u8| (id >> n) & 1;
    let p0 = bit(0) ^ bit(1) ^ bit(2) ^ bit(4);
    let p1 = !(bit(1) ^ bit(3) ^ bit(4) ^ bit(5)) & 1;
    (id & 0x3F) | (p0 << 6) | (p1 << 7)
}

/// Diagnostic frames always use the classic checksum
fn is_diagnostic(id: u8) -> bool {
    id == 0x3C || id == 0x3D
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinFrame {
    pub id: u8,
    pub pid: u8,
    pub parity_ok: bool,
    pub data: Vec<u8>,
    pub checksum: u8,
    pub checksum_valid: bool,
    /// Whether the checksum was checked as enhanced
    pub enhanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinState {
    WaitBreak,
    Sync,
    Pid,
    /// Data and checksum bytes
    Data,
}

impl FrameState for LinState {
    const INITIAL: Self = LinState::WaitBreak;
    const ALL: &'static [Self] = &[LinState::WaitBreak, LinState::Sync, LinState::Pid, LinState::Data];

    fn name(&self) -> &'static str {
        match self {
            LinState::WaitBreak => "WAIT BREAK",
            LinState::Sync => "SYNC",
            LinState::Pid => "PID",
            LinState::Data => "DATA",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Header {
    pid: Option<Spanned<u8>>,
    bytes: Vec<Spanned<u8>>,
}

/// LIN decoder
///
/// Input: [`UartPacket`]s
/// Output: [`LinFrame`]s
pub struct LinDecoder {
    name: String,
    config: LinConfig,
    machine: FrameMachine<LinState>,
    frame: Scratch<Header>,
}

impl LinDecoder {
    pub fn new(config: LinConfig) -> Self {
        Self {
            name: "lin".to_string(),
            config,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            frame: Scratch::new(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> LinState {
        self.machine.state()
    }

    fn invalid(
        &mut self,
        range: SampleRange,
        reason: &'static str,
        out: &mut Output<'_, LinFrame>,
    ) -> WorkResult<()> {
        self.machine.apply(Step::Invalid(reason));
        if !self.frame.is_open() {
            return Ok(());
        }
        self.frame.discard();
        debug!("LIN frame dropped: {}", reason);
        out.annotate(range, WARNING, [format!("Frame dropped: {}", reason), "Dropped".to_string()])
    }

    fn begin(&mut self, range: SampleRange, out: &mut Output<'_, LinFrame>) -> WorkResult<()> {
        out.annotate(range, BREAK, ["Break", "B"])?;
        self.frame.begin(Header::default(), range);
        self.machine.goto(LinState::Sync);
        Ok(())
    }

    /// Emit the open frame, if it got as far as a response
    fn close(&mut self, out: &mut Output<'_, LinFrame>) -> WorkResult<()> {
        self.machine.goto(LinState::WaitBreak);
        let Some(Spanned { range, value: header }) = self.frame.commit() else {
            return Ok(());
        };
        let Some(pid) = header.pid else {
            return Ok(());
        };
        let Some((checksum, data)) = header.bytes.split_last() else {
            warn!("LIN header 0x{:02X} without response", pid.value);
            return out.annotate(pid.range, WARNING, ["Header without response", "No response"]);
        };

        let id = pid.value & 0x3F;
        let enhanced = self.config.version == LinVersion::V2 && !is_diagnostic(id);
        let mut sum = LinChecksum::new();
        if enhanced {
            sum.update(&[pid.value]);
        }
        let values: Vec<u8> = data.iter().map(|b| b.value).collect();
        sum.update(&values);
        let expected = sum.finish();
        let checksum_valid = checksum.value == expected;

        let kind = if enhanced { "enhanced" } else { "classic" };
        out.annotate(
            checksum.range,
            CHECKSUM,
            [format!("Checksum: 0x{:02X} ({})", checksum.value, kind), format!("{:02X}", checksum.value)],
        )?;
        if !checksum_valid {
            out.annotate(
                checksum.range,
                CHECKSUM_ERROR,
                [format!("Checksum mismatch: expected 0x{:02X}", expected), "Bad checksum".to_string()],
            )?;
        }

        let frame = LinFrame {
            id,
            pid: pid.value,
            parity_ok: protected_id(id) == pid.value,
            data: values,
            checksum: checksum.value,
            checksum_valid,
            enhanced,
        };
        debug!("LIN frame {:?}", frame);
        out.packet(range, frame)
    }

    fn byte(&mut self, frame: UartFrame, range: SampleRange, out: &mut Output<'_, LinFrame>) -> WorkResult<()> {
        if !frame.stop_ok {
            return self.invalid(range, "UART framing error", out);
        }
        let value = frame.value as u8;
        match self.machine.state() {
            LinState::WaitBreak => {
                self.machine.apply(Step::Ignore);
            }
            LinState::Sync => {
                if value != SYNC {
                    return self.invalid(range, "bad sync byte", out);
                }
                out.annotate(range, SYNC_CLASS, ["Sync", "S"])?;
                self.frame.extend(range);
                self.machine.goto(LinState::Pid);
            }
            LinState::Pid => {
                let id = value & 0x3F;
                let parity_ok = protected_id(id) == value;
                out.annotate(
                    range,
                    PID,
                    [format!("ID: 0x{:02X}, parity {}", id, if parity_ok { "ok" } else { "error" }), format!("0x{:02X}", id)],
                )?;
                if !parity_ok {
                    out.annotate(range, WARNING, ["PID parity error", "Parity"])?;
                }
                if let Some(header) = self.frame.record_mut() {
                    header.pid = Some(Spanned::new(range, value));
                }
                self.frame.extend(range);
                self.machine.goto(LinState::Data);
            }
            LinState::Data => {
                let full = self.frame.record().is_some_and(|h| h.bytes.len() > MAX_DATA);
                if full {
                    return self.invalid(range, "response too long", out);
                }
                out.annotate(range, DATA, [format!("Data: 0x{:02X}", value), format!("{:02X}", value)])?;
                if let Some(header) = self.frame.record_mut() {
                    header.bytes.push(Spanned::new(range, value));
                }
                self.frame.extend(range);
            }
        }
        Ok(())
    }
}

impl Default for LinDecoder {
    fn default() -> Self {
        Self::new(LinConfig::default())
    }
}

impl Decoder for LinDecoder {
    type Output = LinFrame;

    fn id(&self) -> &'static str {
        "lin"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        UART
    }

    fn outputs(&self) -> &'static str {
        LIN
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
        self.frame.discard();
    }
}

impl StackedDecoder for LinDecoder {
    type Input = UartPacket;

    fn feed(&mut self, packet: Spanned<UartPacket>, out: &mut Output<'_, LinFrame>) -> WorkResult<()> {
        match packet.value {
            UartPacket::Break => {
                if self.machine.is(LinState::Data) {
                    self.close(out)?;
                } else if self.machine.is(LinState::Pid) {
                    self.invalid(packet.range, "break inside header", out)?;
                }
                self.begin(packet.range, out)
            }
            UartPacket::Idle => {
                if self.frame.is_open() {
                    debug!("LIN frame reset on idle in {}", self.machine.state().name());
                    self.frame.discard();
                }
                self.machine.goto(LinState::WaitBreak);
                Ok(())
            }
            UartPacket::Data(frame) => self.byte(frame, packet.range, out),
        }
    }
}
