//! SPI decoder
//!
//! Flow per transaction:
//!   1. Wait for CS to go active (skipped when there is no CS line)
//!   2. On each CLK sampling edge, read MOSI/MISO into the word accumulators
//!   3. After `bits_per_word` bits, emit a transfer
//!   4. CS going inactive ends the transaction; a partial word is dropped
//!      with a warning

use super::types::{CsPolarity, SpiMode};
use crate::runtime::accumulator::{BitOrder, SymbolAccumulator};
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, EdgeWaiter, LOGIC, LogicDecoder,
    Metadata, Output, WorkResult,
};
use crate::runtime::sample::SampleRange;
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy};
use crate::runtime::waiter::{Condition, Term};
use tracing::{debug, trace};

/// Output tag
pub const SPI: &str = "spi";

const MOSI_DATA: usize = 0;
const MISO_DATA: usize = 1;
const CS_CHANGE: usize = 2;
const WARNING: usize = 3;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("mosi-data", "MOSI data"),
    AnnotationClass::new("miso-data", "MISO data"),
    AnnotationClass::new("cs-change", "CS change"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("mosi", "MOSI", &[MOSI_DATA]),
    AnnotationRow::new("miso", "MISO", &[MISO_DATA]),
    AnnotationRow::new("other", "Other", &[CS_CHANGE, WARNING]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SpiConfig {
    pub cs: Option<usize>,
    pub clk: usize,
    pub mosi: Option<usize>,
    pub miso: Option<usize>,
    pub mode: SpiMode,
    /// 1 to 32
    pub bits_per_word: u8,
    pub bit_order: BitOrder,
    pub cs_polarity: CsPolarity,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            cs: Some(0),
            clk: 1,
            mosi: Some(2),
            miso: Some(3),
            mode: SpiMode::Mode0,
            bits_per_word: 8,
            bit_order: BitOrder::MsbFirst,
            cs_polarity: CsPolarity::ActiveLow,
        }
    }
}

impl SpiConfig {
    pub fn with_cs(mut self, cs: Option<usize>) -> Self {
        self.cs = cs;
        self
    }

    pub fn with_clk(mut self, clk: usize) -> Self {
        self.clk = clk;
        self
    }

    pub fn with_mosi(mut self, mosi: Option<usize>) -> Self {
        self.mosi = mosi;
        self
    }

    pub fn with_miso(mut self, miso: Option<usize>) -> Self {
        self.miso = miso;
        self
    }

    pub fn with_mode(mut self, mode: SpiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = bits;
        self
    }

    pub fn with_bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = bit_order;
        self
    }

    pub fn with_cs_polarity(mut self, cs_polarity: CsPolarity) -> Self {
        self.cs_polarity = cs_polarity;
        self
    }
}

/// One word in each direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTransfer {
    /// `None` without a MOSI line
    pub mosi: Option<u32>,
    /// `None` without a MISO line
    pub miso: Option<u32>,
}

/// Packets handed to stacked decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiPacket {
    CsChange { active: bool },
    Transfer(SpiTransfer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiState {
    /// CS inactive
    WaitSelect,
    /// Clocking words
    Transfer,
}

impl FrameState for SpiState {
    const INITIAL: Self = SpiState::WaitSelect;
    const ALL: &'static [Self] = &[SpiState::WaitSelect, SpiState::Transfer];

    fn name(&self) -> &'static str {
        match self {
            SpiState::WaitSelect => "WAIT SELECT",
            SpiState::Transfer => "TRANSFER",
        }
    }
}

/// SPI decoder
///
/// Input: cs (optional), clk, mosi and/or miso logic channels
/// Output: [`SpiPacket`]s
pub struct SpiDecoder {
    name: String,
    config: SpiConfig,
    machine: FrameMachine<SpiState>,
    mosi: SymbolAccumulator,
    miso: SymbolAccumulator,
    /// Transaction counter for logging
    tx_count: u64,
}

impl SpiDecoder {
    pub fn new(config: SpiConfig) -> Self {
        let mosi = SymbolAccumulator::new(config.bits_per_word.clamp(1, 32), config.bit_order);
        let miso = mosi.clone();
        Self {
            name: "spi".to_string(),
            config,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            mosi,
            miso,
            tx_count: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> SpiState {
        self.machine.state()
    }

    /// CS channel, unless chip select is ignored
    fn cs(&self) -> Option<usize> {
        match self.config.cs_polarity {
            CsPolarity::Disabled => None,
            _ => self.config.cs,
        }
    }

    fn cs_level(&self, active: bool) -> Option<Condition> {
        let cs = self.cs()?;
        let high = self.config.cs_polarity == CsPolarity::ActiveHigh;
        Some(if high == active {
            Condition::High(cs)
        } else {
            Condition::Low(cs)
        })
    }

    fn sampling_edge(&self) -> Condition {
        if self.config.mode.samples_on_rising() {
            Condition::Rising(self.config.clk)
        } else {
            Condition::Falling(self.config.clk)
        }
    }

    fn clear_word(&mut self) {
        self.mosi.clear();
        self.miso.clear();
    }

    fn deselect(&mut self, index: u64, out: &mut Output<'_, SpiPacket>) -> WorkResult<()> {
        let bits = self.mosi.len().max(self.miso.len());
        if bits > 0 {
            let range = self
                .mosi
                .range()
                .or(self.miso.range())
                .unwrap_or(SampleRange::point(index));
            debug!("Incomplete word: {}/{} bits", bits, self.config.bits_per_word);
            out.annotate(
                range,
                WARNING,
                [
                    format!("Incomplete word: {} of {} bits", bits, self.config.bits_per_word),
                    "Incomplete".to_string(),
                ],
            )?;
        }
        self.clear_word();

        let range = SampleRange::point(index);
        out.annotate(range, CS_CHANGE, ["CS inactive", "CS#"])?;
        out.packet(range, SpiPacket::CsChange { active: false })?;
        self.machine.goto(SpiState::WaitSelect);
        Ok(())
    }

    fn clock(&mut self, index: u64, levels: (Option<bool>, Option<bool>), out: &mut Output<'_, SpiPacket>) -> WorkResult<()> {
        let range = SampleRange::point(index);
        if let Some(bit) = levels.0 {
            self.mosi.push(bit, range);
        }
        if let Some(bit) = levels.1 {
            self.miso.push(bit, range);
        }
        trace!("bit at {}: MOSI={:?} MISO={:?}", index, levels.0, levels.1);

        let complete = self.mosi.is_complete() || self.miso.is_complete();
        if !complete {
            return Ok(());
        }

        let mosi = self.mosi.flush();
        let miso = self.miso.flush();
        let Some(range) = mosi.or(miso).map(|symbol| symbol.range) else {
            return Ok(());
        };
        let transfer = SpiTransfer {
            mosi: mosi.map(|symbol| symbol.value as u32),
            miso: miso.map(|symbol| symbol.value as u32),
        };
        let digits = usize::from(self.config.bits_per_word).div_ceil(4);
        if let Some(value) = transfer.mosi {
            out.annotate(
                range,
                MOSI_DATA,
                [format!("MOSI: 0x{:0w$X}", value, w = digits), format!("{:0w$X}", value, w = digits)],
            )?;
        }
        if let Some(value) = transfer.miso {
            out.annotate(
                range,
                MISO_DATA,
                [format!("MISO: 0x{:0w$X}", value, w = digits), format!("{:0w$X}", value, w = digits)],
            )?;
        }

        self.tx_count += 1;
        debug!("#{}: {:?} at {}", self.tx_count, transfer, range);
        out.packet(range, SpiPacket::Transfer(transfer))
    }
}

impl Decoder for SpiDecoder {
    type Output = SpiPacket;

    fn id(&self) -> &'static str {
        "spi"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        LOGIC
    }

    fn outputs(&self) -> &'static str {
        SPI
    }

    fn annotation_classes(&self) -> &'static [AnnotationClass] {
        CLASSES
    }

    fn annotation_rows(&self) -> &'static [AnnotationRow] {
        ROWS
    }

    fn start(&mut self, _metadata: &Metadata) -> Result<(), ConfigError> {
        if self.config.mosi.is_none() && self.config.miso.is_none() {
            return Err(ConfigError::MissingChannel("mosi or miso"));
        }
        let channels = [self.config.cs, Some(self.config.clk), self.config.mosi, self.config.miso];
        if let Some(channel) = channels.into_iter().flatten().find(|&ch| ch >= 64) {
            return Err(ConfigError::InvalidChannel(channel));
        }
        if !(1..=32).contains(&self.config.bits_per_word) {
            return Err(ConfigError::InvalidOption {
                option: "bits_per_word",
                reason: format!("{} is not in 1..=32", self.config.bits_per_word),
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.clear_word();
        self.tx_count = 0;
    }
}

impl LogicDecoder for SpiDecoder {
    fn decode(&mut self, waiter: &mut EdgeWaiter<'_>, out: &mut Output<'_, SpiPacket>) -> WorkResult<()> {
        match self.machine.state() {
            SpiState::WaitSelect => {
                let Some(active) = self.cs_level(true) else {
                    self.machine.goto(SpiState::Transfer);
                    return Ok(());
                };
                debug!("Waiting for CS active...");
                let sample = waiter.wait_for(active)?;
                let range = SampleRange::point(sample.index);
                out.annotate(range, CS_CHANGE, ["CS active", "CS"])?;
                out.packet(range, SpiPacket::CsChange { active: true })?;
                self.clear_word();
                self.machine.goto(SpiState::Transfer);
            }
            SpiState::Transfer => {
                let mut terms = vec![Term::from(self.sampling_edge())];
                if let Some(inactive) = self.cs_level(false) {
                    terms.push(Term::from(inactive));
                }
                let matched = waiter.wait(&terms)?;
                if matched.fired(1) {
                    return self.deselect(matched.index(), out);
                }
                let levels = (
                    self.config.mosi.map(|ch| matched.level(ch)),
                    self.config.miso.map(|ch| matched.level(ch)),
                );
                self.clock(matched.index(), levels, out)?;
            }
        }
        Ok(())
    }
}
