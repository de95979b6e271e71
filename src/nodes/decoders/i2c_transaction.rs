//! I2C transactions from bus events
//!
//! Collects one addressed segment (START, address, data bytes with their
//! ACKs) and emits it when the bus is released with STOP. A repeated START
//! ends the current segment and opens the next one. Segments still open at
//! the end of the capture are never emitted.

use super::i2c::{I2C, I2cPacket};
use super::types::hex_bytes;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{SampleRange, Spanned};
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Scratch, Step};
use tracing::{debug, trace};

/// Output tag
pub const I2C_TRANSACTION: &str = "i2c_transaction";

const WRITE: usize = 0;
const READ: usize = 1;
const WARNING: usize = 2;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("write", "Write transaction"),
    AnnotationClass::new("read", "Read transaction"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("transactions", "Transactions", &[WRITE, READ]),
    AnnotationRow::new("warnings", "Warnings", &[WARNING]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cTransaction {
    pub address: u8,
    pub read: bool,
    pub address_acked: bool,
    pub data: Vec<Spanned<u8>>,
    /// Every data byte was acknowledged
    pub all_acked: bool,
}

impl I2cTransaction {
    pub fn bytes(&self) -> Vec<u8> {
        self.data.iter().map(|b| b.value).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Bus free
    Idle,
    /// START seen, address expected
    Address,
    /// Address ACK expected
    AddressAck,
    /// Data bytes and their ACKs
    Data,
}

impl FrameState for TransactionState {
    const INITIAL: Self = TransactionState::Idle;
    const ALL: &'static [Self] = &[
        TransactionState::Idle,
        TransactionState::Address,
        TransactionState::AddressAck,
        TransactionState::Data,
    ];

    fn name(&self) -> &'static str {
        match self {
            TransactionState::Idle => "IDLE",
            TransactionState::Address => "ADDRESS",
            TransactionState::AddressAck => "ADDRESS ACK",
            TransactionState::Data => "DATA",
        }
    }
}

/// I2C transaction decoder
///
/// Input: [`I2cPacket`]s
/// Output: [`I2cTransaction`]s
pub struct I2cTransactionDecoder {
    name: String,
    machine: FrameMachine<TransactionState>,
    transaction: Scratch<I2cTransaction>,
    /// START (or repeated START) that opened the segment
    start: Option<SampleRange>,
}

impl I2cTransactionDecoder {
    pub fn new() -> Self {
        Self {
            name: "i2c_transaction".to_string(),
            machine: FrameMachine::new(InvalidPolicy::Reset),
            transaction: Scratch::new(),
            start: None,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> TransactionState {
        self.machine.state()
    }

    fn commit(&mut self, end: SampleRange, out: &mut Output<'_, I2cTransaction>) -> WorkResult<()> {
        self.transaction.extend(end);
        let Some(Spanned { range, value }) = self.transaction.commit() else {
            return Ok(());
        };

        let (class, dir, short) = if value.read {
            (READ, "Read from", "R")
        } else {
            (WRITE, "Write to", "W")
        };
        let data = hex_bytes(value.data.iter().map(|b| &b.value));
        let ack = if value.address_acked && value.all_acked {
            "ACK"
        } else {
            "NACK"
        };
        out.annotate(
            range,
            class,
            [
                format!("{} 0x{:02X}: {} ({})", dir, value.address, data, ack),
                format!("{} 0x{:02X}: {}", short, value.address, data),
                format!("{} 0x{:02X}", short, value.address),
            ],
        )?;
        debug!("I2C {} 0x{:02X}: {}", short, value.address, data);
        out.packet(range, value)
    }

    fn unexpected(&mut self, range: SampleRange, out: &mut Output<'_, I2cTransaction>) -> WorkResult<()> {
        let state = self.machine.state();
        self.machine.apply(Step::Invalid("unexpected bus event"));
        self.transaction.discard();
        self.start = None;
        out.annotate(
            range,
            WARNING,
            [format!("Unexpected bus event in {}", state.name()), "Unexpected".to_string()],
        )
    }
}

impl Default for I2cTransactionDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for I2cTransactionDecoder {
    type Output = I2cTransaction;

    fn id(&self) -> &'static str {
        "i2c_transaction"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        I2C
    }

    fn outputs(&self) -> &'static str {
        I2C_TRANSACTION
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
        self.transaction.discard();
        self.start = None;
    }
}

impl StackedDecoder for I2cTransactionDecoder {
    type Input = I2cPacket;

    fn feed(&mut self, packet: Spanned<I2cPacket>, out: &mut Output<'_, I2cTransaction>) -> WorkResult<()> {
        let range = packet.range;
        let state = self.machine.state();
        trace!("I2C transaction {:?} in {}", packet.value, state.name());

        match (state, packet.value) {
            (_, I2cPacket::Start) => {
                if self.transaction.is_open() {
                    debug!("I2C segment without STOP dropped");
                    self.transaction.discard();
                }
                self.start = Some(range);
                self.machine.goto(TransactionState::Address);
            }
            (_, I2cPacket::RepeatedStart) => {
                self.commit(range, out)?;
                self.start = Some(range);
                self.machine.goto(TransactionState::Address);
            }
            (TransactionState::Idle, I2cPacket::Stop) => {
                self.machine.apply(Step::Ignore);
            }
            (_, I2cPacket::Stop) => {
                self.commit(range, out)?;
                self.start = None;
                self.machine.goto(TransactionState::Idle);
            }
            (TransactionState::Idle, _) => {
                // Capture started inside a transaction
                self.machine.apply(Step::Ignore);
            }
            (TransactionState::Address, I2cPacket::Address { address, read }) => {
                let start = self.start.take().map_or(range, |s| s.union(range));
                self.transaction.begin(
                    I2cTransaction {
                        address,
                        read,
                        address_acked: false,
                        data: Vec::new(),
                        all_acked: true,
                    },
                    start,
                );
                self.machine.goto(TransactionState::AddressAck);
            }
            (TransactionState::AddressAck, I2cPacket::Ack | I2cPacket::Nack) => {
                if let Some(record) = self.transaction.record_mut() {
                    record.address_acked = packet.value == I2cPacket::Ack;
                }
                self.transaction.extend(range);
                self.machine.goto(TransactionState::Data);
            }
            (TransactionState::Data, I2cPacket::Data { value, .. }) => {
                if let Some(record) = self.transaction.record_mut() {
                    record.data.push(Spanned::new(range, value));
                }
                self.transaction.extend(range);
            }
            (TransactionState::Data, I2cPacket::Ack | I2cPacket::Nack) => {
                if let Some(record) = self.transaction.record_mut() {
                    record.all_acked &= packet.value == I2cPacket::Ack;
                }
                self.transaction.extend(range);
            }
            _ => self.unexpected(range, out)?,
        }
        Ok(())
    }
}
