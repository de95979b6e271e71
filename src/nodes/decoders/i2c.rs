//! I2C decoder
//!
//! SDA falling while SCL is high is a START, SDA rising while SCL is high a
//! STOP. Otherwise SDA is sampled on every SCL rising edge: eight bits form
//! the address or a data byte, the ninth is the ACK bit driven by the
//! receiver. Bits collected before a START or STOP are dropped without a
//! warning; the master always clocks once before it can generate either.

use crate::runtime::accumulator::{BitOrder, SymbolAccumulator};
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, EdgeWaiter, LOGIC, LogicDecoder,
    Metadata, Output, WorkResult,
};
use crate::runtime::sample::SampleRange;
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy};
use crate::runtime::waiter::Term;
use tracing::{debug, trace};

/// Output tag
pub const I2C: &str = "i2c";

const START: usize = 0;
const REPEATED_START: usize = 1;
const STOP: usize = 2;
const ACK: usize = 3;
const NACK: usize = 4;
const ADDRESS_READ: usize = 5;
const ADDRESS_WRITE: usize = 6;
const DATA_READ: usize = 7;
const DATA_WRITE: usize = 8;
const BIT: usize = 9;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("start", "Start condition"),
    AnnotationClass::new("repeated-start", "Repeated start condition"),
    AnnotationClass::new("stop", "Stop condition"),
    AnnotationClass::new("ack", "ACK"),
    AnnotationClass::new("nack", "NACK"),
    AnnotationClass::new("address-read", "Address read"),
    AnnotationClass::new("address-write", "Address write"),
    AnnotationClass::new("data-read", "Data read"),
    AnnotationClass::new("data-write", "Data write"),
    AnnotationClass::new("bit", "Data bit"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("bits", "Bits", &[BIT]),
    AnnotationRow::new(
        "addr-data",
        "Address/data",
        &[
            START,
            REPEATED_START,
            STOP,
            ACK,
            NACK,
            ADDRESS_READ,
            ADDRESS_WRITE,
            DATA_READ,
            DATA_WRITE,
        ],
    ),
];

#[derive(Debug, Clone, PartialEq)]
pub struct I2cConfig {
    pub scl: usize,
    pub sda: usize,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self { scl: 0, sda: 1 }
    }
}

impl I2cConfig {
    pub fn with_scl(mut self, scl: usize) -> Self {
        self.scl = scl;
        self
    }

    pub fn with_sda(mut self, sda: usize) -> Self {
        self.sda = sda;
        self
    }
}

/// Bus events handed to stacked decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cPacket {
    Start,
    RepeatedStart,
    Stop,
    /// 7-bit address and direction
    Address { address: u8, read: bool },
    Data { value: u8, read: bool },
    Ack,
    Nack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cState {
    FindStart,
    FindAddress,
    FindData,
    FindAck,
}

impl FrameState for I2cState {
    const INITIAL: Self = I2cState::FindStart;
    const ALL: &'static [Self] = &[
        I2cState::FindStart,
        I2cState::FindAddress,
        I2cState::FindData,
        I2cState::FindAck,
    ];

    fn name(&self) -> &'static str {
        match self {
            I2cState::FindStart => "FIND START",
            I2cState::FindAddress => "FIND ADDRESS",
            I2cState::FindData => "FIND DATA",
            I2cState::FindAck => "FIND ACK",
        }
    }
}

/// I2C decoder
///
/// Input: SCL and SDA logic channels
/// Output: [`I2cPacket`]s
pub struct I2cDecoder {
    name: String,
    config: I2cConfig,
    machine: FrameMachine<I2cState>,
    byte: SymbolAccumulator,
    /// Direction of the current transfer
    read: bool,
}

impl I2cDecoder {
    pub fn new(config: I2cConfig) -> Self {
        Self {
            name: "i2c".to_string(),
            config,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            byte: SymbolAccumulator::new(8, BitOrder::MsbFirst),
            read: false,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> I2cState {
        self.machine.state()
    }

    fn start_term(&self) -> Term {
        Term::new().high(self.config.scl).falling(self.config.sda)
    }

    fn stop_term(&self) -> Term {
        Term::new().high(self.config.scl).rising(self.config.sda)
    }

    fn on_start(&mut self, index: u64, repeated: bool, out: &mut Output<'_, I2cPacket>) -> WorkResult<()> {
        if !self.byte.is_empty() {
            trace!("{} bits dropped by START", self.byte.len());
        }
        self.byte.clear();
        let range = SampleRange::point(index);
        if repeated {
            out.annotate(range, REPEATED_START, ["Start repeated", "Sr"])?;
            out.packet(range, I2cPacket::RepeatedStart)?;
        } else {
            out.annotate(range, START, ["Start", "S"])?;
            out.packet(range, I2cPacket::Start)?;
        }
        self.machine.goto(I2cState::FindAddress);
        Ok(())
    }

    fn on_stop(&mut self, index: u64, out: &mut Output<'_, I2cPacket>) -> WorkResult<()> {
        self.byte.clear();
        let range = SampleRange::point(index);
        out.annotate(range, STOP, ["Stop", "P"])?;
        out.packet(range, I2cPacket::Stop)?;
        self.machine.goto(I2cState::FindStart);
        Ok(())
    }

    fn on_bit(&mut self, index: u64, bit: bool, out: &mut Output<'_, I2cPacket>) -> WorkResult<()> {
        let range = SampleRange::point(index);
        let state = self.machine.state();

        if state == I2cState::FindAck {
            let (class, texts, packet) = if bit {
                (NACK, ["NACK", "N"], I2cPacket::Nack)
            } else {
                (ACK, ["ACK", "A"], I2cPacket::Ack)
            };
            out.annotate(range, class, texts)?;
            out.packet(range, packet)?;
            self.machine.goto(I2cState::FindData);
            return Ok(());
        }

        out.annotate(range, BIT, [if bit { "1" } else { "0" }])?;
        self.byte.push(bit, range);
        if !self.byte.is_complete() {
            return Ok(());
        }
        let Some(symbol) = self.byte.flush() else {
            return Ok(());
        };
        let value = symbol.value as u8;

        if state == I2cState::FindAddress {
            let address = value >> 1;
            self.read = value & 1 == 1;
            let (class, dir, short) = if self.read {
                (ADDRESS_READ, "read", "AR")
            } else {
                (ADDRESS_WRITE, "write", "AW")
            };
            debug!("I2C address 0x{:02X} {}", address, dir);
            out.annotate(
                symbol.range,
                class,
                [
                    format!("Address {}: 0x{:02X}", dir, address),
                    format!("{}: {:02X}", short, address),
                    format!("{:02X}", address),
                ],
            )?;
            out.packet(
                symbol.range,
                I2cPacket::Address {
                    address,
                    read: self.read,
                },
            )?;
        } else {
            let (class, dir, short) = if self.read {
                (DATA_READ, "read", "DR")
            } else {
                (DATA_WRITE, "write", "DW")
            };
            out.annotate(
                symbol.range,
                class,
                [
                    format!("Data {}: 0x{:02X}", dir, value),
                    format!("{}: {:02X}", short, value),
                    format!("{:02X}", value),
                ],
            )?;
            out.packet(
                symbol.range,
                I2cPacket::Data {
                    value,
                    read: self.read,
                },
            )?;
        }
        self.machine.goto(I2cState::FindAck);
        Ok(())
    }
}

impl Decoder for I2cDecoder {
    type Output = I2cPacket;

    fn id(&self) -> &'static str {
        "i2c"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        LOGIC
    }

    fn outputs(&self) -> &'static str {
        I2C
    }

    fn annotation_classes(&self) -> &'static [AnnotationClass] {
        CLASSES
    }

    fn annotation_rows(&self) -> &'static [AnnotationRow] {
        ROWS
    }

    fn start(&mut self, _metadata: &Metadata) -> Result<(), ConfigError> {
        for channel in [self.config.scl, self.config.sda] {
            if channel >= 64 {
                return Err(ConfigError::InvalidChannel(channel));
            }
        }
        if self.config.scl == self.config.sda {
            return Err(ConfigError::InvalidOption {
                option: "sda",
                reason: "SCL and SDA must be different channels".into(),
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.byte.clear();
        self.read = false;
    }
}

impl LogicDecoder for I2cDecoder {
    fn decode(&mut self, waiter: &mut EdgeWaiter<'_>, out: &mut Output<'_, I2cPacket>) -> WorkResult<()> {
        if self.machine.is(I2cState::FindStart) {
            let start = waiter.wait_for(self.start_term())?;
            return self.on_start(start.index, false, out);
        }

        let terms = [
            Term::new().rising(self.config.scl),
            self.start_term(),
            self.stop_term(),
        ];
        let matched = waiter.wait(&terms)?;
        if matched.fired(1) {
            self.on_start(matched.index(), true, out)
        } else if matched.fired(2) {
            self.on_stop(matched.index(), out)
        } else {
            self.on_bit(matched.index(), matched.level(self.config.sda), out)
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
    use crate::synth::SignalBuilder;

    const SCL: usize = 0;
    const SDA: usize = 1;
    const HALF: u64 = 5;

    fn idle_bus() -> SignalBuilder {
        let mut signal = SignalBuilder::new(2);
        signal.set(SCL, true).set(SDA, true).hold(20);
        signal
    }

    fn run(signal: SignalBuilder) -> (Vec<Spanned<I2cPacket>>, AnnotationLog) {
        let capture = signal.into_capture();
        let mut stack = DecoderStack::new(I2cDecoder::new(I2cConfig::default()));
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<I2cPacket>::new();
        stack
            .run_with_tap(capture.samples(), &mut log, &mut collector)
            .unwrap();
        (collector.into_packets(), log)
    }

    #[test]
    fn test_write_transaction() {
        let mut signal = idle_bus();
        signal.i2c_start(SCL, SDA, HALF);
        signal.i2c_byte(SCL, SDA, 0x50 << 1, true, HALF);
        signal.i2c_byte(SCL, SDA, 0x12, true, HALF);
        signal.i2c_byte(SCL, SDA, 0x34, false, HALF);
        signal.i2c_stop(SCL, SDA, HALF);
        signal.hold(20);

        let (packets, log) = run(signal);
        let values: Vec<I2cPacket> = packets.iter().map(|p| p.value).collect();
        assert_eq!(
            values,
            vec![
                I2cPacket::Start,
                I2cPacket::Address {
                    address: 0x50,
                    read: false
                },
                I2cPacket::Ack,
                I2cPacket::Data {
                    value: 0x12,
                    read: false
                },
                I2cPacket::Ack,
                I2cPacket::Data {
                    value: 0x34,
                    read: false
                },
                I2cPacket::Nack,
                I2cPacket::Stop,
            ]
        );
        assert_eq!(packets[0].range, SampleRange::point(20));
        assert!(log.contains_text("i2c", "Address write: 0x50"));
        assert!(log.contains_text("i2c", "Data write: 0x34"));
        // Ranges never go backwards
        for pair in packets.windows(2) {
            assert!(pair[0].range.start() <= pair[1].range.start());
        }
    }

    #[test]
    fn test_repeated_start_read() {
        let mut signal = idle_bus();
        signal.i2c_start(SCL, SDA, HALF);
        signal.i2c_byte(SCL, SDA, 0x50 << 1, true, HALF);
        signal.i2c_byte(SCL, SDA, 0x00, true, HALF);
        signal.i2c_start(SCL, SDA, HALF);
        signal.i2c_byte(SCL, SDA, (0x50 << 1) | 1, true, HALF);
        signal.i2c_byte(SCL, SDA, 0xA7, false, HALF);
        signal.i2c_stop(SCL, SDA, HALF);
        signal.hold(20);

        let (packets, log) = run(signal);
        let values: Vec<I2cPacket> = packets.iter().map(|p| p.value).collect();
        assert_eq!(values[5], I2cPacket::RepeatedStart);
        assert_eq!(
            values[6],
            I2cPacket::Address {
                address: 0x50,
                read: true
            }
        );
        assert_eq!(
            values[8],
            I2cPacket::Data {
                value: 0xA7,
                read: true
            }
        );
        assert_eq!(values.last(), Some(&I2cPacket::Stop));
        assert!(log.contains_text("i2c", "Data read: 0xA7"));
    }

    #[test]
    fn test_reset_and_config() {
        let mut decoder = I2cDecoder::new(I2cConfig::default());
        decoder.machine.goto(I2cState::FindAck);
        decoder.read = true;
        decoder.reset();
        assert_eq!(decoder.state(), I2cState::INITIAL);
        assert!(!decoder.read);

        let mut same = I2cDecoder::new(I2cConfig::default().with_sda(0));
        assert!(same.start(&Metadata::new()).is_err());
    }
}
