//! CC1101 transceiver command decoder on top of SPI
//!
//! Every transaction starts with a header byte: R/W flag, burst flag, and a
//! six bit address. Addresses 0x30-0x3D without the burst flag are command
//! strobes; with the burst flag and a read they select the read-only status
//! registers. 0x3E is the PA table and 0x3F the FIFOs. The byte clocked out
//! on MISO during the header is the chip status byte.
//!
//! A burst write to 0x30-0x3D is neither; how to treat it is not settled,
//! see [`StatusBurstWrite`].

use super::spi::{SPI, SpiPacket, SpiTransfer};
use super::types::hex_bytes;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{SampleRange, Spanned};
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Scratch, Step};
use crate::runtime::table::ProtocolTable;
use lazy_static::lazy_static;
use tracing::{debug, trace};

/// Output tag
pub const CC1101: &str = "cc1101";

const READ_FLAG: u8 = 0x80;
const BURST_FLAG: u8 = 0x40;
const ADDRESS_MASK: u8 = 0x3F;

const STROBE_FIRST: u8 = 0x30;
const STROBE_LAST: u8 = 0x3D;
const PATABLE: u8 = 0x3E;
const FIFO: u8 = 0x3F;

static CONFIG_REGISTERS: &[(u32, &str)] = &[
    (0x00, "IOCFG2"),
    (0x01, "IOCFG1"),
    (0x02, "IOCFG0"),
    (0x03, "FIFOTHR"),
    (0x04, "SYNC1"),
    (0x05, "SYNC0"),
    (0x06, "PKTLEN"),
    (0x07, "PKTCTRL1"),
    (0x08, "PKTCTRL0"),
    (0x09, "ADDR"),
    (0x0A, "CHANNR"),
    (0x0B, "FSCTRL1"),
    (0x0C, "FSCTRL0"),
    (0x0D, "FREQ2"),
    (0x0E, "FREQ1"),
    (0x0F, "FREQ0"),
    (0x10, "MDMCFG4"),
    (0x11, "MDMCFG3"),
    (0x12, "MDMCFG2"),
    (0x13, "MDMCFG1"),
    (0x14, "MDMCFG0"),
    (0x15, "DEVIATN"),
    (0x16, "MCSM2"),
    (0x17, "MCSM1"),
    (0x18, "MCSM0"),
    (0x19, "FOCCFG"),
    (0x1A, "BSCFG"),
    (0x1B, "AGCCTRL2"),
    (0x1C, "AGCCTRL1"),
    (0x1D, "AGCCTRL0"),
    (0x1E, "WOREVT1"),
    (0x1F, "WOREVT0"),
    (0x20, "WORCTRL"),
    (0x21, "FREND1"),
    (0x22, "FREND0"),
    (0x23, "FSCAL3"),
    (0x24, "FSCAL2"),
    (0x25, "FSCAL1"),
    (0x26, "FSCAL0"),
    (0x27, "RCCTRL1"),
    (0x28, "RCCTRL0"),
    (0x29, "FSTEST"),
    (0x2A, "PTEST"),
    (0x2B, "AGCTEST"),
    (0x2C, "TEST2"),
    (0x2D, "TEST1"),
    (0x2E, "TEST0"),
];

static STATUS_REGISTERS: &[(u32, &str)] = &[
    (0x30, "PARTNUM"),
    (0x31, "VERSION"),
    (0x32, "FREQEST"),
    (0x33, "LQI"),
    (0x34, "RSSI"),
    (0x35, "MARCSTATE"),
    (0x36, "WORTIME1"),
    (0x37, "WORTIME0"),
    (0x38, "PKTSTATUS"),
    (0x39, "VCO_VC_DAC"),
    (0x3A, "TXBYTES"),
    (0x3B, "RXBYTES"),
    (0x3C, "RCCTRL1_STATUS"),
    (0x3D, "RCCTRL0_STATUS"),
];

static STROBE_NAMES: &[(u32, &str)] = &[
    (0x30, "SRES"),
    (0x31, "SFSTXON"),
    (0x32, "SXOFF"),
    (0x33, "SCAL"),
    (0x34, "SRX"),
    (0x35, "STX"),
    (0x36, "SIDLE"),
    (0x38, "SWOR"),
    (0x39, "SPWD"),
    (0x3A, "SFRX"),
    (0x3B, "SFTX"),
    (0x3C, "SWORRST"),
    (0x3D, "SNOP"),
];

static STATE_NAMES: &[(u32, &str)] = &[
    (0, "IDLE"),
    (1, "RX"),
    (2, "TX"),
    (3, "FSTXON"),
    (4, "CALIBRATE"),
    (5, "SETTLING"),
    (6, "RXFIFO_OVERFLOW"),
    (7, "TXFIFO_UNDERFLOW"),
];

lazy_static! {
    pub static ref CONFIG: ProtocolTable<&'static str> =
        ProtocolTable::new("CC1101 configuration registers", CONFIG_REGISTERS);
    pub static ref STATUS: ProtocolTable<&'static str> =
        ProtocolTable::new("CC1101 status registers", STATUS_REGISTERS);
    pub static ref STROBES: ProtocolTable<&'static str> =
        ProtocolTable::new("CC1101 command strobes", STROBE_NAMES);
    static ref STATES: ProtocolTable<&'static str> =
        ProtocolTable::new("CC1101 states", STATE_NAMES);
}

const STROBE: usize = 0;
const READ: usize = 1;
const WRITE: usize = 2;
const CHIP_STATUS: usize = 3;
const WARNING: usize = 4;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("strobe", "Command strobe"),
    AnnotationClass::new("read", "Register read"),
    AnnotationClass::new("write", "Register write"),
    AnnotationClass::new("status", "Chip status"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("commands", "Commands", &[STROBE, READ, WRITE]),
    AnnotationRow::new("status", "Status", &[CHIP_STATUS]),
    AnnotationRow::new("warnings", "Warnings", &[WARNING]),
];

/// Chip status byte returned on MISO with every header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipStatus {
    /// CHIP_RDYn low
    pub ready: bool,
    pub state: u8,
    pub fifo_bytes: u8,
}

impl ChipStatus {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            ready: byte & 0x80 == 0,
            state: (byte >> 4) & 0x07,
            fifo_bytes: byte & 0x0F,
        }
    }

    pub fn state_name(&self) -> String {
        STATES.lookup(u32::from(self.state)).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Config,
    Status,
    PaTable,
    Fifo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAccess {
    pub address: u8,
    /// Register name, or the unknown fallback with the literal address
    pub register: String,
    pub kind: RegisterKind,
    pub read: bool,
    pub burst: bool,
    pub data: Vec<u8>,
    pub status: Option<ChipStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cc1101Packet {
    Strobe {
        command: u8,
        name: String,
        status: Option<ChipStatus>,
    },
    Access(RegisterAccess),
}

/// Handling of a burst write header addressed to 0x30-0x3D
///
/// The combination has no meaning on the chip. Whether it should decode as a
/// write or be rejected outright is still open, so both are selectable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusBurstWrite {
    /// Decode as a write to the read-only status register, with a warning
    #[default]
    Decode,
    /// Warn about an unknown address/command combination and ignore the
    /// rest of the transaction
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cc1101Config {
    pub status_burst_write: StatusBurstWrite,
}

impl Cc1101Config {
    pub fn with_status_burst_write(mut self, handling: StatusBurstWrite) -> Self {
        self.status_burst_write = handling;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc1101State {
    /// Waiting for a header byte
    Idle,
    /// Header seen, data bytes follow
    Data,
    /// Rejected header, waiting for CS to go inactive
    Skip,
}

impl FrameState for Cc1101State {
    const INITIAL: Self = Cc1101State::Idle;
    const ALL: &'static [Self] = &[Cc1101State::Idle, Cc1101State::Data, Cc1101State::Skip];

    fn name(&self) -> &'static str {
        match self {
            Cc1101State::Idle => "IDLE",
            Cc1101State::Data => "DATA",
            Cc1101State::Skip => "SKIP",
        }
    }
}

/// Name of the register at `address` for an access of `kind`
pub fn register_name(kind: RegisterKind, address: u8) -> String {
    match kind {
        RegisterKind::Config => CONFIG.lookup(u32::from(address)).to_string(),
        RegisterKind::Status => STATUS.lookup(u32::from(address)).to_string(),
        RegisterKind::PaTable => "PATABLE".to_string(),
        RegisterKind::Fifo => "FIFO".to_string(),
    }
}

/// CC1101 decoder
///
/// Input: [`SpiPacket`]s (8 bit words)
/// Output: [`Cc1101Packet`]s
pub struct Cc1101Decoder {
    name: String,
    config: Cc1101Config,
    machine: FrameMachine<Cc1101State>,
    access: Scratch<RegisterAccess>,
}

impl Cc1101Decoder {
    pub fn new(config: Cc1101Config) -> Self {
        Self {
            name: "cc1101".to_string(),
            config,
            machine: FrameMachine::new(InvalidPolicy::Reset),
            access: Scratch::new(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> Cc1101State {
        self.machine.state()
    }

    fn header(
        &mut self,
        transfer: SpiTransfer,
        range: SampleRange,
        out: &mut Output<'_, Cc1101Packet>,
    ) -> WorkResult<()> {
        let Some(mosi) = transfer.mosi else {
            self.machine.apply(Step::Invalid("no MOSI data"));
            return out.annotate(range, WARNING, ["Header without MOSI data", "No MOSI"]);
        };
        let header = mosi as u8;
        let read = header & READ_FLAG != 0;
        let burst = header & BURST_FLAG != 0;
        let address = header & ADDRESS_MASK;
        let status = transfer.miso.map(|miso| ChipStatus::from_byte(miso as u8));

        if let Some(status) = status {
            let name = status.state_name();
            out.annotate(
                range,
                CHIP_STATUS,
                [
                    format!(
                        "Status: {}, {} FIFO bytes{}",
                        name,
                        status.fifo_bytes,
                        if status.ready { "" } else { ", not ready" }
                    ),
                    name,
                ],
            )?;
        }

        if (STROBE_FIRST..=STROBE_LAST).contains(&address) && !burst {
            let name = STROBES.lookup(u32::from(address)).to_string();
            out.annotate(range, STROBE, [format!("Strobe: {}", name), name.clone()])?;
            trace!("CC1101 strobe {}", name);
            return out.packet(
                range,
                Cc1101Packet::Strobe {
                    command: address,
                    name,
                    status,
                },
            );
        }

        let kind = match address {
            PATABLE => RegisterKind::PaTable,
            FIFO => RegisterKind::Fifo,
            STROBE_FIRST..=STROBE_LAST => RegisterKind::Status,
            _ => RegisterKind::Config,
        };
        if kind == RegisterKind::Status && !read {
            if self.config.status_burst_write == StatusBurstWrite::Reject {
                debug!("CC1101 header 0x{:02X} rejected", header);
                self.machine.goto(Cc1101State::Skip);
                return out.annotate(
                    range,
                    WARNING,
                    [
                        format!("Unknown address/command combination: 0x{:02X}", header),
                        "Unknown command".to_string(),
                    ],
                );
            }
            out.annotate(
                range,
                WARNING,
                [
                    format!("Write to read-only status register 0x{:02X}", address),
                    "Read-only".to_string(),
                ],
            )?;
        }
        self.access.begin(
            RegisterAccess {
                address,
                register: register_name(kind, address),
                kind,
                read,
                burst,
                data: Vec::new(),
                status,
            },
            range,
        );
        self.machine.goto(Cc1101State::Data);
        Ok(())
    }

    fn data(
        &mut self,
        transfer: SpiTransfer,
        range: SampleRange,
        out: &mut Output<'_, Cc1101Packet>,
    ) -> WorkResult<()> {
        let Some(access) = self.access.record_mut() else {
            self.machine.goto(Cc1101State::Idle);
            return Ok(());
        };
        let value = if access.read { transfer.miso } else { transfer.mosi };
        let Some(value) = value else {
            self.machine.apply(Step::Invalid("data line missing"));
            self.access.discard();
            return out.annotate(range, WARNING, ["Data line for this access is missing", "No data"]);
        };
        let value = value as u8;

        // Burst accesses to configuration registers walk the address space
        let address = match access.kind {
            RegisterKind::Config => access.address.wrapping_add(access.data.len() as u8),
            _ => access.address,
        };
        let register = register_name(access.kind, address);
        let class = if access.read { READ } else { WRITE };
        let verb = if access.read { "Read" } else { "Write" };
        access.data.push(value);
        let single = !access.burst;

        out.annotate(
            range,
            class,
            [
                format!("{} {}: 0x{:02X}", verb, register, value),
                format!("{}: {:02X}", register, value),
                format!("{:02X}", value),
            ],
        )?;
        self.access.extend(range);
        if single {
            self.finish(out)?;
        }
        Ok(())
    }

    /// Emit the open access
    fn finish(&mut self, out: &mut Output<'_, Cc1101Packet>) -> WorkResult<()> {
        self.machine.goto(Cc1101State::Idle);
        let Some(Spanned { range, value: access }) = self.access.commit() else {
            return Ok(());
        };
        if access.data.is_empty() {
            return out.annotate(
                range,
                WARNING,
                [format!("No data for {}", access.register), "No data".to_string()],
            );
        }
        debug!(
            "CC1101 {} {} ({}): {}",
            if access.read { "read" } else { "write" },
            access.register,
            if access.burst { "burst" } else { "single" },
            hex_bytes(&access.data)
        );
        out.packet(range, Cc1101Packet::Access(access))
    }
}

impl Default for Cc1101Decoder {
    fn default() -> Self {
        Self::new(Cc1101Config::default())
    }
}

impl Decoder for Cc1101Decoder {
    type Output = Cc1101Packet;

    fn id(&self) -> &'static str {
        "cc1101"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        SPI
    }

    fn outputs(&self) -> &'static str {
        CC1101
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
        self.access.discard();
    }
}

impl StackedDecoder for Cc1101Decoder {
    type Input = SpiPacket;

    fn feed(&mut self, packet: Spanned<SpiPacket>, out: &mut Output<'_, Cc1101Packet>) -> WorkResult<()> {
        match packet.value {
            SpiPacket::CsChange { active: true } => {
                self.access.discard();
                self.machine.reset();
                Ok(())
            }
            SpiPacket::CsChange { active: false } => {
                if self.access.is_open() {
                    self.finish(out)
                } else {
                    self.machine.reset();
                    Ok(())
                }
            }
            SpiPacket::Transfer(transfer) => match self.machine.state() {
                Cc1101State::Idle => self.header(transfer, packet.range, out),
                Cc1101State::Data => self.data(transfer, packet.range, out),
                Cc1101State::Skip => {
                    self.machine.apply(Step::Ignore);
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::annotation::AnnotationLog;
    use crate::runtime::pipeline::DecoderStack;
    use crate::runtime::ports::PacketCollector;

    fn transaction(words: &[(u8, u8)]) -> Vec<SpiPacket> {
        let mut packets = vec![SpiPacket::CsChange { active: true }];
        packets.extend(words.iter().map(|&(mosi, miso)| {
            SpiPacket::Transfer(SpiTransfer {
                mosi: Some(u32::from(mosi)),
                miso: Some(u32::from(miso)),
            })
        }));
        packets.push(SpiPacket::CsChange { active: false });
        packets
    }

    fn run(packets: Vec<SpiPacket>) -> (Vec<Cc1101Packet>, AnnotationLog) {
        run_with(Cc1101Config::default(), packets)
    }

    fn run_with(config: Cc1101Config, packets: Vec<SpiPacket>) -> (Vec<Cc1101Packet>, AnnotationLog) {
        let mut stack = DecoderStack::packets::<SpiPacket>(SPI)
            .stack(Cc1101Decoder::new(config))
            .unwrap();
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<Cc1101Packet>::new();
        let packets = packets
            .into_iter()
            .enumerate()
            .map(|(i, p)| Spanned::new(SampleRange::new(i as u64 * 80, (i as u64 + 1) * 80), p));
        stack
            .run_packets_with_tap(packets, &mut log, &mut collector)
            .unwrap();
        (collector.values().cloned().collect(), log)
    }

    #[test]
    fn test_strobes_and_chip_status() {
        let mut packets = transaction(&[(0x36, 0x0F)]);
        packets.extend(transaction(&[(0x37, 0x1F)]));
        let (decoded, log) = run(packets);
        assert_eq!(decoded.len(), 2);
        assert!(matches!(
            &decoded[0],
            Cc1101Packet::Strobe { command: 0x36, name, status: Some(ChipStatus { ready: true, state: 0, fifo_bytes: 15 }) }
                if name == "SIDLE"
        ));
        assert!(matches!(&decoded[1], Cc1101Packet::Strobe { name, .. } if name.contains("0x37")));
        assert!(log.contains_text("cc1101", "Status: RX, 15 FIFO bytes"));
    }

    #[test]
    fn test_single_write_and_burst_read() {
        let mut packets = transaction(&[(0x0D, 0x00), (0x21, 0x00)]);
        packets.extend(transaction(&[(0xCD, 0x00), (0x00, 0x21), (0x00, 0x62), (0x00, 0x76)]));
        let (decoded, log) = run(packets);
        assert_eq!(decoded.len(), 2);
        let Cc1101Packet::Access(write) = &decoded[0] else {
            panic!("expected an access, got {:?}", decoded[0]);
        };
        assert_eq!(write.register, "FREQ2");
        assert!(!write.read && !write.burst);
        assert_eq!(write.data, vec![0x21]);

        let Cc1101Packet::Access(read) = &decoded[1] else {
            panic!("expected an access, got {:?}", decoded[1]);
        };
        assert!(read.read && read.burst);
        assert_eq!(read.data, vec![0x21, 0x62, 0x76]);
        assert!(log.contains_text("cc1101", "Read FREQ1: 0x62"));
        assert!(log.contains_text("cc1101", "Read FREQ0: 0x76"));
    }

    #[test]
    fn test_unknown_register_falls_back_to_literal() {
        let (decoded, log) = run(transaction(&[(0x2F, 0x00), (0xAB, 0x00)]));
        let Cc1101Packet::Access(access) = &decoded[0] else {
            panic!("expected an access, got {:?}", decoded[0]);
        };
        assert_eq!(access.address, 0x2F);
        assert!(access.register.contains("0x2F"));
        assert!(log.contains_text("cc1101", "Write Unknown (0x2F): 0xAB"));
    }

    #[test]
    fn test_status_patable_and_fifo() {
        let mut packets = transaction(&[(0xF1, 0x00), (0x00, 0x14)]);
        packets.extend(transaction(&[(0x7E, 0x00), (0xC0, 0x00), (0xC0, 0x00)]));
        packets.extend(transaction(&[(0x3F, 0x00), (0x01, 0x00)]));
        let (decoded, _) = run(packets);
        let kinds: Vec<(RegisterKind, String)> = decoded
            .iter()
            .filter_map(|p| match p {
                Cc1101Packet::Access(a) => Some((a.kind, a.register.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (RegisterKind::Status, "VERSION".to_string()),
                (RegisterKind::PaTable, "PATABLE".to_string()),
                (RegisterKind::Fifo, "FIFO".to_string()),
            ]
        );
    }

    #[test]
    fn test_header_without_data_is_warned() {
        let (decoded, log) = run(transaction(&[(0x80, 0x00)]));
        assert!(decoded.is_empty());
        assert!(log.contains_text("cc1101", "No data for IOCFG2"));
    }

    #[test]
    fn test_status_burst_write_handling() {
        // Burst write to 0x31, then a regular write
        let mut packets = transaction(&[(0x71, 0x0F), (0x12, 0x00), (0x34, 0x00)]);
        packets.extend(transaction(&[(0x0D, 0x00), (0x21, 0x00)]));

        let (decoded, log) = run(packets.clone());
        assert_eq!(decoded.len(), 2);
        let Cc1101Packet::Access(write) = &decoded[0] else {
            panic!("expected an access, got {:?}", decoded[0]);
        };
        assert_eq!(write.kind, RegisterKind::Status);
        assert_eq!(write.register, "VERSION");
        assert_eq!(write.data, vec![0x12, 0x34]);
        assert!(log.contains_text("cc1101", "Write to read-only status register 0x31"));

        let config = Cc1101Config::default().with_status_burst_write(StatusBurstWrite::Reject);
        let (decoded, log) = run_with(config, packets);
        assert_eq!(decoded.len(), 1);
        assert!(matches!(&decoded[0], Cc1101Packet::Access(a) if a.register == "FREQ2"));
        assert!(log.contains_text("cc1101", "Unknown address/command combination: 0x71"));
        assert_eq!(log.class("cc1101", WRITE).count(), 1);
    }

    #[test]
    fn test_reset_mid_burst() {
        let mut decoder = Cc1101Decoder::default();
        decoder.machine.goto(Cc1101State::Skip);
        decoder.access.begin(
            RegisterAccess {
                address: 0x0D,
                register: "FREQ2".to_string(),
                kind: RegisterKind::Config,
                read: false,
                burst: true,
                data: vec![0x21],
                status: None,
            },
            SampleRange::point(0),
        );
        decoder.reset();
        assert_eq!(decoder.state(), Cc1101State::INITIAL);
        assert!(!decoder.access.is_open());

        // A burst cut off without CS release, then a clean transaction
        let mut packets = transaction(&[(0x4D, 0x00), (0x21, 0x00)]);
        packets.pop();
        packets.extend(transaction(&[(0x36, 0x0F)]));
        let (decoded, _) = run(packets);
        assert_eq!(decoded.len(), 1);
        assert!(matches!(&decoded[0], Cc1101Packet::Strobe { name, .. } if name == "SIDLE"));
    }

    #[test]
    fn test_tables_are_consistent() {
        assert!(CONFIG.validate().is_ok());
        assert!(STATUS.validate().is_ok());
        assert!(STROBES.validate().is_ok());
        assert_eq!(CONFIG.len(), 47);
    }
}
