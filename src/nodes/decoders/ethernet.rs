//! Ethernet II framing on top of 4B5B
//!
//! A stream starts with the J/K delimiter, then preamble bytes (0x55) and the
//! start frame delimiter (0xD5). Everything up to T/R is the frame: two MAC
//! addresses, the EtherType, the payload, and a CRC-32 frame check sequence
//! sent least significant byte first. The frame is only emitted once T/R is
//! seen; a code violation drops it.

use super::fourb_fiveb::{FOURB_FIVEB, FourBFiveB};
use super::types::{hex_bytes, mac};
use crate::runtime::checksum::Crc32;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{SampleRange, Spanned, span_of};
use crate::runtime::state::{FrameMachine, FrameState, InvalidPolicy, Scratch, Step};
use crate::runtime::table::ProtocolTable;
use lazy_static::lazy_static;
use tracing::{debug, warn};

/// Output tag
pub const ETHERNET: &str = "eth";

pub const PREAMBLE: u8 = 0x55;
pub const SFD: u8 = 0xD5;

/// Destination, source, EtherType, FCS
pub const MIN_FRAME_LEN: usize = 18;

/// EtherType values below this are an 802.3 length
const ETHERTYPE_MIN: u16 = 0x0600;

pub const ETHERTYPE_IPV4: u16 = 0x0800;

static ETHERTYPE_NAMES: &[(u32, &str)] = &[
    (0x0800, "IPv4"),
    (0x0806, "ARP"),
    (0x8100, "VLAN"),
    (0x86DD, "IPv6"),
    (0x8847, "MPLS"),
    (0x88CC, "LLDP"),
];

lazy_static! {
    pub static ref ETHERTYPES: ProtocolTable<&'static str> =
        ProtocolTable::new("EtherType", ETHERTYPE_NAMES);
}

const PREAMBLE_CLASS: usize = 0;
const SFD_CLASS: usize = 1;
const DESTINATION: usize = 2;
const SOURCE: usize = 3;
const ETHERTYPE: usize = 4;
const PAYLOAD: usize = 5;
const FCS: usize = 6;
const FCS_ERROR: usize = 7;
const WARNING: usize = 8;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("preamble", "Preamble"),
    AnnotationClass::new("sfd", "Start frame delimiter"),
    AnnotationClass::new("destination", "Destination MAC"),
    AnnotationClass::new("source", "Source MAC"),
    AnnotationClass::new("ethertype", "EtherType"),
    AnnotationClass::new("payload", "Payload"),
    AnnotationClass::new("fcs", "Frame check sequence"),
    AnnotationClass::new("fcs-error", "FCS mismatch"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new(
        "fields",
        "Fields",
        &[PREAMBLE_CLASS, SFD_CLASS, DESTINATION, SOURCE, ETHERTYPE, PAYLOAD, FCS],
    ),
    AnnotationRow::new("errors", "Errors", &[FCS_ERROR, WARNING]),
];

/// A complete frame between SFD and T/R
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    /// EtherType, or the payload length for 802.3 frames
    pub ethertype: u16,
    /// Includes any padding
    pub payload: Vec<Spanned<u8>>,
    pub fcs: u32,
    pub fcs_valid: bool,
}

impl EthernetFrame {
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.iter().map(|b| b.value).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthernetState {
    /// Outside a stream
    Idle,
    Preamble,
    Frame,
}

impl FrameState for EthernetState {
    const INITIAL: Self = EthernetState::Idle;
    const ALL: &'static [Self] = &[
        EthernetState::Idle,
        EthernetState::Preamble,
        EthernetState::Frame,
    ];

    fn name(&self) -> &'static str {
        match self {
            EthernetState::Idle => "IDLE",
            EthernetState::Preamble => "PREAMBLE",
            EthernetState::Frame => "FRAME",
        }
    }
}

/// Ethernet II decoder
///
/// Input: [`FourBFiveB`] packets
/// Output: [`EthernetFrame`]s
pub struct EthernetDecoder {
    name: String,
    machine: FrameMachine<EthernetState>,
    /// Bytes after the SFD
    frame: Scratch<Vec<Spanned<u8>>>,
    preamble: Option<SampleRange>,
}

impl EthernetDecoder {
    pub fn new() -> Self {
        Self {
            name: "eth".to_string(),
            machine: FrameMachine::new(InvalidPolicy::Reset),
            frame: Scratch::new(),
            preamble: None,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> EthernetState {
        self.machine.state()
    }

    fn invalid(
        &mut self,
        range: SampleRange,
        reason: &'static str,
        out: &mut Output<'_, EthernetFrame>,
    ) -> WorkResult<()> {
        self.machine.apply(Step::Invalid(reason));
        self.frame.discard();
        self.preamble = None;
        warn!("Ethernet frame dropped: {}", reason);
        out.annotate(range, WARNING, [format!("Frame dropped: {}", reason), "Dropped".to_string()])
    }

    fn preamble(&mut self, packet: Spanned<FourBFiveB>, out: &mut Output<'_, EthernetFrame>) -> WorkResult<()> {
        match packet.value {
            FourBFiveB::Byte(PREAMBLE) => {
                self.preamble = Some(self.preamble.map_or(packet.range, |r| r.union(packet.range)));
                self.frame.extend(packet.range);
                Ok(())
            }
            FourBFiveB::Byte(SFD) => {
                if let Some(range) = self.preamble.take() {
                    out.annotate(range, PREAMBLE_CLASS, ["Preamble", "P"])?;
                }
                out.annotate(packet.range, SFD_CLASS, ["Start frame delimiter", "SFD"])?;
                self.frame.extend(packet.range);
                self.machine.goto(EthernetState::Frame);
                Ok(())
            }
            FourBFiveB::Byte(_) => self.invalid(packet.range, "bad preamble", out),
            FourBFiveB::StreamEnd => self.invalid(packet.range, "stream ended in preamble", out),
            FourBFiveB::Violation(_) => self.invalid(packet.range, "code violation", out),
            FourBFiveB::StreamStart => self.invalid(packet.range, "unexpected start of stream", out),
        }
    }

    fn finish(&mut self, end: SampleRange, out: &mut Output<'_, EthernetFrame>) -> WorkResult<()> {
        self.frame.extend(end);
        self.machine.goto(EthernetState::Idle);
        let Some(Spanned { range, value: bytes }) = self.frame.commit() else {
            return Ok(());
        };

        if bytes.len() < MIN_FRAME_LEN {
            warn!("Ethernet runt frame of {} bytes", bytes.len());
            return out.annotate(
                range,
                WARNING,
                [format!("Runt frame ({} bytes)", bytes.len()), "Runt".to_string()],
            );
        }

        let data = &bytes[..bytes.len() - 4];
        let fcs_bytes = &bytes[bytes.len() - 4..];
        let raw: Vec<u8> = data.iter().map(|b| b.value).collect();
        let mut crc = Crc32::new();
        crc.update(&raw);
        let computed = crc.finish();
        let fcs = u32::from_le_bytes([
            fcs_bytes[0].value,
            fcs_bytes[1].value,
            fcs_bytes[2].value,
            fcs_bytes[3].value,
        ]);

        let mut destination = [0u8; 6];
        destination.copy_from_slice(&raw[0..6]);
        let mut source = [0u8; 6];
        source.copy_from_slice(&raw[6..12]);
        let ethertype = u16::from_be_bytes([raw[12], raw[13]]);
        let payload = data[14..].to_vec();

        self.annotate_fields(out, data, fcs_bytes, &destination, &source, ethertype, fcs, computed)?;

        let frame = EthernetFrame {
            destination,
            source,
            ethertype,
            payload,
            fcs,
            fcs_valid: fcs == computed,
        };
        debug!(
            "Ethernet frame {} -> {} type 0x{:04X}, {} payload bytes, FCS {}",
            mac(&frame.source),
            mac(&frame.destination),
            frame.ethertype,
            frame.payload.len(),
            if frame.fcs_valid { "ok" } else { "bad" }
        );
        out.packet(range, frame)
    }

    #[allow(clippy::too_many_arguments)]
    fn annotate_fields(
        &self,
        out: &mut Output<'_, EthernetFrame>,
        data: &[Spanned<u8>],
        fcs_bytes: &[Spanned<u8>],
        destination: &[u8; 6],
        source: &[u8; 6],
        ethertype: u16,
        fcs: u32,
        computed: u32,
    ) -> WorkResult<()> {
        if let Some(range) = span_of(&data[0..6]) {
            out.annotate(range, DESTINATION, [format!("Destination: {}", mac(destination)), mac(destination)])?;
        }
        if let Some(range) = span_of(&data[6..12]) {
            out.annotate(range, SOURCE, [format!("Source: {}", mac(source)), mac(source)])?;
        }
        if let Some(range) = span_of(&data[12..14]) {
            let texts = if ethertype < ETHERTYPE_MIN {
                [format!("Length: {}", ethertype), format!("{}", ethertype)]
            } else {
                let name = ETHERTYPES.lookup(u32::from(ethertype)).to_string();
                [format!("EtherType: {} (0x{:04X})", name, ethertype), name]
            };
            out.annotate(range, ETHERTYPE, texts)?;
        }
        let payload = &data[14..];
        if let Some(range) = span_of(payload) {
            out.annotate(
                range,
                PAYLOAD,
                [format!("Payload ({} bytes)", payload.len()), "Payload".to_string()],
            )?;
        }
        if let Some(range) = span_of(fcs_bytes) {
            out.annotate(range, FCS, [format!("FCS: 0x{:08X}", fcs), format!("{:08X}", fcs)])?;
            if fcs != computed {
                out.annotate(
                    range,
                    FCS_ERROR,
                    [
                        format!("FCS mismatch: expected 0x{:08X}", computed),
                        "Bad FCS".to_string(),
                    ],
                )?;
            }
        }
        debug!("Ethernet frame bytes: {}", hex_bytes(data.iter().map(|b| &b.value)));
        Ok(())
    }
}

impl Default for EthernetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EthernetDecoder {
    type Output = EthernetFrame;

    fn id(&self) -> &'static str {
        "eth"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        FOURB_FIVEB
    }

    fn outputs(&self) -> &'static str {
        ETHERNET
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
        self.preamble = None;
    }
}

impl StackedDecoder for EthernetDecoder {
    type Input = FourBFiveB;

    fn feed(&mut self, packet: Spanned<FourBFiveB>, out: &mut Output<'_, EthernetFrame>) -> WorkResult<()> {
        match self.machine.state() {
            EthernetState::Idle => match packet.value {
                FourBFiveB::StreamStart => {
                    self.frame.begin(Vec::new(), packet.range);
                    self.machine.goto(EthernetState::Preamble);
                }
                _ => {
                    self.machine.apply(Step::Ignore);
                }
            },
            EthernetState::Preamble => self.preamble(packet, out)?,
            EthernetState::Frame => match packet.value {
                FourBFiveB::Byte(byte) => {
                    if let Some(bytes) = self.frame.record_mut() {
                        bytes.push(Spanned::new(packet.range, byte));
                    }
                    self.frame.extend(packet.range);
                }
                FourBFiveB::StreamEnd => self.finish(packet.range, out)?,
                FourBFiveB::Violation(_) => self.invalid(packet.range, "code violation", out)?,
                FourBFiveB::StreamStart => self.invalid(packet.range, "unexpected start of stream", out)?,
            },
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
    use crate::synth::ethernet_frame;

    const DST: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    const SRC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

    /// One packet per 100 samples
    fn stream(bytes: &[u8]) -> Vec<Spanned<FourBFiveB>> {
        stream_at(0, bytes)
    }

    /// Like [`stream`], starting `first` packet slots into the capture
    fn stream_at(first: u64, bytes: &[u8]) -> Vec<Spanned<FourBFiveB>> {
        let mut packets = vec![FourBFiveB::StreamStart];
        packets.extend(bytes.iter().map(|&b| FourBFiveB::Byte(b)));
        packets.push(FourBFiveB::StreamEnd);
        packets
            .into_iter()
            .zip(first..)
            .map(|(p, i)| Spanned::new(SampleRange::new(i * 100, (i + 1) * 100), p))
            .collect()
    }

    fn run(packets: Vec<Spanned<FourBFiveB>>) -> (Vec<Spanned<EthernetFrame>>, AnnotationLog) {
        let mut stack = DecoderStack::packets::<FourBFiveB>(FOURB_FIVEB)
            .stack(EthernetDecoder::new())
            .unwrap();
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<EthernetFrame>::new();
        stack
            .run_packets_with_tap(packets, &mut log, &mut collector)
            .unwrap();
        (collector.into_packets(), log)
    }

    #[test]
    fn test_frame_fields_and_fcs() {
        let bytes = ethernet_frame(DST, SRC, ETHERTYPE_IPV4, b"hello");
        let count = bytes.len() as u64;
        let (frames, log) = run(stream(&bytes));

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.range, SampleRange::new(0, (count + 2) * 100));
        assert_eq!(frame.value.destination, DST);
        assert_eq!(frame.value.source, SRC);
        assert_eq!(frame.value.ethertype, ETHERTYPE_IPV4);
        assert_eq!(frame.value.payload.len(), 46);
        assert_eq!(&frame.value.payload_bytes()[..5], b"hello");
        assert!(frame.value.fcs_valid);
        assert!(log.contains_text("eth", "EtherType: IPv4 (0x0800)"));
        assert!(log.contains_text("eth", "Destination: 02:00:00:00:00:01"));
        assert_eq!(log.class("eth", FCS_ERROR).count(), 0);
    }

    #[test]
    fn test_corrupted_fcs_is_flagged() {
        let mut bytes = ethernet_frame(DST, SRC, 0x88B5, &[1, 2, 3]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let (frames, log) = run(stream(&bytes));
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].value.fcs_valid);
        assert_eq!(log.class("eth", FCS_ERROR).count(), 1);
        assert!(log.contains_text("eth", "Unknown (0x88B5)"));
    }

    #[test]
    fn test_violation_discards_frame_and_resyncs() {
        let bad = ethernet_frame(DST, SRC, ETHERTYPE_IPV4, &[0xAB; 10]);
        let good = ethernet_frame(SRC, DST, ETHERTYPE_IPV4, &[0xCD; 10]);
        let mut packets = stream(&bad);
        let end = packets.len() - 1;
        packets[end - 3].value = FourBFiveB::Violation(0b11111);
        let next = packets.len() as u64 + 5;
        packets.extend(stream_at(next, &good));

        let (frames, log) = run(packets);
        assert!(log.contains_text("eth", "Frame dropped: code violation"));
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.range.start(), next * 100);
        assert_eq!(frame.value.destination, SRC);
        assert_eq!(&frame.value.payload_bytes()[..10], &[0xCD; 10]);
        assert!(frame.value.fcs_valid);
    }

    #[test]
    fn test_reset_mid_frame() {
        let mut decoder = EthernetDecoder::new();
        decoder.machine.goto(EthernetState::Frame);
        decoder.frame.begin(vec![Spanned::new(SampleRange::point(5), 0x55)], SampleRange::point(5));
        decoder.preamble = Some(SampleRange::point(5));
        decoder.reset();
        assert_eq!(decoder.state(), EthernetState::INITIAL);
        assert!(!decoder.frame.is_open());
        assert_eq!(decoder.preamble, None);
    }

    #[test]
    fn test_bad_preamble_and_runt() {
        let (frames, log) = run(stream(&[0x55, 0x55, 0x12, 0x34]));
        assert!(frames.is_empty());
        assert!(log.contains_text("eth", "bad preamble"));

        let (frames, log) = run(stream(&[0x55, 0xD5, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(frames.is_empty());
        assert!(log.contains_text("eth", "Runt frame (8 bytes)"));
    }

    #[test]
    fn test_ethertype_table_is_consistent() {
        assert!(ETHERTYPES.validate().is_ok());
        assert_eq!(ETHERTYPES.get(0x86DD), Some(&"IPv6"));
    }
}
