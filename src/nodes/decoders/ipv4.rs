//! IPv4 header decoder on top of Ethernet frames
//!
//! Frames with another EtherType are not IPv4 and are skipped without a
//! warning. A header that does not hold together (version, IHL, total
//! length) is a framing error. A wrong header checksum only clears
//! `checksum_valid`.

use super::ethernet::{ETHERNET, ETHERTYPE_IPV4, EthernetFrame};
use crate::runtime::checksum::InternetChecksum;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{Spanned, span_of};
use crate::runtime::state::Parse;
use crate::runtime::table::ProtocolTable;
use lazy_static::lazy_static;
use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

/// Output tag
pub const IPV4: &str = "ipv4";

pub const PROTOCOL_UDP: u8 = 17;

const MIN_HEADER_LEN: usize = 20;

static PROTOCOL_NAMES: &[(u32, &str)] = &[
    (1, "ICMP"),
    (2, "IGMP"),
    (6, "TCP"),
    (17, "UDP"),
    (41, "IPv6"),
    (47, "GRE"),
    (50, "ESP"),
    (89, "OSPF"),
    (132, "SCTP"),
];

lazy_static! {
    pub static ref PROTOCOLS: ProtocolTable<&'static str> =
        ProtocolTable::new("IP protocol", PROTOCOL_NAMES);
}

const HEADER: usize = 0;
const LENGTH: usize = 1;
const TTL: usize = 2;
const PROTOCOL: usize = 3;
const CHECKSUM: usize = 4;
const ADDRESS: usize = 5;
const CHECKSUM_ERROR: usize = 6;
const WARNING: usize = 7;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("header", "Version and header length"),
    AnnotationClass::new("length", "Total length"),
    AnnotationClass::new("ttl", "Time to live"),
    AnnotationClass::new("protocol", "Protocol"),
    AnnotationClass::new("checksum", "Header checksum"),
    AnnotationClass::new("address", "Address"),
    AnnotationClass::new("checksum-error", "Checksum mismatch"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new(
        "fields",
        "Fields",
        &[HEADER, LENGTH, TTL, PROTOCOL, CHECKSUM, ADDRESS],
    ),
    AnnotationRow::new("errors", "Errors", &[CHECKSUM_ERROR, WARNING]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in 32-bit words
    pub ihl: u8,
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    /// Reserved, DF, MF
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub options: Vec<u8>,
}

impl Ipv4Header {
    pub fn dont_fragment(&self) -> bool {
        self.flags & 0b010 != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & 0b001 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub header: Ipv4Header,
    pub checksum_valid: bool,
    /// Bytes after the header up to the total length
    pub payload: Vec<Spanned<u8>>,
}

/// Split an Ethernet frame into an IPv4 header and payload
pub fn parse(frame: &EthernetFrame) -> Parse<Ipv4Packet> {
    if frame.ethertype != ETHERTYPE_IPV4 {
        return Parse::NotThisProtocol;
    }
    let bytes: Vec<u8> = frame.payload.iter().map(|b| b.value).collect();
    if bytes.len() < MIN_HEADER_LEN {
        return Parse::Framing(format!("header truncated at {} bytes", bytes.len()));
    }

    let version = bytes[0] >> 4;
    if version != 4 {
        return Parse::Framing(format!("version {} in an IPv4 frame", version));
    }
    let ihl = bytes[0] & 0x0F;
    let header_len = usize::from(ihl) * 4;
    if header_len < MIN_HEADER_LEN || header_len > bytes.len() {
        return Parse::Framing(format!("bad header length {}", ihl));
    }
    let total_length = u16::from_be_bytes([bytes[2], bytes[3]]);
    let total = usize::from(total_length);
    if total < header_len || total > bytes.len() {
        return Parse::Framing(format!("bad total length {}", total_length));
    }

    let mut sum = InternetChecksum::new();
    sum.update(&bytes[..header_len]);

    let fragment = u16::from_be_bytes([bytes[6], bytes[7]]);
    let header = Ipv4Header {
        ihl,
        dscp: bytes[1] >> 2,
        ecn: bytes[1] & 0x03,
        total_length,
        identification: u16::from_be_bytes([bytes[4], bytes[5]]),
        flags: (fragment >> 13) as u8,
        fragment_offset: fragment & 0x1FFF,
        ttl: bytes[8],
        protocol: bytes[9],
        checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
        source: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
        destination: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
        options: bytes[MIN_HEADER_LEN..header_len].to_vec(),
    };
    Parse::Ok(Ipv4Packet {
        header,
        checksum_valid: sum.finish() == 0,
        payload: frame.payload[header_len..total].to_vec(),
    })
}

/// IPv4 decoder
///
/// Input: [`EthernetFrame`]s
/// Output: [`Ipv4Packet`]s
pub struct Ipv4Decoder {
    name: String,
}

impl Ipv4Decoder {
    pub fn new() -> Self {
        Self {
            name: "ipv4".to_string(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn annotate(
        frame: &[Spanned<u8>],
        packet: &Ipv4Packet,
        out: &mut Output<'_, Ipv4Packet>,
    ) -> WorkResult<()> {
        let header = &packet.header;
        if let Some(range) = span_of(&frame[0..1]) {
            out.annotate(
                range,
                HEADER,
                [format!("Version 4, header {} bytes", usize::from(header.ihl) * 4), "IPv4".to_string()],
            )?;
        }
        if let Some(range) = span_of(&frame[2..4]) {
            out.annotate(
                range,
                LENGTH,
                [format!("Total length: {}", header.total_length), header.total_length.to_string()],
            )?;
        }
        if let Some(range) = span_of(&frame[8..9]) {
            out.annotate(range, TTL, [format!("TTL: {}", header.ttl), header.ttl.to_string()])?;
        }
        if let Some(range) = span_of(&frame[9..10]) {
            let name = PROTOCOLS.lookup(u32::from(header.protocol)).to_string();
            out.annotate(range, PROTOCOL, [format!("Protocol: {}", name), name])?;
        }
        if let Some(range) = span_of(&frame[10..12]) {
            out.annotate(
                range,
                CHECKSUM,
                [format!("Checksum: 0x{:04X}", header.checksum), format!("{:04X}", header.checksum)],
            )?;
            if !packet.checksum_valid {
                out.annotate(range, CHECKSUM_ERROR, ["Header checksum mismatch", "Bad checksum"])?;
            }
        }
        if let Some(range) = span_of(&frame[12..16]) {
            out.annotate(
                range,
                ADDRESS,
                [format!("Source: {}", header.source), header.source.to_string()],
            )?;
        }
        if let Some(range) = span_of(&frame[16..20]) {
            out.annotate(
                range,
                ADDRESS,
                [format!("Destination: {}", header.destination), header.destination.to_string()],
            )?;
        }
        Ok(())
    }
}

impl Default for Ipv4Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Ipv4Decoder {
    type Output = Ipv4Packet;

    fn id(&self) -> &'static str {
        "ipv4"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        ETHERNET
    }

    fn outputs(&self) -> &'static str {
        IPV4
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

    fn reset(&mut self) {}
}

impl StackedDecoder for Ipv4Decoder {
    type Input = EthernetFrame;

    fn feed(&mut self, packet: Spanned<EthernetFrame>, out: &mut Output<'_, Ipv4Packet>) -> WorkResult<()> {
        let frame = &packet.value;
        match parse(frame) {
            Parse::Ok(ip) => {
                Self::annotate(&frame.payload, &ip, out)?;
                let total = usize::from(ip.header.total_length);
                let range = span_of(&frame.payload[..total]).unwrap_or(packet.range);
                debug!(
                    "IPv4 {} -> {} protocol {} ({} payload bytes)",
                    ip.header.source,
                    ip.header.destination,
                    ip.header.protocol,
                    ip.payload.len()
                );
                out.packet(range, ip)
            }
            Parse::Framing(reason) => {
                warn!("IPv4 framing error: {}", reason);
                let range = span_of(&frame.payload).unwrap_or(packet.range);
                out.annotate(range, WARNING, [format!("Malformed IPv4: {}", reason), "Malformed".to_string()])
            }
            Parse::NotThisProtocol => {
                trace!("Skipping EtherType 0x{:04X}", frame.ethertype);
                Ok(())
            }
        }
    }
}
