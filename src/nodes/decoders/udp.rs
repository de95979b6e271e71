//! UDP decoder on top of IPv4
//!
//! The checksum covers a pseudo header (addresses, protocol, UDP length) and
//! the whole datagram. A transmitted checksum of zero means none was sent.

use super::ipv4::{IPV4, Ipv4Packet, PROTOCOL_UDP};
use super::types::hex_bytes;
use crate::runtime::checksum::InternetChecksum;
use crate::runtime::node::{
    AnnotationClass, AnnotationRow, ConfigError, Decoder, Metadata, Output, StackedDecoder,
    WorkResult,
};
use crate::runtime::sample::{Spanned, span_of};
use crate::runtime::state::Parse;
use tracing::{debug, trace, warn};

/// Output tag
pub const UDP: &str = "udp";

const HEADER_LEN: usize = 8;

const PORT: usize = 0;
const LENGTH: usize = 1;
const CHECKSUM: usize = 2;
const PAYLOAD: usize = 3;
const CHECKSUM_ERROR: usize = 4;
const WARNING: usize = 5;

const CLASSES: &[AnnotationClass] = &[
    AnnotationClass::new("port", "Port"),
    AnnotationClass::new("length", "Length"),
    AnnotationClass::new("checksum", "Checksum"),
    AnnotationClass::new("payload", "Payload"),
    AnnotationClass::new("checksum-error", "Checksum mismatch"),
    AnnotationClass::new("warning", "Warning"),
];

const ROWS: &[AnnotationRow] = &[
    AnnotationRow::new("fields", "Fields", &[PORT, LENGTH, CHECKSUM]),
    AnnotationRow::new("payload", "Payload", &[PAYLOAD]),
    AnnotationRow::new("errors", "Errors", &[CHECKSUM_ERROR, WARNING]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub source_port: u16,
    pub destination_port: u16,
    pub length: u16,
    pub checksum: u16,
    /// `None` when the sender left the checksum out
    pub checksum_valid: Option<bool>,
    pub payload: Vec<Spanned<u8>>,
}

impl UdpDatagram {
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.iter().map(|b| b.value).collect()
    }
}

/// Split an IPv4 payload into a UDP header and payload
pub fn parse(packet: &Ipv4Packet) -> Parse<UdpDatagram> {
    if packet.header.protocol != PROTOCOL_UDP {
        return Parse::NotThisProtocol;
    }
    let bytes: Vec<u8> = packet.payload.iter().map(|b| b.value).collect();
    if bytes.len() < HEADER_LEN {
        return Parse::Framing(format!("header truncated at {} bytes", bytes.len()));
    }
    let length = u16::from_be_bytes([bytes[4], bytes[5]]);
    let len = usize::from(length);
    if len < HEADER_LEN || len > bytes.len() {
        return Parse::Framing(format!("bad length {}", length));
    }

    let checksum = u16::from_be_bytes([bytes[6], bytes[7]]);
    let checksum_valid = (checksum != 0).then(|| {
        let mut sum = InternetChecksum::new();
        sum.update(&packet.header.source.octets());
        sum.update(&packet.header.destination.octets());
        sum.update(&[0, PROTOCOL_UDP]);
        sum.update(&length.to_be_bytes());
        sum.update(&bytes[..len]);
        sum.finish() == 0
    });

    Parse::Ok(UdpDatagram {
        source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
        destination_port: u16::from_be_bytes([bytes[2], bytes[3]]),
        length,
        checksum,
        checksum_valid,
        payload: packet.payload[HEADER_LEN..len].to_vec(),
    })
}

/// UDP decoder
///
/// Input: [`Ipv4Packet`]s
/// Output: [`UdpDatagram`]s
pub struct UdpDecoder {
    name: String,
}

impl UdpDecoder {
    pub fn new() -> Self {
        Self {
            name: "udp".to_string(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn annotate(
        bytes: &[Spanned<u8>],
        datagram: &UdpDatagram,
        out: &mut Output<'_, UdpDatagram>,
    ) -> WorkResult<()> {
        if let Some(range) = span_of(&bytes[0..2]) {
            let port = datagram.source_port;
            out.annotate(range, PORT, [format!("Source port: {}", port), port.to_string()])?;
        }
        if let Some(range) = span_of(&bytes[2..4]) {
            let port = datagram.destination_port;
            out.annotate(range, PORT, [format!("Destination port: {}", port), port.to_string()])?;
        }
        if let Some(range) = span_of(&bytes[4..6]) {
            let length = datagram.length;
            out.annotate(range, LENGTH, [format!("Length: {}", length), length.to_string()])?;
        }
        if let Some(range) = span_of(&bytes[6..8]) {
            let text = match datagram.checksum_valid {
                None => "Checksum: none".to_string(),
                Some(_) => format!("Checksum: 0x{:04X}", datagram.checksum),
            };
            out.annotate(range, CHECKSUM, [text, format!("{:04X}", datagram.checksum)])?;
            if datagram.checksum_valid == Some(false) {
                out.annotate(range, CHECKSUM_ERROR, ["Checksum mismatch", "Bad checksum"])?;
            }
        }
        if let Some(range) = span_of(&datagram.payload) {
            let hex = hex_bytes(datagram.payload.iter().map(|b| &b.value));
            out.annotate(
                range,
                PAYLOAD,
                [format!("Payload ({} bytes): {}", datagram.payload.len(), hex), hex],
            )?;
        }
        Ok(())
    }
}

impl Default for UdpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for UdpDecoder {
    type Output = UdpDatagram;

    fn id(&self) -> &'static str {
        "udp"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &'static str {
        IPV4
    }

    fn outputs(&self) -> &'static str {
        UDP
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

impl StackedDecoder for UdpDecoder {
    type Input = Ipv4Packet;

    fn feed(&mut self, packet: Spanned<Ipv4Packet>, out: &mut Output<'_, UdpDatagram>) -> WorkResult<()> {
        let ip = &packet.value;
        match parse(ip) {
            Parse::Ok(datagram) => {
                Self::annotate(&ip.payload, &datagram, out)?;
                let len = usize::from(datagram.length);
                let range = span_of(&ip.payload[..len]).unwrap_or(packet.range);
                debug!(
                    "UDP {} -> {}, {} payload bytes",
                    datagram.source_port,
                    datagram.destination_port,
                    datagram.payload.len()
                );
                out.packet(range, datagram)
            }
            Parse::Framing(reason) => {
                warn!("UDP framing error: {}", reason);
                let range = span_of(&ip.payload).unwrap_or(packet.range);
                out.annotate(range, WARNING, [format!("Malformed UDP: {}", reason), "Malformed".to_string()])
            }
            Parse::NotThisProtocol => {
                trace!("Skipping IP protocol {}", ip.header.protocol);
                Ok(())
            }
        }
    }
}
