//! Synthetic waveforms for tests and demos
//!
//! [`SignalBuilder`] appends held levels to a [`LogicCapture`] with helpers
//! for the line codes and buses the decoders understand. The free functions
//! build the byte and bit streams that go on the wire (4B5B code groups,
//! Ethernet frames, IPv4/UDP datagrams, stuffed CAN frames).

use crate::nodes::decoders::fourb_fiveb::{CODE_I, CODE_J, CODE_K, CODE_R, CODE_T, encode_nibble};
use crate::nodes::decoders::uart::UartConfig;
use crate::runtime::accumulator::BitOrder;
use crate::runtime::capture::LogicCapture;
use crate::runtime::checksum::{Crc15Can, Crc32, InternetChecksum};
use crate::runtime::sample::Levels;
use std::ops::Range;

/// Appends held channel levels to a capture
#[derive(Debug, Clone)]
pub struct SignalBuilder {
    capture: LogicCapture,
    levels: Levels,
}

impl SignalBuilder {
    /// All channels start low
    pub fn new(num_channels: usize) -> Self {
        Self {
            capture: LogicCapture::new(num_channels),
            levels: Levels::default(),
        }
    }

    /// Absolute index of the next sample to be appended
    pub fn position(&self) -> u64 {
        self.capture.end_position()
    }

    pub fn level(&self, channel: usize) -> bool {
        self.levels.get(channel)
    }

    /// Change a level for the samples appended next
    pub fn set(&mut self, channel: usize, level: bool) -> &mut Self {
        self.levels = self.levels.with(channel, level);
        self
    }

    /// Append `samples` samples at the current levels
    pub fn hold(&mut self, samples: u64) -> &mut Self {
        self.capture.push(self.levels, samples);
        self
    }

    /// One level per bit, `period` samples each
    pub fn bits(&mut self, channel: usize, bits: &[bool], period: u64) -> &mut Self {
        for &bit in bits {
            self.set(channel, bit).hold(period);
        }
        self
    }

    /// NRZ-I: a 1 toggles the line at the start of its cell
    pub fn nrzi(&mut self, channel: usize, bits: &[bool], period: u64) -> &mut Self {
        for &bit in bits {
            if bit {
                let level = !self.level(channel);
                self.set(channel, level);
            }
            self.hold(period);
        }
        self
    }

    /// One UART character framed per `config`
    pub fn uart(&mut self, channel: usize, config: &UartConfig, period: u64, value: u16) -> &mut Self {
        let line = |level: bool| level != config.invert;
        let data_bits = usize::from(config.data_bits);

        self.set(channel, line(false)).hold(period);
        for i in 0..data_bits {
            let shift = match config.bit_order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => data_bits - 1 - i,
            };
            self.set(channel, line((value >> shift) & 1 == 1)).hold(period);
        }
        if let Some(parity) = config.parity.bit(u64::from(value)) {
            self.set(channel, line(parity)).hold(period);
        }
        let stop = (config.stop_bits.bit_times() * period as f64).round() as u64;
        self.set(channel, line(true)).hold(stop)
    }

    /// Hold the line at the start level for `bit_times` bits, then release it
    pub fn uart_break(&mut self, channel: usize, bit_times: u64, period: u64) -> &mut Self {
        let idle = self.level(channel);
        self.set(channel, !idle).hold(bit_times * period);
        self.set(channel, idle)
    }

    /// Mode 0, MSB first SPI words inside one chip select window (active low).
    /// `miso` is ignored when the bus has no MISO channel.
    pub fn spi(
        &mut self,
        pins: SpiPins,
        words: &[(u32, u32)],
        bits: u8,
        half_period: u64,
    ) -> &mut Self {
        self.set(pins.clk, false);
        if let Some(cs) = pins.cs {
            self.set(cs, false);
        }
        self.hold(half_period);
        for &(mosi, miso) in words {
            for i in (0..u32::from(bits)).rev() {
                self.set(pins.mosi, (mosi >> i) & 1 == 1);
                if let Some(pin) = pins.miso {
                    self.set(pin, (miso >> i) & 1 == 1);
                }
                self.hold(half_period);
                self.set(pins.clk, true).hold(half_period);
                self.set(pins.clk, false);
            }
        }
        self.hold(half_period);
        if let Some(cs) = pins.cs {
            self.set(cs, true);
        }
        self.hold(half_period)
    }

    /// I2C START from an idle bus (or a repeated START after an ACK)
    pub fn i2c_start(&mut self, scl: usize, sda: usize, half_period: u64) -> &mut Self {
        if !self.level(scl) {
            self.set(sda, true).hold(half_period);
            self.set(scl, true).hold(half_period);
        }
        self.set(sda, false).hold(half_period);
        self.set(scl, false).hold(half_period)
    }

    /// Eight data bits MSB first plus the ACK bit driven by the receiver
    pub fn i2c_byte(&mut self, scl: usize, sda: usize, value: u8, ack: bool, half_period: u64) -> &mut Self {
        for i in (0..8).rev() {
            self.set(sda, (value >> i) & 1 == 1).hold(half_period);
            self.set(scl, true).hold(half_period);
            self.set(scl, false);
        }
        self.set(sda, !ack).hold(half_period);
        self.set(scl, true).hold(half_period);
        self.set(scl, false).hold(half_period)
    }

    pub fn i2c_stop(&mut self, scl: usize, sda: usize, half_period: u64) -> &mut Self {
        self.set(sda, false).hold(half_period);
        self.set(scl, true).hold(half_period);
        self.set(sda, true).hold(half_period)
    }

    pub fn into_capture(self) -> LogicCapture {
        self.capture
    }
}

/// Channel assignment for [`SignalBuilder::spi`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub cs: Option<usize>,
    pub clk: usize,
    pub mosi: usize,
    pub miso: Option<usize>,
}

/// A 4B5B code stream and where the framed part of it lies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeStream {
    pub bits: Vec<bool>,
    /// Bit indices from the first J bit to the last R bit
    pub frame: Range<usize>,
}

fn push_code(bits: &mut Vec<bool>, code: u8) {
    bits.extend((0..5).rev().map(|i| (code >> i) & 1 == 1));
}

/// Idle, J/K, the bytes low nibble first, T/R, idle
pub fn fourb_fiveb_stream(bytes: &[u8], idle_before: usize, idle_after: usize) -> CodeStream {
    let mut bits = Vec::with_capacity((bytes.len() * 2 + idle_before + idle_after + 4) * 5);
    for _ in 0..idle_before {
        push_code(&mut bits, CODE_I);
    }
    let start = bits.len();
    push_code(&mut bits, CODE_J);
    push_code(&mut bits, CODE_K);
    for &byte in bytes {
        push_code(&mut bits, encode_nibble(byte & 0x0F));
        push_code(&mut bits, encode_nibble(byte >> 4));
    }
    push_code(&mut bits, CODE_T);
    push_code(&mut bits, CODE_R);
    let end = bits.len();
    for _ in 0..idle_after {
        push_code(&mut bits, CODE_I);
    }
    CodeStream {
        bits,
        frame: start..end,
    }
}

/// Preamble, SFD, header, payload padded to 46 bytes, and FCS
pub fn ethernet_frame(destination: [u8; 6], source: [u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len().max(46) + 26);
    frame.extend_from_slice(&[0x55; 7]);
    frame.push(0xD5);
    let body_start = frame.len();
    frame.extend_from_slice(&destination);
    frame.extend_from_slice(&source);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    for _ in payload.len()..46 {
        frame.push(0);
    }
    let mut crc = Crc32::new();
    crc.update(&frame[body_start..]);
    frame.extend_from_slice(&crc.finish().to_le_bytes());
    frame
}

/// IPv4 header (no options) and UDP datagram with valid checksums
pub fn ipv4_udp(source: [u8; 4], destination: [u8; 4], source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_length = (8 + payload.len()) as u16;
    let total_length = 20 + udp_length;

    let mut header = vec![
        0x45, 0x00, 0, 0, 0x12, 0x34, 0x40, 0x00, 64, 17, 0, 0,
    ];
    header[2..4].copy_from_slice(&total_length.to_be_bytes());
    header.extend_from_slice(&source);
    header.extend_from_slice(&destination);
    let mut sum = InternetChecksum::new();
    sum.update(&header);
    header[10..12].copy_from_slice(&sum.finish().to_be_bytes());

    let mut udp = Vec::with_capacity(usize::from(udp_length));
    udp.extend_from_slice(&source_port.to_be_bytes());
    udp.extend_from_slice(&destination_port.to_be_bytes());
    udp.extend_from_slice(&udp_length.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let mut sum = InternetChecksum::new();
    sum.update(&source);
    sum.update(&destination);
    sum.update(&[0, 17]);
    sum.update(&udp_length.to_be_bytes());
    sum.update(&udp);
    let checksum = match sum.finish() {
        0 => 0xFFFF,
        value => value,
    };
    udp[6..8].copy_from_slice(&checksum.to_be_bytes());

    header.extend_from_slice(&udp);
    header
}

/// Stuffed CAN 2.0 frame from SOF to the end of EOF, acknowledged
pub fn can_frame_bits(id: u32, extended: bool, rtr: bool, data: &[u8]) -> Vec<bool> {
    let mut unstuffed = vec![false];
    let field = |bits: &mut Vec<bool>, value: u32, len: u32| {
        bits.extend((0..len).rev().map(|i| (value >> i) & 1 == 1));
    };
    if extended {
        field(&mut unstuffed, id >> 18, 11);
        unstuffed.push(true); // SRR
        unstuffed.push(true); // IDE
        field(&mut unstuffed, id & 0x3FFFF, 18);
        unstuffed.push(rtr);
        unstuffed.push(false); // r1
        unstuffed.push(false); // r0
    } else {
        field(&mut unstuffed, id, 11);
        unstuffed.push(rtr);
        unstuffed.push(false); // IDE
        unstuffed.push(false); // r0
    }
    let dlc = data.len().min(8) as u32;
    field(&mut unstuffed, dlc, 4);
    if !rtr {
        for &byte in &data[..dlc as usize] {
            field(&mut unstuffed, u32::from(byte), 8);
        }
    }
    let mut crc = Crc15Can::new();
    for &bit in &unstuffed {
        crc.update_bit(bit);
    }
    field(&mut unstuffed, u32::from(crc.finish()), 15);

    let mut bits = Vec::with_capacity(unstuffed.len() * 6 / 5 + 10);
    let mut run = 0;
    let mut last = None;
    for bit in unstuffed {
        if run == 5 {
            let stuff = !last.unwrap_or(bit);
            bits.push(stuff);
            last = Some(stuff);
            run = 1;
        }
        if last == Some(bit) {
            run += 1;
        } else {
            last = Some(bit);
            run = 1;
        }
        bits.push(bit);
    }
    // Stuffing covers the last CRC bit too
    if let (5, Some(level)) = (run, last) {
        bits.push(!level);
    }
    bits.push(true); // CRC delimiter
    bits.push(false); // ACK slot
    bits.push(true); // ACK delimiter
    bits.extend([true; 7]);
    bits
}
