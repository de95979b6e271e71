//! Incremental checksums
//!
//! Every checksum is fed as bytes (or bits) arrive and compared only at the
//! terminating field; callers turn a mismatch into a validity flag.

/// CRC-15/CAN: poly 0x4599, init 0, computed bit by bit over the
/// destuffed frame from SOF to the end of the data field
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc15Can {
    crc: u16,
}

impl Crc15Can {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_bit(&mut self, bit: bool) {
        let top = (self.crc >> 14) & 1 == 1;
        self.crc = (self.crc << 1) & 0x7FFF;
        if top != bit {
            self.crc ^= 0x4599;
        }
    }

    /// Feed whole bytes, MSB first
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            for i in (0..8).rev() {
                self.update_bit((byte >> i) & 1 == 1);
            }
        }
    }

    pub fn finish(&self) -> u16 {
        self.crc
    }
}

/// CRC-32 as used for the Ethernet FCS (reflected 0x04C11DB7)
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { crc: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.crc ^= u32::from(byte);
            for _ in 0..8 {
                self.crc = if self.crc & 1 != 0 {
                    (self.crc >> 1) ^ 0xEDB8_8320
                } else {
                    self.crc >> 1
                };
            }
        }
    }

    pub fn finish(&self) -> u32 {
        !self.crc
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// LIN sum with end-around carry; the transmitted checksum is the inverse
#[derive(Debug, Clone, Copy, Default)]
pub struct LinChecksum {
    sum: u16,
}

impl LinChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.sum += u16::from(byte);
            if self.sum > 0xFF {
                self.sum -= 0xFF;
            }
        }
    }

    pub fn finish(&self) -> u8 {
        !(self.sum as u8)
    }
}

/// RFC 1071 one's-complement sum over 16-bit big-endian words.
///
/// A header that already contains its correct checksum finishes to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternetChecksum {
    sum: u32,
    odd: Option<u8>,
}

impl InternetChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut bytes = data.iter().copied();
        if let Some(high) = self.odd.take() {
            match bytes.next() {
                Some(low) => self.add_word(u16::from_be_bytes([high, low])),
                None => {
                    self.odd = Some(high);
                    return;
                }
            }
        }
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(high), Some(low)) => self.add_word(u16::from_be_bytes([high, low])),
                (Some(high), None) => {
                    self.odd = Some(high);
                    break;
                }
                _ => break,
            }
        }
    }

    pub fn add_word(&mut self, word: u16) {
        self.sum += u32::from(word);
        if self.sum > 0xFFFF {
            self.sum = (self.sum & 0xFFFF) + (self.sum >> 16);
        }
    }

    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(high) = self.odd {
            sum += u32::from(high) << 8;
        }
        while sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// Parity bit that makes the total number of ones even
pub fn even_parity(value: u64) -> bool {
    value.count_ones() % 2 == 1
}

/// Parity bit that makes the total number of ones odd
pub fn odd_parity(value: u64) -> bool {
    !even_parity(value)
}
