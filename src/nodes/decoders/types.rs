//! Common decoder types and enums

use crate::runtime::sample::Spanned;

/// SPI clock polarity and phase modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: Clock idle low, sample on rising edge
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1: Clock idle low, sample on falling edge
    Mode1,
    /// CPOL=1, CPHA=0: Clock idle high, sample on falling edge
    Mode2,
    /// CPOL=1, CPHA=1: Clock idle high, sample on rising edge
    Mode3,
}

impl SpiMode {
    /// Whether data is sampled on the rising CLK edge
    pub fn samples_on_rising(self) -> bool {
        matches!(self, SpiMode::Mode0 | SpiMode::Mode3)
    }
}

/// Chip select polarity for decoders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CsPolarity {
    /// CS is active-low (standard SPI): LOW = active, HIGH = inactive
    #[default]
    ActiveLow,
    /// CS is active-high: HIGH = active, LOW = inactive
    ActiveHigh,
    /// CS state is ignored (the bus is always selected)
    Disabled,
}

impl CsPolarity {
    pub fn is_active(self, level: bool) -> bool {
        match self {
            CsPolarity::ActiveLow => !level,
            CsPolarity::ActiveHigh => level,
            CsPolarity::Disabled => true,
        }
    }
}

/// Space separated hex, as used in payload annotations
pub fn hex_bytes<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> String {
    bytes
        .into_iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain values of a run of spanned bytes
pub fn values(bytes: &[Spanned<u8>]) -> Vec<u8> {
    bytes.iter().map(|b| b.value).collect()
}

/// Colon separated MAC address
pub fn mac(address: &[u8; 6]) -> String {
    address
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
