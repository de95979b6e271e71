//! Protocol decoder nodes
//!
//! Logic decoders sample channels through an edge waiter; stacked decoders
//! consume the packets of the decoder below them.
//!
//! ```text
//! nrzi -> 4b5b -> eth -> ipv4 -> udp
//! uart -> lin
//! spi  -> cc1101
//! i2c  -> i2c_transaction
//! can
//! ```

pub mod can;
pub mod cc1101;
pub mod ethernet;
pub mod fourb_fiveb;
pub mod i2c;
pub mod i2c_transaction;
pub mod ipv4;
pub mod lin;
pub mod nrzi;
pub mod spi;
pub mod types;
pub mod uart;
pub mod udp;

// Re-export common types
pub use types::{CsPolarity, SpiMode};

// Re-export decoders and their packets
pub use can::{CanConfig, CanDecoder, CanFrame};
pub use cc1101::{
    Cc1101Config, Cc1101Decoder, Cc1101Packet, ChipStatus, RegisterAccess, RegisterKind,
    StatusBurstWrite,
};
pub use ethernet::{EthernetDecoder, EthernetFrame};
pub use fourb_fiveb::{FourBFiveB, FourBFiveBDecoder};
pub use i2c::{I2cConfig, I2cDecoder, I2cPacket};
pub use i2c_transaction::{I2cTransaction, I2cTransactionDecoder};
pub use ipv4::{Ipv4Decoder, Ipv4Header, Ipv4Packet};
pub use lin::{LinConfig, LinDecoder, LinFrame, LinVersion};
pub use nrzi::{NrziConfig, NrziDecoder};
pub use spi::{SpiConfig, SpiDecoder, SpiPacket, SpiTransfer};
pub use uart::{Parity, StopBits, UartConfig, UartDecoder, UartFrame, UartPacket};
pub use udp::{UdpDatagram, UdpDecoder};
