//! Stacked protocol decoders for logic analyzer captures
//!
//! Samples stream through a chain of decoders. The bottom decoder reads
//! channel levels through an edge waiter; every decoder above it consumes the
//! packets of the one below. Each stage emits annotations over sample ranges
//! for display, and typed packets for the next stage.
//!
//! # Architecture
//!
//! - **EdgeWaiter**: suspends a logic decoder until edge, level or timeout
//!   conditions hold
//! - **FrameMachine**: closed per-decoder state sets with explicit handling of
//!   unexpected events
//! - **DecoderStack**: type-checked chain of decoders, run synchronously
//! - **Decoders**: NRZ-I, 4B5B, Ethernet, IPv4, UDP, UART, LIN, SPI, CC1101,
//!   I2C, CAN
//!
//! # Example
//!
//! ```no_run
//! use pdstack::nodes::decoders::{UartConfig, UartDecoder, LinDecoder, LinConfig, LinFrame};
//! use pdstack::runtime::{AnnotationLog, DecoderStack, LogicCapture, PacketCollector};
//!
//! let capture = LogicCapture::new(1);
//! let mut stack = DecoderStack::new(UartDecoder::new(UartConfig::default().with_baudrate(19_200)))
//!     .with_samplerate(1_000_000)
//!     .stack(LinDecoder::new(LinConfig::default()))?;
//! let mut log = AnnotationLog::new();
//! let mut frames = PacketCollector::<LinFrame>::new();
//! stack.run_with_tap(capture.samples(), &mut log, &mut frames)?;
//! # Ok::<(), pdstack::runtime::ConnectionError>(())
//! ```

pub mod nodes;
pub mod runtime;
pub mod synth;

// Re-export data types from runtime
pub use runtime::{Levels, Sample, SampleRange, Spanned};

// Re-export the stack runtime
pub use runtime::{
    AnnotationLog, AnnotationSink, ConfigError, ConnectionError, Decoder, DecoderStack,
    LogicCapture, LogicDecoder, Metadata, PacketCollector, RunReport, StackedDecoder, WorkError,
    WorkResult,
};
