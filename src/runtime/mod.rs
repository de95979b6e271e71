//! Runtime support for stacked protocol decoders

pub mod accumulator;
pub mod annotation;
pub mod capture;
pub mod checksum;
pub mod errors;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod sample;
pub mod state;
pub mod table;
pub mod waiter;

pub use accumulator::{BitOrder, Destuffer, PushOutcome, SlidingWindow, StuffOutcome, Symbol, SymbolAccumulator};
pub use annotation::{
    Annotation, AnnotationClass, AnnotationLog, AnnotationRow, AnnotationSink, DiscardAnnotations,
};
pub use capture::LogicCapture;
pub use errors::{ConfigError, ConnectionError, TableError, WorkError, WorkResult};
pub use node::{Decoder, LOGIC, LogicDecoder, Metadata, StackedDecoder};
pub use pipeline::{DecoderStack, RunReport, StageReport, StageStatus};
pub use ports::{AnyPacket, NoTap, Output, PacketCollector, PacketTap, PortSchema, StageStats};
pub use receiver::SampleCursor;
pub use sample::{Levels, Sample, SampleRange, Spanned, span_of};
pub use state::{FrameMachine, FrameState, InvalidPolicy, Outcome, Parse, Scratch, Step};
pub use table::{Lookup, ProtocolTable};
pub use waiter::{Condition, EdgeWaiter, Matched, Term};
