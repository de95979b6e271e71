//! Decoder traits
//!
//! Defines the traits every protocol decoder implements. Logic-level
//! decoders pull samples through an [`EdgeWaiter`]; stacked decoders are
//! handed one upstream packet at a time. Both write to an [`Output`].

pub use super::annotation::{AnnotationClass, AnnotationRow};
pub use super::errors::{ConfigError, WorkError, WorkResult};
pub use super::ports::Output;
pub use super::sample::Spanned;
pub use super::waiter::EdgeWaiter;

/// Type tag of raw sample input
pub const LOGIC: &str = "logic";

/// Out-of-band information delivered before decoding starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Samples per second
    pub samplerate: Option<u64>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samplerate(mut self, samplerate: u64) -> Self {
        self.samplerate = Some(samplerate);
        self
    }

    /// The sample rate, for decoders that compare timing
    pub fn require_samplerate(&self) -> Result<u64, ConfigError> {
        match self.samplerate {
            Some(rate) if rate > 0 => Ok(rate),
            _ => Err(ConfigError::MissingSamplerate),
        }
    }
}

/// Common decoder description and lifecycle
pub trait Decoder {
    /// Packet type handed to the next stage
    type Output: 'static;

    /// Protocol identifier
    fn id(&self) -> &'static str;

    /// Instance name, unique within a stack
    fn name(&self) -> &str;

    /// Input type tag
    fn inputs(&self) -> &'static str;

    /// Output type tag
    fn outputs(&self) -> &'static str;

    fn annotation_classes(&self) -> &'static [AnnotationClass];

    fn annotation_rows(&self) -> &'static [AnnotationRow] {
        &[]
    }

    /// Validate configuration against the metadata. Called once per run,
    /// after `reset()`. An error disables this instance only.
    fn start(&mut self, metadata: &Metadata) -> Result<(), ConfigError>;

    /// Return to the initial state with empty accumulators
    fn reset(&mut self);
}

/// A decoder that consumes raw samples
pub trait LogicDecoder: Decoder {
    /// Decode the next unit. Called repeatedly until the waiter reports
    /// `WorkError::EndOfStream`; state carries over between calls.
    fn decode(
        &mut self,
        waiter: &mut EdgeWaiter<'_>,
        out: &mut Output<'_, Self::Output>,
    ) -> WorkResult<()>;
}

/// A decoder that consumes another decoder's packets
pub trait StackedDecoder: Decoder {
    type Input: 'static;

    fn feed(
        &mut self,
        packet: Spanned<Self::Input>,
        out: &mut Output<'_, Self::Output>,
    ) -> WorkResult<()>;
}
