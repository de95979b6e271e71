//! Decoder stack builder and driver
//!
//! A [`DecoderStack`] is a fixed chain: a logic-level decoder (or an
//! external packet feed) at the bottom and any number of stacked decoders
//! above it. Stages are named and type-checked when added. Running a stack
//! delivers metadata to every stage, then drives the bottom to the end of
//! its input; each packet is processed by the whole rest of the chain
//! before the producing stage continues.
//!
//! A stage that fails configuration or returns an error is disabled and
//! reported. Stages above it receive nothing more; stages below it keep
//! running.

use super::annotation::AnnotationSink;
use super::errors::{ConfigError, ConnectionError, WorkError, WorkResult};
use super::node::{LOGIC, LogicDecoder, Metadata, StackedDecoder};
use super::ports::{AnyPacket, Downstream, NoTap, Output, PacketTap, PortSchema, StageStats};
use super::sample::{Sample, Spanned};
use super::waiter::EdgeWaiter;
use std::any::Any;
use tracing::{debug, error, info, warn};

/// Final status of one stage after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Configuration was rejected; the stage never ran
    Disabled(ConfigError),
    /// The stage stopped on an error
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub id: &'static str,
    pub status: StageStatus,
    pub stats: StageStats,
}

/// Outcome of a run, bottom stage first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Whether every stage completed
    pub fn is_clean(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status == StageStatus::Completed)
    }
}

/// Object-safe view of a stacked decoder
pub(crate) trait PacketStage {
    fn name(&self) -> &str;
    fn input(&self) -> PortSchema;
    fn output(&self) -> PortSchema;
    fn reset(&mut self);
    fn start(&mut self, metadata: &Metadata);
    fn push(&mut self, packet: AnyPacket, downstream: Downstream<'_>) -> WorkResult<()>;
    fn report(&self) -> StageReport;
}

/// Object-safe view of a logic-level decoder
trait LogicRunner {
    fn name(&self) -> &str;
    fn output(&self) -> PortSchema;
    fn reset(&mut self);
    fn start(&mut self, metadata: &Metadata) -> bool;
    fn run(&mut self, waiter: &mut EdgeWaiter<'_>, downstream: Downstream<'_>);
    fn report(&self) -> StageReport;
}

struct LogicStage<D> {
    name: String,
    decoder: D,
    stats: StageStats,
    status: StageStatus,
}

impl<D: LogicDecoder> LogicRunner for LogicStage<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn output(&self) -> PortSchema {
        PortSchema::new::<D::Output>(self.decoder.outputs())
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.stats = StageStats::default();
        self.status = StageStatus::Completed;
    }

    fn start(&mut self, metadata: &Metadata) -> bool {
        match self.decoder.start(metadata) {
            Ok(()) => {
                info!("Starting stage '{}' ({})", self.name, self.decoder.id());
                true
            }
            Err(e) => {
                warn!("Stage '{}' disabled: {}", self.name, e);
                self.status = StageStatus::Disabled(e);
                false
            }
        }
    }

    fn run(&mut self, waiter: &mut EdgeWaiter<'_>, mut downstream: Downstream<'_>) {
        let classes = self.decoder.annotation_classes();
        loop {
            let mut out = Output::new(&self.name, classes, &mut self.stats, downstream.reborrow());
            match self.decoder.decode(waiter, &mut out) {
                Ok(()) => continue,
                Err(WorkError::EndOfStream) => {
                    debug!("Stage '{}' reached end of stream", self.name);
                    break;
                }
                Err(e) => {
                    error!("Stage '{}' failed: {}", self.name, e);
                    self.status = StageStatus::Failed(e.to_string());
                    break;
                }
            }
        }
    }

    fn report(&self) -> StageReport {
        StageReport {
            name: self.name.clone(),
            id: self.decoder.id(),
            status: self.status.clone(),
            stats: self.stats,
        }
    }
}

struct StackedStage<D> {
    name: String,
    decoder: D,
    stats: StageStats,
    status: StageStatus,
}

impl<D: StackedDecoder> StackedStage<D> {
    fn fail(&mut self, e: WorkError) {
        error!("Stage '{}' failed: {}", self.name, e);
        self.status = StageStatus::Failed(e.to_string());
    }
}

impl<D: StackedDecoder> PacketStage for StackedStage<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input(&self) -> PortSchema {
        PortSchema::new::<D::Input>(self.decoder.inputs())
    }

    fn output(&self) -> PortSchema {
        PortSchema::new::<D::Output>(self.decoder.outputs())
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.stats = StageStats::default();
        self.status = StageStatus::Completed;
    }

    fn start(&mut self, metadata: &Metadata) {
        match self.decoder.start(metadata) {
            Ok(()) => info!("Starting stage '{}' ({})", self.name, self.decoder.id()),
            Err(e) => {
                warn!("Stage '{}' disabled: {}", self.name, e);
                self.status = StageStatus::Disabled(e);
            }
        }
    }

    fn push(&mut self, packet: AnyPacket, mut downstream: Downstream<'_>) -> WorkResult<()> {
        if self.status != StageStatus::Completed {
            return Ok(());
        }
        self.stats.packets_in += 1;

        let Spanned { range, value } = packet;
        let value = match value.downcast::<D::Input>() {
            Ok(value) => *value,
            Err(_) => {
                let e = WorkError::InputType {
                    stage: self.name.clone(),
                    expected: std::any::type_name::<D::Input>(),
                };
                self.fail(e);
                return Ok(());
            }
        };

        let classes = self.decoder.annotation_classes();
        let result = {
            let mut out = Output::new(&self.name, classes, &mut self.stats, downstream.reborrow());
            self.decoder.feed(Spanned::new(range, value), &mut out)
        };
        if let Err(e) = result {
            self.fail(e);
        }
        Ok(())
    }

    fn report(&self) -> StageReport {
        StageReport {
            name: self.name.clone(),
            id: self.decoder.id(),
            status: self.status.clone(),
            stats: self.stats,
        }
    }
}

enum Bottom {
    Logic(Box<dyn LogicRunner>),
    Packets(PortSchema),
}

/// Statically configured chain of decoders
pub struct DecoderStack {
    bottom: Bottom,
    stages: Vec<Box<dyn PacketStage>>,
    metadata: Metadata,
}

impl DecoderStack {
    /// Stack with a logic-level decoder at the bottom
    pub fn new<D: LogicDecoder + 'static>(decoder: D) -> Self {
        debug_assert_eq!(decoder.inputs(), LOGIC);
        let name = decoder.name().to_string();
        Self {
            bottom: Bottom::Logic(Box::new(LogicStage {
                name,
                decoder,
                stats: StageStats::default(),
                status: StageStatus::Completed,
            })),
            stages: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    /// Stack fed with packets of type `P` from outside
    pub fn packets<P: 'static>(tag: &'static str) -> Self {
        Self {
            bottom: Bottom::Packets(PortSchema::new::<P>(tag)),
            stages: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_samplerate(mut self, samplerate: u64) -> Self {
        self.metadata.samplerate = Some(samplerate);
        self
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Put `decoder` on top. Its input must match the current top's output.
    pub fn stack<D: StackedDecoder + 'static>(mut self, decoder: D) -> Result<Self, ConnectionError> {
        let name = decoder.name().to_string();
        if self.stage_names().any(|existing| existing == name) {
            return Err(ConnectionError::DuplicateStage(name));
        }

        let (top_name, top) = self.top();
        let input = PortSchema::new::<D::Input>(decoder.inputs());
        if !input.accepts(&top) {
            return Err(ConnectionError::TypeMismatch {
                from_stage: top_name,
                from_tag: top.tag,
                from_type: top.short_type_name(),
                to_stage: name,
                to_tag: input.tag,
                to_type: input.short_type_name(),
            });
        }

        debug!("Stacked '{}' ({}) on '{}'", name, input.tag, top_name);
        self.stages.push(Box::new(StackedStage {
            name,
            decoder,
            stats: StageStats::default(),
            status: StageStatus::Completed,
        }));
        Ok(self)
    }

    /// Stage names, bottom first
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        let bottom = match &self.bottom {
            Bottom::Logic(logic) => Some(logic.name()),
            Bottom::Packets(_) => None,
        };
        bottom
            .into_iter()
            .chain(self.stages.iter().map(|stage| stage.name()))
    }

    fn top(&self) -> (String, PortSchema) {
        match (self.stages.last(), &self.bottom) {
            (Some(stage), _) => (stage.name().to_string(), stage.output()),
            (None, Bottom::Logic(logic)) => (logic.name().to_string(), logic.output()),
            (None, Bottom::Packets(schema)) => ("input".to_string(), *schema),
        }
    }

    fn input_tag(&self) -> &'static str {
        match &self.bottom {
            Bottom::Logic(_) => LOGIC,
            Bottom::Packets(schema) => schema.tag,
        }
    }

    /// Decode a whole sample stream
    pub fn run<I>(&mut self, source: I, sink: &mut dyn AnnotationSink) -> Result<RunReport, ConnectionError>
    where
        I: IntoIterator<Item = Sample>,
    {
        self.run_with_tap(source, sink, &mut NoTap)
    }

    /// Decode a whole sample stream, handing the top stage's packets to `tap`
    pub fn run_with_tap<I>(
        &mut self,
        source: I,
        sink: &mut dyn AnnotationSink,
        tap: &mut dyn PacketTap,
    ) -> Result<RunReport, ConnectionError>
    where
        I: IntoIterator<Item = Sample>,
    {
        let expected = self.input_tag();
        let Bottom::Logic(logic) = &mut self.bottom else {
            return Err(ConnectionError::WrongInput {
                expected,
                got: LOGIC,
            });
        };

        logic.reset();
        let started = logic.start(&self.metadata);
        for stage in self.stages.iter_mut() {
            stage.reset();
            stage.start(&self.metadata);
        }

        if started {
            let mut waiter = EdgeWaiter::new(source.into_iter());
            logic.run(&mut waiter, Downstream::new(&mut self.stages, sink, tap));
        }
        Ok(self.report())
    }

    /// Feed packets of type `P` to a stack built with [`DecoderStack::packets`]
    pub fn run_packets<P, I>(
        &mut self,
        packets: I,
        sink: &mut dyn AnnotationSink,
    ) -> Result<RunReport, ConnectionError>
    where
        P: 'static,
        I: IntoIterator<Item = Spanned<P>>,
    {
        self.run_packets_with_tap(packets, sink, &mut NoTap)
    }

    pub fn run_packets_with_tap<P, I>(
        &mut self,
        packets: I,
        sink: &mut dyn AnnotationSink,
        tap: &mut dyn PacketTap,
    ) -> Result<RunReport, ConnectionError>
    where
        P: 'static,
        I: IntoIterator<Item = Spanned<P>>,
    {
        let given = PortSchema::new::<P>(self.input_tag());
        match &self.bottom {
            Bottom::Packets(schema) if schema.type_id == given.type_id => {}
            Bottom::Packets(schema) => {
                return Err(ConnectionError::WrongInput {
                    expected: schema.type_name,
                    got: given.type_name,
                });
            }
            Bottom::Logic(_) => {
                return Err(ConnectionError::WrongInput {
                    expected: LOGIC,
                    got: given.type_name,
                });
            }
        }

        for stage in self.stages.iter_mut() {
            stage.reset();
            stage.start(&self.metadata);
        }

        let mut downstream = Downstream::new(&mut self.stages, sink, tap);
        for packet in packets {
            let packet = packet.map(|value| Box::new(value) as Box<dyn Any>);
            if let Err(e) = downstream.forward(packet) {
                error!("Packet feed stopped: {}", e);
                break;
            }
        }
        Ok(self.report())
    }

    /// Status of every stage from the last run
    pub fn report(&self) -> RunReport {
        let bottom = match &self.bottom {
            Bottom::Logic(logic) => Some(logic.report()),
            Bottom::Packets(_) => None,
        };
        RunReport {
            stages: bottom
                .into_iter()
                .chain(self.stages.iter().map(|stage| stage.report()))
                .collect(),
        }
    }
}
