//! Decoder output ports
//!
//! [`Output`] is the only way a decoder talks to the outside world: it
//! validates annotations against the decoder's declared class table before
//! handing them to the [`AnnotationSink`], and forwards packets synchronously
//! through the rest of the stack. Packets travel type-erased between stages
//! and are downcast by the receiving stage.

use super::annotation::{Annotation, AnnotationClass, AnnotationSink};
use super::errors::{WorkError, WorkResult};
use super::pipeline::PacketStage;
use super::sample::{SampleRange, Spanned};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use tracing::trace;

/// A packet on its way between stages
pub type AnyPacket = Spanned<Box<dyn Any>>;

/// Type identity of a port: the tag decoders declare plus the Rust type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSchema {
    pub tag: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl PortSchema {
    pub fn new<T: 'static>(tag: &'static str) -> Self {
        Self {
            tag,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Short type name for messages
    pub fn short_type_name(&self) -> &'static str {
        self.type_name.rsplit("::").next().unwrap_or(self.type_name)
    }

    pub fn accepts(&self, other: &PortSchema) -> bool {
        self.tag == other.tag && self.type_id == other.type_id
    }
}

/// Per-stage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub annotations: u64,
}

/// Receiver of the top stage's packets
pub trait PacketTap {
    fn tap(&mut self, packet: AnyPacket);
}

impl<F> PacketTap for F
where
    F: FnMut(AnyPacket),
{
    fn tap(&mut self, packet: AnyPacket) {
        self(packet)
    }
}

/// Tap that drops every packet
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTap;

impl PacketTap for NoTap {
    fn tap(&mut self, _packet: AnyPacket) {}
}

/// Tap that keeps packets of one type
#[derive(Debug)]
pub struct PacketCollector<T> {
    packets: Vec<Spanned<T>>,
    foreign: usize,
}

impl<T: 'static> PacketCollector<T> {
    pub fn new() -> Self {
        Self {
            packets: Vec::new(),
            foreign: 0,
        }
    }

    pub fn packets(&self) -> &[Spanned<T>] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<Spanned<T>> {
        self.packets
    }

    /// Number of tapped packets that were not a `T`
    pub fn foreign(&self) -> usize {
        self.foreign
    }

    /// Just the values
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.packets.iter().map(|p| &p.value)
    }
}

impl<T: 'static> Default for PacketCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> PacketTap for PacketCollector<T> {
    fn tap(&mut self, packet: AnyPacket) {
        match packet.value.downcast::<T>() {
            Ok(value) => self.packets.push(Spanned::new(packet.range, *value)),
            Err(_) => self.foreign += 1,
        }
    }
}

/// The stages after the current one, plus where their output ends up
pub struct Downstream<'a> {
    pub(crate) stages: &'a mut [Box<dyn PacketStage>],
    pub(crate) sink: &'a mut dyn AnnotationSink,
    pub(crate) tap: &'a mut dyn PacketTap,
}

impl<'a> Downstream<'a> {
    pub(crate) fn new(
        stages: &'a mut [Box<dyn PacketStage>],
        sink: &'a mut dyn AnnotationSink,
        tap: &'a mut dyn PacketTap,
    ) -> Self {
        Self { stages, sink, tap }
    }

    pub(crate) fn reborrow(&mut self) -> Downstream<'_> {
        Downstream {
            stages: &mut *self.stages,
            sink: &mut *self.sink,
            tap: &mut *self.tap,
        }
    }

    /// Process a packet through every remaining stage before returning
    pub(crate) fn forward(&mut self, packet: AnyPacket) -> WorkResult<()> {
        match self.stages.split_first_mut() {
            Some((next, rest)) => next.push(
                packet,
                Downstream {
                    stages: rest,
                    sink: &mut *self.sink,
                    tap: &mut *self.tap,
                },
            ),
            None => {
                self.tap.tap(packet);
                Ok(())
            }
        }
    }
}

/// Output handle passed to a decoder for one call
pub struct Output<'a, P> {
    stage: &'a str,
    classes: &'static [AnnotationClass],
    stats: &'a mut StageStats,
    downstream: Downstream<'a>,
    _packet: PhantomData<fn(P)>,
}

impl<'a, P: 'static> Output<'a, P> {
    pub(crate) fn new(
        stage: &'a str,
        classes: &'static [AnnotationClass],
        stats: &'a mut StageStats,
        downstream: Downstream<'a>,
    ) -> Self {
        Self {
            stage,
            classes,
            stats,
            downstream,
            _packet: PhantomData,
        }
    }

    /// Name of the stage this output belongs to
    pub fn stage(&self) -> &str {
        self.stage
    }

    /// Emit an annotation. `class` must index the decoder's class table and
    /// `texts` must be non-empty and ordered longest first.
    pub fn annotate<I, T>(&mut self, range: SampleRange, class: usize, texts: I) -> WorkResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        if class >= self.classes.len() {
            return Err(WorkError::UndeclaredClass {
                stage: self.stage.to_string(),
                class,
            });
        }
        let texts: Vec<String> = texts.into_iter().map(Into::into).collect();
        if texts.is_empty() {
            return Err(WorkError::EmptyAnnotation {
                stage: self.stage.to_string(),
            });
        }
        if texts
            .windows(2)
            .any(|pair| pair[0].chars().count() < pair[1].chars().count())
        {
            return Err(WorkError::TextOrder {
                stage: self.stage.to_string(),
                texts,
            });
        }
        trace!("[{}] {} {}: {}", self.stage, range, self.classes[class].id, texts[0]);
        self.stats.annotations += 1;
        self.downstream.sink.put(
            self.stage,
            Annotation {
                range,
                class,
                texts,
            },
        );
        Ok(())
    }

    /// Hand a packet to the next stage; returns once the whole rest of the
    /// stack has processed it
    pub fn packet(&mut self, range: SampleRange, value: P) -> WorkResult<()> {
        self.stats.packets_out += 1;
        self.downstream
            .forward(Spanned::new(range, Box::new(value) as Box<dyn Any>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::annotation::AnnotationLog;

    const CLASSES: &[AnnotationClass] = &[
        AnnotationClass::new("data", "Data"),
        AnnotationClass::new("warning", "Warning"),
    ];

    #[test]
    fn test_annotate_validates_class_and_order() {
        let mut log = AnnotationLog::new();
        let mut tap = NoTap;
        let mut stats = StageStats::default();
        let mut out: Output<'_, u8> = Output::new(
            "demo",
            CLASSES,
            &mut stats,
            Downstream::new(&mut [], &mut log, &mut tap),
        );
        let range = SampleRange::new(0, 10);

        out.annotate(range, 0, ["Data: 0x41", "0x41"]).unwrap();
        assert!(matches!(
            out.annotate(range, 2, ["x"]),
            Err(WorkError::UndeclaredClass { class: 2, .. })
        ));
        assert!(matches!(
            out.annotate(range, 1, Vec::<String>::new()),
            Err(WorkError::EmptyAnnotation { .. })
        ));
        assert!(matches!(
            out.annotate(range, 1, ["W", "Warning"]),
            Err(WorkError::TextOrder { .. })
        ));
        drop(out);

        assert_eq!(stats.annotations, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].0, "demo");
    }

    #[test]
    fn test_packet_reaches_tap_when_no_stage_follows() {
        let mut log = AnnotationLog::new();
        let mut collector = PacketCollector::<u8>::new();
        let mut stats = StageStats::default();
        {
            let mut out: Output<'_, u8> = Output::new(
                "demo",
                CLASSES,
                &mut stats,
                Downstream::new(&mut [], &mut log, &mut collector),
            );
            out.packet(SampleRange::new(5, 15), 0x41).unwrap();
        }
        assert_eq!(stats.packets_out, 1);
        assert_eq!(collector.packets()[0], Spanned::new(SampleRange::new(5, 15), 0x41));
    }

    #[test]
    fn test_collector_counts_foreign_packets() {
        let mut collector = PacketCollector::<u16>::new();
        collector.tap(Spanned::new(SampleRange::point(0), Box::new(1u16) as Box<dyn Any>));
        collector.tap(Spanned::new(SampleRange::point(1), Box::new("x") as Box<dyn Any>));
        assert_eq!(collector.packets().len(), 1);
        assert_eq!(collector.foreign(), 1);
    }

    #[test]
    fn test_port_schema_accepts_same_tag_and_type() {
        let a = PortSchema::new::<u8>("bytes");
        assert!(a.accepts(&PortSchema::new::<u8>("bytes")));
        assert!(!a.accepts(&PortSchema::new::<u16>("bytes")));
        assert!(!a.accepts(&PortSchema::new::<u8>("bits")));
        assert_eq!(PortSchema::new::<Vec<u8>>("x").short_type_name(), "Vec<u8>");
    }
}
