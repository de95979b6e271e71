//! Annotation records and sinks
//!
//! Annotations are the human-readable output of a decoder: a sample range,
//! a class index from the decoder's declared table, and candidate texts
//! from most to least detailed. The host picks the first text that fits.

use super::sample::SampleRange;

/// One entry of a decoder's annotation class table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationClass {
    pub id: &'static str,
    pub description: &'static str,
}

impl AnnotationClass {
    pub const fn new(id: &'static str, description: &'static str) -> Self {
        Self { id, description }
    }
}

/// Display grouping of annotation classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRow {
    pub id: &'static str,
    pub description: &'static str,
    /// Indices into the class table
    pub classes: &'static [usize],
}

impl AnnotationRow {
    pub const fn new(id: &'static str, description: &'static str, classes: &'static [usize]) -> Self {
        Self {
            id,
            description,
            classes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub range: SampleRange,
    pub class: usize,
    /// Longest first
    pub texts: Vec<String>,
}

impl Annotation {
    /// The most detailed text
    pub fn text(&self) -> &str {
        self.texts.first().map(String::as_str).unwrap_or("")
    }
}

/// Receiver of every annotation produced by a stack
pub trait AnnotationSink {
    fn put(&mut self, stage: &str, annotation: Annotation);
}

impl<F> AnnotationSink for F
where
    F: FnMut(&str, Annotation),
{
    fn put(&mut self, stage: &str, annotation: Annotation) {
        self(stage, annotation)
    }
}

/// Sink that keeps everything in order of emission
#[derive(Debug, Default)]
pub struct AnnotationLog {
    entries: Vec<(String, Annotation)>,
}

impl AnnotationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(String, Annotation)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Annotations of one stage
    pub fn stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.entries
            .iter()
            .filter(move |(name, _)| name == stage)
            .map(|(_, annotation)| annotation)
    }

    /// Annotations of one stage and class
    pub fn class<'a>(
        &'a self,
        stage: &'a str,
        class: usize,
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.stage(stage).filter(move |a| a.class == class)
    }

    /// Whether any annotation of `stage` has a text containing `needle`
    pub fn contains_text(&self, stage: &str, needle: &str) -> bool {
        self.stage(stage)
            .any(|a| a.texts.iter().any(|text| text.contains(needle)))
    }
}

impl AnnotationSink for AnnotationLog {
    fn put(&mut self, stage: &str, annotation: Annotation) {
        self.entries.push((stage.to_string(), annotation));
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardAnnotations;

impl AnnotationSink for DiscardAnnotations {
    fn put(&mut self, _stage: &str, _annotation: Annotation) {}
}
