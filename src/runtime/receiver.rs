//! Sample cursor with one sample of lookahead
//!
//! [`SampleCursor`] wraps any sample iterator and provides `recv` and
//! `peek`. End of stream is cached so subsequent calls keep returning
//! [`WorkError::EndOfStream`].

use super::errors::{WorkError, WorkResult};
use super::sample::Sample;

/// A sample source with a one sample lookahead.
pub struct SampleCursor<'a> {
    source: Box<dyn Iterator<Item = Sample> + 'a>,
    peeked: Option<Sample>,
    eos: bool,
}

impl<'a> SampleCursor<'a> {
    /// Wrap a sample iterator
    pub fn new<I>(source: I) -> Self
    where
        I: Iterator<Item = Sample> + 'a,
    {
        Self {
            source: Box::new(source),
            peeked: None,
            eos: false,
        }
    }

    /// Receive the next sample, the peeked one first.
    ///
    /// Returns `Err(WorkError::EndOfStream)` once the source is exhausted.
    pub fn recv(&mut self) -> WorkResult<Sample> {
        if let Some(sample) = self.peeked.take() {
            return Ok(sample);
        }
        if self.eos {
            return Err(WorkError::EndOfStream);
        }
        match self.source.next() {
            Some(sample) => Ok(sample),
            None => {
                self.eos = true;
                tracing::debug!("SampleCursor::recv() - end of stream");
                Err(WorkError::EndOfStream)
            }
        }
    }

    /// Peek at the next sample without consuming it.
    pub fn peek(&mut self) -> WorkResult<&Sample> {
        if self.peeked.is_none() {
            let sample = self.recv()?;
            self.peeked = Some(sample);
        }
        self.peeked.as_ref().ok_or(WorkError::EndOfStream)
    }
}
