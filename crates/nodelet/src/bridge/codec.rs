//! Newline-delimited JSON codecs for worker stdio.
//!
//! Uses LinesCodec for framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite (child pipes, sockets, duplex streams).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest line accepted from a worker (10 MiB).
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("record exceeds {max_bytes} bytes")]
    LineTooLong { max_bytes: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Codec that writes one compact JSON document per line.
///
/// serde_json never emits a raw newline inside a compact document, so the
/// trailing `\n` is the only record separator on the wire.
pub struct NdjsonCodec<T> {
    lines: LinesCodec,
    max_line_bytes: usize,
    _phantom: PhantomData<T>,
}

impl<T> Default for NdjsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NdjsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
            _phantom: PhantomData,
        }
    }

    fn lines_error(&self, err: LinesCodecError) -> CodecError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong {
                max_bytes: self.max_line_bytes,
            },
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }

    fn parse(line: &str) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(line).map_err(CodecError::Decode)
    }
}

impl<T: DeserializeOwned> Decoder for NdjsonCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Self::parse(&line).map(Some),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.lines_error(e)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Self::parse(&line).map(Some),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.lines_error(e)),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for NdjsonCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(CodecError::Encode)?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding record");
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// One line of raw worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Line(String),
    /// A line longer than the limit was discarded up to its terminator.
    Oversized,
}

/// Line decoder for worker stdout that survives oversized lines.
///
/// `LinesCodec` reports an over-long line as an error, which ends a
/// `FramedRead` stream. Worker output is free-form, so an oversized line is
/// surfaced as [`OutputLine::Oversized`] and reading continues.
pub struct OutputLineCodec {
    lines: LinesCodec,
}

impl Default for OutputLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLineCodec {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
        }
    }
}

impl Decoder for OutputLineCodec {
    type Item = OutputLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode(src) {
            Ok(line) => Ok(line.map(OutputLine::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(OutputLine::Oversized)),
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode_eof(src) {
            Ok(line) => Ok(line.map(OutputLine::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(OutputLine::Oversized)),
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}
