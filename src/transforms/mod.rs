//! Transform implementations for the chunkweld library.
//!
//! Transforms sit between a source and a sink. The ones that keep state across
//! calls bound it: [`Utf8Transform`] holds at most one incomplete character,
//! [`LineSplitTransform`] fails instead of growing past its line limit.

pub mod codec;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::core::{Chunk, Error, Result, Sequencer, Transform};

pub use codec::{gzip_compress, gzip_decompress, Codec, CodecTransform, GzipDecoder, GzipEncoder};

/// A transform that maps each payload through a function.
///
/// Output chunks keep the sequence number of their input.
pub struct MapTransform<F> {
    f: F,
}

impl<F> MapTransform<F>
where
    F: FnMut(Bytes) -> Bytes + Send,
{
    /// Create a new map transform
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Transform for MapTransform<F>
where
    F: FnMut(Bytes) -> Bytes + Send,
{
    async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>> {
        Ok(vec![chunk.map_payload(&mut self.f)])
    }
}

fn to_uppercase(payload: Bytes) -> Bytes {
    Bytes::from(String::from_utf8_lossy(&payload).to_uppercase())
}

/// A transform that upper-cases text payloads.
///
/// Pair it with [`Utf8Transform`] upstream when chunk boundaries may split
/// multi-byte characters.
pub fn uppercase() -> MapTransform<fn(Bytes) -> Bytes> {
    MapTransform::new(to_uppercase as fn(Bytes) -> Bytes)
}

/// Realigns a byte stream so that no chunk ends inside a UTF-8 character.
///
/// An incomplete trailing sequence (at most three bytes) is carried into the
/// next chunk. Invalid sequences are replaced with U+FFFD.
#[derive(Default)]
pub struct Utf8Transform {
    carry: Vec<u8>,
    seq: Sequencer,
}

impl Utf8Transform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held back waiting for the rest of a character
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Start of the trailing incomplete character in `data`, or `data.len()`.
fn complete_prefix_len(data: &[u8]) -> usize {
    let mut pos = 0;
    loop {
        match std::str::from_utf8(&data[pos..]) {
            Ok(_) => return data.len(),
            Err(e) => match e.error_len() {
                None => return pos + e.valid_up_to(),
                Some(invalid) => pos += e.valid_up_to() + invalid,
            },
        }
    }
}

#[async_trait]
impl Transform for Utf8Transform {
    async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(chunk.payload());

        let split = complete_prefix_len(&data);
        self.carry = data.split_off(split);
        if data.is_empty() {
            return Ok(vec![]);
        }
        let text = String::from_utf8_lossy(&data).into_owned();
        Ok(vec![self.seq.next(text)])
    }

    async fn flush(&mut self) -> Result<Vec<Chunk>> {
        if self.carry.is_empty() {
            return Ok(vec![]);
        }
        let rest = std::mem::take(&mut self.carry);
        Ok(vec![self.seq.next(String::from_utf8_lossy(&rest).into_owned())])
    }
}

/// Splits a byte stream into one chunk per `\n`-terminated line.
///
/// Line terminators are stripped. A line longer than the configured limit
/// fails the stage with a protocol violation.
pub struct LineSplitTransform {
    buffer: BytesMut,
    max_line_len: usize,
    seq: Sequencer,
}

impl LineSplitTransform {
    pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_max_line_len(Self::DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_len,
            seq: Sequencer::new(),
        }
    }
}

impl Default for LineSplitTransform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transform for LineSplitTransform {
    async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>> {
        self.buffer.extend_from_slice(chunk.payload());

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(self.seq.next(line.freeze()));
        }

        if self.buffer.len() > self.max_line_len {
            return Err(Error::protocol(format!(
                "line exceeds {} bytes without a terminator",
                self.max_line_len
            )));
        }
        Ok(lines)
    }

    async fn flush(&mut self) -> Result<Vec<Chunk>> {
        if self.buffer.is_empty() {
            return Ok(vec![]);
        }
        let rest = self.buffer.split().freeze();
        Ok(vec![self.seq.next(rest)])
    }
}
