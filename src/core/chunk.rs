//! The unit of data moved between stages.

use bytes::Bytes;

/// An immutable block of payload bytes tagged with its position in the stream.
///
/// Sequence numbers are strictly increasing within one stream; channels reject
/// chunks that would break that order. A chunk is owned by exactly one place
/// at a time: the stage holding it or the channel slot it sits in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    payload: Bytes,
    sequence: u64,
    is_last: bool,
}

impl Chunk {
    /// Create a chunk at the given sequence position
    pub fn new(payload: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            is_last: false,
        }
    }

    /// Create a chunk that is known to close its stream
    pub fn last(payload: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            is_last: true,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the chunk, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Replace the payload while keeping the position in the stream.
    ///
    /// Used by one-to-one transforms, whose outputs inherit the input ordering.
    pub fn map_payload<F>(self, f: F) -> Self
    where
        F: FnOnce(Bytes) -> Bytes,
    {
        Self {
            payload: f(self.payload),
            sequence: self.sequence,
            is_last: self.is_last,
        }
    }
}

/// Stamps outgoing payloads with consecutive sequence numbers.
///
/// Every stage that creates chunks rather than forwarding them owns one.
#[derive(Debug, Default, Clone)]
pub struct Sequencer {
    next: u64,
}

impl Sequencer {
    /// Create a sequencer starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a payload in the next chunk of the stream
    pub fn next(&mut self, payload: impl Into<Bytes>) -> Chunk {
        let chunk = Chunk::new(payload, self.next);
        self.next += 1;
        chunk
    }

    /// Wrap a payload in the final chunk of the stream
    pub fn last(&mut self, payload: impl Into<Bytes>) -> Chunk {
        let chunk = Chunk::last(payload, self.next);
        self.next += 1;
        chunk
    }

    /// Number of chunks stamped so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencer_is_strictly_increasing() {
        let mut seq = Sequencer::new();
        let a = seq.next("a");
        let b = seq.next("b");
        let c = seq.last("c");

        assert_eq!((a.sequence(), b.sequence(), c.sequence()), (0, 1, 2));
        assert!(!b.is_last());
        assert!(c.is_last());
        assert_eq!(seq.issued(), 3);
    }

    #[test]
    fn test_map_payload_keeps_position() {
        let chunk = Chunk::last("abc", 7).map_payload(|p| Bytes::from(p.to_ascii_uppercase()));
        assert_eq!(chunk.payload(), &Bytes::from_static(b"ABC"));
        assert_eq!(chunk.sequence(), 7);
        assert!(chunk.is_last());
    }
}
