//! Shared-context zlib-stream inflation
//!
//! When the gateway negotiates `zlib-stream` transport compression, every
//! binary chunk belongs to one persistent deflate stream. A chunk is the
//! terminal fragment of a message iff it ends with the zlib sync-flush
//! marker `00 00 FF FF`; only then can the buffered fragments be inflated
//! and decoded.

use crate::error::GatewayError;
use flate2::{Decompress, FlushDecompress, Status};

/// Zlib sync-flush marker that terminates a gateway message
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Inflation output is grown in steps of this size
const INFLATE_CHUNK: usize = 16 * 1024;

/// Persistent inflater for one shard's inbound stream
pub struct ZlibStreamInflator {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl ZlibStreamInflator {
    /// Create an inflater with a fresh deflate context
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary chunk from the socket
    ///
    /// Returns the inflated message once the terminal fragment arrives,
    /// `None` while the message is still buffering.
    ///
    /// # Errors
    /// Returns an error if the accumulated data is not valid deflate
    /// stream data; the connection should be torn down in that case since
    /// the shared context is corrupt.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, GatewayError> {
        self.buffer.extend_from_slice(chunk);

        if !chunk.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut inflated = Vec::with_capacity(self.buffer.len() * 3);
        let mut consumed = 0usize;

        while consumed < self.buffer.len() {
            inflated.reserve(INFLATE_CHUNK);

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&self.buffer[consumed..], &mut inflated, FlushDecompress::Sync)
                .map_err(|e| GatewayError::Inflate(e.to_string()))?;

            consumed += (self.decompress.total_in() - in_before) as usize;
            let produced = (self.decompress.total_out() - out_before) as usize;

            match status {
                Status::StreamEnd => break,
                // No forward progress on either side means the input is done.
                Status::Ok | Status::BufError if produced == 0 && consumed >= self.buffer.len() => {
                    break
                }
                Status::Ok | Status::BufError => {}
            }
        }

        self.buffer.clear();
        Ok(Some(inflated))
    }

    /// Bytes currently buffered awaiting a terminal fragment
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ZlibStreamInflator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZlibStreamInflator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibStreamInflator")
            .field("pending", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Deflate `messages` onto one shared compression context, returning
    /// one sync-flushed chunk per message (as the gateway sends them).
    fn deflate_stream(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compress = Compress::new(Compression::default(), true);
        let mut chunks = Vec::new();
        for message in messages {
            let mut out = Vec::with_capacity(message.len() + 64);
            let in_before = compress.total_in();
            while (compress.total_in() - in_before) < message.len() as u64 {
                let written = (compress.total_in() - in_before) as usize;
                compress
                    .compress_vec(&message[written..], &mut out, FlushCompress::Sync)
                    .unwrap();
                out.reserve(64);
            }
            // Drive the flush until the sync marker lands in the output.
            while !out.ends_with(&ZLIB_SUFFIX) {
                out.reserve(64);
                compress
                    .compress_vec(&[], &mut out, FlushCompress::Sync)
                    .unwrap();
            }
            chunks.push(out);
        }
        chunks
    }

    #[test]
    fn test_single_message_roundtrip() {
        let chunks = deflate_stream(&[br#"{"op":10,"d":{"heartbeat_interval":41250}}"#]);
        let mut inflator = ZlibStreamInflator::new();

        let out = inflator.push(&chunks[0]).unwrap().unwrap();
        assert_eq!(out, br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
        assert_eq!(inflator.pending_len(), 0);
    }

    #[test]
    fn test_partial_chunks_buffer_until_suffix() {
        let chunks = deflate_stream(&[b"hello gateway" as &[u8]]);
        let payload = &chunks[0];
        let (left, right) = payload.split_at(payload.len() / 2);

        let mut inflator = ZlibStreamInflator::new();
        // First half lacks the suffix: nothing decoded yet.
        assert!(inflator.push(left).unwrap().is_none());
        assert!(inflator.pending_len() > 0);

        let out = inflator.push(right).unwrap().unwrap();
        assert_eq!(out, b"hello gateway");
    }

    #[test]
    fn test_shared_context_across_messages() {
        // Two messages on the same deflate context; the second depends on
        // the dictionary built by the first.
        let chunks = deflate_stream(&[
            b"the quick brown fox jumps over the lazy dog" as &[u8],
            b"the quick brown fox jumps again" as &[u8],
        ]);

        let mut inflator = ZlibStreamInflator::new();
        let first = inflator.push(&chunks[0]).unwrap().unwrap();
        assert_eq!(first, b"the quick brown fox jumps over the lazy dog");

        let second = inflator.push(&chunks[1]).unwrap().unwrap();
        assert_eq!(second, b"the quick brown fox jumps again");
    }

    #[test]
    fn test_garbage_input_errors() {
        let mut inflator = ZlibStreamInflator::new();
        let garbage = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00, 0xFF, 0xFF];
        assert!(inflator.push(&garbage).is_err());
    }
}
