//! Image reassembly: one in-flight transfer, chunks placed by index into a
//! fixed-size buffer, emitted on the end marker even if incomplete.

use log::{debug, warn};

use crate::model::CapturedImage;
use crate::wire::CHUNK_SIZE;

/// Start frames declaring more than this are refused.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Transfer in progress. Only ever one; a new start replaces it.
struct ImageTransfer {
    node_id: u16,
    image_id: u16,
    total_chunks: u16,
    /// Chunk messages that landed in the buffer. Duplicates count again.
    received_chunks: u32,
    buffer: Vec<u8>,
}

impl ImageTransfer {
    fn is_complete(&self) -> bool {
        self.received_chunks >= u32::from(self.total_chunks)
    }
}

/// Snapshot of the in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub node_id: u16,
    pub image_id: u16,
    pub received_chunks: u32,
    pub total_chunks: u16,
    pub total_bytes: usize,
}

impl TransferProgress {
    /// 0.0..=1.0 (can exceed 1.0 when chunks were delivered twice).
    pub fn fraction(&self) -> f32 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.received_chunks as f32 / f32::from(self.total_chunks)
    }
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Copied into the buffer (possibly clamped at the end).
    Stored,
    /// No transfer in flight; dropped.
    NoTransfer,
    /// Offset past the end of the buffer; dropped, not counted.
    OutOfBounds,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("image of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

pub struct ImageReassembler {
    current: Option<ImageTransfer>,
    chunk_size: usize,
    max_image_bytes: usize,
}

impl ImageReassembler {
    pub fn new(chunk_size: usize, max_image_bytes: usize) -> Self {
        Self {
            current: None,
            chunk_size,
            max_image_bytes,
        }
    }

    /// Begin a transfer, discarding any incomplete one.
    pub fn start(
        &mut self,
        node_id: u16,
        image_id: u16,
        total_size: u32,
        total_chunks: u16,
    ) -> Result<(), ReassemblyError> {
        if let Some(old) = self.current.take() {
            warn!(
                "image {} from node {} superseded after {}/{} chunks, discarding",
                old.image_id, old.node_id, old.received_chunks, old.total_chunks
            );
        }
        let size = total_size as usize;
        if size > self.max_image_bytes {
            return Err(ReassemblyError::TooLarge {
                size,
                limit: self.max_image_bytes,
            });
        }
        debug!(
            "image start: node={} id={} size={} chunks={}",
            node_id, image_id, size, total_chunks
        );
        self.current = Some(ImageTransfer {
            node_id,
            image_id,
            total_chunks,
            received_chunks: 0,
            buffer: vec![0u8; size],
        });
        Ok(())
    }

    /// Copy a chunk to `index * chunk_size`, clamped to the buffer end.
    pub fn chunk(&mut self, index: u16, data: &[u8]) -> ChunkOutcome {
        let Some(transfer) = self.current.as_mut() else {
            return ChunkOutcome::NoTransfer;
        };
        let offset = usize::from(index) * self.chunk_size;
        let len = transfer.buffer.len();
        if offset >= len || data.is_empty() {
            return ChunkOutcome::OutOfBounds;
        }
        let n = data.len().min(len - offset);
        transfer.buffer[offset..offset + n].copy_from_slice(&data[..n]);
        transfer.received_chunks += 1;
        ChunkOutcome::Stored
    }

    /// Finish the in-flight transfer. Emits the buffer as filled so far if any
    /// chunk arrived; unreceived regions stay zero. Always clears the slot.
    pub fn end(&mut self, image_id: Option<u16>, received_at: u64) -> Option<CapturedImage> {
        let transfer = self.current.take()?;
        if let Some(id) = image_id {
            if id != transfer.image_id {
                debug!(
                    "image end names id {} but transfer in flight is {}",
                    id, transfer.image_id
                );
            }
        }
        if transfer.received_chunks == 0 {
            debug!(
                "image {} from node {} ended with no chunks, dropped",
                transfer.image_id, transfer.node_id
            );
            return None;
        }
        if !transfer.is_complete() {
            warn!(
                "image {} from node {} incomplete ({}/{} chunks), emitting partial",
                transfer.image_id, transfer.node_id, transfer.received_chunks, transfer.total_chunks
            );
        }
        Some(CapturedImage {
            node_id: transfer.node_id,
            image_id: transfer.image_id,
            payload: transfer.buffer,
            received_at,
        })
    }

    /// Drop the in-flight transfer. Returns whether there was one.
    pub fn abort(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.current.as_ref().map(|t| TransferProgress {
            node_id: t.node_id,
            image_id: t.image_id,
            received_chunks: t.received_chunks,
            total_chunks: t.total_chunks,
            total_bytes: t.buffer.len(),
        })
    }
}

impl Default for ImageReassembler {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, DEFAULT_MAX_IMAGE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    fn image_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn chunks_of(data: &[u8]) -> Vec<(u16, Vec<u8>)> {
        data.chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, c)| (i as u16, c.to_vec()))
            .collect()
    }

    #[test]
    fn single_chunk_scenario() {
        let mut r = ImageReassembler::default();
        r.start(2, 5, 10, 1).unwrap();
        let data: Vec<u8> = (1..=10).collect();
        assert_eq!(r.chunk(0, &data), ChunkOutcome::Stored);
        let img = r.end(None, 42).unwrap();
        assert_eq!(img.node_id, 2);
        assert_eq!(img.image_id, 5);
        assert_eq!(img.payload, data);
        assert_eq!(img.received_at, 42);
        assert!(!r.is_active());
    }

    #[test]
    fn in_order_equals_concatenation() {
        let data = image_bytes(1_000);
        let chunks = chunks_of(&data);
        let mut r = ImageReassembler::default();
        r.start(1, 1, data.len() as u32, chunks.len() as u16).unwrap();
        for (i, c) in &chunks {
            r.chunk(*i, c);
        }
        assert_eq!(r.end(None, 0).unwrap().payload, data);
    }

    #[test]
    fn reverse_and_shuffled_order() {
        let data = image_bytes(5_000);
        let mut chunks = chunks_of(&data);

        chunks.reverse();
        let mut r = ImageReassembler::default();
        r.start(1, 1, data.len() as u32, chunks.len() as u16).unwrap();
        for (i, c) in &chunks {
            r.chunk(*i, c);
        }
        assert_eq!(r.end(None, 0).unwrap().payload, data);

        chunks.shuffle(&mut thread_rng());
        r.start(1, 2, data.len() as u32, chunks.len() as u16).unwrap();
        for (i, c) in &chunks {
            r.chunk(*i, c);
        }
        assert_eq!(r.end(None, 0).unwrap().payload, data);
    }

    #[test]
    fn end_without_chunks_emits_nothing() {
        let mut r = ImageReassembler::default();
        r.start(1, 1, 100, 1).unwrap();
        assert!(r.end(None, 0).is_none());
        assert!(!r.is_active());

        // Even a transfer that declared zero chunks.
        r.start(1, 2, 0, 0).unwrap();
        assert!(r.end(None, 0).is_none());
    }

    #[test]
    fn end_without_start_is_noop() {
        let mut r = ImageReassembler::default();
        assert!(r.end(Some(3), 0).is_none());
        assert_eq!(r.chunk(0, &[1, 2]), ChunkOutcome::NoTransfer);
    }

    #[test]
    fn partial_image_zero_filled_to_declared_size() {
        let data = image_bytes(600);
        let chunks = chunks_of(&data);
        assert_eq!(chunks.len(), 3);
        let mut r = ImageReassembler::default();
        r.start(4, 9, 600, 3).unwrap();
        r.chunk(chunks[1].0, &chunks[1].1);
        let img = r.end(None, 0).unwrap();
        assert_eq!(img.payload.len(), 600);
        assert!(img.payload[..240].iter().all(|&b| b == 0));
        assert_eq!(&img.payload[240..480], &data[240..480]);
        assert!(img.payload[480..].iter().all(|&b| b == 0));
    }

    #[test]
    fn new_start_discards_prior_transfer() {
        let mut r = ImageReassembler::default();
        r.start(1, 1, 480, 2).unwrap();
        r.chunk(0, &[0xAA; 240]);
        r.start(2, 7, 10, 1).unwrap();
        r.chunk(0, &[0x55; 10]);
        let img = r.end(None, 0).unwrap();
        assert_eq!((img.node_id, img.image_id), (2, 7));
        assert_eq!(img.payload, vec![0x55; 10]);
    }

    #[test]
    fn chunk_clamped_at_buffer_end() {
        let mut r = ImageReassembler::default();
        r.start(1, 1, 250, 2).unwrap();
        assert_eq!(r.chunk(1, &[7u8; 240]), ChunkOutcome::Stored);
        assert_eq!(r.chunk(2, &[7u8; 240]), ChunkOutcome::OutOfBounds);
        let p = r.progress().unwrap();
        assert_eq!(p.received_chunks, 1);
        let img = r.end(None, 0).unwrap();
        assert_eq!(img.payload.len(), 250);
        assert_eq!(&img.payload[240..], &[7u8; 10]);
    }

    #[test]
    fn duplicate_chunks_inflate_counter() {
        // Counter counts messages, not unique indices: two copies of chunk 0
        // satisfy a two-chunk transfer.
        let mut r = ImageReassembler::default();
        r.start(1, 1, 480, 2).unwrap();
        r.chunk(0, &[1u8; 240]);
        r.chunk(0, &[1u8; 240]);
        let p = r.progress().unwrap();
        assert_eq!(p.received_chunks, 2);
        assert!((p.fraction() - 1.0).abs() < f32::EPSILON);
        let img = r.end(None, 0).unwrap();
        assert!(img.payload[240..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_start_refused_and_prior_dropped() {
        let mut r = ImageReassembler::new(CHUNK_SIZE, 1_000);
        r.start(1, 1, 100, 1).unwrap();
        assert_eq!(
            r.start(1, 2, 1_001, 5),
            Err(ReassemblyError::TooLarge {
                size: 1_001,
                limit: 1_000
            })
        );
        assert!(!r.is_active());
        assert_eq!(r.chunk(0, &[1]), ChunkOutcome::NoTransfer);
    }

    #[test]
    fn abort_clears() {
        let mut r = ImageReassembler::default();
        assert!(!r.abort());
        r.start(1, 1, 10, 1).unwrap();
        assert!(r.abort());
        assert!(r.progress().is_none());
    }
}
