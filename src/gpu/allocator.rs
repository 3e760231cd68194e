use tracing::debug;

use crate::foundation::error::{OitError, OitResult};
use crate::foundation::metrics::MemoryMetrics;
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::caps::DeviceCaps;

/// Description of one storage buffer a backend needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRequest {
    pub label: &'static str,
    pub words: usize,
    /// Initial value of every word.
    pub fill: u32,
}

impl BufferRequest {
    pub const fn new(label: &'static str, words: usize, fill: u32) -> Self {
        Self { label, words, fill }
    }

    pub fn bytes(&self) -> u64 {
        (self.words as u64).saturating_mul(4)
    }
}

/// Creates and releases storage buffers and reports both to the metrics sink.
///
/// Backends validate a whole buffer set with [`ResourceAllocator::validate`] before creating any
/// buffer, so a rejected request never leaves a half-built set behind.
pub struct ResourceAllocator<'m> {
    max_buffer_bytes: u64,
    metrics: &'m mut MemoryMetrics,
}

impl<'m> ResourceAllocator<'m> {
    pub fn new(caps: &DeviceCaps, metrics: &'m mut MemoryMetrics) -> Self {
        Self {
            max_buffer_bytes: caps.max_storage_buffer_bytes,
            metrics,
        }
    }

    /// Check every request against the device limit.
    pub fn validate(&self, requests: &[BufferRequest]) -> OitResult<()> {
        for req in requests {
            if req.bytes() > self.max_buffer_bytes {
                return Err(OitError::Allocation {
                    label: req.label.to_owned(),
                    requested: req.bytes(),
                    limit: self.max_buffer_bytes,
                });
            }
        }
        Ok(())
    }

    /// Create a fresh buffer. Call [`ResourceAllocator::validate`] on the set first.
    pub fn allocate(&mut self, req: BufferRequest) -> StorageBuffer {
        let buffer = StorageBuffer::new(req.label, req.words.max(1), req.fill);
        self.metrics
            .record_allocation(buffer.label(), buffer.byte_len());
        debug!(
            label = req.label,
            bytes = buffer.byte_len(),
            live_bytes = self.metrics.live_bytes(),
            "storage buffer allocated"
        );
        buffer
    }

    pub fn release(&mut self, buffer: StorageBuffer) {
        self.metrics
            .record_release(buffer.label(), buffer.byte_len());
        debug!(
            label = buffer.label(),
            bytes = buffer.byte_len(),
            live_bytes = self.metrics.live_bytes(),
            "storage buffer released"
        );
    }

    pub fn metrics(&self) -> &MemoryMetrics {
        self.metrics
    }
}

#[cfg(test)]
#[path = "../../tests/unit/gpu/allocator.rs"]
mod tests;
