//! Per-pixel mutual exclusion for gather passes.
//!
//! Fragment invocations that hit the same pixel run concurrently. Backends that keep a per-pixel
//! structure (arrays, lists, layers, moments) perform their read-modify-write sequence inside
//! [`PixelCriticalSection::enter`]. Additive backends rely on single-word atomics instead.

use std::sync::atomic::{AtomicU32, Ordering, fence};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// One spin lock per pixel address.
pub struct PixelCriticalSection {
    locks: Box<[AtomicU32]>,
}

impl PixelCriticalSection {
    pub fn new(slots: usize) -> Self {
        Self {
            locks: (0..slots).map(|_| AtomicU32::new(UNLOCKED)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Block until the pixel at `address` is owned by the caller.
    ///
    /// Memory written inside the section is visible to the next owner of the same pixel.
    #[inline]
    pub fn enter(&self, address: usize) -> PixelGuard<'_> {
        let lock = &self.locks[address];
        loop {
            if lock
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return PixelGuard { lock };
            }
            while lock.load(Ordering::Relaxed) != UNLOCKED {
                std::hint::spin_loop();
            }
        }
    }

    pub fn is_held(&self, address: usize) -> bool {
        self.locks[address].load(Ordering::Relaxed) == LOCKED
    }
}

impl std::fmt::Debug for PixelCriticalSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelCriticalSection")
            .field("slots", &self.locks.len())
            .finish()
    }
}

/// Releases the pixel on drop.
#[must_use = "the pixel is released as soon as the guard is dropped"]
pub struct PixelGuard<'a> {
    lock: &'a AtomicU32,
}

impl Drop for PixelGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(UNLOCKED, Ordering::Release);
    }
}

/// Full barrier between a pass that writes per-pixel storage and the pass that reads it.
pub fn memory_barrier() {
    fence(Ordering::SeqCst);
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/sync.rs"]
mod tests;
