use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

/// Word-addressed storage buffer shared by all fragment invocations of a pass.
///
/// Plain loads and stores are relaxed; ordering between invocations of one pixel comes from the
/// pixel critical section, and ordering between passes from the pass barrier.
pub struct StorageBuffer {
    label: String,
    words: Box<[AtomicU32]>,
}

impl StorageBuffer {
    /// Buffers are created by the resource allocator so that every byte is accounted for.
    pub(crate) fn new(label: impl Into<String>, len_words: usize, fill: u32) -> Self {
        Self {
            label: label.into(),
            words: (0..len_words).map(|_| AtomicU32::new(fill)).collect(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    pub fn byte_len(&self) -> u64 {
        (self.words.len() as u64).saturating_mul(4)
    }

    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.load(index))
    }

    #[inline]
    pub fn store_f32(&self, index: usize, value: f32) {
        self.store(index, value.to_bits());
    }

    /// Atomic add, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_add(value, Ordering::AcqRel)
    }

    /// Atomic exchange, returning the previous value.
    #[inline]
    pub fn swap(&self, index: usize, value: u32) -> u32 {
        self.words[index].swap(value, Ordering::AcqRel)
    }

    /// Atomic read-modify-write of an `f32` word, returning the previous value.
    ///
    /// This is how fixed-function blending is modelled: single-word atomicity without a pixel
    /// lock.
    #[inline]
    pub fn update_f32(&self, index: usize, f: impl Fn(f32) -> f32) -> f32 {
        let prev = match self.words[index].fetch_update(Ordering::AcqRel, Ordering::Relaxed, |w| {
            Some(f(f32::from_bits(w)).to_bits())
        }) {
            Ok(w) | Err(w) => w,
        };
        f32::from_bits(prev)
    }

    /// Set every word to `value`.
    pub fn fill(&self, value: u32) {
        self.words
            .par_iter()
            .for_each(|w| w.store(value, Ordering::Relaxed));
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u32> {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .collect()
    }
}

impl std::fmt::Debug for StorageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("label", &self.label)
            .field("words", &self.words.len())
            .finish()
    }
}
