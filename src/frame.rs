use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Width of the console LCD in pixels.
pub const FRAME_WIDTH: usize = 160;

/// Height of the console LCD in pixels.
pub const FRAME_HEIGHT: usize = 144;

/// Pixels per frame. Each pixel is one 16-bit color value.
pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;

/// Single-slot handoff buffer between the emulation thread and the render
/// consumer.
///
/// Publishing swaps in a freshly copied immutable snapshot; the reader clones
/// the `Arc` out from under a momentary lock. A reader therefore never
/// observes a partially written frame, and always sees the most recently
/// completed one. This is not a queue: frames published faster than the
/// consumer reads are simply discarded.
pub struct FrameSlot {
    slot: Mutex<Arc<[u16]>>,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Arc::from(vec![0u16; FRAME_PIXELS])),
            published: AtomicU64::new(0),
        }
    }

    /// Publish a completed frame. `pixels` is copied, not retained, so the
    /// core is free to reuse its internal frame storage immediately.
    pub fn publish(&self, pixels: &[u16]) {
        debug_assert_eq!(pixels.len(), FRAME_PIXELS);
        let snapshot: Arc<[u16]> = Arc::from(pixels);
        *self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Latest completed frame snapshot.
    pub fn latest(&self) -> Arc<[u16]> {
        Arc::clone(&self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of frames published since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
