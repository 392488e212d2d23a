//! Double-buffered GPU surface handoff between capture and encode dispatch
//! contexts (spec §3 `DoubleBufferedSurface`, §4.2/§4.3).
//!
//! Grounded on the generation-counter pattern `vt_backend.rs`'s
//! `VtEncoderAdapter` already uses to track session-switch activation
//! (`config_generation`/`next_generation`); here the same idea tracks which
//! of two surface slots is writable vs. in flight to the encoder.

use crate::contract::SurfaceHandle;

/// Two capture-target slots, swapped each time capture produces a new
/// frame. The slot not currently in flight to the encoder is always the
/// one capture writes into next, so capture never blocks on the encoder
/// and the encoder never observes a surface capture is still writing.
#[derive(Debug)]
pub struct DoubleBufferedSurface {
    generation: u64,
    in_flight_slot: Option<usize>,
}

impl Default for DoubleBufferedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubleBufferedSurface {
    pub fn new() -> Self {
        Self {
            generation: 0,
            in_flight_slot: None,
        }
    }

    /// Capture finished writing a frame. Returns the handle to hand to the
    /// encoder, selecting whichever of the two slots (0/1) is not the one
    /// currently in flight.
    pub fn publish(&mut self) -> SurfaceHandle {
        let slot = match self.in_flight_slot {
            Some(0) => 1,
            Some(1) => 0,
            _ => 0,
        };
        self.generation += 1;
        self.in_flight_slot = Some(slot);
        SurfaceHandle {
            slot,
            generation: self.generation,
        }
    }

    /// Encoder (or the pipeline on its behalf) releases a surface once it
    /// has been submitted. A release for a stale generation is a no-op:
    /// the slot may already have been reclaimed and republished.
    pub fn release(&mut self, handle: SurfaceHandle) {
        if self.in_flight_slot == Some(handle.slot) && handle.generation == self.generation {
            self.in_flight_slot = None;
        }
    }

    /// True if `handle` still refers to the currently in-flight slot/
    /// generation (used to detect stale surface handles after a resize or
    /// capture restart resets the buffer).
    pub fn is_current(&self, handle: SurfaceHandle) -> bool {
        self.in_flight_slot == Some(handle.slot) && handle.generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_alternates_slots() {
        let mut buffer = DoubleBufferedSurface::new();
        let first = buffer.publish();
        assert_eq!(first.slot, 0);
        buffer.release(first);
        let second = buffer.publish();
        assert_eq!(second.slot, 1);
    }

    #[test]
    fn stale_release_is_ignored() {
        let mut buffer = DoubleBufferedSurface::new();
        let first = buffer.publish();
        let second = buffer.publish();
        assert_ne!(first.slot, second.slot);
        // Releasing the stale first handle must not clear the slot the
        // second publish now owns.
        buffer.release(first);
        assert!(buffer.is_current(second));
    }

    #[test]
    fn current_handle_is_recognized() {
        let mut buffer = DoubleBufferedSurface::new();
        let handle = buffer.publish();
        assert!(buffer.is_current(handle));
        buffer.release(handle);
        assert!(!buffer.is_current(handle));
    }
}
