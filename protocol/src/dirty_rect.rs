//! Dirty-rect streaming contract (C8): keyframe cadence, regional-vs-full
//! decision, and the viewer-side bounds check over the persistent surface.

use crate::binary::Region;
use crate::constants::{DIRTY_AREA_FULL_FRAME_THRESHOLD, KEYFRAME_INTERVAL};

/// One dirty rectangle reported by the capturer, prior to encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRegion {
    /// Left edge.
    pub x: u16,
    /// Top edge.
    pub y: u16,
    /// Width.
    pub w: u16,
    /// Height.
    pub h: u16,
}

impl DirtyRegion {
    fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// What the streaming loop should do for one capture tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecision {
    /// Emit a `0x01` full frame and reset the keyframe counter.
    FullFrame,
    /// Emit a `0x05` regional update covering these regions.
    Regional(Vec<DirtyRegion>),
}

/// Agent-side encoder state: keyframe counter and the send-in-progress
/// backpressure flag (spec.md §3 "Encoder state").
#[derive(Debug, Default)]
pub struct EncoderState {
    keyframe_counter: u32,
    send_in_progress: bool,
    /// Count of capture iterations skipped due to backpressure, surfaced
    /// for the backpressure-skip testable property (spec.md §8 scenario 6).
    pub skipped: u64,
}

impl EncoderState {
    /// Decide what to send for one tick given the dirty regions reported
    /// by the capturer (empty means "no changes") and the screen size.
    ///
    /// Returns `None` if the tick must be skipped entirely (backpressure).
    pub fn decide(
        &mut self,
        dirty: &[DirtyRegion],
        screen_w: u16,
        screen_h: u16,
    ) -> Option<FrameDecision> {
        if self.send_in_progress {
            self.skipped += 1;
            return None;
        }

        self.keyframe_counter += 1;
        let force_keyframe = self.keyframe_counter >= KEYFRAME_INTERVAL || dirty.is_empty();

        if force_keyframe {
            self.keyframe_counter = 0;
            return Some(FrameDecision::FullFrame);
        }

        let screen_area = screen_w as u64 * screen_h as u64;
        let dirty_area: u64 = dirty.iter().map(DirtyRegion::area).sum();
        let fraction = if screen_area == 0 {
            1.0
        } else {
            dirty_area as f64 / screen_area as f64
        };

        if fraction > DIRTY_AREA_FULL_FRAME_THRESHOLD as f64 {
            self.keyframe_counter = 0;
            Some(FrameDecision::FullFrame)
        } else {
            Some(FrameDecision::Regional(dirty.to_vec()))
        }
    }

    /// Mark a send as started; further ticks are skipped until
    /// [`EncoderState::send_complete`] is called.
    pub fn send_started(&mut self) {
        self.send_in_progress = true;
    }

    /// Mark the in-flight send as finished.
    pub fn send_complete(&mut self) {
        self.send_in_progress = false;
    }
}

/// Viewer-side persistent surface (spec.md §3 "Persistent-texture state").
///
/// Regional updates are dropped until the first full frame establishes
/// the surface's dimensions, and any region exceeding the surface bounds
/// is dropped without aborting the rest of the packet.
#[derive(Debug, Default)]
pub struct PersistentSurface {
    dimensions: Option<(u16, u16)>,
}

impl PersistentSurface {
    /// Establish (or re-establish) the surface from a full `0x01` frame.
    pub fn set_full_frame(&mut self, width: u16, height: u16) {
        self.dimensions = Some((width, height));
    }

    /// Filter a batch of regions to only those that fit within the
    /// established surface. Returns an empty vec if no full frame has
    /// arrived yet.
    pub fn accept_regions<'a>(&self, regions: &'a [Region]) -> Vec<&'a Region> {
        let Some((width, height)) = self.dimensions else {
            return Vec::new();
        };
        regions
            .iter()
            .filter(|r| {
                r.x.checked_add(r.w).is_some_and(|right| right <= width)
                    && r.y.checked_add(r.h).is_some_and(|bottom| bottom <= height)
            })
            .collect()
    }

    /// Whether the surface has been established by a full frame yet.
    pub fn is_established(&self) -> bool {
        self.dimensions.is_some()
    }
}
