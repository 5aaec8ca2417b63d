//! Binary stream sink (C6 "Stream sink"): routes decoded `0x01`/`0x05`
//! packets to the [`PersistentSurface`] bounds check and the platform
//! decoder, dropping anything that fails the contract instead of
//! aborting the rest of the packet (spec.md §4.6, §8 scenario 5).

use servidesk_protocol::{Packet, PersistentSurface};
use tracing::warn;

use crate::collaborators::{FrameSink, JpegDecoder};
use crate::session::E2eSession;
use crate::Result;

/// Owns the persistent surface and dispatches incoming binary packets
/// to the decode/sink collaborators, opening the E2E envelope first if
/// the channel is established.
pub struct StreamSink {
    surface: PersistentSurface,
}

impl Default for StreamSink {
    fn default() -> Self {
        Self {
            surface: PersistentSurface::default(),
        }
    }
}

impl StreamSink {
    /// Reset the surface, e.g. when a new session starts.
    pub fn reset(&mut self) {
        self.surface = PersistentSurface::default();
    }

    /// Handle one inbound binary packet. `0x01` establishes/refreshes
    /// the surface and triggers a full refresh; `0x05` blits each
    /// in-bounds region, silently dropping out-of-bounds ones and any
    /// region packet that arrives before the first full frame (spec.md
    /// §3 "Persistent-texture state").
    pub fn handle(
        &mut self,
        packet: &Packet,
        e2e: &E2eSession,
        decoder: &mut dyn JpegDecoder,
        sink: &mut dyn FrameSink,
    ) -> Result<()> {
        match packet {
            Packet::VideoFrame(jpeg) => {
                let opened = e2e.open_or_passthrough(jpeg)?;
                decoder.decode_full(&opened)?;
                // Surface dimensions come from the `monitor_info`/
                // `monitor_switched` envelope, not the JPEG itself; the
                // caller establishes them via `establish` once known.
                Ok(())
            }
            Packet::RegionalUpdate(regions) => {
                if !self.surface.is_established() {
                    warn!("dropping regional update before first full frame");
                    return Ok(());
                }
                let wire_regions: Vec<servidesk_protocol::Region> = regions
                    .iter()
                    .map(|r| servidesk_protocol::Region {
                        x: r.x,
                        y: r.y,
                        w: r.w,
                        h: r.h,
                        jpeg: r.jpeg.clone(),
                    })
                    .collect();
                let accepted = self.surface.accept_regions(&wire_regions);
                let dropped = wire_regions.len() - accepted.len();
                if dropped > 0 {
                    warn!(dropped, "dropped out-of-bounds regional update(s)");
                }
                for region in accepted {
                    let opened = e2e.open_or_passthrough(&region.jpeg)?;
                    decoder.decode_region(region.x, region.y, region.w, region.h, &opened)?;
                }
                Ok(())
            }
            other => {
                tracing::debug!(?other, "ignoring unexpected binary packet from agent");
                Ok(())
            }
        }
    }

    /// Establish the surface's dimensions, e.g. from `monitor_info` or
    /// `monitor_switched`, and notify the UI sink of a full refresh.
    pub fn establish(&mut self, width: u16, height: u16, sink: &mut dyn FrameSink) {
        self.surface.set_full_frame(width, height);
        sink.on_full_frame_ready(width, height);
    }

    /// Whether a full frame has established the surface yet.
    pub fn is_established(&self) -> bool {
        self.surface.is_established()
    }
}
