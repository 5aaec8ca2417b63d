//! Narrow trait seams over the platform-specific collaborators spec.md
//! §1 puts out of scope on the technician side: JPEG decode and GPU
//! blit rendering. The stream sink and input dispatcher in this crate
//! are written against these traits only, mirroring
//! `servidesk-agent::collaborators`'s `FrameSource`/`JpegEncoder` seam.

use async_trait::async_trait;

use servidesk_protocol::InputEvent;

/// Decodes JPEG bytes into whatever pixel buffer the renderer expects.
/// The core only specifies the packet format the encoded bytes travel
/// in, not the codec itself.
pub trait JpegDecoder: Send + Sync {
    /// Decode one full-frame JPEG, replacing the renderer's surface.
    fn decode_full(&mut self, jpeg: &[u8]) -> crate::Result<()>;

    /// Decode and blit one region's JPEG tile at its screen position.
    fn decode_region(&mut self, x: u16, y: u16, w: u16, h: u16, jpeg: &[u8]) -> crate::Result<()>;
}

/// Surfaces frame-level events to the UI layer: a full refresh signal
/// after a keyframe, and the surface's current dimensions once known.
pub trait FrameSink: Send + Sync {
    /// Called once per `0x01` full frame, after the decoder has updated
    /// the surface, so the UI can request a repaint.
    fn on_full_frame_ready(&mut self, width: u16, height: u16);
}

/// Supplies UI-originated input events (mouse/keyboard) to be
/// serialized onto the wire (spec.md §4.6 "Input production").
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Block until the next UI input event is available, or `None` if
    /// the UI layer has shut down.
    async fn next_event(&mut self) -> Option<InputEvent>;
}

/// Asks a human whether to send an outgoing file and, if so, which
/// local path to read it from.
#[async_trait]
pub trait OutgoingFilePrompt: Send + Sync {
    /// Returns the source path and display name to offer, or `None` to
    /// skip.
    async fn prompt(&mut self) -> Option<(std::path::PathBuf, String)>;
}

/// Reads and writes the technician's host clipboard. Binary `0x03`
/// packets are bidirectional on the wire (spec.md §4.1), so the
/// technician side syncs clipboard content the same way the agent side
/// does (spec.md §4.5 "Clipboard").
#[async_trait]
pub trait ClipboardHost: Send + Sync {
    /// Returns the current clipboard text if it changed since the last
    /// poll and wasn't just set by [`ClipboardHost::set_text`].
    async fn poll_changed(&mut self) -> crate::Result<Option<String>>;

    /// Set the clipboard text, suppressing the next self-triggered
    /// change so it isn't echoed back out.
    async fn set_text(&mut self, text: String) -> crate::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        calls: Vec<(u16, u16)>,
    }

    impl FrameSink for RecordingSink {
        fn on_full_frame_ready(&mut self, width: u16, height: u16) {
            self.calls.push((width, height));
        }
    }

    #[test]
    fn frame_sink_records_full_frame_dimensions() {
        let mut sink = RecordingSink { calls: Vec::new() };
        sink.on_full_frame_ready(1920, 1080);
        assert_eq!(sink.calls, vec![(1920, 1080)]);
    }
}
