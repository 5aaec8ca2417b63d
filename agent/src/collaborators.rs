//! Narrow trait seams over the platform-specific collaborators spec.md
//! §1 puts out of scope: screen capture, JPEG encode, input injection,
//! and clipboard I/O. The streaming loop, input dispatcher and clipboard
//! poller in this crate are written against these traits only, so they
//! are fully testable against an in-memory fake (mirroring the
//! `Transport`/`NetworkTransport` seam the teacher uses between its
//! protocol-level logic and the concrete socket implementation).

use async_trait::async_trait;

use servidesk_protocol::{
    InputEvent, KeyAction, MouseButton, Quality, SpecialKeyCombination,
};

/// One captured frame plus the regions that changed since the previous
/// capture, as reported by the platform capturer.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw BGRA pixels for the full frame.
    pub bgra: Vec<u8>,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Rectangles that changed since the last capture. Empty means "no
    /// capturer-reported dirty tracking" and forces a full frame.
    pub dirty: Vec<servidesk_protocol::DirtyRegion>,
}

/// Supplies raw frames from the active display, e.g. desktop duplication
/// on Windows or an equivalent on other platforms.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Request one frame. `Ok(None)` means no frame was ready within the
    /// capturer's own timeout (spec.md §4.5 step 1: "If none, skip").
    async fn capture(&mut self) -> crate::Result<Option<CapturedFrame>>;

    /// Switch the active capture source to a different monitor
    /// (spec.md §4.5 `switch_monitor`).
    async fn switch_monitor(&mut self, monitor_index: u32) -> crate::Result<()>;

    /// Dimensions of the currently active monitor.
    fn screen_size(&self) -> (u16, u16);

    /// Index of the currently active monitor.
    fn monitor_index(&self) -> u32;
}

/// Encodes raw BGRA pixels to JPEG. The core only specifies the packet
/// format the encoded bytes travel in, not the codec itself.
pub trait JpegEncoder: Send + Sync {
    /// Encode a full frame at the given quality tier.
    fn encode_full(&self, frame: &CapturedFrame, quality: Quality) -> crate::Result<Vec<u8>>;

    /// Encode one dirty-rect tile, cropped from the full frame.
    fn encode_region(
        &self,
        frame: &CapturedFrame,
        region: &servidesk_protocol::DirtyRegion,
        quality: Quality,
    ) -> crate::Result<Vec<u8>>;
}

/// Injects decoded input events into the host OS.
#[async_trait]
pub trait InputInjector: Send + Sync {
    /// Move the pointer to a normalized `[0, 1]` position.
    async fn mouse_move(&mut self, x: f64, y: f64) -> crate::Result<()>;

    /// Press or release a mouse button at a normalized position.
    async fn mouse_click(
        &mut self,
        button: MouseButton,
        action: KeyAction,
        x: f64,
        y: f64,
    ) -> crate::Result<()>;

    /// Scroll the wheel by a delta in WHEEL_DELTA units.
    async fn mouse_scroll(&mut self, delta_x: i32, delta_y: i32) -> crate::Result<()>;

    /// Inject a single printable Unicode code point (used when `ctrl` is
    /// not held and a `char` is present, per spec.md §4.5 "Input dispatch").
    async fn inject_unicode(&mut self, action: KeyAction, ch: char) -> crate::Result<()>;

    /// Inject by virtual-key code plus modifier state (used otherwise).
    async fn inject_virtual_key(
        &mut self,
        action: KeyAction,
        key_code: u32,
        ctrl: bool,
        alt: bool,
        shift: bool,
        win: bool,
    ) -> crate::Result<()>;

    /// Emit a fixed platform key combination.
    async fn special_key(&mut self, combination: SpecialKeyCombination) -> crate::Result<()>;
}

/// Reads and writes the host clipboard.
#[async_trait]
pub trait ClipboardHost: Send + Sync {
    /// Read the current clipboard text, if it changed since the last
    /// poll and wasn't just set by [`ClipboardHost::set_text`].
    async fn poll_changed(&mut self) -> crate::Result<Option<String>>;

    /// Set the clipboard text, suppressing the next self-triggered
    /// change so it isn't echoed back out.
    async fn set_text(&mut self, text: String) -> crate::Result<()>;
}

/// Dispatch one decoded [`InputEvent`] to the injector/quality
/// collaborators (spec.md §4.5 "Input dispatch").
pub async fn dispatch_input_event(
    event: InputEvent,
    injector: &mut dyn InputInjector,
    map_cmd_to_ctrl: bool,
) -> crate::Result<()> {
    match event {
        InputEvent::MouseMove { x, y } => injector.mouse_move(x, y).await,
        InputEvent::MouseClick { button, action, x, y } => {
            injector.mouse_click(button, action, x, y).await
        }
        InputEvent::MouseScroll { delta_x, delta_y } => {
            injector.mouse_scroll(delta_x, delta_y).await
        }
        InputEvent::Key {
            action,
            key_code,
            modifiers,
            char,
        } => {
            if let Some(ch) = char {
                if !modifiers.ctrl {
                    return injector.inject_unicode(action, ch).await;
                }
            }
            let win = modifiers.win && !map_cmd_to_ctrl;
            let ctrl = modifiers.ctrl || (modifiers.win && map_cmd_to_ctrl);
            injector
                .inject_virtual_key(action, key_code, ctrl, modifiers.alt, modifiers.shift, win)
                .await
        }
        InputEvent::SpecialKey { combination } => injector.special_key(combination).await,
        // Handled by the streaming/quality layer, not the injector.
        InputEvent::QualityChange(_) | InputEvent::SwitchMonitor { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servidesk_protocol::Modifiers;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingInjector {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl InputInjector for RecordingInjector {
        async fn mouse_move(&mut self, x: f64, y: f64) -> crate::Result<()> {
            self.calls.lock().unwrap().push(format!("move {x} {y}"));
            Ok(())
        }
        async fn mouse_click(
            &mut self,
            _button: MouseButton,
            _action: KeyAction,
            _x: f64,
            _y: f64,
        ) -> crate::Result<()> {
            Ok(())
        }
        async fn mouse_scroll(&mut self, _dx: i32, _dy: i32) -> crate::Result<()> {
            Ok(())
        }
        async fn inject_unicode(&mut self, _action: KeyAction, ch: char) -> crate::Result<()> {
            self.calls.lock().unwrap().push(format!("unicode {ch}"));
            Ok(())
        }
        async fn inject_virtual_key(
            &mut self,
            _action: KeyAction,
            key_code: u32,
            ctrl: bool,
            _alt: bool,
            _shift: bool,
            _win: bool,
        ) -> crate::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("vk {key_code} ctrl={ctrl}"));
            Ok(())
        }
        async fn special_key(&mut self, _combination: SpecialKeyCombination) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn printable_char_without_ctrl_uses_unicode_injection() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut injector = RecordingInjector { calls: calls.clone() };
        let event = InputEvent::Key {
            action: KeyAction::Down,
            key_code: 65,
            modifiers: Modifiers::default(),
            char: Some('a'),
        };
        dispatch_input_event(event, &mut injector, false).await.unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), ["unicode a"]);
    }

    #[tokio::test]
    async fn ctrl_held_uses_virtual_key_even_with_char() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut injector = RecordingInjector { calls: calls.clone() };
        let event = InputEvent::Key {
            action: KeyAction::Down,
            key_code: 67,
            modifiers: Modifiers {
                ctrl: true,
                ..Default::default()
            },
            char: Some('c'),
        };
        dispatch_input_event(event, &mut injector, false).await.unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), ["vk 67 ctrl=true"]);
    }

    #[tokio::test]
    async fn cmd_maps_to_ctrl_when_configured() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut injector = RecordingInjector { calls: calls.clone() };
        let event = InputEvent::Key {
            action: KeyAction::Down,
            key_code: 9,
            modifiers: Modifiers {
                win: true,
                ..Default::default()
            },
            char: None,
        };
        dispatch_input_event(event, &mut injector, true).await.unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), ["vk 9 ctrl=true"]);
    }
}
