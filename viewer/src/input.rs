//! Input production (spec.md §4.6 "Input production"): serializes UI
//! events into `0x02` packets, flipping the y axis when the host's
//! pointer origin is bottom-left so the wire is always top-left
//! origin, and converting scroll deltas to WHEEL_DELTA units.

use servidesk_protocol::{InputEvent, Packet};

/// Normalize a UI mouse-move position, flipping y if configured, and
/// encode it as a `0x02` packet.
pub fn encode_mouse_move(x: f64, y: f64, flip_y: bool) -> crate::Result<Packet> {
    encode(InputEvent::MouseMove {
        x,
        y: normalize_y(y, flip_y),
    })
}

/// Encode a mouse click/release at a normalized position.
pub fn encode_mouse_click(
    button: servidesk_protocol::MouseButton,
    action: servidesk_protocol::KeyAction,
    x: f64,
    y: f64,
    flip_y: bool,
) -> crate::Result<Packet> {
    encode(InputEvent::MouseClick {
        button,
        action,
        x,
        y: normalize_y(y, flip_y),
    })
}

/// Convert wheel notches to WHEEL_DELTA units and encode a scroll event.
pub fn encode_mouse_scroll(notches_x: i32, notches_y: i32) -> crate::Result<Packet> {
    encode(InputEvent::MouseScroll {
        delta_x: notches_x * servidesk_protocol::WHEEL_DELTA,
        delta_y: notches_y * servidesk_protocol::WHEEL_DELTA,
    })
}

/// Encode a pre-built [`InputEvent`] (keys, special-key combinations,
/// quality overrides, monitor switches) as a `0x02` packet.
pub fn encode(event: InputEvent) -> crate::Result<Packet> {
    let bytes = serde_json::to_vec(&event)?;
    Ok(Packet::InputEvent(bytes))
}

fn normalize_y(y: f64, flip_y: bool) -> f64 {
    if flip_y {
        1.0 - y
    } else {
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servidesk_protocol::{KeyAction, MouseButton};

    #[test]
    fn flips_y_when_host_origin_is_bottom_left() {
        let packet = encode_mouse_move(0.25, 0.75, true).unwrap();
        let Packet::InputEvent(bytes) = packet else { panic!("expected input event") };
        let event: InputEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event, InputEvent::MouseMove { x: 0.25, y: 0.25 });
    }

    #[test]
    fn leaves_y_untouched_when_origin_is_top_left() {
        let packet = encode_mouse_move(0.25, 0.75, false).unwrap();
        let Packet::InputEvent(bytes) = packet else { panic!("expected input event") };
        let event: InputEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event, InputEvent::MouseMove { x: 0.25, y: 0.75 });
    }

    #[test]
    fn scroll_converts_notches_to_wheel_delta_units() {
        let packet = encode_mouse_scroll(1, -2).unwrap();
        let Packet::InputEvent(bytes) = packet else { panic!("expected input event") };
        let event: InputEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            event,
            InputEvent::MouseScroll {
                delta_x: 120,
                delta_y: -240
            }
        );
    }

    #[test]
    fn click_carries_button_and_action() {
        let packet =
            encode_mouse_click(MouseButton::Right, KeyAction::Down, 0.1, 0.1, false).unwrap();
        let Packet::InputEvent(bytes) = packet else { panic!("expected input event") };
        let event: InputEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            event,
            InputEvent::MouseClick {
                button: MouseButton::Right,
                action: KeyAction::Down,
                x: 0.1,
                y: 0.1
            }
        );
    }
}
