//! Binary `0x02` input-event packets: decode, then dispatch to the
//! injector, encoder/quality controller, or capture collaborator
//! depending on the event kind (spec.md §4.5 "Input dispatch").

use servidesk_protocol::{InputEvent, Packet, Quality, QualityController};
use tracing::{info, warn};

use crate::collaborators::{dispatch_input_event, FrameSource, InputInjector};
use crate::{Error, Result};

/// Decode one `0x02` packet's JSON body into an [`InputEvent`].
pub fn decode(packet: &Packet) -> Result<InputEvent> {
    match packet {
        Packet::InputEvent(bytes) => Ok(serde_json::from_slice(bytes)?),
        other => Err(Error::Collaborator(format!(
            "expected an input-event packet, got {other:?}"
        ))),
    }
}

/// Outcome of handling one input event that the caller needs to act on
/// beyond injection — a quality override or a monitor switch that
/// requires sending fresh `monitor_info`/`monitor_switched` envelopes.
pub enum InputOutcome {
    /// Nothing further to report; the event was fully handled.
    Handled,
    /// The technician (or the controller) changed the active quality.
    QualityChanged(Quality),
    /// The technician requested a different monitor; `(index, width,
    /// height)` of the newly active monitor is reported back.
    MonitorSwitched(u32, u16, u16),
}

/// Apply one decoded input event: inject mouse/keyboard input, apply a
/// `quality_change` override to the controller, or switch the active
/// capture monitor.
pub async fn handle(
    event: InputEvent,
    injector: &mut dyn InputInjector,
    source: &mut dyn FrameSource,
    quality: &mut QualityController,
    map_cmd_to_ctrl: bool,
) -> Result<InputOutcome> {
    match event {
        InputEvent::QualityChange(payload) => {
            info!(?payload.quality, payload.fps, "quality override requested");
            quality.force(payload.quality);
            Ok(InputOutcome::QualityChanged(payload.quality))
        }
        InputEvent::SwitchMonitor { monitor_index } => {
            source.switch_monitor(monitor_index).await.map_err(|e| {
                warn!(%e, monitor_index, "failed to switch capture monitor");
                e
            })?;
            let (w, h) = source.screen_size();
            Ok(InputOutcome::MonitorSwitched(monitor_index, w, h))
        }
        other => {
            dispatch_input_event(other, injector, map_cmd_to_ctrl).await?;
            Ok(InputOutcome::Handled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mouse_move_from_wire_bytes() {
        let json = serde_json::to_vec(&InputEvent::MouseMove { x: 0.5, y: 0.25 }).unwrap();
        let packet = Packet::InputEvent(json);
        let event = decode(&packet).unwrap();
        assert_eq!(event, InputEvent::MouseMove { x: 0.5, y: 0.25 });
    }

    #[test]
    fn rejects_non_input_packet() {
        let packet = Packet::ClipboardData(b"hi".to_vec());
        assert!(decode(&packet).is_err());
    }
}
