//! Capture/encode streaming loop (C8).
//!
//! One tick: capture a frame and ask [`EncoderState`] whether to send a
//! full frame or a regional update. If it decides to send, the encode,
//! E2E seal and enqueue happen on a detached task so a slow encode or a
//! backed-up outbound channel never blocks the capture loop itself —
//! `send_in_progress` stays set across however many real-time ticks the
//! detached task takes to finish, and those ticks are skipped and
//! counted rather than queued (spec.md §3 "Encoder state", §4.5
//! "Streaming tick", §8 scenario 6).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use servidesk_protocol::{DirtyRegion, EncoderState, FrameDecision, Packet, Quality, Region};

use crate::collaborators::{CapturedFrame, FrameSource, JpegEncoder};
use crate::session::E2eSession;
use crate::transport::{Outbound, OutboundHandle};
use crate::Result;

/// Run one capture tick. Captures a frame and, if the encoder state
/// decides this tick should send, hands the encode/seal/enqueue work to
/// a detached task and returns immediately — it does not wait for that
/// task to finish. Returns once the tick has either been skipped or
/// handed off.
pub async fn run_tick(
    source: &mut dyn FrameSource,
    encoder: Arc<dyn JpegEncoder>,
    encoder_state: Arc<Mutex<EncoderState>>,
    e2e: Arc<Mutex<Option<E2eSession>>>,
    outbound: OutboundHandle,
    quality: Quality,
) -> Result<()> {
    let Some(frame) = source.capture().await? else {
        return Ok(());
    };

    let (width, height) = (frame.width, frame.height);
    let decision = {
        let mut state = encoder_state.lock().unwrap();
        let Some(decision) = state.decide(&frame.dirty, width, height) else {
            return Ok(());
        };
        state.send_started();
        decision
    };

    tokio::spawn(send_tick(
        frame,
        decision,
        encoder,
        encoder_state,
        e2e,
        outbound,
        quality,
    ));

    Ok(())
}

/// The detached half of a tick: encode, seal, enqueue, then clear
/// `send_in_progress` regardless of outcome so the next capture tick
/// can proceed.
async fn send_tick(
    frame: CapturedFrame,
    decision: FrameDecision,
    encoder: Arc<dyn JpegEncoder>,
    encoder_state: Arc<Mutex<EncoderState>>,
    e2e: Arc<Mutex<Option<E2eSession>>>,
    outbound: OutboundHandle,
    quality: Quality,
) {
    let result = encode_and_seal(&frame, &decision, encoder.as_ref(), &e2e, quality);
    encoder_state.lock().unwrap().send_complete();

    match result {
        Ok(Some(packet)) => {
            if outbound.send(packet).is_err() {
                warn!("dropped streaming tick, transport already closed");
            }
        }
        Ok(None) => {
            // The session ended while this tick was in flight; nothing
            // left to encrypt for.
        }
        Err(err) => warn!(%err, "streaming tick failed to encode/seal frame"),
    }
}

fn encode_and_seal(
    frame: &CapturedFrame,
    decision: &FrameDecision,
    encoder: &dyn JpegEncoder,
    e2e: &Mutex<Option<E2eSession>>,
    quality: Quality,
) -> Result<Option<Outbound>> {
    let packet = encode_decision(frame, decision, encoder, quality)?;

    let mut guard = e2e.lock().unwrap();
    let Some(session) = guard.as_mut() else {
        return Ok(None);
    };
    seal_packet(&packet, session).map(Some)
}

fn encode_decision(
    frame: &CapturedFrame,
    decision: &FrameDecision,
    encoder: &dyn JpegEncoder,
    quality: Quality,
) -> Result<Packet> {
    match decision {
        FrameDecision::FullFrame => {
            let jpeg = encoder.encode_full(frame, quality)?;
            Ok(Packet::VideoFrame(jpeg))
        }
        FrameDecision::Regional(regions) => {
            let mut out = Vec::with_capacity(regions.len());
            for region in regions {
                let jpeg = encoder.encode_region(frame, region, quality)?;
                out.push(region_to_wire(region, jpeg));
            }
            Ok(Packet::RegionalUpdate(out))
        }
    }
}

fn region_to_wire(region: &DirtyRegion, jpeg: Vec<u8>) -> Region {
    Region {
        x: region.x,
        y: region.y,
        w: region.w,
        h: region.h,
        jpeg,
    }
}

/// E2E encryption covers the JPEG payload bytes only; coordinates and
/// the packet's own type/length framing stay in the clear so the relay
/// can still frame-validate without ever reading pixel data (spec.md
/// §4.2 "Scope": "All binary frames are encrypted if `is_ready`").
fn seal_packet(packet: &Packet, e2e: &mut E2eSession) -> Result<Outbound> {
    if e2e.is_unencrypted() {
        return Ok(Outbound::Binary(packet.clone()));
    }
    let sealed = match packet {
        Packet::VideoFrame(jpeg) => Packet::VideoFrame(e2e.seal_or_passthrough(jpeg)?),
        Packet::RegionalUpdate(regions) => {
            let mut sealed_regions = Vec::with_capacity(regions.len());
            for region in regions {
                sealed_regions.push(Region {
                    x: region.x,
                    y: region.y,
                    w: region.w,
                    h: region.h,
                    jpeg: e2e.seal_or_passthrough(&region.jpeg)?,
                });
            }
            Packet::RegionalUpdate(sealed_regions)
        }
        other => other.clone(),
    };
    Ok(Outbound::Binary(sealed))
}

/// Sleep for whatever remains of one tick's budget at the given
/// quality tier's target fps, never less than 1ms (spec.md §4.5
/// "sleep `max(1, target_interval - elapsed)`"). This throttles down
/// from the connection's fixed capture cadence to the (possibly lower)
/// fps the current quality tier asks for; it no longer brackets the
/// encode/send work, which now runs on its own detached task.
pub async fn sleep_remaining(tick_start: Instant, quality: Quality) {
    let target = Duration::from_millis(1000 / quality.target_fps().max(1) as u64);
    let elapsed = tick_start.elapsed();
    let remaining = target.checked_sub(elapsed).unwrap_or(Duration::from_millis(1));
    tokio::time::sleep(remaining.max(Duration::from_millis(1))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    struct FakeSource {
        frame: Option<CapturedFrame>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn capture(&mut self) -> Result<Option<CapturedFrame>> {
            Ok(self.frame.clone())
        }
        async fn switch_monitor(&mut self, _monitor_index: u32) -> Result<()> {
            Ok(())
        }
        fn screen_size(&self) -> (u16, u16) {
            self.frame.as_ref().map(|f| (f.width, f.height)).unwrap_or((0, 0))
        }
        fn monitor_index(&self) -> u32 {
            0
        }
    }

    struct FakeEncoder;

    impl JpegEncoder for FakeEncoder {
        fn encode_full(&self, _frame: &CapturedFrame, _quality: Quality) -> Result<Vec<u8>> {
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
        fn encode_region(
            &self,
            _frame: &CapturedFrame,
            _region: &DirtyRegion,
            _quality: Quality,
        ) -> Result<Vec<u8>> {
            Ok(vec![0xAA])
        }
    }

    /// An encoder whose `encode_full` blocks the calling thread for a
    /// fixed delay, used to exercise the backpressure-skip path through
    /// the real `run_tick`/`send_tick` split rather than poking
    /// `EncoderState` directly.
    struct SlowEncoder {
        delay: StdDuration,
    }

    impl JpegEncoder for SlowEncoder {
        fn encode_full(&self, _frame: &CapturedFrame, _quality: Quality) -> Result<Vec<u8>> {
            std::thread::sleep(self.delay);
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
        fn encode_region(
            &self,
            _frame: &CapturedFrame,
            _region: &DirtyRegion,
            _quality: Quality,
        ) -> Result<Vec<u8>> {
            std::thread::sleep(self.delay);
            Ok(vec![0xAA])
        }
    }

    fn frame() -> CapturedFrame {
        CapturedFrame {
            bgra: vec![0; 16],
            width: 100,
            height: 100,
            dirty: vec![],
        }
    }

    fn unencrypted_e2e() -> Arc<Mutex<Option<E2eSession>>> {
        Arc::new(Mutex::new(Some(E2eSession::start())))
    }

    #[tokio::test]
    async fn first_tick_with_no_dirty_regions_is_a_full_frame() {
        let mut source = FakeSource { frame: Some(frame()) };
        let encoder: Arc<dyn JpegEncoder> = Arc::new(FakeEncoder);
        let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
        let e2e = unencrypted_e2e();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = OutboundHandle::new(tx);

        run_tick(&mut source, encoder, encoder_state, e2e, outbound, Quality::High)
            .await
            .unwrap();

        let sent = rx.recv().await.expect("tick should produce a packet");
        match sent {
            Outbound::Binary(Packet::VideoFrame(bytes)) => assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]),
            other => panic!("expected a VideoFrame packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_frame_ready_skips_the_tick() {
        let mut source = FakeSource { frame: None };
        let encoder: Arc<dyn JpegEncoder> = Arc::new(FakeEncoder);
        let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
        let e2e = unencrypted_e2e();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = OutboundHandle::new(tx);

        run_tick(&mut source, encoder, encoder_state, e2e, outbound, Quality::High)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn encrypted_channel_seals_video_frame_payload() {
        let mut agent_session = E2eSession::start();
        let mut viewer_session = E2eSession::start();
        let agent_pub = agent_session.public_key_base64().unwrap();
        let viewer_pub = viewer_session.public_key_base64().unwrap();
        agent_session.complete(&viewer_pub).unwrap();
        viewer_session.complete(&agent_pub).unwrap();

        let mut source = FakeSource { frame: Some(frame()) };
        let encoder: Arc<dyn JpegEncoder> = Arc::new(FakeEncoder);
        let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
        let e2e = Arc::new(Mutex::new(Some(agent_session)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = OutboundHandle::new(tx);

        run_tick(&mut source, encoder, encoder_state, e2e, outbound, Quality::High)
            .await
            .unwrap();

        let sent = rx.recv().await.expect("tick should produce a packet");
        let Outbound::Binary(Packet::VideoFrame(ciphertext)) = sent else {
            panic!("expected a VideoFrame packet");
        };
        assert_ne!(ciphertext, vec![0xFF, 0xD8, 0xFF]);
        let opened = viewer_session.open_or_passthrough(&ciphertext).unwrap();
        assert_eq!(opened, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_slow_send_holds_backpressure_across_later_ticks() {
        let mut source = FakeSource { frame: Some(frame()) };
        let encoder: Arc<dyn JpegEncoder> = Arc::new(SlowEncoder {
            delay: StdDuration::from_millis(200),
        });
        let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
        let e2e = unencrypted_e2e();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = OutboundHandle::new(tx);

        // First tick starts the slow encode/send on its own task and
        // returns immediately.
        run_tick(
            &mut source,
            encoder.clone(),
            encoder_state.clone(),
            e2e.clone(),
            outbound.clone(),
            Quality::High,
        )
        .await
        .unwrap();

        // While that send is still in flight, repeated capture ticks
        // must be skipped and counted rather than queued.
        for _ in 0..5 {
            run_tick(
                &mut source,
                encoder.clone(),
                encoder_state.clone(),
                e2e.clone(),
                outbound.clone(),
                Quality::High,
            )
            .await
            .unwrap();
        }
        assert_eq!(encoder_state.lock().unwrap().skipped, 5);

        let first = rx.recv().await.expect("the in-flight tick should eventually send");
        assert!(matches!(first, Outbound::Binary(Packet::VideoFrame(_))));
        assert!(rx.try_recv().is_err(), "skipped ticks must not emit packets");

        // Once the slow send has completed, backpressure clears and a
        // fresh tick is accepted again.
        run_tick(&mut source, encoder, encoder_state.clone(), e2e, outbound, Quality::High)
            .await
            .unwrap();
        let recovered = rx.recv().await.expect("tick after recovery should send");
        assert!(matches!(recovered, Outbound::Binary(Packet::VideoFrame(_))));
        assert_eq!(encoder_state.lock().unwrap().skipped, 5);
    }
}
