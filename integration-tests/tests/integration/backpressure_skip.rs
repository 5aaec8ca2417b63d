//! Scenario 6: while a send is in flight, further capture ticks are
//! skipped rather than queued, and the skip count is exposed for
//! diagnostics instead of silently dropped. Driven through the real
//! `servidesk_agent::streaming::run_tick` / detached send-task split
//! rather than poking `EncoderState` directly, so the test actually
//! exercises the wiring a slow encoder and a backed-up transport hit in
//! the live client loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use servidesk_agent::collaborators::{CapturedFrame, FrameSource, JpegEncoder};
use servidesk_agent::transport::{Outbound, OutboundHandle};
use servidesk_agent::E2eSession;
use servidesk_protocol::{DirtyRegion, EncoderState, Packet, Quality};

struct FixedSource {
    frame: CapturedFrame,
}

#[async_trait]
impl FrameSource for FixedSource {
    async fn capture(&mut self) -> servidesk_agent::Result<Option<CapturedFrame>> {
        Ok(Some(self.frame.clone()))
    }
    async fn switch_monitor(&mut self, _monitor_index: u32) -> servidesk_agent::Result<()> {
        Ok(())
    }
    fn screen_size(&self) -> (u16, u16) {
        (self.frame.width, self.frame.height)
    }
    fn monitor_index(&self) -> u32 {
        0
    }
}

/// An encoder that blocks the calling thread for a fixed delay before
/// returning, simulating a slow hardware/software encode.
struct SlowEncoder {
    delay: Duration,
}

impl JpegEncoder for SlowEncoder {
    fn encode_full(
        &self,
        _frame: &CapturedFrame,
        _quality: Quality,
    ) -> servidesk_agent::Result<Vec<u8>> {
        std::thread::sleep(self.delay);
        Ok(vec![0xFF, 0xD8, 0xFF])
    }
    fn encode_region(
        &self,
        _frame: &CapturedFrame,
        _region: &DirtyRegion,
        _quality: Quality,
    ) -> servidesk_agent::Result<Vec<u8>> {
        std::thread::sleep(self.delay);
        Ok(vec![0xAA])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_slow_send_holds_off_capture_ticks_until_it_completes() {
    let mut source = FixedSource {
        frame: CapturedFrame {
            bgra: vec![0; 64],
            width: 1920,
            height: 1080,
            dirty: vec![],
        },
    };
    let encoder: Arc<dyn JpegEncoder> = Arc::new(SlowEncoder {
        delay: Duration::from_millis(200),
    });
    let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
    let e2e = Arc::new(Mutex::new(Some(E2eSession::start())));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outbound = OutboundHandle::new(tx);

    // This tick's encode+seal+enqueue is handed to a detached task and
    // takes 200ms; run_tick itself returns immediately.
    servidesk_agent::streaming::run_tick(
        &mut source,
        encoder.clone(),
        encoder_state.clone(),
        e2e.clone(),
        outbound.clone(),
        Quality::High,
    )
    .await
    .unwrap();

    // Five more capture iterations land while that send is still in
    // flight; all five must be skipped and counted, and none may emit
    // a packet of their own.
    for _ in 0..5 {
        servidesk_agent::streaming::run_tick(
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
    assert!(rx.try_recv().is_err(), "no packet should have been sent yet");

    let sent = rx
        .recv()
        .await
        .expect("the original in-flight tick should eventually send its packet");
    assert!(matches!(sent, Outbound::Binary(Packet::VideoFrame(_))));
    assert!(
        rx.try_recv().is_err(),
        "skipped ticks must not have queued packets of their own"
    );

    // Backpressure has cleared; a fresh tick sends normally again.
    servidesk_agent::streaming::run_tick(
        &mut source,
        encoder,
        encoder_state.clone(),
        e2e,
        outbound,
        Quality::High,
    )
    .await
    .unwrap();
    let recovered = rx.recv().await.expect("tick after recovery should send");
    assert!(matches!(recovered, Outbound::Binary(Packet::VideoFrame(_))));
    assert_eq!(encoder_state.lock().unwrap().skipped, 5);
}
