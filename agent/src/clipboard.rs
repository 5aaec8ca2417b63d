//! Clipboard sync: a 500 ms polling timer reads the host clipboard and
//! emits `0x03` packets; incoming `0x03` packets write back to the host,
//! relying on [`ClipboardHost::set_text`] to suppress the echo
//! (spec.md §4.5 "Clipboard").

use std::time::Duration;

use servidesk_protocol::Packet;

use crate::collaborators::ClipboardHost;
use crate::Result;

/// Polling cadence for outgoing clipboard changes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll the host clipboard once. Returns a `0x03` packet if the content
/// changed since the last poll.
pub async fn poll(host: &mut dyn ClipboardHost) -> Result<Option<Packet>> {
    match host.poll_changed().await? {
        Some(text) => Ok(Some(Packet::ClipboardData(text.into_bytes()))),
        None => Ok(None),
    }
}

/// Apply an incoming `0x03` packet to the host clipboard.
pub async fn apply_incoming(host: &mut dyn ClipboardHost, packet: &Packet) -> Result<()> {
    let Packet::ClipboardData(bytes) = packet else {
        return Err(crate::Error::Collaborator(format!(
            "expected a clipboard-data packet, got {packet:?}"
        )));
    };
    let text = String::from_utf8_lossy(bytes).into_owned();
    host.set_text(text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeClipboard {
        pending: Option<String>,
        set: Vec<String>,
    }

    #[async_trait]
    impl ClipboardHost for FakeClipboard {
        async fn poll_changed(&mut self) -> Result<Option<String>> {
            Ok(self.pending.take())
        }
        async fn set_text(&mut self, text: String) -> Result<()> {
            self.set.push(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn poll_emits_a_packet_only_when_changed() {
        let mut host = FakeClipboard::default();
        assert!(poll(&mut host).await.unwrap().is_none());

        host.pending = Some("copied text".into());
        let packet = poll(&mut host).await.unwrap().unwrap();
        assert_eq!(packet, Packet::ClipboardData(b"copied text".to_vec()));
    }

    #[tokio::test]
    async fn incoming_packet_sets_host_clipboard() {
        let mut host = FakeClipboard::default();
        let packet = Packet::ClipboardData(b"from viewer".to_vec());
        apply_incoming(&mut host, &packet).await.unwrap();
        assert_eq!(host.set, vec!["from viewer".to_string()]);
    }
}
