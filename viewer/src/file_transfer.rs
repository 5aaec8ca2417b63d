//! Outgoing file transfers (spec.md §4.6 "File transfer (outgoing)"):
//! offer, await acceptance, stream `0x04` chunks of at most
//! `FILE_CHUNK_MAX_BYTES` with a short inter-chunk sleep for
//! backpressure, then `file_complete`.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use uuid::Uuid;

use servidesk_protocol::{
    FileCompletePayload, FileOfferPayload, Packet, FILE_CHUNK_MAX_BYTES,
};

use crate::Result;

/// Sleep between successive outgoing chunks, giving the relay and the
/// agent's socket time to drain (spec.md "~10 ms inter-chunk sleep").
pub const INTER_CHUNK_SLEEP: Duration = Duration::from_millis(10);

/// Build the `file_offer` envelope payload for a file about to be sent,
/// generating a fresh transfer id.
pub fn offer(file_name: &str, file_size: u64) -> FileOfferPayload {
    FileOfferPayload {
        transfer_id: Uuid::new_v4().simple().to_string(),
        file_name: file_name.to_string(),
        file_size,
    }
}

/// Read one file from disk and split it into `0x04` chunk packets
/// followed by a `file_complete` payload, sleeping between chunks.
/// Returns the chunk packets plus the completion payload; the caller
/// sends each in turn through the transport, honoring
/// [`INTER_CHUNK_SLEEP`] between them.
pub async fn read_chunks(
    path: &std::path::Path,
    transfer_id: &str,
) -> Result<(Vec<Packet>, FileCompletePayload)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; FILE_CHUNK_MAX_BYTES];
    let mut chunks = Vec::new();
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        chunks.push(Packet::FileTransfer {
            transfer_id: transfer_id.to_string(),
            chunk: buf[..n].to_vec(),
        });
    }
    Ok((
        chunks,
        FileCompletePayload {
            transfer_id: transfer_id.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_file_into_chunks_and_reports_completion() {
        let dir = std::env::temp_dir()
            .join(format!("servidesk-outgoing-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("report.txt");
        tokio::fs::write(&path, b"a small file").await.unwrap();

        let (chunks, complete) = read_chunks(&path, "xfer-9").await.unwrap();
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Packet::FileTransfer { transfer_id, chunk } => {
                assert_eq!(transfer_id, "xfer-9");
                assert_eq!(chunk, b"a small file");
            }
            other => panic!("expected a file transfer chunk, got {other:?}"),
        }
        assert_eq!(complete.transfer_id, "xfer-9");
    }

    #[test]
    fn offer_generates_a_fresh_transfer_id_each_call() {
        let a = offer("x.txt", 10);
        let b = offer("x.txt", 10);
        assert_ne!(a.transfer_id, b.transfer_id);
    }
}
