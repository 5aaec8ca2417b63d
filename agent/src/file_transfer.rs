//! Incoming file transfers: `file_offer` prompts the user-facing
//! collaborator for a save path, `0x04` chunks matching the accepted
//! `transfer_id` are accumulated in memory, and `file_complete` flushes
//! them to disk. A rejected offer, or a chunk for an unknown transfer,
//! ends with `file_error` instead.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use servidesk_protocol::{FileOfferPayload, Packet};

use crate::{Error, Result};

/// Asks a human whether to accept an incoming file and, if so, where to
/// save it.
#[async_trait]
pub trait SavePathPrompt: Send + Sync {
    /// Returns the destination path to accept the offer, or `None` to
    /// reject it.
    async fn prompt(&mut self, file_name: &str, file_size: u64) -> Option<PathBuf>;
}

/// One in-flight incoming transfer: an accepted offer accumulating
/// chunks until `file_complete` arrives.
pub struct IncomingTransfer {
    transfer_id: String,
    destination: PathBuf,
    received: Vec<u8>,
}

impl IncomingTransfer {
    /// The transfer id this instance is accumulating chunks for.
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// Append one chunk if its `transfer_id` matches this transfer.
    pub fn accept_chunk(&mut self, packet: &Packet) -> Result<()> {
        match packet {
            Packet::FileTransfer { transfer_id, chunk } if transfer_id == &self.transfer_id => {
                self.received.extend_from_slice(chunk);
                Ok(())
            }
            Packet::FileTransfer { transfer_id, .. } => Err(Error::Collaborator(format!(
                "chunk for transfer {transfer_id}, expected {}",
                self.transfer_id
            ))),
            other => Err(Error::Collaborator(format!(
                "expected a file-transfer packet, got {other:?}"
            ))),
        }
    }

    /// Write everything received so far to the destination path.
    pub async fn flush(self) -> Result<PathBuf> {
        let mut file = fs::File::create(&self.destination).await?;
        file.write_all(&self.received).await?;
        file.flush().await?;
        Ok(self.destination)
    }
}

/// Strip path separators and leading dots from an offered file name so
/// the save path can't escape the chosen directory (spec.md §4.5 "Safe
/// filename").
pub fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Begin tracking an accepted offer, resolving the sanitized file name
/// against the chosen save directory.
pub fn begin(offer: &FileOfferPayload, save_dir: &std::path::Path) -> IncomingTransfer {
    IncomingTransfer {
        transfer_id: offer.transfer_id.clone(),
        destination: save_dir.join(sanitize_file_name(&offer.file_name)),
        received: Vec::with_capacity(offer.file_size.min(16 * 1024 * 1024) as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_separators_out_of_the_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_file_name("C:\\Windows\\evil.exe"), "C:Windowsevil.exe");
        assert_eq!(sanitize_file_name("///"), "download");
    }

    #[test]
    fn accumulates_matching_chunks_and_flushes() {
        let offer = FileOfferPayload {
            transfer_id: "xfer-1".into(),
            file_name: "notes.txt".into(),
            file_size: 10,
        };
        let dir = std::env::temp_dir().join(format!("servidesk-xfer-{:x}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut transfer = begin(&offer, &dir);
        transfer
            .accept_chunk(&Packet::FileTransfer {
                transfer_id: "xfer-1".into(),
                chunk: b"hello ".to_vec(),
            })
            .unwrap();
        transfer
            .accept_chunk(&Packet::FileTransfer {
                transfer_id: "xfer-1".into(),
                chunk: b"world".to_vec(),
            })
            .unwrap();

        let path = tokio_test_block_on(transfer.flush());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
    }

    #[test]
    fn rejects_chunk_for_a_different_transfer() {
        let offer = FileOfferPayload {
            transfer_id: "xfer-1".into(),
            file_name: "notes.txt".into(),
            file_size: 10,
        };
        let dir = std::env::temp_dir();
        let mut transfer = begin(&offer, &dir);
        let result = transfer.accept_chunk(&Packet::FileTransfer {
            transfer_id: "xfer-2".into(),
            chunk: vec![1],
        });
        assert!(result.is_err());
    }

    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
