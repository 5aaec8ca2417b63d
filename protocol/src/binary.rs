//! Binary packet framing: `[1 B type][4 B little-endian length][payload]`.
//!
//! This is the wire format for everything that isn't a JSON control
//! message — video frames, input events, clipboard text, file-transfer
//! chunks and regional updates. All multi-byte integers are little-endian,
//! matching spec.md §4.1.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

const TYPE_VIDEO_FRAME: u8 = 0x01;
const TYPE_INPUT_EVENT: u8 = 0x02;
const TYPE_CLIPBOARD_DATA: u8 = 0x03;
const TYPE_FILE_TRANSFER: u8 = 0x04;
const TYPE_REGIONAL_UPDATE: u8 = 0x05;

/// One region of a [`Packet::RegionalUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Left edge, in remote-screen pixels.
    pub x: u16,
    /// Top edge, in remote-screen pixels.
    pub y: u16,
    /// Width in pixels.
    pub w: u16,
    /// Height in pixels.
    pub h: u16,
    /// JPEG-encoded tile bytes.
    pub jpeg: Vec<u8>,
}

/// A decoded binary packet, tagged by its type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `0x01` — a full-frame JPEG.
    VideoFrame(Vec<u8>),
    /// `0x02` — UTF-8 JSON encoding of one input event.
    InputEvent(Vec<u8>),
    /// `0x03` — UTF-8 clipboard text.
    ClipboardData(Vec<u8>),
    /// `0x04` — one chunk of an in-flight file transfer.
    FileTransfer {
        /// ASCII transfer id, carried with a 1-byte length prefix.
        transfer_id: String,
        /// Raw chunk bytes that follow the transfer id.
        chunk: Vec<u8>,
    },
    /// `0x05` — one or more dirty-rect tiles.
    RegionalUpdate(Vec<Region>),
}

impl Packet {
    /// The wire type byte for this packet's variant.
    pub fn type_byte(&self) -> u8 {
        match self {
            Packet::VideoFrame(_) => TYPE_VIDEO_FRAME,
            Packet::InputEvent(_) => TYPE_INPUT_EVENT,
            Packet::ClipboardData(_) => TYPE_CLIPBOARD_DATA,
            Packet::FileTransfer { .. } => TYPE_FILE_TRANSFER,
            Packet::RegionalUpdate(_) => TYPE_REGIONAL_UPDATE,
        }
    }

    /// Encode the full `[type][length][payload]` frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut out = Vec::with_capacity(5 + payload.len());
        out.write_u8(self.type_byte())?;
        out.write_u32::<LittleEndian>(payload.len() as u32)?;
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Packet::VideoFrame(bytes)
            | Packet::InputEvent(bytes)
            | Packet::ClipboardData(bytes) => Ok(bytes.clone()),
            Packet::FileTransfer { transfer_id, chunk } => {
                if transfer_id.is_empty()
                    || transfer_id.len() > u8::MAX as usize
                    || !transfer_id.is_ascii()
                {
                    return Err(Error::InvalidTransferId);
                }
                let mut out = Vec::with_capacity(1 + transfer_id.len() + chunk.len());
                out.write_u8(transfer_id.len() as u8)?;
                out.extend_from_slice(transfer_id.as_bytes());
                out.extend_from_slice(chunk);
                Ok(out)
            }
            Packet::RegionalUpdate(regions) => {
                let mut out = Vec::new();
                out.write_u16::<LittleEndian>(regions.len() as u16)?;
                for region in regions {
                    out.write_u16::<LittleEndian>(region.x)?;
                    out.write_u16::<LittleEndian>(region.y)?;
                    out.write_u16::<LittleEndian>(region.w)?;
                    out.write_u16::<LittleEndian>(region.h)?;
                    out.write_u32::<LittleEndian>(region.jpeg.len() as u32)?;
                    out.extend_from_slice(&region.jpeg);
                }
                Ok(out)
            }
        }
    }

    /// Decode one frame from a buffer, requiring it to be fully consumed.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 5 {
            return Err(Error::Truncated {
                expected: 5,
                found: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let type_byte = cursor.read_u8()?;
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let remaining = buf.len() - cursor.position() as usize;
        if remaining < len {
            return Err(Error::Truncated {
                expected: len,
                found: remaining,
            });
        }
        let start = cursor.position() as usize;
        let payload = &buf[start..start + len];
        Self::decode_payload(type_byte, payload)
    }

    fn decode_payload(type_byte: u8, payload: &[u8]) -> Result<Self> {
        match type_byte {
            TYPE_VIDEO_FRAME => Ok(Packet::VideoFrame(payload.to_vec())),
            TYPE_INPUT_EVENT => Ok(Packet::InputEvent(payload.to_vec())),
            TYPE_CLIPBOARD_DATA => Ok(Packet::ClipboardData(payload.to_vec())),
            TYPE_FILE_TRANSFER => {
                if payload.is_empty() {
                    return Err(Error::InvalidTransferId);
                }
                let id_len = payload[0] as usize;
                if payload.len() < 1 + id_len {
                    return Err(Error::Truncated {
                        expected: 1 + id_len,
                        found: payload.len(),
                    });
                }
                let transfer_id = std::str::from_utf8(&payload[1..1 + id_len])
                    .map_err(|_| Error::InvalidTransferId)?
                    .to_string();
                let chunk = payload[1 + id_len..].to_vec();
                Ok(Packet::FileTransfer { transfer_id, chunk })
            }
            TYPE_REGIONAL_UPDATE => {
                let mut cursor = Cursor::new(payload);
                let count = cursor.read_u16::<LittleEndian>()?;
                let mut regions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let x = cursor.read_u16::<LittleEndian>()?;
                    let y = cursor.read_u16::<LittleEndian>()?;
                    let w = cursor.read_u16::<LittleEndian>()?;
                    let h = cursor.read_u16::<LittleEndian>()?;
                    let jpeg_size = cursor.read_u32::<LittleEndian>()? as usize;
                    let start = cursor.position() as usize;
                    if payload.len() < start + jpeg_size {
                        return Err(Error::Truncated {
                            expected: start + jpeg_size,
                            found: payload.len(),
                        });
                    }
                    let jpeg = payload[start..start + jpeg_size].to_vec();
                    cursor.set_position((start + jpeg_size) as u64);
                    regions.push(Region { x, y, w, h, jpeg });
                }
                Ok(Packet::RegionalUpdate(regions))
            }
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_round_trips() {
        let packet = Packet::VideoFrame(vec![0xFF, 0xD8, 0xFF, 0xAA]);
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], TYPE_VIDEO_FRAME);
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn file_transfer_round_trips() {
        let packet = Packet::FileTransfer {
            transfer_id: "xfer-1".into(),
            chunk: vec![1, 2, 3, 4, 5],
        };
        let encoded = packet.encode().unwrap();
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn regional_update_round_trips_multiple_regions() {
        let packet = Packet::RegionalUpdate(vec![
            Region {
                x: 0,
                y: 0,
                w: 10,
                h: 10,
                jpeg: vec![1, 2, 3],
            },
            Region {
                x: 10,
                y: 10,
                w: 5,
                h: 5,
                jpeg: vec![4, 5],
            },
        ]);
        let encoded = packet.encode().unwrap();
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let packet = Packet::VideoFrame(vec![1, 2, 3]);
        let mut encoded = packet.encode().unwrap();
        encoded.truncate(encoded.len() - 1);
        assert!(Packet::decode(&encoded).is_err());
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let buf = vec![0xEE, 0, 0, 0, 0];
        assert!(matches!(
            Packet::decode(&buf),
            Err(Error::UnknownPacketType(0xEE))
        ));
    }

    #[test]
    fn empty_transfer_id_is_rejected() {
        let packet = Packet::FileTransfer {
            transfer_id: String::new(),
            chunk: vec![],
        };
        assert!(packet.encode().is_err());
    }
}
