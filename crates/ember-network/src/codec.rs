//! Frame codec for session streams.
//!
//! ```text
//! +----------+----------+----------+
//! |  Magic   |  Length  | Checksum |
//! | 4 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+
//! |      Payload (Length bytes)    |
//! +--------------------------------+
//! ```
//!
//! Checksum is the first 4 bytes of keccak256(payload). The payload is a
//! `Message` in its `type byte || RLP` encoding.

use crate::{Message, NetworkError};
use bytes::{Buf, BufMut, BytesMut};
use ember_consensus::keccak256;
use tokio_util::codec::{Decoder, Encoder};

/// Header size: magic (4) + length (4) + checksum (4).
const HEADER_SIZE: usize = 12;

/// Maximum frame payload.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Session frame codec.
pub struct FrameCodec {
    magic: [u8; 4],
    max_size: usize,
}

impl FrameCodec {
    /// Codec for a network id; both ends derive the same magic from it.
    pub fn for_network(network_id: u64) -> Self {
        Self {
            magic: magic_for_network(network_id),
            max_size: MAX_FRAME_SIZE,
        }
    }

    fn checksum(payload: &[u8]) -> [u8; 4] {
        let digest = keccak256(payload);
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest[..4]);
        out
    }
}

/// Magic bytes: fixed prefix plus the low 16 bits of the network id.
pub fn magic_for_network(network_id: u64) -> [u8; 4] {
    [0x45, 0x4d, (network_id >> 8) as u8, network_id as u8]
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[0..4] != self.magic {
            return Err(NetworkError::InvalidMessage(format!(
                "bad magic: expected {:02x?}, got {:02x?}",
                self.magic,
                &src[0..4]
            )));
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        let checksum: [u8; 4] = [src[8], src[9], src[10], src[11]];
        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);

        if Self::checksum(&payload) != checksum {
            return Err(NetworkError::InvalidMessage(
                "Hash verification failed".to_string(),
            ));
        }

        Message::decode(&payload).map(Some)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.encode();
        if payload.len() > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&self.magic);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&Self::checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}
