//! OTA sender/receiver: streaming a firmware blob as `Header` + N `Chunk`
//! frames over the framed bus codec.
//!
//! Frame-type byte values, used to multiplex OTA traffic apart from record
//! traffic on the shared bus (`LEN == 20 ⇒ record`, else inspect the first
//! payload byte):
pub const FRAME_TYPE_HEADER: u8 = 0x10;
pub const FRAME_TYPE_CHUNK: u8 = 0x11;

pub mod receiver;
pub mod sender;

pub use receiver::{AcceptingBootloader, Bootloader, FileBootloader, OtaReceiver, ReceiverState};
pub use sender::{ota_send_plan, ChunkPlan, OtaSender, DEFAULT_CHUNK_SIZE, MIN_CHUNK_INTERVAL_MS};

/// The `Header` frame payload: `{type, total_size, chunk_size, total_chunks}`.
/// Multi-byte fields are pinned little-endian explicitly, rather than
/// following the sending node's native memory image, so Header/Chunk frames
/// are portable across nodes of differing endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_size: u32,
    pub chunk_size: u16,
    pub total_chunks: u16,
}

impl Header {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.push(FRAME_TYPE_HEADER);
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out.extend_from_slice(&self.total_chunks.to_le_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != 9 || payload[0] != FRAME_TYPE_HEADER {
            return None;
        }
        Some(Self {
            total_size: u32::from_le_bytes(payload[1..5].try_into().ok()?),
            chunk_size: u16::from_le_bytes(payload[5..7].try_into().ok()?),
            total_chunks: u16::from_le_bytes(payload[7..9].try_into().ok()?),
        })
    }
}

/// The `Chunk` header frame payload: `{type, chunk_index, length}`. The raw
/// chunk bytes travel in a following, separate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_index: u16,
    pub length: u16,
}

impl ChunkHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        out.push(FRAME_TYPE_CHUNK);
        out.extend_from_slice(&self.chunk_index.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != 5 || payload[0] != FRAME_TYPE_CHUNK {
            return None;
        }
        Some(Self {
            chunk_index: u16::from_le_bytes(payload[1..3].try_into().ok()?),
            length: u16::from_le_bytes(payload[3..5].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let hdr = Header {
            total_size: 260,
            chunk_size: 128,
            total_chunks: 3,
        };
        let decoded = Header::decode(&hdr.encode()).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn chunk_header_round_trips() {
        let hdr = ChunkHeader {
            chunk_index: 2,
            length: 4,
        };
        let decoded = ChunkHeader::decode(&hdr.encode()).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn twenty_byte_payload_is_never_mistaken_for_ota() {
        // A record frame is LEN=20; neither OTA decoder accepts it even if
        // byte 0 happened to equal a type tag.
        let mut payload = vec![FRAME_TYPE_HEADER; 20];
        payload[0] = FRAME_TYPE_HEADER;
        assert!(Header::decode(&payload).is_none());
        assert!(ChunkHeader::decode(&payload).is_none());
    }
}
