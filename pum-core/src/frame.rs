//! Framed bus codec: `0xAA | LEN | PAYLOAD[LEN] | CRC8 | 0x55` over a
//! half-duplex RS-485 transceiver.

use crc::{Crc, CRC_8_SMBUS};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout, Duration};

use crate::error::BusError;

const START: u8 = 0xAA;
const END: u8 = 0x55;
/// `LEN` is an 8-bit count, but bounded well below 255 to keep frame
/// allocation bounded: a declared length over this is rejected on read.
const MAX_PAYLOAD: usize = 250;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// A decoded bus frame: just the payload, the envelope having already been
/// validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

/// Computes the frame CRC-8 (polynomial 0x07, init 0x00, no reflection, no
/// final XOR) over `[0xAA, LEN, PAYLOAD...]`.
pub fn frame_crc8(len: u8, payload: &[u8]) -> u8 {
    let mut digest = CRC8.digest();
    digest.update(&[START, len]);
    digest.update(payload);
    digest.finalize()
}

/// Encodes `payload` into a complete on-wire frame. Returns `None` if the
/// payload exceeds the bounded-allocation limit.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return None;
    }
    let len = payload.len() as u8;
    let crc = frame_crc8(len, payload);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(START);
    out.push(len);
    out.extend_from_slice(payload);
    out.push(crc);
    out.push(END);
    Some(out)
}

/// Scans `reader` for a `0xAA` start byte, then reads `LEN`, the payload,
/// the CRC and the terminator, honoring `read_deadline` for the whole
/// operation. A byte sequence whose terminator is not `0x55` is reported as
/// `BadCrc`; the start byte is consumed, so scanning resumes from the next
/// byte on a subsequent call.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    read_deadline: Duration,
) -> Result<Frame, BusError> {
    timeout(read_deadline, read_frame_inner(reader))
        .await
        .map_err(|_| BusError::TimedOut)?
}

async fn read_frame_inner<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, BusError> {
    // Scan for the start byte.
    loop {
        let b = reader.read_u8().await.map_err(|_| BusError::Truncated)?;
        if b == START {
            break;
        }
    }

    let len = reader.read_u8().await.map_err(|_| BusError::Truncated)?;
    if len as usize > MAX_PAYLOAD {
        return Err(BusError::Truncated);
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| BusError::Truncated)?;

    let received_crc = reader.read_u8().await.map_err(|_| BusError::Truncated)?;
    let end = reader.read_u8().await.map_err(|_| BusError::Truncated)?;

    if end != END {
        return Err(BusError::BadCrc);
    }
    if frame_crc8(len, &payload) != received_crc {
        return Err(BusError::BadCrc);
    }

    Ok(Frame { payload })
}
