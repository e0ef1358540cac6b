//! Record codec: the 20-byte on-wire (and on-archive) layout of one
//! measurement. Mixed endianness is a historical wire constraint and must be
//! preserved bit-for-bit.

/// Serialized size of a [`Record`], in bytes.
pub const RECORD_SIZE: usize = 20;

/// Per-slot lifecycle status. `Error` is defined by the wire format but is
/// only ever set by the broker-egress retry exhaustion path; see DESIGN.md
/// for why that choice was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending = 0,
    Sent = 1,
    Error = 2,
}

impl Status {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Status::Pending),
            1 => Some(Status::Sent),
            2 => Some(Status::Error),
            _ => None,
        }
    }
}

/// One measurement: a milking event recorded by a Client and aggregated by
/// the Server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub client_id: u32,
    pub cow_id: u32,
    pub timestamp: u32,
    pub volume: f32,
    pub ec: f32,
    pub status: Status,
}

impl Record {
    /// A fresh record built by a Client right after a milking completes.
    /// Always starts `Pending`.
    pub fn new(client_id: u32, cow_id: u32, timestamp: u32, volume: f32, ec: f32) -> Self {
        Self {
            client_id,
            cow_id,
            timestamp,
            volume,
            ec,
            status: Status::Pending,
        }
    }
}

/// Serializes a record to its 20-byte wire/archive layout:
/// `client_id` (BE u32), `cow_id` (BE u32), `volume` (LE f32 image),
/// `timestamp` (BE u32), `ec` (LE f32 image). The status byte is not part
/// of this layout — the archive stores it separately (see `archive.rs`).
pub fn encode_record(rec: &Record) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    out[0..4].copy_from_slice(&rec.client_id.to_be_bytes());
    out[4..8].copy_from_slice(&rec.cow_id.to_be_bytes());
    out[8..12].copy_from_slice(&rec.volume.to_le_bytes());
    out[12..16].copy_from_slice(&rec.timestamp.to_be_bytes());
    out[16..20].copy_from_slice(&rec.ec.to_le_bytes());
    out
}

/// Parses a 20-byte payload into a [`Record`]. The returned record's
/// `status` is always `Pending`: this layout carries no status byte — the
/// archive layer is the one place status is tracked. Returns `None` if
/// `bytes` is not exactly [`RECORD_SIZE`] long.
pub fn decode_record(bytes: &[u8]) -> Option<Record> {
    if bytes.len() != RECORD_SIZE {
        return None;
    }
    let client_id = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let cow_id = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
    let volume = f32::from_le_bytes(bytes[8..12].try_into().ok()?);
    let timestamp = u32::from_be_bytes(bytes[12..16].try_into().ok()?);
    let ec = f32::from_le_bytes(bytes[16..20].try_into().ok()?);
    Some(Record {
        client_id,
        cow_id,
        timestamp,
        volume,
        ec,
        status: Status::Pending,
    })
}

/// Archive slots persist the status byte alongside the 20-byte record
/// layout. This is the 21-byte archive-slot encoding (distinct from the
/// 20-byte wire payload, which never carries status).
pub const ARCHIVE_SLOT_SIZE: usize = RECORD_SIZE + 1;

pub(crate) fn encode_slot(rec: &Record) -> [u8; ARCHIVE_SLOT_SIZE] {
    let mut out = [0u8; ARCHIVE_SLOT_SIZE];
    out[..RECORD_SIZE].copy_from_slice(&encode_record(rec));
    out[RECORD_SIZE] = rec.status as u8;
    out
}

/// Decodes an archive slot. A slot whose status byte is out of `{0,1,2}` is
/// still treated as syntactically valid by `dump_all`'s contract: a
/// zero-initialized, never-written slot decodes with `status = Pending`.
pub(crate) fn decode_slot(bytes: &[u8]) -> Option<Record> {
    if bytes.len() != ARCHIVE_SLOT_SIZE {
        return None;
    }
    let mut rec = decode_record(&bytes[..RECORD_SIZE])?;
    rec.status = Status::from_u8(bytes[RECORD_SIZE]).unwrap_or(Status::Pending);
    Some(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_bit_exact() {
        let rec = Record::new(7, 12345, 1000, 2.5, 3.25);
        let bytes = encode_record(&rec);
        let decoded = decode_record(&bytes).unwrap();
        assert_eq!(decoded.client_id, rec.client_id);
        assert_eq!(decoded.cow_id, rec.cow_id);
        assert_eq!(decoded.timestamp, rec.timestamp);
        assert_eq!(decoded.volume.to_bits(), rec.volume.to_bits());
        assert_eq!(decoded.ec.to_bits(), rec.ec.to_bits());
    }

    #[test]
    fn zero_volume_is_legal() {
        let rec = Record::new(1, 2, 3, 0.0, 0.0);
        let bytes = encode_record(&rec);
        let decoded = decode_record(&bytes).unwrap();
        assert_eq!(decoded.volume, 0.0);
    }

    #[test]
    fn wrong_length_does_not_decode() {
        assert!(decode_record(&[0u8; 19]).is_none());
        assert!(decode_record(&[0u8; 21]).is_none());
    }

    #[test]
    fn slot_round_trip_preserves_status() {
        let mut rec = Record::new(1, 2, 3, 1.5, 0.0);
        rec.status = Status::Sent;
        let slot = encode_slot(&rec);
        let decoded = decode_slot(&slot).unwrap();
        assert_eq!(decoded.status, Status::Sent);
    }

    #[test]
    fn zero_initialized_slot_decodes_as_valid_pending() {
        let slot = [0u8; ARCHIVE_SLOT_SIZE];
        let decoded = decode_slot(&slot).unwrap();
        assert_eq!(decoded.status, Status::Pending);
        assert_eq!(decoded.volume, 0.0);
    }
}
