//! OTA receiver: reassembles `Header` + `Chunk` frames into a staging
//! buffer and hands it to the bootloader once complete.

use super::{ChunkHeader, Header};
use crate::error::OtaError;

/// Bootloader collaborator: commits a completed staging image and reports
/// whether it was accepted. Real hardware would flash this and reboot; the
/// `OtaReceiver` itself does not reboot — rebooting on success is the
/// caller's job, not a hidden side effect here.
pub trait Bootloader {
    fn commit(&mut self, image: &[u8]) -> Result<(), OtaError>;
}

/// Accepts every image; used in tests and as the default until real
/// hardware is wired in.
pub struct AcceptingBootloader;

impl Bootloader for AcceptingBootloader {
    fn commit(&mut self, _image: &[u8]) -> Result<(), OtaError> {
        Ok(())
    }
}

/// Commits a completed image by writing it to a staging file path. Stands
/// in for a real bootloader's flash-write API on a host build: the node
/// process is expected to reboot itself after a successful `commit`, since
/// there is no physical bootloader to hand the image to here.
pub struct FileBootloader {
    path: std::path::PathBuf,
}

impl FileBootloader {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Bootloader for FileBootloader {
    fn commit(&mut self, image: &[u8]) -> Result<(), OtaError> {
        std::fs::write(&self.path, image).map_err(|_| OtaError::FlashWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Receiving,
}

/// Per-session staging state. Uses a plain in-memory buffer sized to
/// `total_size`; a real node would seek/write into a staging file instead.
pub struct OtaReceiver {
    state: ReceiverState,
    header: Option<Header>,
    staging: Vec<u8>,
    received_chunks: u16,
}

impl OtaReceiver {
    pub fn new() -> Self {
        Self {
            state: ReceiverState::Idle,
            header: None,
            staging: Vec::new(),
            received_chunks: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// `IDLE + Header` or `RECEIVING + Header` → (re)opens staging and
    /// transitions to `Receiving`. A `Header` seen mid-session aborts the
    /// current one and starts fresh: re-issuing a Header is always
    /// equivalent to a fresh start.
    pub fn on_header(&mut self, header: Header) {
        self.header = Some(header);
        self.staging = vec![0u8; header.total_size as usize];
        self.received_chunks = 0;
        self.state = ReceiverState::Receiving;
    }

    /// `RECEIVING + Chunk(i, len)` → writes at `i * chunk_size` and
    /// increments the received count. A `Chunk` seen in `Idle` is dropped.
    pub fn on_chunk(&mut self, chunk: ChunkHeader, data: &[u8]) -> Result<(), OtaError> {
        if self.state != ReceiverState::Receiving {
            return Ok(());
        }
        let header = self.header.ok_or(OtaError::NoSession)?;
        let offset = chunk.chunk_index as usize * header.chunk_size as usize;
        let end = offset + data.len();
        if end > self.staging.len() {
            return Err(OtaError::FlashWrite);
        }
        self.staging[offset..end].copy_from_slice(data);
        self.received_chunks += 1;
        Ok(())
    }

    /// True once every chunk named by the header has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.header, Some(h) if self.received_chunks == h.total_chunks)
    }

    /// `RECEIVING + received == total_chunks` → hands the staging buffer to
    /// `bootloader`. On success the receiver returns to `Idle` and the
    /// caller reboots; on failure it also returns to `Idle` and the node
    /// remains on current firmware.
    pub fn finish(&mut self, bootloader: &mut impl Bootloader) -> Result<(), OtaError> {
        if !self.is_complete() {
            self.state = ReceiverState::Idle;
            return Err(OtaError::ChunkDropped);
        }
        let result = bootloader.commit(&self.staging);
        self.state = ReceiverState::Idle;
        result
    }
}

impl Default for OtaReceiver {
    fn default() -> Self {
        Self::new()
    }
}
