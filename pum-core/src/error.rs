//! Error taxonomy, one enum per component. None of these implement `From`
//! into each other: a task is its own supervision domain and recovers
//! locally instead of bubbling an error into a neighboring component's
//! domain.

use thiserror::Error;

/// Errors from the framed bus codec. All are transient; the caller
/// discards the frame and resumes scanning.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BusError {
    #[error("no frame arrived before the read deadline")]
    TimedOut,
    #[error("frame CRC did not validate, or terminator byte was not 0x55")]
    BadCrc,
    #[error("frame ended before all declared payload bytes arrived")]
    Truncated,
    #[error("a send is already in progress")]
    Busy,
}

/// Errors from the archive. I/O failures on the non-volatile backing are
/// treated as fatal: the node should halt so a watchdog can recover it.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive backing store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("slot index {0} is out of range")]
    OutOfRange(usize),
}

/// Errors from the configuration store. I/O is fatal; a malformed JSON
/// document is reported rather than silently discarded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config backing store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the MQTT publisher collaborator. Both are retried on the
/// next broker-egress cycle up to a bounded count before the slot is marked
/// errored; neither blocks other tasks.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MqttError {
    #[error("could not connect to the broker")]
    Connect,
    #[error("publish was rejected by the broker")]
    Publish,
}

/// Errors from the OTA sender/receiver. Either aborts the current session;
/// the node remains on its current firmware.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum OtaError {
    #[error("a chunk was missing when the session's chunk count was reached")]
    ChunkDropped,
    #[error("writing the staging file failed")]
    FlashWrite,
    #[error("no OTA session is in progress")]
    NoSession,
}

/// Errors from the firmware-discovery REST collaborator.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DiscoveryError {
    #[error("firmware discovery request failed")]
    RequestFailed,
}
