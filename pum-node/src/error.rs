//! Node-level error taxonomy, for the boot-time and operator-triggered
//! paths that `anyhow::Context` wraps in `context.rs`/`main.rs`. Each
//! variant converts into `anyhow::Error` automatically through `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("opening RS-485 bus serial port {path}: {source}")]
    BusOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("opening RFID serial port {path}: {source}")]
    RfidOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reading firmware image {path}: {source}")]
    FirmwareRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sending OTA frame failed: {0}")]
    OtaSend(#[from] pum_core::error::BusError),
}
