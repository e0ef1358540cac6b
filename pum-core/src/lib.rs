//! Core engineering for the milk-metering bus firmware: the RS-485 framed
//! protocol, the record codec, the persistent archive, measurement and
//! animal-ID acquisition, the OTA sender/receiver state machines, the node
//! configuration store, and the trait boundaries to the collaborators this
//! crate leaves external (HTTP config, MQTT, Wi-Fi, display, RFID wire
//! shape, firmware discovery).
//!
//! See `DESIGN.md` at the workspace root for how each module is grounded.

pub mod animal_id;
pub mod archive;
pub mod bus;
pub mod config;
pub mod error;
pub mod external;
pub mod frame;
pub mod measurement;
pub mod ota;
pub mod record;

pub use archive::Archive;
pub use record::{Record, Status};
