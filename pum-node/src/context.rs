//! Boot-time wiring: loads node configuration, opens the archive and bus
//! transport, and spawns the role-appropriate set of long-lived tasks.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

use pum_core::archive::{in_memory_archive, Archive};
use pum_core::bus::{BusTransport, NullDirectionControl, SerialBus};
use pum_core::config::ConfigStore;
use pum_core::external::{AlwaysAssociated, LoggingDisplay, LoggingMqttPublisher};
use pum_core::measurement::{PulseCounterHandle, PulseCounterSource};
use pum_core::ota::{FileBootloader, OtaReceiver};

use crate::client::{run_client_pipeline, AlwaysUp};
use crate::error::NodeError;
use crate::ota::{run_ota_receiver_task, trigger_ota_update as send_ota_update};
use crate::role::Role;
use crate::server::{run_broker_egress, run_bus_ingest, ServerState};

/// Baud rate for the RFID/animal-ID serial source. Not part of the node
/// configuration namespace (`spec.md` §3 only names the RS-485/Wi-Fi/MQTT
/// fields); RFID modules in this class of hardware are fixed-baud.
const RFID_BAUD: u32 = 9600;

/// Where a committed OTA image is staged on a host build, standing in for
/// the bootloader's flash partition.
const OTA_STAGING_PATH: &str = "pum-node-firmware-staging.bin";

/// Everything a running node needs, built once at startup.
pub struct NodeContext {
    pub role: Role,
    pub node_id: u32,
    pub config: ConfigStore,
    pub archive: Arc<Mutex<Archive<Vec<u8>>>>,
    pub bus: Arc<dyn BusTransport>,
}

/// Opens the configured serial port (or falls back to an unconnected
/// in-memory loopback if none is configured, so the node still boots and
/// logs rather than refusing to start).
fn open_bus(config: &ConfigStore) -> Result<Arc<dyn BusTransport>, NodeError> {
    let baud = config.rs485_baud().unwrap_or(115_200);
    match std::env::var("PUM_SERIAL_PORT") {
        Ok(path) => {
            let port = tokio_serial::new(&path, baud)
                .open_native_async()
                .map_err(|source| NodeError::BusOpen {
                    path: path.clone(),
                    source,
                })?;
            Ok(Arc::new(SerialBus::new(port, NullDirectionControl)))
        }
        Err(_) => {
            info!("PUM_SERIAL_PORT not set; running with an unconnected loopback bus");
            let (a, _b) = tokio::io::duplex(4096);
            Ok(Arc::new(SerialBus::new(a, NullDirectionControl)))
        }
    }
}

/// Opens the RFID/animal-ID byte source (a second serial port, distinct
/// from the RS-485 bus) or, absent one, reads scans from stdin so the
/// Client binary is operable from a terminal without RFID hardware
/// attached. Returns a channel the pipeline's `next_id_byte` closure polls
/// non-blockingly.
fn spawn_rfid_reader() -> Result<mpsc::UnboundedReceiver<u8>, NodeError> {
    let (tx, rx) = mpsc::unbounded_channel();
    match std::env::var("PUM_RFID_SERIAL_PORT") {
        Ok(path) => {
            let port = tokio_serial::new(&path, RFID_BAUD)
                .open_native_async()
                .map_err(|source| NodeError::RfidOpen {
                    path: path.clone(),
                    source,
                })?;
            info!(port = %path, "reading animal IDs from RFID serial port");
            tokio::spawn(pump_bytes_into(port, tx));
        }
        Err(_) => {
            info!("PUM_RFID_SERIAL_PORT not set; reading animal IDs from stdin");
            tokio::spawn(pump_bytes_into(tokio::io::stdin(), tx));
        }
    }
    Ok(rx)
}

/// Copies bytes from `io` into `tx` until either end closes.
async fn pump_bytes_into(mut io: impl AsyncReadExt + Unpin + Send + 'static, tx: mpsc::UnboundedSender<u8>) {
    let mut buf = [0u8; 64];
    loop {
        match io.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                for &b in &buf[..n] {
                    if tx.send(b).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Loads configuration, opens the bus, and builds the archive.
pub fn bootstrap(role: Role, config_path: &str) -> Result<NodeContext> {
    let config = ConfigStore::load(config_path).context("loading node configuration")?;
    let node_id = config.rs485_node_id().unwrap_or(1);
    let bus = open_bus(&config)?;
    let archive = Arc::new(Mutex::new(in_memory_archive(
        pum_core::archive::DEFAULT_STORE_BYTES,
    )));

    Ok(NodeContext {
        role,
        node_id,
        config,
        archive,
        bus,
    })
}

impl NodeContext {
    /// Operator-triggered OTA push (C8): reads `image_path` and streams it
    /// as `Header` + N `Chunk` frames over the bus. The HTTP trigger named
    /// in `spec.md` §6 is out of this crate's scope; this method is the
    /// same thing `ConfigStoreHandler` (C10) is for the config endpoint — a
    /// plain function a host-side trigger (HTTP handler, CLI flag, ...)
    /// calls directly.
    pub async fn trigger_ota_update(&self, image_path: &str, chunk_size: u16) -> Result<()> {
        let image = std::fs::read(image_path).map_err(|source| NodeError::FirmwareRead {
            path: image_path.to_string(),
            source,
        })?;
        send_ota_update(self.bus.as_ref(), &image, chunk_size).await?;
        Ok(())
    }
}

/// Spawns the node's long-lived tasks for its selected role and waits for
/// either one to end or a shutdown signal.
pub async fn run(ctx: NodeContext) -> Result<()> {
    match ctx.role {
        Role::Server => run_server(ctx).await,
        Role::Client => run_client(ctx).await,
    }
}

async fn run_server(ctx: NodeContext) -> Result<()> {
    let ingest = tokio::spawn(run_bus_ingest(ctx.bus.clone(), ctx.archive.clone()));
    let mqtt = LoggingMqttPublisher::new();
    let egress = tokio::spawn(run_broker_egress(ctx.archive.clone(), mqtt, || {
        ServerState::Online
    }));

    info!(node_id = ctx.node_id, "server node running");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        res = ingest => {
            if let Err(err) = res {
                tracing::error!(%err, "bus ingest task panicked");
            }
        }
        res = egress => {
            if let Err(err) = res {
                tracing::error!(%err, "broker egress task panicked");
            }
        }
    }
    Ok(())
}

async fn run_client(ctx: NodeContext) -> Result<()> {
    let counter = PulseCounterHandle::new();
    let measurement = PulseCounterSource::new(counter, 0.01);
    let animal_id = pum_core::animal_id::AnimalIdReader::new();
    let display = LoggingDisplay;
    let _wifi = AlwaysAssociated;

    let mut rfid_bytes = spawn_rfid_reader()?;
    let ota = tokio::spawn(run_ota_receiver_task(
        ctx.bus.clone(),
        OtaReceiver::new(),
        FileBootloader::new(OTA_STAGING_PATH),
        || {
            info!("ota image committed; exiting for the supervisor to restart on new firmware");
            std::process::exit(0);
        },
    ));

    info!(node_id = ctx.node_id, "client node running");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        res = ota => {
            if let Err(err) = res {
                tracing::error!(%err, "ota receiver task panicked");
            }
        }
        _ = run_client_pipeline(
            ctx.node_id,
            ctx.bus.clone(),
            ctx.archive.clone(),
            measurement,
            animal_id,
            display,
            AlwaysUp,
            move || rfid_bytes.try_recv().ok(),
        ) => {}
    }
    Ok(())
}
