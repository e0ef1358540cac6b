//! Wires the C8/C9 OTA state machines in `pum_core::ota` onto a running
//! node's bus: a receiver task the Client runs continuously, and a
//! one-shot sender the Server runs when an operator triggers a push.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use pum_core::bus::BusTransport;
use pum_core::error::BusError;
use pum_core::ota::{
    Bootloader, ChunkHeader, ChunkPlan, Header, OtaReceiver, OtaSender, ReceiverState,
    FRAME_TYPE_CHUNK, FRAME_TYPE_HEADER, MIN_CHUNK_INTERVAL_MS,
};

use crate::error::NodeError;

/// How long one poll for the next OTA-relevant frame waits before giving
/// the loop a chance to re-check for shutdown; same order of magnitude as
/// the Server's bus-ingest poll.
const OTA_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Runs until a firmware image is fully received and committed, feeding
/// every non-record frame on `bus` into `receiver`. A `Chunk` frame arrives
/// as two frames in sequence (the `ChunkHeader`, then a frame carrying the
/// raw bytes); this task holds the header across that gap. On a completed
/// session, commits via `bootloader` and calls `on_committed` — production
/// wiring passes a reboot (the node has no firmware left to serve once its
/// image has changed); tests pass an observer instead.
#[instrument(skip(bus, receiver, bootloader, on_committed))]
pub async fn run_ota_receiver_task<B, L>(
    bus: Arc<B>,
    mut receiver: OtaReceiver,
    mut bootloader: L,
    on_committed: impl FnOnce() + Send,
) where
    B: BusTransport + ?Sized,
    L: Bootloader,
{
    let mut pending_chunk: Option<ChunkHeader> = None;

    loop {
        match bus.read_frame(OTA_READ_TIMEOUT).await {
            Ok(frame) => {
                if frame.payload.len() == pum_core::record::RECORD_SIZE {
                    // Record traffic is the Server's bus-ingest concern, not
                    // ours; ignore it.
                    continue;
                }

                if let Some(chunk_header) = pending_chunk.take() {
                    if let Err(err) = receiver.on_chunk(chunk_header, &frame.payload) {
                        warn!(%err, "ota chunk write failed");
                    }
                } else if frame.payload.first() == Some(&FRAME_TYPE_HEADER) {
                    if let Some(header) = Header::decode(&frame.payload) {
                        info!(
                            total_size = header.total_size,
                            chunk_size = header.chunk_size,
                            total_chunks = header.total_chunks,
                            "ota header received, starting session"
                        );
                        receiver.on_header(header);
                    }
                } else if frame.payload.first() == Some(&FRAME_TYPE_CHUNK) {
                    if let Some(chunk_header) = ChunkHeader::decode(&frame.payload) {
                        pending_chunk = Some(chunk_header);
                    }
                }
                // Anything else is unrecognized frame traffic; discarded.

                if receiver.state() == ReceiverState::Receiving && receiver.is_complete() {
                    match receiver.finish(&mut bootloader) {
                        Ok(()) => {
                            info!("ota image committed");
                            on_committed();
                            return;
                        }
                        Err(err) => {
                            warn!(%err, "ota session aborted at completion check");
                        }
                    }
                }
            }
            Err(BusError::TimedOut) => {}
            Err(err) => {
                warn!(%err, "discarding malformed frame while awaiting ota traffic");
            }
        }
    }
}

/// Drives an `OtaSender`'s full plan over `bus`: one `Header` frame, then
/// for each chunk a `ChunkHeader` frame immediately followed by a frame of
/// raw chunk bytes, paced by `MIN_CHUNK_INTERVAL_MS` between chunks. No
/// acknowledgements are expected — best-effort broadcast, per spec.
#[instrument(skip(bus, image))]
pub async fn trigger_ota_update<B>(
    bus: &B,
    image: &[u8],
    chunk_size: u16,
) -> Result<(), NodeError>
where
    B: BusTransport + ?Sized,
{
    let mut sender = OtaSender::new(image, chunk_size);
    let total_chunks = sender.total_chunks();
    info!(total_chunks, bytes = image.len(), "starting ota push");

    while let Some(step) = sender.next_step() {
        match step {
            ChunkPlan::Header(header) => {
                bus.send_raw(&header.encode()).await?;
            }
            ChunkPlan::Chunk { header, data } => {
                bus.send_raw(&header.encode()).await?;
                bus.send_raw(data).await?;
                tokio::time::sleep(Duration::from_millis(MIN_CHUNK_INTERVAL_MS)).await;
            }
        }
    }

    info!("ota push complete");
    Ok(())
}
