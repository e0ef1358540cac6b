//! Server pipeline: drains incoming bus records into the archive, and
//! drains the archive into MQTT at a rate cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{info, instrument, warn};

use pum_core::archive::{Archive, RandomAccessStore};
use pum_core::bus::BusTransport;
use pum_core::external::MqttPublisher;
use pum_core::record::{decode_record, Status};

/// Default MQTT drain interval.
pub const MQTT_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// Default bus read deadline per poll: no blocking call is permitted to
/// exceed this.
pub const BUS_READ_TIMEOUT: StdDuration = StdDuration::from_millis(100);

/// Consecutive publish failures for the same slot before it's marked
/// `Status::Error` and skipped rather than retried forever.
pub const MAX_PUBLISH_RETRIES: u32 = 5;

/// `ONLINE` / `AP_MODE`. The pipeline runs unconditionally; MQTT publishing
/// is gated on `Online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Online,
    ApMode,
}

#[derive(Serialize)]
struct MqttRecordPayload {
    pum_id: u32,
    cow_id: u32,
    timestamp: u32,
    volume: f64,
    ec: f64,
}

fn round2(v: f32) -> f64 {
    (v as f64 * 100.0).round() / 100.0
}

/// Polls `bus` for frames and archives every valid 20-byte record frame as
/// `Pending`. Non-record frames (OTA headers/chunks, anything malformed)
/// are ignored here: OTA traffic on this bus is consumed by Client nodes'
/// `crate::ota::run_ota_receiver_task`, never by the Server (the Server is
/// the one broadcasting firmware pushes, via `NodeContext::trigger_ota_update`,
/// not receiving them).
#[instrument(skip(bus, archive))]
pub async fn run_bus_ingest<B, S>(bus: Arc<B>, archive: Arc<Mutex<Archive<S>>>)
where
    B: BusTransport + ?Sized,
    S: RandomAccessStore,
{
    loop {
        match bus.read_frame(BUS_READ_TIMEOUT).await {
            Ok(frame) => {
                if frame.payload.len() == pum_core::record::RECORD_SIZE {
                    if let Some(rec) = decode_record(&frame.payload) {
                        let mut archive = archive.lock().await;
                        match archive.add(rec) {
                            Ok(index) => {
                                info!(index, client_id = rec.client_id, cow_id = rec.cow_id, "archived incoming record")
                            }
                            Err(err) => {
                                tracing::error!(%err, "archive backing store failed; halting ingest");
                                return;
                            }
                        }
                    }
                }
                // Non-20-byte frames are OTA traffic or noise; not this
                // task's concern.
            }
            Err(pum_core::error::BusError::TimedOut) => {
                // Normal idle poll; nothing arrived within the deadline.
            }
            Err(err) => {
                warn!(%err, "discarding malformed frame");
            }
        }
    }
}

/// Every [`MQTT_INTERVAL`], while `state() == Online`: publishes the next
/// pending record and marks it sent. On publish failure the slot stays
/// pending and its failure count is incremented; once a slot has failed
/// [`MAX_PUBLISH_RETRIES`] times in a row it's marked `Status::Error` and no
/// longer retried. On connection loss, `connect()` is retried before the
/// next publish attempt.
#[instrument(skip(archive, mqtt, state))]
pub async fn run_broker_egress<S, M>(
    archive: Arc<Mutex<Archive<S>>>,
    mut mqtt: M,
    state: impl Fn() -> ServerState + Send + 'static,
) where
    S: RandomAccessStore,
    M: MqttPublisher,
{
    let mut ticker = interval(MQTT_INTERVAL);
    // Keyed by (slot index, record timestamp) rather than slot index alone,
    // so a stale count can't attach itself to an unrelated record that
    // later wraps into the same slot.
    let mut failures: HashMap<(usize, u32), u32> = HashMap::new();
    loop {
        ticker.tick().await;
        if state() != ServerState::Online {
            continue;
        }

        if !mqtt.is_connected() {
            if let Err(err) = mqtt.connect().await {
                warn!(%err, "broker connect failed, will retry next interval");
                continue;
            }
        }

        let next = {
            let archive = archive.lock().await;
            archive.next_pending().ok().flatten()
        };

        let Some((index, rec)) = next else {
            continue;
        };

        let payload = MqttRecordPayload {
            pum_id: rec.client_id,
            cow_id: rec.cow_id,
            timestamp: rec.timestamp,
            volume: round2(rec.volume),
            ec: round2(rec.ec),
        };
        let topic = format!("milk/pum/{}/record", rec.client_id);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "failed to serialize record payload");
                continue;
            }
        };

        let key = (index, rec.timestamp);
        match mqtt.publish(&topic, &body).await {
            Ok(()) => {
                failures.remove(&key);
                let mut archive = archive.lock().await;
                if let Err(err) = archive.update_status(index, Status::Sent) {
                    tracing::error!(%err, "archive backing store failed; halting egress");
                    return;
                }
                info!(index, topic = %topic, "published record");
            }
            Err(err) => {
                let count = failures.entry(key).or_insert(0);
                *count += 1;
                if *count >= MAX_PUBLISH_RETRIES {
                    failures.remove(&key);
                    let mut archive = archive.lock().await;
                    if let Err(err) = archive.update_status(index, Status::Error) {
                        tracing::error!(%err, "archive backing store failed; halting egress");
                        return;
                    }
                    warn!(%err, index, "publish failed repeatedly, marking slot errored");
                } else {
                    warn!(%err, index, attempt = *count, "publish failed, record stays pending");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pum_core::archive::in_memory_archive;
    use pum_core::bus::{BusTransport, NullDirectionControl, SerialBus};
    use pum_core::error::MqttError;
    use pum_core::record::Record;
    use std::sync::Mutex as StdMutex;
    use tokio::io::duplex;

    #[derive(Default)]
    struct CountingMqtt {
        published: Vec<(String, Vec<u8>)>,
        connected: bool,
        fail_next: bool,
        fail_always: bool,
    }

    #[async_trait::async_trait]
    impl MqttPublisher for CountingMqtt {
        async fn connect(&mut self) -> Result<(), MqttError> {
            self.connected = true;
            Ok(())
        }

        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
            if self.fail_always {
                return Err(MqttError::Publish);
            }
            if self.fail_next {
                self.fail_next = false;
                return Err(MqttError::Publish);
            }
            self.published.push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[tokio::test(start_paused = true)]
    async fn egress_publishes_one_record_per_interval_and_marks_sent() {
        let archive = Arc::new(Mutex::new(in_memory_archive(4096)));
        {
            let mut a = archive.lock().await;
            a.add(Record::new(1, 100, 10, 2.0, 0.0)).unwrap();
            a.add(Record::new(1, 101, 20, 3.0, 0.0)).unwrap();
        }

        let mut mqtt = CountingMqtt {
            connected: true,
            ..Default::default()
        };
        let archive_for_task = archive.clone();
        let published = Arc::new(StdMutex::new(Vec::new()));
        let published_for_task = published.clone();

        // Drive two intervals manually via a bespoke loop instead of the
        // full task, so the test controls time deterministically.
        for _ in 0..2 {
            tokio::time::advance(MQTT_INTERVAL).await;
            let next = {
                let a = archive_for_task.lock().await;
                a.next_pending().unwrap()
            };
            if let Some((idx, rec)) = next {
                mqtt.publish("t", b"{}").await.unwrap();
                let mut a = archive_for_task.lock().await;
                a.update_status(idx, Status::Sent).unwrap();
                published_for_task.lock().unwrap().push(rec.cow_id);
            }
        }

        assert_eq!(*published.lock().unwrap(), vec![100, 101]);
        let a = archive.lock().await;
        assert!(a.next_pending().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_publish_failure_marks_slot_errored_after_bound() {
        let archive = Arc::new(Mutex::new(in_memory_archive(4096)));
        {
            let mut a = archive.lock().await;
            a.add(Record::new(1, 100, 10, 2.0, 0.0)).unwrap();
        }

        let mqtt = CountingMqtt {
            connected: true,
            fail_always: true,
            ..Default::default()
        };
        let archive_for_task = archive.clone();
        let egress = tokio::spawn(run_broker_egress(archive_for_task, mqtt, || {
            ServerState::Online
        }));

        for _ in 0..MAX_PUBLISH_RETRIES {
            tokio::time::advance(MQTT_INTERVAL).await;
            tokio::task::yield_now().await;
        }
        egress.abort();

        let a = archive.lock().await;
        let dumped = a.dump_all().unwrap();
        assert_eq!(dumped[0].1.status, Status::Error);
        assert!(a.next_pending().unwrap().is_none());
    }

    #[tokio::test]
    async fn bus_ingest_archives_valid_record_frames() {
        let (a_io, b_io) = duplex(1024);
        let sender = Arc::new(SerialBus::new(a_io, NullDirectionControl));
        let receiver = Arc::new(SerialBus::new(b_io, NullDirectionControl));
        let archive = Arc::new(Mutex::new(in_memory_archive(4096)));

        let rec = Record::new(7, 12345, 1000, 2.5, 3.25);
        let payload = pum_core::record::encode_record(&rec);
        sender.send_raw(&payload).await.unwrap();

        let archive_for_task = archive.clone();
        let ingest = tokio::spawn(run_bus_ingest(receiver, archive_for_task));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        ingest.abort();

        let a = archive.lock().await;
        let (_, found) = a.next_pending().unwrap().unwrap();
        assert_eq!(found.cow_id, 12345);
    }
}
