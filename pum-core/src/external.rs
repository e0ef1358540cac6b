//! External-collaborator traits: the named-interface-only boundaries —
//! HTTP configuration, MQTT publish, Wi-Fi association, LCD display, the
//! RFID wire frame, and the REST firmware-discovery client. None of these
//! are implemented as real network/hardware stacks here; each gets a
//! `tracing`-backed default so the rest of the system is fully exercisable
//! without them.

use async_trait::async_trait;

use crate::config::ConfigStore;
use crate::error::{ConfigError, DiscoveryError, MqttError};

/// Names the `GET /api/getConfig` / `POST /api/setConfig` HTTP handlers
/// without this crate depending on an HTTP framework: a host binary wires
/// an implementor's `get_config_json`/`set_config_json` to its router and
/// delegates straight through to `ConfigStore`.
pub trait ConfigHttpHandler {
    fn get_config_json(&self) -> Result<String, ConfigError>;
    fn set_config_json(&mut self, patch_json: &str) -> Result<(), ConfigError>;
}

/// Thin `ConfigHttpHandler` over an owned `ConfigStore`, persisting to
/// `path` on every `setConfig` call (merge-then-persist, as `spec.md` §3
/// describes: "updated atomically by the configuration endpoint").
pub struct ConfigStoreHandler {
    store: ConfigStore,
    path: std::path::PathBuf,
}

impl ConfigStoreHandler {
    pub fn new(store: ConfigStore, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }
}

impl ConfigHttpHandler for ConfigStoreHandler {
    fn get_config_json(&self) -> Result<String, ConfigError> {
        self.store.to_json()
    }

    fn set_config_json(&mut self, patch_json: &str) -> Result<(), ConfigError> {
        let patch = serde_json::from_str(patch_json)?;
        self.store.merge(patch);
        self.store.persist(&self.path)
    }
}

/// Publish-only MQTT collaborator, at QoS 0.
#[async_trait]
pub trait MqttPublisher: Send {
    async fn connect(&mut self) -> Result<(), MqttError>;
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError>;
    fn is_connected(&self) -> bool;
}

/// Logs instead of publishing; always reports connected so callers can
/// exercise the broker-egress pipeline without a real broker.
pub struct LoggingMqttPublisher {
    connected: bool,
}

impl LoggingMqttPublisher {
    pub fn new() -> Self {
        Self { connected: true }
    }
}

impl Default for LoggingMqttPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MqttPublisher for LoggingMqttPublisher {
    async fn connect(&mut self) -> Result<(), MqttError> {
        self.connected = true;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        tracing::info!(topic, bytes = payload.len(), "publish (logging collaborator)");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Reports whether the node currently has a Wi-Fi association. Actually
/// associating is out of this crate's scope; the Server pipeline only
/// reads this.
pub trait WifiAssociation: Send {
    fn is_associated(&self) -> bool;
}

/// Always-associated stand-in, for nodes/tests that don't model Wi-Fi churn.
pub struct AlwaysAssociated;

impl WifiAssociation for AlwaysAssociated {
    fn is_associated(&self) -> bool {
        true
    }
}

/// LCD rendering collaborator. The Client pipeline calls this with the
/// human-readable status lines for each pipeline state.
pub trait Display: Send {
    fn show(&mut self, lines: &[&str]);
}

/// Routes display output through `tracing` instead of a physical panel.
pub struct LoggingDisplay;

impl Display for LoggingDisplay {
    fn show(&mut self, lines: &[&str]) {
        tracing::info!(?lines, "display (logging collaborator)");
    }
}

/// Names the RFID module's wire framing without committing this crate to
/// any specific module. `pum-core::animal_id` implements the generic
/// line/length-terminated dedup logic against raw bytes and does not
/// require an `RfidFrame` implementor to function.
pub trait RfidFrame {
    fn decode(bytes: &[u8]) -> Option<String>;
}

/// One discovered firmware release, as the (external) REST client would
/// report it.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareInfo {
    pub version: String,
    pub url: String,
    pub size_bytes: u32,
}

/// Firmware-discovery REST collaborator.
#[async_trait]
pub trait FirmwareDiscoveryClient: Send {
    async fn latest_version(&self) -> Result<Option<FirmwareInfo>, DiscoveryError>;
}

/// Reports no update available; lets OTA-triggering code paths be exercised
/// deterministically in tests.
pub struct NoUpdatesAvailable;

#[async_trait]
impl FirmwareDiscoveryClient for NoUpdatesAvailable {
    async fn latest_version(&self) -> Result<Option<FirmwareInfo>, DiscoveryError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_mqtt_publisher_reports_connected_and_succeeds() {
        let mut publisher = LoggingMqttPublisher::new();
        assert!(publisher.is_connected());
        publisher.connect().await.unwrap();
        publisher.publish("milk/pum/1/record", b"{}").await.unwrap();
    }

    #[tokio::test]
    async fn no_updates_available_reports_none() {
        let client = NoUpdatesAvailable;
        assert_eq!(client.latest_version().await.unwrap(), None);
    }

    #[test]
    fn config_http_handler_merges_and_persists_then_reports_json() {
        let dir = std::env::temp_dir().join(format!(
            "pum-core-confighandler-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut handler = ConfigStoreHandler::new(ConfigStore::default(), &path);
        handler
            .set_config_json(r#"{"mqtt_host":"broker.local","mqtt_port":1883}"#)
            .unwrap();

        assert_eq!(handler.store().mqtt_host(), Some("broker.local"));
        assert_eq!(handler.store().mqtt_port(), Some(1883));

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.mqtt_host(), Some("broker.local"));

        let json = handler.get_config_json().unwrap();
        assert!(json.contains("broker.local"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
