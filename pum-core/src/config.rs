//! Node configuration store: a flat key/value namespace, read once at boot,
//! updated atomically by the (external) HTTP configuration endpoint.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A config value keeps its wire type across a JSON round-trip: most
/// fields are strings, but `rs485_baud` and `mqtt_port` are integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    U32(u32),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            ConfigValue::U32(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ConfigValue::U32(n) => Some(*n),
            ConfigValue::Text(s) => s.parse().ok(),
        }
    }
}

/// The node configuration namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigStore {
    values: HashMap<String, ConfigValue>,
}

macro_rules! str_accessor {
    ($name:ident, $key:literal) => {
        pub fn $name(&self) -> Option<&str> {
            self.get($key).and_then(ConfigValue::as_str)
        }
    };
}

macro_rules! u32_accessor {
    ($name:ident, $key:literal) => {
        pub fn $name(&self) -> Option<u32> {
            self.get($key).and_then(ConfigValue::as_u32)
        }
    };
}

impl ConfigStore {
    /// Loads the namespace from `path`, or returns an empty store if the
    /// file does not exist yet (first boot).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        let store = serde_json::from_slice(&bytes)?;
        Ok(store)
    }

    /// Persists the namespace to `path`, overwriting it.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }

    /// Merges a JSON subset into the namespace, as the `POST /api/setConfig`
    /// handler does.
    pub fn merge(&mut self, patch: HashMap<String, ConfigValue>) {
        self.values.extend(patch);
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    str_accessor!(wifi_ssid, "wifi_ssid");
    str_accessor!(wifi_password, "wifi_password");
    u32_accessor!(rs485_node_id, "rs485_node_id");
    u32_accessor!(rs485_baud, "rs485_baud");
    str_accessor!(mqtt_host, "mqtt_host");
    u32_accessor!(mqtt_port, "mqtt_port");
    str_accessor!(mqtt_user, "mqtt_user");
    str_accessor!(mqtt_password, "mqtt_password");
    str_accessor!(rest_base_url, "rest_base_url");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default_store() {
        let store = ConfigStore::load("/nonexistent/path/for/pum-core-tests.json").unwrap();
        assert!(store.rs485_baud().is_none());
    }

    #[test]
    fn merge_then_persist_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("pum-core-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut store = ConfigStore::default();
        let mut patch = HashMap::new();
        patch.insert("rs485_baud".to_string(), ConfigValue::U32(115200));
        patch.insert("mqtt_host".to_string(), ConfigValue::Text("broker.local".into()));
        store.merge(patch);
        store.persist(&path).unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.rs485_baud(), Some(115200));
        assert_eq!(reloaded.mqtt_host(), Some("broker.local"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
