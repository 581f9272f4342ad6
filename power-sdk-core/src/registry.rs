use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::DeviceModel;
use crate::error::DeviceError;
use crate::parser::BlockParser;
use crate::profile::DeviceProfile;
use crate::protocol::ProtocolCodec;
use crate::transport::Transport;

pub type TransportBuilder = dyn Fn() -> Result<Arc<dyn Transport>, DeviceError> + Send + Sync;
pub type ProtocolBuilder = dyn Fn() -> Arc<dyn ProtocolCodec> + Send + Sync;

/// Creates transport instances by transport key (e.g. `"mqtt"`).
#[derive(Default)]
pub struct TransportFactory {
    builders: Mutex<HashMap<String, Arc<TransportBuilder>>>,
}

impl TransportFactory {
    pub fn new() -> Self {
        TransportFactory::default()
    }

    pub fn register(&self, key: impl Into<String>, builder: Arc<TransportBuilder>) {
        self.builders
            .lock()
            .expect("transport factory poisoned")
            .insert(key.into(), builder);
    }

    pub fn create(&self, key: &str) -> Result<Arc<dyn Transport>, DeviceError> {
        let builders = self.builders.lock().expect("transport factory poisoned");
        let builder = builders.get(key).ok_or_else(|| DeviceError::UnknownTransport {
            key: key.to_string(),
            available: available_keys(&builders),
        })?;
        builder()
    }

    pub fn list_transports(&self) -> Vec<String> {
        sorted_keys(&self.builders.lock().expect("transport factory poisoned"))
    }
}

/// Creates protocol layer instances by protocol key (e.g. `"modbus-rtu"`).
#[derive(Default)]
pub struct ProtocolFactory {
    builders: Mutex<HashMap<String, Arc<ProtocolBuilder>>>,
}

impl ProtocolFactory {
    pub fn new() -> Self {
        ProtocolFactory::default()
    }

    pub fn register(&self, key: impl Into<String>, builder: Arc<ProtocolBuilder>) {
        self.builders
            .lock()
            .expect("protocol factory poisoned")
            .insert(key.into(), builder);
    }

    pub fn create(&self, key: &str) -> Result<Arc<dyn ProtocolCodec>, DeviceError> {
        let builders = self.builders.lock().expect("protocol factory poisoned");
        let builder = builders.get(key).ok_or_else(|| DeviceError::UnknownProtocol {
            key: key.to_string(),
            available: available_keys(&builders),
        })?;
        Ok(builder())
    }

    pub fn list_protocols(&self) -> Vec<String> {
        sorted_keys(&self.builders.lock().expect("protocol factory poisoned"))
    }
}

fn available_keys<V>(builders: &HashMap<String, V>) -> String {
    let mut keys: Vec<&str> = builders.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys.join(", ")
}

fn sorted_keys<V>(builders: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = builders.keys().cloned().collect();
    keys.sort();
    keys
}

/// Declared capabilities of a vendor/protocol plugin. Defaults are
/// conservative (`supports_write = false`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PluginCapabilities {
    pub supports_write: bool,
    pub supports_streaming: bool,
    pub requires_device_validation_for_write: bool,
}

impl Default for PluginCapabilities {
    fn default() -> Self {
        PluginCapabilities {
            supports_write: false,
            supports_streaming: true,
            requires_device_validation_for_write: true,
        }
    }
}

impl PluginCapabilities {
    /// `force` skips the device-validation requirement; it never bypasses
    /// `supports_write = false`.
    pub fn can_write(&self, force: bool) -> bool {
        if !self.supports_write {
            return false;
        }
        force || !self.requires_device_validation_for_write
    }
}

/// Immutable descriptor binding a vendor/protocol label to its factory
/// hooks and declared capabilities.
pub struct PluginManifest {
    pub vendor: String,
    pub protocol: String,
    pub version: String,
    pub description: String,
    pub profile_ids: Vec<String>,
    pub transport_keys: Vec<String>,
    pub schema_pack_version: String,
    pub capabilities: PluginCapabilities,
    pub parser_factory: Option<Arc<dyn Fn() -> BlockParser + Send + Sync>>,
    pub protocol_layer_factory: Option<Arc<dyn Fn() -> Arc<dyn ProtocolCodec> + Send + Sync>>,
    pub profile_loader: Option<Arc<dyn Fn(&str) -> Option<DeviceProfile> + Send + Sync>>,
    /// Optional callback run immediately after client construction to
    /// register block handlers on the device model.
    pub handler_loader: Option<Arc<dyn Fn(&DeviceModel, &DeviceProfile) + Send + Sync>>,
}

impl PluginManifest {
    /// Canonical plugin key: `"<vendor>/<protocol>"`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.vendor, self.protocol)
    }

    pub fn can_write(&self, force: bool) -> bool {
        self.capabilities.can_write(force)
    }
}

/// Indexes plugin manifests by their canonical key. Broken plugins are a
/// caller concern (logged and skipped at discovery time); this registry
/// only stores what it is given.
#[derive(Default)]
pub struct PluginRegistry {
    manifests: Mutex<HashMap<String, Arc<PluginManifest>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn register(&self, manifest: PluginManifest) {
        let key = manifest.key();
        self.manifests
            .lock()
            .expect("plugin registry poisoned")
            .insert(key, Arc::new(manifest));
    }

    pub fn get(&self, key: &str) -> Option<Arc<PluginManifest>> {
        self.manifests
            .lock()
            .expect("plugin registry poisoned")
            .get(key)
            .cloned()
    }

    pub fn list_keys(&self) -> Vec<String> {
        sorted_keys(&self.manifests.lock().expect("plugin registry poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_write_requires_both_flags() {
        let caps = PluginCapabilities {
            supports_write: false,
            supports_streaming: true,
            requires_device_validation_for_write: true,
        };
        assert!(!caps.can_write(true));

        let caps = PluginCapabilities {
            supports_write: true,
            supports_streaming: true,
            requires_device_validation_for_write: true,
        };
        assert!(!caps.can_write(false));
        assert!(caps.can_write(true));
    }

    #[test]
    fn unknown_transport_lists_available_keys() {
        let factory = TransportFactory::new();
        let err = factory.create("mqtt").unwrap_err();
        match err {
            DeviceError::UnknownTransport { key, .. } => assert_eq!(key, "mqtt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
