use std::time::Duration;

use serde::Deserialize;

/// Options accepted by the MQTT transport builder. An external config
/// loader (YAML, env, etc.) is responsible for populating this struct;
/// loading it is out of scope here.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub device_sn: String,
    /// Path to a PKCS#12 blob containing the client certificate and key.
    pub pfx_cert: Option<String>,
    pub cert_password: Option<String>,
    #[serde(default = "default_keepalive", with = "duration_secs")]
    pub keepalive: Duration,
    /// Explicitly disables TLS. The only way to permit plaintext; missing
    /// cert material without this set is a fatal configuration error.
    #[serde(default)]
    pub allow_insecure: bool,
}

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> Duration {
    Duration::from_secs(60)
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        format!("power-sdk_{}", self.device_sn)
    }

    pub fn sub_topic(&self) -> String {
        format!("PUB/{}", self.device_sn)
    }

    pub fn pub_topic(&self) -> String {
        format!("SUB/{}", self.device_sn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_and_client_id_are_bit_exact() {
        let cfg = MqttConfig {
            broker: "broker.example".to_string(),
            port: default_port(),
            device_sn: "SN123".to_string(),
            pfx_cert: None,
            cert_password: None,
            keepalive: default_keepalive(),
            allow_insecure: false,
        };
        assert_eq!(cfg.client_id(), "power-sdk_SN123");
        assert_eq!(cfg.sub_topic(), "PUB/SN123");
        assert_eq!(cfg.pub_topic(), "SUB/SN123");
    }
}
