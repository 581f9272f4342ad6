//! Concrete MQTT-over-TLS transport carrying Modbus-RTU framed
//! requests/responses, implementing `power_sdk_core::transport::Transport`.

pub mod config;
pub mod tls;
pub mod transport;

pub use config::MqttConfig;
pub use transport::MqttTransport;
