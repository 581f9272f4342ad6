//! Protocol-agnostic client SDK core: schema model, declarative block
//! parser, Modbus-RTU codec, retry policy, device model, and client
//! orchestrator. Transport-agnostic; see `power-sdk-mqtt` for the
//! concrete MQTT-over-TLS transport.

#[cfg(feature = "async")]
pub mod async_client;
pub mod client;
pub mod datatype;
pub mod device;
pub mod error;
pub mod parser;
pub mod profile;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod transform;
pub mod transport;

pub use client::Client;
pub use device::DeviceModel;
pub use error::SdkError;
pub use parser::BlockParser;
pub use profile::DeviceProfile;
pub use record::{ParsedRecord, Value};
pub use retry::RetryPolicy;
pub use schema::BlockSchema;
pub use transport::Transport;
