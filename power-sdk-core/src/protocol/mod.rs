pub mod modbus;

use std::time::Duration;

use crate::transport::Transport;
use modbus::{NormalizedPayload, ReadBlockError};

/// A protocol layer binds a wire framing/CRC scheme to an opaque
/// `Transport`. `ProtocolFactory` resolves implementations by key (e.g.
/// `"modbus-rtu"`).
pub trait ProtocolCodec: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn read_block(
        &self,
        transport: &dyn Transport,
        device_address: u8,
        block_address: u16,
        block_id: u32,
        register_count: u16,
        protocol_version: Option<u32>,
        timeout: Duration,
    ) -> Result<NormalizedPayload, ReadBlockError>;
}

/// The Modbus-RTU protocol layer, implemented by the free functions in
/// `modbus.rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModbusCodec;

impl ProtocolCodec for ModbusCodec {
    fn read_block(
        &self,
        transport: &dyn Transport,
        device_address: u8,
        block_address: u16,
        block_id: u32,
        register_count: u16,
        protocol_version: Option<u32>,
        timeout: Duration,
    ) -> Result<NormalizedPayload, ReadBlockError> {
        modbus::read_block(
            transport,
            device_address,
            block_address,
            block_id,
            register_count,
            protocol_version,
            timeout,
        )
    }
}
