//! End-to-end check that `read_group` reads blocks in exactly the order
//! declared in the device profile, driving a fake transport + protocol
//! codec so no real wire framing is involved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use power_sdk_core::client::{Client, StaticSchemaCatalog};
use power_sdk_core::device::DeviceModel;
use power_sdk_core::error::TransportError;
use power_sdk_core::parser::BlockParser;
use power_sdk_core::profile::{DeviceProfile, GroupDef};
use power_sdk_core::protocol::modbus::{NormalizedPayload, ReadBlockError};
use power_sdk_core::protocol::ProtocolCodec;
use power_sdk_core::retry::RetryPolicy;
use power_sdk_core::schema::BlockSchema;
use power_sdk_core::transport::Transport;

struct NullTransport;

impl Transport for NullTransport {
    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }
    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
    fn send_frame(&self, _frame: &[u8], _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        unreachable!("fake protocol codec never calls the transport")
    }
}

/// Records the order blocks were read in and hands back an all-zero payload
/// of whatever length the schema declares.
struct RecordingCodec {
    order: Mutex<Vec<u32>>,
}

impl ProtocolCodec for RecordingCodec {
    fn read_block(
        &self,
        _transport: &dyn Transport,
        device_address: u8,
        _block_address: u16,
        block_id: u32,
        register_count: u16,
        protocol_version: Option<u32>,
        _timeout: Duration,
    ) -> Result<NormalizedPayload, ReadBlockError> {
        self.order.lock().unwrap().push(block_id);
        Ok(NormalizedPayload {
            block_id,
            data: vec![0u8; register_count as usize * 2],
            device_address,
            protocol_version: protocol_version.unwrap_or(2000),
        })
    }
}

fn empty_schema(block_id: u32) -> BlockSchema {
    BlockSchema::builder(block_id, format!("block_{block_id}")).build().unwrap()
}

#[test]
fn read_group_preserves_profile_declared_order() {
    let blocks = vec![40, 10, 1300, 5];
    let mut catalog = HashMap::new();
    for &id in &blocks {
        catalog.insert(id, empty_schema(id));
    }

    let mut groups = HashMap::new();
    groups.insert(
        "all".to_string(),
        GroupDef {
            name: "all".to_string(),
            blocks: blocks.clone(),
            description: String::new(),
            poll_interval: Duration::from_secs(30),
        },
    );
    let profile = DeviceProfile {
        model: "test-device".to_string(),
        type_id: "test".to_string(),
        protocol_key: "modbus-rtu".to_string(),
        protocol_version: 2000,
        description: String::new(),
        groups,
    };

    let codec = Arc::new(RecordingCodec { order: Mutex::new(Vec::new()) });
    let client = Client::new(
        Arc::new(NullTransport),
        profile,
        &StaticSchemaCatalog(catalog),
        1,
        codec.clone(),
        Arc::new(BlockParser::default()),
        Arc::new(DeviceModel::new("dev-1", "test-device", Some(2000))),
        RetryPolicy::default(),
    );

    let records = client.read_group("all", false).unwrap();
    let seen: Vec<u32> = records.iter().map(|r| r.block_id).collect();
    assert_eq!(seen, blocks);
    assert_eq!(*codec.order.lock().unwrap(), blocks);
}
