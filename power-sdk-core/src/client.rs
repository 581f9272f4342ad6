use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::device::DeviceModel;
use crate::error::{ParserError, SdkError};
use crate::parser::BlockParser;
use crate::profile::DeviceProfile;
use crate::protocol::ProtocolCodec;
use crate::record::ParsedRecord;
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::BlockSchema;
use crate::transport::Transport;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves `BlockSchema`s for auto-registration; distinct from the
/// parser's own registered-schema map, which only holds schemas the caller
/// has actually registered.
pub trait SchemaSource: Send + Sync {
    fn resolve(&self, block_id: u32) -> Option<BlockSchema>;
}

/// A plain in-memory schema catalog, the common case for a vendor plugin
/// that ships its schemas as static data.
#[derive(Default)]
pub struct StaticSchemaCatalog(pub HashMap<u32, BlockSchema>);

impl SchemaSource for StaticSchemaCatalog {
    fn resolve(&self, block_id: u32) -> Option<BlockSchema> {
        self.0.get(&block_id).cloned()
    }
}

/// Per-block outcome of `read_group_ex`.
#[derive(Debug)]
pub struct ReadGroupResult {
    pub blocks: Vec<ParsedRecord>,
    pub errors: Vec<(u32, SdkError)>,
}

impl ReadGroupResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn partial(&self) -> bool {
        !self.blocks.is_empty() && !self.errors.is_empty()
    }
}

/// Sequences transport, protocol codec, parser, and device model; owns the
/// retry policy and auto-registers schemas from the device profile on
/// construction.
pub struct Client {
    transport: Arc<dyn Transport>,
    protocol: Arc<dyn ProtocolCodec>,
    parser: Arc<BlockParser>,
    device: Arc<DeviceModel>,
    profile: DeviceProfile,
    address: u8,
    retry: RetryPolicy,
}

impl Client {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        profile: DeviceProfile,
        schema_source: &dyn SchemaSource,
        address: u8,
        protocol: Arc<dyn ProtocolCodec>,
        parser: Arc<BlockParser>,
        device: Arc<DeviceModel>,
        retry: RetryPolicy,
    ) -> Self {
        let client = Client {
            transport,
            protocol,
            parser,
            device,
            profile,
            address,
            retry,
        };
        client.auto_register_schemas(schema_source);
        client
    }

    fn auto_register_schemas(&self, schema_source: &dyn SchemaSource) {
        for block_id in self.profile.all_block_ids() {
            match schema_source.resolve(block_id) {
                Some(schema) => {
                    if let Err(e) = self.parser.register_schema(schema) {
                        warn!("schema registration failed for block {block_id}: {e}");
                    }
                }
                None => warn!("no schema available for block {block_id} in profile '{}'", self.profile.model),
            }
        }
    }

    pub fn connect(&self) -> Result<(), SdkError> {
        with_retry(
            &self.retry,
            std::thread::sleep,
            || self.transport.connect().map_err(SdkError::from),
        )
    }

    pub fn disconnect(&self) -> Result<(), SdkError> {
        self.transport.disconnect().map_err(SdkError::from)
    }

    pub fn register_schema(&self, schema: BlockSchema) -> Result<(), ParserError> {
        self.parser.register_schema(schema)
    }

    /// Read one block, with retry on transport failure. `register_count`
    /// defaults to `ceil(schema.min_length / 2)` registers when omitted.
    pub fn read_block(
        &self,
        block_id: u32,
        register_count: Option<u16>,
        update_state: bool,
    ) -> Result<ParsedRecord, SdkError> {
        let count = match register_count {
            Some(c) => c,
            None => {
                let schema = self
                    .parser
                    .get_schema(block_id)
                    .ok_or(ParserError::SchemaNotRegistered { block_id })?;
                ((schema.min_length + 1) / 2) as u16
            }
        };

        let protocol = &self.protocol;
        let transport = &self.transport;
        let address = self.address;
        let payload = with_retry(&self.retry, std::thread::sleep, || {
            protocol
                .read_block(
                    transport.as_ref(),
                    address,
                    block_id as u16,
                    block_id,
                    count,
                    None,
                    DEFAULT_SEND_TIMEOUT,
                )
                .map_err(|e| match e {
                    crate::protocol::modbus::ReadBlockError::Transport(t) => SdkError::from(t),
                    crate::protocol::modbus::ReadBlockError::Protocol(p) => SdkError::from(p),
                })
        })?;

        let record = self.parser.parse_block(block_id, &payload.data, true, payload.protocol_version)?;
        if update_state {
            self.device.update_from_block(record.clone());
        }
        Ok(record)
    }

    /// Read every block in `group`, in profile-declared order. If
    /// `partial_ok`, a failing block is skipped; otherwise the first error
    /// aborts the read.
    pub fn read_group(&self, group: &str, partial_ok: bool) -> Result<Vec<ParsedRecord>, SdkError> {
        let group_def = self
            .profile
            .group(group)
            .ok_or_else(|| SdkError::from(crate::error::DeviceError::UnknownGroup(group.to_string())))?
            .clone();
        let mut records = Vec::with_capacity(group_def.blocks.len());
        for block_id in &group_def.blocks {
            match self.read_block(*block_id, None, true) {
                Ok(record) => records.push(record),
                Err(e) if partial_ok => warn!("skipping block {block_id} in group '{group}': {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Like `read_group`, but collects per-block errors instead of
    /// propagating the first one, and reports a success/partial summary.
    pub fn read_group_ex(&self, group: &str, partial_ok: bool) -> Result<ReadGroupResult, SdkError> {
        let group_def = self
            .profile
            .group(group)
            .ok_or_else(|| SdkError::from(crate::error::DeviceError::UnknownGroup(group.to_string())))?
            .clone();
        let mut blocks = Vec::new();
        let mut errors = Vec::new();
        for block_id in &group_def.blocks {
            match self.read_block(*block_id, None, true) {
                Ok(record) => blocks.push(record),
                Err(e) => {
                    errors.push((*block_id, e));
                    if !partial_ok {
                        break;
                    }
                }
            }
        }
        Ok(ReadGroupResult { blocks, errors })
    }

    /// Iterate blocks of `group` in profile order, reading one at a time.
    pub fn stream_group(&self, group: &str, partial_ok: bool) -> Result<StreamGroup<'_>, SdkError> {
        let group_def = self
            .profile
            .group(group)
            .ok_or_else(|| SdkError::from(crate::error::DeviceError::UnknownGroup(group.to_string())))?
            .clone();
        Ok(StreamGroup {
            client: self,
            blocks: group_def.blocks.into_iter(),
            partial_ok,
            done: false,
        })
    }

    pub fn device(&self) -> &DeviceModel {
        &self.device
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }
}

/// Lazily reads blocks of one group, one `read_block` call per `next()`.
pub struct StreamGroup<'a> {
    client: &'a Client,
    blocks: std::vec::IntoIter<u32>,
    partial_ok: bool,
    done: bool,
}

impl<'a> Iterator for StreamGroup<'a> {
    type Item = Result<ParsedRecord, SdkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let block_id = self.blocks.next()?;
            match self.client.read_block(block_id, None, true) {
                Ok(record) => return Some(Ok(record)),
                Err(e) if self.partial_ok => {
                    warn!("skipping block {block_id} while streaming: {e}");
                    continue;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
