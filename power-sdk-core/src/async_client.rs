//! Cooperative-concurrency wrapper over `Client`, mirroring the sync
//! client's semantics while letting independent reads overlap at the
//! worker-thread boundary. Mutating calls (connect/disconnect/schema
//! registration) are serialized through one `tokio::sync::Mutex`; reads are
//! dispatched to `spawn_blocking` so the transport's own single-in-flight
//! serialization is the true bottleneck, not this facade.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::{Client, ReadGroupResult};
use crate::error::SdkError;
use crate::record::ParsedRecord;
use crate::schema::BlockSchema;

pub struct AsyncClient {
    inner: Arc<Client>,
    mutation_lock: Mutex<()>,
}

impl AsyncClient {
    pub fn new(inner: Client) -> Self {
        AsyncClient {
            inner: Arc::new(inner),
            mutation_lock: Mutex::new(()),
        }
    }

    pub async fn connect(&self) -> Result<(), SdkError> {
        let _guard = self.mutation_lock.lock().await;
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.connect())
            .await
            .expect("connect task panicked")
    }

    pub async fn disconnect(&self) -> Result<(), SdkError> {
        let _guard = self.mutation_lock.lock().await;
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.disconnect())
            .await
            .expect("disconnect task panicked")
    }

    pub async fn register_schema(&self, schema: BlockSchema) -> Result<(), crate::error::ParserError> {
        let _guard = self.mutation_lock.lock().await;
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.register_schema(schema))
            .await
            .expect("register_schema task panicked")
    }

    pub async fn read_block(
        &self,
        block_id: u32,
        register_count: Option<u16>,
        update_state: bool,
    ) -> Result<ParsedRecord, SdkError> {
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.read_block(block_id, register_count, update_state))
            .await
            .expect("read_block task panicked")
    }

    pub async fn read_group(&self, group: String, partial_ok: bool) -> Result<Vec<ParsedRecord>, SdkError> {
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.read_group(&group, partial_ok))
            .await
            .expect("read_group task panicked")
    }

    pub async fn read_group_ex(&self, group: String, partial_ok: bool) -> Result<ReadGroupResult, SdkError> {
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || client.read_group_ex(&group, partial_ok))
            .await
            .expect("read_group_ex task panicked")
    }

    /// Async iterator equivalent of `Client::stream_group`: reads one block
    /// per call, in profile order, into a `Vec` collected up front by a
    /// blocking worker. Cancelling the returned future (dropping it) cannot
    /// interrupt a block already in flight at the transport layer.
    pub async fn stream_group(&self, group: String, partial_ok: bool) -> Result<Vec<ParsedRecord>, SdkError> {
        let client = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<Vec<ParsedRecord>, SdkError> {
            let stream = client.stream_group(&group, partial_ok)?;
            stream.collect()
        })
        .await
        .expect("stream_group task panicked")
    }
}
