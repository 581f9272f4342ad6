use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::warn;

use crate::record::{ParsedRecord, Value};

pub type Handler = Arc<dyn Fn(&ParsedRecord) + Send + Sync>;

#[derive(Default)]
struct Inner {
    last_update: Option<SystemTime>,
    blocks: HashMap<u32, ParsedRecord>,
    state: HashMap<String, Value>,
    group_state: HashMap<String, HashMap<String, Value>>,
    handlers: HashMap<u32, Handler>,
}

/// Stateful projection of one device's last-seen blocks and merged state.
///
/// All mutation is serialized by one internal mutex; handler dispatch runs
/// *outside* that lock so a handler calling back into the model (e.g. to
/// merge state) cannot deadlock against its own update.
pub struct DeviceModel {
    pub device_id: String,
    pub model: String,
    pub protocol_version: Option<u32>,
    inner: Mutex<Inner>,
}

impl DeviceModel {
    pub fn new(device_id: impl Into<String>, model: impl Into<String>, protocol_version: Option<u32>) -> Self {
        DeviceModel {
            device_id: device_id.into(),
            model: model.into(),
            protocol_version,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn register_handler(&self, block_id: u32, handler: Handler) {
        self.inner
            .lock()
            .expect("device model poisoned")
            .handlers
            .insert(block_id, handler);
    }

    /// Store `record`, bump `last_update`, then invoke the registered
    /// handler (if any) outside the lock. Handlers typically call
    /// `merge_state` to project fields into the flat/group state maps.
    pub fn update_from_block(&self, record: ParsedRecord) {
        let handler = {
            let mut inner = self.inner.lock().expect("device model poisoned");
            inner.last_update = Some(record.timestamp);
            let block_id = record.block_id;
            inner.blocks.insert(block_id, record.clone());
            inner.handlers.get(&block_id).cloned()
        };
        match handler {
            Some(h) => h(&record),
            None => warn!("unknown block {} for device {}", record.block_id, self.device_id),
        }
    }

    /// Merge `values` into the flat state map and, if `group` is given, into
    /// that group's state map (bumping its own last-update marker).
    pub fn merge_state(&self, values: HashMap<String, Value>, group: Option<&str>) {
        let mut inner = self.inner.lock().expect("device model poisoned");
        inner.state.extend(values.clone());
        if let Some(g) = group {
            inner
                .group_state
                .entry(g.to_string())
                .or_default()
                .extend(values);
        }
    }

    /// Snapshot of the flat state map. List values are shallow-copied so
    /// callers cannot mutate internal state through the snapshot.
    pub fn get_state(&self) -> HashMap<String, Value> {
        snapshot(&self.inner.lock().expect("device model poisoned").state)
    }

    pub fn get_group_state(&self, group: &str) -> HashMap<String, Value> {
        let inner = self.inner.lock().expect("device model poisoned");
        match inner.group_state.get(group) {
            Some(state) => snapshot(state),
            None => HashMap::new(),
        }
    }

    pub fn get_raw_block(&self, block_id: u32) -> Option<ParsedRecord> {
        self.inner
            .lock()
            .expect("device model poisoned")
            .blocks
            .get(&block_id)
            .cloned()
    }

    pub fn last_update(&self) -> Option<SystemTime> {
        self.inner.lock().expect("device model poisoned").last_update
    }
}

fn snapshot(map: &HashMap<String, Value>) -> HashMap<String, Value> {
    map.iter()
        .map(|(k, v)| {
            let copied = match v {
                Value::List(items) => Value::List(items.clone()),
                other => other.clone(),
            };
            (k.clone(), copied)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_record(block_id: u32) -> ParsedRecord {
        ParsedRecord {
            block_id,
            name: "test".to_string(),
            values: HashMap::new(),
            raw: vec![],
            length: 0,
            protocol_version: None,
            schema_version: "1.0.0".to_string(),
            timestamp: SystemTime::now(),
            validation: None,
        }
    }

    #[test]
    fn handler_dispatch_runs_and_can_merge_state() {
        let model = Arc::new(DeviceModel::new("dev1", "test-model", None));
        let weak = Arc::downgrade(&model);
        model.register_handler(
            1,
            Arc::new(move |record: &ParsedRecord| {
                if let Some(m) = weak.upgrade() {
                    let mut values = HashMap::new();
                    values.insert("block_seen".to_string(), Value::Int(record.block_id as i64));
                    m.merge_state(values, Some("group_a"));
                }
            }),
        );
        model.update_from_block(dummy_record(1));
        assert_eq!(
            model.get_state().get("block_seen"),
            Some(&Value::Int(1))
        );
        assert_eq!(
            model.get_group_state("group_a").get("block_seen"),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn unknown_block_is_logged_not_fatal() {
        let _ = env_logger::try_init();
        let model = DeviceModel::new("dev1", "test-model", None);
        model.update_from_block(dummy_record(99));
        assert!(model.get_raw_block(99).is_some());
    }
}
