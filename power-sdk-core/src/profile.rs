use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// A named set of blocks polled together, in declared (order-preserving) order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupDef {
    pub name: String,
    pub blocks: Vec<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Describes one physical device model: its groups and the protocol it speaks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceProfile {
    pub model: String,
    pub type_id: String,
    pub protocol_key: String,
    pub protocol_version: u32,
    #[serde(default)]
    pub description: String,
    pub groups: HashMap<String, GroupDef>,
}

impl DeviceProfile {
    pub fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.get(name)
    }

    /// All distinct block ids referenced across every group, for schema
    /// auto-registration on client construction.
    pub fn all_block_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .groups
            .values()
            .flat_map(|g| g.blocks.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
