use crate::storage::traits::{DealRecord, DealStore};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Keeps serialized records in memory. Records still go through ron so that anything that would not survive a
/// round trip to disk fails here too.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: DealRecord> DealStore<S> for MemoryStore {
    fn write_deal(&self, state: &S) -> Result<(), anyhow::Error> {
        let val = ron::to_string(state)?;
        self.records.lock().insert(state.store_name(), val);
        Ok(())
    }

    fn load_deal(&self, name: &str) -> Result<S, anyhow::Error> {
        let records = self.records.lock();
        let val = records.get(name).ok_or_else(|| anyhow!("No deal stored under {name}"))?;
        Ok(ron::de::from_str(val)?)
    }

    fn load_all(&self) -> Result<Vec<S>, anyhow::Error> {
        let records = self.records.lock();
        Ok(records.values().filter_map(|val| ron::de::from_str(val).ok()).collect())
    }

    fn delete_deal(&self, name: &str) -> Result<(), anyhow::Error> {
        self.records.lock().remove(name);
        Ok(())
    }
}
