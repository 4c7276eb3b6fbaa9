//! Persistence is an external collaborator: durable KV for peer rows,
//! per-peer config, queued pending work, message counters. This module
//! defines the narrow interface plus an in-memory reference implementation
//! used by tests — not a production database.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::CentralError;

/// One row of the device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub address: u32,
    pub serial: String,
    pub device_type: u32,
    pub value: Vec<u8>,
}

/// Well-known per-device/per-central variable ids.
pub mod variable_ids {
    pub const CENTRAL_ADDRESS: u32 = 1;
    pub const MESSAGE_COUNTERS: u32 = 2;
    pub const PEER_MESSAGE_COUNTER: u32 = 5;
    pub const PEER_LINKS: u32 = 12;
    pub const PENDING_QUEUES: u32 = 16;
    pub const PHYSICAL_INTERFACE_ID: u32 = 19;
}

/// Transactional at variable-id granularity; `save_variable` is idempotent.
pub trait PersistenceStore: Send + Sync {
    fn save_device_row(&self, row: DeviceRow) -> Result<(), CentralError>;
    fn delete_device_row(&self, id: u64) -> Result<(), CentralError>;
    fn load_device_rows(&self) -> Result<Vec<DeviceRow>, CentralError>;
    fn save_variable(&self, parent_id: u64, variable_id: u32, value: Vec<u8>)
        -> Result<(), CentralError>;
    fn load_variable(&self, parent_id: u64, variable_id: u32) -> Result<Option<Vec<u8>>, CentralError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<u64, DeviceRow>>,
    variables: Mutex<HashMap<(u64, u32), Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for InMemoryStore {
    fn save_device_row(&self, row: DeviceRow) -> Result<(), CentralError> {
        self.rows
            .lock()
            .map_err(|_| CentralError::Persistence("device row lock poisoned".into()))?
            .insert(row.id, row);
        Ok(())
    }

    fn delete_device_row(&self, id: u64) -> Result<(), CentralError> {
        self.rows
            .lock()
            .map_err(|_| CentralError::Persistence("device row lock poisoned".into()))?
            .remove(&id);
        self.variables
            .lock()
            .map_err(|_| CentralError::Persistence("variable lock poisoned".into()))?
            .retain(|(parent, _), _| *parent != id);
        Ok(())
    }

    fn load_device_rows(&self) -> Result<Vec<DeviceRow>, CentralError> {
        Ok(self
            .rows
            .lock()
            .map_err(|_| CentralError::Persistence("device row lock poisoned".into()))?
            .values()
            .cloned()
            .collect())
    }

    fn save_variable(
        &self,
        parent_id: u64,
        variable_id: u32,
        value: Vec<u8>,
    ) -> Result<(), CentralError> {
        self.variables
            .lock()
            .map_err(|_| CentralError::Persistence("variable lock poisoned".into()))?
            .insert((parent_id, variable_id), value);
        Ok(())
    }

    fn load_variable(
        &self,
        parent_id: u64,
        variable_id: u32,
    ) -> Result<Option<Vec<u8>>, CentralError> {
        Ok(self
            .variables
            .lock()
            .map_err(|_| CentralError::Persistence("variable lock poisoned".into()))?
            .get(&(parent_id, variable_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_variable_is_idempotent() {
        let store = InMemoryStore::new();
        store.save_variable(1, variable_ids::PEER_MESSAGE_COUNTER, vec![5]).unwrap();
        store.save_variable(1, variable_ids::PEER_MESSAGE_COUNTER, vec![5]).unwrap();
        assert_eq!(
            store
                .load_variable(1, variable_ids::PEER_MESSAGE_COUNTER)
                .unwrap(),
            Some(vec![5])
        );
    }

    #[test]
    fn delete_device_row_removes_its_variables() {
        let store = InMemoryStore::new();
        store
            .save_device_row(DeviceRow {
                id: 1,
                parent_id: None,
                address: 0xAABBCC,
                serial: "ABCDEFGHIJ".into(),
                device_type: 0x0102,
                value: vec![],
            })
            .unwrap();
        store.save_variable(1, variable_ids::PEER_LINKS, vec![1, 2, 3]).unwrap();
        store.delete_device_row(1).unwrap();
        assert!(store.load_device_rows().unwrap().is_empty());
        assert_eq!(store.load_variable(1, variable_ids::PEER_LINKS).unwrap(), None);
    }
}
