//! Upstream RPC / event sink: an external collaborator that owns the wire
//! format to RPC clients. Core code only ever calls through this trait; it
//! never builds RPC frames itself.

use std::sync::Mutex;

use crate::device_description::ParameterValue;

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    NewDevices {
        ids: Vec<u64>,
        descriptions: Vec<String>,
    },
    DeleteDevices {
        ids: Vec<u64>,
        addresses: Vec<u32>,
        info: String,
    },
    UpdateDevice {
        id: u64,
        channel: i32,
        address: String,
        flags: u32,
    },
    RpcEvent {
        source: String,
        peer_id: u64,
        channel: i32,
        address: u32,
        keys: Vec<String>,
        values: Vec<ParameterValue>,
    },
}

pub trait UpstreamEventSink: Send + Sync {
    fn on_new_devices(&self, ids: Vec<u64>, descriptions: Vec<String>);
    fn on_delete_devices(&self, ids: Vec<u64>, addresses: Vec<u32>, info: String);
    fn on_update_device(&self, id: u64, channel: i32, address: String, flags: u32);
    fn on_rpc_event(
        &self,
        source: String,
        peer_id: u64,
        channel: i32,
        address: u32,
        keys: Vec<String>,
        values: Vec<ParameterValue>,
    );
}

/// Collects every emitted event in order; used by tests in place of a real
/// RPC server connection.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<UpstreamEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<UpstreamEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl UpstreamEventSink for RecordingSink {
    fn on_new_devices(&self, ids: Vec<u64>, descriptions: Vec<String>) {
        self.events
            .lock()
            .unwrap()
            .push(UpstreamEvent::NewDevices { ids, descriptions });
    }

    fn on_delete_devices(&self, ids: Vec<u64>, addresses: Vec<u32>, info: String) {
        self.events.lock().unwrap().push(UpstreamEvent::DeleteDevices {
            ids,
            addresses,
            info,
        });
    }

    fn on_update_device(&self, id: u64, channel: i32, address: String, flags: u32) {
        self.events.lock().unwrap().push(UpstreamEvent::UpdateDevice {
            id,
            channel,
            address,
            flags,
        });
    }

    fn on_rpc_event(
        &self,
        source: String,
        peer_id: u64,
        channel: i32,
        address: u32,
        keys: Vec<String>,
        values: Vec<ParameterValue>,
    ) {
        self.events.lock().unwrap().push(UpstreamEvent::RpcEvent {
            source,
            peer_id,
            channel,
            address,
            keys,
            values,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.on_update_device(1, 0, "AABBCC".into(), 0);
        sink.on_rpc_event("peer".into(), 1, 1, 0xAABBCC, vec!["STATE".into()], vec![ParameterValue::Bool(true)]);
        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert!(sink.drain().is_empty());
    }
}
