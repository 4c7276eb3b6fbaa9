//! Binary serialization of a `PacketQueue`: restart must restore queues
//! verbatim so config-pending flows survive reboots.
//! Persisted under `persistence::variable_ids::PENDING_QUEUES`.

use serde::{Deserialize, Serialize};

use crate::error::CentralError;
use crate::queue::{PacketQueue, QueueEntry, QueueType};

/// On-disk shape of one queue. Mirrors `PacketQueue`'s persisted fields;
/// transient state (`in_flight_since_ms`, `resend_counter`, timers) is not
/// part of the encoding — a restored queue starts idle and is re-driven by
/// the worker tick, same as the original queue-attach-on-restart path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingQueue {
    pub queue_type: QueueType,
    pub entries: Vec<QueueEntry>,
    pub parameter_name: String,
    pub channel: i32,
    pub physical_interface_id: String,
    pub peer_address: Option<u32>,
}

impl From<&PacketQueue> for PendingQueue {
    fn from(q: &PacketQueue) -> Self {
        PendingQueue {
            queue_type: q.queue_type,
            entries: q.entries().iter().cloned().collect(),
            parameter_name: q.parameter_name.clone(),
            channel: q.channel,
            physical_interface_id: q.physical_interface_id.clone(),
            peer_address: q.peer_address,
        }
    }
}

impl PendingQueue {
    pub fn into_packet_queue(self) -> PacketQueue {
        PacketQueue::from_parts(
            self.queue_type,
            self.entries.into(),
            self.parameter_name,
            self.channel,
            self.physical_interface_id,
            self.peer_address,
        )
    }

    /// True iff this queue carries at least one `SendPacket`/`AwaitMessage`
    /// entry — used by `QueueManager::sweep_idle`'s "has pending work" check
    /// after a restart restores a peer's saved queue list.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn encode(queue: &PacketQueue) -> Result<Vec<u8>, CentralError> {
    bincode::serialize(&PendingQueue::from(queue))
    .map_err(|e| CentralError::Other(format!("encoding pending queue: {e}")))
}

pub fn decode(bytes: &[u8]) -> Result<PendingQueue, CentralError> {
    bincode::deserialize(bytes).map_err(|e| CentralError::Other(format!("decoding pending queue: {e}")))
}

/// Encodes every queue belonging to a peer, e.g. before `save_variable` at
/// `PENDING_QUEUES`.
pub fn encode_all(queues: &[&PacketQueue]) -> Result<Vec<u8>, CentralError> {
    let pending: Vec<PendingQueue> = queues.iter().map(|q| PendingQueue::from(*q)).collect();
    bincode::serialize(&pending).map_err(|e| CentralError::Other(format!("encoding pending queues: {e}")))
}

pub fn decode_all(bytes: &[u8]) -> Result<Vec<PendingQueue>, CentralError> {
    bincode::deserialize(bytes).map_err(|e| CentralError::Other(format!("decoding pending queues: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::queue::AwaitSpec;

    fn sample_queue() -> PacketQueue {
        let mut q = PacketQueue::new(QueueType::Config, "cul0".into());
        q.parameter_name = "mode".into();
        q.channel = 1;
        q.peer_address = Some(0xAABBCC);
        q.push_send(
            Packet::new(0, 0x11, 0x00, 0x123456, 0xAABBCC, vec![1, 2, 3]).unwrap(),
            false,
            false,
            0,
            200,
        );
        q.push_await(AwaitSpec::new(0x02, None), false);
        q
    }

    #[test]
    fn round_trips_through_bincode() {
        let q = sample_queue();
        let bytes = encode(&q).unwrap();
        let restored = decode(&bytes).unwrap().into_packet_queue();
        assert_eq!(restored.queue_type, QueueType::Config);
        assert_eq!(restored.parameter_name, "mode");
        assert_eq!(restored.channel, 1);
        assert_eq!(restored.peer_address, Some(0xAABBCC));
        assert_eq!(restored.len(), 2);
        match restored.front().unwrap() {
            QueueEntry::SendPacket { packet, .. } => assert_eq!(packet.payload, vec![1, 2, 3]),
            _ => panic!("expected SendPacket"),
        }
    }

    #[test]
    fn round_trips_a_list_of_queues() {
        let q1 = sample_queue();
        let mut q2 = PacketQueue::new(QueueType::Default, "cul0".into());
        q2.push_await(AwaitSpec::new(0x03, Some(0x0A)), true);
        let bytes = encode_all(&[&q1, &q2]).unwrap();
        let restored = decode_all(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].queue_type, QueueType::Default);
    }

    #[test]
    fn empty_queue_list_encodes_and_reports_empty() {
        let q = PacketQueue::new(QueueType::Empty, "cul0".into());
        let bytes = encode(&q).unwrap();
        assert!(decode(&bytes).unwrap().is_empty());
    }
}
