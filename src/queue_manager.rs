//! Queue manager: at most one active `PacketQueue` per peer address.

use std::collections::HashMap;

use crate::queue::{PacketQueue, QueueAction, QueueType};

#[derive(Default)]
pub struct QueueManager {
    by_address: HashMap<u32, PacketQueue>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u32) -> Option<&PacketQueue> {
        self.by_address.get(&addr)
    }

    pub fn get_mut(&mut self, addr: u32) -> Option<&mut PacketQueue> {
        self.by_address.get_mut(&addr)
    }

    /// Creates a new active queue of `queue_type` for `addr` on `interface_id`,
    /// terminating (clearing) any existing queue for that address first.
    pub fn create(
        &mut self,
        addr: u32,
        queue_type: QueueType,
        interface_id: String,
    ) -> (&mut PacketQueue, Vec<QueueAction>) {
        let mut actions = Vec::new();
        if let Some(existing) = self.by_address.get_mut(&addr) {
            actions.extend(existing.clear());
        }
        let mut queue = PacketQueue::new(queue_type, interface_id);
        queue.peer_address = Some(addr);
        self.by_address.insert(addr, queue);
        (self.by_address.get_mut(&addr).unwrap(), actions)
    }

    /// Removes and disposes the queue for `addr`, if any (used on successful
    /// drain-and-no-pending-work sweep, or on peer deletion).
    pub fn remove(&mut self, addr: u32) -> Vec<QueueAction> {
        match self.by_address.remove(&addr) {
            Some(mut q) => q.dispose(),
            None => Vec::new(),
        }
    }

    /// Sweeps every queue that is empty and has no pending work left, removing
    /// it. Queues self-delete when idle and their pending-queues list is empty.
    pub fn sweep_idle<F>(&mut self, has_pending: F)
    where
        F: Fn(u32) -> bool,
    {
        let idle: Vec<u32> = self
            .by_address
            .iter()
            .filter(|(addr, q)| q.is_empty() && !has_pending(**addr))
            .map(|(addr, _)| *addr)
            .collect();
        for addr in idle {
            self.by_address.remove(&addr);
        }
    }

    pub fn dispose(&mut self) {
        for (_, mut q) in self.by_address.drain() {
            q.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_replaces_existing_queue_of_same_address() {
        let mut qm = QueueManager::new();
        qm.create(1, QueueType::Default, "cul0".into());
        let (q, _actions) = qm.create(1, QueueType::Pairing, "cul0".into());
        assert_eq!(q.queue_type, QueueType::Pairing);
        assert_eq!(qm.by_address.len(), 1);
    }

    #[test]
    fn sweep_idle_removes_empty_queues_without_pending_work() {
        let mut qm = QueueManager::new();
        qm.create(1, QueueType::Default, "cul0".into());
        qm.create(2, QueueType::Default, "cul0".into());
        qm.sweep_idle(|addr| addr == 2);
        assert!(qm.get(1).is_none());
        assert!(qm.get(2).is_some());
    }
}
