//! Per-peer last-sent / last-received packet cache.
//!
//! Used both for duplicate detection and to enforce the inter-packet spacing
//! ("listen window") after a send.

use std::collections::HashMap;

use crate::packet::{Codec, Packet};

/// Window within which an identical repeat packet is considered a duplicate.
pub const DUP_WINDOW_MS: u64 = 2000;

#[derive(Debug, Clone)]
struct Entry {
    packet: Packet,
    time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub time_ms: u64,
    pub hex: String,
}

#[derive(Default)]
pub struct PacketCache {
    entries: HashMap<u32, Entry>,
}

impl PacketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the cached packet for `addr`. Returns `true` iff a
    /// prior identical packet existed for `addr` within `DUP_WINDOW_MS`.
    pub fn set(&mut self, addr: u32, p: &Packet, now_ms: u64) -> bool {
        let is_dup = self
            .entries
            .get(&addr)
            .map(|prev| {
                Codec::to_bytes(&prev.packet) == Codec::to_bytes(p)
                    && now_ms.saturating_sub(prev.time_ms) < DUP_WINDOW_MS
            })
            .unwrap_or(false);
        self.entries.insert(
            addr,
            Entry {
                packet: p.clone(),
                time_ms: now_ms,
            },
        );
        is_dup
    }

    pub fn get(&self, addr: u32) -> Option<Packet> {
        self.entries.get(&addr).map(|e| e.packet.clone())
    }

    pub fn get_info(&self, addr: u32) -> Option<PacketInfo> {
        self.entries.get(&addr).map(|e| PacketInfo {
            time_ms: e.time_ms,
            hex: Codec::to_hex(&e.packet),
        })
    }

    /// Updates only the timestamp for `addr`, keeping the stored packet.
    pub fn keep_alive(&mut self, addr: u32, now_ms: u64) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.time_ms = now_ms;
        }
    }

    /// Milliseconds since the last cached event for `addr`, if any.
    pub fn ms_since_last(&self, addr: u32, now_ms: u64) -> Option<u64> {
        self.entries
            .get(&addr)
            .map(|e| now_ms.saturating_sub(e.time_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(payload: u8) -> Packet {
        Packet::new(0, 0x02, 0x00, 1, 2, vec![payload]).unwrap()
    }

    #[test]
    fn set_reports_duplicate_within_window() {
        let mut cache = PacketCache::new();
        assert!(!cache.set(1, &pkt(1), 1000));
        assert!(cache.set(1, &pkt(1), 1500));
    }

    #[test]
    fn set_does_not_report_duplicate_outside_window() {
        let mut cache = PacketCache::new();
        assert!(!cache.set(1, &pkt(1), 1000));
        assert!(!cache.set(1, &pkt(1), 3500));
    }

    #[test]
    fn set_does_not_report_duplicate_for_different_bytes() {
        let mut cache = PacketCache::new();
        assert!(!cache.set(1, &pkt(1), 1000));
        assert!(!cache.set(1, &pkt(2), 1100));
    }

    #[test]
    fn keep_alive_updates_time_only() {
        let mut cache = PacketCache::new();
        cache.set(1, &pkt(1), 1000);
        cache.keep_alive(1, 9000);
        assert_eq!(cache.get_info(1).unwrap().time_ms, 9000);
        assert_eq!(cache.get(1).unwrap(), pkt(1));
    }
}
