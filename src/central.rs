//! Central: owns peers, coordinates queues, dispatches received packets.
//!
//! Re-architected as a single-threaded dispatcher: every entry point here is
//! a plain function call driven by the caller's event loop (packet arrived,
//! timer fired, RPC call), returning [`CentralAction`]s instead of spawning
//! threads or blocking. The caller owns one [`crate::timers::TimerWheel`]
//! and replays its due events back through `on_resend_timer`/`tick`.

use std::collections::HashMap;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};

use crate::cache::PacketCache;
use crate::context::Context;
use crate::error::CentralError;
use crate::message::{check_access, AccessContext, HandlerKind, MessageRegistry};
use crate::packet::Packet;
use crate::peer::{Peer, PendingPromotion, RxModes};
use crate::queue::{AwaitSpec, PacketQueue, QueueAction, QueueEntry, QueueType};
use crate::queue_manager::QueueManager;

/// What the caller must do in response to a Central call. Mirrors
/// [`QueueAction`] but scoped to an interface id and peer address so the
/// dispatcher knows which radio to use and which service-message/event state
/// changed.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralAction {
    Transmit {
        packet: Packet,
        interface_id: String,
        stealthy: bool,
    },
    ScheduleResendCheck {
        peer_address: u32,
        delay_ms: u64,
    },
    CancelResendTimer {
        peer_address: u32,
    },
    PeerReachable {
        address: u32,
    },
    SpoofDetected {
        address: u32,
    },
    NewDevice {
        id: u64,
    },
    DeleteDevice {
        id: u64,
    },
    /// Resume a queue's deferred send `delay_ms` from now, via `on_deferred_pop_timer`.
    ScheduleDeferredPop {
        peer_address: u32,
        delay_ms: u64,
    },
    /// The packet was consumed by this dispatch and must not be offered to
    /// any other subscriber.
    Consumed,
    Dropped,
}

pub struct Central {
    pub address: u32,
    pub broadcast_counter: u8,
    peers: HashMap<u32, Peer>,
    peers_by_id: HashMap<u64, u32>,
    peers_by_serial: HashMap<String, u32>,
    next_peer_id: u64,
    pub pairing: bool,
    install_mode_remaining_s: u32,
    pub queues: QueueManager,
    registry: MessageRegistry,
    receive_cache: PacketCache,
    send_cache: PacketCache,
    pub disposing: bool,
}

impl Central {
    pub fn new(address: u32) -> Self {
        Central {
            address,
            broadcast_counter: 0,
            peers: HashMap::new(),
            peers_by_id: HashMap::new(),
            peers_by_serial: HashMap::new(),
            next_peer_id: 1,
            pairing: false,
            install_mode_remaining_s: 0,
            queues: QueueManager::new(),
            registry: MessageRegistry::with_bootstrap_descriptors(),
            receive_cache: PacketCache::new(),
            send_cache: PacketCache::new(),
            disposing: false,
        }
    }

    pub fn peer(&self, address: u32) -> Option<&Peer> {
        self.peers.get(&address)
    }

    pub fn peer_mut(&mut self, address: u32) -> Option<&mut Peer> {
        self.peers.get_mut(&address)
    }

    pub fn peer_by_id(&self, id: u64) -> Option<&Peer> {
        self.peers_by_id.get(&id).and_then(|addr| self.peers.get(addr))
    }

    pub fn peer_by_serial(&self, serial: &str) -> Option<&Peer> {
        self.peers_by_serial
            .get(serial)
            .and_then(|addr| self.peers.get(addr))
    }

    fn next_broadcast_counter(&mut self) -> u8 {
        let c = self.broadcast_counter;
        self.broadcast_counter = self.broadcast_counter.wrapping_add(1);
        c
    }

    fn queue_actions_to_central(
        peer_address: u32,
        interface_id: &str,
        actions: Vec<QueueAction>,
    ) -> Vec<CentralAction> {
        actions
            .into_iter()
            .filter_map(|a| match a {
                QueueAction::Transmit { packet, stealthy } => Some(CentralAction::Transmit {
                    packet,
                    interface_id: interface_id.to_string(),
                    stealthy,
                }),
                QueueAction::ScheduleResendCheck { delay_ms } => {
                    Some(CentralAction::ScheduleResendCheck { peer_address, delay_ms })
                }
                QueueAction::CancelResendTimer => {
                    Some(CentralAction::CancelResendTimer { peer_address })
                }
                QueueAction::ScheduleDeferredPop { delay_ms } => {
                    Some(CentralAction::ScheduleDeferredPop { peer_address, delay_ms })
                }
                QueueAction::Drained | QueueAction::Failure => None,
            })
            .collect()
    }

    /// Promotes the peer's next pending queue to active. With `defer_ms ==
    /// None` its send cycle begins immediately (the peer just answered us
    /// directly); with `Some(delay_ms)` the send is deferred via `pop_wait`
    /// so the conversation the peer is already having with someone else gets
    /// a moment to finish first — `on_deferred_pop_timer` resumes it.
    fn promote_next_pending(
        &mut self,
        address: u32,
        now_ms: u64,
        response_delay_ms: u64,
        defer_ms: Option<u64>,
    ) -> Vec<CentralAction> {
        let Some(peer) = self.peers.get_mut(&address) else {
            return Vec::new();
        };
        if peer.pending_queues.is_empty() {
            return Vec::new();
        }
        let queue_type = peer.pending_queues[0].queue_type;
        let interface_id = peer.pending_queues[0].physical_interface_id.clone();
        let pending = peer.pending_queues.remove(0);

        let (active, create_actions) = self.queues.create(address, queue_type, interface_id.clone());
        *active = pending;
        let mut actions = Self::queue_actions_to_central(address, &interface_id, create_actions);
        let start_actions = match defer_ms {
            Some(delay_ms) => active.pop_wait(delay_ms),
            None => active.activate(now_ms, response_delay_ms),
        };
        actions.extend(Self::queue_actions_to_central(address, &interface_id, start_actions));
        actions
    }

    pub fn on_packet_received(
        &mut self,
        p: &Packet,
        delivering_interface_id: &str,
        ctx: &Context,
        now_ms: u64,
    ) -> Vec<CentralAction> {
        if self.disposing {
            return vec![CentralAction::Dropped];
        }

        // Step 1: spoof / loopback detection.
        if p.sender_addr == self.address {
            if let Some(peer) = self.peers.get_mut(&p.dest_addr) {
                if peer.physical_interface_id == delivering_interface_id {
                    return vec![CentralAction::Consumed];
                }
                peer.service_messages.central_address_spoofed = true;
                return vec![CentralAction::SpoofDetected { address: peer.address }];
            }
            return vec![CentralAction::Dropped];
        }

        // Step 2: duplicate delivery across interfaces.
        if let Some(peer) = self.peers.get(&p.sender_addr) {
            if peer.physical_interface_id != delivering_interface_id {
                return vec![CentralAction::Dropped];
            }
        }

        // Step 3: dedup window.
        let mut handled = self.receive_cache.set(p.sender_addr, p, now_ms);

        // Step 4: match against the bootstrap descriptors and access-check.
        let descriptor = self.registry.find(p).cloned();
        if let Some(desc) = &descriptor {
            let mask = desc.effective_mask(self.pairing);
            let access_ctx = AccessContext {
                self_address: self.address,
                central_address_of_sender: Some(self.address),
                pairing_in_progress_address: self.pairing_peer_address(),
                sender_is_paired: self.peers.contains_key(&p.sender_addr),
                queue_is_unpairing: self
                    .queues
                    .get(p.sender_addr)
                    .map(|q| q.queue_type == QueueType::Unpairing)
                    .unwrap_or(false),
            };
            if check_access(mask, p, &access_ctx) {
                let mut actions = match desc.handler {
                    HandlerKind::Ack => self.handle_ack(p, ctx, now_ms),
                    HandlerKind::TimeRequest => self.handle_time_request(p, now_ms),
                    HandlerKind::PairingRequest => self.handle_pairing_request(p, ctx, now_ms),
                };
                handled = true;
                if let Some(q) = self.queues.get(p.sender_addr) {
                    if !q.is_empty() && q.queue_type != QueueType::Peer {
                        actions.push(CentralAction::PeerReachable { address: p.sender_addr });
                        return actions;
                    }
                }
                return actions;
            }
        }

        if handled {
            if let Some(q) = self.queues.get(p.sender_addr) {
                if !q.is_empty() && q.queue_type != QueueType::Peer {
                    return vec![CentralAction::PeerReachable { address: p.sender_addr }];
                }
            }
        }

        // Step 5: fall through to the peer's own receive path.
        if let Some(peer) = self.peers.get_mut(&p.sender_addr) {
            let descr = ctx
                .catalog
                .lookup(peer.device_type, peer.firmware)
                .unwrap_or_default();
            let outcome = peer.packet_received(&descr, p, self.address, now_ms);
            let mut actions = Vec::new();
            if let Some(ack) = outcome.send_ack {
                actions.push(CentralAction::Transmit {
                    packet: ack,
                    interface_id: delivering_interface_id.to_string(),
                    stealthy: false,
                });
            }
            for (channel, keys, values) in outcome.events {
                ctx.sink.on_rpc_event(
                    "peer".to_string(),
                    peer.id,
                    channel,
                    peer.address,
                    keys,
                    values,
                );
            }
            if let Some(promotion) = outcome.promote_pending {
                let response_delay_ms = ctx
                    .config
                    .interfaces
                    .iter()
                    .find(|i| i.id == delivering_interface_id)
                    .map(|i| i.response_delay_ms)
                    .unwrap_or(200);
                let defer_ms = match promotion {
                    PendingPromotion::Now => None,
                    PendingPromotion::AfterMs(delay_ms) => Some(delay_ms),
                };
                actions.extend(self.promote_next_pending(p.sender_addr, now_ms, response_delay_ms, defer_ms));
            }
            return actions;
        }

        vec![CentralAction::Dropped]
    }

    fn pairing_peer_address(&self) -> Option<u32> {
        self.peers
            .values()
            .find(|p| {
                self.queues
                    .get(p.address)
                    .map(|q| q.queue_type == QueueType::Pairing)
                    .unwrap_or(false)
            })
            .map(|p| p.address)
    }

    fn handle_ack(&mut self, p: &Packet, ctx: &Context, now_ms: u64) -> Vec<CentralAction> {
        let interface_id = self
            .peers
            .get(&p.sender_addr)
            .map(|peer| peer.physical_interface_id.clone())
            .or_else(|| self.queues.get(p.sender_addr).map(|q| q.physical_interface_id.clone()))
            .unwrap_or_default();
        let is_nack = p.payload.len() >= 2 && (p.payload[1] & 0x80) != 0;

        // The prior sent entry was the pairing inclusion packet iff the
        // queue's head (before popping) is that inclusion send — message
        // type 0x01. A `needs_time` pairing queue has a second send/await
        // pair queued behind it, so queue length alone can't tell the
        // inclusion ACK apart from the time-packet ACK.
        let queue_type = self.queues.get(p.sender_addr).map(|q| q.queue_type);
        let was_first_pairing_ack = queue_type == Some(QueueType::Pairing)
            && matches!(
                self.queues.get(p.sender_addr).and_then(|q| q.front()),
                Some(QueueEntry::SendPacket { packet, .. }) if packet.message_type == 0x01
            );

        let Some(queue) = self.queues.get_mut(p.sender_addr) else {
            return Vec::new();
        };

        let actions = if is_nack {
            if queue.queue_type == QueueType::Pairing {
                queue.clear()
            } else {
                queue.pop(now_ms, 0)
            }
        } else {
            queue.pop(now_ms, 0)
        };
        let central_actions = Self::queue_actions_to_central(p.sender_addr, &interface_id, actions);

        if !is_nack && queue_type == Some(QueueType::Pairing) && was_first_pairing_ack {
            self.finalize_pairing(p.sender_addr, ctx);
        }
        if !is_nack && queue_type == Some(QueueType::Unpairing) {
            self.finalize_unpair(p.sender_addr, ctx);
        }

        central_actions
    }

    fn finalize_pairing(&mut self, address: u32, ctx: &Context) {
        if let Some(peer) = self.peers.get(&address) {
            let _ = ctx.store.save_device_row(crate::persistence::DeviceRow {
                id: peer.id,
                parent_id: None,
                address: peer.address,
                serial: peer.serial.clone(),
                device_type: peer.device_type,
                value: Vec::new(),
            });
            ctx.pairing_features
                .on_pairing_ack(peer.address, peer.device_type, peer.firmware);
            ctx.sink
                .on_new_devices(vec![peer.id], vec![peer.serial.clone()]);
        }
        self.pairing = false;
        self.install_mode_remaining_s = 0;
    }

    fn finalize_unpair(&mut self, address: u32, ctx: &Context) {
        if let Some(peer) = self.peers.remove(&address) {
            self.peers_by_id.remove(&peer.id);
            self.peers_by_serial.remove(&peer.serial);
            let _ = ctx.store.delete_device_row(peer.id);
            ctx.sink
                .on_delete_devices(vec![peer.id], vec![peer.address], "reset".to_string());
        }
        self.queues.remove(address);
    }

    fn handle_time_request(&mut self, p: &Packet, _now_ms: u64) -> Vec<CentralAction> {
        let interface_id = self
            .peers
            .get(&p.sender_addr)
            .map(|peer| peer.physical_interface_id.clone())
            .unwrap_or_default();
        let packet = self.synthesize_time_packet(p.sender_addr, false);
        vec![CentralAction::Transmit {
            packet,
            interface_id,
            stealthy: false,
        }]
    }

    /// Time packet synthesis. Preserves the original's bit-layout quirk
    /// verbatim: the last two bytes mix `tm_min` with month bits, not
    /// `tm_sec` — devices are assumed to depend on this.
    ///
    /// The original derives its calendar fields by taking the local gmt
    /// offset, subtracting it from the current instant, then re-decomposing
    /// *that* — which nets out to the UTC calendar representation of now,
    /// not local wall-clock fields. The gmt-offset bits themselves are
    /// 30-minute units of the local offset, packed in separately.
    pub fn synthesize_time_packet(&mut self, dest: u32, burst: bool) -> Packet {
        let now = Local::now();
        let local_offset_s = now.offset().local_minus_utc();
        let payload = Self::time_payload(now.naive_utc(), local_offset_s);

        let counter = self.next_broadcast_counter();
        Packet::new(counter, 0x03, 0x00, self.address, dest, payload.to_vec())
            .expect("fixed 6-byte time payload fits")
            .with_burst(burst)
    }

    /// Pure bit-packing for the time payload, factored out of
    /// `synthesize_time_packet` so its layout is testable against a fixed
    /// instant instead of the wall clock.
    fn time_payload(utc: NaiveDateTime, local_offset_s: i32) -> [u8; 6] {
        let year = (utc.year() % 100) as u8;
        let month = utc.month() as u8;
        let gmt_off_units = (local_offset_s / 1800) as i8;

        let byte0 = 0u8;
        let byte1 = year;
        let byte2 = utc.day() as u8 | (((gmt_off_units as u8) & 0x38) << 2);
        let byte3 = utc.hour() as u8 | (((gmt_off_units as u8) & 0x07) << 5);
        let byte4 = utc.minute() as u8 | ((month & 0x0C) << 4);
        let byte5 = utc.minute() as u8 | ((month & 0x03) << 6);

        [byte0, byte1, byte2, byte3, byte4, byte5]
    }

    fn handle_pairing_request(&mut self, p: &Packet, ctx: &Context, now_ms: u64) -> Vec<CentralAction> {
        if (p.dest_addr != 0 && p.dest_addr != self.address) || p.payload.len() < 14 {
            return vec![CentralAction::Dropped];
        }
        let firmware = ((p.payload[0] as u16) << 8) | p.payload[1] as u16;
        let device_type = ((p.payload[2] as u32) << 8) | p.payload[3] as u32;
        let serial = String::from_utf8_lossy(&p.payload[4..14]).to_string();

        if let Some(existing) = self.peers.get(&p.sender_addr) {
            if existing.serial != serial || existing.device_type != device_type {
                return vec![CentralAction::Dropped];
            }
        }
        if !self.pairing {
            return vec![CentralAction::Dropped];
        }

        let default_interface = self
            .peers
            .values()
            .next()
            .map(|p| p.physical_interface_id.clone())
            .unwrap_or_else(|| "default".to_string());

        let id = self.next_peer_id;
        self.next_peer_id += 1;
        let mut peer = Peer::new(
            id,
            p.sender_addr,
            serial.clone(),
            device_type,
            firmware,
            default_interface.clone(),
            0,
        );

        let descr = ctx.catalog.lookup(device_type, firmware).unwrap_or_default();
        let burst = peer.rx_modes.contains(RxModes::WAKE_ON_RADIO);

        let mut queue = PacketQueue::new(QueueType::Pairing, default_interface.clone());
        queue.peer_address = Some(p.sender_addr);

        let inclusion_counter = self.next_broadcast_counter();
        let inclusion = Packet::new(
            inclusion_counter,
            0x01,
            0x00,
            self.address,
            p.sender_addr,
            vec![0, 0],
        )
        .expect("fixed inclusion payload")
        .with_burst(burst);
        let mut actions = Self::queue_actions_to_central(
            p.sender_addr,
            &default_interface,
            queue.push_send(inclusion, burst, false, now_ms, 200),
        );
        queue.push_await(AwaitSpec::new(0x02, None), false);

        if descr.needs_time {
            let time_packet = self.synthesize_time_packet(p.sender_addr, burst);
            actions.extend(Self::queue_actions_to_central(
                p.sender_addr,
                &default_interface,
                queue.push_send(time_packet, burst, false, now_ms, 200),
            ));
            queue.push_await(AwaitSpec::new(0x02, None), false);
        }

        self.peers_by_serial.insert(serial.clone(), p.sender_addr);
        self.peers_by_id.insert(id, p.sender_addr);
        peer.pending_queues.clear();
        self.peers.insert(p.sender_addr, peer);

        let (active, create_actions) =
            self.queues.create(p.sender_addr, QueueType::Pairing, default_interface.clone());
        *active = queue;
        actions.extend(Self::queue_actions_to_central(
            p.sender_addr,
            &default_interface,
            create_actions,
        ));
        actions
    }

    /// Builds the reset/unpair pending queue. Returns the queue plus whether
    /// it should be promoted to active immediately (peer is reachable right
    /// now).
    pub fn build_reset_queue(
        &self,
        address: u32,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Result<(PacketQueue, bool), CentralError> {
        let peer = self.peers.get(&address).ok_or(CentralError::UnknownDevice)?;
        let burst = peer.rx_modes.contains(RxModes::WAKE_ON_RADIO);
        let reset_packet =
            Packet::new(0, 0xF0, 0x00, self.address, address, vec![0]).unwrap().with_burst(burst);
        let mut queue = PacketQueue::new(QueueType::Unpairing, peer.physical_interface_id.clone());
        queue.peer_address = Some(address);
        queue.push_send(reset_packet, burst, false, now_ms, response_delay_ms);
        queue.push_await(AwaitSpec::new(0x02, Some(0x02)), false);
        let promote_now = peer.rx_modes.is_immediately_reachable();
        Ok((queue, promote_now))
    }

    /// `delete_device(id, flags)`: promotes the reset queue if the peer is
    /// reachable now, otherwise appends it to the peer's pending queues.
    pub fn delete_device(
        &mut self,
        id: u64,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Result<Vec<CentralAction>, CentralError> {
        let address = *self.peers_by_id.get(&id).ok_or(CentralError::UnknownDevice)?;
        let (queue, promote_now) = self.build_reset_queue(address, now_ms, response_delay_ms)?;
        if promote_now {
            let interface_id = queue.physical_interface_id.clone();
            let (active, create_actions) =
                self.queues.create(address, QueueType::Unpairing, interface_id.clone());
            *active = queue;
            Ok(Self::queue_actions_to_central(address, &interface_id, create_actions))
        } else if let Some(peer) = self.peers.get_mut(&address) {
            peer.pending_queues.push(queue);
            Ok(Vec::new())
        } else {
            Ok(Vec::new())
        }
    }

    /// Fires when a `CentralAction::ScheduleDeferredPop` timer elapses:
    /// resumes the queue's deferred send.
    pub fn on_deferred_pop_timer(&mut self, address: u32, now_ms: u64, response_delay_ms: u64) -> Vec<CentralAction> {
        let interface_id = self
            .queues
            .get(address)
            .map(|q| q.physical_interface_id.clone())
            .unwrap_or_default();
        let Some(queue) = self.queues.get_mut(address) else {
            return Vec::new();
        };
        Self::queue_actions_to_central(address, &interface_id, queue.resume(now_ms, response_delay_ms))
    }

    pub fn set_install_mode(&mut self, on: bool, duration_s: u32) {
        self.pairing = on;
        self.install_mode_remaining_s = if on { duration_s } else { 0 };
    }

    pub fn get_install_mode(&self) -> u32 {
        self.install_mode_remaining_s
    }

    /// Cooperative pairing-mode countdown, decremented every 250ms by the
    /// caller's timer wheel instead of a dedicated thread.
    pub fn tick_install_mode(&mut self) {
        if self.install_mode_remaining_s == 0 {
            self.pairing = false;
            return;
        }
        self.install_mode_remaining_s = self.install_mode_remaining_s.saturating_sub(1);
        if self.install_mode_remaining_s == 0 {
            self.pairing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_description::StaticCatalog;
    use crate::persistence::InMemoryStore;
    use crate::rpc_sink::RecordingSink;
    use std::sync::Arc;

    fn ctx() -> Context {
        Context::new(
            Arc::new(RecordingSink::new()),
            Arc::new(StaticCatalog::new()),
            Arc::new(InMemoryStore::new()),
            crate::config::Config {
                interfaces: Vec::new(),
                centraladdress: None,
            },
        )
    }

    #[test]
    fn time_packet_has_fixed_length_and_type() {
        let mut c = Central::new(0x000001);
        let p = c.synthesize_time_packet(0x0AABBC, false);
        assert_eq!(p.message_type, 0x03);
        assert_eq!(p.subtype, 0x00);
        assert_eq!(p.payload.len(), 6);
        assert_eq!(p.payload[0], 0);
    }

    #[test]
    fn time_payload_packs_year_month_offset_bits_exactly() {
        use chrono::NaiveDate;

        // 2026-07-27 13:45:30 UTC, local offset +2h -> 4 units of 30 minutes.
        let utc = NaiveDate::from_ymd_opt(2026, 7, 27)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let payload = Central::time_payload(utc, 2 * 3600);

        assert_eq!(payload[0], 0);
        assert_eq!(payload[1], 26); // year % 100
        assert_eq!(payload[2], 27); // day, gmt-offset high bits are 0 for +4 units
        assert_eq!(payload[3], 13 | (4 << 5)); // hour | gmt-offset low bits
        assert_eq!(payload[4], 45 | ((7 & 0x0C) << 4)); // minute | month high bits
        assert_eq!(payload[5], 45 | ((7 & 0x03) << 6)); // minute | month low bits
    }

    #[test]
    fn pairing_request_too_short_payload_is_dropped() {
        let mut c = Central::new(0x000001);
        c.pairing = true;
        let ctx = ctx();
        let p = Packet::new(0, 0x00, 0x04, 0xAABBCC, 0, vec![0u8; 4]).unwrap();
        let actions = c.handle_pairing_request(&p, &ctx, 0);
        assert_eq!(actions, vec![CentralAction::Dropped]);
    }

    #[test]
    fn pairing_request_ignored_when_not_in_pairing_mode() {
        let mut c = Central::new(0x000001);
        let ctx = ctx();
        let mut payload = vec![0u8; 14];
        payload[0..2].copy_from_slice(&0x0010u16.to_be_bytes());
        payload[2..4].copy_from_slice(&0x0102u16.to_be_bytes());
        payload[4..14].copy_from_slice(b"ABCDEFGHIJ");
        let p = Packet::new(0, 0x00, 0x04, 0xAABBCC, 0, payload).unwrap();
        let actions = c.handle_pairing_request(&p, &ctx, 0);
        assert_eq!(actions, vec![CentralAction::Dropped]);
    }

    #[test]
    fn pairing_request_creates_peer_and_queue() {
        let mut c = Central::new(0x000001);
        c.pairing = true;
        let ctx = ctx();
        let mut payload = vec![0u8; 14];
        payload[0..2].copy_from_slice(&0x0010u16.to_be_bytes());
        payload[2..4].copy_from_slice(&0x0102u16.to_be_bytes());
        payload[4..14].copy_from_slice(b"ABCDEFGHIJ");
        let p = Packet::new(0, 0x00, 0x04, 0xAABBCC, 0, payload).unwrap();
        let actions = c.handle_pairing_request(&p, &ctx, 0);
        assert!(actions.iter().any(|a| matches!(a, CentralAction::Transmit { .. })));
        assert!(c.peer(0xAABBCC).is_some());
        assert!(c.queues.get(0xAABBCC).is_some());
    }

    #[test]
    fn install_mode_counts_down_and_switches_off() {
        let mut c = Central::new(0x000001);
        c.set_install_mode(true, 1);
        assert!(c.pairing);
        assert_eq!(c.get_install_mode(), 1);
        c.tick_install_mode();
        assert!(!c.pairing);
        assert_eq!(c.get_install_mode(), 0);
    }

    #[test]
    fn ack_pops_active_queue() {
        let mut c = Central::new(0x000001);
        let ctx = ctx();
        let interface_id = "cul0".to_string();
        let (queue, _) = c.queues.create(0xAABBCC, QueueType::Default, interface_id.clone());
        queue.push_send(
            Packet::new(0, 0x40, 0x00, 0x000001, 0xAABBCC, vec![0, 0]).unwrap(),
            false,
            false,
            0,
            40,
        );
        let ack = Packet::new(0, 0x02, 0x00, 0xAABBCC, 0x000001, vec![0x00, 0x00]).unwrap();
        c.handle_ack(&ack, &ctx, 50);
        assert!(c.queues.get(0xAABBCC).unwrap().is_empty());
    }

    #[test]
    fn nack_aborts_pairing_queue() {
        let mut c = Central::new(0x000001);
        let ctx = ctx();
        let (queue, _) = c.queues.create(0xAABBCC, QueueType::Pairing, "cul0".to_string());
        queue.push_send(
            Packet::new(0, 0x01, 0x00, 0x000001, 0xAABBCC, vec![0, 0]).unwrap(),
            false,
            false,
            0,
            40,
        );
        let nack = Packet::new(0, 0x02, 0x00, 0xAABBCC, 0x000001, vec![0x00, 0x80]).unwrap();
        c.handle_ack(&nack, &ctx, 50);
        assert!(c.queues.get(0xAABBCC).unwrap().is_empty());
    }
}
