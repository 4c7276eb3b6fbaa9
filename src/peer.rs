//! Peer: per-device state, parameter stores, and the value-set / receive /
//! worker-tick operations that make up one paired device's side of the
//! protocol.
//!
//! The original blocking `set_value` (spin up to 20s polling queue drain)
//! does not fit the threadless redesign: instead `set_value` returns the
//! `PacketQueue` template (if any) for the caller to promote and drive
//! through the timer wheel, plus whether the write already completed
//! synchronously (the `STORE` case). Callers that need the old "block until
//! answered" semantics poll `PacketQueue::is_empty` themselves.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::device_description::{
    BinaryPayloadSource, DeviceDescription, FrameDirection, ParamOperationType, ParameterValue,
    ParamsetType,
};
use crate::error::CentralError;
use crate::packet::{Codec, Packet};
use crate::queue::{AwaitSpec, PacketQueue, QueueEntry, QueueType};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxModes: u8 {
        const ALWAYS = 0b0000_0001;
        const WAKE_ON_RADIO = 0b0000_0010;
        const CONFIG = 0b0000_0100;
        const BURST = 0b0000_1000;
        const LAZY_CONFIG = 0b0001_0000;
        const WAKEUP = 0b0010_0000;
    }
}

impl RxModes {
    /// Reachable without waiting for a wake cycle — either always listening
    /// or observed via wake-on-radio.
    pub fn is_immediately_reachable(&self) -> bool {
        self.intersects(RxModes::ALWAYS | RxModes::WAKE_ON_RADIO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicPeer {
    pub address: u32,
    pub channel: i32,
}

/// The three named service messages plus `CENTRAL_ADDRESS_SPOOFED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceMessages {
    pub unreach: bool,
    pub lowbat: bool,
    pub config_pending: bool,
    pub central_address_spoofed: bool,
}

/// `(channel, remote_peer_serial, parameter_name)` — the nested
/// channel/remote/name key used by the config/value/link paramset maps.
pub type ParamKey = (i32, Option<String>, String);

#[derive(Default)]
pub struct ParameterStore {
    values: HashMap<ParamKey, ParameterValue>,
}

impl ParameterStore {
    pub fn get(&self, channel: i32, remote: Option<&str>, name: &str) -> Option<&ParameterValue> {
        self.values
            .get(&(channel, remote.map(str::to_string), name.to_string()))
    }

    pub fn set(&mut self, channel: i32, remote: Option<&str>, name: &str, value: ParameterValue) {
        self.values
            .insert((channel, remote.map(str::to_string), name.to_string()), value);
    }

    /// Every non-remote-scoped `(name, value)` pair stored for `channel` —
    /// what `get_paramset` reads back.
    pub fn entries_for_channel(&self, channel: i32) -> Vec<(String, ParameterValue)> {
        self.values
            .iter()
            .filter(|((ch, remote, _), _)| *ch == channel && remote.is_none())
            .map(|((_, _, name), value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// What `set_value`/`put_paramset` produced: an in-memory update that already
/// completed (`STORE`), or a queue template the caller must promote/drive.
pub enum SetValueOutcome {
    StoredImmediately,
    Queued {
        queue: PacketQueue,
        /// `(channel, name, value)` for any `autoReset` parameter the write
        /// reset back to its default — these need their own upstream events,
        /// the write's own value event rides the ACK instead.
        reset_events: Vec<(i32, String, ParameterValue)>,
    },
}

/// Whether and when `packet_received` wants the peer's next pending queue
/// promoted to active. A deferred promotion gives a conversation the peer is
/// already having with someone else a moment to finish first, and is driven
/// by the caller's timer wheel, the same way a queue's own resend timer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPromotion {
    Now,
    AfterMs(u64),
}

/// What `packet_received` produced for the caller to act on.
#[derive(Default)]
pub struct ReceiveOutcome {
    /// A stateless OK/ACK the caller must transmit immediately.
    pub send_ack: Option<Packet>,
    /// `(channel, keys, values)` groups to hand to the upstream event sink.
    pub events: Vec<(i32, Vec<String>, Vec<ParameterValue>)>,
    /// Promote the peer's next pending queue now, or after a delay.
    pub promote_pending: Option<PendingPromotion>,
}

pub struct Peer {
    pub id: u64,
    pub address: u32,
    pub serial: String,
    pub device_type: u32,
    pub firmware: u16,
    pub rx_modes: RxModes,
    pub message_counter: u8,
    pub physical_interface_id: String,
    pub peers_by_channel: HashMap<i32, Vec<BasicPeer>>,
    pub config_params: ParameterStore,
    pub value_params: ParameterStore,
    pub link_params: ParameterStore,
    pub pending_queues: Vec<PacketQueue>,
    pub service_messages: ServiceMessages,
    pub last_packet_received_ms: Option<u64>,
    pub last_time_packet_ms: Option<u64>,
    pub random_sleep_ms: u64,
    pub last_received_counter: Option<u8>,
    pub last_rssi_time_s: Option<u64>,
}

impl Peer {
    pub fn new(
        id: u64,
        address: u32,
        serial: String,
        device_type: u32,
        firmware: u16,
        physical_interface_id: String,
        random_sleep_ms: u64,
    ) -> Self {
        Peer {
            id,
            address,
            serial,
            device_type,
            firmware,
            rx_modes: RxModes::empty(),
            message_counter: 0,
            physical_interface_id,
            peers_by_channel: HashMap::new(),
            config_params: ParameterStore::default(),
            value_params: ParameterStore::default(),
            link_params: ParameterStore::default(),
            pending_queues: Vec::new(),
            service_messages: ServiceMessages::default(),
            last_packet_received_ms: None,
            last_time_packet_ms: None,
            random_sleep_ms,
            last_received_counter: None,
            last_rssi_time_s: None,
        }
    }

    /// `message_counter` increments per outgoing peer-initiated packet and
    /// wraps modulo 256.
    pub fn next_message_counter(&mut self) -> u8 {
        let c = self.message_counter;
        self.message_counter = self.message_counter.wrapping_add(1);
        c
    }

    fn encode_binary_payload(
        payload: &mut [u8],
        spec: &crate::device_description::BinaryPayloadSpec,
        store: &ParameterStore,
        channel: i32,
        target_param: &str,
        target_value: &ParameterValue,
    ) -> Result<(), CentralError> {
        let raw = match &spec.source {
            BinaryPayloadSource::Constant(v) => *v,
            BinaryPayloadSource::Parameter {
                param_id,
                omit_if,
                index2_offset,
            } => {
                let mut v = if param_id == target_param {
                    target_value.as_u64()
                } else {
                    store
                        .get(channel, None, param_id)
                        .map(ParameterValue::as_u64)
                        .unwrap_or(0)
                };
                if let Some(omit) = omit_if {
                    if v == *omit {
                        return Ok(());
                    }
                }
                if let Some(shift) = index2_offset {
                    v >>= shift;
                }
                v
            }
        };
        Codec::set_position(payload, spec.byte_index, spec.bit_offset, spec.bit_size, raw)
            .map_err(CentralError::from)
    }

    /// Builds the radio packet for a `COMMAND`-type write.
    fn build_set_packet(
        &self,
        descr: &DeviceDescription,
        channel: i32,
        param_name: &str,
        value: &ParameterValue,
        self_address: u32,
    ) -> Result<Packet, CentralError> {
        let tmpl = descr
            .set_packet_templates
            .get(&(channel, param_name.to_string()))
            .ok_or(CentralError::NotSettable)?;
        let max_byte = tmpl
            .binary_payloads
            .iter()
            .map(|b| b.byte_index as usize + 1)
            .max()
            .unwrap_or(0);
        let mut payload = vec![0u8; max_byte];
        if let Some(idx) = tmpl.subtype_index {
            payload[idx as usize] = tmpl.subtype;
        }
        if let Some(idx) = tmpl.channel_index {
            payload[idx as usize] = channel as u8;
        }
        for spec in &tmpl.binary_payloads {
            Self::encode_binary_payload(
                &mut payload,
                spec,
                &self.value_params,
                channel,
                param_name,
                value,
            )?;
        }
        Packet::new(
            0,
            tmpl.message_type,
            tmpl.subtype,
            self_address,
            self.address,
            payload,
        )
        .map_err(CentralError::from)
    }

    /// Resets every parameter named in `descr.auto_reset[param_name]` back to
    /// its declared default, emitting for any that are readable.
    fn apply_auto_reset(
        &mut self,
        descr: &DeviceDescription,
        channel: i32,
        param_name: &str,
    ) -> Vec<(String, ParameterValue)> {
        let mut emitted = Vec::new();
        let Some(names) = descr.auto_reset.get(param_name) else {
            return emitted;
        };
        for name in names {
            // Defaults live on the RpcConfigurationParameter the catalog would
            // supply per-channel; without a live channel schema lookup here we
            // reset to the last persisted value's type default.
            if let Some(current) = self.value_params.get(channel, None, name).cloned() {
                let reset = match current {
                    ParameterValue::Bool(_) => ParameterValue::Bool(false),
                    ParameterValue::Int(_) => ParameterValue::Int(0),
                    ParameterValue::Float(_) => ParameterValue::Float(0.0),
                    ParameterValue::Str(_) => ParameterValue::Str(String::new()),
                };
                self.value_params.set(channel, None, name, reset.clone());
                emitted.push((name.clone(), reset));
            }
        }
        emitted
    }

    /// `set_value(channel, name, value, wait)`, minus the blocking `wait`
    /// spin (see module doc).
    pub fn set_value(
        &mut self,
        descr: &DeviceDescription,
        channel: i32,
        name: &str,
        value: ParameterValue,
        self_address: u32,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Result<SetValueOutcome, CentralError> {
        let existing = self
            .value_params
            .get(channel, None, name)
            .cloned()
            .ok_or(CentralError::UnknownParameter)?;

        // Only STORE-type values carry a stable existing value whose shape
        // also tells us the op type in this simplified store; COMMAND params
        // are recognised by having a set-packet template registered.
        let has_template = descr
            .set_packet_templates
            .contains_key(&(channel, name.to_string()));
        let op_type = if has_template {
            ParamOperationType::Command
        } else {
            ParamOperationType::Store
        };

        match op_type {
            ParamOperationType::Store => {
                self.value_params.set(channel, None, name, value);
                Ok(SetValueOutcome::StoredImmediately)
            }
            ParamOperationType::Command => {
                let effective = if matches!(value, ParameterValue::Bool(_)) && existing == value {
                    value.toggled()
                } else {
                    value
                };
                let packet = self.build_set_packet(descr, channel, name, &effective, self_address)?;
                let reset_events = self
                    .apply_auto_reset(descr, channel, name)
                    .into_iter()
                    .map(|(reset_name, reset_value)| (channel, reset_name, reset_value))
                    .collect();

                let tmpl = descr
                    .set_packet_templates
                    .get(&(channel, name.to_string()))
                    .expect("checked above");
                let mut queue =
                    PacketQueue::new(QueueType::Peer, self.physical_interface_id.clone());
                queue.peer_address = Some(self.address);
                queue.parameter_name = name.to_string();
                queue.channel = channel;
                queue.push_send(
                    packet,
                    self.rx_modes.contains(RxModes::WAKE_ON_RADIO),
                    false,
                    now_ms,
                    response_delay_ms,
                );
                queue.push_await(
                    AwaitSpec::new(tmpl.response_message_type, tmpl.response_subtype),
                    false,
                );
                Ok(SetValueOutcome::Queued { queue, reset_events })
            }
        }
    }

    /// `put_paramset(channel, type, struct)`: for `VALUES` delegates to
    /// `set_value` per entry; for `CONFIG`/`LINK` groups writes by list id and
    /// byte index, OR-combining bitfield params that share a byte, then
    /// builds one `type=0x10` config-write packet per list padded with the
    /// channel's current values for every byte this call didn't touch.
    pub fn put_paramset(
        &mut self,
        descr: &DeviceDescription,
        channel: i32,
        paramset: ParamsetType,
        values: &[(String, ParameterValue)],
        self_address: u32,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Result<Vec<PacketQueue>, CentralError> {
        match paramset {
            ParamsetType::Values => {
                let mut queues = Vec::new();
                for (name, value) in values {
                    match self.set_value(
                        descr,
                        channel,
                        name,
                        value.clone(),
                        self_address,
                        now_ms,
                        response_delay_ms,
                    )? {
                        SetValueOutcome::Queued { queue, .. } => queues.push(queue),
                        SetValueOutcome::StoredImmediately => {}
                    }
                }
                Ok(queues)
            }
            ParamsetType::Config | ParamsetType::Link => {
                self.put_config_paramset(descr, channel, values, self_address, now_ms, response_delay_ms)
            }
        }
    }

    fn put_config_paramset(
        &mut self,
        descr: &DeviceDescription,
        channel: i32,
        values: &[(String, ParameterValue)],
        self_address: u32,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Result<Vec<PacketQueue>, CentralError> {
        // list id -> byte index -> OR-combined byte.
        let mut changed: HashMap<u32, HashMap<u8, u8>> = HashMap::new();

        for (name, value) in values {
            let schema = descr
                .config_parameter_schema
                .get(&(channel, name.clone()))
                .cloned()
                .ok_or(CentralError::UnknownParameter)?;
            let byte_index = schema.byte_index.ok_or(CentralError::NotSettable)?;
            let list_id = schema.list_id.unwrap_or(0);

            self.config_params.set(channel, None, name, value.clone());

            let mut byte = 0u8;
            Codec::set_position(
                std::slice::from_mut(&mut byte),
                0,
                schema.bit_offset,
                schema.bit_size,
                value.as_u64(),
            )
            .map_err(CentralError::from)?;
            *changed.entry(list_id).or_default().entry(byte_index).or_insert(0) |= byte;
        }

        let burst = self.rx_modes.contains(RxModes::WAKE_ON_RADIO);
        let mut queues = Vec::new();
        for (list_id, bytes) in &changed {
            if bytes.is_empty() {
                continue;
            }
            let max_index = *bytes.keys().max().unwrap() as usize;
            let mut payload = vec![0u8; max_index + 1];
            payload[1] = *list_id as u8;

            // Pad every config param of this channel/list not written by this
            // call with its currently-stored (or default) value.
            for ((param_channel, name), schema) in &descr.config_parameter_schema {
                if *param_channel != channel || schema.list_id.unwrap_or(0) != *list_id {
                    continue;
                }
                let Some(idx) = schema.byte_index else { continue };
                if bytes.contains_key(&idx) || idx as usize >= payload.len() {
                    continue;
                }
                let current = self
                    .config_params
                    .get(channel, None, name)
                    .cloned()
                    .unwrap_or_else(|| schema.default.clone());
                let mut byte = 0u8;
                if Codec::set_position(
                    std::slice::from_mut(&mut byte),
                    0,
                    schema.bit_offset,
                    schema.bit_size,
                    current.as_u64(),
                )
                .is_ok()
                {
                    payload[idx as usize] |= byte;
                }
            }
            for (idx, byte) in bytes {
                payload[*idx as usize] |= *byte;
            }

            let packet = Packet::new(
                self.next_message_counter(),
                0x10,
                0x00,
                self_address,
                self.address,
                payload,
            )
            .map_err(CentralError::from)?
            .with_burst(burst);

            let mut queue = PacketQueue::new(QueueType::Config, self.physical_interface_id.clone());
            queue.peer_address = Some(self.address);
            queue.channel = channel;
            queue.no_sending = true;
            queue.push_send(packet, burst, false, now_ms, response_delay_ms);
            queue.push_await(AwaitSpec::new(0x02, Some(0x02)), false);
            queues.push(queue);
        }

        self.service_messages.config_pending = true;
        Ok(queues)
    }

    /// `get_paramset(channel, type)`: the store's current view for every
    /// parameter this peer has recorded for `channel`, the read side of
    /// `put_paramset`'s round trip.
    pub fn get_paramset(&self, channel: i32, paramset: ParamsetType) -> Vec<(String, ParameterValue)> {
        let store = match paramset {
            ParamsetType::Config => &self.config_params,
            ParamsetType::Values => &self.value_params,
            ParamsetType::Link => &self.link_params,
        };
        store.entries_for_channel(channel)
    }

    /// `get_values_from_packet(p)`: walks the device description's frame
    /// descriptors for `p.message_type`.
    pub fn get_values_from_packet(
        &mut self,
        descr: &DeviceDescription,
        p: &Packet,
    ) -> Vec<(i32, String, ParameterValue)> {
        let mut out = Vec::new();
        let Some(frames) = descr.frame_descriptors_by_type.get(&p.message_type) else {
            return out;
        };
        for frame in frames {
            if frame.direction != FrameDirection::ToCentral {
                continue;
            }
            if let Some(subtype) = frame.fixed_subtype {
                if subtype != p.subtype {
                    continue;
                }
            }
            if let Some(len) = frame.fixed_length {
                if len as usize != p.payload.len() {
                    continue;
                }
            }
            let channel = if let Some(idx) = frame.channel_index {
                *p.payload.get(idx as usize).unwrap_or(&0) as i32
            } else {
                frame.fixed_channel.unwrap_or(0)
            };
            for (name, spec) in &frame.fields {
                let Ok(raw) =
                    Codec::get_position(&p.payload, spec.byte_index, spec.bit_offset, spec.bit_size)
                else {
                    continue;
                };
                let value = ParameterValue::Int(raw as i64);
                self.value_params.set(channel, None, name, value.clone());
                if Some(name.as_str()) == frame.lowbat_param.as_deref() {
                    self.service_messages.lowbat = raw != 0;
                }
                out.push((channel, name.clone(), value));
            }
        }
        out
    }

    /// `packet_received(p)` — `self_address` is the Central's own address,
    /// used for the stateless-OK / dedupe rule.
    pub fn packet_received(
        &mut self,
        descr: &DeviceDescription,
        p: &Packet,
        self_address: u32,
        now_ms: u64,
    ) -> ReceiveOutcome {
        self.last_packet_received_ms = Some(now_ms);
        self.service_messages.unreach = false;
        let mut outcome = ReceiveOutcome::default();

        if p.dest_addr != 0 && self.last_received_counter == Some(p.counter) {
            if p.message_type != 0x02 && p.message_type != 0xFF && p.dest_addr == self_address {
                outcome.send_ack = Some(self.stateless_ack(p, self_address));
            }
            return outcome;
        }
        self.last_received_counter = Some(p.counter);

        let mut by_channel: HashMap<i32, (Vec<String>, Vec<ParameterValue>)> = HashMap::new();
        for (channel, name, value) in self.get_values_from_packet(descr, p) {
            let entry = by_channel.entry(channel).or_default();
            entry.0.push(name);
            entry.1.push(value);
        }
        outcome.events = by_channel
            .into_iter()
            .map(|(channel, (keys, values))| (channel, keys, values))
            .collect();

        if p.sender_addr == self_address && !self.pending_queues.is_empty() {
            if p.dest_addr == self_address {
                // The device just answered us directly: it's awake now, so
                // its next pending send no longer needs a wake-on-radio
                // preamble.
                if let Some(next) = self.pending_queues.first_mut() {
                    next.clear_burst_of_head_send();
                }
                outcome.send_ack = Some(self.stateless_ack(p, self_address));
                if p.subtype & 2 != 0 {
                    outcome.promote_pending = Some(PendingPromotion::Now);
                }
            } else if p.subtype & 2 != 0 {
                // Peer replied to someone else, not to us directly; give it a
                // moment to finish that exchange before we promote our own
                // pending work onto the radio.
                outcome.promote_pending = Some(PendingPromotion::AfterMs(60));
            }
        } else if p.message_type != 0x02 && p.message_type != 0xFF && p.dest_addr == self_address {
            outcome.send_ack = Some(self.stateless_ack(p, self_address));
        }

        outcome
    }

    fn stateless_ack(&self, p: &Packet, self_address: u32) -> Packet {
        Packet::new(0, 0x02, 0x00, self_address, p.sender_addr, vec![0x00, 0x00])
            .expect("fixed 2-byte ACK payload fits")
    }

    /// Once-per-pass maintenance: reachability timeout, periodic time-sync
    /// resend, and pending-queue re-enqueue when `config_pending`.
    pub fn worker_tick(&mut self, descr: &DeviceDescription, now_ms: u64) -> WorkerTickOutcome {
        let mut outcome = WorkerTickOutcome::default();
        if let Some(last) = self.last_packet_received_ms {
            if now_ms.saturating_sub(last) > descr.timeout_s * 1000 {
                self.service_messages.unreach = true;
            }
        }
        const TWELVE_HOURS_MS: u64 = 12 * 60 * 60 * 1000;
        if descr.needs_time {
            let due = match self.last_time_packet_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= TWELVE_HOURS_MS,
            };
            if due {
                outcome.send_time_packet = true;
                self.last_time_packet_ms = Some(now_ms);
            }
        }
        const CONFIG_PENDING_BASE_MS: u64 = 900_000;
        if self.service_messages.config_pending
            && self.rx_modes.is_immediately_reachable()
            && now_ms.saturating_sub(self.last_packet_received_ms.unwrap_or(0))
                >= CONFIG_PENDING_BASE_MS + self.random_sleep_ms
        {
            outcome.reenqueue_pending = true;
        }
        outcome
    }
}

#[derive(Default)]
pub struct WorkerTickOutcome {
    pub send_time_packet: bool,
    pub reenqueue_pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_description::{
        BinaryPayloadSpec, DeviceDescription, FrameDescriptor, SetPacketTemplate,
    };

    fn peer() -> Peer {
        let mut p = Peer::new(1, 0xAABBCC, "ABCDEFGHIJ".into(), 0x0102, 0x10, "cul0".into(), 0);
        p.rx_modes = RxModes::ALWAYS;
        p
    }

    #[test]
    fn message_counter_wraps() {
        let mut p = peer();
        p.message_counter = 255;
        assert_eq!(p.next_message_counter(), 255);
        assert_eq!(p.message_counter, 0);
    }

    #[test]
    fn store_param_updates_in_memory_only() {
        let mut p = peer();
        p.value_params.set(1, None, "mode", ParameterValue::Int(1));
        let descr = DeviceDescription::default();
        let outcome = p
            .set_value(&descr, 1, "mode", ParameterValue::Int(2), 0x000001, 0, 40)
            .unwrap();
        assert!(matches!(outcome, SetValueOutcome::StoredImmediately));
        assert_eq!(p.value_params.get(1, None, "mode"), Some(&ParameterValue::Int(2)));
    }

    #[test]
    fn command_param_builds_and_queues_a_packet() {
        let mut p = peer();
        p.value_params.set(1, None, "on_off", ParameterValue::Bool(false));
        let mut descr = DeviceDescription::default();
        descr.set_packet_templates.insert(
            (1, "on_off".to_string()),
            SetPacketTemplate {
                message_type: 0x40,
                subtype: 0x00,
                subtype_index: None,
                channel_index: Some(0),
                binary_payloads: vec![BinaryPayloadSpec {
                    byte_index: 1,
                    bit_offset: 0,
                    bit_size: 1,
                    source: BinaryPayloadSource::Parameter {
                        param_id: "on_off".into(),
                        omit_if: None,
                        index2_offset: None,
                    },
                }],
                response_message_type: 0x02,
                response_subtype: None,
            },
        );
        let outcome = p
            .set_value(&descr, 1, "on_off", ParameterValue::Bool(true), 0x000001, 1000, 40)
            .unwrap();
        match outcome {
            SetValueOutcome::Queued { queue, .. } => {
                assert!(queue.is_in_flight());
                assert_eq!(queue.len(), 2);
            }
            _ => panic!("expected a queued command packet"),
        }
    }

    #[test]
    fn get_values_from_packet_extracts_and_tracks_lowbat() {
        let mut p = peer();
        let mut descr = DeviceDescription::default();
        descr.frame_descriptors_by_type.insert(
            0x60,
            vec![FrameDescriptor {
                direction: FrameDirection::ToCentral,
                fixed_subtype: None,
                fixed_length: None,
                fixed_channel: Some(1),
                channel_index: None,
                fields: vec![(
                    "battery_low".into(),
                    BinaryPayloadSpec {
                        byte_index: 0,
                        bit_offset: 7,
                        bit_size: 1,
                        source: BinaryPayloadSource::Constant(0),
                    },
                )],
                lowbat_param: Some("battery_low".into()),
            }],
        );
        let pkt = Packet::new(0, 0x60, 0x00, 0xAABBCC, 0x000001, vec![0b1000_0000]).unwrap();
        let values = p.get_values_from_packet(&descr, &pkt);
        assert_eq!(values.len(), 1);
        assert!(p.service_messages.lowbat);
    }

    #[test]
    fn packet_received_dedupes_repeated_counter() {
        let mut p = peer();
        let descr = DeviceDescription::default();
        let pkt = Packet::new(5, 0x60, 0x00, 0xAABBCC, 0x000001, vec![0]).unwrap();
        let first = p.packet_received(&descr, &pkt, 0x000001, 1000);
        assert!(first.send_ack.is_some());
        let second = p.packet_received(&descr, &pkt, 0x000001, 1050);
        assert!(second.send_ack.is_some());
        assert_eq!(p.last_received_counter, Some(5));
    }

    #[test]
    fn worker_tick_flags_unreach_after_timeout() {
        let mut p = peer();
        p.last_packet_received_ms = Some(0);
        let descr = DeviceDescription {
            timeout_s: 60,
            ..Default::default()
        };
        p.worker_tick(&descr, 30_000);
        assert!(!p.service_messages.unreach);
        p.worker_tick(&descr, 120_000);
        assert!(p.service_messages.unreach);
    }

    #[test]
    fn worker_tick_schedules_time_packet_after_twelve_hours() {
        let mut p = peer();
        let descr = DeviceDescription {
            needs_time: true,
            ..Default::default()
        };
        let outcome = p.worker_tick(&descr, 0);
        assert!(outcome.send_time_packet);
        let outcome = p.worker_tick(&descr, 1000);
        assert!(!outcome.send_time_packet);
        let outcome = p.worker_tick(&descr, 12 * 60 * 60 * 1000 + 1);
        assert!(outcome.send_time_packet);
    }

    fn config_schema() -> DeviceDescription {
        use crate::device_description::RpcConfigurationParameter;
        let mut descr = DeviceDescription::default();
        descr.config_parameter_schema.insert(
            (1, "TEMP".into()),
            RpcConfigurationParameter {
                id: "TEMP".into(),
                op_type: ParamOperationType::Store,
                readable: true,
                writeable: true,
                default: ParameterValue::Int(0),
                list_id: Some(1),
                byte_index: Some(3),
                bit_offset: 0,
                bit_size: 8,
            },
        );
        descr.config_parameter_schema.insert(
            (1, "MODE".into()),
            RpcConfigurationParameter {
                id: "MODE".into(),
                op_type: ParamOperationType::Store,
                readable: true,
                writeable: true,
                default: ParameterValue::Int(0),
                list_id: Some(1),
                byte_index: Some(3),
                bit_offset: 7,
                bit_size: 1,
            },
        );
        descr
    }

    #[test]
    fn put_paramset_groups_config_writes_by_list_and_byte() {
        let mut p = peer();
        let descr = config_schema();
        let queues = p
            .put_paramset(
                &descr,
                1,
                ParamsetType::Config,
                &[
                    ("TEMP".into(), ParameterValue::Int(0x15)),
                    ("MODE".into(), ParameterValue::Int(1)),
                ],
                0x000001,
                0,
                40,
            )
            .unwrap();
        assert_eq!(queues.len(), 1);
        let queue = &queues[0];
        assert_eq!(queue.channel, 1);
        match queue.front() {
            Some(QueueEntry::SendPacket { packet, .. }) => {
                assert_eq!(packet.message_type, 0x10);
                assert_eq!(packet.payload[1], 1);
                assert_eq!(packet.payload[3], 0x15 | 0x80);
            }
            other => panic!("expected a config-write send entry, got {other:?}"),
        }
        assert!(p.service_messages.config_pending);
    }

    #[test]
    fn put_paramset_then_get_paramset_round_trips() {
        let mut p = peer();
        let descr = config_schema();
        p.put_paramset(
            &descr,
            1,
            ParamsetType::Config,
            &[("TEMP".into(), ParameterValue::Int(0x15))],
            0x000001,
            0,
            40,
        )
        .unwrap();
        let values = p.get_paramset(1, ParamsetType::Config);
        assert!(values.contains(&("TEMP".to_string(), ParameterValue::Int(0x15))));
    }
}
