//! Message registry: matches incoming packets to descriptors and enforces
//! the access-control bitset.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::packet::Packet;

bitflags! {
    /// Access bits checked against the current queue state for a received packet.
    /// `FULL` short-circuits every other check; `NONE` (the empty set) denies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AccessFlags: u8 {
        const PAIRED_TO_SENDER = 0b0000_0001;
        const DEST_IS_ME = 0b0000_0010;
        const CENTRAL = 0b0000_0100;
        const UNPAIRING = 0b0000_1000;
        const FULL = 0b0001_0000;
    }
}

/// Subtype match: `None` means "any subtype".
pub type SubtypeMatch = Option<u8>;

/// A single `(payload_offset, expected_byte)` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadPredicate {
    pub offset: usize,
    pub expected: u8,
}

/// Identifies which handler a matched packet should be dispatched to. Kept as
/// a plain tag rather than a raw function pointer — `Central` matches on this
/// enum instead of holding per-message closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Ack,
    TimeRequest,
    PairingRequest,
}

#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub message_type: u8,
    pub subtype: SubtypeMatch,
    pub predicates: Vec<PayloadPredicate>,
    pub access_mask: AccessFlags,
    pub access_mask_pairing: AccessFlags,
    pub handler: HandlerKind,
}

/// Match rule: type equal, subtype equal or either side "any", and every
/// `(offset, byte)` predicate holds.
pub fn matches_packet(
    message_type: u8,
    subtype: SubtypeMatch,
    predicates: &[PayloadPredicate],
    p: &Packet,
) -> bool {
    if message_type != p.message_type {
        return false;
    }
    if let Some(expected) = subtype {
        if expected != p.subtype {
            return false;
        }
    }
    for pred in predicates {
        match p.payload.get(pred.offset) {
            Some(b) if *b == pred.expected => {}
            _ => return false,
        }
    }
    true
}

impl MessageDescriptor {
    fn matches(&self, p: &Packet) -> bool {
        matches_packet(self.message_type, self.subtype, &self.predicates, p)
    }

    /// Effective mask for the current mode's pairing-mode swap.
    pub fn effective_mask(&self, pairing: bool) -> AccessFlags {
        if pairing {
            self.access_mask_pairing
        } else {
            self.access_mask
        }
    }
}

/// Ordered table of descriptors; first insertion-order match wins on ambiguity.
#[derive(Default)]
pub struct MessageRegistry {
    descriptors: Vec<MessageDescriptor>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, descriptor: MessageDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn find(&self, p: &Packet) -> Option<&MessageDescriptor> {
        self.descriptors.iter().find(|d| d.matches(p))
    }

    pub fn find_by_key(
        &self,
        message_type: u8,
        subtype: SubtypeMatch,
        predicates: &[PayloadPredicate],
    ) -> Option<&MessageDescriptor> {
        self.descriptors.iter().find(|d| {
            d.message_type == message_type
                && d.subtype == subtype
                && d.predicates.len() == predicates.len()
                && d.predicates
                    .iter()
                    .zip(predicates.iter())
                    .all(|(a, b)| a.offset == b.offset && a.expected == b.expected)
        })
    }

    /// Registers the three bootstrap descriptors every `Central` carries:
    /// the pairing request, the stateless ack, and the time request.
    pub fn with_bootstrap_descriptors() -> Self {
        let mut reg = Self::new();
        reg.add(MessageDescriptor {
            message_type: 0x00,
            subtype: Some(0x04),
            predicates: Vec::new(),
            access_mask: AccessFlags::FULL,
            access_mask_pairing: AccessFlags::FULL,
            handler: HandlerKind::PairingRequest,
        });
        reg.add(MessageDescriptor {
            message_type: 0x02,
            subtype: None,
            predicates: Vec::new(),
            access_mask: AccessFlags::PAIRED_TO_SENDER | AccessFlags::DEST_IS_ME,
            access_mask_pairing: AccessFlags::PAIRED_TO_SENDER | AccessFlags::DEST_IS_ME,
            handler: HandlerKind::Ack,
        });
        reg.add(MessageDescriptor {
            message_type: 0x03,
            subtype: Some(0x0A),
            predicates: Vec::new(),
            access_mask: AccessFlags::PAIRED_TO_SENDER | AccessFlags::DEST_IS_ME,
            access_mask_pairing: AccessFlags::PAIRED_TO_SENDER | AccessFlags::DEST_IS_ME,
            handler: HandlerKind::TimeRequest,
        });
        reg
    }
}

/// Inputs needed to evaluate the bitwise access rule for one received packet.
pub struct AccessContext {
    pub self_address: u32,
    pub central_address_of_sender: Option<u32>,
    pub pairing_in_progress_address: Option<u32>,
    pub sender_is_paired: bool,
    pub queue_is_unpairing: bool,
}

/// Evaluates "accept iff FULL, or all set bits hold".
pub fn check_access(mask: AccessFlags, p: &Packet, ctx: &AccessContext) -> bool {
    if mask.contains(AccessFlags::FULL) {
        return true;
    }
    if mask.contains(AccessFlags::DEST_IS_ME) && p.dest_addr != ctx.self_address {
        return false;
    }
    if mask.contains(AccessFlags::UNPAIRING) && !ctx.queue_is_unpairing {
        return false;
    }
    if mask.contains(AccessFlags::PAIRED_TO_SENDER) {
        let is_pairing_peer = ctx.pairing_in_progress_address == Some(p.sender_addr);
        if !(is_pairing_peer || ctx.sender_is_paired) {
            return false;
        }
    }
    if mask.contains(AccessFlags::CENTRAL) && ctx.central_address_of_sender != Some(p.sender_addr) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_packet(sender: u32, dest: u32) -> Packet {
        Packet::new(0, 0x02, 0x00, sender, dest, vec![0x00, 0x00]).unwrap()
    }

    #[test]
    fn bootstrap_registry_matches_ack_and_pairing() {
        let reg = MessageRegistry::with_bootstrap_descriptors();
        let ack = ack_packet(1, 2);
        let found = reg.find(&ack).unwrap();
        assert_eq!(found.handler, HandlerKind::Ack);

        let pairing = Packet::new(0, 0x00, 0x04, 1, 0, vec![0u8; 10]).unwrap();
        let found = reg.find(&pairing).unwrap();
        assert_eq!(found.handler, HandlerKind::PairingRequest);
    }

    #[test]
    fn first_match_wins_on_ambiguity() {
        let mut reg = MessageRegistry::new();
        reg.add(MessageDescriptor {
            message_type: 0x10,
            subtype: None,
            predicates: vec![],
            access_mask: AccessFlags::FULL,
            access_mask_pairing: AccessFlags::FULL,
            handler: HandlerKind::Ack,
        });
        reg.add(MessageDescriptor {
            message_type: 0x10,
            subtype: Some(0x01),
            predicates: vec![],
            access_mask: AccessFlags::FULL,
            access_mask_pairing: AccessFlags::FULL,
            handler: HandlerKind::TimeRequest,
        });
        let p = Packet::new(0, 0x10, 0x01, 0, 0, vec![]).unwrap();
        assert_eq!(reg.find(&p).unwrap().handler, HandlerKind::Ack);
    }

    #[test]
    fn access_full_bypasses_everything() {
        let ctx = AccessContext {
            self_address: 0xAAAAAA,
            central_address_of_sender: None,
            pairing_in_progress_address: None,
            sender_is_paired: false,
            queue_is_unpairing: false,
        };
        let p = ack_packet(1, 0xFFFFFF);
        assert!(check_access(AccessFlags::FULL, &p, &ctx));
    }

    #[test]
    fn access_dest_is_me_enforced() {
        let ctx = AccessContext {
            self_address: 0xAAAAAA,
            central_address_of_sender: None,
            pairing_in_progress_address: None,
            sender_is_paired: true,
            queue_is_unpairing: false,
        };
        let ok = ack_packet(1, 0xAAAAAA);
        let bad = ack_packet(1, 0xBBBBBB);
        assert!(check_access(AccessFlags::DEST_IS_ME, &ok, &ctx));
        assert!(!check_access(AccessFlags::DEST_IS_ME, &bad, &ctx));
    }

    #[test]
    fn access_paired_to_sender_allows_pairing_in_progress_peer() {
        let ctx = AccessContext {
            self_address: 0xAAAAAA,
            central_address_of_sender: None,
            pairing_in_progress_address: Some(0x123456),
            sender_is_paired: false,
            queue_is_unpairing: false,
        };
        let p = ack_packet(0x123456, 0xAAAAAA);
        assert!(check_access(AccessFlags::PAIRED_TO_SENDER, &p, &ctx));
    }

    #[test]
    fn access_unpairing_requires_unpairing_queue() {
        let ctx = AccessContext {
            self_address: 0xAAAAAA,
            central_address_of_sender: None,
            pairing_in_progress_address: None,
            sender_is_paired: true,
            queue_is_unpairing: false,
        };
        let p = ack_packet(1, 0xAAAAAA);
        assert!(!check_access(AccessFlags::UNPAIRING, &p, &ctx));
    }
}
