//! Packet queue: ordered send/await entries with resend back-off.
//!
//! Re-architected around a thread-per-queue design: instead of a
//! resend-timer thread and a send thread per queue, `PacketQueue` is a pure
//! state machine. Callers (the `Central` dispatcher) drive it with `now_ms`
//! and a response-delay budget, and receive back a list of [`QueueAction`]s
//! describing what to transmit and what to (re)schedule on the shared
//! [`crate::timers::TimerWheel`]. This preserves every ordering
//! guarantee — entries still advance strictly in order, an `AwaitMessage`
//! still gates progress — without a thread per queue.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::message::{matches_packet, PayloadPredicate, SubtypeMatch};
use crate::packet::Packet;

/// Default retry count for most peers; wall switches use 12.
pub const DEFAULT_RETRIES: u8 = 3;
pub const SWITCH_RETRIES: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    Empty,
    Default,
    Pairing,
    Unpairing,
    Config,
    Peer,
}

/// A barrier entry: the queue may not advance past it until a packet
/// matching its spec arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitSpec {
    pub message_type: u8,
    pub subtype: SubtypeMatch,
    pub predicates: Vec<PayloadPredicate>,
}

impl AwaitSpec {
    pub fn new(message_type: u8, subtype: SubtypeMatch) -> Self {
        AwaitSpec {
            message_type,
            subtype,
            predicates: Vec::new(),
        }
    }

    fn matches(&self, p: &Packet) -> bool {
        matches_packet(self.message_type, self.subtype, &self.predicates, p)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEntry {
    SendPacket {
        packet: Packet,
        stealthy: bool,
        force_resend: bool,
    },
    AwaitMessage {
        spec: AwaitSpec,
        force_resend: bool,
    },
}

/// What the caller must do in response to a queue-mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueAction {
    /// Transmit `packet` now via the queue's bound physical interface.
    Transmit { packet: Packet, stealthy: bool },
    /// (Re)schedule the resend-check timer `delay_ms` from now.
    ScheduleResendCheck { delay_ms: u64 },
    /// Cancel any outstanding resend-check timer for this queue.
    CancelResendTimer,
    /// The queue has fully drained; the `QueueManager` should consider
    /// promoting the next pending queue for this peer.
    Drained,
    /// Retries were exhausted and `force_resend` was not set: the send failed.
    Failure,
    /// Resume this queue's pop `delay_ms` from now — the deferred-enqueue
    /// path that lets the other side answer the packet it just acked first.
    ScheduleDeferredPop { delay_ms: u64 },
}

/// One entry in the ordered sequence, plus the bookkeeping around it.
pub struct PacketQueue {
    pub queue_type: QueueType,
    entries: VecDeque<QueueEntry>,
    pub pending_queue_id: u32,
    pub retries: u8,
    pub parameter_name: String,
    pub channel: i32,
    pub physical_interface_id: String,
    pub peer_address: Option<u32>,
    pub no_sending: bool,
    resend_counter: u8,
    pub last_pop_ms: Option<u64>,
    pub working_on_pending: bool,
    in_flight_since_ms: Option<u64>,
}

impl PacketQueue {
    pub fn new(queue_type: QueueType, physical_interface_id: String) -> Self {
        PacketQueue {
            queue_type,
            entries: VecDeque::new(),
            pending_queue_id: 0,
            retries: DEFAULT_RETRIES,
            parameter_name: String::new(),
            channel: -1,
            physical_interface_id,
            peer_address: None,
            no_sending: false,
            resend_counter: 0,
            last_pop_ms: None,
            working_on_pending: false,
            in_flight_since_ms: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Raw entry list, for serialization.
    pub fn entries(&self) -> &VecDeque<QueueEntry> {
        &self.entries
    }

    /// Rebuilds a queue from its persisted parts. The queue starts with
    /// nothing in flight; the caller (`Central`, on restart) must trigger
    /// `begin_send_cycle` itself if the head is a `SendPacket` that should
    /// resume immediately, e.g. via `pop`/`push_front`.
    pub fn from_parts(
        queue_type: QueueType,
        entries: VecDeque<QueueEntry>,
        parameter_name: String,
        channel: i32,
        physical_interface_id: String,
        peer_address: Option<u32>,
    ) -> Self {
        let mut q = PacketQueue::new(queue_type, physical_interface_id);
        q.entries = entries;
        q.parameter_name = parameter_name;
        q.channel = channel;
        q.peer_address = peer_address;
        q
    }

    /// `true` while the head `SendPacket` is sent and awaiting its response
    /// window or a resend — the "at most one in-flight send" invariant.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight_since_ms.is_some()
    }

    fn gap_ms(attempt: u8, burst: bool) -> u64 {
        if attempt <= 3 {
            if burst {
                3000
            } else {
                200
            }
        } else if burst {
            4000
        } else {
            400
        }
    }

    fn begin_send_cycle(&mut self, now_ms: u64, response_delay_ms: u64) -> Vec<QueueAction> {
        let mut actions = Vec::new();
        if self.no_sending {
            return actions;
        }
        if let Some(QueueEntry::SendPacket { packet, stealthy, .. }) = self.entries.front() {
            self.in_flight_since_ms = Some(now_ms);
            self.resend_counter = 0;
            actions.push(QueueAction::Transmit {
                    packet: packet.clone(),
                    stealthy: *stealthy,
            });
            actions.push(QueueAction::ScheduleResendCheck {
                    delay_ms: response_delay_ms,
            });
        }
        actions
    }

    /// Appends (or immediately begins) a send: if the queue is empty or its
    /// front is an `AwaitMessage`, the send cycle begins right away;
    /// otherwise it is enqueued behind whatever is already in flight. A front
    /// `AwaitMessage` means nothing is currently in flight on this queue, so
    /// the new send is promoted ahead of it and sent right away; the
    /// `AwaitMessage` barrier remains queued behind it.
    pub fn push_send(
        &mut self,
        packet: Packet,
        stealthy: bool,
        force_resend: bool,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Vec<QueueAction> {
        let entry = QueueEntry::SendPacket {
            packet,
            stealthy,
            force_resend,
        };
        let should_begin_now = match self.entries.front() {
            None => true,
            Some(QueueEntry::AwaitMessage { .. }) => !self.is_in_flight(),
            Some(QueueEntry::SendPacket { .. }) => false,
        };
        if should_begin_now {
            self.entries.push_front(entry);
        } else {
            self.entries.push_back(entry);
        }
        if should_begin_now {
            self.begin_send_cycle(now_ms, response_delay_ms)
        } else {
            Vec::new()
        }
    }

    /// Appends a barrier entry.
    pub fn push_await(&mut self, spec: AwaitSpec, force_resend: bool) {
        self.entries.push_back(QueueEntry::AwaitMessage { spec, force_resend });
    }

    /// Used by the access layer when a resent stimulus must jump the line:
    /// pushes `packet` to the very front, optionally popping the current
    /// front first.
    pub fn push_front(
        &mut self,
        packet: Packet,
        pop_first: bool,
        stealthy: bool,
        force_resend: bool,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Vec<QueueAction> {
        let mut actions = Vec::new();
        if pop_first {
            actions.extend(self.pop(now_ms, response_delay_ms));
        }
        self.entries.push_front(QueueEntry::SendPacket {
                packet,
                stealthy,
                force_resend,
        });
        actions.extend(self.begin_send_cycle(now_ms, response_delay_ms));
        actions
    }

    /// Splices a pending-queue template's entries onto the back of this queue.
    pub fn splice_pending(&mut self, mut other: PacketQueue) {
        self.entries.append(&mut other.entries);
    }

    /// Retires the head entry. If the new head is a `SendPacket`, its send
    /// cycle begins immediately.
    pub fn pop(&mut self, now_ms: u64, response_delay_ms: u64) -> Vec<QueueAction> {
        let mut actions = Vec::new();
        if self.entries.pop_front().is_some() {
            self.last_pop_ms = Some(now_ms);
        }
        self.in_flight_since_ms = None;
        self.resend_counter = 0;
        actions.push(QueueAction::CancelResendTimer);
        match self.entries.front() {
            Some(QueueEntry::SendPacket { .. }) => {
                actions.extend(self.begin_send_cycle(now_ms, response_delay_ms));
            }
            Some(QueueEntry::AwaitMessage { .. }) => {}
            None => actions.push(QueueAction::Drained),
        }
        actions
    }

    /// If the front entry is an `AwaitMessage` matching `p`, advances past it.
    /// Returns `Some` iff it matched (and the queue has therefore advanced).
    pub fn try_consume_await(
        &mut self,
        p: &Packet,
        now_ms: u64,
        response_delay_ms: u64,
    ) -> Option<Vec<QueueAction>> {
        let matched = match self.entries.front() {
            Some(QueueEntry::AwaitMessage { spec, .. }) => spec.matches(p),
            _ => false,
        };
        if matched {
            Some(self.pop(now_ms, response_delay_ms))
        } else {
            None
        }
    }

    /// Drives the resend-check timer firing at `now_ms`. Returns the actions
    /// to perform: another transmit + reschedule, a failure, or nothing if
    /// the head is no longer an in-flight send (already matched and popped).
    pub fn on_resend_timer(&mut self, now_ms: u64, burst: bool) -> Vec<QueueAction> {
        let mut actions = Vec::new();
        let (packet, stealthy, force_resend) = match self.entries.front() {
            Some(QueueEntry::SendPacket {
                    packet,
                    stealthy,
                    force_resend,
            }) if self.is_in_flight() => (packet.clone(), *stealthy, *force_resend),
            _ => return actions,
        };
        if self.resend_counter >= self.retries {
            if force_resend {
                // Keep trying indefinitely at the escalated cadence until `clear`.
                actions.push(QueueAction::Transmit { packet, stealthy });
                self.in_flight_since_ms = Some(now_ms);
                actions.push(QueueAction::ScheduleResendCheck {
                        delay_ms: Self::gap_ms(self.resend_counter, burst),
                });
            } else {
                self.resend_counter = 0;
                self.in_flight_since_ms = None;
                actions.push(QueueAction::Failure);
            }
            return actions;
        }
        self.resend_counter += 1;
        actions.push(QueueAction::Transmit { packet, stealthy });
        self.in_flight_since_ms = Some(now_ms);
        actions.push(QueueAction::ScheduleResendCheck {
                delay_ms: Self::gap_ms(self.resend_counter, burst),
        });
        actions
    }

    /// Clears the burst flag on the head entry, if it is a pending
    /// `SendPacket`. Used when the peer just acked the packet ahead of this
    /// one in its pending queue: the head no longer needs burst wakeup since
    /// the peer is already known awake.
    pub fn clear_burst_of_head_send(&mut self) {
        if let Some(QueueEntry::SendPacket { packet, .. }) = self.entries.front_mut() {
            packet.burst = false;
        }
    }

    /// Defers this queue's first send by `delay_ms` instead of beginning now:
    /// the caller's timer wheel must call `resume` once it elapses. Used to
    /// wait a beat before enqueuing pending work, when the packet that
    /// triggered the promotion wasn't addressed to us. Clears any in-flight
    /// bookkeeping left over from when the entries were built, same as
    /// `activate`.
    pub fn pop_wait(&mut self, delay_ms: u64) -> Vec<QueueAction> {
        self.in_flight_since_ms = None;
        self.resend_counter = 0;
        vec![QueueAction::ScheduleDeferredPop { delay_ms }]
    }

    /// Fires when a `pop_wait` timer elapses: begins the send cycle `pop_wait`
    /// deferred.
    pub fn resume(&mut self, now_ms: u64, response_delay_ms: u64) -> Vec<QueueAction> {
        self.begin_send_cycle(now_ms, response_delay_ms)
    }

    /// Begins this queue's send cycle from scratch, as when a queue parked on
    /// a peer's pending list is promoted to active immediately. Clears any
    /// in-flight bookkeeping left over from when its entries were built.
    pub fn activate(&mut self, now_ms: u64, response_delay_ms: u64) -> Vec<QueueAction> {
        self.in_flight_since_ms = None;
        self.resend_counter = 0;
        self.begin_send_cycle(now_ms, response_delay_ms)
    }

    /// Stops resend tracking and drops every entry.
    pub fn clear(&mut self) -> Vec<QueueAction> {
        self.entries.clear();
        self.in_flight_since_ms = None;
        self.resend_counter = 0;
        self.working_on_pending = false;
        vec![QueueAction::CancelResendTimer]
    }

    /// Equivalent to `clear` in this single-threaded model: there are no
    /// per-queue threads left to join.
    pub fn dispose(&mut self) -> Vec<QueueAction> {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt() -> Packet {
        Packet::new(0, 0x01, 0x00, 1, 2, vec![0, 0]).unwrap()
    }

    #[test]
    fn push_send_on_empty_queue_begins_immediately() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        let actions = q.push_send(pkt(), false, false, 1000, 40);
        assert!(matches!(actions[0], QueueAction::Transmit { .. }));
        assert!(matches!(
                actions[1],
                QueueAction::ScheduleResendCheck { delay_ms: 40 }
        ));
        assert!(q.is_in_flight());
    }

    #[test]
    fn second_send_while_in_flight_is_enqueued_not_sent() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.push_send(pkt(), false, false, 1000, 40);
        let actions = q.push_send(pkt(), false, false, 1001, 40);
        assert!(actions.is_empty());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn pop_advances_to_next_send_and_begins_its_cycle() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.push_send(pkt(), false, false, 1000, 40);
        q.push_send(pkt(), false, false, 1001, 40);
        let actions = q.pop(1050, 40);
        assert!(actions.contains(&QueueAction::CancelResendTimer));
        assert!(actions
            .iter()
            .any(|a| matches!(a, QueueAction::Transmit { .. })));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pop_on_last_entry_reports_drained() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.push_send(pkt(), false, false, 1000, 40);
        let actions = q.pop(1050, 40);
        assert!(actions.contains(&QueueAction::Drained));
        assert!(q.is_empty());
    }

    #[test]
    fn resend_escalates_then_fails_without_force_resend() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.retries = 3;
        q.push_send(pkt(), false, false, 0, 40);
        // Attempt 1
        let a1 = q.on_resend_timer(40, false);
        assert!(matches!(a1[1], QueueAction::ScheduleResendCheck { delay_ms: 200 }));
        // Attempt 2
        let a2 = q.on_resend_timer(240, false);
        assert!(matches!(a2[1], QueueAction::ScheduleResendCheck { delay_ms: 200 }));
        // Attempt 3
        let a3 = q.on_resend_timer(440, false);
        assert!(matches!(a3[1], QueueAction::ScheduleResendCheck { delay_ms: 200 }));
        // Exhausted -> failure
        let a4 = q.on_resend_timer(640, false);
        assert_eq!(a4, vec![QueueAction::Failure]);
        assert!(!q.is_in_flight());
    }

    #[test]
    fn burst_resend_uses_burst_cadence() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.retries = 4;
        q.push_send(pkt(), false, false, 0, 40);
        let a1 = q.on_resend_timer(40, true);
        assert!(matches!(a1[1], QueueAction::ScheduleResendCheck { delay_ms: 3000 }));
        q.on_resend_timer(3040, true);
        q.on_resend_timer(6040, true);
        let a4 = q.on_resend_timer(9040, true);
        assert!(matches!(a4[1], QueueAction::ScheduleResendCheck { delay_ms: 4000 }));
    }

    #[test]
    fn force_resend_never_fails() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.retries = 1;
        q.push_send(pkt(), false, true, 0, 40);
        q.on_resend_timer(40, false);
        let after_exhaust = q.on_resend_timer(240, false);
        assert!(after_exhaust
            .iter()
            .any(|a| matches!(a, QueueAction::Transmit { .. })));
        assert!(q.is_in_flight());
    }

    #[test]
    fn await_message_gates_until_match() {
        let mut q = PacketQueue::new(QueueType::Pairing, "cul0".into());
        q.push_send(pkt(), false, false, 0, 40);
        q.push_await(AwaitSpec::new(0x02, None), false);
        // ACK for the send arrives; central pops explicitly.
        q.pop(50, 40);
        assert!(matches!(q.front(), Some(QueueEntry::AwaitMessage { .. })));
        let non_match = Packet::new(0, 0x99, 0, 1, 2, vec![]).unwrap();
        assert!(q.try_consume_await(&non_match, 60, 40).is_none());
        let ack = Packet::new(0, 0x02, 0, 1, 2, vec![0, 0]).unwrap();
        let actions = q.try_consume_await(&ack, 70, 40).unwrap();
        assert!(actions.contains(&QueueAction::Drained));
    }

    #[test]
    fn clear_burst_of_head_send_unsets_burst_on_pending_send() {
        let mut q = PacketQueue::new(QueueType::Pairing, "cul0".into());
        q.push_send(pkt().with_burst(true), false, false, 0, 40);
        q.push_send(pkt(), false, false, 1, 40);
        q.clear_burst_of_head_send();
        match q.front() {
            Some(QueueEntry::SendPacket { packet, .. }) => assert!(!packet.burst),
            other => panic!("expected a pending send, got {other:?}"),
        }
    }

    #[test]
    fn pop_wait_then_resume_begins_the_deferred_send() {
        let mut q = PacketQueue::new(QueueType::Pairing, "cul0".into());
        q.push_send(pkt(), false, false, 0, 40);
        let actions = q.pop_wait(60);
        assert_eq!(actions, vec![QueueAction::ScheduleDeferredPop { delay_ms: 60 }]);
        assert_eq!(q.len(), 1);
        assert!(!q.is_in_flight());
        let resumed = q.resume(61, 40);
        assert_eq!(q.len(), 1);
        assert!(q.is_in_flight());
        assert!(resumed
            .iter()
            .any(|a| matches!(a, QueueAction::Transmit { .. })));
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut q = PacketQueue::new(QueueType::Default, "cul0".into());
        q.push_send(pkt(), false, false, 0, 40);
        q.push_await(AwaitSpec::new(0x02, None), false);
        q.clear();
        assert!(q.is_empty());
        assert!(!q.is_in_flight());
    }
}
