//! Radio Interface Abstraction: the uniform contract every physical
//! transport adapter implements. Core code (`Central`, `queue.rs`) only
//! ever calls through this trait; it never knows whether a packet went out
//! over a serial dongle, a TLS gateway tunnel, or raw SPI.

use crate::config::InterfaceConfig;
use crate::error::InterfaceError;
use crate::packet::Packet;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "cc1101")]
pub mod cc1101;

/// Which concrete adapter backs a given `id` — carried alongside the trait
/// object since `dyn RadioInterface` alone can't be matched on for the
/// handful of call sites that need to special-case one family (e.g. the
/// config-parsed `stack_position` only applying to serial dongles).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalInterfaceType {
    SerialDongle,
    GatewayTls,
    SpiCc1101,
}

/// A uniform radio transport: open/close, synchronous "queue for radio"
/// send, and a single inbound-packet subscriber drained by `try_recv`.
///
/// Implementations run their own listen thread internally and buffer
/// inbound packets for `try_recv` to drain — `Central`'s worker loop polls
/// every bound interface once per tick rather than blocking on any one of
/// them, since a round-robin poll keeps one slow interface from starving
/// the others.
pub trait RadioInterface: Send {
    fn id(&self) -> &str;

    fn physical_interface_type(&self) -> PhysicalInterfaceType;

    fn is_default(&self) -> bool;

    fn response_delay_ms(&self) -> u64;

    fn is_open(&self) -> bool;

    /// Whether inbound frames from this interface carry a trailing RSSI byte.
    fn has_rssi_byte(&self) -> bool;

    fn open(&mut self) -> Result<(), InterfaceError>;

    fn close(&mut self) -> Result<(), InterfaceError>;

    /// Queues `packet` for transmission. `stealthy` suppresses the usual
    /// logging (used for stateless acks, so the log isn't flooded).
    fn send(&mut self, packet: &Packet, stealthy: bool) -> Result<(), InterfaceError>;

    /// Non-blocking drain of one inbound packet, if any is buffered.
    fn try_recv(&mut self) -> Result<Option<Packet>, InterfaceError>;
}

/// Builds the concrete adapter named by one config entry. Returns an error
/// if the entry names a family whose feature wasn't compiled in.
pub fn build(cfg: &InterfaceConfig) -> Result<Box<dyn RadioInterface>, InterfaceError> {
    match cfg.interface_type {
        #[cfg(feature = "serial")]
        crate::config::InterfaceType::Serial => Ok(Box::new(serial::SerialInterface::new(cfg.clone()))),
        #[cfg(not(feature = "serial"))]
        crate::config::InterfaceType::Serial => Err(unsupported("serial")),

        #[cfg(feature = "gateway")]
        crate::config::InterfaceType::Gateway => Ok(Box::new(gateway::GatewayInterface::new(cfg.clone()))),
        #[cfg(not(feature = "gateway"))]
        crate::config::InterfaceType::Gateway => Err(unsupported("gateway")),

        #[cfg(feature = "cc1101")]
        crate::config::InterfaceType::Cc1101 => Ok(Box::new(cc1101::Cc1101Interface::new(cfg))),
        #[cfg(not(feature = "cc1101"))]
        crate::config::InterfaceType::Cc1101 => Err(unsupported("cc1101")),
    }
}

#[allow(dead_code)]
fn unsupported(feature: &str) -> InterfaceError {
    InterfaceError::RpcFault {
        code: -32500,
        message: format!("interface type {feature} requires the \"{feature}\" cargo feature"),
    }
}
