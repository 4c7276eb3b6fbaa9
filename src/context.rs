//! Replaces the original per-process global singletons with one explicit
//! struct threaded through `Central`/`Peer`. Also carries the clock
//! indirection tests need to inject fake time instead of calling
//! `Instant::now()` ad hoc.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, NoPairingFeatures, PairingFeatures};
use crate::device_description::DeviceDescriptionCatalog;
use crate::persistence::PersistenceStore;
use crate::rpc_sink::UpstreamEventSink;

/// Milliseconds since the Unix epoch. Swapped out in tests for a fake clock
/// so timer/backoff assertions don't depend on wall time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
    }
}

/// A clock that only advances when told to; used throughout the queue and
/// timer test suites.
pub struct FakeClock {
    now_ms: std::sync::atomic::AtomicU64,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        FakeClock {
            now_ms: std::sync::atomic::AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Everything a `Central`/`Peer` needs from the outside world, gathered in
/// one place instead of reached for via globals.
pub struct Context {
    pub sink: Arc<dyn UpstreamEventSink>,
    pub catalog: Arc<dyn DeviceDescriptionCatalog>,
    pub store: Arc<dyn PersistenceStore>,
    pub pairing_features: Arc<dyn PairingFeatures>,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    pub fn new(
        sink: Arc<dyn UpstreamEventSink>,
        catalog: Arc<dyn DeviceDescriptionCatalog>,
        store: Arc<dyn PersistenceStore>,
        config: Config,
    ) -> Self {
        Context {
            sink,
            catalog,
            store,
            pairing_features: Arc::new(NoPairingFeatures),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_pairing_features(mut self, features: Arc<dyn PairingFeatures>) -> Self {
        self.pairing_features = features;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_only_advances_when_told() {
        let clock = FakeClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1500);
    }
}
