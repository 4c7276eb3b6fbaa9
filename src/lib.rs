//! Central controller and protocol engine for the MAX! sub-GHz home
//! automation radio.
//!
//! [`central::Central`] owns peers and packet queues and dispatches wire
//! frames; it never touches a socket or a SPI bus itself. That's the job of
//! an [`interface::RadioInterface`] implementation — a serial CUL/CUNX
//! dongle, a mutual-TLS gateway tunnel, or a CC1101 SPI breakout. The
//! caller's event loop owns the actual I/O and the [`timers::TimerWheel`];
//! this crate only ever tells it what to do next via
//! [`central::CentralAction`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use maxcul_central::central::Central;
//! use maxcul_central::context::Context;
//! use maxcul_central::config;
//! use maxcul_central::persistence::InMemoryStore;
//! use maxcul_central::device_description::StaticCatalog;
//! use maxcul_central::rpc_sink::RecordingSink;
//!
//! let cfg = config::load("maxcul.toml").unwrap();
//! let ctx = Context::new(
//!     Arc::new(RecordingSink::new()),
//!     Arc::new(StaticCatalog::new()),
//!     Arc::new(InMemoryStore::new()),
//!     cfg,
//! );
//! let central = Central::new(0x123456);
//! let _ = (central, ctx);
//! ```

pub mod cache;
pub mod central;
pub mod config;
pub mod context;
pub mod device_description;
pub mod error;
pub mod interface;
pub mod message;
pub mod packet;
pub mod peer;
pub mod pending_queue_codec;
pub mod persistence;
pub mod queue;
pub mod queue_manager;
pub mod rpc_sink;
pub mod timers;

pub use central::{Central, CentralAction};
pub use context::Context;
pub use error::{CentralError, Result};
pub use interface::{PhysicalInterfaceType, RadioInterface};
pub use packet::{Codec, Packet};
