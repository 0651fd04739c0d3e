//! # rs-signalbox
//!
//! A signal-block interlocking controller for model railways. Track is cut
//! into zones, one per signal; a train may only enter a zone it holds
//! exclusively, and every signal shows an aspect derived from the occupancy
//! of the zones ahead of it.
//!
//! ## Features
//!
//! - **Zone locking**: at most one train per zone, released as the train moves on
//! - **Aspect cascade**: Clear, Preliminary Caution, Caution, Danger from the zones ahead
//! - **Points**: staged route changes actuated by the next train, with bounded retries
//! - **Hardware link**: length-prefixed TCP protocol to each train's onboard unit
//! - **Operator channel**: WebSocket `VERB:RESOURCE$payload` frames with pushed updates
//! - **Serial bridge**: relay for onboard units that only speak over a serial device
//!
//! ## Architecture
//!
//! - `topology` - stretches, signals and the links between them
//! - `zone` - per-zone locking and aspect derivation
//! - `switch` - points state machine
//! - `train` - train records and live sessions
//! - `interlocking` - the registry and every operation on it
//! - `link` - hardware link codec, server and bridge
//! - `services` - operator WebSocket and HTTP API (feature `web`)
//! - `store` / `event_log` - persistence and the event log
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rs_signalbox::{
//!     config::ServerConfig,
//!     notify::Notifier,
//!     store::MemoryStore,
//!     topology::{SignalKey, SignalRecord, StretchKind, StretchRecord},
//!     Interlocking, SignalAspect,
//! };
//!
//! let ilk = Interlocking::load(
//!     Arc::new(MemoryStore::new()),
//!     Notifier::default(),
//!     &ServerConfig::default(),
//! )
//! .unwrap();
//!
//! let stretch = ilk
//!     .insert_stretch(StretchRecord {
//!         id: 0,
//!         name: "main".into(),
//!         kind: StretchKind::OneWaySingleTrack,
//!     })
//!     .unwrap();
//! for name in ["S1", "S2", "S3"] {
//!     ilk.insert_signal(SignalRecord {
//!         stretch_id: stretch.id,
//!         name: name.into(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! }
//!
//! // Holding S3 at danger puts S2 at caution.
//! ilk.force_red(SignalKey::new(stretch.id, 3)).unwrap();
//! let s2 = ilk.signal(SignalKey::new(stretch.id, 2)).unwrap();
//! assert_eq!(s2.zone.aspect(), SignalAspect::Caution);
//! ```

#![warn(missing_docs)]

/// Configuration for the server and the bridge.
pub mod config;
/// Error types and the structured operation result.
pub mod error;
/// Append-only event log records and queries.
pub mod event_log;
/// Test doubles for links and stores.
pub mod hal;
/// The interlocking registry and its operations.
pub mod interlocking;
/// Hardware link codec, server, and serial bridge.
pub mod link;
/// Operator channel frame format and request payloads.
pub mod messages;
/// Fan-out of state changes to operator clients.
pub mod notify;
/// In-memory and JSON-file stores.
pub mod store;
/// Points state machine.
pub mod switch;
/// Stretches, signals, and how they link up.
pub mod topology;
/// Seams for hardware links and persistence.
pub mod traits;
/// Train records and live sessions.
pub mod train;
/// Zone locking and aspect derivation.
pub mod zone;

/// Operator WebSocket and administrative HTTP (feature-gated).
#[cfg(feature = "web")]
pub mod services;

// Re-exports for convenience
pub use error::{ErrorCode, InterlockError, LinkError, OpResult, StoreError};
pub use interlocking::{Entry, Interlocking};
pub use switch::{SwitchPhase, SwitchStatus};
pub use topology::{Signal, SignalKey, SignalRecord, SpeedLimit, StretchRecord, Topology};
pub use train::{Train, TrainId, TrainRecord};
pub use zone::{Occupant, SignalAspect};

// Config re-exports
pub use config::{BridgeConfig, Config, SerialConfig, ServerConfig, StoreConfig, WebConfig};
