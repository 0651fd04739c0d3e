//! Seams between the interlocking core and the outside world.
//!
//! - `link`: commands to a train's onboard unit ([`TrainLink`])
//! - `store`: persistence of records and the event log ([`Store`])
//!
//! Concrete implementations live in [`crate::link`], [`crate::store`], and
//! [`crate::hal`] (mocks).

pub mod link;
pub mod store;

pub use link::*;
pub use store::*;
