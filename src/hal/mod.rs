//! Stand-ins for the outside world.
//!
//! The interlocking talks to real trains through [`crate::link`] and to disk
//! through [`crate::store`]. This module holds the doubles used when neither
//! is available.
//!
//! # Available Implementations
//!
//! - `mock`: recording train link and a store with switchable failures

pub mod mock;

pub use mock::*;
