//! Outbound side of a train's hardware connection.
//!
//! The movement controller never touches sockets directly: it hands
//! [`TrainCommand`]s to a [`TrainLink`]. The TCP server implements it with a
//! channel feeding a writer task ([`crate::link::ChannelLink`]); tests use
//! [`crate::hal::MockLink`].

use crate::error::LinkError;
use crate::link::TrainCommand;

/// Sink for commands addressed to one train.
///
/// Implementations must not block: the movement controller calls `send`
/// from inside its critical path.
pub trait TrainLink: Send + Sync {
    /// Queue a command for delivery.
    ///
    /// Returns [`LinkError::Closed`] once the connection is gone.
    fn send(&self, command: TrainCommand) -> Result<(), LinkError>;
}
