//! Hardware link between the controller and each train's onboard unit.
//!
//! - `codec` - length-prefixed framing, events and commands
//! - `server` - TCP listener, authentication, per-connection reader/writer
//! - `bridge` - serial-device-to-network relay used by the bridge binary

pub mod bridge;
pub mod codec;
pub mod server;

pub use bridge::{open_device, run_bridge, TOKEN_REQUEST};
pub use codec::{
    decode_access_key, encode_access_key, read_frame, write_frame, Payload, TrainCommand,
    TrainEvent, MAX_FRAME,
};
pub use server::{run_link_server, serve_train, ChannelLink};
