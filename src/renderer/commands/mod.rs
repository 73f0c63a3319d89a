//! Command Layer
//!
//! - [`OpCode`]: one recorded operation.
//! - [`CommandBuffer`] / [`CommandRecorder`]: per-frame draw and pass recording.
//! - [`ResourceCommandBuffer`]: deferred resource construction requests.

mod command_buffer;
mod opcode;
mod resource_buffer;

pub use command_buffer::{CommandBuffer, CommandRecorder, MAX_TRANSIENT_RESOURCES};
pub use opcode::{Command, DrawCall, OpCode};
pub use resource_buffer::ResourceCommandBuffer;
