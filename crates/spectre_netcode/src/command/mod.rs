//! # Command Stream
//!
//! Client input travels as tick-stamped samples. Each sample rides in
//! several consecutive packets so a single lost packet never loses input.
//!
//! ```text
//! CLIENT                                        SERVER
//! buffer<MoveInput> on command target           buffer<MoveInput> on command target
//!   [t42][t43][t44][t45] ──► packet(t45: 45,44,43) ──► add_command_data ×3
//!                                                      get_data_at_tick(server tick)
//! ```
//!
//! The same packet carries the client's snapshot acknowledgement, so it is
//! sent every tick even when there is no input.

mod age;
mod buffer;
mod registry;
mod system;

pub use age::SmoothedAge;
pub use buffer::{CommandBuffer, CommandData, COMMAND_BUFFER_CAPACITY};
pub use registry::{
    CommandProcessor, CommandRegistry, CommandRegistryBuilder, TypedCommandProcessor,
};
pub use system::{CommandReceiveSystem, CommandSendSystem};
