//! # Snapshot System
//!
//! Server world state, delta compressed per client against the newest
//! tick that client acknowledged.
//!
//! ```text
//! SERVER                                          CLIENT
//! World ──copy──► history[tick]                   history[tick] ──► bracket() for interpolation
//!                     │                                ▲
//!                     ▼                                │
//!          encode vs acked baseline ──lz4──► ... ──► decode vs baseline
//!                                                      │
//!                                                      ▼
//!                                      GhostEntityMap ─► spawn / apply / release
//! ```
//!
//! ## Baselines
//!
//! Both peers keep the last [`BaselineHistory`] ticks of every ghost. The
//! server only encodes against a tick the client's acknowledgement mask
//! says it received, so the client always holds the baseline it is told to
//! use. With no such tick, the zero record is the baseline and the ghost's
//! archetype travels along so the client can pick serializers and spawn it.

mod builtin;
mod history;
mod priority;
mod receive;
mod registry;
mod send;
mod serializer;

pub use builtin::{MotionSnapshot, PositionSnapshot, QUANTIZATION};
pub use history::BaselineHistory;
pub use priority::{GhostPriority, Importance, Priority};
pub use receive::SnapshotReceiveSystem;
pub use registry::{ArchetypeCache, GhostRecord, RegistryBuilder, SerializerRegistry};
pub use send::{ClientSnapshotState, SendPhase, SendStats, SnapshotSendSystem};
pub use serializer::{GhostSerializer, GhostSnapshot, TypedSerializer};
