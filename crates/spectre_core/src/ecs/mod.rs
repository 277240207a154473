//! # Entity Store
//!
//! Slots, columns and buffers sized once at startup. Handles carry a
//! generation so the ghost map can hold them across despawns, and
//! archetypes are `u64` bitmasks so serializer matching is one AND.

mod archetype;
mod buffer;
mod component;
mod entity;
mod storage;
mod world;

pub use archetype::ArchetypeSignature;
pub use component::{Component, Position, Velocity};
pub use entity::{Entity, EntityId};
pub use storage::ComponentStorage;
pub use world::World;
