//! # SPECTRE Core
//!
//! Fixed-capacity entity store underneath the `spectre_netcode` replication
//! layer. The network code touches entities only through [`World`]:
//! spawn and despawn, typed components, per-entity buffers for command and
//! snapshot history, archetype queries, and singleton resources.
//!
//! ## Example
//!
//! ```rust
//! use spectre_core::{World, Position, Velocity};
//!
//! let mut world = World::new(1024);
//! let entity = world.spawn();
//! world.insert(entity, Position::new(1.0, 2.0, 3.0));
//! world.insert(entity, Velocity::new(0.5, 0.0, 0.0));
//!
//! world.update_positions(1.0);
//! assert_eq!(world.get_component::<Position>(entity).map(|p| p.x), Some(1.5));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;

pub use ecs::{
    ArchetypeSignature, Component, ComponentStorage, Entity, EntityId, Position, Velocity, World,
};
