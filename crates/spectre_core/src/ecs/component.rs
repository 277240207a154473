//! # Components
//!
//! Plain-data values attached to entity slots. Every component is `Pod` so
//! the snapshot serializers can copy it into and out of byte records
//! without a per-type encoder.

use bytemuck::{Pod, Zeroable};

/// A plain-data value stored per entity slot.
///
/// `ID` is the component's bit in an [`ArchetypeSignature`](super::ArchetypeSignature),
/// so it must be below 64 and unique within a process. The replication
/// layer claims IDs 48 and up for its own markers.
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
/// use spectre_core::Component;
///
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Heading {
///     yaw: f32,
/// }
///
/// impl Component for Heading {
///     const ID: u8 = 7;
/// }
/// ```
pub trait Component: Copy + Pod + Zeroable + Default + Send + Sync + 'static {
    /// Archetype bit, `0..64`.
    const ID: u8;
}

/// World-space location. Replicated by the built-in position serializer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X axis.
    pub x: f32,
    /// Y axis.
    pub y: f32,
    /// Z axis.
    pub z: f32,
    /// Keeps the struct at 16 bytes.
    pub _padding: f32,
}

impl Component for Position {
    const ID: u8 = 0;
}

impl Position {
    /// Builds a position with zeroed padding.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, _padding: 0.0 }
    }

    /// Moves this position by `velocity * dt`.
    #[inline]
    pub fn advance(&mut self, velocity: Velocity, dt: f32) {
        self.x += velocity.x * dt;
        self.y += velocity.y * dt;
        self.z += velocity.z * dt;
    }
}

/// Units per second along each axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X axis.
    pub x: f32,
    /// Y axis.
    pub y: f32,
    /// Z axis.
    pub z: f32,
    /// Keeps the struct at 16 bytes.
    pub _padding: f32,
}

impl Component for Velocity {
    const ID: u8 = 1;
}

impl Velocity {
    /// Builds a velocity with zeroed padding.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, _padding: 0.0 }
    }
}
