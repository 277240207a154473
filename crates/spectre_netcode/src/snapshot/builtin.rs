//! Stock serializers for the store's built-in components.
//!
//! Floats are quantized to 1/1000 of a unit so unchanged or slowly
//! changing values encode as small integer deltas.

use bytemuck::{Pod, Zeroable};
use spectre_core::{ArchetypeSignature, EntityId, Position, Velocity, World};

use super::serializer::GhostSnapshot;
use crate::error::NetResult;
use crate::protocol::DeltaBuffer;

/// Quantization steps per world unit.
pub const QUANTIZATION: f32 = 1000.0;

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn quantize(value: f32) -> i32 {
    (value * QUANTIZATION).round() as i32
}

#[inline]
#[allow(clippy::cast_precision_loss)]
fn dequantize(value: i32) -> f32 {
    value as f32 / QUANTIZATION
}

/// Quantized [`Position`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PositionSnapshot {
    /// X in 1/1000 units.
    pub x: i32,
    /// Y in 1/1000 units.
    pub y: i32,
    /// Z in 1/1000 units.
    pub z: i32,
}

impl GhostSnapshot for PositionSnapshot {
    fn components() -> ArchetypeSignature {
        ArchetypeSignature::of::<Position>()
    }

    fn from_components(world: &World, entity: EntityId) -> Option<Self> {
        let pos = world.get_component::<Position>(entity)?;
        Some(Self {
            x: quantize(pos.x),
            y: quantize(pos.y),
            z: quantize(pos.z),
        })
    }

    fn to_components(&self, world: &mut World, entity: EntityId) {
        world.insert(
            entity,
            Position::new(dequantize(self.x), dequantize(self.y), dequantize(self.z)),
        );
    }

    fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
        buffer.add_int_delta(self.x, baseline.x);
        buffer.add_int_delta(self.y, baseline.y);
        buffer.add_int_delta(self.z, baseline.z);
    }

    fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self) -> NetResult<Self> {
        Ok(Self {
            x: buffer.read_int_delta(baseline.x)?,
            y: buffer.read_int_delta(baseline.y)?,
            z: buffer.read_int_delta(baseline.z)?,
        })
    }
}

/// Quantized [`Position`] and [`Velocity`] in one record.
///
/// Covers both components, so entities that move get one block instead of
/// two.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MotionSnapshot {
    /// Position in 1/1000 units.
    pub position: [i32; 3],
    /// Velocity in 1/1000 units per second.
    pub velocity: [i32; 3],
}

impl GhostSnapshot for MotionSnapshot {
    fn components() -> ArchetypeSignature {
        ArchetypeSignature::of::<Position>().with::<Velocity>()
    }

    fn from_components(world: &World, entity: EntityId) -> Option<Self> {
        let pos = world.get_component::<Position>(entity)?;
        let vel = world.get_component::<Velocity>(entity)?;
        Some(Self {
            position: [quantize(pos.x), quantize(pos.y), quantize(pos.z)],
            velocity: [quantize(vel.x), quantize(vel.y), quantize(vel.z)],
        })
    }

    fn to_components(&self, world: &mut World, entity: EntityId) {
        let [px, py, pz] = self.position.map(dequantize);
        let [vx, vy, vz] = self.velocity.map(dequantize);
        world.insert(entity, Position::new(px, py, pz));
        world.insert(entity, Velocity::new(vx, vy, vz));
    }

    fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
        for (value, base) in self.position.iter().zip(&baseline.position) {
            buffer.add_int_delta(*value, *base);
        }
        for (value, base) in self.velocity.iter().zip(&baseline.velocity) {
            buffer.add_int_delta(*value, *base);
        }
    }

    fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self) -> NetResult<Self> {
        let mut out = Self::default();
        for (slot, base) in out.position.iter_mut().zip(&baseline.position) {
            *slot = buffer.read_int_delta(*base)?;
        }
        for (slot, base) in out.velocity.iter_mut().zip(&baseline.velocity) {
            *slot = buffer.read_int_delta(*base)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_rounds() {
        assert_eq!(quantize(0.0026), 3);
        assert_eq!(quantize(-1.2344), -1234);
        assert!((dequantize(1234) - 1.234).abs() < 1e-6);
    }

    #[test]
    fn test_motion_delta_roundtrip() {
        let baseline = MotionSnapshot {
            position: [1000, 2000, 3000],
            velocity: [0, 0, 0],
        };
        let current = MotionSnapshot {
            position: [1016, 2000, 2990],
            velocity: [1000, 0, -600],
        };
        let mut buffer = DeltaBuffer::new();
        current.serialize(&baseline, &mut buffer);
        assert_eq!(
            MotionSnapshot::deserialize(&mut buffer, &baseline).unwrap(),
            current
        );
        assert!(buffer.is_finished());
    }

    #[test]
    fn test_motion_writes_both_components() {
        let mut world = World::new(1);
        let entity = world.spawn();
        let record = MotionSnapshot {
            position: [500, 0, -500],
            velocity: [0, 2000, 0],
        };
        record.to_components(&mut world, entity);
        assert_eq!(MotionSnapshot::from_components(&world, entity), Some(record));
        assert_eq!(
            world.get_component::<Velocity>(entity),
            Some(&Velocity::new(0.0, 2.0, 0.0))
        );
    }
}
