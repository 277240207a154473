//! # Ghost Serializers
//!
//! A serializer turns a group of components into a fixed-size snapshot
//! record and delta-encodes that record against a baseline record.
//!
//! Users implement the typed [`GhostSnapshot`] contract; the registry
//! stores serializers behind the object-safe [`GhostSerializer`] trait and
//! hands records around as plain byte spans (`bytemuck` casts).

use std::marker::PhantomData;

use bytemuck::Pod;
use spectre_core::{ArchetypeSignature, EntityId, World};

use crate::error::{NetError, NetResult};
use crate::protocol::DeltaBuffer;

/// Typed snapshot record for one or more components.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
/// use spectre_core::{ArchetypeSignature, Component, EntityId, World};
/// use spectre_netcode::protocol::DeltaBuffer;
/// use spectre_netcode::snapshot::GhostSnapshot;
/// use spectre_netcode::NetResult;
///
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health { value: u32 }
/// impl Component for Health { const ID: u8 = 10; }
///
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// #[repr(C)]
/// struct HealthSnapshot { value: u32 }
///
/// impl GhostSnapshot for HealthSnapshot {
///     fn components() -> ArchetypeSignature {
///         ArchetypeSignature::of::<Health>()
///     }
///     fn from_components(world: &World, entity: EntityId) -> Option<Self> {
///         world.get_component::<Health>(entity).map(|h| Self { value: h.value })
///     }
///     fn to_components(&self, world: &mut World, entity: EntityId) {
///         world.insert(entity, Health { value: self.value });
///     }
///     fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
///         buffer.add_uint_delta(self.value, baseline.value);
///     }
///     fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self) -> NetResult<Self> {
///         Ok(Self { value: buffer.read_uint_delta(baseline.value)? })
///     }
/// }
/// ```
pub trait GhostSnapshot: Pod + Send + Sync {
    /// Components this record covers.
    fn components() -> ArchetypeSignature;

    /// Copies the components of `entity` into a record.
    ///
    /// Returns `None` if the entity lacks one of them.
    fn from_components(world: &World, entity: EntityId) -> Option<Self>;

    /// Writes the record back into the components of `entity`.
    fn to_components(&self, world: &mut World, entity: EntityId);

    /// Delta-encodes `self` against `baseline`.
    fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer);

    /// Decodes a record encoded against `baseline`.
    fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self) -> NetResult<Self>;
}

/// Object-safe serializer over byte records.
///
/// A missing baseline means the zero record.
pub trait GhostSerializer: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Components this serializer covers.
    fn components(&self) -> ArchetypeSignature;

    /// Size of one record in bytes.
    fn record_size(&self) -> usize;

    /// Copies the components of `entity` into a record.
    fn copy_from(&self, world: &World, entity: EntityId) -> Option<Vec<u8>>;

    /// Writes a record into the components of `entity`.
    fn apply(&self, record: &[u8], world: &mut World, entity: EntityId) -> NetResult<()>;

    /// Delta-encodes `record` against `baseline`.
    fn serialize(
        &self,
        record: &[u8],
        baseline: Option<&[u8]>,
        buffer: &mut DeltaBuffer,
    ) -> NetResult<()>;

    /// Decodes a record encoded against `baseline`.
    fn deserialize(&self, buffer: &mut DeltaBuffer, baseline: Option<&[u8]>)
        -> NetResult<Vec<u8>>;
}

/// Adapts a [`GhostSnapshot`] to [`GhostSerializer`].
pub struct TypedSerializer<S> {
    name: String,
    _marker: PhantomData<fn() -> S>,
}

impl<S: GhostSnapshot> TypedSerializer<S> {
    /// Wraps `S` under a display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    fn cast(bytes: &[u8]) -> NetResult<S> {
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| NetError::SizeMismatch {
            expected: std::mem::size_of::<S>(),
            actual: bytes.len(),
        })
    }

    fn baseline(bytes: Option<&[u8]>) -> NetResult<S> {
        bytes.map_or_else(|| Ok(S::zeroed()), Self::cast)
    }
}

impl<S: GhostSnapshot> GhostSerializer for TypedSerializer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> ArchetypeSignature {
        S::components()
    }

    fn record_size(&self) -> usize {
        std::mem::size_of::<S>()
    }

    fn copy_from(&self, world: &World, entity: EntityId) -> Option<Vec<u8>> {
        S::from_components(world, entity).map(|record| bytemuck::bytes_of(&record).to_vec())
    }

    fn apply(&self, record: &[u8], world: &mut World, entity: EntityId) -> NetResult<()> {
        Self::cast(record)?.to_components(world, entity);
        Ok(())
    }

    fn serialize(
        &self,
        record: &[u8],
        baseline: Option<&[u8]>,
        buffer: &mut DeltaBuffer,
    ) -> NetResult<()> {
        let record = Self::cast(record)?;
        record.serialize(&Self::baseline(baseline)?, buffer);
        Ok(())
    }

    fn deserialize(
        &self,
        buffer: &mut DeltaBuffer,
        baseline: Option<&[u8]>,
    ) -> NetResult<Vec<u8>> {
        let record = S::deserialize(buffer, &Self::baseline(baseline)?)?;
        Ok(bytemuck::bytes_of(&record).to_vec())
    }
}
