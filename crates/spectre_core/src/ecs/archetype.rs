//! # Archetype Signatures
//!
//! An archetype is the set of component types attached to an entity.
//! With at most 64 component types the set is a single `u64` bitmask,
//! which makes "does this entity carry everything serializer X needs"
//! a single AND.

use std::fmt;

use super::component::Component;

/// Bitmask over component IDs (bit `n` = component with `ID == n`).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ArchetypeSignature(u64);

impl ArchetypeSignature {
    /// The empty archetype.
    pub const EMPTY: Self = Self(0);

    /// Creates a signature from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Signature containing exactly one component type.
    #[inline]
    #[must_use]
    pub const fn of<C: Component>() -> Self {
        Self(1 << C::ID)
    }

    /// Returns this signature with `C` added.
    #[inline]
    #[must_use]
    pub const fn with<C: Component>(self) -> Self {
        Self(self.0 | (1 << C::ID))
    }

    /// Returns this signature with the raw component id added.
    #[inline]
    #[must_use]
    pub const fn with_id(self, component_id: u8) -> Self {
        Self(self.0 | (1 << component_id))
    }

    /// Returns this signature with the raw component id removed.
    #[inline]
    #[must_use]
    pub const fn without_id(self, component_id: u8) -> Self {
        Self(self.0 & !(1 << component_id))
    }

    /// Checks whether a component id is part of this signature.
    #[inline]
    #[must_use]
    pub const fn has(self, component_id: u8) -> bool {
        self.0 & (1 << component_id) != 0
    }

    /// Checks whether `C` is part of this signature.
    #[inline]
    #[must_use]
    pub const fn contains<C: Component>(self) -> bool {
        self.has(C::ID)
    }

    /// Checks whether every component of `other` is part of this signature.
    #[inline]
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set union.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Set difference (`self` minus `other`).
    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns the number of component types.
    #[inline]
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the component ids in ascending order.
    pub fn ids(self) -> impl Iterator<Item = u8> {
        (0u8..64).filter(move |id| self.has(*id))
    }
}

impl fmt::Debug for ArchetypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}
