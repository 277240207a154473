//! # Ghost Importance
//!
//! When a snapshot cannot fit every ghost, the send pipeline keeps the
//! most important ones. Importance comes from, in order:
//!
//! 1. a [`GhostPriority`] component on the entity,
//! 2. a per-archetype weight registered on the serializer registry,
//! 3. the default `NoPriority` tier.
//!
//! Within a tick, ghosts are ordered by `weight × (ticks since sent + 1)`,
//! so a ghost that keeps losing gets more urgent every tick.

use bytemuck::{Pod, Zeroable};
use spectre_core::Component;

/// Importance tier of a ghost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Importance {
    /// Never sent; despawned on clients that know it.
    DontExist = 0,
    /// Default tier, weight 1.
    #[default]
    NoPriority = 1,
    /// Weight registered for the ghost's archetype.
    Archetype = 2,
    /// Weight carried by the ghost's own [`GhostPriority`].
    Component = 3,
    /// Always included, regardless of budget.
    SendAtAllCost = 4,
}

impl Importance {
    /// Decodes a raw tier, unknown values fall back to `NoPriority`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::DontExist,
            2 => Self::Archetype,
            3 => Self::Component,
            4 => Self::SendAtAllCost,
            _ => Self::NoPriority,
        }
    }
}

/// Per-entity importance override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct GhostPriority {
    /// Raw [`Importance`] tier.
    pub tier: u32,
    /// Weight used by the `Component` tier.
    pub weight: u32,
}

impl Default for GhostPriority {
    fn default() -> Self {
        Self::weighted(1)
    }
}

impl Component for GhostPriority {
    const ID: u8 = 49;
}

impl GhostPriority {
    /// Hides the ghost from every client.
    #[must_use]
    pub const fn hidden() -> Self {
        Self {
            tier: Importance::DontExist as u32,
            weight: 0,
        }
    }

    /// Ranks the ghost with its own weight.
    #[must_use]
    pub const fn weighted(weight: u32) -> Self {
        Self {
            tier: Importance::Component as u32,
            weight,
        }
    }

    /// Never dropped for budget reasons.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            tier: Importance::SendAtAllCost as u32,
            weight: u32::MAX,
        }
    }

    /// Typed tier.
    #[must_use]
    pub const fn importance(self) -> Importance {
        Importance::from_raw(self.tier)
    }
}

/// Resolved importance of one ghost for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Priority {
    /// Tier.
    pub importance: Importance,
    /// Tier weight.
    pub weight: u32,
}

impl Priority {
    /// Default tier.
    pub const DEFAULT: Self = Self {
        importance: Importance::NoPriority,
        weight: 1,
    };

    /// Ordering score for a ghost last sent `age` ticks ago.
    ///
    /// The tier is not part of the score. It only decides whether a ghost
    /// is sent at all (`DontExist`) and whether it bypasses the budget
    /// (`SendAtAllCost`). Among the remaining candidates an
    /// `Archetype`-tier ghost with a large weight can outrank a
    /// `Component`-tier ghost with a small one.
    #[must_use]
    pub fn score(self, age: u32) -> u64 {
        u64::from(self.weight) * (u64::from(age) + 1)
    }
}
