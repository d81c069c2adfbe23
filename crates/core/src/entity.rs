//! Entity traits: identity, continuity and tombstones.

use chrono::{DateTime, Utc};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing write counter (starts at 1 on insert).
    fn version(&self) -> u64;
}

/// Entities that are logically removed instead of physically deleted.
///
/// A tombstoned record stays in storage for audit, but every lookup and
/// aggregation must skip it.
pub trait SoftDeletable: Entity {
    /// When the record was tombstoned, if it was.
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_active(&self) -> bool {
        self.deleted_at().is_none()
    }
}
