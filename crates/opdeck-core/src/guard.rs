//! Re-entrancy policy for operation starts.
//!
//! # Design
//! - Exclusivity groups are declared per entity type; kinds in one group may
//!   not run concurrently on the same entity.
//! - A kind outside every group only conflicts with itself.
//! - Terminal operations never block a start, so retries are always accepted.

use crate::error::GuardRejection;
use crate::model::{OperationId, OperationKind};

/// Named set of mutually exclusive kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusivityGroup {
    /// Entity type the group applies to (e.g. `software`).
    pub name: String,
    /// Kinds that may not overlap on one entity.
    pub kinds: Vec<OperationKind>,
}

/// Exclusivity groups consulted by [`ActionGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusivityPolicy {
    groups: Vec<ExclusivityGroup>,
}

impl ExclusivityPolicy {
    /// Policy with no groups: only identical ids conflict.
    #[must_use]
    pub const fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// Add a group of mutually exclusive kinds.
    #[must_use]
    pub fn with_group(
        mut self,
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = OperationKind>,
    ) -> Self {
        self.groups.push(ExclusivityGroup {
            name: name.into(),
            kinds: kinds.into_iter().collect(),
        });
        self
    }

    /// Declared groups.
    #[must_use]
    pub fn groups(&self) -> &[ExclusivityGroup] {
        &self.groups
    }

    /// Name of the first group containing `kind`.
    #[must_use]
    pub fn group_of(&self, kind: OperationKind) -> Option<&str> {
        self.groups
            .iter()
            .find(|group| group.kinds.contains(&kind))
            .map(|group| group.name.as_str())
    }

    /// Whether `a` and `b` may not run concurrently on one entity.
    #[must_use]
    pub fn conflicts(&self, a: OperationKind, b: OperationKind) -> bool {
        a == b
            || self
                .groups
                .iter()
                .any(|group| group.kinds.contains(&a) && group.kinds.contains(&b))
    }
}

impl Default for ExclusivityPolicy {
    /// Groups used by the dashboard's agent, launcher, equipment, and account pages.
    fn default() -> Self {
        Self::empty()
            .with_group("agent", [OperationKind::Run, OperationKind::Stop])
            .with_group("software", [OperationKind::Install, OperationKind::Launch])
            .with_group(
                "equipment",
                [
                    OperationKind::Connect,
                    OperationKind::Diagnose,
                    OperationKind::FirmwareUpdate,
                ],
            )
            .with_group(
                "account",
                [OperationKind::EnrollTwoFactor, OperationKind::VerifyTwoFactor],
            )
    }
}

/// Decides whether a start request is accepted.
#[derive(Debug, Clone, Default)]
pub struct ActionGuard {
    policy: ExclusivityPolicy,
}

impl ActionGuard {
    /// Guard enforcing `policy`.
    #[must_use]
    pub const fn new(policy: ExclusivityPolicy) -> Self {
        Self { policy }
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> &ExclusivityPolicy {
        &self.policy
    }

    /// Check `requested` against the ids currently requesting or polling.
    ///
    /// # Errors
    ///
    /// Returns [`GuardRejection::AlreadyActive`] naming the first conflicting
    /// live operation on the same entity.
    pub fn check<'a>(
        &self,
        requested: &OperationId,
        active: impl IntoIterator<Item = &'a OperationId>,
    ) -> Result<(), GuardRejection> {
        let blocking = active.into_iter().find(|live| {
            live.same_entity(requested) && self.policy.conflicts(live.kind(), requested.kind())
        });
        match blocking {
            Some(live) => Err(GuardRejection::AlreadyActive {
                requested: requested.clone(),
                active: live.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Boolean form of [`ActionGuard::check`].
    #[must_use]
    pub fn can_start<'a>(
        &self,
        requested: &OperationId,
        active: impl IntoIterator<Item = &'a OperationId>,
    ) -> bool {
        self.check(requested, active).is_ok()
    }
}
