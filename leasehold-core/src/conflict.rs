use crate::types::{LeaseFailureReason, LockMode, ResourceLock, ResourceRef};

/// Represents the outcome of a conflict check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResult {
    /// No conflict found
    Ok,
    /// A live lease held by another holder blocks the request
    Conflict {
        reason: LeaseFailureReason,
        existing: ResourceLock,
    },
}

/// A pure engine for O(1) conflict detection using a precomputed compatibility matrix.
pub struct ConflictEngine;

impl ConflictEngine {
    /// Compatibility matrix.
    /// Rows: Existing mode (Held)
    /// Cols: New mode (Requesting)
    /// True = Compatible (No Conflict)
    ///
    /// Order: Exclusive(0), Shared(1)
    #[rustfmt::skip]
    const MATRIX: [[bool; 2]; 2] = [
        //          Excl   Shared
        /* Excl */ [false, false],
        /* Shrd */ [false, true ],
    ];

    /// O(1) check if two modes conflict
    pub fn check_pair(held: LockMode, requesting: LockMode) -> bool {
        !Self::MATRIX[held.to_index()][requesting.to_index()]
    }

    /// Checks a request against the leases currently on record.
    ///
    /// Expired leases and the requester's own leases never conflict.
    pub fn check_against_leases(
        requesting_holder: &str,
        requesting_mode: LockMode,
        resource: &ResourceRef,
        leases: &[ResourceLock],
        now: u64,
    ) -> ConflictResult {
        for lease in leases {
            if &lease.resource != resource || !lease.is_live(now) {
                continue;
            }

            // Reentrant: a holder never conflicts with itself
            if lease.holder == requesting_holder {
                continue;
            }

            if Self::check_pair(lease.mode, requesting_mode) {
                let reason = match lease.mode {
                    LockMode::Exclusive => LeaseFailureReason::ExclusiveHeld,
                    LockMode::Shared => LeaseFailureReason::SharedHeld,
                };
                return ConflictResult::Conflict {
                    reason,
                    existing: lease.clone(),
                };
            }
        }

        ConflictResult::Ok
    }
}
