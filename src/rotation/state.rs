//! Root rotation transition table.
//!
//! `plan` is a pure function of the persisted `(state, rotationStage)` pair and
//! what the reconcile observed on the object: whether the desired provider
//! differs from the one that issued the recorded root (`changed`), and whether
//! a root is recorded at all. Every pair without an entry below is undefined and moves
//! the object to [`RootState::Error`], where it stays until an operator resets
//! the status.
//!
//! | from                     | observed      | action           | to                       |
//! |--------------------------|---------------|------------------|--------------------------|
//! | init, "" or pending      | any           | issue root       | issuing-rollout, pending |
//! | issuing-rollout, pending | any           | distribute root  | rolling-out, dual-trust  |
//! | rolling-out, dual-trust  | unchanged     | retire old roots | completed, sole-trust    |
//! | rolling-out, dual-trust  | changed       | none             | rolling-back, dual-trust |
//! | rolling-back, dual-trust | any           | withdraw root    | rolling-back, retired    |
//! | rolling-back, retired    | root recorded | none             | active, sole-trust       |
//! | rolling-back, retired    | no root       | none             | init, pending            |
//! | completed, sole-trust    | any           | none             | active, sole-trust       |
//! | active, sole-trust       | changed       | none             | init, pending            |
//!
//! `active`/`sole-trust` with an unchanged provider and every `error` pair are
//! terminal. A rollback with no earlier root to fall back on starts over from
//! `init` with the desired provider.

use crate::domain::{RootState, RotationStage};

/// Change to the recorded roots performed before a transition is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// Resolve the root of the desired provider and record it as the issued
    /// root, keeping the one it replaces as the previous root.
    IssueRoot,
    /// Trust the issued root next to the previous one.
    DistributeRoot,
    /// Forget the previous root; only the issued root stays trusted.
    RetireOldRoots,
    /// Restore the previous root as the issued root.
    WithdrawRoot,
}

/// What a reconcile read from the object besides its status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    /// The desired provider differs from the one that issued the recorded root
    pub provider_changed: bool,
    /// An issued root is recorded on the object
    pub root_recorded: bool,
}

/// Outcome of planning one reconcile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Move to `next`, performing `action` first if present.
    Transition { action: Option<RotationAction>, next: (RootState, RotationStage) },
    /// Nothing left to do for this pair.
    Terminal,
    /// The pair has no defined transition.
    Undefined,
}

impl Step {
    fn to(action: Option<RotationAction>, state: RootState, stage: RotationStage) -> Self {
        Self::Transition { action, next: (state, stage) }
    }
}

/// Compute the next step for a `(state, stage)` pair.
pub fn plan(state: RootState, stage: RotationStage, observed: Observed) -> Step {
    use RootState as S;
    use RotationAction as A;
    use RotationStage as R;

    let changed = observed.provider_changed;
    match (state, stage) {
        (S::Init, R::Unset | R::Pending) => {
            Step::to(Some(A::IssueRoot), S::IssuingRollout, R::Pending)
        }
        (S::IssuingRollout, R::Pending) => {
            Step::to(Some(A::DistributeRoot), S::RollingOut, R::DualTrust)
        }
        (S::RollingOut, R::DualTrust) if changed => Step::to(None, S::RollingBack, R::DualTrust),
        (S::RollingOut, R::DualTrust) => {
            Step::to(Some(A::RetireOldRoots), S::Completed, R::SoleTrust)
        }
        (S::RollingBack, R::DualTrust) => {
            Step::to(Some(A::WithdrawRoot), S::RollingBack, R::Retired)
        }
        (S::RollingBack, R::Retired) if observed.root_recorded => {
            Step::to(None, S::Active, R::SoleTrust)
        }
        (S::RollingBack, R::Retired) => Step::to(None, S::Init, R::Pending),
        (S::Completed, R::SoleTrust) => Step::to(None, S::Active, R::SoleTrust),
        (S::Active, R::SoleTrust) if changed => Step::to(None, S::Init, R::Pending),
        (S::Active, R::SoleTrust) => Step::Terminal,
        (S::Error, _) => Step::Terminal,
        _ => Step::Undefined,
    }
}
