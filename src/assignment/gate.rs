//! Check-then-act sequence around conflict detection.
//!
//! A selection is either committed in full or not at all. Conflicts, once
//! detected, must each receive a decision before anything reaches the sink,
//! and a failed submission leaves the gate where it was so the caller can
//! retry without re-deriving conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::assignment::conflicts::detect_conflicts;
use crate::assignment::sink::AssignmentSink;
use crate::assignment::{
    AssignmentSubmission, Conflict, ConflictDecision, ConflictKey, SelectionRequest,
};
use crate::catalog::{
    CategoryId, InterventionId, InterventionPlan, OrgUnit, OrgUnitId, ScenarioId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    Checking,
    AwaitingResolution,
}

impl Display for GatePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::AwaitingResolution => "awaiting resolution",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAssignment {
    pub scenario: ScenarioId,
    pub selection: SelectionRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingResolution {
    pub pending: PendingAssignment,
    pub conflicts: Vec<Conflict>,
    pub decisions: BTreeMap<ConflictKey, ConflictDecision>,
}

impl PendingResolution {
    pub fn unresolved(&self) -> Vec<ConflictKey> {
        self.conflicts
            .iter()
            .map(Conflict::key)
            .filter(|key| !self.decisions.contains_key(key))
            .collect()
    }

    fn keeps_existing(&self, org_unit: OrgUnitId) -> bool {
        self.decisions.iter().any(|(key, decision)| {
            key.org_unit == org_unit && *decision == ConflictDecision::KeepExisting
        })
    }

    /// The selection minus every district where an existing assignment was
    /// kept.
    pub fn resolved_selection(&self) -> SelectionRequest {
        let mut selection = self.pending.selection.clone();
        selection
            .org_units
            .retain(|ou| !self.keeps_existing(ou.id));
        selection
    }

    /// Every `(district, intervention)` pair of the selection that the
    /// resolved selection no longer carries, one entry per selected category.
    pub fn dropped(&self) -> Vec<DroppedAssignment> {
        let selection = &self.pending.selection;
        let mut seen = BTreeSet::new();
        let mut dropped = Vec::new();
        for org_unit in &selection.org_units {
            if !seen.insert(org_unit.id) || !self.keeps_existing(org_unit.id) {
                continue;
            }
            for (category, intervention) in &selection.selected_interventions_by_category {
                let key = ConflictKey {
                    org_unit: org_unit.id,
                    category: *category,
                };
                dropped.push(DroppedAssignment {
                    org_unit: org_unit.clone(),
                    category_id: *category,
                    intervention_id: *intervention,
                    kept_existing: self.decisions.get(&key)
                        == Some(&ConflictDecision::KeepExisting),
                });
            }
        }
        dropped
    }
}

/// A selected intervention that was not submitted for a district because the
/// district kept an existing assignment.
///
/// `kept_existing` is false for categories that had no conflict of their own:
/// the district left the submission because of a decision in another
/// category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DroppedAssignment {
    pub org_unit: OrgUnit,
    pub category_id: CategoryId,
    pub intervention_id: InterventionId,
    pub kept_existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum GateState {
    #[default]
    Idle,
    /// Conflict-free selection waiting for (or retrying) its submission.
    Checking(PendingAssignment),
    AwaitingResolution(PendingResolution),
}

impl GateState {
    pub fn phase(&self) -> GatePhase {
        match self {
            Self::Idle => GatePhase::Idle,
            Self::Checking(_) => GatePhase::Checking,
            Self::AwaitingResolution(_) => GatePhase::AwaitingResolution,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Committed {
        submission: AssignmentSubmission,
        dropped: Vec<DroppedAssignment>,
    },
    /// Everything was resolved away (or the selection was empty); the sink
    /// was not called.
    NothingToCommit { dropped: Vec<DroppedAssignment> },
    AwaitingResolution(Vec<Conflict>),
}

impl GateOutcome {
    pub fn dropped(&self) -> &[DroppedAssignment] {
        match self {
            Self::Committed { dropped, .. } | Self::NothingToCommit { dropped } => dropped,
            Self::AwaitingResolution(_) => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("assignment gate is busy ({0})")]
    Busy(GatePhase),
    #[error("no pending assignment")]
    NothingPending,
    #[error("no conflicts awaiting resolution")]
    NotAwaitingResolution,
    #[error("no conflict for org unit {org_unit} in category {category}")]
    UnknownConflict {
        org_unit: OrgUnitId,
        category: CategoryId,
    },
    #[error("{} conflict(s) still unresolved", .0.len())]
    Unresolved(Vec<ConflictKey>),
    #[error("assignment submission failed: {0}")]
    Sink(#[source] anyhow::Error),
}

#[derive(Debug, Default)]
pub struct AssignmentGate {
    state: GateState,
}

impl AssignmentGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn phase(&self) -> GatePhase {
        self.state.phase()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        match &self.state {
            GateState::AwaitingResolution(resolution) => &resolution.conflicts,
            _ => &[],
        }
    }

    /// Starts a new assignment. Conflict-free selections are submitted right
    /// away; otherwise the gate waits for a decision on every conflict.
    pub async fn request(
        &mut self,
        scenario: ScenarioId,
        selection: SelectionRequest,
        existing_plans: &[InterventionPlan],
        sink: &dyn AssignmentSink,
    ) -> Result<GateOutcome, GateError> {
        if self.phase() != GatePhase::Idle {
            return Err(GateError::Busy(self.phase()));
        }

        let conflicts = detect_conflicts(
            &selection.org_units,
            &selection.selected_interventions_by_category,
            existing_plans,
        );
        let pending = PendingAssignment {
            scenario,
            selection,
        };

        if conflicts.is_empty() {
            self.state = GateState::Checking(pending);
            return self.commit(sink).await;
        }

        info!(
            "scenario {scenario}: {} conflict(s) need a decision",
            conflicts.len()
        );
        self.state = GateState::AwaitingResolution(PendingResolution {
            pending,
            conflicts: conflicts.clone(),
            decisions: BTreeMap::new(),
        });
        Ok(GateOutcome::AwaitingResolution(conflicts))
    }

    pub fn resolve(
        &mut self,
        org_unit: OrgUnitId,
        category: CategoryId,
        decision: ConflictDecision,
    ) -> Result<(), GateError> {
        let GateState::AwaitingResolution(resolution) = &mut self.state else {
            return Err(GateError::NotAwaitingResolution);
        };
        let key = ConflictKey { org_unit, category };
        if !resolution.conflicts.iter().any(|c| c.key() == key) {
            return Err(GateError::UnknownConflict { org_unit, category });
        }
        resolution.decisions.insert(key, decision);
        Ok(())
    }

    /// Applies `decision` to every conflict still lacking one. Returns how
    /// many were resolved.
    pub fn resolve_remaining(&mut self, decision: ConflictDecision) -> Result<usize, GateError> {
        let GateState::AwaitingResolution(resolution) = &mut self.state else {
            return Err(GateError::NotAwaitingResolution);
        };
        let remaining = resolution.unresolved();
        for key in &remaining {
            resolution.decisions.insert(*key, decision);
        }
        Ok(remaining.len())
    }

    pub fn unresolved(&self) -> Vec<ConflictKey> {
        match &self.state {
            GateState::AwaitingResolution(resolution) => resolution.unresolved(),
            _ => Vec::new(),
        }
    }

    /// Submits the pending selection. On sink failure the state is left
    /// untouched.
    pub async fn commit(&mut self, sink: &dyn AssignmentSink) -> Result<GateOutcome, GateError> {
        let (submission, dropped) = match &self.state {
            GateState::Idle => return Err(GateError::NothingPending),
            GateState::Checking(pending) => (
                AssignmentSubmission::from_selection(pending.scenario, &pending.selection),
                Vec::new(),
            ),
            GateState::AwaitingResolution(resolution) => {
                let unresolved = resolution.unresolved();
                if !unresolved.is_empty() {
                    return Err(GateError::Unresolved(unresolved));
                }
                (
                    AssignmentSubmission::from_selection(
                        resolution.pending.scenario,
                        &resolution.resolved_selection(),
                    ),
                    resolution.dropped(),
                )
            }
        };
        for entry in dropped.iter().filter(|entry| !entry.kept_existing) {
            warn!(
                "scenario {}: intervention {} not assigned to {} (org unit {}), which keeps an existing assignment in another category",
                submission.scenario_id, entry.intervention_id, entry.org_unit.name, entry.org_unit.id
            );
        }

        if submission.is_empty() {
            info!(
                "scenario {}: nothing left to assign",
                submission.scenario_id
            );
            self.state = GateState::Idle;
            return Ok(GateOutcome::NothingToCommit { dropped });
        }

        if let Err(err) = sink.submit(&submission).await {
            warn!(
                "scenario {}: submission failed, keeping {} state: {err:#}",
                submission.scenario_id,
                self.phase()
            );
            return Err(GateError::Sink(err));
        }

        info!(
            "scenario {}: assigned {} intervention(s) to {} org unit(s)",
            submission.scenario_id,
            submission.intervention_ids.len(),
            submission.org_unit_ids.len()
        );
        self.state = GateState::Idle;
        Ok(GateOutcome::Committed {
            submission,
            dropped,
        })
    }

    /// Drops the pending selection without writing anything. Returns whether
    /// there was something to drop.
    pub fn cancel(&mut self) -> bool {
        let had_pending = self.phase() != GatePhase::Idle;
        self.state = GateState::Idle;
        had_pending
    }
}
