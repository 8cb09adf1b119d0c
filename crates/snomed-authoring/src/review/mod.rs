//! Branch reviews and merge reviews.
//!
//! A branch review lists the concepts changed on one branch that another
//! branch has not seen yet. A merge review pairs the reviews of both
//! directions of a rebase, offers an automatic merge of each concept changed
//! on both sides, and collects manual resolutions until the rebase is applied.

mod auto_merge;
mod diff;
mod service;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snomed_store::{Branch, Timepoint};
use snomed_types::{Concept, SctId};

pub use auto_merge::auto_merge;
pub use service::BranchReviewService;

/// Lifecycle of a branch or merge review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    /// Changes are still being collected.
    Pending,
    /// Matches the current state of both branches.
    Current,
    /// One of the branches has moved since the review was created.
    Stale,
    /// Collecting changes failed.
    Failed,
}

/// A branch as it was when a review was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSnapshot {
    /// Branch path.
    pub path: String,
    /// Base timepoint.
    pub base: Timepoint,
    /// Head timepoint.
    pub head: Timepoint,
}

impl BranchSnapshot {
    pub(crate) fn of(branch: &Branch) -> Self {
        Self {
            path: branch.path.clone(),
            base: branch.base,
            head: branch.head,
        }
    }

    /// Whether the branch has moved away from this snapshot.
    pub fn is_outdated_by(&self, branch: &Branch) -> bool {
        self.base != branch.base || self.head != branch.head
    }
}

/// Concepts changed on the source branch of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewChanges {
    /// Concepts that did not exist before.
    pub created: BTreeSet<SctId>,
    /// Concepts with new versions of themselves or their components.
    pub modified: BTreeSet<SctId>,
    /// Concepts that no longer exist.
    pub deleted: BTreeSet<SctId>,
}

impl ReviewChanges {
    /// Every concept touched, whatever the kind of change.
    pub fn changed_concepts(&self) -> BTreeSet<SctId> {
        self.created
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .copied()
            .collect()
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Changes on `source` that `target` does not have yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReview {
    /// Review id.
    pub id: String,
    /// When the status last changed.
    pub last_updated: DateTime<Utc>,
    /// Current status.
    pub status: ReviewStatus,
    /// Branch the changes are read from.
    pub source: BranchSnapshot,
    /// Branch the changes would be merged into.
    pub target: BranchSnapshot,
    /// Whether the source is the parent of the target, i.e. a rebase review.
    pub source_is_parent: bool,
    /// Computed on first request.
    pub changes: Option<ReviewChanges>,
}

/// Both directions of a rebase, and the resolutions collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReview {
    /// Merge review id.
    pub id: String,
    /// Parent branch.
    pub source_path: String,
    /// Child branch being rebased.
    pub target_path: String,
    /// Review of parent changes.
    pub source_to_target_review_id: String,
    /// Review of child changes.
    pub target_to_source_review_id: String,
    /// Current status.
    pub status: ReviewStatus,
    /// Failure message.
    pub message: Option<String>,
    /// When the merge review was requested.
    pub created: DateTime<Utc>,
}

/// One concept changed on both sides of a merge review.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReviewConceptVersions {
    /// Concept id.
    pub concept_id: SctId,
    /// Version on the parent branch.
    pub source_concept: Concept,
    /// Version on the child branch.
    pub target_concept: Concept,
    /// Proposed merge of both versions.
    pub auto_merged_concept: Concept,
    /// Resolution saved by the author, if any.
    pub manually_merged_concept: Option<Concept>,
    /// Whether the author resolved the conflict by deleting the concept.
    pub target_concept_deleted: bool,
}
