//! Review store and merge review workflow.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use snomed_store::VersionedStore;
use snomed_types::{Concept, SctId};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};

use super::diff::find_concept_changes;
use super::{
    auto_merge, BranchReview, BranchSnapshot, MergeReview, MergeReviewConceptVersions, ReviewChanges,
    ReviewStatus,
};
use crate::concept_service::ConceptService;
use crate::config::AuthoringConfig;
use crate::error::{AuthoringError, AuthoringResult};
use crate::merge::BranchMergeService;

struct ReviewEntry {
    snapshot_key: String,
    review: Mutex<BranchReview>,
    changes_lock: Mutex<()>,
}

struct MergeReviewEntry {
    review: Mutex<MergeReview>,
    status: watch::Sender<ReviewStatus>,
}

/// A conflict resolution waiting for the merge review to be applied.
#[derive(Debug, Clone)]
enum ManualMerge {
    /// Concept as JSON.
    Concept(String),
    Deletion,
}

fn snapshot_key(source: &BranchSnapshot, target: &BranchSnapshot) -> String {
    format!(
        "{}@{}->{}@{}",
        source.path,
        source.head.millis(),
        target.path,
        target.head.millis()
    )
}

fn joined<T>(result: Result<AuthoringResult<T>, JoinError>) -> AuthoringResult<T> {
    result?
}

/// Creates and caches branch reviews and runs merge reviews.
///
/// Reviews and merge reviews expire after the configured review time to live.
pub struct BranchReviewService {
    store: VersionedStore,
    concepts: Arc<ConceptService>,
    config: AuthoringConfig,
    reviews: Cache<String, Arc<ReviewEntry>>,
    snapshot_index: Arc<DashMap<String, String>>,
    merge_reviews: Cache<String, Arc<MergeReviewEntry>>,
    manually_merged: Arc<DashMap<String, BTreeMap<SctId, ManualMerge>>>,
    #[cfg(test)]
    change_computations: std::sync::atomic::AtomicUsize,
}

impl std::fmt::Debug for BranchReviewService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchReviewService")
            .field("reviews", &self.reviews.entry_count())
            .field("merge_reviews", &self.merge_reviews.entry_count())
            .field("review_ttl", &self.config.review_ttl)
            .finish()
    }
}

impl BranchReviewService {
    /// Creates the service with empty review stores.
    pub fn new(store: VersionedStore, concepts: Arc<ConceptService>, config: AuthoringConfig) -> Self {
        let snapshot_index: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let index = Arc::clone(&snapshot_index);
        let reviews = Cache::builder()
            .time_to_live(config.review_ttl)
            .eviction_listener(move |id: Arc<String>, entry: Arc<ReviewEntry>, _cause: RemovalCause| {
                index.remove_if(&entry.snapshot_key, |_, review_id| review_id == id.as_str());
            })
            .build();

        let manually_merged: Arc<DashMap<String, BTreeMap<SctId, ManualMerge>>> = Arc::new(DashMap::new());
        let resolutions = Arc::clone(&manually_merged);
        let merge_reviews = Cache::builder()
            .time_to_live(config.review_ttl)
            .eviction_listener(move |id: Arc<String>, _entry: Arc<MergeReviewEntry>, _cause: RemovalCause| {
                resolutions.remove(id.as_str());
            })
            .build();

        Self {
            store,
            concepts,
            config,
            reviews,
            snapshot_index,
            merge_reviews,
            manually_merged,
            #[cfg(test)]
            change_computations: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Branch reviews
    // ═══════════════════════════════════════════════════════════════════════════

    /// Returns the review of the current state of both branches, creating it if needed.
    pub fn get_create_review(&self, source: &str, target: &str) -> AuthoringResult<BranchReview> {
        let source_branch = self.store.find_branch(source)?;
        let target_branch = self.store.find_branch(target)?;
        if !self
            .store
            .branches_have_parent_child_relationship(&source_branch, &target_branch)
        {
            return Err(AuthoringError::Validation(
                "The source or target branch must be the direct parent of the other.".to_string(),
            ));
        }

        let source_snapshot = BranchSnapshot::of(&source_branch);
        let target_snapshot = BranchSnapshot::of(&target_branch);
        let key = snapshot_key(&source_snapshot, &target_snapshot);
        let existing_id = self.snapshot_index.get(&key).map(|id| id.value().clone());
        if let Some(entry) = existing_id.and_then(|id| self.reviews.get(&id)) {
            return Ok(entry.review.lock().clone());
        }

        let review = BranchReview {
            id: uuid::Uuid::new_v4().to_string(),
            last_updated: Utc::now(),
            status: ReviewStatus::Current,
            source_is_parent: target_branch.parent_path() == Some(source),
            source: source_snapshot,
            target: target_snapshot,
            changes: None,
        };
        info!("Created branch review {} {} -> {}", review.id, source, target);
        self.reviews.insert(
            review.id.clone(),
            Arc::new(ReviewEntry {
                snapshot_key: key.clone(),
                review: Mutex::new(review.clone()),
                changes_lock: Mutex::new(()),
            }),
        );
        self.snapshot_index.insert(key, review.id.clone());
        Ok(review)
    }

    /// Looks up a review, marking it STALE if either branch has moved.
    pub fn get_branch_review(&self, id: &str) -> AuthoringResult<Option<BranchReview>> {
        let Some(entry) = self.reviews.get(id) else {
            return Ok(None);
        };
        let (source_path, target_path) = {
            let review = entry.review.lock();
            (review.source.path.clone(), review.target.path.clone())
        };
        let source = self.store.find_branch(&source_path)?;
        let target = self.store.find_branch(&target_path)?;

        let mut review = entry.review.lock();
        if review.status == ReviewStatus::Current
            && (review.source.is_outdated_by(&source) || review.target.is_outdated_by(&target))
        {
            review.status = ReviewStatus::Stale;
            review.last_updated = Utc::now();
        }
        Ok(Some(review.clone()))
    }

    /// Concepts changed on the source of a CURRENT review, computed on first request.
    pub fn get_branch_review_concept_changes(&self, id: &str) -> AuthoringResult<ReviewChanges> {
        let review = self
            .get_branch_review(id)?
            .ok_or_else(|| AuthoringError::NotFound(format!("Branch review {id} does not exist.")))?;
        if review.status != ReviewStatus::Current {
            return Err(AuthoringError::State("Branch review is not current.".to_string()));
        }
        if let Some(changes) = review.changes {
            return Ok(changes);
        }

        let entry = self
            .reviews
            .get(id)
            .ok_or_else(|| AuthoringError::NotFound(format!("Branch review {id} does not exist.")))?;
        let _computing = entry.changes_lock.lock();
        if let Some(changes) = entry.review.lock().changes.clone() {
            return Ok(changes);
        }

        let source = self
            .store
            .find_branch_at_timepoint(&review.source.path, review.source.head)?;
        let target = self
            .store
            .find_branch_at_timepoint(&review.target.path, review.target.head)?;
        #[cfg(test)]
        self.change_computations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let changes = find_concept_changes(
            &self.store,
            &source,
            &target,
            review.source_is_parent,
            self.config.clause_limit,
        )?;
        entry.review.lock().changes = Some(changes.clone());
        Ok(changes)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Merge reviews
    // ═══════════════════════════════════════════════════════════════════════════

    /// Starts a merge review of rebasing `target` onto its parent `source`.
    ///
    /// Both branch reviews are computed on the blocking pool of the current
    /// runtime, or inline when called outside one. The returned review is
    /// PENDING in the first case.
    pub fn create_merge_review(self: &Arc<Self>, source: &str, target: &str) -> AuthoringResult<MergeReview> {
        let target_branch = self.store.find_branch(target)?;
        self.store.find_branch(source)?;
        if target_branch.parent_path() != Some(source) {
            return Err(AuthoringError::Validation(
                "A merge review should only be used during rebase, not promotion.".to_string(),
            ));
        }

        let source_to_target = self.get_create_review(source, target)?;
        let target_to_source = self.get_create_review(target, source)?;
        let review = MergeReview {
            id: uuid::Uuid::new_v4().to_string(),
            source_path: source.to_string(),
            target_path: target.to_string(),
            source_to_target_review_id: source_to_target.id,
            target_to_source_review_id: target_to_source.id,
            status: ReviewStatus::Pending,
            message: None,
            created: Utc::now(),
        };
        let (status, _) = watch::channel(ReviewStatus::Pending);
        self.merge_reviews.insert(
            review.id.clone(),
            Arc::new(MergeReviewEntry {
                review: Mutex::new(review.clone()),
                status,
            }),
        );
        info!("Created merge review {} {} -> {}", review.id, source, target);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let service = Arc::clone(self);
                let merge_review = review.clone();
                runtime.spawn(async move {
                    service.collect_merge_review_changes(merge_review).await;
                });
                Ok(review)
            }
            Err(_) => {
                let result = self
                    .get_branch_review_concept_changes(&review.source_to_target_review_id)
                    .and_then(|_| self.get_branch_review_concept_changes(&review.target_to_source_review_id));
                self.finish_merge_review(&review.id, result.map(|_| ()));
                self.get_merge_review(&review.id)?
                    .ok_or_else(|| merge_review_not_found(&review.id))
            }
        }
    }

    async fn collect_merge_review_changes(self: Arc<Self>, review: MergeReview) {
        let first = {
            let service = Arc::clone(&self);
            let id = review.source_to_target_review_id.clone();
            tokio::task::spawn_blocking(move || service.get_branch_review_concept_changes(&id))
        };
        let second = {
            let service = Arc::clone(&self);
            let id = review.target_to_source_review_id.clone();
            tokio::task::spawn_blocking(move || service.get_branch_review_concept_changes(&id))
        };
        let (first, second) = tokio::join!(first, second);
        let result = joined(first).and_then(|_| joined(second)).map(|_| ());
        self.finish_merge_review(&review.id, result);
    }

    fn finish_merge_review(&self, id: &str, result: AuthoringResult<()>) {
        let Some(entry) = self.merge_reviews.get(id) else {
            return;
        };
        let mut review = entry.review.lock();
        match result {
            Ok(()) => review.status = ReviewStatus::Current,
            Err(err) => {
                error!("Collecting branch review changes failed for merge review {}: {}", id, err);
                review.status = ReviewStatus::Failed;
                review.message = Some(err.to_string());
            }
        }
        entry.status.send_replace(review.status);
    }

    /// Looks up a merge review; a CURRENT one takes the status of its parent-to-child review.
    pub fn get_merge_review(&self, id: &str) -> AuthoringResult<Option<MergeReview>> {
        let Some(entry) = self.merge_reviews.get(id) else {
            return Ok(None);
        };
        let (status, source_to_target_id) = {
            let review = entry.review.lock();
            (review.status, review.source_to_target_review_id.clone())
        };
        if status == ReviewStatus::Current {
            let source_to_target = self.get_branch_review(&source_to_target_id)?;
            let mut review = entry.review.lock();
            match source_to_target {
                Some(branch_review) => review.status = branch_review.status,
                None => {
                    review.status = ReviewStatus::Failed;
                    review.message = Some(format!("Branch merge not found in store. ({source_to_target_id})"));
                }
            }
            entry.status.send_replace(review.status);
        }
        let review = entry.review.lock().clone();
        Ok(Some(review))
    }

    /// Waits until a merge review is no longer PENDING.
    ///
    /// Fails with NotFound if the review expires while waiting.
    pub async fn wait_for_merge_review(&self, id: &str) -> AuthoringResult<MergeReview> {
        let mut status = self
            .merge_reviews
            .get(id)
            .ok_or_else(|| merge_review_not_found(id))?
            .status
            .subscribe();
        status
            .wait_for(|s| *s != ReviewStatus::Pending)
            .await
            .map_err(|_| merge_review_not_found(id))?;
        self.get_merge_review(id)?.ok_or_else(|| merge_review_not_found(id))
    }

    /// Concepts changed on both sides, with a proposed merge of each.
    ///
    /// A conflicting concept missing on either side is resolved as a deletion
    /// and left out of the result.
    pub fn get_merge_review_conflicting_concepts(&self, id: &str) -> AuthoringResult<Vec<MergeReviewConceptVersions>> {
        let review = self.current_merge_review(id)?;
        let conflicts: Vec<SctId> = self.conflicting_concept_ids(&review)?.into_iter().collect();
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }

        let mut source_concepts = self.load_by_id(&conflicts, &review.source_path)?;
        let mut target_concepts = self.load_by_id(&conflicts, &review.target_path)?;
        let resolutions = self.resolutions(id);

        let mut versions = Vec::new();
        for concept_id in conflicts {
            let (Some(source_concept), Some(target_concept)) =
                (source_concepts.remove(&concept_id), target_concepts.remove(&concept_id))
            else {
                self.record_resolution(id, concept_id, ManualMerge::Deletion);
                info!(
                    "Concept {} deleted on both sides of the merge. Excluding from merge review {}.",
                    concept_id, id
                );
                continue;
            };
            let (manually_merged_concept, target_concept_deleted) = match resolutions.get(&concept_id) {
                Some(ManualMerge::Concept(json)) => (Some(serde_json::from_str(json)?), false),
                Some(ManualMerge::Deletion) => (None, true),
                None => (None, false),
            };
            versions.push(MergeReviewConceptVersions {
                concept_id,
                auto_merged_concept: auto_merge(&source_concept, &target_concept),
                source_concept,
                target_concept,
                manually_merged_concept,
                target_concept_deleted,
            });
        }
        Ok(versions)
    }

    /// Saves the resolution of a conflicting concept.
    pub fn persist_manually_merged_concept(&self, id: &str, concept_id: SctId, concept: &Concept) -> AuthoringResult<()> {
        if concept.concept_id != Some(concept_id) {
            return Err(AuthoringError::Validation(
                "conceptId in request path does not match the conceptId in the request body.".to_string(),
            ));
        }
        self.current_merge_review(id)?;
        let json = serde_json::to_string(concept)?;
        self.record_resolution(id, concept_id, ManualMerge::Concept(json));
        Ok(())
    }

    /// Resolves a conflicting concept by deleting it from the child branch.
    pub fn persist_manual_merge_concept_deletion(&self, id: &str, concept_id: SctId) -> AuthoringResult<()> {
        self.current_merge_review(id)?;
        self.record_resolution(id, concept_id, ManualMerge::Deletion);
        Ok(())
    }

    /// Rebases the child branch using the saved resolutions.
    pub fn apply_merge_review(&self, id: &str, merge: &BranchMergeService) -> AuthoringResult<()> {
        let review = self.current_merge_review(id)?;
        let conflicts = self.conflicting_concept_ids(&review)?;
        let resolutions = self.resolutions(id);

        let unresolved: Vec<String> = conflicts
            .iter()
            .filter(|concept_id| !resolutions.contains_key(concept_id))
            .map(SctId::to_string)
            .collect();
        if !unresolved.is_empty() {
            return Err(AuthoringError::Conflict(format!(
                "Not all conflicting concepts have been resolved. Unresolved: [{}]",
                unresolved.join(", ")
            )));
        }
        if resolutions.len() > conflicts.len() {
            return Err(AuthoringError::Conflict(
                "There are more manually merged concepts than conflicts. Can not proceed.".to_string(),
            ));
        }

        let concepts = resolutions
            .into_iter()
            .map(|(concept_id, resolution)| -> AuthoringResult<Concept> {
                match resolution {
                    ManualMerge::Concept(json) => Ok(serde_json::from_str(&json)?),
                    ManualMerge::Deletion => {
                        let mut deletion = Concept::new(concept_id);
                        deletion.deleted = true;
                        Ok(deletion)
                    }
                }
            })
            .collect::<AuthoringResult<Vec<Concept>>>()?;
        info!(
            "Applying merge review {} {} -> {} with {} resolved conflicts",
            id,
            review.source_path,
            review.target_path,
            concepts.len()
        );
        merge.merge_branch_sync(&review.source_path, &review.target_path, Some(concepts))?;
        self.manually_merged.remove(id);
        Ok(())
    }

    fn current_merge_review(&self, id: &str) -> AuthoringResult<MergeReview> {
        let review = self.get_merge_review(id)?.ok_or_else(|| merge_review_not_found(id))?;
        if review.status != ReviewStatus::Current {
            return Err(AuthoringError::State("Merge review state is not CURRENT".to_string()));
        }
        Ok(review)
    }

    fn conflicting_concept_ids(&self, review: &MergeReview) -> AuthoringResult<BTreeSet<SctId>> {
        let source_changes = self
            .get_branch_review_concept_changes(&review.source_to_target_review_id)?
            .changed_concepts();
        let target_changes = self
            .get_branch_review_concept_changes(&review.target_to_source_review_id)?
            .changed_concepts();
        Ok(source_changes.intersection(&target_changes).copied().collect())
    }

    fn load_by_id(&self, concept_ids: &[SctId], path: &str) -> AuthoringResult<HashMap<SctId, Concept>> {
        Ok(self
            .concepts
            .find_many(concept_ids, path)?
            .into_iter()
            .map(|concept| (concept.id(), concept))
            .collect())
    }

    fn resolutions(&self, id: &str) -> BTreeMap<SctId, ManualMerge> {
        self.manually_merged
            .get(id)
            .map(|resolutions| resolutions.value().clone())
            .unwrap_or_default()
    }

    fn record_resolution(&self, id: &str, concept_id: SctId, resolution: ManualMerge) {
        self.manually_merged
            .entry(id.to_string())
            .or_default()
            .insert(concept_id, resolution);
    }
}

fn merge_review_not_found(id: &str) -> AuthoringError {
    AuthoringError::NotFound(format!("Merge review {id} does not exist."))
}
