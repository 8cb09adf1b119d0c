//! Rebase and promotion between a branch and its parent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snomed_store::{BranchCriteria, BranchState, Commit, DomainEntity, VersionedStore};
use snomed_types::{CharacteristicType, Concept, Description, ReferenceSetMember, Relationship};
use tracing::{debug, error, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::concept_service::{ComponentBatch, ConceptService};
use crate::config::AuthoringConfig;
use crate::error::{AuthoringError, AuthoringResult};
use crate::jobs::{BranchMergeJob, JobStore};
use crate::review::{BranchReviewService, ReviewStatus};
use crate::semantic::QueryConcept;

/// Rejected rebase of a diverged branch without resolved conflicts.
pub const USE_BRANCH_REVIEW: &str =
    "The target branch is diverged, please use the branch review endpoint instead.";

/// Request to merge one branch into another in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Branch to take changes from.
    pub source: String,
    /// Branch to apply changes to.
    pub target: String,
    /// Branch review that must be CURRENT for the merge to start.
    #[serde(default)]
    pub review_id: Option<String>,
}

impl MergeRequest {
    /// A request without a review.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            review_id: None,
        }
    }
}

/// Entity types moved by a promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromotedKind {
    Concept,
    Description,
    Relationship,
    ReferenceSetMember,
    QueryConcept,
}

const PROMOTED_KINDS: [PromotedKind; 5] = [
    PromotedKind::Concept,
    PromotedKind::Description,
    PromotedKind::Relationship,
    PromotedKind::ReferenceSetMember,
    PromotedKind::QueryConcept,
];

/// Moves content between parent and child branches.
#[derive(Debug)]
pub struct BranchMergeService {
    store: VersionedStore,
    concepts: Arc<ConceptService>,
    reviews: Arc<BranchReviewService>,
    jobs: JobStore,
    config: AuthoringConfig,
}

impl BranchMergeService {
    /// Creates the service.
    pub fn new(
        store: VersionedStore,
        concepts: Arc<ConceptService>,
        reviews: Arc<BranchReviewService>,
        config: AuthoringConfig,
    ) -> Self {
        Self {
            store,
            concepts,
            reviews,
            jobs: JobStore::new(config.merge_job_ttl),
            config,
        }
    }

    /// Rebases `target` onto its parent `source`, or promotes child `source` into `target`.
    ///
    /// `manually_merged` holds resolved conflicts for a rebase; concepts
    /// flagged deleted are removed from the target.
    pub fn merge_branch_sync(
        &self,
        source: &str,
        target: &str,
        manually_merged: Option<Vec<Concept>>,
    ) -> AuthoringResult<()> {
        info!("Request merge {} -> {}", source, target);
        let source_branch = self.store.find_branch(source)?;
        let target_branch = self.store.find_branch(target)?;

        if !self
            .store
            .branches_have_parent_child_relationship(&source_branch, &target_branch)
        {
            return Err(AuthoringError::State(
                "The source or target branch must be the direct parent of the other.".to_string(),
            ));
        }

        let rebase = target_branch.parent_path() == Some(source);
        if rebase {
            if source_branch.head == target_branch.base {
                return Err(AuthoringError::State(
                    "This rebase is not meaningful, the child branch already has the parent's changes."
                        .to_string(),
                ));
            }
            if self.store.branch_state(target)? == BranchState::Diverged && manually_merged.is_none() {
                return Err(AuthoringError::State(USE_BRANCH_REVIEW.to_string()));
            }
            self.rebase(source, target, manually_merged.unwrap_or_default())
        } else {
            if !source_branch.contains_content {
                return Err(AuthoringError::State(
                    "This promotion is not meaningful, the child branch does not have any unpromoted changes."
                        .to_string(),
                ));
            }
            if source_branch.base != target_branch.head {
                return Err(AuthoringError::State(
                    "Child branch must be rebased before promoted.".to_string(),
                ));
            }
            self.promote(source, target)
        }
    }

    fn rebase(&self, source: &str, target: &str, manually_merged: Vec<Concept>) -> AuthoringResult<()> {
        info!("Performing rebase {} -> {}", source, target);
        let commit = self.store.open_rebase_commit(target)?;

        if !manually_merged.is_empty() {
            let (deletions, merged): (Vec<Concept>, Vec<Concept>) =
                manually_merged.into_iter().partition(|c| c.deleted);
            if !deletions.is_empty() {
                let ids: Vec<_> = deletions.iter().map(Concept::id).collect();
                let deleted = self
                    .concepts
                    .delete_concepts_and_components_within_commit(&ids, &commit)?;
                info!("Deleted {} manually merged concepts on {}", deleted, target);
            }
            // Saving in a rebase commit writes every component, hiding both visible versions.
            self.concepts.update_within_commit(merged, &commit)?;
        }

        let changes = self.store.changes_on_branch_criteria(target);
        let visible = self.store.branch_criteria_including_open_commit(&commit)?;
        self.remove_rebase_duplicate_versions::<Relationship, _>(&commit, &changes, &visible, |r| {
            r.characteristic_type_id == CharacteristicType::INFERRED_ID
        });
        self.remove_rebase_duplicate_versions::<Description, _>(&commit, &changes, &visible, |_| true);
        self.remove_rebase_duplicate_versions::<ReferenceSetMember, _>(&commit, &changes, &visible, |m| {
            m.concept_id.is_none()
        });

        commit.complete()?;
        Ok(())
    }

    /// Ends this branch's version of components the parent changed too, so
    /// the parent's version is the one seen.
    fn remove_rebase_duplicate_versions<T, F>(
        &self,
        commit: &Commit,
        changes: &BranchCriteria,
        visible: &BranchCriteria,
        clause: F,
    ) -> usize
    where
        T: DomainEntity,
        F: Fn(&T) -> bool,
    {
        let path = &commit.branch().path;
        let changed: BTreeSet<String> = self
            .store
            .search_entities::<T, _>(changes, &clause)
            .iter()
            .map(T::entity_id)
            .collect();
        if changed.is_empty() {
            return 0;
        }
        let duplicates: Vec<String> = self
            .store
            .search::<T, _>(visible, |e| clause(e) && changed.contains(&e.entity_id()))
            .into_iter()
            .filter(|v| &v.path != path)
            .map(|v| v.entity.entity_id())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if duplicates.is_empty() {
            return 0;
        }
        info!("Taking parent version of {} {}s on {}", duplicates.len(), T::KIND, path);
        self.store.end_versions_on_this_branch::<T>(commit, &duplicates)
    }

    fn promote(&self, source: &str, target: &str) -> AuthoringResult<()> {
        info!("Performing promotion {} -> {}", source, target);
        let commit = self.store.open_promotion_commit(target, source)?;
        let replaced = commit.entity_versions_replaced();

        #[cfg(feature = "parallel")]
        let counts: Vec<usize> = PROMOTED_KINDS
            .as_slice()
            .par_iter()
            .map(|kind| self.promote_kind(*kind, source, &commit, &replaced))
            .collect::<AuthoringResult<_>>()?;
        #[cfg(not(feature = "parallel"))]
        let counts: Vec<usize> = PROMOTED_KINDS
            .iter()
            .map(|kind| self.promote_kind(*kind, source, &commit, &replaced))
            .collect::<AuthoringResult<_>>()?;

        commit.complete()?;
        info!(
            "Promoted {} documents {} -> {}",
            counts.iter().sum::<usize>(),
            source,
            target
        );
        Ok(())
    }

    fn promote_kind(
        &self,
        kind: PromotedKind,
        source: &str,
        commit: &Commit,
        replaced: &BTreeMap<String, BTreeSet<u64>>,
    ) -> AuthoringResult<usize> {
        match kind {
            PromotedKind::Concept => self.promote_entities(source, commit, replaced, ComponentBatch::Concepts),
            PromotedKind::Description => {
                self.promote_entities(source, commit, replaced, ComponentBatch::Descriptions)
            }
            PromotedKind::Relationship => {
                self.promote_entities(source, commit, replaced, ComponentBatch::Relationships)
            }
            PromotedKind::ReferenceSetMember => {
                self.promote_entities(source, commit, replaced, ComponentBatch::Members)
            }
            PromotedKind::QueryConcept => {
                self.promote_entities::<QueryConcept>(source, commit, replaced, ComponentBatch::QueryConcepts)
            }
        }
    }

    fn promote_entities<T: DomainEntity>(
        &self,
        source: &str,
        commit: &Commit,
        replaced: &BTreeMap<String, BTreeSet<u64>>,
        batch: fn(Vec<T>) -> ComponentBatch,
    ) -> AuthoringResult<usize> {
        let ids: Vec<u64> = replaced
            .get(T::KIND)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        let mut ended = 0;
        for segment in ids.chunks(self.config.promotion_partition_size.max(1)) {
            let segment: BTreeSet<u64> = segment.iter().copied().collect();
            ended += self.store.end_versions_replaced_on_path::<T>(commit, &segment);
        }
        if ended > 0 {
            debug!("Ended {} {} on {}", ended, T::KIND, commit.branch().path);
        }

        let to_promote = self.store.end_changes_on_branch::<T>(commit, source);
        if to_promote.is_empty() {
            return Ok(0);
        }
        info!("Promoting {} {}", to_promote.len(), T::KIND);
        self.concepts.save_batch_components(batch(to_promote), commit)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Background merges
    // ═══════════════════════════════════════════════════════════════════════════

    /// Schedules a merge on the blocking pool of the current runtime.
    ///
    /// The review gate is checked before the job is created.
    pub fn merge_branch_async(self: &Arc<Self>, request: MergeRequest) -> AuthoringResult<BranchMergeJob> {
        if let Some(review_id) = &request.review_id {
            self.check_branch_review(review_id, &request.source, &request.target)?;
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AuthoringError::Task(e.to_string()))?;

        let job = BranchMergeJob::new(&request.source, &request.target);
        self.jobs.insert(job.clone());

        let service = Arc::clone(self);
        let job_id = job.id.clone();
        runtime.spawn_blocking(move || {
            service.jobs.update(&job_id, BranchMergeJob::start);
            match service.merge_branch_sync(&request.source, &request.target, None) {
                Ok(()) => {
                    service.jobs.update(&job_id, BranchMergeJob::complete);
                }
                Err(err) => {
                    error!("Failed to merge branch {} -> {}: {}", request.source, request.target, err);
                    service.jobs.update(&job_id, |job| job.fail(err.to_string()));
                }
            }
        });
        Ok(job)
    }

    /// Looks up a merge job.
    pub fn get_branch_merge_job(&self, id: &str) -> AuthoringResult<BranchMergeJob> {
        self.jobs
            .get(id)
            .ok_or_else(|| AuthoringError::NotFound("Branch merge job not found.".to_string()))
    }

    /// Waits for a merge job to finish.
    pub async fn wait_for_merge_job(&self, id: &str) -> AuthoringResult<BranchMergeJob> {
        self.jobs
            .wait(id)
            .await
            .ok_or_else(|| AuthoringError::NotFound("Branch merge job not found.".to_string()))
    }

    fn check_branch_review(&self, review_id: &str, source: &str, target: &str) -> AuthoringResult<()> {
        let review = self
            .reviews
            .get_branch_review(review_id)?
            .ok_or_else(|| AuthoringError::NotFound(format!("Branch review {review_id} not found.")))?;
        if review.source.path != source || review.target.path != target {
            return Err(AuthoringError::Validation(
                "The source and target branches of the specified branch review do not match the source and target branches of this merge."
                    .to_string(),
            ));
        }
        if review.status != ReviewStatus::Current {
            return Err(AuthoringError::State(
                "The specified branch review is not in CURRENT status.".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::IdentifierService;
    use crate::semantic::SemanticIndexService;
    use crate::jobs::JobStatus;
    use snomed_store::MAIN;
    use snomed_types::{well_known, Form, SctId};

    const ROOT: SctId = well_known::SNOMED_CT_ROOT;

    struct Fixture {
        store: VersionedStore,
        concepts: Arc<ConceptService>,
        merge: Arc<BranchMergeService>,
        reviews: Arc<BranchReviewService>,
        semantic: Arc<SemanticIndexService>,
    }

    fn make_fixture() -> Fixture {
        let store = VersionedStore::default();
        store.create_branch(MAIN).unwrap();
        let config = AuthoringConfig::default();
        let semantic = Arc::new(SemanticIndexService::new(store.clone(), config.clone()));
        store.register_commit_listener(&semantic);
        let identifiers = IdentifierService::new(store.clone(), &config);
        let concepts = Arc::new(ConceptService::new(store.clone(), identifiers, config.clone()));
        let reviews = Arc::new(BranchReviewService::new(store.clone(), concepts.clone(), config.clone()));
        let merge = Arc::new(BranchMergeService::new(
            store.clone(),
            concepts.clone(),
            reviews.clone(),
            config,
        ));
        concepts
            .create(Concept::new(ROOT).with_description(Description::new("SNOMED CT Concept").fsn()), MAIN)
            .unwrap();
        Fixture {
            store,
            concepts,
            merge,
            reviews,
            semantic,
        }
    }

    fn make_child(term: &str) -> Concept {
        Concept::unidentified()
            .with_description(Description::new(term).fsn())
            .with_relationship(Relationship::is_a(ROOT))
    }

    fn state_message(result: AuthoringResult<()>) -> String {
        match result {
            Err(AuthoringError::State(message)) => message,
            other => panic!("expected a state error, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_preconditions() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        f.store.create_branch("MAIN/B").unwrap();

        assert_eq!(
            state_message(f.merge.merge_branch_sync("MAIN/A", "MAIN/B", None)),
            "The source or target branch must be the direct parent of the other."
        );
        assert_eq!(
            state_message(f.merge.merge_branch_sync(MAIN, "MAIN/A", None)),
            "This rebase is not meaningful, the child branch already has the parent's changes."
        );
        assert_eq!(
            state_message(f.merge.merge_branch_sync("MAIN/A", MAIN, None)),
            "This promotion is not meaningful, the child branch does not have any unpromoted changes."
        );

        f.concepts.create(make_child("Finding"), "MAIN/A").unwrap();
        f.concepts.create(make_child("Disorder"), MAIN).unwrap();
        assert_eq!(
            state_message(f.merge.merge_branch_sync("MAIN/A", MAIN, None)),
            "Child branch must be rebased before promoted."
        );
        assert_eq!(state_message(f.merge.merge_branch_sync(MAIN, "MAIN/A", None)), USE_BRANCH_REVIEW);
    }

    #[test]
    fn test_rebase_brings_parent_content_and_index() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        let disease = f.concepts.create(make_child("Disease (disorder)"), MAIN).unwrap();

        assert!(!f.concepts.exists(disease.id(), "MAIN/A").unwrap());
        f.merge.merge_branch_sync(MAIN, "MAIN/A", None).unwrap();

        assert!(f.concepts.exists(disease.id(), "MAIN/A").unwrap());
        let main_head = f.store.find_branch(MAIN).unwrap().head;
        assert_eq!(f.store.find_branch("MAIN/A").unwrap().base, main_head);
        assert_eq!(
            f.semantic.find_ancestor_ids(disease.id(), "MAIN/A", Form::Stated).unwrap(),
            BTreeSet::from([ROOT])
        );
    }

    #[test]
    fn test_promotion_moves_content_and_index() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        let disease = f.concepts.create(make_child("Disease (disorder)"), "MAIN/A").unwrap();
        let mut child = make_child("Diabetes mellitus (disorder)");
        child.relationships = vec![Relationship::is_a(disease.id())];
        let diabetes = f.concepts.create(child, "MAIN/A").unwrap();
        let on_task = f.concepts.find(diabetes.id(), "MAIN/A").unwrap().unwrap();

        f.merge.merge_branch_sync("MAIN/A", MAIN, None).unwrap();

        let on_main = f.concepts.find(diabetes.id(), MAIN).unwrap().unwrap();
        assert_eq!(on_main, on_task);
        assert_eq!(on_main.descriptions.len(), 1);
        assert_eq!(
            f.semantic.find_ancestor_ids(diabetes.id(), MAIN, Form::Stated).unwrap(),
            BTreeSet::from([disease.id(), ROOT])
        );

        let branch = f.store.find_branch("MAIN/A").unwrap();
        assert!(!branch.contains_content);
        assert_eq!(branch.last_promotion, Some(branch.head));
        assert_eq!(branch.base, f.store.find_branch(MAIN).unwrap().head);
        let changes = f.store.changes_on_branch_criteria("MAIN/A");
        assert_eq!(f.store.count::<Concept>(&changes), 0);
        assert!(f.concepts.exists(diabetes.id(), "MAIN/A").unwrap());
    }

    #[test]
    fn test_promoted_edit_replaces_parent_version() {
        let f = make_fixture();
        let concept = f.concepts.create(make_child("Cough (finding)"), MAIN).unwrap();
        f.store.create_branch("MAIN/A").unwrap();

        let mut edited = f.concepts.find(concept.id(), "MAIN/A").unwrap().unwrap();
        edited.descriptions[0].term = "Coughing (finding)".to_string();
        f.concepts.update(edited, "MAIN/A").unwrap();
        f.merge.merge_branch_sync("MAIN/A", MAIN, None).unwrap();

        let criteria = f.store.branch_criteria(MAIN).unwrap();
        let visible: Vec<Description> = f
            .store
            .search_entities(&criteria, |d: &Description| d.concept_id == Some(concept.id()));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].term, "Coughing (finding)");
        assert!(f.store.find_branch(MAIN).unwrap().versions_replaced.is_empty());
    }

    #[test]
    fn test_diverged_rebase_with_manual_merge() {
        let f = make_fixture();
        let concept = f.concepts.create(make_child("Fever (finding)"), MAIN).unwrap();
        f.store.create_branch("MAIN/A").unwrap();

        let mut on_main = f.concepts.find(concept.id(), MAIN).unwrap().unwrap();
        on_main.module_id = well_known::SNOMED_CT_MODEL_COMPONENT_MODULE;
        f.concepts.update(on_main, MAIN).unwrap();
        let mut on_task = f.concepts.find(concept.id(), "MAIN/A").unwrap().unwrap();
        on_task.definition_status_id = snomed_types::DefinitionStatus::FULLY_DEFINED_ID;
        f.concepts.update(on_task.clone(), "MAIN/A").unwrap();

        on_task.module_id = well_known::SNOMED_CT_MODEL_COMPONENT_MODULE;
        f.merge
            .merge_branch_sync(MAIN, "MAIN/A", Some(vec![on_task]))
            .unwrap();

        let criteria = f.store.branch_criteria("MAIN/A").unwrap();
        let visible: Vec<Concept> = f
            .store
            .search_by_ids(&criteria, &[concept.id().to_string()])
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].module_id, well_known::SNOMED_CT_MODEL_COMPONENT_MODULE);
        assert!(!visible[0].is_primitive());
    }

    #[test]
    fn test_rebase_favours_parent_description() {
        let f = make_fixture();
        let concept = f.concepts.create(make_child("Rash (finding)"), MAIN).unwrap();
        f.store.create_branch("MAIN/A").unwrap();

        let mut on_main = f.concepts.find(concept.id(), MAIN).unwrap().unwrap();
        on_main.descriptions[0].term = "Skin rash (finding)".to_string();
        f.concepts.update(on_main, MAIN).unwrap();
        let mut on_task = f.concepts.find(concept.id(), "MAIN/A").unwrap().unwrap();
        on_task.descriptions[0].term = "Eruption (finding)".to_string();
        f.concepts.update(on_task, "MAIN/A").unwrap();

        f.merge.merge_branch_sync(MAIN, "MAIN/A", Some(Vec::new())).unwrap();

        let criteria = f.store.branch_criteria("MAIN/A").unwrap();
        let visible: Vec<Description> = f
            .store
            .search_entities(&criteria, |d: &Description| d.concept_id == Some(concept.id()));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].term, "Skin rash (finding)");
    }

    #[test]
    fn test_manual_deletion_during_rebase() {
        let f = make_fixture();
        let concept = f.concepts.create(make_child("Itch (finding)"), MAIN).unwrap();
        f.store.create_branch("MAIN/A").unwrap();
        f.concepts.create(make_child("Pain (finding)"), MAIN).unwrap();

        let mut deletion = Concept::new(concept.id());
        deletion.deleted = true;
        f.merge
            .merge_branch_sync(MAIN, "MAIN/A", Some(vec![deletion]))
            .unwrap();
        assert!(!f.concepts.exists(concept.id(), "MAIN/A").unwrap());
        assert!(f.concepts.exists(concept.id(), MAIN).unwrap());
    }

    #[test]
    fn test_failed_promotion_leaves_branches_unlocked() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        f.concepts.create(make_child("Burn (disorder)"), "MAIN/A").unwrap();
        let _hold = f.store.open_commit(MAIN).unwrap();

        let result = f.merge.merge_branch_sync("MAIN/A", MAIN, None);
        assert!(matches!(result, Err(AuthoringError::Store(_))));
        assert!(!f.store.find_branch("MAIN/A").unwrap().locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_merge_runs_to_completion() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        f.concepts.create(make_child("Wheeze (finding)"), "MAIN/A").unwrap();

        let job = f.merge.merge_branch_async(MergeRequest::new("MAIN/A", MAIN)).unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        let finished = f.merge.wait_for_merge_job(&job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(finished.end_date.is_some());

        let again = f.merge.merge_branch_async(MergeRequest::new("MAIN/A", MAIN)).unwrap();
        let failed = f.merge.wait_for_merge_job(&again.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.message.as_deref(),
            Some("This promotion is not meaningful, the child branch does not have any unpromoted changes.")
        );

        let err = f.merge.get_branch_merge_job("missing").unwrap_err();
        assert_eq!(err.to_string(), "Branch merge job not found.");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_review_gate() {
        let f = make_fixture();
        f.store.create_branch("MAIN/A").unwrap();
        f.concepts.create(make_child("Ache (finding)"), "MAIN/A").unwrap();
        let review = f.reviews.get_create_review("MAIN/A", MAIN).unwrap();

        let mut request = MergeRequest::new(MAIN, "MAIN/A");
        request.review_id = Some(review.id.clone());
        let err = f.merge.merge_branch_async(request).unwrap_err();
        assert!(matches!(err, AuthoringError::Validation(_)));

        f.concepts.create(make_child("Sore (finding)"), "MAIN/A").unwrap();
        let mut request = MergeRequest::new("MAIN/A", MAIN);
        request.review_id = Some(review.id);
        let err = f.merge.merge_branch_async(request).unwrap_err();
        assert_eq!(err.to_string(), "The specified branch review is not in CURRENT status.");
    }
}
