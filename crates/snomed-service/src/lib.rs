//! # snomed-service
//!
//! Terminology authoring server.
//!
//! [`TerminologyServer`] owns one versioned store and the authoring engines
//! that work on it. The semantic index service is registered as a commit
//! listener when the server is built, so every commit made through any of the
//! engines keeps the transitive closure up to date.

#![warn(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use snomed_authoring::{
    AdminService, AuthoringConfig, AuthoringError, BranchMergeService, BranchReviewService,
    ConceptService, IdentifierService, SemanticIndexService,
};
use snomed_store::{
    discover_rf2_files, import_snapshot, Branch, ImportSummary, Rf2Config, Rf2Error, StoreConfig,
    StoreError, VersionedStore, MAIN,
};
use snomed_types::Concept;
use thiserror::Error;
use tracing::info;

/// Errors raised by the server facade.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Authoring engine failure.
    #[error(transparent)]
    Authoring(#[from] AuthoringError),

    /// Versioned store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The release could not be read.
    #[error(transparent)]
    Rf2(#[from] Rf2Error),
}

/// Result type for server operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Overview of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummary {
    /// Branch path.
    pub path: String,
    /// Base timepoint in milliseconds.
    pub base: i64,
    /// Head timepoint in milliseconds.
    pub head: i64,
    /// Whether the branch has unpromoted changes.
    pub contains_content: bool,
    /// Whether a commit is open on the branch.
    pub locked: bool,
    /// Concepts visible on the branch.
    pub concepts: usize,
}

/// The store and every authoring engine, wired together.
#[derive(Debug, Clone)]
pub struct TerminologyServer {
    store: VersionedStore,
    config: AuthoringConfig,
    concepts: Arc<ConceptService>,
    semantic: Arc<SemanticIndexService>,
    reviews: Arc<BranchReviewService>,
    merge: Arc<BranchMergeService>,
    admin: AdminService,
}

impl TerminologyServer {
    /// Creates a server over an empty store.
    pub fn new(store_config: StoreConfig, config: AuthoringConfig) -> Self {
        Self::with_store(VersionedStore::new(store_config), config)
    }

    /// Creates a server configured from the `SNOMED_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(StoreConfig::from_env(), AuthoringConfig::from_env())
    }

    /// Creates a server over an existing store.
    pub fn with_store(store: VersionedStore, config: AuthoringConfig) -> Self {
        let semantic = Arc::new(SemanticIndexService::new(store.clone(), config.clone()));
        store.register_commit_listener(&semantic);

        let identifiers = IdentifierService::new(store.clone(), &config);
        let concepts = Arc::new(ConceptService::new(store.clone(), identifiers, config.clone()));
        let reviews = Arc::new(BranchReviewService::new(
            store.clone(),
            Arc::clone(&concepts),
            config.clone(),
        ));
        let merge = Arc::new(BranchMergeService::new(
            store.clone(),
            Arc::clone(&concepts),
            Arc::clone(&reviews),
            config.clone(),
        ));
        let admin = AdminService::new(store.clone(), &config);
        info!(
            "Terminology server ready, semantic indexing {}",
            if config.semantic_indexing_enabled { "enabled" } else { "disabled" }
        );

        Self {
            store,
            config,
            concepts,
            semantic,
            reviews,
            merge,
            admin,
        }
    }

    /// The versioned store.
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Authoring configuration.
    pub fn config(&self) -> &AuthoringConfig {
        &self.config
    }

    /// Concept reads and writes.
    pub fn concepts(&self) -> &Arc<ConceptService> {
        &self.concepts
    }

    /// Semantic index queries and rebuilds.
    pub fn semantic(&self) -> &Arc<SemanticIndexService> {
        &self.semantic
    }

    /// Branch and merge reviews.
    pub fn reviews(&self) -> &Arc<BranchReviewService> {
        &self.reviews
    }

    /// Rebase and promotion.
    pub fn merge(&self) -> &Arc<BranchMergeService> {
        &self.merge
    }

    /// Store maintenance.
    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    /// Returns `MAIN`, creating it on first use.
    pub fn ensure_main(&self) -> ServiceResult<Branch> {
        match self.store.find_branch_optional(MAIN) {
            Some(branch) => Ok(branch),
            None => Ok(self.store.create_branch(MAIN)?),
        }
    }

    /// Creates a branch under an existing parent.
    pub fn create_branch(&self, path: &str) -> ServiceResult<Branch> {
        Ok(self.store.create_branch(path)?)
    }

    /// Imports an RF2 snapshot release into `MAIN` in one commit.
    pub fn import_release(&self, release_path: impl AsRef<Path>, rf2: &Rf2Config) -> ServiceResult<ImportSummary> {
        let files = discover_rf2_files(release_path)?;
        self.ensure_main()?;
        Ok(import_snapshot(&self.store, &files, MAIN, rf2)?)
    }

    /// Current state of a branch.
    pub fn branch_summary(&self, path: &str) -> ServiceResult<BranchSummary> {
        let branch = self.store.find_branch(path)?;
        let criteria = self.store.branch_criteria(path)?;
        Ok(BranchSummary {
            path: branch.path,
            base: branch.base.millis(),
            head: branch.head.millis(),
            contains_content: branch.contains_content,
            locked: branch.locked,
            concepts: self.store.count::<Concept>(&criteria),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snomed_types::{well_known, Description, Form, Relationship};
    use std::collections::BTreeSet;
    use std::fs;

    fn make_server() -> TerminologyServer {
        let server = TerminologyServer::new(StoreConfig::default(), AuthoringConfig::default());
        server.ensure_main().unwrap();
        server
    }

    fn make_release(root: &Path) {
        let terminology = root.join("Snapshot").join("Terminology");
        fs::create_dir_all(&terminology).unwrap();
        fs::write(
            terminology.join("sct2_Concept_Snapshot_INT_20250101.txt"),
            "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n\
             138875005\t20020131\t1\t900000000000207008\t900000000000074008\n\
             404684003\t20020131\t1\t900000000000207008\t900000000000074008\n",
        )
        .unwrap();
        fs::write(
            terminology.join("sct2_Description_Snapshot-en_INT_20250101.txt"),
            "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId\n\
             754807018\t20020131\t1\t900000000000207008\t404684003\ten\t900000000000003001\tClinical finding (finding)\t900000000000448009\n",
        )
        .unwrap();
        fs::write(
            terminology.join("sct2_StatedRelationship_Snapshot_INT_20250101.txt"),
            "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId\n\
             3187444026\t20020131\t1\t900000000000207008\t404684003\t138875005\t0\t116680003\t900000000000010007\t900000000000451002\n",
        )
        .unwrap();
    }

    #[test]
    fn test_import_release_builds_semantic_index() {
        let dir = tempfile::tempdir().unwrap();
        make_release(dir.path());
        let server = make_server();

        let summary = server.import_release(dir.path(), &Rf2Config::default()).unwrap();
        assert_eq!(summary.concepts, 2);
        assert_eq!(
            server.semantic().find_ancestor_ids(404684003, MAIN, Form::Stated).unwrap(),
            BTreeSet::from([well_known::SNOMED_CT_ROOT])
        );
        assert_eq!(server.branch_summary(MAIN).unwrap().concepts, 2);
    }

    #[test]
    fn test_import_release_missing_directory() {
        let server = make_server();
        let err = server
            .import_release("/nonexistent/release", &Rf2Config::default())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rf2(_)));
    }

    #[test]
    fn test_task_round_trip() {
        let server = make_server();
        server
            .concepts()
            .create(Concept::new(well_known::SNOMED_CT_ROOT), MAIN)
            .unwrap();
        server.create_branch("MAIN/TASK-1").unwrap();
        let finding = server
            .concepts()
            .create(
                Concept::unidentified()
                    .with_description(Description::new("Clinical finding (finding)").fsn())
                    .with_relationship(Relationship::is_a(well_known::SNOMED_CT_ROOT)),
                "MAIN/TASK-1",
            )
            .unwrap();

        let task = server.branch_summary("MAIN/TASK-1").unwrap();
        assert!(task.contains_content);
        assert_eq!(task.concepts, 2);

        server.merge().merge_branch_sync("MAIN/TASK-1", MAIN, None).unwrap();
        assert!(server.concepts().exists(finding.id(), MAIN).unwrap());
        assert!(server
            .semantic()
            .find_ancestor_ids(finding.id(), MAIN, Form::Stated)
            .unwrap()
            .contains(&well_known::SNOMED_CT_ROOT));

        let json = serde_json::to_string(&server.branch_summary(MAIN).unwrap()).unwrap();
        assert!(json.contains("\"containsContent\":false"));
    }
}
