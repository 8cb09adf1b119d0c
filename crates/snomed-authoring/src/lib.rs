//! # snomed-authoring
//!
//! Authoring engines on top of the branch-versioned store.
//!
//! - [`ConceptService`] saves concepts with their descriptions, relationships
//!   and language members, writing only what changed and keeping release
//!   metadata in step.
//! - [`BranchMergeService`] rebases a child onto its parent and promotes a
//!   child into its parent, synchronously or as a background job.
//! - [`BranchReviewService`] reports the concepts changed on one branch
//!   relative to another and runs merge reviews that resolve conflicts
//!   before a rebase.
//! - [`SemanticIndexService`] keeps the stated and inferred transitive
//!   closure of every concept up to date as a commit listener.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use snomed_authoring::{AuthoringConfig, ConceptService, IdentifierService, SemanticIndexService};
//! use snomed_store::{VersionedStore, MAIN};
//! use snomed_types::{well_known, Concept, Description, Form, Relationship};
//!
//! let store = VersionedStore::default();
//! store.create_branch(MAIN).unwrap();
//! let config = AuthoringConfig::default();
//! let semantic = Arc::new(SemanticIndexService::new(store.clone(), config.clone()));
//! store.register_commit_listener(&semantic);
//!
//! let identifiers = IdentifierService::new(store.clone(), &config);
//! let concepts = ConceptService::new(store.clone(), identifiers, config);
//! concepts
//!     .create(Concept::new(well_known::SNOMED_CT_ROOT), MAIN)
//!     .unwrap();
//! let finding = concepts
//!     .create(
//!         Concept::unidentified()
//!             .with_description(Description::new("Clinical finding (finding)").fsn())
//!             .with_relationship(Relationship::is_a(well_known::SNOMED_CT_ROOT)),
//!         MAIN,
//!     )
//!     .unwrap();
//!
//! let ancestors = semantic.find_ancestor_ids(finding.id(), MAIN, Form::Stated).unwrap();
//! assert!(ancestors.contains(&well_known::SNOMED_CT_ROOT));
//! ```
//!
//! ## Features
//!
//! - `parallel` (default): promotes entity types concurrently with rayon.

mod admin;
mod concept_service;
mod config;
mod error;
mod identifier;
mod jobs;
mod merge;
pub mod review;
pub mod semantic;

pub use admin::{AdminService, DeletionSummary};
pub use concept_service::{ComponentBatch, ConceptService};
pub use config::AuthoringConfig;
pub use error::{AuthoringError, AuthoringResult, ErrorCategory};
pub use identifier::{IdentifierService, IdentifierSource, SequentialIdentifierSource};
pub use jobs::{BranchMergeJob, JobStatus, JobStore};
pub use merge::{BranchMergeService, MergeRequest, USE_BRANCH_REVIEW};
pub use review::{
    BranchReview, BranchReviewService, BranchSnapshot, MergeReview, MergeReviewConceptVersions,
    ReviewChanges, ReviewStatus,
};
pub use semantic::{QueryConcept, SemanticIndexService};
