//! # snomed-store
//!
//! Branch-versioned document store for SNOMED CT authoring.
//!
//! Documents are written as versions stamped with the commit timepoint and
//! the branch path they were written on. A branch sees its own versions plus
//! those of its ancestors as of its base timepoint, minus the ancestor
//! versions it has replaced. Rebase moves the base forward; promotion moves a
//! child's versions onto the parent.
//!
//! ## Example
//!
//! ```
//! use snomed_store::VersionedStore;
//! use snomed_types::Concept;
//!
//! let store = VersionedStore::default();
//! store.create_branch("MAIN").unwrap();
//! store.create_branch("MAIN/PROJECT").unwrap();
//!
//! let mut concept = Concept::new(73211009);
//! concept.changed = true;
//!
//! let commit = store.open_commit("MAIN/PROJECT").unwrap();
//! store.save_batch(&commit, &[concept]).unwrap();
//! commit.complete().unwrap();
//!
//! let criteria = store.branch_criteria("MAIN/PROJECT").unwrap();
//! let found: Vec<Concept> = store.search_entities(&criteria, |_| true);
//! assert_eq!(found.len(), 1);
//! ```
//!
//! ## Features
//!
//! - `parallel` (default): reads RF2 files concurrently with rayon.

pub mod branch;
mod commit;
pub mod criteria;
mod entities;
mod entity;
pub mod rf2;
mod store;
mod table;
pub mod types;

pub use branch::{is_direct_child, parent_path, Branch, BranchState, Timepoint, MAIN};
pub use commit::{Commit, CommitListener, CommitType};
pub use criteria::{BranchCriteria, PathClause};
pub use entities::kind_name;
pub use entity::{DomainEntity, Version};
pub use rf2::{discover_rf2_files, import_snapshot, ImportSummary, Rf2Files};
pub use store::VersionedStore;
pub use types::{Rf2Config, Rf2Error, Rf2Result, StoreConfig, StoreError, StoreResult};
