//! Commits and commit listeners.
//!
//! A commit holds its branch locked from the moment it is opened. It is
//! published by [`Commit::complete`]; a commit dropped before that, or one
//! whose listeners fail, is rolled back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::branch::{Branch, Timepoint};
use crate::store::VersionedStore;
use crate::types::StoreResult;

/// What a commit does to its branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    /// Authoring changes.
    Content,
    /// Pulls the parent's head into the branch.
    Rebase,
    /// Pushes a child's changes into the branch.
    Promotion,
}

/// Hook run before a commit is published.
///
/// Listeners may write to the store through the commit. An error aborts the
/// commit and everything written at its timepoint is rolled back.
pub trait CommitListener: Send + Sync {
    /// Called with the commit still open.
    fn pre_commit_completion(&self, commit: &Commit) -> StoreResult<()>;
}

/// An open commit on a branch.
pub struct Commit {
    store: VersionedStore,
    branch: Branch,
    timepoint: Timepoint,
    commit_type: CommitType,
    source_branch_path: Option<String>,
    versions_replaced: Mutex<BTreeMap<String, BTreeSet<u64>>>,
    replaced_resets: Mutex<BTreeSet<String>>,
    completed: AtomicBool,
}

impl Commit {
    pub(crate) fn new(
        store: VersionedStore,
        branch: Branch,
        timepoint: Timepoint,
        commit_type: CommitType,
        source_branch_path: Option<String>,
    ) -> Self {
        Self {
            store,
            branch,
            timepoint,
            commit_type,
            source_branch_path,
            versions_replaced: Mutex::new(BTreeMap::new()),
            replaced_resets: Mutex::new(BTreeSet::new()),
            completed: AtomicBool::new(false),
        }
    }

    /// The branch being committed to, as seen by this commit.
    ///
    /// For a rebase the base is already moved to the parent's head.
    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    /// Timepoint of the commit.
    pub fn timepoint(&self) -> Timepoint {
        self.timepoint
    }

    /// Commit type.
    pub fn commit_type(&self) -> CommitType {
        self.commit_type
    }

    /// Whether this is a rebase.
    pub fn is_rebase(&self) -> bool {
        self.commit_type == CommitType::Rebase
    }

    /// Child branch being promoted, for promotion commits.
    pub fn source_branch_path(&self) -> Option<&str> {
        self.source_branch_path.as_deref()
    }

    /// Store the commit writes to.
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Records ancestor versions hidden by this commit.
    pub fn add_versions_replaced(&self, kind: &str, internal_ids: impl IntoIterator<Item = u64>) {
        self.versions_replaced
            .lock()
            .entry(kind.to_string())
            .or_default()
            .extend(internal_ids);
    }

    /// Forgets replaced versions, e.g. ones ended on this branch by a promotion.
    pub fn remove_versions_replaced(&self, kind: &str, internal_ids: &BTreeSet<u64>) {
        if let Some(set) = self.versions_replaced.lock().get_mut(kind) {
            set.retain(|id| !internal_ids.contains(id));
        }
    }

    /// Versions of one type replaced by this commit so far.
    pub fn versions_replaced(&self, kind: &str) -> BTreeSet<u64> {
        self.versions_replaced
            .lock()
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Versions replaced by this commit so far, by type.
    pub fn entity_versions_replaced(&self) -> BTreeMap<String, BTreeSet<u64>> {
        self.versions_replaced.lock().clone()
    }

    /// Drops the branch's replaced set for one type when the commit is
    /// published, keeping only what this commit records.
    pub fn reset_versions_replaced(&self, kind: &str) {
        self.replaced_resets.lock().insert(kind.to_string());
        self.versions_replaced.lock().remove(kind);
    }

    /// Types whose branch replaced set is being reset.
    pub fn replaced_resets(&self) -> BTreeSet<String> {
        self.replaced_resets.lock().clone()
    }

    /// Replaced set the branch will carry after this commit, by type.
    pub fn merged_versions_replaced(&self) -> BTreeMap<String, BTreeSet<u64>> {
        let resets = self.replaced_resets();
        let mut merged: BTreeMap<String, BTreeSet<u64>> = self
            .branch
            .versions_replaced
            .iter()
            .filter(|(kind, _)| !resets.contains(*kind))
            .map(|(kind, ids)| (kind.clone(), ids.clone()))
            .collect();
        for (kind, ids) in self.entity_versions_replaced() {
            merged.entry(kind).or_default().extend(ids);
        }
        merged.retain(|_, ids| !ids.is_empty());
        merged
    }

    /// Runs the listeners and publishes the commit.
    pub fn complete(self) -> StoreResult<()> {
        let store = self.store.clone();
        store.complete_commit(&self)?;
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("path", &self.branch.path)
            .field("timepoint", &self.timepoint)
            .field("commit_type", &self.commit_type)
            .field("source_branch_path", &self.source_branch_path)
            .finish()
    }
}

impl Drop for Commit {
    fn drop(&mut self) {
        if !self.is_completed() {
            self.store.rollback_commit(self);
        }
    }
}
