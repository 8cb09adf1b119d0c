//! Branch-versioned in-memory document store.
//!
//! Every write happens inside a [`Commit`] on one branch and is stamped with
//! the commit's timepoint. Reads go through a [`BranchCriteria`] that picks
//! the versions a branch sees:
//!
//! ```ignore
//! let store = VersionedStore::new(StoreConfig::default());
//! store.create_branch("MAIN")?;
//!
//! let commit = store.open_commit("MAIN")?;
//! store.save_batch(&commit, &concepts)?;
//! commit.complete()?;
//!
//! let criteria = store.branch_criteria("MAIN")?;
//! let found: Vec<Concept> = store.search_entities(&criteria, |_| true);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::branch::{is_direct_child, parent_path, Branch, BranchState, Timepoint};
use crate::commit::{Commit, CommitListener, CommitType};
use crate::criteria::{BranchCriteria, PathClause};
use crate::entity::{DomainEntity, Version};
use crate::table::{ErasedTable, Table};
use crate::types::{StoreConfig, StoreError, StoreResult};

/// Handle to the store. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct VersionedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    /// Branch versions by path, oldest first; the last one is current.
    branches: RwLock<BTreeMap<String, Vec<Branch>>>,
    tables: RwLock<HashMap<&'static str, Arc<dyn ErasedTable>>>,
    clock: Mutex<i64>,
    internal_ids: AtomicU64,
    listeners: RwLock<Vec<Weak<dyn CommitListener>>>,
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables: BTreeMap<&str, usize> = self
            .inner
            .tables
            .read()
            .iter()
            .map(|(kind, table)| (*kind, table.len()))
            .collect();
        f.debug_struct("VersionedStore")
            .field("branches", &self.inner.branches.read().len())
            .field("tables", &tables)
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl VersionedStore {
    /// Creates an empty store without branches.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                branches: RwLock::new(BTreeMap::new()),
                tables: RwLock::new(HashMap::new()),
                clock: Mutex::new(0),
                internal_ids: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn next_timepoint(&self) -> Timepoint {
        let mut last = self.inner.clock.lock();
        let now = Utc::now().timestamp_millis().max(*last + 1);
        *last = now;
        Timepoint::from_millis(now)
    }

    fn next_internal_id(&self) -> u64 {
        self.inner.internal_ids.fetch_add(1, Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Commit listeners
    // ═══════════════════════════════════════════════════════════════════════════

    /// Registers a listener run before every commit is published.
    ///
    /// The store keeps a weak reference; a dropped listener is skipped.
    pub fn register_commit_listener<L: CommitListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn CommitListener> = weak;
        self.inner.listeners.write().push(weak);
    }

    fn live_listeners(&self) -> Vec<Arc<dyn CommitListener>> {
        let mut listeners = self.inner.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Branches
    // ═══════════════════════════════════════════════════════════════════════════

    /// Creates a branch. Child branches start at their parent's head.
    pub fn create_branch(&self, path: &str) -> StoreResult<Branch> {
        let mut branches = self.inner.branches.write();
        if branches.contains_key(path) {
            return Err(StoreError::BranchExists {
                path: path.to_string(),
            });
        }
        let creation = self.next_timepoint();
        let branch = match parent_path(path) {
            None => Branch::new(path, creation, creation),
            Some(parent) => {
                let parent = current(&branches, parent).map_err(|_| StoreError::ParentNotFound {
                    path: path.to_string(),
                })?;
                Branch::new(path, parent.head, creation)
            }
        };
        branches.insert(path.to_string(), vec![branch.clone()]);
        info!("Created branch {}", path);
        Ok(branch)
    }

    /// Current version of a branch.
    pub fn find_branch(&self, path: &str) -> StoreResult<Branch> {
        current(&self.inner.branches.read(), path).cloned()
    }

    /// Current version of a branch, if it exists.
    pub fn find_branch_optional(&self, path: &str) -> Option<Branch> {
        self.find_branch(path).ok()
    }

    /// Version of a branch that was current at `timepoint`.
    pub fn find_branch_at_timepoint(&self, path: &str, timepoint: Timepoint) -> StoreResult<Branch> {
        version_at(&self.inner.branches.read(), path, timepoint).cloned()
    }

    /// Current versions of the direct children of a branch.
    pub fn find_children(&self, path: &str) -> Vec<Branch> {
        self.inner
            .branches
            .read()
            .iter()
            .filter(|(child, _)| is_direct_child(path, child))
            .filter_map(|(_, versions)| versions.last().cloned())
            .collect()
    }

    /// Paths of all branches.
    pub fn branch_paths(&self) -> Vec<String> {
        self.inner.branches.read().keys().cloned().collect()
    }

    /// Whether one of the branches is the direct parent of the other.
    pub fn branches_have_parent_child_relationship(&self, a: &Branch, b: &Branch) -> bool {
        is_direct_child(&a.path, &b.path) || is_direct_child(&b.path, &a.path)
    }

    /// State of a branch against the current head of its parent.
    pub fn branch_state(&self, path: &str) -> StoreResult<BranchState> {
        let branches = self.inner.branches.read();
        let branch = current(&branches, path)?;
        let parent = match branch.parent_path() {
            Some(parent) => Some(current(&branches, parent)?),
            None => None,
        };
        Ok(branch.state(parent))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Commits
    // ═══════════════════════════════════════════════════════════════════════════

    /// Opens a content commit, locking the branch.
    pub fn open_commit(&self, path: &str) -> StoreResult<Commit> {
        let mut branches = self.inner.branches.write();
        let branch = lock(&mut branches, path)?;
        let timepoint = self.next_timepoint();
        debug!("Opened commit on {} at {}", path, timepoint);
        Ok(Commit::new(self.clone(), branch, timepoint, CommitType::Content, None))
    }

    /// Opens a rebase commit; the commit's branch is based on the parent's head.
    pub fn open_rebase_commit(&self, path: &str) -> StoreResult<Commit> {
        let mut branches = self.inner.branches.write();
        let parent_head = match parent_path(path) {
            Some(parent) => current(&branches, parent)?.head,
            None => current(&branches, path)?.base,
        };
        let mut branch = lock(&mut branches, path)?;
        let previous_base = branch.base;
        branch.base = parent_head;
        let timepoint = self.next_timepoint();
        info!(
            "Opened rebase commit on {} at {}, base moves from {} to {}",
            path, timepoint, previous_base, parent_head
        );
        Ok(Commit::new(self.clone(), branch, timepoint, CommitType::Rebase, None))
    }

    /// Opens a promotion commit on `target`, locking both branches.
    ///
    /// The commit starts out with the source branch's replaced versions.
    pub fn open_promotion_commit(&self, target: &str, source: &str) -> StoreResult<Commit> {
        let mut branches = self.inner.branches.write();
        let source_branch = current(&branches, source)?.clone();
        if source_branch.locked {
            return Err(StoreError::BranchLocked {
                path: source.to_string(),
            });
        }
        let branch = lock(&mut branches, target)?;
        if let Some(versions) = branches.get_mut(source) {
            if let Some(current) = versions.last_mut() {
                current.locked = true;
            }
        }
        let timepoint = self.next_timepoint();
        info!("Opened promotion commit {} -> {} at {}", source, target, timepoint);
        let commit = Commit::new(
            self.clone(),
            branch,
            timepoint,
            CommitType::Promotion,
            Some(source.to_string()),
        );
        for (kind, ids) in &source_branch.versions_replaced {
            commit.add_versions_replaced(kind, ids.iter().copied());
        }
        Ok(commit)
    }

    pub(crate) fn complete_commit(&self, commit: &Commit) -> StoreResult<()> {
        for listener in self.live_listeners() {
            listener.pre_commit_completion(commit)?;
        }

        let timepoint = commit.timepoint();
        let path = commit.branch().path.clone();
        let replaced = commit.merged_versions_replaced();
        let mut branches = self.inner.branches.write();
        match commit.commit_type() {
            CommitType::Content => publish(&mut branches, &path, timepoint, |b| {
                b.head = timepoint;
                b.contains_content = true;
                b.versions_replaced = replaced;
            }),
            CommitType::Rebase => {
                let base = commit.branch().base;
                publish(&mut branches, &path, timepoint, |b| {
                    b.base = base;
                    b.head = timepoint;
                    b.versions_replaced = replaced;
                })
            }
            CommitType::Promotion => {
                publish(&mut branches, &path, timepoint, |b| {
                    b.head = timepoint;
                    b.contains_content = true;
                    b.versions_replaced = replaced;
                });
                if let Some(source) = commit.source_branch_path() {
                    publish(&mut branches, source, timepoint, |b| {
                        b.base = timepoint;
                        b.head = timepoint;
                        b.last_promotion = Some(timepoint);
                        b.contains_content = false;
                        b.versions_replaced.clear();
                    });
                }
            }
        }
        info!(
            "Completed {:?} commit on {} at {}",
            commit.commit_type(),
            path,
            timepoint
        );
        Ok(())
    }

    pub(crate) fn rollback_commit(&self, commit: &Commit) {
        let timepoint = commit.timepoint();
        let tables: Vec<Arc<dyn ErasedTable>> =
            self.inner.tables.read().values().cloned().collect();
        let mut affected = 0;
        for table in tables {
            affected += table.rollback(timepoint);
        }

        let mut branches = self.inner.branches.write();
        let mut paths = vec![commit.branch().path.as_str()];
        paths.extend(commit.source_branch_path());
        for path in paths {
            if let Some(current) = branches.get_mut(path).and_then(|v| v.last_mut()) {
                current.locked = false;
            }
        }
        warn!(
            "Rolled back commit on {} at {}, {} versions reverted",
            commit.branch().path,
            timepoint,
            affected
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Branch criteria
    // ═══════════════════════════════════════════════════════════════════════════

    /// What a branch sees at its head.
    pub fn branch_criteria(&self, path: &str) -> StoreResult<BranchCriteria> {
        let branches = self.inner.branches.read();
        let branch = current(&branches, path)?;
        visible(&branches, branch, branch.head, branch.all_versions_replaced())
    }

    /// What a branch saw at a past timepoint.
    pub fn branch_criteria_at_timepoint(&self, path: &str, timepoint: Timepoint) -> StoreResult<BranchCriteria> {
        let branches = self.inner.branches.read();
        let branch = version_at(&branches, path, timepoint)?;
        visible(&branches, branch, timepoint, branch.all_versions_replaced())
    }

    /// What a branch sees including the writes of an open commit.
    pub fn branch_criteria_including_open_commit(&self, commit: &Commit) -> StoreResult<BranchCriteria> {
        let branches = self.inner.branches.read();
        let excluded = commit
            .merged_versions_replaced()
            .into_values()
            .flatten()
            .collect();
        visible(&branches, commit.branch(), commit.timepoint(), excluded)
    }

    /// What the commit's branch saw before the commit was opened.
    pub fn branch_criteria_before_open_commit(&self, commit: &Commit) -> StoreResult<BranchCriteria> {
        self.branch_criteria(&commit.branch().path)
    }

    /// Versions written on a branch that are still current.
    pub fn changes_on_branch_criteria(&self, path: &str) -> BranchCriteria {
        BranchCriteria::ChangesOnBranch {
            path: path.to_string(),
        }
    }

    /// Versions started or ended by an open commit.
    pub fn changes_in_commit_criteria(&self, commit: &Commit) -> BranchCriteria {
        BranchCriteria::ChangesInCommit {
            path: commit.branch().path.clone(),
            timepoint: commit.timepoint(),
        }
    }

    /// Versions on a branch started or ended within `[start, end]`.
    pub fn updates_during_range_criteria(&self, path: &str, start: Timepoint, end: Timepoint) -> BranchCriteria {
        BranchCriteria::UpdatesDuringRange {
            path: path.to_string(),
            start,
            end,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    fn table<T: DomainEntity>(&self) -> Arc<Table<T>> {
        if let Some(table) = self.inner.tables.read().get(T::KIND) {
            if let Ok(table) = table.clone().as_any().downcast::<Table<T>>() {
                return table;
            }
        }
        let mut tables = self.inner.tables.write();
        if let Some(existing) = tables.get(T::KIND) {
            if let Ok(table) = existing.clone().as_any().downcast::<Table<T>>() {
                return table;
            }
            warn!("Replacing version table {} registered for another type", T::KIND);
        }
        let table = Arc::new(Table::<T>::new());
        tables.insert(T::KIND, table.clone());
        table
    }

    /// Versions matching the criteria and the filter.
    pub fn search<T, F>(&self, criteria: &BranchCriteria, filter: F) -> Vec<Version<T>>
    where
        T: DomainEntity,
        F: Fn(&T) -> bool,
    {
        self.table::<T>().search(criteria, filter)
    }

    /// Documents matching the criteria and the filter.
    pub fn search_entities<T, F>(&self, criteria: &BranchCriteria, filter: F) -> Vec<T>
    where
        T: DomainEntity,
        F: Fn(&T) -> bool,
    {
        self.search(criteria, filter)
            .into_iter()
            .map(Version::into_entity)
            .collect()
    }

    /// Versions of the given business ids matching the criteria.
    pub fn search_versions_by_ids<T: DomainEntity>(
        &self,
        criteria: &BranchCriteria,
        ids: &[String],
    ) -> StoreResult<Vec<Version<T>>> {
        let limit = self.inner.config.max_terms_per_query;
        if ids.len() > limit {
            return Err(StoreError::TooManyTerms {
                count: ids.len(),
                limit,
            });
        }
        Ok(self.table::<T>().search_by_ids(criteria, ids))
    }

    /// Documents with the given business ids matching the criteria.
    pub fn search_by_ids<T: DomainEntity>(&self, criteria: &BranchCriteria, ids: &[String]) -> StoreResult<Vec<T>> {
        Ok(self
            .search_versions_by_ids(criteria, ids)?
            .into_iter()
            .map(Version::into_entity)
            .collect())
    }

    /// Versions by internal id, on any branch.
    pub fn find_by_internal_ids<T: DomainEntity>(&self, internal_ids: &BTreeSet<u64>) -> Vec<Version<T>> {
        if internal_ids.is_empty() {
            return Vec::new();
        }
        self.table::<T>().find_by_internal_ids(internal_ids)
    }

    /// Whether any version of the id exists on any branch.
    pub fn id_exists<T: DomainEntity>(&self, id: &str) -> bool {
        self.table::<T>().contains_entity(id)
    }

    /// Number of versions matching the criteria.
    pub fn count<T: DomainEntity>(&self, criteria: &BranchCriteria) -> usize {
        self.search::<T, _>(criteria, |_| true).len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Persists the changed and deleted documents of a batch.
    ///
    /// Current versions on the commit's branch are ended (or dropped when
    /// written earlier by the same commit), ancestor versions the branch can
    /// see are added to the commit's replaced set, and a new version is
    /// written for every document not marked deleted.
    pub fn save_batch<T: DomainEntity>(&self, commit: &Commit, entities: &[T]) -> StoreResult<usize> {
        let to_save: Vec<&T> = entities
            .iter()
            .filter(|e| e.is_changed() || e.is_deleted())
            .collect();
        if to_save.is_empty() {
            return Ok(0);
        }
        let table = self.table::<T>();
        let path = commit.branch().path.clone();
        let timepoint = commit.timepoint();
        let ids: Vec<String> = to_save.iter().map(|e| e.entity_id()).collect();

        let ancestors = self.branch_criteria_including_open_commit(commit)?.ancestors_only();
        let hidden: Vec<u64> = table
            .search_by_ids(&ancestors, &ids)
            .into_iter()
            .map(|v| v.internal_id)
            .collect();
        if !hidden.is_empty() {
            debug!("{} {} versions replaced on {}", hidden.len(), T::KIND, path);
            commit.add_versions_replaced(T::KIND, hidden);
        }

        let ended = table.end_current_versions(&path, &ids, timepoint);
        let versions: Vec<Version<T>> = to_save
            .iter()
            .filter(|e| !e.is_deleted())
            .map(|e| Version {
                internal_id: self.next_internal_id(),
                path: path.clone(),
                start: timepoint,
                end: None,
                entity: e.stored_form(),
            })
            .collect();
        let written = versions.len();
        table.insert(versions);
        debug!(
            "Saved {} {} on {} ({} previous versions ended)",
            written,
            T::KIND,
            path,
            ended
        );
        Ok(written)
    }

    /// Ends versions on the commit's branch listed in `internal_ids` and drops
    /// them from the commit's replaced set.
    ///
    /// First phase of a promotion: the child replaced these parent versions.
    pub fn end_versions_replaced_on_path<T: DomainEntity>(
        &self,
        commit: &Commit,
        internal_ids: &BTreeSet<u64>,
    ) -> usize {
        let on_path = self.table::<T>().end_internal_ids_on_path(
            &commit.branch().path,
            internal_ids,
            commit.timepoint(),
        );
        commit.remove_versions_replaced(T::KIND, &on_path);
        on_path.len()
    }

    /// Ends every current version on `source_path` and returns the documents
    /// marked changed, ready to be saved on the commit's branch.
    ///
    /// Second phase of a promotion.
    pub fn end_changes_on_branch<T: DomainEntity>(&self, commit: &Commit, source_path: &str) -> Vec<T> {
        let criteria = self.changes_on_branch_criteria(source_path);
        self.table::<T>()
            .end_matching(&criteria, commit.timepoint())
            .into_iter()
            .map(|v| {
                let mut entity = v.entity;
                entity.set_changed(true);
                entity
            })
            .collect()
    }

    /// Ends the current versions of the ids on the commit's own branch, so
    /// ancestor versions become visible again.
    pub fn end_versions_on_this_branch<T: DomainEntity>(&self, commit: &Commit, ids: &[String]) -> usize {
        self.table::<T>()
            .end_current_versions(&commit.branch().path, ids, commit.timepoint())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tooling
    // ═══════════════════════════════════════════════════════════════════════════

    /// Names of the version tables created so far.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self
            .inner
            .tables
            .read()
            .values()
            .map(|t| t.kind())
            .collect();
        kinds.sort_unstable();
        kinds
    }

    /// Number of stored versions of one type, across branches.
    pub fn table_size(&self, kind: &str) -> usize {
        self.inner.tables.read().get(kind).map_or(0, |t| t.len())
    }

    /// Physically removes up to `limit` versions of one type.
    pub fn delete_chunk(&self, kind: &str, limit: usize) -> usize {
        let table = self.inner.tables.read().get(kind).cloned();
        table.map_or(0, |t| t.delete_chunk(limit))
    }
}

fn current<'a>(branches: &'a BTreeMap<String, Vec<Branch>>, path: &str) -> StoreResult<&'a Branch> {
    branches
        .get(path)
        .and_then(|versions| versions.last())
        .ok_or_else(|| StoreError::BranchNotFound {
            path: path.to_string(),
        })
}

fn version_at<'a>(
    branches: &'a BTreeMap<String, Vec<Branch>>,
    path: &str,
    timepoint: Timepoint,
) -> StoreResult<&'a Branch> {
    branches
        .get(path)
        .and_then(|versions| versions.iter().rev().find(|b| b.visible_at(timepoint)))
        .ok_or_else(|| StoreError::BranchNotFound {
            path: format!("{}@{}", path, timepoint.millis()),
        })
}

fn lock(branches: &mut BTreeMap<String, Vec<Branch>>, path: &str) -> StoreResult<Branch> {
    let branch = branches
        .get_mut(path)
        .and_then(|versions| versions.last_mut())
        .ok_or_else(|| StoreError::BranchNotFound {
            path: path.to_string(),
        })?;
    if branch.locked {
        return Err(StoreError::BranchLocked {
            path: path.to_string(),
        });
    }
    branch.locked = true;
    Ok(branch.clone())
}

fn publish<F>(branches: &mut BTreeMap<String, Vec<Branch>>, path: &str, timepoint: Timepoint, update: F)
where
    F: FnOnce(&mut Branch),
{
    let Some(versions) = branches.get_mut(path) else {
        return;
    };
    let Some(current) = versions.last_mut() else {
        return;
    };
    current.end = Some(timepoint);
    current.locked = false;
    let mut next = current.clone();
    next.start = timepoint;
    next.end = None;
    update(&mut next);
    versions.push(next);
}

fn visible(
    branches: &BTreeMap<String, Vec<Branch>>,
    branch: &Branch,
    timepoint: Timepoint,
    mut excluded: BTreeSet<u64>,
) -> StoreResult<BranchCriteria> {
    let mut clauses = vec![PathClause {
        path: branch.path.clone(),
        timepoint,
        excluded: BTreeSet::new(),
    }];
    let mut child = branch;
    while let Some(parent) = child.parent_path() {
        let parent_version = version_at(branches, parent, child.base)?;
        clauses.push(PathClause {
            path: parent.to_string(),
            timepoint: child.base,
            excluded: excluded.clone(),
        });
        excluded.extend(parent_version.all_versions_replaced());
        child = parent_version;
    }
    Ok(BranchCriteria::Visible(clauses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use snomed_types::Concept;

    fn make_concept(id: u64, module_id: u64) -> Concept {
        let mut concept = Concept::new(id);
        concept.module_id = module_id;
        concept.changed = true;
        concept
    }

    fn make_store() -> VersionedStore {
        let store = VersionedStore::default();
        store.create_branch("MAIN").unwrap();
        store
    }

    fn visible_modules(store: &VersionedStore, path: &str) -> Vec<(u64, u64)> {
        let criteria = store.branch_criteria(path).unwrap();
        let mut found: Vec<(u64, u64)> = store
            .search_entities::<Concept, _>(&criteria, |_| true)
            .into_iter()
            .map(|c| (c.id(), c.module_id))
            .collect();
        found.sort_unstable();
        found
    }

    #[test]
    fn test_child_sees_parent_content_at_base() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();

        store.create_branch("MAIN/A").unwrap();

        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(200, 1)]).unwrap();
        commit.complete().unwrap();

        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 1), (200, 1)]);
        assert_eq!(visible_modules(&store, "MAIN/A"), vec![(100, 1)]);
        assert_eq!(store.branch_state("MAIN/A").unwrap(), BranchState::Behind);
    }

    #[test]
    fn test_child_edit_replaces_parent_version() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        store.create_branch("MAIN/A").unwrap();

        let commit = store.open_commit("MAIN/A").unwrap();
        store.save_batch(&commit, &[make_concept(100, 2)]).unwrap();
        commit.complete().unwrap();

        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 1)]);
        assert_eq!(visible_modules(&store, "MAIN/A"), vec![(100, 2)]);
        let branch = store.find_branch("MAIN/A").unwrap();
        assert_eq!(branch.versions_replaced_for("Concept").len(), 1);
        assert_eq!(store.branch_state("MAIN/A").unwrap(), BranchState::Forward);
    }

    #[test]
    fn test_deleted_entity_has_no_current_version() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();

        let mut deleted = make_concept(100, 1);
        deleted.deleted = true;
        let commit = store.open_commit("MAIN").unwrap();
        assert_eq!(store.save_batch(&commit, &[deleted]).unwrap(), 0);
        commit.complete().unwrap();

        assert!(visible_modules(&store, "MAIN").is_empty());
        assert!(store.id_exists::<Concept>("100"));
    }

    #[test]
    fn test_dropped_commit_rolls_back() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        let head = store.find_branch("MAIN").unwrap().head;

        {
            let commit = store.open_commit("MAIN").unwrap();
            store.save_batch(&commit, &[make_concept(100, 2), make_concept(300, 2)]).unwrap();
            assert!(matches!(
                store.open_commit("MAIN"),
                Err(StoreError::BranchLocked { .. })
            ));
        }

        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 1)]);
        let branch = store.find_branch("MAIN").unwrap();
        assert_eq!(branch.head, head);
        assert!(!branch.locked);
    }

    #[test]
    fn test_rewrite_within_commit_keeps_one_version() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        store.save_batch(&commit, &[make_concept(100, 2)]).unwrap();
        commit.complete().unwrap();

        assert_eq!(store.table_size("Concept"), 1);
        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 2)]);
    }

    #[test]
    fn test_rebase_moves_base_and_keeps_own_versions() {
        let store = make_store();
        store.create_branch("MAIN/A").unwrap();
        let commit = store.open_commit("MAIN/A").unwrap();
        store.save_batch(&commit, &[make_concept(100, 2)]).unwrap();
        commit.complete().unwrap();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(200, 1)]).unwrap();
        commit.complete().unwrap();
        assert_eq!(store.branch_state("MAIN/A").unwrap(), BranchState::Diverged);

        let commit = store.open_rebase_commit("MAIN/A").unwrap();
        commit.complete().unwrap();

        assert_eq!(store.branch_state("MAIN/A").unwrap(), BranchState::Forward);
        assert_eq!(visible_modules(&store, "MAIN/A"), vec![(100, 2), (200, 1)]);
    }

    #[test]
    fn test_promotion_phases() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        store.create_branch("MAIN/A").unwrap();
        let commit = store.open_commit("MAIN/A").unwrap();
        store.save_batch(&commit, &[make_concept(100, 2), make_concept(200, 2)]).unwrap();
        commit.complete().unwrap();

        let commit = store.open_promotion_commit("MAIN", "MAIN/A").unwrap();
        let replaced = commit.versions_replaced("Concept");
        assert_eq!(store.end_versions_replaced_on_path::<Concept>(&commit, &replaced), 1);
        assert!(commit.versions_replaced("Concept").is_empty());
        let promoted: Vec<Concept> = store.end_changes_on_branch(&commit, "MAIN/A");
        assert_eq!(promoted.len(), 2);
        store.save_batch(&commit, &promoted).unwrap();
        commit.complete().unwrap();

        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 2), (200, 2)]);
        assert_eq!(visible_modules(&store, "MAIN/A"), vec![(100, 2), (200, 2)]);
        let source = store.find_branch("MAIN/A").unwrap();
        assert!(!source.contains_content);
        assert_eq!(source.last_promotion, Some(source.head));
        assert_eq!(store.branch_state("MAIN/A").unwrap(), BranchState::UpToDate);
    }

    #[test]
    fn test_promotion_commit_holds_locked_source_replaced_set() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        store.create_branch("MAIN/A").unwrap();
        let commit = store.open_commit("MAIN/A").unwrap();
        store.save_batch(&commit, &[make_concept(100, 2)]).unwrap();
        commit.complete().unwrap();

        let promotion = store.open_promotion_commit("MAIN", "MAIN/A").unwrap();
        let source = store.find_branch("MAIN/A").unwrap();
        assert!(source.locked);
        assert_eq!(promotion.entity_versions_replaced(), source.versions_replaced);
        assert_eq!(promotion.versions_replaced("Concept").len(), 1);
        assert!(matches!(
            store.open_commit("MAIN/A"),
            Err(StoreError::BranchLocked { .. })
        ));
    }

    #[test]
    fn test_branch_history_and_timepoint_view() {
        let store = make_store();
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        let first_head = store.find_branch("MAIN").unwrap().head;

        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 2)]).unwrap();
        commit.complete().unwrap();

        let old = store.find_branch_at_timepoint("MAIN", first_head).unwrap();
        assert_eq!(old.head, first_head);
        let criteria = store.branch_criteria_at_timepoint("MAIN", first_head).unwrap();
        let found: Vec<Concept> = store.search_entities(&criteria, |_| true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].module_id, 1);
    }

    #[test]
    fn test_search_by_ids_limit() {
        let store = VersionedStore::new(StoreConfig {
            max_terms_per_query: 2,
        });
        store.create_branch("MAIN").unwrap();
        let criteria = store.branch_criteria("MAIN").unwrap();
        let ids: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        assert!(matches!(
            store.search_by_ids::<Concept>(&criteria, &ids),
            Err(StoreError::TooManyTerms { count: 3, limit: 2 })
        ));
    }

    #[test]
    fn test_create_branch_errors() {
        let store = make_store();
        assert!(matches!(
            store.create_branch("MAIN"),
            Err(StoreError::BranchExists { .. })
        ));
        assert!(matches!(
            store.create_branch("MAIN/X/Y"),
            Err(StoreError::ParentNotFound { .. })
        ));
        store.create_branch("MAIN/A").unwrap();
        store.create_branch("MAIN/B").unwrap();
        assert_eq!(store.find_children("MAIN").len(), 2);
    }

    struct FailingListener;

    impl CommitListener for FailingListener {
        fn pre_commit_completion(&self, _commit: &Commit) -> StoreResult<()> {
            Err(StoreError::Listener("refused".into()))
        }
    }

    #[test]
    fn test_listener_failure_rolls_back() {
        let store = make_store();
        let listener = Arc::new(FailingListener);
        store.register_commit_listener(&listener);

        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        assert!(commit.complete().is_err());
        assert!(visible_modules(&store, "MAIN").is_empty());

        drop(listener);
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[make_concept(100, 1)]).unwrap();
        commit.complete().unwrap();
        assert_eq!(visible_modules(&store, "MAIN"), vec![(100, 1)]);
    }
}
