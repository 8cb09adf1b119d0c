//! Per-type version tables.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::branch::Timepoint;
use crate::criteria::BranchCriteria;
use crate::entity::{DomainEntity, Version};

/// All versions of one entity type.
pub(crate) struct Table<T> {
    rows: RwLock<Rows<T>>,
}

struct Rows<T> {
    by_internal_id: BTreeMap<u64, Version<T>>,
    by_entity_id: HashMap<String, BTreeSet<u64>>,
}

impl<T> Rows<T> {
    fn insert(&mut self, version: Version<T>, entity_id: String) {
        self.by_entity_id
            .entry(entity_id)
            .or_default()
            .insert(version.internal_id);
        self.by_internal_id.insert(version.internal_id, version);
    }

    fn remove(&mut self, internal_id: u64, entity_id: &str) {
        self.by_internal_id.remove(&internal_id);
        if let Some(ids) = self.by_entity_id.get_mut(entity_id) {
            ids.remove(&internal_id);
            if ids.is_empty() {
                self.by_entity_id.remove(entity_id);
            }
        }
    }
}

impl<T: DomainEntity> Table<T> {
    pub(crate) fn new() -> Self {
        Self {
            rows: RwLock::new(Rows {
                by_internal_id: BTreeMap::new(),
                by_entity_id: HashMap::new(),
            }),
        }
    }

    pub(crate) fn search<F>(&self, criteria: &BranchCriteria, filter: F) -> Vec<Version<T>>
    where
        F: Fn(&T) -> bool,
    {
        let rows = self.rows.read();
        rows.by_internal_id
            .values()
            .filter(|v| criteria.matches(v) && filter(&v.entity))
            .cloned()
            .collect()
    }

    pub(crate) fn search_by_ids(&self, criteria: &BranchCriteria, ids: &[String]) -> Vec<Version<T>> {
        let rows = self.rows.read();
        let mut found = Vec::new();
        for id in ids {
            let Some(internal_ids) = rows.by_entity_id.get(id) else {
                continue;
            };
            found.extend(
                internal_ids
                    .iter()
                    .filter_map(|internal_id| rows.by_internal_id.get(internal_id))
                    .filter(|v| criteria.matches(v))
                    .cloned(),
            );
        }
        found
    }

    pub(crate) fn find_by_internal_ids(&self, internal_ids: &BTreeSet<u64>) -> Vec<Version<T>> {
        let rows = self.rows.read();
        internal_ids
            .iter()
            .filter_map(|id| rows.by_internal_id.get(id))
            .cloned()
            .collect()
    }

    pub(crate) fn contains_entity(&self, id: &str) -> bool {
        self.rows.read().by_entity_id.contains_key(id)
    }

    pub(crate) fn insert(&self, versions: Vec<Version<T>>) {
        let mut rows = self.rows.write();
        for version in versions {
            let entity_id = version.entity.entity_id();
            rows.insert(version, entity_id);
        }
    }

    /// Ends or drops the current versions of `ids` on `path`.
    ///
    /// Versions older than `timepoint` are ended at it; versions written at
    /// `timepoint` by the same commit are dropped.
    pub(crate) fn end_current_versions(&self, path: &str, ids: &[String], timepoint: Timepoint) -> usize {
        let mut rows = self.rows.write();
        let mut affected = 0;
        for id in ids {
            let Some(internal_ids) = rows.by_entity_id.get(id).cloned() else {
                continue;
            };
            for internal_id in internal_ids {
                let Some(version) = rows.by_internal_id.get_mut(&internal_id) else {
                    continue;
                };
                if version.path != path || version.end.is_some() {
                    continue;
                }
                if version.start < timepoint {
                    version.end = Some(timepoint);
                } else {
                    rows.remove(internal_id, id);
                }
                affected += 1;
            }
        }
        affected
    }

    /// Ends the current versions among `internal_ids` that live on `path`.
    ///
    /// Returns every listed id found on `path`, ended now or earlier.
    pub(crate) fn end_internal_ids_on_path(
        &self,
        path: &str,
        internal_ids: &BTreeSet<u64>,
        timepoint: Timepoint,
    ) -> BTreeSet<u64> {
        let mut rows = self.rows.write();
        let mut on_path = BTreeSet::new();
        for internal_id in internal_ids {
            if let Some(version) = rows.by_internal_id.get_mut(internal_id) {
                if version.path == path {
                    if version.end.is_none() {
                        version.end = Some(timepoint);
                    }
                    on_path.insert(*internal_id);
                }
            }
        }
        on_path
    }

    /// Ends every current version matching `criteria` and returns them as they were.
    pub(crate) fn end_matching(&self, criteria: &BranchCriteria, timepoint: Timepoint) -> Vec<Version<T>> {
        let mut rows = self.rows.write();
        let mut ended = Vec::new();
        for version in rows.by_internal_id.values_mut() {
            if version.end.is_none() && version.start < timepoint && criteria.matches(version) {
                ended.push(version.clone());
                version.end = Some(timepoint);
            }
        }
        ended
    }
}

/// Type-erased operations used by commit rollback and tooling.
pub(crate) trait ErasedTable: Send + Sync {
    fn kind(&self) -> &'static str;

    fn rollback(&self, timepoint: Timepoint) -> usize;

    fn delete_chunk(&self, limit: usize) -> usize;

    fn len(&self) -> usize;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: DomainEntity> ErasedTable for Table<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn rollback(&self, timepoint: Timepoint) -> usize {
        let mut rows = self.rows.write();
        let written: Vec<(u64, String)> = rows
            .by_internal_id
            .values()
            .filter(|v| v.start == timepoint)
            .map(|v| (v.internal_id, v.entity.entity_id()))
            .collect();
        let mut affected = written.len();
        for (internal_id, entity_id) in written {
            rows.remove(internal_id, &entity_id);
        }
        for version in rows.by_internal_id.values_mut() {
            if version.end == Some(timepoint) {
                version.end = None;
                affected += 1;
            }
        }
        affected
    }

    fn delete_chunk(&self, limit: usize) -> usize {
        let mut rows = self.rows.write();
        let chunk: Vec<(u64, String)> = rows
            .by_internal_id
            .values()
            .take(limit)
            .map(|v| (v.internal_id, v.entity.entity_id()))
            .collect();
        let deleted = chunk.len();
        for (internal_id, entity_id) in chunk {
            rows.remove(internal_id, &entity_id);
        }
        deleted
    }

    fn len(&self) -> usize {
        self.rows.read().by_internal_id.len()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        id: String,
        value: u32,
    }

    impl DomainEntity for Doc {
        const KIND: &'static str = "Doc";

        fn entity_id(&self) -> String {
            self.id.clone()
        }

        fn is_changed(&self) -> bool {
            true
        }

        fn is_deleted(&self) -> bool {
            false
        }

        fn set_changed(&mut self, _changed: bool) {}
    }

    fn make_version(internal_id: u64, id: &str, start: i64) -> Version<Doc> {
        Version {
            internal_id,
            path: "MAIN".to_string(),
            start: Timepoint::from_millis(start),
            end: None,
            entity: Doc {
                id: id.to_string(),
                value: internal_id as u32,
            },
        }
    }

    #[test]
    fn test_end_current_versions_ends_old_and_drops_same_commit() {
        let table = Table::new();
        table.insert(vec![make_version(1, "a", 10), make_version(2, "b", 20)]);

        let t = Timepoint::from_millis(20);
        let affected = table.end_current_versions("MAIN", &["a".into(), "b".into()], t);
        assert_eq!(affected, 2);
        assert_eq!(table.len(), 1);
        let rows = table.find_by_internal_ids(&[1, 2].into_iter().collect());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end, Some(t));
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let table = Table::new();
        table.insert(vec![make_version(1, "a", 10)]);
        let t = Timepoint::from_millis(30);
        table.end_current_versions("MAIN", &["a".into()], t);
        table.insert(vec![make_version(2, "a", 30)]);

        assert_eq!(table.rollback(t), 2);
        let rows = table.search(&BranchCriteria::ChangesOnBranch { path: "MAIN".into() }, |_| true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].internal_id, 1);
        assert!(table.contains_entity("a"));
    }

    #[test]
    fn test_delete_chunk() {
        let table = Table::new();
        table.insert((1..=5).map(|i| make_version(i, &i.to_string(), 10)).collect());
        assert_eq!(table.delete_chunk(3), 3);
        assert_eq!(table.len(), 2);
        assert!(!table.contains_entity("1"));
    }
}
