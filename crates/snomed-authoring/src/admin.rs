//! Bulk deletion of stored content.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snomed_store::VersionedStore;
use tracing::{info, warn};

use crate::config::AuthoringConfig;
use crate::error::AuthoringResult;

const DELETE_CHUNK_SIZE: usize = 10_000;

/// Outcome of [`AdminService::delete_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    /// Versions removed per entity type.
    pub deleted: BTreeMap<String, usize>,
    /// Entity types whose deletion ran out of time.
    pub cancelled: Vec<String>,
}

/// Maintenance operations over the whole store.
#[derive(Debug, Clone)]
pub struct AdminService {
    store: VersionedStore,
    timeout: Duration,
}

impl AdminService {
    /// Creates the service.
    pub fn new(store: VersionedStore, config: &AuthoringConfig) -> Self {
        Self {
            store,
            timeout: config.deletion_timeout,
        }
    }

    /// Removes every stored version of every entity type, all branches included.
    ///
    /// Types are deleted concurrently on the blocking pool. A type that takes
    /// longer than the deletion timeout is cancelled between chunks and keeps
    /// whatever was not deleted yet.
    pub async fn delete_all(&self) -> AuthoringResult<DeletionSummary> {
        let mut tasks = Vec::new();
        for kind in self.store.kinds() {
            let store = self.store.clone();
            let cancelled = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancelled);
            let task = tokio::task::spawn_blocking(move || {
                let mut deleted = 0;
                while !flag.load(Ordering::Relaxed) {
                    let removed = store.delete_chunk(kind, DELETE_CHUNK_SIZE);
                    if removed == 0 {
                        break;
                    }
                    deleted += removed;
                }
                deleted
            });
            tasks.push((kind, cancelled, task));
        }

        let mut summary = DeletionSummary::default();
        for (kind, cancelled, task) in tasks {
            match tokio::time::timeout(self.timeout, task).await {
                Ok(joined) => {
                    let deleted = joined?;
                    info!("Deleted {} {} versions", deleted, kind);
                    summary.deleted.insert(kind.to_string(), deleted);
                }
                Err(_) => {
                    cancelled.store(true, Ordering::Relaxed);
                    warn!("Canceling deletion of type {}.", kind);
                    summary.cancelled.push(kind.to_string());
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept_service::ConceptService;
    use crate::identifier::IdentifierService;
    use snomed_store::{DomainEntity, MAIN};
    use snomed_types::{Concept, Description};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_all_empties_every_table() {
        let store = VersionedStore::default();
        store.create_branch(MAIN).unwrap();
        let config = AuthoringConfig::default();
        let concepts = ConceptService::new(store.clone(), IdentifierService::new(store.clone(), &config), config.clone());
        concepts
            .create(Concept::new(138875005).with_description(Description::new("SNOMED CT Concept").fsn()), MAIN)
            .unwrap();

        let summary = AdminService::new(store.clone(), &config).delete_all().await.unwrap();
        assert!(summary.cancelled.is_empty());
        assert_eq!(summary.deleted.get(Concept::KIND), Some(&1));
        assert!(store.kinds().iter().all(|kind| store.table_size(kind) == 0));
        assert!(!concepts.exists(138875005, MAIN).unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timed_out_type_is_cancelled() {
        let store = VersionedStore::default();
        store.create_branch(MAIN).unwrap();
        let commit = store.open_commit(MAIN).unwrap();
        let bulk: Vec<Concept> = (1..=300_000u64)
            .map(|id| {
                let mut concept = Concept::new(id);
                concept.changed = true;
                concept
            })
            .collect();
        store.save_batch(&commit, &bulk).unwrap();
        let descriptions: Vec<Description> = (0..5u64)
            .map(|n| {
                let mut description = Description::new(format!("Term {n}")).with_id(1_000_000_000 + n);
                description.concept_id = Some(1);
                description.changed = true;
                description
            })
            .collect();
        store.save_batch(&commit, &descriptions).unwrap();
        commit.complete().unwrap();

        let config = AuthoringConfig {
            deletion_timeout: Duration::from_nanos(1),
            ..AuthoringConfig::default()
        };
        let summary = AdminService::new(store.clone(), &config).delete_all().await.unwrap();

        assert!(summary.cancelled.iter().any(|kind| kind == Concept::KIND));
        assert!(!summary.deleted.contains_key(Concept::KIND));
        assert_eq!(summary.deleted.get(Description::KIND), Some(&5));
        assert_eq!(store.table_size(Description::KIND), 0);
        assert!(store.table_size(Concept::KIND) > 0);
    }
}
