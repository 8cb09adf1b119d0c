//! Minting of component identifiers.
//!
//! Concept, description and relationship ids are SCTIDs built from a
//! sequential item id, the configured namespace, the partition and a Verhoeff
//! check digit. Ids already present in the store on any branch are skipped.
//! Reference set members are identified by random UUIDs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use snomed_store::VersionedStore;
use snomed_types::{build_sctid, Concept, Description, Partition, Relationship, SctId};
use tracing::debug;

use crate::config::AuthoringConfig;
use crate::error::{AuthoringError, AuthoringResult};

/// Source of candidate identifiers.
pub trait IdentifierSource: Send + Sync {
    /// Returns `count` candidate ids in the partition.
    fn reserve(&self, partition: Partition, count: usize) -> AuthoringResult<Vec<SctId>>;
}

/// Hands out ids from an increasing item id counter.
#[derive(Debug)]
pub struct SequentialIdentifierSource {
    namespace: Option<u32>,
    next_item: AtomicU64,
}

impl SequentialIdentifierSource {
    /// Creates a source starting at `seed`.
    pub fn new(namespace: Option<u32>, seed: u64) -> Self {
        Self {
            namespace,
            next_item: AtomicU64::new(seed),
        }
    }
}

impl IdentifierSource for SequentialIdentifierSource {
    fn reserve(&self, partition: Partition, count: usize) -> AuthoringResult<Vec<SctId>> {
        let first = self.next_item.fetch_add(count as u64, Ordering::SeqCst);
        (first..first + count as u64)
            .map(|item| {
                build_sctid(item, self.namespace, partition).ok_or_else(|| {
                    AuthoringError::State(format!("Identifier space exhausted at item {item}."))
                })
            })
            .collect()
    }
}

/// Mints ids that are unused in the store.
#[derive(Clone)]
pub struct IdentifierService {
    store: VersionedStore,
    source: Arc<dyn IdentifierSource>,
}

impl std::fmt::Debug for IdentifierService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierService").finish_non_exhaustive()
    }
}

impl IdentifierService {
    /// Creates a service minting sequential ids as configured.
    pub fn new(store: VersionedStore, config: &AuthoringConfig) -> Self {
        Self::with_source(
            store,
            Arc::new(SequentialIdentifierSource::new(
                config.identifier_namespace,
                config.identifier_seed,
            )),
        )
    }

    /// Creates a service drawing candidates from `source`.
    pub fn with_source(store: VersionedStore, source: Arc<dyn IdentifierSource>) -> Self {
        Self { store, source }
    }

    /// Mints one id.
    pub fn mint(&self, partition: Partition) -> AuthoringResult<SctId> {
        let mut ids = self.mint_many(partition, 1)?;
        ids.pop()
            .ok_or_else(|| AuthoringError::State("No identifier was minted.".to_string()))
    }

    /// Mints `count` ids, none of which exist in the store.
    pub fn mint_many(&self, partition: Partition, count: usize) -> AuthoringResult<Vec<SctId>> {
        let mut minted = Vec::with_capacity(count);
        while minted.len() < count {
            for id in self.source.reserve(partition, count - minted.len())? {
                if self.in_use(partition, id) {
                    debug!("Skipping identifier {} which is already in use", id);
                } else {
                    minted.push(id);
                }
            }
        }
        Ok(minted)
    }

    fn in_use(&self, partition: Partition, id: SctId) -> bool {
        let id = id.to_string();
        match partition {
            Partition::Concept => self.store.id_exists::<Concept>(&id),
            Partition::Description => self.store.id_exists::<Description>(&id),
            Partition::Relationship => self.store.id_exists::<Relationship>(&id),
        }
    }

    /// New reference set member id.
    pub fn new_member_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snomed_types::{is_valid_sctid, partition_of};

    fn make_service(seed: u64) -> (VersionedStore, IdentifierService) {
        let store = VersionedStore::default();
        store.create_branch("MAIN").unwrap();
        let config = AuthoringConfig {
            identifier_seed: seed,
            ..Default::default()
        };
        let service = IdentifierService::new(store.clone(), &config);
        (store, service)
    }

    #[test]
    fn test_minted_ids_are_valid_and_partitioned() {
        let (_, service) = make_service(500);
        let concepts = service.mint_many(Partition::Concept, 3).unwrap();
        assert_eq!(concepts.len(), 3);
        for id in &concepts {
            assert!(is_valid_sctid(*id));
            assert_eq!(partition_of(*id), Some(Partition::Concept));
        }
        let relationship = service.mint(Partition::Relationship).unwrap();
        assert_eq!(partition_of(relationship), Some(Partition::Relationship));
    }

    #[test]
    fn test_ids_in_store_are_skipped() {
        let (store, service) = make_service(73211);
        let mut existing = Concept::new(73211009);
        existing.changed = true;
        let commit = store.open_commit("MAIN").unwrap();
        store.save_batch(&commit, &[existing]).unwrap();
        commit.complete().unwrap();

        let id = service.mint(Partition::Concept).unwrap();
        assert_ne!(id, 73211009);
        assert!(id.to_string().starts_with("73212"));
    }

    #[test]
    fn test_member_ids_are_uuids() {
        let id = IdentifierService::new_member_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_ne!(id, IdentifierService::new_member_id());
    }
}
