//! Change report of a branch over a time range.

use std::collections::BTreeSet;

use snomed_store::{Branch, DomainEntity, Timepoint, Version, VersionedStore};
use snomed_types::{
    partition_of, CharacteristicType, Concept, Description, Partition, ReferenceSetMember,
    Relationship, SctId,
};
use tracing::{debug, info};

use super::ReviewChanges;
use crate::error::AuthoringResult;

/// Concept-level sets collected from versions before classification.
#[derive(Debug, Default)]
struct Collected {
    new_versions: BTreeSet<SctId>,
    ended_versions: BTreeSet<SctId>,
    component_changes: BTreeSet<SctId>,
    member_descriptions: BTreeSet<SctId>,
}

impl Collected {
    fn classify(self) -> ReviewChanges {
        let created: BTreeSet<SctId> = self.new_versions.difference(&self.ended_versions).copied().collect();
        let deleted: BTreeSet<SctId> = self.ended_versions.difference(&self.new_versions).copied().collect();
        let modified = self
            .component_changes
            .iter()
            .chain(self.new_versions.intersection(&self.ended_versions))
            .filter(|id| !created.contains(id) && !deleted.contains(id))
            .copied()
            .collect();
        ReviewChanges {
            created,
            modified,
            deleted,
        }
    }

    fn add_member(&mut self, member: &ReferenceSetMember) {
        match member.concept_id {
            Some(concept_id) => {
                self.component_changes.insert(concept_id);
            }
            None if partition_of(member.referenced_component_id) == Some(Partition::Description) => {
                self.member_descriptions.insert(member.referenced_component_id);
            }
            None => {}
        }
    }
}

fn is_stated(relationship: &Relationship) -> bool {
    relationship.characteristic_type_id == CharacteristicType::STATED_ID
}

/// Collects the concepts changed on `source` that the other branch of the review has not seen.
///
/// `source` and `target` are the branch versions the review was taken at.
pub(crate) fn find_concept_changes(
    store: &VersionedStore,
    source: &Branch,
    target: &Branch,
    source_is_parent: bool,
    clause_limit: usize,
) -> AuthoringResult<ReviewChanges> {
    let start = if source_is_parent {
        target.base
    } else {
        source.last_promotion.unwrap_or(source.creation)
    }
    .offset(1);
    let end = source.head;
    let path = source.path.as_str();
    info!(
        "Creating change report: branch {} time range {} ({}) to {} ({})",
        path,
        start.millis(),
        start.to_datetime(),
        end.millis(),
        end.to_datetime()
    );
    if start > end {
        info!("Change report complete for branch {} time range {} to {}", path, start, end);
        return Ok(ReviewChanges::default());
    }

    let mut collected = Collected::default();
    if !source_is_parent {
        collect_versions_replaced(store, source, start, &mut collected);
    }

    let range = store.updates_during_range_criteria(path, start, end);
    debug!("Collecting concept changes for change report: branch {} time range {} to {}", path, start, end);
    for version in store.search::<Concept, _>(&range, |_| true) {
        let concept_id = version.entity.id();
        if version.end.map_or(true, |ended| ended > end) {
            collected.new_versions.insert(concept_id);
        } else {
            collected.ended_versions.insert(concept_id);
        }
    }

    debug!("Collecting description changes for change report: branch {} time range {} to {}", path, start, end);
    collected.component_changes.extend(
        store
            .search_entities::<Description, _>(&range, |_| true)
            .iter()
            .filter_map(|d| d.concept_id),
    );

    debug!("Collecting relationship changes for change report: branch {} time range {} to {}", path, start, end);
    collected.component_changes.extend(
        store
            .search_entities::<Relationship, _>(&range, is_stated)
            .iter()
            .filter_map(|r| r.source_id),
    );

    debug!("Collecting refset member changes for change report: branch {} time range {} to {}", path, start, end);
    for member in store.search_entities::<ReferenceSetMember, _>(&range, |_| true) {
        collected.add_member(&member);
    }

    resolve_member_descriptions(store, source, clause_limit, &mut collected)?;

    let changes = collected.classify();
    info!(
        "Change report complete for branch {} time range {} to {}: {} created, {} modified, {} deleted",
        path,
        start,
        end,
        changes.created.len(),
        changes.modified.len(),
        changes.deleted.len()
    );
    Ok(changes)
}

/// Ancestor versions the source hid during the range count as ended concept
/// versions or as component changes of their owning concept.
fn collect_versions_replaced(store: &VersionedStore, source: &Branch, start: Timepoint, collected: &mut Collected) {
    debug!("Collecting versions replaced for change report: branch {}", source.path);
    let before = store
        .find_branch_at_timepoint(&source.path, start)
        .map(|branch| branch.versions_replaced)
        .unwrap_or_default();
    let newly_replaced = |kind: &str| -> BTreeSet<u64> {
        let earlier = before.get(kind).cloned().unwrap_or_default();
        source.versions_replaced_for(kind).difference(&earlier).copied().collect()
    };

    collected.ended_versions.extend(
        replaced_entities::<Concept>(store, &newly_replaced(Concept::KIND))
            .iter()
            .map(Concept::id),
    );
    collected.component_changes.extend(
        replaced_entities::<Description>(store, &newly_replaced(Description::KIND))
            .iter()
            .filter_map(|d| d.concept_id),
    );
    collected.component_changes.extend(
        replaced_entities::<Relationship>(store, &newly_replaced(Relationship::KIND))
            .iter()
            .filter(|r| is_stated(r))
            .filter_map(|r| r.source_id),
    );
    for member in replaced_entities::<ReferenceSetMember>(store, &newly_replaced(ReferenceSetMember::KIND)) {
        collected.add_member(&member);
    }
}

fn replaced_entities<T: DomainEntity>(store: &VersionedStore, internal_ids: &BTreeSet<u64>) -> Vec<T> {
    if internal_ids.is_empty() {
        return Vec::new();
    }
    store
        .find_by_internal_ids::<T>(internal_ids)
        .into_iter()
        .map(Version::into_entity)
        .collect()
}

fn resolve_member_descriptions(
    store: &VersionedStore,
    source: &Branch,
    clause_limit: usize,
    collected: &mut Collected,
) -> AuthoringResult<()> {
    if collected.member_descriptions.is_empty() {
        return Ok(());
    }
    let criteria = store.branch_criteria_at_timepoint(&source.path, source.head)?;
    let ids: Vec<String> = collected.member_descriptions.iter().map(SctId::to_string).collect();
    for chunk in ids.chunks(clause_limit.max(1)) {
        for description in store.search_by_ids::<Description>(&criteria, chunk)? {
            if let Some(concept_id) = description.concept_id {
                collected.component_changes.insert(concept_id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_collected(new: &[SctId], ended: &[SctId], components: &[SctId]) -> Collected {
        Collected {
            new_versions: new.iter().copied().collect(),
            ended_versions: ended.iter().copied().collect(),
            component_changes: components.iter().copied().collect(),
            member_descriptions: BTreeSet::new(),
        }
    }

    #[test]
    fn test_classify_changes() {
        let changes = make_collected(&[1, 2], &[2, 3], &[1, 3, 4]).classify();
        assert_eq!(changes.created, BTreeSet::from([1]));
        assert_eq!(changes.deleted, BTreeSet::from([3]));
        assert_eq!(changes.modified, BTreeSet::from([2, 4]));
    }

    #[test]
    fn test_member_ownership() {
        let mut collected = Collected::default();
        let mut owned = ReferenceSetMember::new(900000000000509007, 100005);
        owned.concept_id = Some(100005);
        collected.add_member(&owned);
        collected.add_member(&ReferenceSetMember::new(900000000000509007, 1000011));
        collected.add_member(&ReferenceSetMember::new(900000000000509007, 1000020));

        assert_eq!(collected.component_changes, BTreeSet::from([100005]));
        assert_eq!(collected.member_descriptions, BTreeSet::from([1000011]));
    }
}
