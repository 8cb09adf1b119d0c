//! Concept reads and the batch commit engine.
//!
//! Concept documents arrive with their descriptions and relationships
//! attached. Before anything is written each component is compared with the
//! version the branch already holds: only components whose comparable fields
//! differ are persisted, release metadata is carried over from the previous
//! version, and missing identifiers are minted. Concepts, descriptions,
//! relationships and language reference set members are then saved as four
//! batches within the same commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use snomed_store::{BranchCriteria, Commit, DomainEntity, Version, VersionedStore};
use snomed_types::{
    partition_of, Acceptability, Concept, ConceptMini, Description, Partition,
    ReferenceSetMember, Relationship, SctId, SnomedComponent,
};
use tracing::{debug, info, warn};

use crate::config::AuthoringConfig;
use crate::error::{AuthoringError, AuthoringResult};
use crate::identifier::IdentifierService;
use crate::semantic::QueryConcept;

/// A batch of one component type, saved as-is.
#[derive(Debug, Clone)]
pub enum ComponentBatch {
    /// Concept rows.
    Concepts(Vec<Concept>),
    /// Description rows.
    Descriptions(Vec<Description>),
    /// Relationship rows.
    Relationships(Vec<Relationship>),
    /// Reference set members; description members get their owning concept filled in.
    Members(Vec<ReferenceSetMember>),
    /// Semantic index rows.
    QueryConcepts(Vec<QueryConcept>),
}

impl ComponentBatch {
    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        match self {
            Self::Concepts(v) => v.len(),
            Self::Descriptions(v) => v.len(),
            Self::Relationships(v) => v.len(),
            Self::Members(v) => v.len(),
            Self::QueryConcepts(v) => v.len(),
        }
    }

    /// Whether the batch holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads and writes concepts with their components.
#[derive(Debug, Clone)]
pub struct ConceptService {
    store: VersionedStore,
    identifiers: IdentifierService,
    config: AuthoringConfig,
}

/// Components taken out of an existing concept that the update no longer holds.
#[derive(Default)]
struct Removed {
    descriptions: Vec<Description>,
    relationships: Vec<Relationship>,
    members: Vec<ReferenceSetMember>,
}

impl ConceptService {
    /// Creates the service.
    pub fn new(store: VersionedStore, identifiers: IdentifierService, config: AuthoringConfig) -> Self {
        Self {
            store,
            identifiers,
            config,
        }
    }

    /// Store the service writes to.
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Loads concepts with their descriptions, relationships and language members.
    ///
    /// Ids are looked up in partitions of `clause_limit`. Unknown ids are skipped.
    pub fn load_concepts(&self, criteria: &BranchCriteria, ids: &[SctId]) -> AuthoringResult<Vec<Concept>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.clause_limit.max(1)) {
            let keys: Vec<String> = chunk.iter().map(SctId::to_string).collect();
            let mut concepts = most_specific(self.store.search_versions_by_ids::<Concept>(criteria, &keys)?);
            if concepts.is_empty() {
                continue;
            }
            let found: BTreeSet<SctId> = concepts.iter().map(Concept::id).collect();

            let mut descriptions = most_specific(self.store.search(criteria, |d: &Description| {
                d.concept_id.map_or(false, |id| found.contains(&id))
            }));
            let description_ids: BTreeSet<SctId> = descriptions.iter().map(Description::id).collect();
            let members = most_specific(self.store.search(criteria, |m: &ReferenceSetMember| {
                description_ids.contains(&m.referenced_component_id) && m.acceptability_id().is_some()
            }));
            let mut members_by_description: HashMap<SctId, Vec<ReferenceSetMember>> = HashMap::new();
            for member in members {
                members_by_description
                    .entry(member.referenced_component_id)
                    .or_default()
                    .push(member);
            }
            for description in &mut descriptions {
                for member in members_by_description.remove(&description.id()).unwrap_or_default() {
                    attach_language_member(description, member);
                }
            }

            let relationships = most_specific(self.store.search(criteria, |r: &Relationship| {
                r.source_id.map_or(false, |id| found.contains(&id))
            }));

            let mut by_concept: HashMap<SctId, (Vec<Description>, Vec<Relationship>)> = HashMap::new();
            for description in descriptions {
                by_concept
                    .entry(description.concept_id.unwrap_or_default())
                    .or_default()
                    .0
                    .push(description);
            }
            for relationship in relationships {
                by_concept
                    .entry(relationship.source_id.unwrap_or_default())
                    .or_default()
                    .1
                    .push(relationship);
            }
            for concept in &mut concepts {
                let (mut descriptions, mut relationships) =
                    by_concept.remove(&concept.id()).unwrap_or_default();
                descriptions.sort_by_key(Description::id);
                relationships.sort_by_key(Relationship::id);
                concept.attach_components(descriptions, relationships);
            }
            loaded.extend(concepts);
        }
        Ok(loaded)
    }

    /// Finds a concept on a branch.
    pub fn find(&self, concept_id: SctId, path: &str) -> AuthoringResult<Option<Concept>> {
        let criteria = self.store.branch_criteria(path)?;
        Ok(self.load_concepts(&criteria, &[concept_id])?.into_iter().next())
    }

    /// Finds concepts on a branch, skipping unknown ids.
    pub fn find_many(&self, concept_ids: &[SctId], path: &str) -> AuthoringResult<Vec<Concept>> {
        let criteria = self.store.branch_criteria(path)?;
        self.load_concepts(&criteria, concept_ids)
    }

    /// Whether a concept is visible on a branch.
    pub fn exists(&self, concept_id: SctId, path: &str) -> AuthoringResult<bool> {
        Ok(self.non_existent_concepts(&[concept_id], path)?.is_empty())
    }

    /// Ids that are not visible on a branch.
    pub fn non_existent_concepts(&self, concept_ids: &[SctId], path: &str) -> AuthoringResult<BTreeSet<SctId>> {
        let criteria = self.store.branch_criteria(path)?;
        let mut missing: BTreeSet<SctId> = concept_ids.iter().copied().collect();
        for chunk in concept_ids.chunks(self.config.clause_limit.max(1)) {
            let keys: Vec<String> = chunk.iter().map(SctId::to_string).collect();
            for version in self.store.search_versions_by_ids::<Concept>(&criteria, &keys)? {
                missing.remove(&version.entity.id());
            }
        }
        Ok(missing)
    }

    /// Summaries of concepts with FSN and preferred term.
    ///
    /// Ids that cannot be found get a summary with the id alone.
    pub fn find_concept_minis(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &BTreeSet<SctId>,
    ) -> AuthoringResult<HashMap<SctId, ConceptMini>> {
        let ids: Vec<SctId> = concept_ids.iter().copied().collect();
        let mut minis: HashMap<SctId, ConceptMini> = self
            .load_concepts(criteria, &ids)?
            .iter()
            .map(|concept| (concept.id(), self.to_mini(concept)))
            .collect();
        for id in concept_ids {
            minis.entry(*id).or_insert_with(|| ConceptMini::new(*id));
        }
        Ok(minis)
    }

    fn to_mini(&self, concept: &Concept) -> ConceptMini {
        let mut fallback = None;
        for refset_id in &self.config.language_refset_ids {
            let mini = concept.to_mini(*refset_id);
            if mini.pt.is_some() {
                return mini;
            }
            fallback.get_or_insert(mini);
        }
        fallback.unwrap_or_else(|| concept.to_mini(0))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Creates a concept in its own commit.
    pub fn create(&self, concept: Concept, path: &str) -> AuthoringResult<Concept> {
        self.create_many(vec![concept], path)?
            .pop()
            .ok_or_else(|| AuthoringError::State("No concept was created.".to_string()))
    }

    /// Creates concepts in one commit. Supplied ids must not exist on the branch.
    pub fn create_many(&self, concepts: Vec<Concept>, path: &str) -> AuthoringResult<Vec<Concept>> {
        let ids: Vec<SctId> = concepts.iter().filter_map(|c| c.concept_id).collect();
        let missing = self.non_existent_concepts(&ids, path)?;
        if let Some(existing) = ids.iter().find(|id| !missing.contains(id)) {
            return Err(AuthoringError::Validation(format!(
                "Concept '{existing}' already exists on branch '{path}'."
            )));
        }
        self.commit_concepts(concepts, path)
    }

    /// Updates a concept in its own commit. The concept must exist on the branch.
    pub fn update(&self, concept: Concept, path: &str) -> AuthoringResult<Concept> {
        let concept_id = concept.concept_id.ok_or_else(|| {
            AuthoringError::Validation("The conceptId must be set when updating a concept.".to_string())
        })?;
        if !self.exists(concept_id, path)? {
            return Err(AuthoringError::NotFound(format!(
                "Concept {concept_id} not found on branch {path}."
            )));
        }
        self.commit_concepts(vec![concept], path)?
            .pop()
            .ok_or_else(|| AuthoringError::State("No concept was updated.".to_string()))
    }

    /// Creates or updates concepts in one commit.
    pub fn create_update(&self, concepts: Vec<Concept>, path: &str) -> AuthoringResult<Vec<Concept>> {
        self.commit_concepts(concepts, path)
    }

    /// Saves concepts within a commit opened by the caller.
    pub fn update_within_commit(&self, concepts: Vec<Concept>, commit: &Commit) -> AuthoringResult<Vec<Concept>> {
        self.save_batch_concepts_and_components(concepts, commit)
    }

    fn commit_concepts(&self, concepts: Vec<Concept>, path: &str) -> AuthoringResult<Vec<Concept>> {
        let commit = self.store.open_commit(path)?;
        let saved = self.save_batch_concepts_and_components(concepts, &commit)?;
        commit.complete()?;
        Ok(saved)
    }

    /// Persists the changed parts of concept documents within a commit.
    ///
    /// On error nothing is published; dropping the commit rolls back what was
    /// written so far.
    pub fn save_batch_concepts_and_components(
        &self,
        mut concepts: Vec<Concept>,
        commit: &Commit,
    ) -> AuthoringResult<Vec<Concept>> {
        validate_acceptability(&concepts)?;
        let rebase = commit.is_rebase();
        let criteria = self.store.branch_criteria_including_open_commit(commit)?;

        let ids: Vec<SctId> = concepts.iter().filter_map(|c| c.concept_id).collect();
        let existing: HashMap<SctId, Concept> = self
            .load_concepts(&criteria, &ids)?
            .into_iter()
            .map(|c| (c.id(), c))
            .collect();

        let mut removed = Removed::default();
        let mut members = Vec::new();
        for concept in &mut concepts {
            if !concept.active {
                for relationship in &mut concept.relationships {
                    relationship.active = false;
                }
            }
            let previous = concept.concept_id.and_then(|id| existing.get(&id));
            match previous {
                Some(previous) => {
                    concept.changed = concept.is_component_changed(Some(previous)) || rebase;
                    concept.copy_release_details(previous);
                    concept.update_effective_time();
                    collect_removed(concept, previous, &mut removed);
                }
                None => {
                    if concept.concept_id.is_none() {
                        concept.concept_id = Some(self.identifiers.mint(Partition::Concept)?);
                    }
                    concept.changed = true;
                    concept.clear_release_details();
                }
            }
            let concept_id = concept.id();

            for description in &mut concept.descriptions {
                description.concept_id = Some(concept_id);
                let previous_description = previous
                    .zip(description.description_id)
                    .and_then(|(p, id)| p.description(id));
                detect_change(description, previous_description, rebase);
                if description.description_id.is_none() {
                    description.description_id = Some(self.identifiers.mint(Partition::Description)?);
                }
                members.extend(diff_language_members(
                    description,
                    previous_description,
                    concept_id,
                    rebase,
                )?);
            }

            for relationship in &mut concept.relationships {
                relationship.source_id = Some(concept_id);
                let previous_relationship = previous
                    .zip(relationship.relationship_id)
                    .and_then(|(p, id)| p.relationship(id));
                detect_change(relationship, previous_relationship, rebase);
                if relationship.relationship_id.is_none() {
                    relationship.relationship_id = Some(self.identifiers.mint(Partition::Relationship)?);
                }
            }
        }
        members.extend(removed.members);

        let mut descriptions = Vec::new();
        let mut relationships = Vec::new();
        for concept in &mut concepts {
            let (d, r) = concept.detach_components();
            descriptions.extend(d);
            relationships.extend(r);
        }
        descriptions.extend(removed.descriptions);
        relationships.extend(removed.relationships);

        let saved_concepts = self.store.save_batch(commit, &concepts)?;
        let saved_descriptions = self.store.save_batch(commit, &descriptions)?;
        let saved_relationships = self.store.save_batch(commit, &relationships)?;
        let saved_members = self.store.save_batch(commit, &members)?;
        info!(
            "Saved {} concepts, {} descriptions, {} relationships, {} members on {}",
            saved_concepts,
            saved_descriptions,
            saved_relationships,
            saved_members,
            commit.branch().path
        );

        let criteria = self.store.branch_criteria_including_open_commit(commit)?;
        let mini_ids: BTreeSet<SctId> = relationships
            .iter()
            .filter(|r| !r.deleted)
            .flat_map(|r| [r.type_id, r.destination_id])
            .collect();
        let minis = self.find_concept_minis(&criteria, &mini_ids)?;
        for relationship in &mut relationships {
            relationship.type_mini = minis.get(&relationship.type_id).cloned();
            relationship.target = minis.get(&relationship.destination_id).cloned();
        }

        let mut by_concept: HashMap<SctId, (Vec<Description>, Vec<Relationship>)> = HashMap::new();
        for description in descriptions.into_iter().filter(|d| !d.deleted) {
            by_concept
                .entry(description.concept_id.unwrap_or_default())
                .or_default()
                .0
                .push(description);
        }
        for relationship in relationships.into_iter().filter(|r| !r.deleted) {
            by_concept
                .entry(relationship.source_id.unwrap_or_default())
                .or_default()
                .1
                .push(relationship);
        }
        for concept in &mut concepts {
            if let Some((d, r)) = by_concept.remove(&concept.id()) {
                concept.attach_components(d, r);
            }
        }
        Ok(concepts)
    }

    /// Deletes a concept with its components in its own commit.
    ///
    /// Released concepts are only deleted when `force` is set.
    pub fn delete_concept_and_components(&self, concept_id: SctId, path: &str, force: bool) -> AuthoringResult<()> {
        let concept = self
            .find(concept_id, path)?
            .ok_or_else(|| AuthoringError::NotFound(format!("Concept {concept_id} not found.")))?;
        if concept.is_released() && !force {
            return Err(AuthoringError::State("Released concept will not be deleted.".to_string()));
        }
        let commit = self.store.open_commit(path)?;
        self.delete_concepts_and_components_within_commit(&[concept_id], &commit)?;
        commit.complete()?;
        info!("Deleted concept {} and its components on {}", concept_id, path);
        Ok(())
    }

    /// Deletes concepts, their descriptions and relationships, and members
    /// referring to them, within a commit opened by the caller.
    pub fn delete_concepts_and_components_within_commit(
        &self,
        concept_ids: &[SctId],
        commit: &Commit,
    ) -> AuthoringResult<usize> {
        let criteria = self.store.branch_criteria_including_open_commit(commit)?;
        let mut concepts = self.load_concepts(&criteria, concept_ids)?;
        if concepts.is_empty() {
            return Ok(0);
        }
        let mut descriptions = Vec::new();
        let mut relationships = Vec::new();
        let mut referenced = BTreeSet::new();
        for concept in &mut concepts {
            concept.deleted = true;
            referenced.insert(concept.id());
            let (d, r) = concept.detach_components();
            descriptions.extend(d);
            relationships.extend(r);
        }
        for description in &mut descriptions {
            description.deleted = true;
            referenced.insert(description.id());
        }
        for relationship in &mut relationships {
            relationship.deleted = true;
        }
        let mut members: Vec<ReferenceSetMember> = self.store.search_entities(&criteria, |m: &ReferenceSetMember| {
            referenced.contains(&m.referenced_component_id)
        });
        for member in &mut members {
            member.deleted = true;
        }

        self.store.save_batch(commit, &concepts)?;
        self.store.save_batch(commit, &descriptions)?;
        self.store.save_batch(commit, &relationships)?;
        self.store.save_batch(commit, &members)?;
        debug!(
            "Deleted {} concepts, {} descriptions, {} relationships, {} members",
            concepts.len(),
            descriptions.len(),
            relationships.len(),
            members.len()
        );
        Ok(concepts.len())
    }

    /// Marks a concept and its components as published at `effective_time`.
    pub fn release_concept(&self, concept_id: SctId, path: &str, effective_time: u32) -> AuthoringResult<Concept> {
        let mut concept = self
            .find(concept_id, path)?
            .ok_or_else(|| AuthoringError::NotFound(format!("Concept {concept_id} not found.")))?;
        concept.release(effective_time);
        concept.changed = true;
        let (mut descriptions, mut relationships) = concept.detach_components();
        let mut members = Vec::new();
        for description in &mut descriptions {
            description.release(effective_time);
            description.changed = true;
            for member in description.lang_refset_members.values_mut() {
                member.release(effective_time);
                member.changed = true;
                members.push(member.clone());
            }
        }
        for relationship in &mut relationships {
            relationship.release(effective_time);
            relationship.changed = true;
        }

        let commit = self.store.open_commit(path)?;
        self.store.save_batch(&commit, std::slice::from_ref(&concept))?;
        self.store.save_batch(&commit, &descriptions)?;
        self.store.save_batch(&commit, &relationships)?;
        self.store.save_batch(&commit, &members)?;
        commit.complete()?;
        info!("Released concept {} on {} at {}", concept_id, path, effective_time);

        concept.changed = false;
        concept.attach_components(descriptions, relationships);
        Ok(concept)
    }

    /// Saves a batch of one component type as-is.
    pub fn save_batch_components(&self, batch: ComponentBatch, commit: &Commit) -> AuthoringResult<usize> {
        let saved = match batch {
            ComponentBatch::Concepts(concepts) => self.store.save_batch(commit, &concepts)?,
            ComponentBatch::Descriptions(descriptions) => self.store.save_batch(commit, &descriptions)?,
            ComponentBatch::Relationships(relationships) => self.store.save_batch(commit, &relationships)?,
            ComponentBatch::Members(mut members) => {
                self.fill_member_concept_ids(&mut members, commit)?;
                self.store.save_batch(commit, &members)?
            }
            ComponentBatch::QueryConcepts(rows) => self.store.save_batch(commit, &rows)?,
        };
        Ok(saved)
    }

    fn fill_member_concept_ids(&self, members: &mut [ReferenceSetMember], commit: &Commit) -> AuthoringResult<()> {
        let mut description_ids = BTreeSet::new();
        for member in members.iter_mut().filter(|m| m.concept_id.is_none()) {
            match partition_of(member.referenced_component_id) {
                Some(Partition::Concept) => member.concept_id = Some(member.referenced_component_id),
                Some(Partition::Description) => {
                    description_ids.insert(member.referenced_component_id);
                }
                _ => {}
            }
        }
        if description_ids.is_empty() {
            return Ok(());
        }

        let criteria = self.store.branch_criteria_including_open_commit(commit)?;
        let ids: Vec<SctId> = description_ids.into_iter().collect();
        let mut owners: HashMap<SctId, SctId> = HashMap::new();
        for chunk in ids.chunks(self.config.clause_limit.max(1)) {
            let keys: Vec<String> = chunk.iter().map(SctId::to_string).collect();
            for description in self.store.search_by_ids::<Description>(&criteria, &keys)? {
                if let Some(concept_id) = description.concept_id {
                    owners.insert(description.id(), concept_id);
                }
            }
        }
        for member in members.iter_mut().filter(|m| m.concept_id.is_none()) {
            if partition_of(member.referenced_component_id) != Some(Partition::Description) {
                continue;
            }
            match owners.get(&member.referenced_component_id) {
                Some(concept_id) => member.concept_id = Some(*concept_id),
                None => warn!(
                    "Description {} referenced by member {} was not found, the member has no owning concept.",
                    member.referenced_component_id,
                    member.id()
                ),
            }
        }
        Ok(())
    }
}

/// One document per id. A rebase can leave an ancestor's newer version
/// visible next to the branch's own; the deepest branch wins, then the latest.
fn most_specific<T: DomainEntity>(versions: Vec<Version<T>>) -> Vec<T> {
    let mut by_id: BTreeMap<String, Version<T>> = BTreeMap::new();
    for version in versions {
        let id = version.entity.entity_id();
        let replace = by_id.get(&id).map_or(true, |kept| {
            (version.path.len(), version.start) > (kept.path.len(), kept.start)
        });
        if replace {
            by_id.insert(id, version);
        }
    }
    by_id.into_values().map(Version::into_entity).collect()
}

fn attach_language_member(description: &mut Description, member: ReferenceSetMember) {
    let refset_id = member.refset_id;
    if let Some(current) = description.lang_refset_members.get(&refset_id) {
        if current.active && !member.active {
            return;
        }
    }
    if member.active {
        if let Some(acceptability) = member.acceptability_id().and_then(Acceptability::from_id) {
            description
                .acceptability_map
                .insert(refset_id, acceptability.name().to_string());
        }
    }
    description.lang_refset_members.insert(refset_id, member);
}

fn validate_acceptability(concepts: &[Concept]) -> AuthoringResult<()> {
    for description in concepts.iter().flat_map(|c| &c.descriptions) {
        for value in description.acceptability_map.values() {
            if Acceptability::from_name(value).is_none() {
                return Err(AuthoringError::Validation(format!(
                    "Acceptability value not recognised '{value}'."
                )));
            }
        }
    }
    Ok(())
}

trait ChangeTracked: SnomedComponent + Sized {
    fn set_changed_flag(&mut self, changed: bool);
}

impl ChangeTracked for Description {
    fn set_changed_flag(&mut self, changed: bool) {
        self.changed = changed;
    }
}

impl ChangeTracked for Relationship {
    fn set_changed_flag(&mut self, changed: bool) {
        self.changed = changed;
    }
}

impl ChangeTracked for ReferenceSetMember {
    fn set_changed_flag(&mut self, changed: bool) {
        self.changed = changed;
    }
}

/// Sets the changed flag and release details of a component against its previous version.
fn detect_change<C: ChangeTracked>(component: &mut C, previous: Option<&C>, rebase: bool) {
    match previous {
        Some(previous) => {
            let changed = component.is_component_changed(Some(previous)) || rebase;
            component.set_changed_flag(changed);
            component.copy_release_details(previous);
            component.update_effective_time();
        }
        None => {
            component.set_changed_flag(true);
            component.clear_release_details();
        }
    }
}

/// Collects descriptions and relationships of `previous` missing from `concept`.
fn collect_removed(concept: &Concept, previous: &Concept, removed: &mut Removed) {
    let kept_descriptions: BTreeSet<SctId> =
        concept.descriptions.iter().filter_map(|d| d.description_id).collect();
    for description in &previous.descriptions {
        if kept_descriptions.contains(&description.id()) {
            continue;
        }
        let mut description = description.clone();
        description.deleted = true;
        for member in std::mem::take(&mut description.lang_refset_members).into_values() {
            removed.members.extend(retire_member(member));
        }
        removed.descriptions.push(description);
    }
    let kept_relationships: BTreeSet<SctId> =
        concept.relationships.iter().filter_map(|r| r.relationship_id).collect();
    for relationship in &previous.relationships {
        if !kept_relationships.contains(&relationship.id()) {
            let mut relationship = relationship.clone();
            relationship.deleted = true;
            removed.relationships.push(relationship);
        }
    }
}

/// Builds the language members a description needs and returns the ones to persist.
fn diff_language_members(
    description: &mut Description,
    previous: Option<&Description>,
    concept_id: SctId,
    rebase: bool,
) -> AuthoringResult<Vec<ReferenceSetMember>> {
    let description_id = description.id();
    let mut remaining: BTreeMap<SctId, ReferenceSetMember> = previous
        .map(|p| p.lang_refset_members.clone())
        .unwrap_or_default();
    let mut to_persist = Vec::new();
    let mut members = BTreeMap::new();

    for (refset_id, value) in &description.acceptability_map {
        let acceptability = Acceptability::from_name(value).ok_or_else(|| {
            AuthoringError::Validation(format!("Acceptability value not recognised '{value}'."))
        })?;
        let mut member = ReferenceSetMember::language(*refset_id, description_id, acceptability.to_id());
        member.concept_id = Some(concept_id);
        match remaining.remove(refset_id) {
            Some(existing) => {
                member.member_id = existing.member_id.clone();
                member.module_id = existing.module_id;
                detect_change(&mut member, Some(&existing), rebase);
            }
            None => {
                member.member_id = Some(IdentifierService::new_member_id());
                member.changed = true;
            }
        }
        if member.changed {
            to_persist.push(member.clone());
        }
        members.insert(*refset_id, member);
    }
    for member in remaining.into_values() {
        to_persist.extend(retire_member(member));
    }
    description.lang_refset_members = members;
    Ok(to_persist)
}

/// A member that is no longer wanted: released ones are inactivated, others deleted.
fn retire_member(mut member: ReferenceSetMember) -> Option<ReferenceSetMember> {
    if member.is_released() {
        if !member.active {
            return None;
        }
        member.active = false;
        member.update_effective_time();
        member.changed = true;
    } else {
        member.deleted = true;
    }
    Some(member)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snomed_store::MAIN;
    use snomed_types::{well_known, CharacteristicType};

    const ROOT: SctId = well_known::SNOMED_CT_ROOT;

    fn make_service() -> ConceptService {
        let store = VersionedStore::default();
        store.create_branch(MAIN).unwrap();
        let config = AuthoringConfig::default();
        let identifiers = IdentifierService::new(store.clone(), &config);
        let service = ConceptService::new(store, identifiers, config);
        service
            .create(
                Concept::new(ROOT).with_description(Description::new("SNOMED CT Concept (SNOMED RT+CTV3)").fsn()),
                MAIN,
            )
            .unwrap();
        service
    }

    fn make_concept(term: &str) -> Concept {
        Concept::unidentified()
            .with_description(Description::new(format!("{term} (disorder)")).fsn())
            .with_description(
                Description::new(term).acceptable_in(well_known::US_EN_LANG_REFSET, Acceptability::Preferred),
            )
            .with_relationship(Relationship::is_a(ROOT))
    }

    fn members_of(service: &ConceptService, description_id: SctId) -> Vec<ReferenceSetMember> {
        let criteria = service.store().branch_criteria(MAIN).unwrap();
        service
            .store()
            .search_entities(&criteria, |m: &ReferenceSetMember| m.referenced_component_id == description_id)
    }

    #[test]
    fn test_create_mints_ids_and_fills_minis() {
        let service = make_service();
        let concept = service.create(make_concept("Heart attack"), MAIN).unwrap();

        assert_eq!(partition_of(concept.id()), Some(Partition::Concept));
        assert_eq!(concept.descriptions.len(), 2);
        let fsn = concept.descriptions.iter().find(|d| d.is_fsn()).unwrap();
        assert_eq!(partition_of(fsn.id()), Some(Partition::Description));
        assert_eq!(fsn.concept_id, Some(concept.id()));
        assert_eq!(fsn.lang_refset_members.len(), 2);
        assert!(fsn.lang_refset_members.values().all(|m| uuid::Uuid::parse_str(m.id()).is_ok()));

        let relationship = &concept.relationships[0];
        assert_eq!(relationship.source_id, Some(concept.id()));
        assert_eq!(partition_of(relationship.id()), Some(Partition::Relationship));
        let target = relationship.target.as_ref().unwrap();
        assert_eq!(target.fsn.as_deref(), Some("SNOMED CT Concept (SNOMED RT+CTV3)"));

        let loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        let synonym = loaded.descriptions.iter().find(|d| !d.is_fsn()).unwrap();
        assert!(synonym.is_preferred_synonym_in(well_known::US_EN_LANG_REFSET));
        assert_eq!(members_of(&service, synonym.id()).len(), 1);
    }

    #[test]
    fn test_unchanged_update_writes_nothing() {
        let service = make_service();
        let concept = service.create(make_concept("Asthma"), MAIN).unwrap();
        let sizes = |s: &ConceptService| {
            [Concept::KIND, Description::KIND, Relationship::KIND, ReferenceSetMember::KIND]
                .map(|kind| s.store().table_size(kind))
        };
        let before = sizes(&service);

        let loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        service.update(loaded, MAIN).unwrap();
        assert_eq!(sizes(&service), before);
    }

    #[test]
    fn test_term_edit_writes_one_description_version() {
        let service = make_service();
        let concept = service
            .create(make_concept("Migraine").with_description(Description::new("Hemicrania")), MAIN)
            .unwrap();
        let visible = |s: &ConceptService| {
            let criteria = s.store().branch_criteria(MAIN).unwrap();
            s.store()
                .search(&criteria, |d: &Description| d.concept_id == Some(concept.id()))
                .into_iter()
                .map(|v| (v.entity.id(), v.internal_id))
                .collect::<BTreeMap<SctId, u64>>()
        };
        let before = visible(&service);
        assert_eq!(before.len(), 3);
        let descriptions_before = service.store().table_size(Description::KIND);
        let members_before = service.store().table_size(ReferenceSetMember::KIND);

        let mut loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        let edited = loaded
            .descriptions
            .iter_mut()
            .find(|d| d.term == "Hemicrania")
            .unwrap();
        edited.term = "Hemicrania (migraine)".to_string();
        let edited_id = edited.id();
        service.update(loaded, MAIN).unwrap();

        assert_eq!(service.store().table_size(Description::KIND), descriptions_before + 1);
        assert_eq!(service.store().table_size(ReferenceSetMember::KIND), members_before);
        let after = visible(&service);
        assert_eq!(after.len(), 3);
        let untouched: Vec<SctId> = before
            .iter()
            .filter(|(id, internal_id)| after.get(*id) == Some(*internal_id))
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(untouched.len(), 2);
        assert!(!untouched.contains(&edited_id));
    }

    #[test]
    fn test_release_metadata_round_trip() {
        let service = make_service();
        let concept = service.create(make_concept("Fracture"), MAIN).unwrap();
        service.release_concept(concept.id(), MAIN, 20200131).unwrap();

        let mut loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        assert_eq!(loaded.release.effective_time, Some(20200131));
        loaded.definition_status_id = snomed_types::DefinitionStatus::FULLY_DEFINED_ID;
        let edited = service.update(loaded, MAIN).unwrap();
        assert_eq!(edited.release.effective_time, None);
        assert_eq!(edited.descriptions[0].release.effective_time, Some(20200131));

        let mut reverted = service.find(concept.id(), MAIN).unwrap().unwrap();
        reverted.definition_status_id = snomed_types::DefinitionStatus::PRIMITIVE_ID;
        let reverted = service.update(reverted, MAIN).unwrap();
        assert_eq!(reverted.release.effective_time, Some(20200131));
    }

    #[test]
    fn test_inactivation_inactivates_relationships() {
        let service = make_service();
        let mut concept = service.create(make_concept("Sprain"), MAIN).unwrap();
        concept.active = false;
        let updated = service.update(concept, MAIN).unwrap();
        assert!(updated.relationships.iter().all(|r| !r.active));
    }

    #[test]
    fn test_removed_components_are_deleted_or_retired() {
        let service = make_service();
        let concept = service.create(make_concept("Burn"), MAIN).unwrap();
        service.release_concept(concept.id(), MAIN, 20210131).unwrap();

        let mut loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        let synonym = loaded.descriptions.iter().find(|d| !d.is_fsn()).unwrap().id();
        loaded.descriptions.retain(|d| d.id() != synonym);
        loaded.relationships.clear();
        let updated = service.update(loaded, MAIN).unwrap();

        assert_eq!(updated.descriptions.len(), 1);
        assert!(updated.relationships.is_empty());
        let members = members_of(&service, synonym);
        assert_eq!(members.len(), 1);
        assert!(!members[0].active);
        assert_eq!(members[0].release.effective_time, None);
    }

    #[test]
    fn test_acceptability_change_reuses_member() {
        let service = make_service();
        let concept = service.create(make_concept("Cough"), MAIN).unwrap();
        let mut loaded = service.find(concept.id(), MAIN).unwrap().unwrap();
        let synonym = loaded.descriptions.iter_mut().find(|d| !d.is_fsn()).unwrap();
        let member_id = synonym.lang_refset_members[&well_known::US_EN_LANG_REFSET].member_id.clone();
        synonym
            .acceptability_map
            .insert(well_known::US_EN_LANG_REFSET, "ACCEPTABLE".to_string());
        let synonym_id = synonym.id();
        service.update(loaded, MAIN).unwrap();

        let members = members_of(&service, synonym_id);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, member_id);
        assert_eq!(members[0].acceptability_id(), Some(Acceptability::ACCEPTABLE_ID));
    }

    #[test]
    fn test_unrecognised_acceptability_rolls_back() {
        let service = make_service();
        let mut concept = make_concept("Wheeze");
        concept.descriptions[1]
            .acceptability_map
            .insert(well_known::GB_EN_LANG_REFSET, "MAYBE".to_string());
        let err = service.create(concept, MAIN).unwrap_err();
        assert_eq!(err.to_string(), "Acceptability value not recognised 'MAYBE'.");
        assert_eq!(service.store().table_size(Concept::KIND), 1);
        assert!(!service.store().find_branch(MAIN).unwrap().locked);
    }

    #[test]
    fn test_create_and_update_preconditions() {
        let service = make_service();
        let err = service.create(Concept::new(ROOT), MAIN).unwrap_err();
        assert!(matches!(err, AuthoringError::Validation(_)));

        let err = service.update(Concept::new(73211009), MAIN).unwrap_err();
        assert!(matches!(err, AuthoringError::NotFound(_)));
        assert_eq!(
            service.non_existent_concepts(&[ROOT, 73211009], MAIN).unwrap(),
            BTreeSet::from([73211009])
        );
    }

    #[test]
    fn test_delete_released_concept_needs_force() {
        let service = make_service();
        let concept = service.create(make_concept("Rash"), MAIN).unwrap();
        service.release_concept(concept.id(), MAIN, 20220131).unwrap();

        let err = service.delete_concept_and_components(concept.id(), MAIN, false).unwrap_err();
        assert_eq!(err.to_string(), "Released concept will not be deleted.");

        service.delete_concept_and_components(concept.id(), MAIN, true).unwrap();
        assert!(!service.exists(concept.id(), MAIN).unwrap());
        let fsn = concept.descriptions.iter().find(|d| d.is_fsn()).unwrap().id();
        assert!(members_of(&service, fsn).is_empty());

        let err = service.delete_concept_and_components(concept.id(), MAIN, false).unwrap_err();
        assert_eq!(err.to_string(), format!("Concept {} not found.", concept.id()));
    }

    #[test]
    fn test_member_batch_fills_owning_concept() {
        let service = make_service();
        let concept = service.create(make_concept("Fever"), MAIN).unwrap();
        let description_id = concept.descriptions[0].id();

        let mut known = ReferenceSetMember::language(
            well_known::GB_EN_LANG_REFSET,
            description_id,
            Acceptability::ACCEPTABLE_ID,
        );
        known.member_id = Some(IdentifierService::new_member_id());
        known.changed = true;
        let mut unknown = known.clone();
        unknown.member_id = Some(IdentifierService::new_member_id());
        unknown.referenced_component_id = 999_999_011;

        let commit = service.store().open_commit(MAIN).unwrap();
        let saved = service
            .save_batch_components(ComponentBatch::Members(vec![known.clone(), unknown]), &commit)
            .unwrap();
        commit.complete().unwrap();
        assert_eq!(saved, 2);

        let criteria = service.store().branch_criteria(MAIN).unwrap();
        let stored: Vec<ReferenceSetMember> = service
            .store()
            .search_by_ids(&criteria, &[known.id().to_string()])
            .unwrap();
        assert_eq!(stored[0].concept_id, Some(concept.id()));
    }

    #[test]
    fn test_minis_prefer_first_dialect_with_a_preferred_term() {
        let service = make_service();
        let mut concept = make_concept("Tumour");
        concept.descriptions[1].acceptability_map.clear();
        concept.descriptions[1]
            .acceptability_map
            .insert(well_known::GB_EN_LANG_REFSET, "PREFERRED".to_string());
        let mut inferred = Relationship::is_a(ROOT);
        inferred.characteristic_type_id = CharacteristicType::INFERRED_ID;
        concept.relationships.push(inferred);
        let concept = service.create(concept, MAIN).unwrap();

        let criteria = service.store().branch_criteria(MAIN).unwrap();
        let minis = service
            .find_concept_minis(&criteria, &BTreeSet::from([concept.id(), 12345]))
            .unwrap();
        assert_eq!(minis[&concept.id()].pt.as_deref(), Some("Tumour"));
        assert_eq!(minis[&12345], ConceptMini::new(12345));
    }
}
