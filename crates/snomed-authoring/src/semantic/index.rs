//! Maintenance of the stated and inferred semantic index.
//!
//! Each commit is inspected for is-a relationship changes. The part of the
//! existing hierarchy around the changed concepts is loaded from the index
//! as it was before the commit, the changed edges are replayed, and new rows
//! are written for every concept whose ancestors may have moved.

use std::collections::{BTreeMap, BTreeSet};

use snomed_store::{
    parent_path, BranchCriteria, Commit, CommitListener, CommitType, DomainEntity, StoreError,
    StoreResult, Version, VersionedStore, MAIN,
};
use snomed_types::{well_known, Concept, Form, Relationship, SctId};
use tracing::{debug, info, warn};

use super::graph::GraphBuilder;
use super::query_concept::QueryConcept;
use crate::config::AuthoringConfig;
use crate::error::{AuthoringError, AuthoringResult};

const SAVE_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    /// Changes within the open commit only.
    Incremental,
    /// Branch content replayed over the parent's index.
    BranchRebuild,
    /// Every row recomputed from all relationships.
    CompleteRebuild { dry_run: bool },
}

/// Keeps the semantic index in step with relationship changes.
#[derive(Debug, Clone)]
pub struct SemanticIndexService {
    store: VersionedStore,
    config: AuthoringConfig,
}

impl SemanticIndexService {
    /// Creates the service. Register it with
    /// [`VersionedStore::register_commit_listener`] to index every commit.
    pub fn new(store: VersionedStore, config: AuthoringConfig) -> Self {
        Self { store, config }
    }

    /// Rebuilds both forms of the index on a branch in a new commit.
    ///
    /// `MAIN` is recomputed from scratch and compared with the existing rows;
    /// other branches have their own rows replaced by a replay of their
    /// changes over the parent's index. Returns the rows written per form.
    /// The commit is rolled back when nothing changed or in dry run mode.
    pub fn rebuild_stated_and_inferred_semantic_index(
        &self,
        path: &str,
        dry_run: bool,
    ) -> AuthoringResult<BTreeMap<String, usize>> {
        if dry_run && path != MAIN {
            return Err(dry_run_error());
        }
        let commit = self.store.open_commit(path)?;
        let counts = self.rebuild(&commit, dry_run)?;
        if !dry_run && counts.values().any(|count| *count > 0) {
            commit.complete()?;
        } else {
            info!(
                "{} so rolling back the empty commit on {}.",
                if dry_run {
                    "Dry run mode"
                } else {
                    "No semantic changes required"
                },
                path
            );
        }
        Ok(counts)
    }

    fn rebuild(&self, commit: &Commit, dry_run: bool) -> AuthoringResult<BTreeMap<String, usize>> {
        let complete = commit.branch().path == MAIN;
        if !complete {
            if dry_run {
                return Err(dry_run_error());
            }
            self.remove_index_changes_on_branch(commit);
        }
        let mode = if complete {
            UpdateMode::CompleteRebuild { dry_run }
        } else {
            UpdateMode::BranchRebuild
        };
        let mut counts = BTreeMap::new();
        for form in Form::ALL {
            counts.insert(form.name().to_string(), self.update_semantic_index(form, commit, mode)?);
        }
        Ok(counts)
    }

    fn update_stated_and_inferred_semantic_index(&self, commit: &Commit) -> AuthoringResult<()> {
        match commit.commit_type() {
            CommitType::Rebase => {
                self.rebuild(commit, false)?;
            }
            CommitType::Content => {
                for form in Form::ALL {
                    self.update_semantic_index(form, commit, UpdateMode::Incremental)?;
                }
            }
            // Index rows are promoted with the rest of the content.
            CommitType::Promotion => {}
        }
        Ok(())
    }

    fn remove_index_changes_on_branch(&self, commit: &Commit) {
        let path = &commit.branch().path;
        let ids: Vec<String> = self
            .store
            .search_entities::<QueryConcept, _>(&self.store.changes_on_branch_criteria(path), |_| true)
            .iter()
            .map(<QueryConcept as DomainEntity>::entity_id)
            .collect();
        let ended = self.store.end_versions_on_this_branch::<QueryConcept>(commit, &ids);
        let restored = commit.branch().versions_replaced_for(QueryConcept::KIND).len();
        commit.reset_versions_replaced(QueryConcept::KIND);
        info!(
            "Ended {} semantic index rows on {} and restored visibility of {} rows from parents",
            ended, path, restored
        );
    }

    fn update_semantic_index(
        &self,
        form: Form,
        commit: &Commit,
        mode: UpdateMode,
    ) -> AuthoringResult<usize> {
        let path = commit.branch().path.clone();
        let stated = form.is_stated();

        let (previous, changes, replaced) = match mode {
            UpdateMode::Incremental => (
                self.store.branch_criteria_before_open_commit(commit)?,
                Some(self.store.changes_in_commit_criteria(commit)),
                commit.versions_replaced(Relationship::KIND),
            ),
            UpdateMode::BranchRebuild => {
                let parent = parent_path(&path).ok_or_else(|| {
                    AuthoringError::State(format!("Branch {path} has no parent to rebuild from."))
                })?;
                (
                    self.store
                        .branch_criteria_at_timepoint(parent, commit.branch().base)?,
                    Some(self.store.changes_on_branch_criteria(&path)),
                    commit
                        .merged_versions_replaced()
                        .remove(Relationship::KIND)
                        .unwrap_or_default(),
                )
            }
            UpdateMode::CompleteRebuild { .. } => (
                self.store.branch_criteria_before_open_commit(commit)?,
                None,
                BTreeSet::new(),
            ),
        };
        let new_state = self.store.branch_criteria_including_open_commit(commit)?;
        let complete = changes.is_none();

        let mut graph = GraphBuilder::new();
        let mut updated_sources = BTreeSet::new();
        let new_graph = match &changes {
            Some(changes) => {
                let (sources, destinations) = self.changed_is_a_edges(form, changes, &replaced);
                if sources.is_empty() {
                    info!("No {} changes found. Nothing to do.", form.name());
                    return Ok(0);
                }
                info!("Performing incremental update of {} semantic index on {}", form.name(), path);
                self.load_existing_graph(&mut graph, form, &previous, &sources, &destinations);
                let new_graph = graph.node_count() == 0;
                for source in &sources {
                    graph.clear_parents_and_mark_updated(*source);
                }
                updated_sources = sources;
                new_graph
            }
            None => {
                info!("Performing rebuild of {} semantic index on {}", form.name(), path);
                true
            }
        };

        let edges: Vec<Relationship> = self.store.search_entities(&new_state, |r: &Relationship| {
            r.active
                && r.is_is_a()
                && form.includes_characteristic_type(r.characteristic_type_id)
                && (complete || r.source_id.map_or(false, |s| updated_sources.contains(&s)))
        });
        for edge in &edges {
            if let Some(source) = edge.source_id {
                graph.add_parent(source, edge.destination_id);
            }
        }
        self.warn_inactive_or_missing(&new_state, &graph);

        let to_save: BTreeSet<SctId> = graph
            .nodes()
            .filter(|node| new_graph || graph.is_ancestor_or_self_updated(node.id, &path))
            .map(|node| node.id)
            .collect();
        let fail_on_loop = !commit.is_rebase();
        let timepoint = commit.timepoint();

        let existing: Vec<Version<QueryConcept>> = self.store.search(&previous, |q: &QueryConcept| {
            q.stated == stated && (complete || to_save.contains(&q.concept_id))
        });
        let mut rows = Vec::new();
        let mut not_found = to_save.clone();
        let (mut created, mut updated) = (0usize, 0usize);
        for version in existing {
            if version.path == path && version.end == Some(timepoint) {
                continue;
            }
            let mut row = version.entity;
            let concept_id = row.concept_id;
            not_found.remove(&concept_id);
            if to_save.contains(&concept_id) {
                let fresh = self.fresh_row(&mut graph, concept_id, form, &path, fail_on_loop)?;
                if !row.fields_match(&fresh) {
                    rows.push(fresh);
                    updated += 1;
                }
            } else if complete {
                row.mark_deleted();
                rows.push(row);
            }
        }
        for concept_id in not_found {
            rows.push(self.fresh_row(&mut graph, concept_id, form, &path, fail_on_loop)?);
            created += 1;
        }
        for row in &mut rows {
            if row.parents.is_empty() && row.concept_id != well_known::SNOMED_CT_ROOT {
                row.mark_deleted();
            }
        }
        let deleted = rows.iter().filter(|r| r.is_deleted()).count();

        info!(
            "Semantic index change summary for {} form on {}: {} concepts loaded into the graph, {} created, {} updated, {} deleted.",
            form.name(),
            path,
            graph.node_count(),
            created,
            updated,
            deleted
        );

        if rows.is_empty() {
            return Ok(0);
        }
        if matches!(mode, UpdateMode::CompleteRebuild { dry_run: true }) {
            info!("Semantic index rebuild is in dryRun mode so no changes will be persisted!");
        } else {
            for batch in rows.chunks(SAVE_BATCH_SIZE) {
                self.store.save_batch(commit, batch)?;
            }
        }
        debug!("{} rows written to the {} semantic index", rows.len(), form.name());
        Ok(rows.len())
    }

    fn fresh_row(
        &self,
        graph: &mut GraphBuilder,
        concept_id: SctId,
        form: Form,
        path: &str,
        fail_on_loop: bool,
    ) -> AuthoringResult<QueryConcept> {
        let parents = graph
            .node(concept_id)
            .map(|n| n.parents.clone())
            .unwrap_or_default();
        let ancestors = graph.transitive_closure(concept_id, path, fail_on_loop)?;
        Ok(QueryConcept::new(concept_id, form, parents, ancestors))
    }

    /// Sources and destinations of is-a edges of the form changed in scope or replaced.
    fn changed_is_a_edges(
        &self,
        form: Form,
        changes: &BranchCriteria,
        replaced: &BTreeSet<u64>,
    ) -> (BTreeSet<SctId>, BTreeSet<SctId>) {
        let in_form = |r: &Relationship| {
            r.is_is_a() && form.includes_characteristic_type(r.characteristic_type_id)
        };
        let mut edges: Vec<Relationship> = self.store.search_entities(changes, |r| in_form(r));
        edges.extend(
            self.store
                .find_by_internal_ids::<Relationship>(replaced)
                .into_iter()
                .map(Version::into_entity)
                .filter(|r| in_form(r)),
        );
        let mut sources = BTreeSet::new();
        let mut destinations = BTreeSet::new();
        for edge in edges {
            if let Some(source) = edge.source_id {
                sources.insert(source);
                destinations.insert(edge.destination_id);
            }
        }
        (sources, destinations)
    }

    /// Loads index rows around the changed edges into the graph.
    fn load_existing_graph(
        &self,
        graph: &mut GraphBuilder,
        form: Form,
        previous: &BranchCriteria,
        sources: &BTreeSet<SctId>,
        destinations: &BTreeSet<SctId>,
    ) {
        let stated = form.is_stated();
        let frontier: BTreeSet<SctId> = sources.union(destinations).copied().collect();

        let mut to_load = frontier.clone();
        let related: Vec<QueryConcept> = self.store.search_entities(previous, |q: &QueryConcept| {
            q.stated == stated
                && (frontier.contains(&q.concept_id) || !q.ancestors.is_disjoint(sources))
        });
        for row in &related {
            if frontier.contains(&row.concept_id) {
                to_load.extend(row.ancestors.iter().copied());
            }
            if !row.ancestors.is_disjoint(sources) {
                to_load.insert(row.concept_id);
            }
        }

        let mut alternative_ancestors = BTreeSet::new();
        let rows: Vec<QueryConcept> = self.store.search_entities(previous, |q: &QueryConcept| {
            q.stated == stated && to_load.contains(&q.concept_id)
        });
        for row in rows {
            for parent in &row.parents {
                graph.add_parent(row.concept_id, *parent);
            }
            alternative_ancestors.extend(row.ancestors.difference(&to_load).copied());
        }
        if !alternative_ancestors.is_empty() {
            let rows: Vec<QueryConcept> = self.store.search_entities(previous, |q: &QueryConcept| {
                q.stated == stated && alternative_ancestors.contains(&q.concept_id)
            });
            for row in rows {
                for parent in &row.parents {
                    graph.add_parent(row.concept_id, *parent);
                }
            }
        }
        info!(
            "{} existing nodes loaded, {} alternative ancestors.",
            graph.node_count(),
            alternative_ancestors.len()
        );
    }

    fn warn_inactive_or_missing(&self, criteria: &BranchCriteria, graph: &GraphBuilder) {
        let required: BTreeSet<SctId> = graph.nodes().map(|n| n.id).collect();
        let active: BTreeSet<SctId> = self
            .store
            .search_entities(criteria, |c: &Concept| {
                c.active && c.concept_id.map_or(false, |id| required.contains(&id))
            })
            .iter()
            .map(Concept::id)
            .collect();
        if active.len() < required.len() {
            let missing: Vec<SctId> = required.difference(&active).copied().collect();
            warn!(
                "The following concepts have been referred to in relationships but are missing or inactive: {:?}",
                missing
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════════

    fn find_row(&self, concept_id: SctId, path: &str, form: Form) -> AuthoringResult<QueryConcept> {
        let criteria = self.store.branch_criteria(path)?;
        self.store
            .search_by_ids::<QueryConcept>(&criteria, &[QueryConcept::id_for(concept_id, form)])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AuthoringError::NotFound(format!(
                    "Concept {} not found in the {} semantic index of {}.",
                    concept_id,
                    form.name(),
                    path
                ))
            })
    }

    /// All ancestors of a concept.
    pub fn find_ancestor_ids(&self, concept_id: SctId, path: &str, form: Form) -> AuthoringResult<BTreeSet<SctId>> {
        Ok(self.find_row(concept_id, path, form)?.ancestors)
    }

    /// Direct parents of a concept.
    pub fn find_parent_ids(&self, concept_id: SctId, path: &str, form: Form) -> AuthoringResult<BTreeSet<SctId>> {
        Ok(self.find_row(concept_id, path, form)?.parents)
    }

    /// All descendants of a concept.
    pub fn find_descendant_ids(&self, concept_id: SctId, path: &str, form: Form) -> AuthoringResult<BTreeSet<SctId>> {
        let criteria = self.store.branch_criteria(path)?;
        let stated = form.is_stated();
        Ok(self
            .store
            .search_entities(&criteria, |q: &QueryConcept| {
                q.stated == stated && q.ancestors.contains(&concept_id)
            })
            .into_iter()
            .map(|q| q.concept_id)
            .collect())
    }
}

impl CommitListener for SemanticIndexService {
    fn pre_commit_completion(&self, commit: &Commit) -> StoreResult<()> {
        if !self.config.semantic_indexing_enabled {
            debug!("Semantic indexing is disabled.");
            return Ok(());
        }
        self.update_stated_and_inferred_semantic_index(commit)
            .map_err(|err| StoreError::Listener(Box::new(err)))
    }
}

fn dry_run_error() -> AuthoringError {
    AuthoringError::Validation(
        "dryRun flag can only be used when rebuilding the index of the MAIN branch.".to_string(),
    )
}
