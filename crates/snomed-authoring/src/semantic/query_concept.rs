//! Semantic index rows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use snomed_store::DomainEntity;
use snomed_types::{Form, SctId};

/// Parents and ancestors of a concept in one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConcept {
    /// Concept id.
    pub concept_id: SctId,
    /// Whether this row indexes the stated form.
    pub stated: bool,
    /// Direct parents.
    pub parents: BTreeSet<SctId>,
    /// All ancestors.
    pub ancestors: BTreeSet<SctId>,
    #[serde(skip)]
    pub(crate) changed: bool,
    #[serde(skip)]
    pub(crate) deleted: bool,
}

impl QueryConcept {
    /// Creates a row.
    pub fn new(
        concept_id: SctId,
        form: Form,
        parents: BTreeSet<SctId>,
        ancestors: BTreeSet<SctId>,
    ) -> Self {
        Self {
            concept_id,
            stated: form.is_stated(),
            parents,
            ancestors,
            changed: true,
            deleted: false,
        }
    }

    /// Business id of the row for a concept and form, e.g. `73211009_s`.
    pub fn id_for(concept_id: SctId, form: Form) -> String {
        format!("{}_{}", concept_id, if form.is_stated() { "s" } else { "i" })
    }

    /// Form indexed by this row.
    pub fn form(&self) -> Form {
        if self.stated {
            Form::Stated
        } else {
            Form::Inferred
        }
    }

    /// Whether the indexed content of two rows is the same.
    pub fn fields_match(&self, other: &QueryConcept) -> bool {
        self.concept_id == other.concept_id
            && self.stated == other.stated
            && self.parents == other.parents
            && self.ancestors == other.ancestors
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl DomainEntity for QueryConcept {
    const KIND: &'static str = "QueryConcept";

    fn entity_id(&self) -> String {
        Self::id_for(self.concept_id, self.form())
    }

    fn is_changed(&self) -> bool {
        self.changed
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }
}
