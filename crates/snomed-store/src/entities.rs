//! Storage bindings for the component types.

use snomed_types::{ComponentKind, Concept, Description, ReferenceSetMember, Relationship};

use crate::entity::DomainEntity;

impl DomainEntity for Concept {
    const KIND: &'static str = "Concept";

    fn entity_id(&self) -> String {
        self.id().to_string()
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

    fn stored_form(&self) -> Self {
        Concept {
            descriptions: Vec::new(),
            relationships: Vec::new(),
            changed: false,
            deleted: false,
            ..self.clone()
        }
    }
}

impl DomainEntity for Description {
    const KIND: &'static str = "Description";

    fn entity_id(&self) -> String {
        self.id().to_string()
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

    // Acceptability is stored as language reference set members.
    fn stored_form(&self) -> Self {
        let mut stored = self.clone();
        stored.acceptability_map.clear();
        stored.lang_refset_members.clear();
        stored.changed = false;
        stored.deleted = false;
        stored
    }
}

impl DomainEntity for Relationship {
    const KIND: &'static str = "Relationship";

    fn entity_id(&self) -> String {
        self.id().to_string()
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

    fn stored_form(&self) -> Self {
        Relationship {
            type_mini: None,
            target: None,
            changed: false,
            deleted: false,
            ..self.clone()
        }
    }
}

impl DomainEntity for ReferenceSetMember {
    const KIND: &'static str = "ReferenceSetMember";

    fn entity_id(&self) -> String {
        self.id().to_string()
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

    fn stored_form(&self) -> Self {
        ReferenceSetMember {
            changed: false,
            deleted: false,
            ..self.clone()
        }
    }
}

/// Table name of a component kind.
pub fn kind_name(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Concept => Concept::KIND,
        ComponentKind::Description => Description::KIND,
        ComponentKind::Relationship => Relationship::KIND,
        ComponentKind::ReferenceSetMember => ReferenceSetMember::KIND,
    }
}
