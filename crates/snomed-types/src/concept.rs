//! Concept document and its summary form.

use crate::component::{flag, id_field};
use crate::{
    well_known, DefinitionStatus, Description, ReleaseDetails, Relationship, SctId,
    SnomedComponent,
};

/// A concept together with the descriptions and relationships it owns.
///
/// Stored concept rows never carry their children: the commit engine takes
/// them out with [`Concept::detach_components`] and persists each type as its
/// own batch.
///
/// # Examples
///
/// ```
/// use snomed_types::{well_known, Concept, Relationship};
///
/// let concept = Concept::new(73211009)
///     .with_relationship(Relationship::is_a(64572001));
///
/// assert!(concept.is_primitive());
/// assert_eq!(concept.relationships[0].type_id, well_known::IS_A);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Concept {
    /// Concept id, minted on first save when absent.
    pub concept_id: Option<SctId>,
    /// Whether the concept is active.
    pub active: bool,
    /// Owning module.
    pub module_id: SctId,
    /// Primitive or fully defined.
    pub definition_status_id: SctId,
    /// Publication state.
    pub release: ReleaseDetails,
    /// Owned descriptions.
    #[cfg_attr(feature = "serde", serde(default))]
    pub descriptions: Vec<Description>,
    /// Owned relationships (this concept is their source).
    #[cfg_attr(feature = "serde", serde(default))]
    pub relationships: Vec<Relationship>,
    /// Set by change detection when this version must be written.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub changed: bool,
    /// Set when this concept is to be removed from the branch.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deleted: bool,
}

impl Concept {
    /// Creates an active primitive concept in the core module.
    pub fn new(concept_id: SctId) -> Self {
        Self {
            concept_id: Some(concept_id),
            ..Self::unidentified()
        }
    }

    /// Creates a concept without an id, to be minted when saved.
    pub fn unidentified() -> Self {
        Self {
            concept_id: None,
            active: true,
            module_id: well_known::SNOMED_CT_CORE_MODULE,
            definition_status_id: DefinitionStatus::PRIMITIVE_ID,
            release: ReleaseDetails::default(),
            descriptions: Vec::new(),
            relationships: Vec::new(),
            changed: false,
            deleted: false,
        }
    }

    /// Adds a description.
    pub fn with_description(mut self, description: Description) -> Self {
        self.descriptions.push(description);
        self
    }

    /// Adds a relationship.
    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Concept id, or zero for a concept that has not been saved.
    pub fn id(&self) -> SctId {
        self.concept_id.unwrap_or_default()
    }

    /// Returns the definition status enum value.
    pub fn definition_status(&self) -> Option<DefinitionStatus> {
        DefinitionStatus::from_id(self.definition_status_id)
    }

    /// Returns true if this concept is primitively defined.
    pub fn is_primitive(&self) -> bool {
        self.definition_status_id == DefinitionStatus::PRIMITIVE_ID
    }

    /// Moves the owned components out, leaving the concept row bare.
    pub fn detach_components(&mut self) -> (Vec<Description>, Vec<Relationship>) {
        (
            std::mem::take(&mut self.descriptions),
            std::mem::take(&mut self.relationships),
        )
    }

    /// Puts detached components back.
    pub fn attach_components(
        &mut self,
        descriptions: Vec<Description>,
        relationships: Vec<Relationship>,
    ) {
        self.descriptions = descriptions;
        self.relationships = relationships;
    }

    /// Finds an owned description by id.
    pub fn description(&self, description_id: SctId) -> Option<&Description> {
        self.descriptions
            .iter()
            .find(|d| d.description_id == Some(description_id))
    }

    /// Finds an owned relationship by id.
    pub fn relationship(&self, relationship_id: SctId) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.relationship_id == Some(relationship_id))
    }

    /// Active parents in the hierarchy formed by the given characteristic types.
    pub fn parent_ids(&self, characteristic_type_ids: &[SctId]) -> Vec<SctId> {
        self.relationships
            .iter()
            .filter(|r| {
                r.active
                    && r.type_id == well_known::IS_A
                    && characteristic_type_ids.contains(&r.characteristic_type_id)
            })
            .map(|r| r.destination_id)
            .collect()
    }

    /// Summary of this concept using its own descriptions.
    pub fn to_mini(&self, language_refset_id: SctId) -> ConceptMini {
        ConceptMini {
            concept_id: self.id(),
            definition_status_id: Some(self.definition_status_id),
            fsn: self
                .descriptions
                .iter()
                .find(|d| d.active && d.is_fsn())
                .map(|d| d.term.clone()),
            pt: self
                .descriptions
                .iter()
                .find(|d| d.active && d.is_preferred_synonym_in(language_refset_id))
                .map(|d| d.term.clone()),
        }
    }
}

impl SnomedComponent for Concept {
    fn release_details(&self) -> &ReleaseDetails {
        &self.release
    }

    fn release_details_mut(&mut self) -> &mut ReleaseDetails {
        &mut self.release
    }

    fn release_hash_fields(&self) -> Vec<String> {
        vec![
            flag(self.active),
            id_field(self.module_id),
            id_field(self.definition_status_id),
        ]
    }
}

/// Concept summary used when rendering relationship types and targets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConceptMini {
    /// Concept id.
    pub concept_id: SctId,
    /// Definition status, when the concept was found.
    pub definition_status_id: Option<SctId>,
    /// Active fully specified name.
    pub fsn: Option<String>,
    /// Preferred synonym.
    pub pt: Option<String>,
}

impl ConceptMini {
    /// A summary carrying only the id.
    pub fn new(concept_id: SctId) -> Self {
        Self {
            concept_id,
            definition_status_id: None,
            fsn: None,
            pt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Acceptability, CharacteristicType};

    fn make_concept() -> Concept {
        Concept::new(73211009)
            .with_description(Description::new("Diabetes mellitus (disorder)").fsn())
            .with_description(
                Description::new("Diabetes mellitus")
                    .acceptable_in(well_known::US_EN_LANG_REFSET, Acceptability::Preferred),
            )
            .with_relationship(Relationship::is_a(64572001))
    }

    #[test]
    fn test_detach_and_attach_components() {
        let mut concept = make_concept();
        let (descriptions, relationships) = concept.detach_components();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(relationships.len(), 1);
        assert!(concept.descriptions.is_empty());
        assert!(concept.relationships.is_empty());

        concept.attach_components(descriptions, relationships);
        assert_eq!(concept.descriptions.len(), 2);
    }

    #[test]
    fn test_parent_ids_by_form() {
        let mut concept = make_concept();
        let mut inferred = Relationship::is_a(404684003);
        inferred.characteristic_type_id = CharacteristicType::INFERRED_ID;
        concept.relationships.push(inferred);

        assert_eq!(
            concept.parent_ids(&[CharacteristicType::STATED_ID]),
            vec![64572001]
        );
        assert_eq!(
            concept.parent_ids(&[CharacteristicType::INFERRED_ID]),
            vec![404684003]
        );
    }

    #[test]
    fn test_to_mini_uses_fsn_and_preferred_term() {
        let mini = make_concept().to_mini(well_known::US_EN_LANG_REFSET);
        assert_eq!(mini.concept_id, 73211009);
        assert_eq!(mini.fsn.as_deref(), Some("Diabetes mellitus (disorder)"));
        assert_eq!(mini.pt.as_deref(), Some("Diabetes mellitus"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_skips_change_flags() {
        let mut concept = make_concept();
        concept.changed = true;
        let json = serde_json::to_string(&concept).unwrap();
        let parsed: Concept = serde_json::from_str(&json).unwrap();
        assert!(!parsed.changed);
        assert_eq!(parsed.descriptions.len(), 2);
        assert_eq!(parsed.concept_id, Some(73211009));
    }
}
