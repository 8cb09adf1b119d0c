//! Relationship component.

use crate::component::{flag, id_field};
use crate::{
    well_known, CharacteristicType, ConceptMini, ModifierType, ReleaseDetails, SctId,
    SnomedComponent,
};

/// An attribute of the source concept pointing at a destination concept.
///
/// `type_mini` and `target` are response-only summaries filled in after a
/// save; they are never stored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relationship {
    /// Relationship id, minted on first save when absent.
    pub relationship_id: Option<SctId>,
    /// Source concept.
    pub source_id: Option<SctId>,
    /// Whether the relationship is active.
    pub active: bool,
    /// Owning module.
    pub module_id: SctId,
    /// Destination concept.
    pub destination_id: SctId,
    /// Role group, zero when ungrouped.
    pub relationship_group: u16,
    /// Attribute type, e.g. is-a.
    pub type_id: SctId,
    /// Stated, inferred or additional.
    pub characteristic_type_id: SctId,
    /// Existential or universal.
    pub modifier_id: SctId,
    /// Publication state.
    pub release: ReleaseDetails,
    /// Summary of the attribute type.
    #[cfg_attr(feature = "serde", serde(default))]
    pub type_mini: Option<ConceptMini>,
    /// Summary of the destination.
    #[cfg_attr(feature = "serde", serde(default))]
    pub target: Option<ConceptMini>,
    /// Set by change detection when this version must be written.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub changed: bool,
    /// Set when the relationship is to be removed.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deleted: bool,
}

impl Relationship {
    /// Creates an active stated relationship.
    pub fn new(type_id: SctId, destination_id: SctId) -> Self {
        Self {
            relationship_id: None,
            source_id: None,
            active: true,
            module_id: well_known::SNOMED_CT_CORE_MODULE,
            destination_id,
            relationship_group: 0,
            type_id,
            characteristic_type_id: CharacteristicType::STATED_ID,
            modifier_id: ModifierType::EXISTENTIAL_ID,
            release: ReleaseDetails::default(),
            type_mini: None,
            target: None,
            changed: false,
            deleted: false,
        }
    }

    /// Creates a stated is-a relationship to `parent_id`.
    pub fn is_a(parent_id: SctId) -> Self {
        Self::new(well_known::IS_A, parent_id)
    }

    /// Sets the relationship id.
    pub fn with_id(mut self, relationship_id: SctId) -> Self {
        self.relationship_id = Some(relationship_id);
        self
    }

    /// Sets the characteristic type.
    pub fn with_characteristic_type(mut self, characteristic_type: CharacteristicType) -> Self {
        self.characteristic_type_id = characteristic_type.to_id();
        self
    }

    /// Relationship id, or zero for a relationship that has not been saved.
    pub fn id(&self) -> SctId {
        self.relationship_id.unwrap_or_default()
    }

    /// Whether this is an is-a relationship.
    pub fn is_is_a(&self) -> bool {
        self.type_id == well_known::IS_A
    }

    /// Characteristic type enum value.
    pub fn characteristic_type(&self) -> Option<CharacteristicType> {
        CharacteristicType::from_id(self.characteristic_type_id)
    }

    /// Whether the relationship is inferred or additional.
    pub fn is_classifier_output(&self) -> bool {
        self.characteristic_type_id != CharacteristicType::STATED_ID
    }
}

impl SnomedComponent for Relationship {
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
            id_field(self.destination_id),
            self.relationship_group.to_string(),
            id_field(self.type_id),
            id_field(self.characteristic_type_id),
            id_field(self.modifier_id),
        ]
    }
}
