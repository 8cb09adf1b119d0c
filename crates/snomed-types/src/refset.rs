//! Reference set member component.

use std::collections::BTreeMap;

use crate::component::{flag, id_field};
use crate::{well_known, ReleaseDetails, SctId, SnomedComponent};

/// Membership of a component in a reference set.
///
/// Refset-specific columns live in `additional_fields`; a language reference
/// set member carries `acceptabilityId` there. `concept_id` is the concept
/// that owns the referenced component, when there is one.
///
/// # Examples
///
/// ```
/// use snomed_types::{well_known, Acceptability, ReferenceSetMember};
///
/// let member = ReferenceSetMember::language(
///     well_known::US_EN_LANG_REFSET,
///     121589010,
///     Acceptability::PREFERRED_ID,
/// );
/// assert_eq!(member.acceptability_id(), Some(Acceptability::PREFERRED_ID));
/// assert!(member.member_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReferenceSetMember {
    /// UUID, assigned on creation.
    pub member_id: Option<String>,
    /// Whether the membership is active.
    pub active: bool,
    /// Owning module.
    pub module_id: SctId,
    /// Reference set this member belongs to.
    pub refset_id: SctId,
    /// Component that is a member.
    pub referenced_component_id: SctId,
    /// Concept owning the referenced component.
    pub concept_id: Option<SctId>,
    /// Refset-specific columns.
    #[cfg_attr(feature = "serde", serde(default))]
    pub additional_fields: BTreeMap<String, String>,
    /// Publication state.
    pub release: ReleaseDetails,
    /// Set by change detection when this version must be written.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub changed: bool,
    /// Set when the member is to be removed.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deleted: bool,
}

impl ReferenceSetMember {
    /// Creates an active member in the core module.
    pub fn new(refset_id: SctId, referenced_component_id: SctId) -> Self {
        Self {
            member_id: None,
            active: true,
            module_id: well_known::SNOMED_CT_CORE_MODULE,
            refset_id,
            referenced_component_id,
            concept_id: None,
            additional_fields: BTreeMap::new(),
            release: ReleaseDetails::default(),
            changed: false,
            deleted: false,
        }
    }

    /// Creates a language reference set member for a description.
    pub fn language(refset_id: SctId, description_id: SctId, acceptability_id: SctId) -> Self {
        let mut member = Self::new(refset_id, description_id);
        member.set_additional_field(well_known::ACCEPTABILITY_ID_FIELD, acceptability_id.to_string());
        member
    }

    /// Sets a refset-specific column.
    pub fn set_additional_field(&mut self, name: &str, value: impl Into<String>) {
        self.additional_fields.insert(name.to_string(), value.into());
    }

    /// Reads a refset-specific column.
    pub fn additional_field(&self, name: &str) -> Option<&str> {
        self.additional_fields.get(name).map(String::as_str)
    }

    /// Acceptability of a language member.
    pub fn acceptability_id(&self) -> Option<SctId> {
        self.additional_field(well_known::ACCEPTABILITY_ID_FIELD)
            .and_then(|v| v.parse().ok())
    }

    /// Member id, or the empty string for a member that has not been saved.
    pub fn id(&self) -> &str {
        self.member_id.as_deref().unwrap_or_default()
    }
}

impl SnomedComponent for ReferenceSetMember {
    fn release_details(&self) -> &ReleaseDetails {
        &self.release
    }

    fn release_details_mut(&mut self) -> &mut ReleaseDetails {
        &mut self.release
    }

    fn release_hash_fields(&self) -> Vec<String> {
        let mut fields = vec![flag(self.active), id_field(self.module_id)];
        fields.extend(
            self.additional_fields
                .iter()
                .map(|(name, value)| format!("{name}={value}")),
        );
        fields
    }
}
