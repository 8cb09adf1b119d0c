//! Description component.

use std::collections::BTreeMap;

use crate::component::{flag, id_field};
use crate::{
    well_known, Acceptability, CaseSignificance, DescriptionType, ReferenceSetMember,
    ReleaseDetails, SctId, SnomedComponent,
};

/// A term attached to a concept.
///
/// Acceptability is supplied by authors as `acceptability_map` (language
/// reference set id to `PREFERRED` or `ACCEPTABLE`); the stored language
/// reference set members are loaded into `lang_refset_members`.
///
/// # Examples
///
/// ```
/// use snomed_types::{well_known, Acceptability, Description};
///
/// let description = Description::new("Heart attack")
///     .acceptable_in(well_known::US_EN_LANG_REFSET, Acceptability::Acceptable);
///
/// assert!(!description.is_fsn());
/// assert_eq!(
///     description.acceptability_map[&well_known::US_EN_LANG_REFSET],
///     "ACCEPTABLE"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Description {
    /// Description id, minted on first save when absent.
    pub description_id: Option<SctId>,
    /// Owning concept.
    pub concept_id: Option<SctId>,
    /// Whether the description is active.
    pub active: bool,
    /// Owning module.
    pub module_id: SctId,
    /// Language code, e.g. `en`.
    pub language_code: String,
    /// FSN, synonym or definition.
    pub type_id: SctId,
    /// The term text.
    pub term: String,
    /// Case significance of the term.
    pub case_significance_id: SctId,
    /// Publication state.
    pub release: ReleaseDetails,
    /// Requested acceptability per language reference set.
    #[cfg_attr(feature = "serde", serde(default))]
    pub acceptability_map: BTreeMap<SctId, String>,
    /// Stored language reference set members keyed by reference set id.
    #[cfg_attr(feature = "serde", serde(default))]
    pub lang_refset_members: BTreeMap<SctId, ReferenceSetMember>,
    /// Set by change detection when this version must be written.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub changed: bool,
    /// Set when the description is to be removed.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deleted: bool,
}

impl Description {
    /// Creates an active, case insensitive English synonym.
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            description_id: None,
            concept_id: None,
            active: true,
            module_id: well_known::SNOMED_CT_CORE_MODULE,
            language_code: well_known::DEFAULT_LANGUAGE_CODE.to_string(),
            type_id: DescriptionType::SYNONYM_ID,
            term: term.into(),
            case_significance_id: CaseSignificance::CASE_INSENSITIVE_ID,
            release: ReleaseDetails::default(),
            acceptability_map: BTreeMap::new(),
            lang_refset_members: BTreeMap::new(),
            changed: false,
            deleted: false,
        }
    }

    /// Sets the description id.
    pub fn with_id(mut self, description_id: SctId) -> Self {
        self.description_id = Some(description_id);
        self
    }

    /// Makes this a fully specified name, preferred in both English dialects.
    pub fn fsn(mut self) -> Self {
        self.type_id = DescriptionType::FSN_ID;
        self.acceptable_in(well_known::US_EN_LANG_REFSET, Acceptability::Preferred)
            .acceptable_in(well_known::GB_EN_LANG_REFSET, Acceptability::Preferred)
    }

    /// Requests the given acceptability in a language reference set.
    pub fn acceptable_in(mut self, language_refset_id: SctId, acceptability: Acceptability) -> Self {
        self.acceptability_map
            .insert(language_refset_id, acceptability.name().to_string());
        self
    }

    /// Description id, or zero for a description that has not been saved.
    pub fn id(&self) -> SctId {
        self.description_id.unwrap_or_default()
    }

    /// Whether this is a fully specified name.
    pub fn is_fsn(&self) -> bool {
        self.type_id == DescriptionType::FSN_ID
    }

    /// Acceptability in a language reference set, from the requested map or
    /// else from the active stored member.
    pub fn acceptability_in(&self, language_refset_id: SctId) -> Option<Acceptability> {
        if let Some(name) = self.acceptability_map.get(&language_refset_id) {
            return Acceptability::from_name(name);
        }
        self.lang_refset_members
            .get(&language_refset_id)
            .filter(|m| m.active)
            .and_then(|m| m.acceptability_id())
            .and_then(Acceptability::from_id)
    }

    /// Whether this is the preferred synonym in a dialect.
    pub fn is_preferred_synonym_in(&self, language_refset_id: SctId) -> bool {
        self.type_id == DescriptionType::SYNONYM_ID
            && self.acceptability_in(language_refset_id) == Some(Acceptability::Preferred)
    }
}

impl SnomedComponent for Description {
    fn release_details(&self) -> &ReleaseDetails {
        &self.release
    }

    fn release_details_mut(&mut self) -> &mut ReleaseDetails {
        &mut self.release
    }

    fn release_hash_fields(&self) -> Vec<String> {
        vec![
            flag(self.active),
            self.term.clone(),
            id_field(self.module_id),
            self.language_code.clone(),
            id_field(self.type_id),
            id_field(self.case_significance_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsn_is_preferred_in_both_dialects() {
        let fsn = Description::new("Diabetes mellitus (disorder)").fsn();
        assert!(fsn.is_fsn());
        assert_eq!(
            fsn.acceptability_in(well_known::GB_EN_LANG_REFSET),
            Some(Acceptability::Preferred)
        );
        assert!(!fsn.is_preferred_synonym_in(well_known::US_EN_LANG_REFSET));
    }

    #[test]
    fn test_acceptability_falls_back_to_active_member() {
        let mut description = Description::new("Diabetes").with_id(121589010);
        let member = ReferenceSetMember::language(
            well_known::GB_EN_LANG_REFSET,
            121589010,
            Acceptability::PREFERRED_ID,
        );
        description
            .lang_refset_members
            .insert(well_known::GB_EN_LANG_REFSET, member);

        assert!(description.is_preferred_synonym_in(well_known::GB_EN_LANG_REFSET));
        assert_eq!(description.acceptability_in(well_known::US_EN_LANG_REFSET), None);
    }

    #[test]
    fn test_term_change_is_a_component_change() {
        let existing = Description::new("Heart attack").with_id(37436014);
        let mut edited = existing.clone();
        edited.acceptability_map.clear();
        assert!(!edited.is_component_changed(Some(&existing)));
        edited.term = "Myocardial infarction".to_string();
        assert!(edited.is_component_changed(Some(&existing)));
    }
}
