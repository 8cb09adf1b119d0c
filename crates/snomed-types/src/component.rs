//! Release metadata shared by every component type.
//!
//! A component that has been published carries the effective time of that
//! release and a hash of its comparable fields at the time. Editing it clears
//! the effective time, and reverting the edit restores it, because the hash
//! of the reverted fields matches again.

use crate::SctId;

/// Release state of a component.
///
/// # Examples
///
/// ```
/// use snomed_types::{Concept, SnomedComponent};
///
/// let mut concept = Concept::new(73211009);
/// concept.release(20020131);
/// assert_eq!(concept.release.effective_time, Some(20020131));
///
/// concept.active = false;
/// concept.update_effective_time();
/// assert_eq!(concept.release.effective_time, None);
///
/// concept.active = true;
/// concept.update_effective_time();
/// assert_eq!(concept.release.effective_time, Some(20020131));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReleaseDetails {
    /// Effective time (YYYYMMDD), absent while the component has unpublished changes.
    pub effective_time: Option<u32>,
    /// Whether any version of this component has been published.
    pub released: bool,
    /// Effective time of the last publication.
    pub released_effective_time: Option<u32>,
    /// Comparable fields at the time of the last publication.
    pub release_hash: Option<String>,
}

/// Behaviour shared by concepts, descriptions, relationships and members.
pub trait SnomedComponent {
    /// Release metadata of this component.
    fn release_details(&self) -> &ReleaseDetails;

    /// Mutable release metadata of this component.
    fn release_details_mut(&mut self) -> &mut ReleaseDetails;

    /// The fields whose change makes a new version of this component.
    fn release_hash_fields(&self) -> Vec<String>;

    /// Joins the comparable fields with `|`.
    fn build_release_hash(&self) -> String {
        self.release_hash_fields().join("|")
    }

    /// True when there is no existing version or its comparable fields differ.
    fn is_component_changed(&self, existing: Option<&Self>) -> bool
    where
        Self: Sized,
    {
        match existing {
            Some(existing) => self.build_release_hash() != existing.build_release_hash(),
            None => true,
        }
    }

    /// Marks the component as published at `effective_time`.
    fn release(&mut self, effective_time: u32) {
        let hash = self.build_release_hash();
        let details = self.release_details_mut();
        details.release_hash = Some(hash);
        details.effective_time = Some(effective_time);
        details.released_effective_time = Some(effective_time);
        details.released = true;
    }

    /// Restores the published effective time if the comparable fields match
    /// the published ones, otherwise clears it.
    fn update_effective_time(&mut self) {
        let hash = self.build_release_hash();
        let details = self.release_details_mut();
        if details.released && details.release_hash.as_deref() == Some(hash.as_str()) {
            details.effective_time = details.released_effective_time;
        } else {
            details.effective_time = None;
        }
    }

    /// Copies the publication state of `other`, leaving the effective time alone.
    fn copy_release_details(&mut self, other: &Self)
    where
        Self: Sized,
    {
        let source = other.release_details().clone();
        let details = self.release_details_mut();
        details.released = source.released;
        details.released_effective_time = source.released_effective_time;
        details.release_hash = source.release_hash;
    }

    /// Forgets any publication state.
    fn clear_release_details(&mut self) {
        *self.release_details_mut() = ReleaseDetails::default();
    }

    /// Whether any version has been published.
    fn is_released(&self) -> bool {
        self.release_details().released
    }
}

/// The four persisted component types, in the order a commit writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComponentKind {
    /// Concept rows.
    Concept,
    /// Description rows.
    Description,
    /// Relationship rows.
    Relationship,
    /// Reference set member rows.
    ReferenceSetMember,
}

impl ComponentKind {
    /// All kinds in write order.
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Concept,
        ComponentKind::Description,
        ComponentKind::Relationship,
        ComponentKind::ReferenceSetMember,
    ];

    /// Type name used to key version tables and replaced-version sets.
    pub fn name(self) -> &'static str {
        match self {
            Self::Concept => "Concept",
            Self::Description => "Description",
            Self::Relationship => "Relationship",
            Self::ReferenceSetMember => "ReferenceSetMember",
        }
    }
}

pub(crate) fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

pub(crate) fn id_field(value: SctId) -> String {
    value.to_string()
}
