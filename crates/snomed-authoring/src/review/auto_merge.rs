//! Automatic merge of a concept changed on both sides of a rebase.

use snomed_types::{Concept, SnomedComponent};

/// Proposes a merge of the parent (`source`) and child (`target`) versions of a concept.
///
/// The parent version wins unless it is published and the child's is not.
/// Components start from the parent's; a child component with unpublished
/// changes replaces the parent's version when that one is published, and
/// child components the parent does not have are added.
pub fn auto_merge(source: &Concept, target: &Concept) -> Concept {
    let winner = if source.release.effective_time.is_some() && target.release.effective_time.is_none() {
        target
    } else {
        source
    };
    let mut merged = winner.clone();
    merged.attach_components(
        merge_components(&source.descriptions, &target.descriptions, |d| d.description_id),
        merge_components(&source.relationships, &target.relationships, |r| r.relationship_id),
    );
    merged
}

fn merge_components<C, K>(source: &[C], target: &[C], key: impl Fn(&C) -> K) -> Vec<C>
where
    C: SnomedComponent + Clone,
    K: PartialEq,
{
    let mut merged = source.to_vec();
    for component in target.iter().filter(|c| c.release_details().effective_time.is_none()) {
        match merged.iter().position(|existing| key(existing) == key(component)) {
            Some(index) => {
                if merged[index].release_details().effective_time.is_some() {
                    merged[index] = component.clone();
                }
            }
            None => merged.push(component.clone()),
        }
    }
    merged
}
