//! Versioned entities.

use crate::branch::Timepoint;

/// A document type the store can version.
///
/// `KIND` keys the entity's version table and its replaced-version sets on
/// branches. `entity_id` is the business id that versions of one entity
/// share across branches.
pub trait DomainEntity: Clone + Send + Sync + 'static {
    /// Type name.
    const KIND: &'static str;

    /// Business id.
    fn entity_id(&self) -> String;

    /// Whether this instance must be written by the next save.
    fn is_changed(&self) -> bool;

    /// Whether this instance must be removed by the next save.
    fn is_deleted(&self) -> bool;

    /// Sets the changed flag.
    fn set_changed(&mut self, changed: bool);

    /// The form written to the store, without transient or owned data.
    fn stored_form(&self) -> Self {
        let mut stored = self.clone();
        stored.set_changed(false);
        stored
    }
}

/// One stored version of an entity.
#[derive(Debug, Clone)]
pub struct Version<T> {
    /// Store-wide unique id of this version.
    pub internal_id: u64,
    /// Branch the version was written on.
    pub path: String,
    /// Commit that wrote the version.
    pub start: Timepoint,
    /// Commit that ended the version, `None` while current.
    pub end: Option<Timepoint>,
    /// The document.
    pub entity: T,
}

impl<T> Version<T> {
    /// Whether this version is live at `timepoint`.
    pub fn visible_at(&self, timepoint: Timepoint) -> bool {
        self.start <= timepoint && self.end.map_or(true, |end| end > timepoint)
    }

    /// Unwraps the document.
    pub fn into_entity(self) -> T {
        self.entity
    }
}
