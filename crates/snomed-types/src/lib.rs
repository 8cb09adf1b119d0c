//! # snomed-types
//!
//! Domain model for authoring SNOMED CT content.
//!
//! This crate provides the component documents the authoring engines read
//! and write: concepts with their descriptions and relationships, reference
//! set members, and the release metadata every component carries.
//!
//! ## Features
//!
//! - `serde` (default): Enables serialization/deserialization support via serde.
//!   Disable this feature for zero-dependency usage.
//!
//! ## Usage
//!
//! ```rust
//! use snomed_types::{well_known, Concept, Description, Relationship, SnomedComponent};
//!
//! let mut concept = Concept::new(73211009)
//!     .with_description(Description::new("Diabetes mellitus (disorder)").fsn())
//!     .with_relationship(Relationship::is_a(64572001));
//!
//! concept.release(20020131);
//! assert!(concept.is_released());
//! assert_eq!(concept.relationships[0].type_id, well_known::IS_A);
//! ```

#![warn(missing_docs)]

mod component;
mod concept;
mod description;
mod enums;
pub mod refset;
mod relationship;
mod sctid;
pub mod well_known;

// Re-export all public types at crate root
pub use component::{ComponentKind, ReleaseDetails, SnomedComponent};
pub use concept::{Concept, ConceptMini};
pub use description::Description;
pub use enums::{
    Acceptability, CaseSignificance, CharacteristicType, DefinitionStatus, DescriptionType, Form,
    ModifierType,
};
pub use refset::ReferenceSetMember;
pub use relationship::Relationship;
pub use sctid::{build_sctid, is_valid_sctid, partition_of, verhoeff_check_digit, Partition, SctId};
