//! Concept ids the authoring engines refer to by name.
//!
//! ```
//! use snomed_types::well_known;
//!
//! assert_eq!(well_known::IS_A, 116680003);
//! assert_eq!(well_known::SNOMED_CT_ROOT, 138875005);
//! ```

use crate::SctId;

// =============================================================================
// Hierarchy
// =============================================================================

/// SNOMED CT root concept (138875005).
///
/// The only concept allowed to have no parents in either form.
pub const SNOMED_CT_ROOT: SctId = 138875005;

/// Is a (attribute) - 116680003.
pub const IS_A: SctId = 116680003;

// =============================================================================
// Modules
// =============================================================================

/// SNOMED CT core module (900000000000207008).
pub const SNOMED_CT_CORE_MODULE: SctId = 900000000000207008;

/// SNOMED CT model component module (900000000000012004).
pub const SNOMED_CT_MODEL_COMPONENT_MODULE: SctId = 900000000000012004;

// =============================================================================
// Language Reference Sets
// =============================================================================

/// US English language reference set (900000000000509007).
pub const US_EN_LANG_REFSET: SctId = 900000000000509007;

/// GB English language reference set (900000000000508004).
pub const GB_EN_LANG_REFSET: SctId = 900000000000508004;

// =============================================================================
// Reference Set Member Fields
// =============================================================================

/// Additional field holding the acceptability of a language reference set member.
pub const ACCEPTABILITY_ID_FIELD: &str = "acceptabilityId";

/// Default language code for new descriptions.
pub const DEFAULT_LANGUAGE_CODE: &str = "en";
