//! Coded value enumerations.
//!
//! Every coded SNOMED CT attribute (definition status, description type,
//! characteristic type, ...) is stored on components as a raw [`SctId`]. The
//! enums here give those ids names and are used wherever the engines branch
//! on a code.

use crate::SctId;

/// Declares an enum whose variants map one-to-one onto concept ids.
macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $konst:ident ($id:expr) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            $(
                #[doc = concat!("Concept id of [`", stringify!($name), "::", stringify!($variant), "`].")]
                pub const $konst: SctId = $id;
            )+

            /// Looks up the variant coded by `id`.
            pub fn from_id(id: SctId) -> Option<Self> {
                match id {
                    $( Self::$konst => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// The concept id coding this variant.
            pub fn to_id(self) -> SctId {
                match self {
                    $( Self::$variant => Self::$konst, )+
                }
            }
        }
    };
}

coded_enum! {
    /// Definition status of a concept.
    ///
    /// ```
    /// use snomed_types::DefinitionStatus;
    ///
    /// assert_eq!(
    ///     DefinitionStatus::from_id(900000000000074008),
    ///     Some(DefinitionStatus::Primitive)
    /// );
    /// ```
    pub enum DefinitionStatus {
        /// Necessary conditions only.
        Primitive = PRIMITIVE_ID(900000000000074008),
        /// Necessary and sufficient conditions.
        FullyDefined = FULLY_DEFINED_ID(900000000000073002),
    }
}

coded_enum! {
    /// Type of a description.
    pub enum DescriptionType {
        /// Fully specified name.
        Fsn = FSN_ID(900000000000003001),
        /// Synonym.
        Synonym = SYNONYM_ID(900000000000013009),
        /// Text definition.
        Definition = DEFINITION_ID(900000000000550004),
    }
}

coded_enum! {
    /// Case significance of a description term.
    pub enum CaseSignificance {
        /// Whole term is case insensitive.
        CaseInsensitive = CASE_INSENSITIVE_ID(900000000000448009),
        /// Whole term is case sensitive.
        EntireTermCaseSensitive = ENTIRE_TERM_CASE_SENSITIVE_ID(900000000000017005),
        /// Only the first character is case sensitive.
        InitialCharacterCaseSensitive = INITIAL_CHAR_CASE_SENSITIVE_ID(900000000000020002),
    }
}

coded_enum! {
    /// Characteristic type of a relationship.
    ///
    /// ```
    /// use snomed_types::CharacteristicType;
    ///
    /// let inferred = CharacteristicType::from_id(900000000000011006).unwrap();
    /// assert_eq!(inferred, CharacteristicType::Inferred);
    /// assert_eq!(CharacteristicType::Stated.to_id(), 900000000000010007);
    /// ```
    pub enum CharacteristicType {
        /// Authored.
        Stated = STATED_ID(900000000000010007),
        /// Produced by the classifier.
        Inferred = INFERRED_ID(900000000000011006),
        /// Additional, neither stated nor inferred.
        Additional = ADDITIONAL_ID(900000000000227009),
    }
}

coded_enum! {
    /// Relationship modifier.
    pub enum ModifierType {
        /// Some.
        Existential = EXISTENTIAL_ID(900000000000451002),
        /// All.
        Universal = UNIVERSAL_ID(900000000000450001),
    }
}

coded_enum! {
    /// Acceptability of a description in a language reference set.
    pub enum Acceptability {
        /// Preferred term in the dialect.
        Preferred = PREFERRED_ID(900000000000548007),
        /// Acceptable synonym in the dialect.
        Acceptable = ACCEPTABLE_ID(900000000000549004),
    }
}

impl Acceptability {
    /// Parses the names used in description acceptability maps.
    ///
    /// ```
    /// use snomed_types::Acceptability;
    ///
    /// assert_eq!(Acceptability::from_name("PREFERRED"), Some(Acceptability::Preferred));
    /// assert_eq!(Acceptability::from_name("preferred"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PREFERRED" => Some(Self::Preferred),
            "ACCEPTABLE" => Some(Self::Acceptable),
            _ => None,
        }
    }

    /// The name used in description acceptability maps.
    pub fn name(self) -> &'static str {
        match self {
            Self::Preferred => "PREFERRED",
            Self::Acceptable => "ACCEPTABLE",
        }
    }
}

/// One of the two forms of the concept hierarchy.
///
/// The stated form is built from authored is-a relationships, the inferred
/// form from classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Form {
    /// Authored hierarchy.
    Stated,
    /// Classified hierarchy.
    Inferred,
}

impl Form {
    /// Both forms, stated first.
    pub const ALL: [Form; 2] = [Form::Stated, Form::Inferred];

    /// Lower case name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stated => "stated",
            Self::Inferred => "inferred",
        }
    }

    /// Whether this is the stated form.
    pub fn is_stated(self) -> bool {
        matches!(self, Self::Stated)
    }

    /// Characteristic types whose is-a relationships make up this form.
    ///
    /// Additional relationships are counted towards the inferred form.
    pub fn characteristic_type_ids(self) -> &'static [SctId] {
        match self {
            Self::Stated => &[CharacteristicType::STATED_ID],
            Self::Inferred => &[
                CharacteristicType::INFERRED_ID,
                CharacteristicType::ADDITIONAL_ID,
            ],
        }
    }

    /// Whether a relationship with the given characteristic type belongs to this form.
    pub fn includes_characteristic_type(self, characteristic_type_id: SctId) -> bool {
        self.characteristic_type_ids()
            .contains(&characteristic_type_id)
    }
}
