//! RF2 row bindings for the component types.
//!
//! Rows read from a release are published content, so each component is
//! marked released at its effective time.

use csv::StringRecord;
use snomed_types::{
    well_known, Concept, Description, ReferenceSetMember, Relationship, SnomedComponent,
};

use super::parser::{parse, parse::field, Rf2Record};
use crate::types::{Rf2Config, Rf2Result};

const CONCEPT_COLUMNS: &[&str] = &[
    "id",
    "effectiveTime",
    "active",
    "moduleId",
    "definitionStatusId",
];

const DESCRIPTION_COLUMNS: &[&str] = &[
    "id",
    "effectiveTime",
    "active",
    "moduleId",
    "conceptId",
    "languageCode",
    "typeId",
    "term",
    "caseSignificanceId",
];

const RELATIONSHIP_COLUMNS: &[&str] = &[
    "id",
    "effectiveTime",
    "active",
    "moduleId",
    "sourceId",
    "destinationId",
    "relationshipGroup",
    "typeId",
    "characteristicTypeId",
    "modifierId",
];

const LANGUAGE_MEMBER_COLUMNS: &[&str] = &[
    "id",
    "effectiveTime",
    "active",
    "moduleId",
    "refsetId",
    "referencedComponentId",
    "acceptabilityId",
];

impl Rf2Record for Concept {
    const EXPECTED_COLUMNS: &'static [&'static str] = CONCEPT_COLUMNS;

    fn from_record(record: &StringRecord) -> Rf2Result<Self> {
        let mut concept = Concept::new(parse::sctid(field(record, 0))?);
        concept.active = parse::boolean(field(record, 2))?;
        concept.module_id = parse::sctid(field(record, 3))?;
        concept.definition_status_id = parse::sctid(field(record, 4))?;
        concept.release(parse::effective_time(field(record, 1))?);
        Ok(concept)
    }

    fn passes_filter(&self, config: &Rf2Config) -> bool {
        !config.active_only || self.active
    }
}

impl Rf2Record for Description {
    const EXPECTED_COLUMNS: &'static [&'static str] = DESCRIPTION_COLUMNS;

    fn from_record(record: &StringRecord) -> Rf2Result<Self> {
        let mut description =
            Description::new(field(record, 7)).with_id(parse::sctid(field(record, 0))?);
        description.active = parse::boolean(field(record, 2))?;
        description.module_id = parse::sctid(field(record, 3))?;
        description.concept_id = Some(parse::sctid(field(record, 4))?);
        description.language_code = field(record, 5).to_string();
        description.type_id = parse::sctid(field(record, 6))?;
        description.case_significance_id = parse::sctid(field(record, 8))?;
        description.release(parse::effective_time(field(record, 1))?);
        Ok(description)
    }

    fn passes_filter(&self, config: &Rf2Config) -> bool {
        !config.active_only || self.active
    }
}

impl Rf2Record for Relationship {
    const EXPECTED_COLUMNS: &'static [&'static str] = RELATIONSHIP_COLUMNS;

    fn from_record(record: &StringRecord) -> Rf2Result<Self> {
        let mut relationship = Relationship::new(
            parse::sctid(field(record, 7))?,
            parse::sctid(field(record, 5))?,
        )
        .with_id(parse::sctid(field(record, 0))?);
        relationship.active = parse::boolean(field(record, 2))?;
        relationship.module_id = parse::sctid(field(record, 3))?;
        relationship.source_id = Some(parse::sctid(field(record, 4))?);
        relationship.relationship_group = parse::integer(field(record, 6))?;
        relationship.characteristic_type_id = parse::sctid(field(record, 8))?;
        relationship.modifier_id = parse::sctid(field(record, 9))?;
        relationship.release(parse::effective_time(field(record, 1))?);
        Ok(relationship)
    }

    fn passes_filter(&self, config: &Rf2Config) -> bool {
        !config.active_only || self.active
    }
}

impl Rf2Record for ReferenceSetMember {
    const EXPECTED_COLUMNS: &'static [&'static str] = LANGUAGE_MEMBER_COLUMNS;

    fn from_record(record: &StringRecord) -> Rf2Result<Self> {
        let mut member = ReferenceSetMember::new(
            parse::sctid(field(record, 4))?,
            parse::sctid(field(record, 5))?,
        );
        member.member_id = Some(field(record, 0).to_string());
        member.active = parse::boolean(field(record, 2))?;
        member.module_id = parse::sctid(field(record, 3))?;
        member.set_additional_field(
            well_known::ACCEPTABILITY_ID_FIELD,
            parse::sctid(field(record, 6))?.to_string(),
        );
        member.release(parse::effective_time(field(record, 1))?);
        Ok(member)
    }

    fn passes_filter(&self, config: &Rf2Config) -> bool {
        !config.active_only || self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snomed_types::{Acceptability, CharacteristicType};

    fn make_record(fields: &[&str]) -> StringRecord {
        let mut record = StringRecord::new();
        for field in fields {
            record.push_field(field);
        }
        record
    }

    #[test]
    fn test_parse_concept_record() {
        let record = make_record(&[
            "73211009",
            "20020131",
            "1",
            "900000000000207008",
            "900000000000074008",
        ]);

        let concept = Concept::from_record(&record).unwrap();
        assert_eq!(concept.concept_id, Some(73211009));
        assert!(concept.active);
        assert!(concept.is_primitive());
        assert!(concept.is_released());
        assert_eq!(concept.release.effective_time, Some(20020131));
        assert_eq!(concept.release.release_hash.as_deref(), Some("1|900000000000207008|900000000000074008"));
    }

    #[test]
    fn test_parse_description_record() {
        let record = make_record(&[
            "121589010",
            "20170731",
            "1",
            "900000000000207008",
            "73211009",
            "en",
            "900000000000013009",
            "Diabetes mellitus",
            "900000000000448009",
        ]);

        let description = Description::from_record(&record).unwrap();
        assert_eq!(description.description_id, Some(121589010));
        assert_eq!(description.concept_id, Some(73211009));
        assert_eq!(description.term, "Diabetes mellitus");
        assert!(!description.is_fsn());
    }

    #[test]
    fn test_parse_relationship_record() {
        let record = make_record(&[
            "100022",
            "20020131",
            "1",
            "900000000000207008",
            "73211009",
            "64572001",
            "0",
            "116680003",
            "900000000000011006",
            "900000000000451002",
        ]);

        let relationship = Relationship::from_record(&record).unwrap();
        assert_eq!(relationship.source_id, Some(73211009));
        assert_eq!(relationship.destination_id, 64572001);
        assert!(relationship.is_is_a());
        assert_eq!(relationship.characteristic_type(), Some(CharacteristicType::Inferred));
    }

    #[test]
    fn test_parse_language_member_record() {
        let record = make_record(&[
            "80000c6f-2a3b-5a88-b5b2-6e5c5e1d9b1e",
            "20020131",
            "1",
            "900000000000207008",
            "900000000000509007",
            "121589010",
            "900000000000548007",
        ]);

        let member = ReferenceSetMember::from_record(&record).unwrap();
        assert_eq!(member.refset_id, well_known::US_EN_LANG_REFSET);
        assert_eq!(member.referenced_component_id, 121589010);
        assert_eq!(member.acceptability_id(), Some(Acceptability::PREFERRED_ID));
        assert_eq!(member.id(), "80000c6f-2a3b-5a88-b5b2-6e5c5e1d9b1e");
    }

    #[test]
    fn test_inactive_rows_filtered_when_active_only() {
        let record = make_record(&[
            "100005",
            "20020131",
            "0",
            "900000000000207008",
            "900000000000074008",
        ]);
        let concept = Concept::from_record(&record).unwrap();
        let config = Rf2Config {
            active_only: true,
            ..Default::default()
        };
        assert!(!concept.passes_filter(&config));
        assert!(concept.passes_filter(&Rf2Config::default()));
    }
}
