//! Snapshot import into a branch.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use snomed_types::{Concept, Description, ReferenceSetMember, Relationship, SctId};
use tracing::info;

use super::discovery::Rf2Files;
use super::parser::{Rf2Parser, Rf2Record};
use crate::entity::DomainEntity;
use crate::store::VersionedStore;
use crate::types::{Rf2Config, Rf2Result, StoreResult};

/// Row counts written by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Concepts written.
    pub concepts: usize,
    /// Descriptions and text definitions written.
    pub descriptions: usize,
    /// Stated and inferred relationships written.
    pub relationships: usize,
    /// Language reference set members written.
    pub members: usize,
}

struct Rows {
    concepts: Vec<Concept>,
    descriptions: Vec<Description>,
    relationships: Vec<Relationship>,
    members: Vec<ReferenceSetMember>,
}

fn read_files<T: Rf2Record>(paths: &[&PathBuf], config: &Rf2Config) -> Rf2Result<Vec<T>> {
    let mut rows = Vec::new();
    for path in paths {
        rows.extend(Rf2Parser::<BufReader<File>, T>::from_path(path, config.clone())?.parse_all()?);
    }
    Ok(rows)
}

fn paths_of<'a>(files: &[&'a Option<PathBuf>]) -> Vec<&'a PathBuf> {
    files.iter().filter_map(|f| (*f).as_ref()).collect()
}

#[cfg(feature = "parallel")]
fn read_rows(files: &Rf2Files, config: &Rf2Config) -> Rf2Result<Rows> {
    let language: Vec<&PathBuf> = files.language_refset_files.iter().collect();
    let ((concepts, descriptions), (relationships, members)) = rayon::join(
        || {
            rayon::join(
                || read_files(&paths_of(&[&files.concept_file]), config),
                || {
                    read_files(
                        &paths_of(&[&files.description_file, &files.text_definition_file]),
                        config,
                    )
                },
            )
        },
        || {
            rayon::join(
                || {
                    read_files(
                        &paths_of(&[&files.stated_relationship_file, &files.relationship_file]),
                        config,
                    )
                },
                || read_files(&language, config),
            )
        },
    );
    Ok(Rows {
        concepts: concepts?,
        descriptions: descriptions?,
        relationships: relationships?,
        members: members?,
    })
}

#[cfg(not(feature = "parallel"))]
fn read_rows(files: &Rf2Files, config: &Rf2Config) -> Rf2Result<Rows> {
    let language: Vec<&PathBuf> = files.language_refset_files.iter().collect();
    Ok(Rows {
        concepts: read_files(&paths_of(&[&files.concept_file]), config)?,
        descriptions: read_files(
            &paths_of(&[&files.description_file, &files.text_definition_file]),
            config,
        )?,
        relationships: read_files(
            &paths_of(&[&files.stated_relationship_file, &files.relationship_file]),
            config,
        )?,
        members: read_files(&language, config)?,
    })
}

/// Imports a release snapshot into a branch in a single commit.
///
/// Commit listeners run as for any other commit, so derived indexes are
/// built before the import is published.
pub fn import_snapshot(
    store: &VersionedStore,
    files: &Rf2Files,
    branch_path: &str,
    config: &Rf2Config,
) -> StoreResult<ImportSummary> {
    info!(
        "Importing RF2 snapshot {} into {}",
        files.release_date.as_deref().unwrap_or("(undated)"),
        branch_path
    );
    let mut rows = read_rows(files, config)?;

    let owners: HashMap<SctId, SctId> = rows
        .descriptions
        .iter()
        .filter_map(|d| Some((d.description_id?, d.concept_id?)))
        .collect();
    for member in &mut rows.members {
        member.concept_id = owners.get(&member.referenced_component_id).copied();
    }

    let commit = store.open_commit(branch_path)?;
    let summary = ImportSummary {
        concepts: save_all(store, &commit, &mut rows.concepts, config.batch_size)?,
        descriptions: save_all(store, &commit, &mut rows.descriptions, config.batch_size)?,
        relationships: save_all(store, &commit, &mut rows.relationships, config.batch_size)?,
        members: save_all(store, &commit, &mut rows.members, config.batch_size)?,
    };
    commit.complete()?;

    info!(
        "Imported {} concepts, {} descriptions, {} relationships, {} language members",
        summary.concepts, summary.descriptions, summary.relationships, summary.members
    );
    Ok(summary)
}

fn save_all<T: DomainEntity>(
    store: &VersionedStore,
    commit: &crate::commit::Commit,
    rows: &mut [T],
    batch_size: usize,
) -> StoreResult<usize> {
    let mut saved = 0;
    for batch in rows.chunks_mut(batch_size.max(1)) {
        batch.iter_mut().for_each(|row| row.set_changed(true));
        saved += store.save_batch(commit, batch)?;
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rf2::discover_rf2_files;
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, lines: &[&str]) {
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    fn make_release(root: &Path) {
        let terminology = root.join("Snapshot").join("Terminology");
        let language = root.join("Snapshot").join("Refset").join("Language");
        fs::create_dir_all(&terminology).unwrap();
        fs::create_dir_all(&language).unwrap();
        write(
            &terminology.join("sct2_Concept_Snapshot_INT_20250101.txt"),
            &[
                "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId",
                "138875005\t20020131\t1\t900000000000207008\t900000000000074008",
                "64572001\t20020131\t1\t900000000000207008\t900000000000074008",
            ],
        );
        write(
            &terminology.join("sct2_Description_Snapshot-en_INT_20250101.txt"),
            &[
                "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId",
                "2148514019\t20020131\t1\t900000000000207008\t64572001\ten\t900000000000003001\tDisease (disorder)\t900000000000448009",
            ],
        );
        write(
            &terminology.join("sct2_StatedRelationship_Snapshot_INT_20250101.txt"),
            &[
                "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId",
                "3187444026\t20020131\t1\t900000000000207008\t64572001\t138875005\t0\t116680003\t900000000000010007\t900000000000451002",
            ],
        );
        write(
            &language.join("der2_cRefset_LanguageSnapshot-en_INT_20250101.txt"),
            &[
                "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\tacceptabilityId",
                "b8e2e0c2-7f3b-5a8e-8d8a-3b0f0c5d1e01\t20020131\t1\t900000000000207008\t900000000000509007\t2148514019\t900000000000548007",
            ],
        );
    }

    #[test]
    fn test_import_snapshot_into_main() {
        let dir = tempfile::tempdir().unwrap();
        make_release(dir.path());
        let files = discover_rf2_files(dir.path()).unwrap();

        let store = VersionedStore::default();
        store.create_branch("MAIN").unwrap();
        let summary = import_snapshot(&store, &files, "MAIN", &Rf2Config::default()).unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                concepts: 2,
                descriptions: 1,
                relationships: 1,
                members: 1,
            }
        );

        let criteria = store.branch_criteria("MAIN").unwrap();
        let members: Vec<ReferenceSetMember> = store.search_entities(&criteria, |_| true);
        assert_eq!(members[0].concept_id, Some(64572001));
        let concepts: Vec<Concept> = store.search_by_ids(&criteria, &["64572001".to_string()]).unwrap();
        assert_eq!(concepts[0].release.effective_time, Some(20020131));
        assert!(store.find_branch("MAIN").unwrap().contains_content);
    }
}
