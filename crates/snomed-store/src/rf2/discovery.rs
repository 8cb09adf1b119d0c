//! Locating snapshot files in an RF2 release directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{Rf2Error, Rf2Result};

/// Snapshot files found in a release.
#[derive(Debug, Clone, Default)]
pub struct Rf2Files {
    /// Concept snapshot.
    pub concept_file: Option<PathBuf>,
    /// Description snapshot.
    pub description_file: Option<PathBuf>,
    /// Text definition snapshot.
    pub text_definition_file: Option<PathBuf>,
    /// Inferred relationship snapshot.
    pub relationship_file: Option<PathBuf>,
    /// Stated relationship snapshot.
    pub stated_relationship_file: Option<PathBuf>,
    /// Language reference set snapshots.
    pub language_refset_files: Vec<PathBuf>,
    /// Release date taken from the concept file name (YYYYMMDD).
    pub release_date: Option<String>,
}

impl Rf2Files {
    /// Required files that were not found.
    pub fn missing_files(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.concept_file.is_none() {
            missing.push("Concept");
        }
        if self.description_file.is_none() {
            missing.push("Description");
        }
        if self.relationship_file.is_none() && self.stated_relationship_file.is_none() {
            missing.push("Relationship");
        }
        missing
    }
}

/// Finds the snapshot files under a release directory.
///
/// Accepts the release root, its `Snapshot` directory, or the
/// `Snapshot/Terminology` directory itself.
pub fn discover_rf2_files<P: AsRef<Path>>(path: P) -> Rf2Result<Rf2Files> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Err(Rf2Error::DirectoryNotFound {
            path: path.display().to_string(),
        });
    }

    let terminology_dir = find_terminology_dir(path)?;
    let mut files = Rf2Files::default();

    for (name, file) in txt_files(&terminology_dir)? {
        if name.starts_with("sct2_Concept_Snapshot") {
            files.release_date = extract_release_date(&name);
            files.concept_file = Some(file);
        } else if name.starts_with("sct2_Description_Snapshot") {
            files.description_file = Some(file);
        } else if name.starts_with("sct2_TextDefinition_Snapshot") {
            files.text_definition_file = Some(file);
        } else if name.starts_with("sct2_StatedRelationship_Snapshot") {
            files.stated_relationship_file = Some(file);
        } else if name.starts_with("sct2_Relationship_Snapshot") {
            files.relationship_file = Some(file);
        }
    }

    if let Some(snapshot_dir) = terminology_dir.parent() {
        let language_dir = snapshot_dir.join("Refset").join("Language");
        if language_dir.is_dir() {
            for (name, file) in txt_files(&language_dir)? {
                if name.contains("LanguageSnapshot") {
                    files.language_refset_files.push(file);
                }
            }
            files.language_refset_files.sort();
        }
    }

    let missing = files.missing_files();
    if !missing.is_empty() {
        return Err(Rf2Error::RequiredFileMissing {
            file_type: missing.join(", "),
            directory: terminology_dir.display().to_string(),
        });
    }
    Ok(files)
}

fn txt_files(dir: &Path) -> Rf2Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".txt") {
            found.push((name, entry.path()));
        }
    }
    Ok(found)
}

fn find_terminology_dir(base: &Path) -> Rf2Result<PathBuf> {
    if base.ends_with("Terminology") {
        return Ok(base.to_path_buf());
    }
    let candidates = [
        base.join("Snapshot").join("Terminology"),
        base.join("Terminology"),
    ];
    if let Some(found) = candidates.into_iter().find(|c| c.is_dir()) {
        return Ok(found);
    }
    for entry in fs::read_dir(base)? {
        let subdir = entry?.path();
        let nested = subdir.join("Snapshot").join("Terminology");
        if nested.is_dir() {
            return Ok(nested);
        }
    }
    Err(Rf2Error::DirectoryNotFound {
        path: format!("Terminology directory not found in {}", base.display()),
    })
}

/// Release date from a name like `sct2_Concept_Snapshot_INT_20250101.txt`.
fn extract_release_date(filename: &str) -> Option<String> {
    let last = filename.trim_end_matches(".txt").rsplit('_').next()?;
    (last.len() == 8 && last.chars().all(|c| c.is_ascii_digit())).then(|| last.to_string())
}
