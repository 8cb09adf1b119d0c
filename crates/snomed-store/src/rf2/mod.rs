//! RF2 release import.
//!
//! Reads the snapshot files of a release (concepts, descriptions, stated
//! and inferred relationships, language reference sets) and writes them to
//! a branch as released content.

mod discovery;
mod import;
mod parser;
mod records;

pub use discovery::{discover_rf2_files, Rf2Files};
pub use import::{import_snapshot, ImportSummary};
pub use parser::{parse, Rf2Parser, Rf2Record};
