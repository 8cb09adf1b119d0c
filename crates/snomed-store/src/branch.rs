//! Branches, timepoints and branch state.
//!
//! A branch is identified by a `/` separated path rooted at `MAIN`. Every
//! change to a branch creates a new version of it, so the state of a parent
//! at a child's base timepoint can always be looked up.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

/// Path of the root branch.
pub const MAIN: &str = "MAIN";

/// A point on the store's commit timeline, in milliseconds since the epoch.
///
/// Timepoints handed out by the store are strictly increasing, so a
/// timepoint identifies exactly one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timepoint(i64);

impl Timepoint {
    /// Wraps a millisecond timestamp.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch.
    pub fn millis(self) -> i64 {
        self.0
    }

    /// This timepoint moved by `millis`.
    pub fn offset(self, millis: i64) -> Self {
        Self(self.0 + millis)
    }

    /// UTC date time of this timepoint.
    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.to_datetime().to_rfc3339())
    }
}

/// How a branch relates to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Based on the parent head, nothing of its own.
    UpToDate,
    /// Based on the parent head, with content of its own.
    Forward,
    /// Parent moved on, nothing of its own.
    Behind,
    /// Parent moved on and the branch has content of its own.
    Diverged,
}

/// One version of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Branch path, e.g. `MAIN/PROJECT/TASK-1`.
    pub path: String,
    /// Parent head this branch was last rebased on (or created from).
    pub base: Timepoint,
    /// Last commit on this branch.
    pub head: Timepoint,
    /// When the branch was created.
    pub creation: Timepoint,
    /// When the branch was last promoted to its parent.
    pub last_promotion: Option<Timepoint>,
    /// Whether the branch holds changes not yet promoted.
    pub contains_content: bool,
    /// Held by an open commit.
    pub locked: bool,
    /// Internal ids of ancestor versions this branch hides, by entity type.
    pub versions_replaced: BTreeMap<String, BTreeSet<u64>>,
    /// Start of this branch version.
    pub start: Timepoint,
    /// End of this branch version, `None` for the current one.
    pub end: Option<Timepoint>,
}

impl Branch {
    pub(crate) fn new(path: &str, base: Timepoint, creation: Timepoint) -> Self {
        Self {
            path: path.to_string(),
            base,
            head: creation,
            creation,
            last_promotion: None,
            contains_content: false,
            locked: false,
            versions_replaced: BTreeMap::new(),
            start: creation,
            end: None,
        }
    }

    /// Path of the parent branch, `None` for `MAIN`.
    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.path)
    }

    /// Internal ids of replaced ancestor versions of one entity type.
    pub fn versions_replaced_for(&self, kind: &str) -> BTreeSet<u64> {
        self.versions_replaced.get(kind).cloned().unwrap_or_default()
    }

    /// All replaced internal ids regardless of type.
    pub fn all_versions_replaced(&self) -> BTreeSet<u64> {
        self.versions_replaced.values().flatten().copied().collect()
    }

    /// State relative to the current version of the parent.
    pub fn state(&self, parent: Option<&Branch>) -> BranchState {
        let Some(parent) = parent else {
            return BranchState::UpToDate;
        };
        if self.base == parent.head {
            if self.contains_content {
                BranchState::Forward
            } else {
                BranchState::UpToDate
            }
        } else if !self.contains_content {
            BranchState::Behind
        } else {
            BranchState::Diverged
        }
    }

    pub(crate) fn visible_at(&self, timepoint: Timepoint) -> bool {
        self.start <= timepoint && self.end.map_or(true, |end| end > timepoint)
    }
}

/// Path of the parent of `path`, `None` for a root path.
///
/// ```
/// use snomed_store::parent_path;
///
/// assert_eq!(parent_path("MAIN/A/B"), Some("MAIN/A"));
/// assert_eq!(parent_path("MAIN"), None);
/// ```
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Whether `child` sits directly under `parent`.
pub fn is_direct_child(parent: &str, child: &str) -> bool {
    parent_path(child) == Some(parent)
}
