//! Branch criteria: which stored versions a read sees.

use std::collections::BTreeSet;

use crate::branch::Timepoint;
use crate::entity::Version;

/// Versions of one branch path visible at a timepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathClause {
    /// Branch path the versions were written on.
    pub path: String,
    /// Timepoint the path is viewed at.
    pub timepoint: Timepoint,
    /// Internal ids hidden by descendant branches.
    pub excluded: BTreeSet<u64>,
}

impl PathClause {
    fn matches<T>(&self, version: &Version<T>) -> bool {
        version.path == self.path
            && version.visible_at(self.timepoint)
            && !self.excluded.contains(&version.internal_id)
    }
}

/// A filter over stored versions.
///
/// Built by the store from branch state; see
/// [`VersionedStore::branch_criteria`](crate::VersionedStore::branch_criteria)
/// and its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchCriteria {
    /// What a branch sees: its own path plus each ancestor at the base of
    /// the branch below it, minus the versions those branches replaced.
    Visible(Vec<PathClause>),
    /// Versions written on the path that are still current.
    ChangesOnBranch {
        /// Branch path.
        path: String,
    },
    /// Versions started or ended on the path by one commit.
    ChangesInCommit {
        /// Branch path.
        path: String,
        /// Commit timepoint.
        timepoint: Timepoint,
    },
    /// Versions on the path started or ended within an inclusive range.
    UpdatesDuringRange {
        /// Branch path.
        path: String,
        /// First timepoint of the range.
        start: Timepoint,
        /// Last timepoint of the range.
        end: Timepoint,
    },
}

impl BranchCriteria {
    /// Whether a stored version passes this filter.
    pub fn matches<T>(&self, version: &Version<T>) -> bool {
        match self {
            Self::Visible(clauses) => clauses.iter().any(|clause| clause.matches(version)),
            Self::ChangesOnBranch { path } => version.path == *path && version.end.is_none(),
            Self::ChangesInCommit { path, timepoint } => {
                version.path == *path
                    && (version.start == *timepoint || version.end == Some(*timepoint))
            }
            Self::UpdatesDuringRange { path, start, end } => {
                let in_range = |t: Timepoint| t >= *start && t <= *end;
                version.path == *path
                    && (in_range(version.start) || version.end.map_or(false, in_range))
            }
        }
    }

    /// The same view without the branch's own path.
    ///
    /// Only meaningful for [`BranchCriteria::Visible`]; the other variants
    /// only ever look at one path and become empty.
    pub fn ancestors_only(&self) -> BranchCriteria {
        match self {
            Self::Visible(clauses) => Self::Visible(clauses.iter().skip(1).cloned().collect()),
            _ => Self::Visible(Vec::new()),
        }
    }

    /// Paths this criteria reads from.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Visible(clauses) => clauses.iter().map(|c| c.path.as_str()).collect(),
            Self::ChangesOnBranch { path }
            | Self::ChangesInCommit { path, .. }
            | Self::UpdatesDuringRange { path, .. } => vec![path.as_str()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_version(internal_id: u64, path: &str, start: i64, end: Option<i64>) -> Version<()> {
        Version {
            internal_id,
            path: path.to_string(),
            start: Timepoint::from_millis(start),
            end: end.map(Timepoint::from_millis),
            entity: (),
        }
    }

    fn make_clause(path: &str, timepoint: i64, excluded: &[u64]) -> PathClause {
        PathClause {
            path: path.to_string(),
            timepoint: Timepoint::from_millis(timepoint),
            excluded: excluded.iter().copied().collect(),
        }
    }

    #[test]
    fn test_visible_respects_base_and_exclusions() {
        let criteria = BranchCriteria::Visible(vec![
            make_clause("MAIN/A", 100, &[]),
            make_clause("MAIN", 50, &[2]),
        ]);

        assert!(criteria.matches(&make_version(1, "MAIN", 10, None)));
        assert!(!criteria.matches(&make_version(2, "MAIN", 10, None)));
        // Written on the parent after the child's base
        assert!(!criteria.matches(&make_version(3, "MAIN", 60, None)));
        // Ended on the parent after the child's base
        assert!(criteria.matches(&make_version(4, "MAIN", 10, Some(70))));
        assert!(criteria.matches(&make_version(5, "MAIN/A", 90, None)));
        assert!(!criteria.matches(&make_version(6, "MAIN/A", 90, Some(100))));
    }

    #[test]
    fn test_changes_in_commit() {
        let criteria = BranchCriteria::ChangesInCommit {
            path: "MAIN".to_string(),
            timepoint: Timepoint::from_millis(100),
        };
        assert!(criteria.matches(&make_version(1, "MAIN", 100, None)));
        assert!(criteria.matches(&make_version(2, "MAIN", 10, Some(100))));
        assert!(!criteria.matches(&make_version(3, "MAIN", 10, None)));
        assert!(!criteria.matches(&make_version(4, "MAIN/A", 100, None)));
    }

    #[test]
    fn test_updates_during_range_is_inclusive() {
        let criteria = BranchCriteria::UpdatesDuringRange {
            path: "MAIN/A".to_string(),
            start: Timepoint::from_millis(10),
            end: Timepoint::from_millis(20),
        };
        assert!(criteria.matches(&make_version(1, "MAIN/A", 10, None)));
        assert!(criteria.matches(&make_version(2, "MAIN/A", 5, Some(20))));
        assert!(!criteria.matches(&make_version(3, "MAIN/A", 5, Some(21))));
        assert!(!criteria.matches(&make_version(4, "MAIN/A", 21, None)));
    }

    #[test]
    fn test_ancestors_only_drops_own_path() {
        let criteria = BranchCriteria::Visible(vec![
            make_clause("MAIN/A", 100, &[]),
            make_clause("MAIN", 50, &[]),
        ]);
        assert_eq!(criteria.ancestors_only().paths(), vec!["MAIN"]);
        assert!(BranchCriteria::ChangesOnBranch { path: "MAIN".into() }
            .ancestors_only()
            .paths()
            .is_empty());
    }
}
