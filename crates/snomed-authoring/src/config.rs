//! Authoring configuration.

use std::time::Duration;

use snomed_types::{well_known, SctId};

/// Tunables for the authoring engines.
#[derive(Debug, Clone)]
pub struct AuthoringConfig {
    /// Number of concept ids per lookup when loading existing versions.
    pub clause_limit: usize,
    /// Number of internal ids per lookup when ending replaced versions during promotion.
    pub promotion_partition_size: usize,
    /// How long branch and merge reviews are kept.
    pub review_ttl: Duration,
    /// How long finished merge jobs are kept.
    pub merge_job_ttl: Duration,
    /// Time allowed to delete one document type.
    pub deletion_timeout: Duration,
    /// Whether commits maintain the semantic index.
    pub semantic_indexing_enabled: bool,
    /// Namespace for minted ids; none mints in the international namespace.
    pub identifier_namespace: Option<u32>,
    /// First item id handed out when minting.
    pub identifier_seed: u64,
    /// Dialects used for preferred terms, in order of preference.
    pub language_refset_ids: Vec<SctId>,
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            clause_limit: 500,
            promotion_partition_size: 1_000,
            review_ttl: Duration::from_secs(12 * 60 * 60),
            merge_job_ttl: Duration::from_secs(12 * 60 * 60),
            deletion_timeout: Duration::from_secs(20),
            semantic_indexing_enabled: true,
            identifier_namespace: None,
            identifier_seed: 1_000_000,
            language_refset_ids: vec![
                well_known::US_EN_LANG_REFSET,
                well_known::GB_EN_LANG_REFSET,
            ],
        }
    }
}

impl AuthoringConfig {
    /// Reads the `SNOMED_*` environment variables, falling back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = env_parse::<usize>("SNOMED_CLAUSE_LIMIT") {
            config.clause_limit = limit.max(1);
        }
        if let Some(hours) = env_parse::<u64>("SNOMED_REVIEW_TTL_HOURS") {
            config.review_ttl = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(hours) = env_parse::<u64>("SNOMED_MERGE_JOB_TTL_HOURS") {
            config.merge_job_ttl = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(secs) = env_parse::<u64>("SNOMED_DELETION_TIMEOUT_SECS") {
            config.deletion_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("SNOMED_SEMANTIC_INDEXING") {
            config.semantic_indexing_enabled = enabled;
        }
        if let Some(namespace) = env_parse::<u32>("SNOMED_NAMESPACE") {
            config.identifier_namespace = Some(namespace);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthoringConfig::default();
        assert_eq!(config.clause_limit, 500);
        assert_eq!(config.promotion_partition_size, 1_000);
        assert_eq!(config.review_ttl, Duration::from_secs(43_200));
        assert_eq!(config.deletion_timeout, Duration::from_secs(20));
        assert!(config.semantic_indexing_enabled);
        assert_eq!(config.identifier_namespace, None);
        assert_eq!(config.language_refset_ids[0], well_known::US_EN_LANG_REFSET);
    }
}
