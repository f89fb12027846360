use std::collections::BTreeMap;
use std::path::Path;

use hc_store::{FragmentLayout, ReclamationPolicy};
use hc_types::AttrType;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::retry::RetryPolicy;

/// Deployment settings for a [`Honeycomb`](crate::Honeycomb).
///
/// Every field has a default, so an empty TOML document is a valid
/// single-cell configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoneycombConfig {
    pub cells: usize,
    pub shards_per_cell: usize,
    /// Per-cell blob capacity in bytes; unlimited when absent.
    pub capacity_bytes: Option<u64>,
    pub reclamation: ReclamationPolicy,
    pub indexer_interval_ms: u64,
    pub fragments: FragmentLayout,
    pub retry: RetryPolicy,
    /// Attribute types. Empty means attributes are not checked.
    pub schema: BTreeMap<String, AttrType>,
}

impl Default for HoneycombConfig {
    fn default() -> Self {
        Self {
            cells: 1,
            shards_per_cell: hc_query::DEFAULT_SHARDS,
            capacity_bytes: None,
            reclamation: ReclamationPolicy::default(),
            indexer_interval_ms: 50,
            fragments: FragmentLayout::default(),
            retry: RetryPolicy::default(),
            schema: BTreeMap::new(),
        }
    }
}

impl HoneycombConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ClientResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ClientResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.cells == 0 {
            return Err(ClientError::Config("cells must be at least 1".into()));
        }
        if self.shards_per_cell == 0 {
            return Err(ClientError::Config("shards_per_cell must be at least 1".into()));
        }
        self.fragments
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ClientError::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = HoneycombConfig::default();
        assert_eq!(c.cells, 1);
        assert_eq!(c.shards_per_cell, 4);
        assert_eq!(c.fragments, FragmentLayout::new(5, 2));
        assert_eq!(c.reclamation, ReclamationPolicy::Deferred);
        assert!(c.capacity_bytes.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(
            HoneycombConfig::from_toml_str("").unwrap(),
            HoneycombConfig::default()
        );
    }

    #[test]
    fn parses_full_document() {
        let c = HoneycombConfig::from_toml_str(
            r#"
            cells = 3
            shards_per_cell = 2
            capacity_bytes = 65536
            reclamation = "immediate"
            indexer_interval_ms = 5

            [fragments]
            data_fragments = 4
            parity_fragments = 1

            [retry]
            max_attempts = 6

            [schema]
            owner = "string"
            size = "long"
            "#,
        )
        .unwrap();
        assert_eq!(c.cells, 3);
        assert_eq!(c.capacity_bytes, Some(65_536));
        assert_eq!(c.reclamation, ReclamationPolicy::Immediate);
        assert_eq!(c.fragments.total(), 5);
        assert_eq!(c.retry.max_attempts, 6);
        assert_eq!(c.retry.initial_backoff_ms, 10);
        assert_eq!(c.schema.get("size"), Some(&AttrType::Long));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            HoneycombConfig::from_toml_str("cells = 0"),
            Err(ClientError::Config(_))
        ));
        assert!(HoneycombConfig::from_toml_str("shards_per_cell = 0").is_err());
        assert!(HoneycombConfig::from_toml_str("[retry]\nmax_attempts = 0").is_err());
        assert!(
            HoneycombConfig::from_toml_str("[fragments]\ndata_fragments = 0\nparity_fragments = 2")
                .is_err()
        );
        assert!(HoneycombConfig::from_toml_str("[schema]\nx = \"uuid\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cells = 2\nreclamation = \"deferred\"").unwrap();
        let c = HoneycombConfig::load(file.path()).unwrap();
        assert_eq!(c.cells, 2);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HoneycombConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("absent.toml")));
    }

    #[test]
    fn toml_round_trip() {
        let mut c = HoneycombConfig {
            cells: 2,
            ..Default::default()
        };
        c.schema.insert("owner".into(), AttrType::String);
        let text = c.to_toml_string().unwrap();
        assert_eq!(HoneycombConfig::from_toml_str(&text).unwrap(), c);
    }
}
