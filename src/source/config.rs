//! Source-specific configuration.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;

pub const KEY_BATCH_SIZE: &str = "batchSize";
pub const KEY_SNAPSHOT: &str = "snapshot";
pub const KEY_ORDERING_FIELD: &str = "orderingField";

pub const DEFAULT_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_ORDERING_FIELD: &str = "_id";

const MIN_BATCH_SIZE: u32 = 1;
const MAX_BATCH_SIZE: u32 = 100_000;

/// Source-specific configurable values.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub connection: Config,
    /// The size of a document batch during snapshots.
    pub batch_size: u32,
    /// Whether to capture a snapshot of the entire collection before
    /// starting CDC mode.
    pub snapshot: bool,
    /// The field used for ordering collection elements when capturing a
    /// snapshot. Must admit a total order within the collection.
    pub ordering_field: String,
}

impl SourceConfig {
    /// Parse and validate the source configuration from a raw string map.
    pub fn parse(raw: &HashMap<String, String>) -> Result<Self> {
        let connection = Config::parse(raw)?;

        let batch_size = match raw.get(KEY_BATCH_SIZE).filter(|s| !s.is_empty()) {
            Some(s) => s
                .parse::<u32>()
                .map_err(|e| Error::Config(format!("parse {KEY_BATCH_SIZE:?}: {e}")))?,
            None => DEFAULT_BATCH_SIZE,
        };
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(Error::Config(format!(
                "{KEY_BATCH_SIZE:?} must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}"
            )));
        }

        let snapshot = match raw.get(KEY_SNAPSHOT).filter(|s| !s.is_empty()) {
            Some(s) => s
                .parse::<bool>()
                .map_err(|e| Error::Config(format!("parse {KEY_SNAPSHOT:?}: {e}")))?,
            None => true,
        };

        let ordering_field = raw
            .get(KEY_ORDERING_FIELD)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ORDERING_FIELD.to_string());

        Ok(Self {
            connection,
            batch_size,
            snapshot,
            ordering_field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KEY_COLLECTION, KEY_DB};

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config =
            SourceConfig::parse(&raw(&[(KEY_DB, "test"), (KEY_COLLECTION, "users")])).unwrap();

        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.snapshot);
        assert_eq!(config.ordering_field, DEFAULT_ORDERING_FIELD);
    }

    #[test]
    fn test_batch_size_bounds() {
        for value in ["0", "100001"] {
            let result = SourceConfig::parse(&raw(&[
                (KEY_DB, "test"),
                (KEY_COLLECTION, "users"),
                (KEY_BATCH_SIZE, value),
            ]));
            assert!(result.is_err(), "batch size {value} should be rejected");
        }

        let config = SourceConfig::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_BATCH_SIZE, "100000"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 100_000);
    }

    #[test]
    fn test_invalid_batch_size_is_rejected() {
        let result = SourceConfig::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_BATCH_SIZE, "many"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_flag_parses() {
        let config = SourceConfig::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_SNAPSHOT, "false"),
        ]))
        .unwrap();
        assert!(!config.snapshot);

        let result = SourceConfig::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_SNAPSHOT, "yes"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_ordering_field() {
        let config = SourceConfig::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_ORDERING_FIELD, "created_at"),
        ]))
        .unwrap();

        assert_eq!(config.ordering_field, "created_at");
    }
}
