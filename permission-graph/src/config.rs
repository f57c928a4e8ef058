// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of the authorization index.
use serde::{Deserialize, Serialize};

use crate::permissions::{PermissionType, default_permission_types};

/// Default maximum number of ids sent to the document store in one read.
pub const DEFAULT_ID_BATCH_SIZE: usize = 500;

/// Configuration parameters for building an [`AuthorizationIndex`](crate::AuthorizationIndex).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Declared permission types.
    ///
    /// Default: `edit`, `view` (inheriting from `edit`) and `delete`.
    pub permission_types: Vec<PermissionType>,

    /// Maximum number of ids per store read while walking link paths. Larger id sets are split
    /// into batches which are read concurrently.
    ///
    /// Default: 500.
    pub id_batch_size: usize,
}

impl Config {
    /// Return a default instance of `Config`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Replace the declared permission types.
    pub fn permission_types(mut self, permission_types: Vec<PermissionType>) -> Self {
        self.permission_types = permission_types;
        self
    }

    /// Define the maximum number of ids per store read, a size of zero is treated as one.
    pub fn id_batch_size(mut self, id_batch_size: usize) -> Self {
        self.id_batch_size = id_batch_size.max(1);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            permission_types: default_permission_types(),
            id_batch_size: DEFAULT_ID_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::permissions::PermissionType;

    use super::{Config, DEFAULT_ID_BATCH_SIZE};

    #[test]
    fn deserialize_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "permission_types": [
                    { "name": "read", "abstract": false },
                    { "name": "manageUsers", "abstract": true, "parents": [] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.id_batch_size, DEFAULT_ID_BATCH_SIZE);
        assert_eq!(
            config.permission_types,
            vec![
                PermissionType::action("read"),
                PermissionType::abstract_permission("manageUsers")
            ]
        );

        let config = Config::new().id_batch_size(0);
        assert_eq!(config.id_batch_size, 1);
        assert_eq!(config.permission_types.len(), 3);
    }
}
