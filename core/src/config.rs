//! Store configuration loaded from YAML.
//!
//! ```yaml
//! namespace: preferences
//! kind: localStorage
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{StoreError, StoreResult};


/// What a `Store` binds to: a namespace and a backend kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Empty means no namespace.
    #[serde(default)]
    pub namespace: String,
    /// Accepts the same spellings as `BackendKind::parse`.
    #[serde(default)]
    pub kind: BackendKind,
}


/// Load a `StoreConfig` from a YAML file.
pub fn load(path: &Path) -> StoreResult<StoreConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    parse(&content)
}


/// Parse a `StoreConfig` from a YAML string.
pub fn parse(content: &str) -> StoreResult<StoreConfig> {
    serde_yaml::from_str(content).map_err(|e| StoreError::Config(format!("invalid store config: {}", e)))
}
