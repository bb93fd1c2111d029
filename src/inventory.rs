use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// One item the operator expects to find, as supplied by the inventory service.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExpectedItem {
    name: String,
    #[serde(alias = "rfid", alias = "tag")]
    identifier: String,
}

impl ExpectedItem {
    #[must_use]
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Parses `NAME=IDENTIFIER`; the identifier follows the last `=`.
impl FromStr for ExpectedItem {
    type Err = InventoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InventoryError::InvalidItem {
            value: value.to_string(),
        };
        let (name, identifier) = value.rsplit_once('=').ok_or_else(invalid)?;
        let (name, identifier) = (name.trim(), identifier.trim());
        if name.is_empty() || identifier.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(name, identifier))
    }
}

/// Parses a JSON list of `{name, identifier}` objects.
pub fn parse_inventory(raw: &str) -> Result<Vec<ExpectedItem>, InventoryError> {
    Ok(serde_json::from_str(raw)?)
}

/// Reads the expected items from a JSON file.
pub fn load_inventory(path: &Path) -> Result<Vec<ExpectedItem>, InventoryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_inventory(&raw)
}
