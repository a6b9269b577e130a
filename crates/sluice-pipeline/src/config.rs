//! Flat configuration categories
//!
//! A category is a named, flat item-name to item-value mapping. The
//! plugin to load is conveyed under the reserved `plugin` key. Items
//! cross the interpreter boundary as a JSON object string.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved item key naming the plugin a category configures
pub const PLUGIN_NAME_KEY: &str = "plugin";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigCategory {
    name: String,
    #[serde(default)]
    items: BTreeMap<String, String>,
}

impl ConfigCategory {
    pub fn new(name: impl Into<String>) -> Self {
        ConfigCategory {
            name: name.into(),
            items: BTreeMap::new(),
        }
    }

    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.insert(key.into(), value.into());
        self
    }

    pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    /// Category (configuration section) name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn items(&self) -> &BTreeMap<String, String> {
        &self.items
    }

    /// Value of the reserved `plugin` key, if present
    pub fn plugin_name(&self) -> Option<&str> {
        self.item(PLUGIN_NAME_KEY)
    }

    /// Serialize the items to the JSON object text that crosses into
    /// interpreted code
    pub fn items_to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(&self.items)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_name_from_reserved_key() {
        let category = ConfigCategory::new("flow-a")
            .with_item(PLUGIN_NAME_KEY, "scale")
            .with_item("factor", "2.0");

        assert_eq!(category.plugin_name(), Some("scale"));
        assert_eq!(category.item("factor"), Some("2.0"));
        assert_eq!(category.name(), "flow-a");
    }

    #[test]
    fn test_plugin_name_missing() {
        let category = ConfigCategory::new("flow-a").with_item("factor", "2.0");
        assert_eq!(category.plugin_name(), None);
    }

    #[test]
    fn test_items_to_json_is_flat_object() {
        let category = ConfigCategory::new("c")
            .with_item("plugin", "scale")
            .with_item("factor", "2.0");

        let json = category.items_to_json();
        assert!(json.is_ok_and(|j| j == r#"{"factor":"2.0","plugin":"scale"}"#));
    }
}
