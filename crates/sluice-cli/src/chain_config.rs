use crate::errors::ChainError;
use serde::{Deserialize, Serialize};
use sluice_pipeline::ConfigCategory;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Chain configuration from YAML
///
/// A chain file names ordered filter stages. Each stage keys a flat
/// configuration block whose `plugin` item selects the Python module
/// to load for that stage.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainConfig {
    /// Variables for substitution (${var} and $(var) syntax)
    #[serde(default)]
    pub variables: HashMap<String, serde_yaml::Value>,

    /// Named chains (each an ordered list of stage names)
    #[serde(default)]
    pub chains: HashMap<String, Vec<String>>,

    /// Stage configuration blocks (keyed by stage name)
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl ChainConfig {
    /// Load chain configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let path_ref = path.as_ref();
        let content = match fs::read_to_string(path_ref) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(fallback) = Self::resolve_fallback_path(path_ref) {
                    fs::read_to_string(fallback)?
                } else {
                    return Err(ChainError::Io(err));
                }
            }
            Err(err) => return Err(ChainError::Io(err)),
        };
        let config: ChainConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// List all available chain names
    pub fn list_chains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get a specific chain by name
    pub fn get_chain(&self, name: &str) -> Option<&Vec<String>> {
        self.chains.get(name)
    }

    /// When the file defines exactly one chain, its name can be omitted
    /// on the command line.
    pub fn only_chain(&self) -> Option<String> {
        if self.chains.len() == 1 {
            self.chains.keys().next().cloned()
        } else {
            None
        }
    }

    /// Substitute variables in a string (supports ${var} and $(var) syntax)
    pub fn substitute_string(&self, input: &str) -> Result<String, ChainError> {
        let mut result = input.to_string();

        // Handle ${var} syntax
        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = self.get_variable_string(var_name)?;
                result.replace_range(start..=(start + end), &value);
            } else {
                return Err(ChainError::InvalidConfig(
                    "Unclosed variable substitution ${".to_string(),
                ));
            }
        }

        // Handle $(var) syntax
        while let Some(start) = result.find("$(") {
            if let Some(end) = result[start..].find(')') {
                let var_name = &result[start + 2..start + end];
                let value = self.get_variable_string(var_name)?;
                result.replace_range(start..=(start + end), &value);
            } else {
                return Err(ChainError::InvalidConfig(
                    "Unclosed variable substitution $(".to_string(),
                ));
            }
        }

        Ok(result)
    }

    /// Get a variable value as a string
    fn get_variable_string(&self, name: &str) -> Result<String, ChainError> {
        let value = self
            .variables
            .get(name)
            .ok_or_else(|| ChainError::VariableNotFound(name.to_string()))?;

        match value {
            serde_yaml::Value::String(s) => Ok(s.clone()),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            serde_yaml::Value::Bool(b) => Ok(b.to_string()),
            serde_yaml::Value::Null => Ok("null".to_string()),
            _ => Err(ChainError::InvalidConfig(format!(
                "Variable '{}' has complex type that cannot be substituted as string",
                name
            ))),
        }
    }

    /// Substitute variables in a YAML value recursively
    pub fn substitute_value(
        &self,
        value: &serde_yaml::Value,
    ) -> Result<serde_yaml::Value, ChainError> {
        match value {
            serde_yaml::Value::String(s) => {
                let substituted = self.substitute_string(s)?;
                Ok(serde_yaml::Value::String(substituted))
            }
            serde_yaml::Value::Mapping(map) => {
                let mut new_map = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let new_key = self.substitute_value(k)?;
                    let new_value = self.substitute_value(v)?;
                    new_map.insert(new_key, new_value);
                }
                Ok(serde_yaml::Value::Mapping(new_map))
            }
            serde_yaml::Value::Sequence(seq) => {
                let mut new_seq = Vec::new();
                for item in seq {
                    new_seq.push(self.substitute_value(item)?);
                }
                Ok(serde_yaml::Value::Sequence(new_seq))
            }
            // Numbers, booleans, null don't need substitution
            _ => Ok(value.clone()),
        }
    }

    /// Get a stage's configuration block with variable substitution
    pub fn get_stage_config(&self, stage: &str) -> Result<serde_yaml::Value, ChainError> {
        let config = self.config.get(stage).ok_or_else(|| {
            ChainError::InvalidConfig(format!("No configuration found for stage '{}'", stage))
        })?;

        self.substitute_value(config)
    }

    /// Build the flat configuration category for one stage.
    ///
    /// The stage block must be a mapping of scalar values and must carry
    /// the `plugin` item naming the module to load.
    pub fn stage_category(&self, stage: &str) -> Result<ConfigCategory, ChainError> {
        let block = self.get_stage_config(stage)?;
        let serde_yaml::Value::Mapping(map) = block else {
            return Err(ChainError::InvalidConfig(format!(
                "Configuration for stage '{}' is not a mapping",
                stage
            )));
        };

        let mut category = ConfigCategory::new(stage);
        for (key, value) in &map {
            let serde_yaml::Value::String(key) = key else {
                return Err(ChainError::InvalidConfig(format!(
                    "Configuration key in stage '{}' is not a string",
                    stage
                )));
            };
            let text = scalar_string(value).ok_or_else(|| {
                ChainError::InvalidConfig(format!(
                    "Item '{}' in stage '{}' has complex type that cannot be passed to a plugin",
                    key, stage
                ))
            })?;
            category.set_item(key.clone(), text);
        }

        if category.plugin_name().is_none() {
            return Err(ChainError::InvalidConfig(format!(
                "Stage '{}' does not name a plugin",
                stage
            )));
        }

        Ok(category)
    }

    /// Resolve and print the configuration for a specific chain
    pub fn print_chain_config(&self, chain_name: &str) -> Result<String, ChainError> {
        let chain = self
            .get_chain(chain_name)
            .ok_or_else(|| ChainError::ChainNotFound(chain_name.to_string()))?;

        let mut output = String::new();
        output.push_str(&format!("Chain: {}\n", chain_name));
        output.push_str(&format!("Stages: {:?}\n\n", chain));

        output.push_str("Variables:\n");
        for (key, value) in &self.variables {
            output.push_str(&format!("  {}: {:?}\n", key, value));
        }

        output.push_str("\nResolved Configuration:\n");
        for stage in chain {
            if let Ok(config) = self.get_stage_config(stage) {
                output.push_str(&format!("\n{}:\n", stage));
                let yaml_str = serde_yaml::to_string(&config).unwrap_or_else(|_| "{}".to_string());
                for line in yaml_str.lines() {
                    output.push_str(&format!("  {}\n", line));
                }
            }
        }

        Ok(output)
    }

    fn resolve_fallback_path(original: &Path) -> Option<PathBuf> {
        let mut candidates = Vec::new();

        if original.extension().is_none() {
            candidates.push(original.with_extension("yaml"));
            candidates.push(original.with_extension("yml"));
        }

        candidates.into_iter().find(|candidate| candidate.exists())
    }
}

/// Render a scalar YAML value as the string form plugins receive
fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some("null".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_with_vars(vars: HashMap<String, serde_yaml::Value>) -> ChainConfig {
        ChainConfig {
            variables: vars,
            chains: HashMap::new(),
            config: HashMap::new(),
        }
    }

    #[test]
    fn test_variable_substitution_dollar_brace() {
        let mut vars = HashMap::new();
        vars.insert("rate".to_string(), serde_yaml::Value::Number(30.into()));
        vars.insert(
            "site".to_string(),
            serde_yaml::Value::String("plant-a".to_string()),
        );

        let config = config_with_vars(vars);

        let result = config.substitute_string("Rate is ${rate}");
        assert!(result.is_ok_and(|r| r == "Rate is 30"));

        let result = config.substitute_string("Site: ${site}, Rate: ${rate}");
        assert!(result.is_ok_and(|r| r == "Site: plant-a, Rate: 30"));
    }

    #[test]
    fn test_variable_substitution_dollar_paren() {
        let mut vars = HashMap::new();
        vars.insert("rate".to_string(), serde_yaml::Value::Number(30.into()));

        let config = config_with_vars(vars);

        let result = config.substitute_string("Rate is $(rate)");
        assert!(result.is_ok_and(|r| r == "Rate is 30"));
    }

    #[test]
    fn test_variable_not_found() {
        let config = config_with_vars(HashMap::new());

        let result = config.substitute_string("Rate is ${rate}");
        assert!(result.is_err());
        assert!(matches!(result, Err(ChainError::VariableNotFound(_))));
    }

    #[test]
    fn test_substitute_yaml_value() {
        let mut vars = HashMap::new();
        vars.insert("rate".to_string(), serde_yaml::Value::Number(30.into()));
        vars.insert(
            "folder".to_string(),
            serde_yaml::Value::String("/data".to_string()),
        );

        let config = config_with_vars(vars);

        let input = serde_yaml::Value::Mapping({
            let mut map = serde_yaml::Mapping::new();
            map.insert(
                serde_yaml::Value::String("sample_rate".to_string()),
                serde_yaml::Value::String("${rate}".to_string()),
            );
            map.insert(
                serde_yaml::Value::String("folder_path".to_string()),
                serde_yaml::Value::String("${folder}/inputs".to_string()),
            );
            map
        });

        let result = config.substitute_value(&input);
        assert!(result.is_ok());
        let Ok(serde_yaml::Value::Mapping(map)) = result else {
            assert!(false, "Expected mapping");
            return;
        };
        let rate = map.get(serde_yaml::Value::String("sample_rate".to_string()));
        assert!(rate.is_some_and(|r| r == &serde_yaml::Value::String("30".to_string())));

        let folder = map.get(serde_yaml::Value::String("folder_path".to_string()));
        assert!(folder.is_some_and(|f| f == &serde_yaml::Value::String("/data/inputs".to_string())));
    }

    #[test]
    fn test_stage_category_flattens_scalars() {
        let yaml = r#"
variables:
  factor: "2.5"

chains:
  demo: ["scale-stage"]

config:
  scale-stage:
    plugin: scale
    factor: ${factor}
    enable: true
    limit: 10
"#;
        let Ok(config) = serde_yaml::from_str::<ChainConfig>(yaml) else {
            assert!(false, "Expected chain YAML to parse");
            return;
        };

        let Ok(category) = config.stage_category("scale-stage") else {
            assert!(false, "Expected stage category to resolve");
            return;
        };
        assert_eq!(category.name(), "scale-stage");
        assert_eq!(category.plugin_name(), Some("scale"));
        assert_eq!(category.item("factor"), Some("2.5"));
        assert_eq!(category.item("enable"), Some("true"));
        assert_eq!(category.item("limit"), Some("10"));
    }

    #[test]
    fn test_stage_category_requires_plugin_item() {
        let yaml = r#"
chains:
  demo: ["bare-stage"]

config:
  bare-stage:
    factor: "2.5"
"#;
        let Ok(config) = serde_yaml::from_str::<ChainConfig>(yaml) else {
            assert!(false, "Expected chain YAML to parse");
            return;
        };

        let result = config.stage_category("bare-stage");
        assert!(matches!(result, Err(ChainError::InvalidConfig(_))));
    }

    #[test]
    fn test_stage_category_rejects_nested_items() {
        let yaml = r#"
config:
  deep-stage:
    plugin: scale
    nested:
      a: 1
"#;
        let Ok(config) = serde_yaml::from_str::<ChainConfig>(yaml) else {
            assert!(false, "Expected chain YAML to parse");
            return;
        };

        let result = config.stage_category("deep-stage");
        assert!(matches!(result, Err(ChainError::InvalidConfig(_))));
    }

    #[test]
    fn test_only_chain_requires_exactly_one() {
        let mut chains = HashMap::new();
        chains.insert("solo".to_string(), vec!["stage".to_string()]);
        let config = ChainConfig {
            variables: HashMap::new(),
            chains,
            config: HashMap::new(),
        };
        assert_eq!(config.only_chain(), Some("solo".to_string()));

        let empty = ChainConfig {
            variables: HashMap::new(),
            chains: HashMap::new(),
            config: HashMap::new(),
        };
        assert_eq!(empty.only_chain(), None);
    }

    #[test]
    fn test_load_with_fallback_extension() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let yaml_path = dir.path().join("sample-chain.yaml");
        if fs::write(
            &yaml_path,
            r#"
chains:
  demo: ["stage"]
"#,
        )
        .is_err()
        {
            return;
        }

        let config = ChainConfig::load(dir.path().join("sample-chain"));
        assert!(config.is_ok_and(|c| c.get_chain("demo").is_some()));
    }
}
