//! YAML agent catalog.
//!
//! ```yaml
//! trip_planner:
//!   model: gpt-4o-mini
//!   description: Plans a multi-day trip
//!   instruction: |
//!     You are a travel planner. ...
//!   output_key: current_plan
//!
//! concierge:
//!   instruction: Answer guests; ask food_critic for restaurant picks.
//!   agent_tools: [food_critic]
//!   output_schema:
//!     answer: Reply to the guest
//! ```

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One agent's static configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Model identifier; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Instruction template; may reference `{state_key}` placeholders
    pub instruction: String,

    /// State key the agent's reply is written under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,

    /// Built-in tool names to attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Other catalog agents to attach as callable tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_tools: Vec<String>,

    /// Structured reply: field name → description. Every field is a
    /// required string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<BTreeMap<String, String>>,
}

impl AgentDefinition {
    /// The model to use, given the configured default.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

/// Agent name → definition. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentCatalog {
    agents: BTreeMap<String, AgentDefinition>,
}

impl AgentCatalog {
    /// Parse a catalog from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let catalog: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let catalog: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        catalog.validate()?;

        tracing::debug!(path = %path.display(), agents = catalog.len(), "Loaded agent catalog");
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, def) in &self.agents {
            if def.instruction.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{name}' has an empty instruction"
                )));
            }
            if def.agent_tools.iter().any(|tool| tool == name) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{name}' lists itself in agent_tools"
                )));
            }
            if def.output_schema.as_ref().is_some_and(BTreeMap::is_empty) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{name}' has an output_schema with no fields"
                )));
            }
        }
        Ok(())
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Result<&AgentDefinition, ConfigError> {
        self.agents
            .get(name)
            .ok_or_else(|| ConfigError::MissingAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Agent names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentDefinition)> {
        self.agents.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Merge `other` over this catalog; entries in `other` win.
    pub fn merge(&mut self, other: AgentCatalog) {
        self.agents.extend(other.agents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
foodie_agent:
  model: gpt-4o-mini
  description: Finds restaurants
  instruction: |
    You are an expert food critic. Recommend one restaurant.
  output_key: destination
  tools: [web_search]

transportation_agent:
  description: Gives directions
  instruction: "Give directions to {destination}."
"#;

    #[test]
    fn parses_catalog() {
        let catalog = AgentCatalog::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 2);

        let foodie = catalog.get("foodie_agent").unwrap();
        assert_eq!(foodie.output_key.as_deref(), Some("destination"));
        assert_eq!(foodie.tools, vec!["web_search".to_string()]);
        assert_eq!(foodie.model_or("default"), "gpt-4o-mini");

        let transport = catalog.get("transportation_agent").unwrap();
        assert_eq!(transport.model_or("default"), "default");
        assert!(transport.instruction.contains("{destination}"));
    }

    #[test]
    fn missing_agent_is_an_error() {
        let catalog = AgentCatalog::from_yaml_str(SAMPLE).unwrap();
        let err = catalog.get("weather_agent").unwrap_err();
        assert!(matches!(err, ConfigError::MissingAgent(ref name) if name == "weather_agent"));
    }

    #[test]
    fn empty_instruction_rejected() {
        let err = AgentCatalog::from_yaml_str("bad:\n  instruction: \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn instruction_is_required() {
        assert!(AgentCatalog::from_yaml_str("bad:\n  description: no prompt\n").is_err());
    }

    #[test]
    fn parses_agent_tools_and_output_schema() {
        let catalog = AgentCatalog::from_yaml_str(
            r#"
food_critic:
  instruction: Recommend one restaurant.
concierge:
  instruction: Help the guest.
  agent_tools: [food_critic]
  output_schema:
    restaurant_name: The recommended restaurant
    reason: Why it was chosen
"#,
        )
        .unwrap();

        let concierge = catalog.get("concierge").unwrap();
        assert_eq!(concierge.agent_tools, vec!["food_critic".to_string()]);
        let fields = concierge.output_schema.as_ref().unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["reason", "restaurant_name"]);

        let critic = catalog.get("food_critic").unwrap();
        assert!(critic.agent_tools.is_empty());
        assert!(critic.output_schema.is_none());
    }

    #[test]
    fn agent_cannot_be_its_own_tool() {
        let err = AgentCatalog::from_yaml_str("loop:\n  instruction: Go.\n  agent_tools: [loop]\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("itself")));
    }

    #[test]
    fn empty_output_schema_rejected() {
        let err = AgentCatalog::from_yaml_str("bad:\n  instruction: Go.\n  output_schema: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn loads_from_file_and_merges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SAMPLE}").unwrap();
        let mut catalog = AgentCatalog::load(file.path()).unwrap();

        let overrides = AgentCatalog::from_yaml_str(
            "foodie_agent:\n  instruction: Only street food.\n",
        )
        .unwrap();
        catalog.merge(overrides);

        assert_eq!(catalog.get("foodie_agent").unwrap().instruction, "Only street food.");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["foodie_agent", "transportation_agent"]);
    }

    #[test]
    fn unreadable_file_is_read_error() {
        let err = AgentCatalog::load(Path::new("/nonexistent/agents.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
