//! Shared start-up: configuration, agent catalog, providers, sessions.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use wayfarer_agent::{AgentTool, LlmAgent};
use wayfarer_config::{AgentCatalog, AppConfig, ConfigError};
use wayfarer_core::event::EventBus;
use wayfarer_core::schema::OutputSchema;
use wayfarer_core::session::SessionService;
use wayfarer_providers::ProviderRouter;
use wayfarer_sessions::{InMemorySessionService, SqliteSessionService};
use wayfarer_tools::{ToolSettings, registry_from_names};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Built-in catalog; user catalog entries override these by name.
pub const DEFAULT_AGENTS: &str = include_str!("../agents.yaml");

/// Everything a command needs to build and run agents.
pub struct Workspace {
    pub config: AppConfig,
    pub catalog: AgentCatalog,
    pub providers: ProviderRouter,
    pub tool_settings: ToolSettings,
    pub event_bus: Arc<EventBus>,
}

impl Workspace {
    pub fn load(agents_file: Option<PathBuf>) -> CliResult<Self> {
        let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        if agents_file.is_some() {
            config.agents_file = agents_file;
        }
        let catalog = load_catalog(&config)?;
        debug!(agents = catalog.len(), path = %config.agents_path().display(), "Agent catalog loaded");
        let providers = wayfarer_providers::build_from_config(&config);
        let tool_settings = ToolSettings {
            tavily_api_key: config.tools.tavily_api_key.clone(),
            request_timeout_secs: config.tools.request_timeout_secs,
        };

        Ok(Self {
            config,
            catalog,
            providers,
            tool_settings,
            event_bus: Arc::new(EventBus::default()),
        })
    }

    /// Fail early, with setup instructions, when no API key is configured.
    pub fn require_api_key(&self) -> CliResult {
        if self.config.has_api_key() {
            return Ok(());
        }
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables (or put it in .env):");
        eprintln!("    OPENAI_API_KEY=sk-...          (OpenAI)");
        eprintln!("    OPENROUTER_API_KEY=sk-or-...   (OpenRouter)");
        eprintln!("    WAYFARER_API_KEY=...           (any provider)");
        eprintln!();
        eprintln!("  Or add it to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        Err("No API key found. See above for setup instructions.".into())
    }

    /// Build a catalog agent with its model, tools, output key and schema.
    /// Agents listed under `agent_tools` are built the same way and attached
    /// as tools.
    pub fn agent(&self, name: &str) -> CliResult<LlmAgent> {
        self.build_agent(name, &mut Vec::new())
    }

    fn build_agent(&self, name: &str, building: &mut Vec<String>) -> CliResult<LlmAgent> {
        if building.iter().any(|outer| outer == name) {
            return Err(format!("Agent tools form a cycle: {} -> {name}", building.join(" -> ")).into());
        }
        let definition = self.catalog.get(name)?;
        let requested = definition.model_or(&self.config.default_model);
        let (provider, model) = self
            .providers
            .resolve(requested)
            .ok_or_else(|| format!("No provider configured for model '{requested}'"))?;
        let tools = registry_from_names(&definition.tools, &self.tool_settings)
            .map_err(|unknown| format!("Agent '{name}' uses unknown tool '{unknown}'"))?;

        let mut agent = LlmAgent::new(name, provider, model, &definition.instruction)
            .with_description(&definition.description)
            .with_tools(tools)
            .with_temperature(self.config.default_temperature)
            .with_max_tokens(self.config.default_max_tokens);
        if let Some(key) = &definition.output_key {
            agent = agent.with_output_key(key);
        }
        if let Some(fields) = &definition.output_schema {
            let fields: Vec<(&str, &str)> = fields.iter().map(|(f, d)| (f.as_str(), d.as_str())).collect();
            agent = agent.with_output_schema(OutputSchema::string_fields(format!("{name}_output"), &fields));
        }

        building.push(name.to_string());
        for tool_agent in &definition.agent_tools {
            let sub = self.build_agent(tool_agent, building)?;
            debug!(agent = %name, tool = %tool_agent, "Attaching agent as tool");
            agent = agent.with_tool(Arc::new(AgentTool::new(Arc::new(sub))));
        }
        building.pop();
        Ok(agent)
    }

    /// The session store: SQLite when persisting (or configured), else memory.
    pub async fn sessions(&self, persist: bool) -> CliResult<Arc<dyn SessionService>> {
        if persist || self.config.sessions.backend == "sqlite" {
            std::fs::create_dir_all(AppConfig::config_dir())?;
            let url = self.config.sessions.resolved_database_url();
            let service = SqliteSessionService::new(&url).await?;
            info!(%url, "Using SQLite session store");
            return Ok(Arc::new(service));
        }
        Ok(Arc::new(InMemorySessionService::new()))
    }
}

/// The built-in catalog merged with the user's file, if there is one.
pub fn load_catalog(config: &AppConfig) -> Result<AgentCatalog, ConfigError> {
    let mut catalog = AgentCatalog::from_yaml_str(DEFAULT_AGENTS)?;
    let path = config.agents_path();
    // An explicitly named file must exist; the default location is optional.
    if config.agents_file.is_some() || path.exists() {
        catalog.merge(AgentCatalog::load(&path)?);
    }
    Ok(catalog)
}

/// Workspace over the built-in catalog with a dummy key. Nothing is sent.
#[cfg(test)]
pub(crate) fn test_workspace() -> Workspace {
    let config = AppConfig {
        api_key: Some("sk-test".into()),
        ..AppConfig::default()
    };
    Workspace {
        providers: wayfarer_providers::build_from_config(&config),
        catalog: AgentCatalog::from_yaml_str(DEFAULT_AGENTS).unwrap(),
        tool_settings: ToolSettings::default(),
        event_bus: Arc::new(EventBus::default()),
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_agent::Agent;
    use wayfarer_core::tool::Tool;

    fn workspace() -> Workspace {
        test_workspace()
    }

    #[test]
    fn default_catalog_builds_every_agent() {
        let ws = workspace();
        for name in ws.catalog.names() {
            ws.agent(name).unwrap();
        }
    }

    #[test]
    fn agent_reads_follow_placeholders() {
        let ws = workspace();
        let refiner = ws.agent("refiner_agent").unwrap();
        assert_eq!(
            refiner.reads(),
            vec!["current_plan".to_string(), "criticism".to_string(), "COMPLETION_PHRASE".to_string()]
        );
        assert_eq!(refiner.writes(), vec!["current_plan".to_string()]);
        assert!(refiner.tools().get("exit_loop").is_some());
    }

    #[test]
    fn concierge_calls_the_food_critic_as_a_tool() {
        let concierge = workspace().agent("concierge_agent").unwrap();
        let critic = concierge.tools().get("food_critic_agent").unwrap();
        assert_eq!(critic.parameters_schema()["required"][0], "request");
        assert!(concierge.output_schema().is_none());
    }

    #[test]
    fn formatter_requires_structured_reply() {
        let formatter = workspace().agent("foodie_formatter_agent").unwrap();
        let schema = formatter.output_schema().unwrap();
        assert_eq!(schema.name, "foodie_formatter_agent_output");
        assert_eq!(schema.required_fields(), vec!["reason", "restaurant_name"]);
        assert_eq!(formatter.reads(), vec!["destination".to_string()]);
        assert_eq!(formatter.output_key(), Some("structured_foodie_data"));
    }

    #[test]
    fn agent_tool_cycle_is_reported() {
        let mut ws = workspace();
        let overrides = AgentCatalog::from_yaml_str(
            "ping:\n  instruction: Ask pong.\n  agent_tools: [pong]\npong:\n  instruction: Ask ping.\n  agent_tools: [ping]\n",
        )
        .unwrap();
        ws.catalog.merge(overrides);

        let err = ws.agent("ping").err().unwrap();
        assert!(err.to_string().contains("ping -> pong -> ping"));
    }

    #[test]
    fn unknown_agent_tool_is_reported() {
        let mut ws = workspace();
        ws.catalog
            .merge(AgentCatalog::from_yaml_str("host:\n  instruction: Go.\n  agent_tools: [ghost_agent]\n").unwrap());
        let err = ws.agent("host").err().unwrap();
        assert!(err.to_string().contains("ghost_agent"));
    }

    #[test]
    fn missing_agent_is_reported() {
        let err = workspace().agent("concierge").err().unwrap();
        assert!(err.to_string().contains("concierge"));
    }

    #[test]
    fn explicit_agents_file_must_exist() {
        let config = AppConfig {
            agents_file: Some(PathBuf::from("/nonexistent/agents.yaml")),
            ..AppConfig::default()
        };
        assert!(load_catalog(&config).is_err());
    }

    #[test]
    fn user_catalog_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, "foodie_agent:\n  instruction: Street food only.\n").unwrap();

        let config = AppConfig {
            agents_file: Some(path),
            ..AppConfig::default()
        };
        let catalog = load_catalog(&config).unwrap();
        assert_eq!(catalog.get("foodie_agent").unwrap().instruction, "Street food only.");
        assert!(catalog.contains("router_agent"));
    }
}
