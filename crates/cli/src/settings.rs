use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use quill_chat::AgentProfile;
use quill_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig, RIG_OPENAI_PROVIDER_ID};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_AGENT_ID: &str = "assistant";
pub const SETTINGS_DIRECTORY_NAME: &str = "quill";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "QUILL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            id: DEFAULT_AGENT_ID.to_string(),
            name: "Assistant".to_string(),
            model_name: default_model_name(),
            system_prompt: "You are a helpful assistant.".to_string(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }
}

impl AgentSettings {
    fn normalized(mut self) -> Option<Self> {
        self.id = self.id.trim().to_string();
        self.model_name = self.model_name.trim().to_string();
        if self.id.is_empty() || self.model_name.is_empty() {
            return None;
        }

        self.name = match self.name.trim() {
            "" => self.id.clone(),
            name => name.to_string(),
        };
        self.tools = self
            .tools
            .into_iter()
            .map(|tool| tool.trim().to_string())
            .filter(|tool| !tool.is_empty())
            .collect();
        Some(self)
    }

    pub fn to_profile(&self) -> AgentProfile {
        AgentProfile::new(self.id.clone(), self.model_name.clone())
            .with_name(self.name.clone())
            .with_system_prompt(self.system_prompt.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_tools(self.tools.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSettings>,
    #[serde(default)]
    pub active_agent: String,
    #[serde(default)]
    pub show_thoughts: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            agents: default_agents(),
            active_agent: DEFAULT_AGENT_ID.to_string(),
            show_thoughts: false,
        }
    }
}

impl ChatSettings {
    /// `None` without an API key; the session then runs with no service.
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
        ))
    }

    pub fn active_agent(&self) -> Option<&AgentSettings> {
        self.agents
            .iter()
            .find(|agent| agent.id == self.active_agent)
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = match self.provider_id.trim() {
            "" => default_provider_id(),
            provider_id => provider_id.to_string(),
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = match self.endpoint.trim() {
            "" => default_endpoint(),
            endpoint => endpoint.to_string(),
        };

        self.agents = self
            .agents
            .into_iter()
            .filter_map(AgentSettings::normalized)
            .collect();
        if self.agents.is_empty() {
            self.agents.push(AgentSettings::default());
        }

        self.active_agent = self.active_agent.trim().to_string();
        if self.active_agent().is_none() {
            self.active_agent = self.agents[0].id.clone();
        }

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".quill"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file if present, then `QUILL_*` environment overrides.
    fn load_from(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found; using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings; using defaults"
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    RIG_OPENAI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_name() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_agents() -> Vec<AgentSettings> {
    vec![AgentSettings::default()]
}
