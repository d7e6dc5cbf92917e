use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use autoscript_chat::ExchangeOptions;
use autoscript_llm::{DEFAULT_GEMINI_MODEL, DEFAULT_TEMPERATURE, ProviderConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "gemini";
pub const SETTINGS_DIRECTORY_NAME: &str = "autoscript";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const AUTH_FILE_NAME: &str = "auth.json";
pub const ENV_PREFIX: &str = "AUTOSCRIPT_";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are AutoScript AI, an expert Senior SDET and Architect.

MISSION:
- Genuinely analyze provided URLs using search or internal knowledge.
- DO NOT generate generic boilerplate code.
- If a user provides a URL, research the specific site structure, features, and common flows of THAT SPECIFIC WEBSITE.
- Generate UNIQUE test scenarios for every request, focused on different sub-features.

CODE QUALITY:
- Language: Java
- Framework: Selenium 4 + TestNG
- Pattern: Page Object Model (POM).
- Selectors: Use highly specific and robust selectors identified from actual site analysis.
- Diversity: Cover Positive, Negative, and Edge cases tailored to the URL's purpose.

RESPONSE STRUCTURE:
1. **Site Intelligence**: Brief technical findings about the URL's UI technology and key selectors found.
2. **Unique Test Scenarios**: At least 3 distinct scenarios you are automating.
3. **Architecture**: Separate Page Class(es) and Test Class.
4. **Execution Notes**: Specific tips for running these tests on the target site.

Stay technical, professional, and precise.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Empty means the provider's own default endpoint.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Google Search grounding for Gemini requests.
    #[serde(default = "default_search_grounding")]
    pub search_grounding: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model_name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: None,
            system_instruction: default_system_instruction(),
            search_grounding: default_search_grounding(),
        }
    }
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
    }

    pub fn exchange_options(&self) -> ExchangeOptions {
        ExchangeOptions {
            model_id: Some(self.model_name.clone()),
            preamble: Some(self.system_instruction.clone())
                .filter(|instruction| !instruction.trim().is_empty()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            search_grounding: self.search_grounding,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Copy suitable for display, with the API key masked.
    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        if !redacted.api_key.is_empty() {
            let tail = redacted
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<String>();
            redacted.api_key = format!("****{tail}");
        }
        redacted
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_ascii_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().trim_end_matches('/').to_string();
        self.model_name = if self.model_name.trim().is_empty() {
            default_model_name()
        } else {
            self.model_name.trim().to_string()
        };
        self.temperature = self
            .temperature
            .filter(|temperature| temperature.is_finite())
            .map(|temperature| temperature.clamp(0.0, 2.0));
        self.max_tokens = self.max_tokens.filter(|max_tokens| *max_tokens > 0);
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ProviderSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".autoscript"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layered(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Login state lives next to the settings file.
    pub fn auth_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(|parent| parent.join(AUTH_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(AUTH_FILE_NAME))
    }

    pub fn settings(&self) -> Arc<ProviderSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ProviderSettings) -> SettingsResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file when present, then `AUTOSCRIPT_*` variables.
    fn load_layered(path: &Path) -> ProviderSettings {
        let mut figment = Figment::from(Serialized::defaults(ProviderSettings::default()));

        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ProviderSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ProviderSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ProviderSettings) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
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

        tracing::info!("saved settings to {:?}", self.config_path);
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

pub type SettingsResult<T> = Result<T, SettingsError>;

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_model_name() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_temperature() -> Option<f64> {
    Some(DEFAULT_TEMPERATURE)
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_search_grounding() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let store = SettingsStore::new(jail.directory().join("absent/settings.json"));
            assert_eq!(*store.settings(), ProviderSettings::default());
            assert!(!store.settings().is_valid());
            Ok(())
        });
    }

    #[test]
    fn file_values_override_defaults_and_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{ "api_key": " from-file ", "model_name": "gemini-2.5-pro", "endpoint": "https://proxy.local/" }"#,
            )?;
            jail.set_env("AUTOSCRIPT_API_KEY", "from-env");
            jail.set_env("AUTOSCRIPT_SEARCH_GROUNDING", "false");

            let store = SettingsStore::new(jail.directory().join("settings.json"));
            let settings = store.settings();
            assert_eq!(settings.api_key, "from-env");
            assert_eq!(settings.model_name, "gemini-2.5-pro");
            assert_eq!(settings.endpoint, "https://proxy.local");
            assert_eq!(settings.provider_id, DEFAULT_PROVIDER_ID);
            assert_eq!(settings.temperature, Some(DEFAULT_TEMPERATURE));
            assert!(!settings.search_grounding);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", "{ not json")?;
            let store = SettingsStore::new(jail.directory().join("settings.json"));
            assert_eq!(*store.settings(), ProviderSettings::default());
            Ok(())
        });
    }

    #[test]
    fn update_persists_normalized_settings() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested/settings.json");
            let store = SettingsStore::new(path.clone());

            let settings = ProviderSettings {
                provider_id: " OpenAI ".to_string(),
                api_key: " key ".to_string(),
                model_name: "  ".to_string(),
                temperature: Some(9.0),
                max_tokens: Some(0),
                ..ProviderSettings::default()
            };
            store.update(settings).expect("update succeeds");

            let current = store.settings();
            assert_eq!(current.provider_id, "openai");
            assert_eq!(current.api_key, "key");
            assert_eq!(current.model_name, DEFAULT_GEMINI_MODEL);
            assert_eq!(current.temperature, Some(2.0));
            assert_eq!(current.max_tokens, None);

            let reloaded = SettingsStore::new(path);
            assert_eq!(*reloaded.settings(), *current);
            Ok(())
        });
    }

    #[test]
    fn exchange_options_carry_model_and_instruction() {
        let settings = ProviderSettings {
            system_instruction: "   ".to_string(),
            max_tokens: Some(512),
            ..ProviderSettings::default()
        };
        let options = settings.exchange_options();
        assert_eq!(options.model_id.as_deref(), Some(DEFAULT_GEMINI_MODEL));
        assert_eq!(options.preamble, None);
        assert_eq!(options.temperature, Some(DEFAULT_TEMPERATURE));
        assert_eq!(options.max_tokens, Some(512));
        assert!(options.search_grounding);

        assert!(
            ProviderSettings::default()
                .exchange_options()
                .preamble
                .is_some_and(|preamble| preamble.contains("Page Object Model"))
        );
    }

    #[test]
    fn redacted_masks_all_but_key_tail() {
        let settings = ProviderSettings {
            api_key: "secret-1234".to_string(),
            ..ProviderSettings::default()
        };
        assert_eq!(settings.redacted().api_key, "****1234");
        assert_eq!(ProviderSettings::default().redacted().api_key, "");
    }

    #[test]
    fn auth_path_sits_next_to_settings() {
        Jail::expect_with(|jail| {
            let store = SettingsStore::new(jail.directory().join("settings.json"));
            assert_eq!(store.auth_path(), jail.directory().join(AUTH_FILE_NAME));
            Ok(())
        });
    }
}
