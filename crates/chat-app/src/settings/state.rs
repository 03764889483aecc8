use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use portal_llm::{
    CredentialSource, DEFAULT_ENDPOINT, DEFAULT_KEEP_TURNS, DEFAULT_OPENAI_MODEL,
    OPENAI_PROVIDER_ID, ProviderConfig,
};
use portal_storage::ThreadStore;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "portal";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "PORTAL_";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_keep_turns")]
    pub keep_turns: usize,
    /// Overrides where the thread list is stored.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            keep_turns: default_keep_turns(),
            store_path: None,
        }
    }
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.endpoint)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(ThreadStore::default_store_path)
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model = non_blank_or(self.model, default_model);
        self.keep_turns = self.keep_turns.max(1);
        self.store_path = self
            .store_path
            .filter(|path| !path.as_os_str().is_empty());
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
            .unwrap_or_else(|| PathBuf::from(".portal"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
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

    pub fn settings(&self) -> Arc<ProviderSettings> {
        self.settings.load_full()
    }

    /// Credential source that always sees the latest stored key.
    pub fn credentials(&self) -> SettingsCredentials {
        SettingsCredentials::new(self.settings.clone())
    }

    pub fn update(&self, settings: ProviderSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Records the active model so the next launch starts with it.
    pub fn set_model(&self, model_id: &str) -> Result<(), SettingsError> {
        let mut settings = (*self.settings()).clone();
        settings.model = model_id.to_string();
        self.update(settings)
    }

    fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ProviderSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX))
    }

    fn load_from_disk(path: &Path) -> ProviderSettings {
        match Self::figment(path).extract::<ProviderSettings>() {
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

    fn persist(&self, settings: &ProviderSettings) -> Result<(), SettingsError> {
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

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

/// Reads the API key from live settings, then from the process environment.
#[derive(Clone)]
pub struct SettingsCredentials {
    settings: Arc<ArcSwap<ProviderSettings>>,
    fallback_env_var: &'static str,
}

impl SettingsCredentials {
    pub fn new(settings: Arc<ArcSwap<ProviderSettings>>) -> Self {
        Self {
            settings,
            fallback_env_var: OPENAI_API_KEY_ENV,
        }
    }

    pub fn with_fallback_env_var(mut self, name: &'static str) -> Self {
        self.fallback_env_var = name;
        self
    }
}

impl CredentialSource for SettingsCredentials {
    fn api_key(&self) -> Option<String> {
        let settings = self.settings.load();
        if settings.has_api_key() {
            return Some(settings.api_key.trim().to_string());
        }

        std::env::var(self.fallback_env_var)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
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

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    OPENAI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_keep_turns() -> usize {
    DEFAULT_KEEP_TURNS
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET_ENV_VAR: &str = "PORTAL_TEST_KEY_THAT_IS_NEVER_SET";

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let settings = store.settings();
        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.keep_turns, 8);
        assert!(!settings.has_api_key());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ProviderSettings::default());
    }

    #[test]
    fn partial_file_is_merged_over_defaults_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"api_key":"  sk-file  ","model":" ","keep_turns":0,"endpoint":"http://localhost:8080/v1"}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.api_key, "sk-file");
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.keep_turns, 1);
        assert_eq!(settings.endpoint, "http://localhost:8080/v1");
        assert_eq!(settings.provider_id, "openai");
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());
        assert_eq!(store.config_path(), path.as_path());

        store
            .update(ProviderSettings {
                api_key: "sk-saved".to_string(),
                keep_turns: 3,
                ..ProviderSettings::default()
            })
            .unwrap();
        store.set_model("gpt-4o").unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.api_key, "sk-saved");
        assert_eq!(reloaded.keep_turns, 3);
        assert_eq!(reloaded.model, "gpt-4o");
    }

    #[test]
    fn credentials_follow_live_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let credentials = store.credentials().with_fallback_env_var(UNSET_ENV_VAR);
        assert_eq!(credentials.api_key(), None);

        store
            .update(ProviderSettings {
                api_key: "sk-live".to_string(),
                ..ProviderSettings::default()
            })
            .unwrap();
        assert_eq!(credentials.api_key().as_deref(), Some("sk-live"));
    }

    #[test]
    fn explicit_store_path_overrides_default() {
        let settings = ProviderSettings {
            store_path: Some(PathBuf::from("/tmp/portal-threads.json")),
            ..ProviderSettings::default()
        };
        assert_eq!(
            settings.resolved_store_path(),
            PathBuf::from("/tmp/portal-threads.json")
        );
        assert_eq!(
            ProviderSettings::default().resolved_store_path(),
            ThreadStore::default_store_path()
        );
    }
}
