use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use formchat::{ChatCoreConfig, DEFAULT_WELCOME_MESSAGE};
use formchat_client::{ClientConfig, DEFAULT_CHAT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "formchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "FORMCHAT_";
/// Deployment variable naming the chat endpoint, honoured for compatibility.
pub const LEGACY_ENDPOINT_ENV: &str = "PUBLIC_FORM_CHAT_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_chat_api_url")]
    pub chat_api_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Blank disables the greeting.
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    /// Seconds between automatic status polls; 0 turns polling off.
    #[serde(default)]
    pub status_poll_interval_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            chat_api_url: default_chat_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            welcome_message: default_welcome_message(),
            status_poll_interval_secs: 0,
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.chat_api_url = if self.chat_api_url.trim().is_empty() {
            default_chat_api_url()
        } else {
            self.chat_api_url.trim().to_string()
        };
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        self.welcome_message = self.welcome_message.trim().to_string();
        self
    }

    pub fn with_chat_api_url(mut self, chat_api_url: impl Into<String>) -> Self {
        self.chat_api_url = chat_api_url.into();
        self
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.chat_api_url.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn core_config(&self) -> ChatCoreConfig {
        if self.welcome_message.is_empty() {
            ChatCoreConfig::default().without_welcome_message()
        } else {
            ChatCoreConfig::default().with_welcome_message(self.welcome_message.clone())
        }
    }

    pub fn status_poll_interval(&self) -> Option<Duration> {
        (self.status_poll_interval_secs > 0)
            .then(|| Duration::from_secs(self.status_poll_interval_secs))
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
            .unwrap_or_else(|| PathBuf::from(".formchat"))
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

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Layers defaults, the JSON file, `FORMCHAT_*` variables and the legacy endpoint variable.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(
                Env::raw()
                    .only(&[LEGACY_ENDPOINT_ENV])
                    .map(|_| "chat_api_url".into()),
            )
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults and environment");
        }

        match Self::figment(path).extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
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

fn default_chat_api_url() -> String {
    DEFAULT_CHAT_ENDPOINT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_welcome_message() -> String {
    DEFAULT_WELCOME_MESSAGE.to_string()
}
