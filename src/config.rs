use std::{fs, io::ErrorKind, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "todo_client.toml";
const ENV_PREFIX: &str = "TODO_CLIENT__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Firebase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub api_key: String,
    pub project_id: String,
    pub auth_base_url: String,
    pub firestore_base_url: String,
    /// Secure Token API, used to refresh expired id tokens.
    pub token_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendKind,
    pub database_url: String,
    pub firebase: Option<FirebaseSettings>,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            database_url: "sqlite://./data/todo.db".into(),
            firebase: None,
            request_timeout_secs: 15,
        }
    }
}

/// On-disk shape of `todo_client.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    backend: Option<BackendKind>,
    database_url: Option<String>,
    request_timeout_secs: Option<u64>,
    firebase: Option<FileFirebaseSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileFirebaseSettings {
    api_key: Option<String>,
    project_id: Option<String>,
    auth_base_url: Option<String>,
    firestore_base_url: Option<String>,
    token_base_url: Option<String>,
}

/// Partially filled firebase section, completed in `finish`.
#[derive(Debug, Default)]
struct FirebaseDraft {
    api_key: Option<String>,
    project_id: Option<String>,
    auth_base_url: Option<String>,
    firestore_base_url: Option<String>,
    token_base_url: Option<String>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut builder = SettingsBuilder::default();
        builder.apply_file(toml::from_str(raw)?);
        builder.finish()
    }

    /// Applies `TODO_CLIENT__*` variables read through `lookup`.
    pub fn apply_env<F>(self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = SettingsBuilder::from_settings(self);
        builder.apply_env(lookup)?;
        builder.finish()
    }
}

#[derive(Debug, Default)]
struct SettingsBuilder {
    settings: Settings,
    firebase: FirebaseDraft,
}

impl SettingsBuilder {
    fn from_settings(settings: Settings) -> Self {
        let firebase = match &settings.firebase {
            Some(fb) => FirebaseDraft {
                api_key: Some(fb.api_key.clone()),
                project_id: Some(fb.project_id.clone()),
                auth_base_url: Some(fb.auth_base_url.clone()),
                firestore_base_url: Some(fb.firestore_base_url.clone()),
                token_base_url: Some(fb.token_base_url.clone()),
            },
            None => FirebaseDraft::default(),
        };
        Self { settings, firebase }
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.backend {
            self.settings.backend = v;
        }
        if let Some(v) = file.database_url {
            self.settings.database_url = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.settings.request_timeout_secs = v;
        }
        if let Some(fb) = file.firebase {
            self.firebase.api_key = fb.api_key.or(self.firebase.api_key.take());
            self.firebase.project_id = fb.project_id.or(self.firebase.project_id.take());
            self.firebase.auth_base_url = fb.auth_base_url.or(self.firebase.auth_base_url.take());
            self.firebase.firestore_base_url = fb
                .firestore_base_url
                .or(self.firebase.firestore_base_url.take());
            self.firebase.token_base_url = fb
                .token_base_url
                .or(self.firebase.token_base_url.take());
        }
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("BACKEND") {
            let kind = v.trim().to_ascii_lowercase();
            self.settings.backend = match kind.as_str() {
                "sqlite" => BackendKind::Sqlite,
                "firebase" => BackendKind::Firebase,
                _ => return Err(ConfigError::InvalidValue { key: "BACKEND", value: v }),
            };
        }
        if let Some(v) = var("DATABASE_URL") {
            self.settings.database_url = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.settings.request_timeout_secs = v.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: "REQUEST_TIMEOUT_SECS",
                    value: v.clone(),
                }
            })?;
        }
        if let Some(v) = var("FIREBASE_API_KEY") {
            self.firebase.api_key = Some(v);
        }
        if let Some(v) = var("FIREBASE_PROJECT_ID") {
            self.firebase.project_id = Some(v);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Settings, ConfigError> {
        if self.settings.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs",
                value: "0".into(),
            });
        }

        let draft = self.firebase;
        self.settings.firebase = match (draft.api_key, draft.project_id) {
            (Some(api_key), Some(project_id)) => Some(FirebaseSettings {
                api_key,
                project_id,
                auth_base_url: draft
                    .auth_base_url
                    .unwrap_or_else(|| crate::firebase::DEFAULT_AUTH_BASE_URL.into()),
                firestore_base_url: draft
                    .firestore_base_url
                    .unwrap_or_else(|| crate::firebase::DEFAULT_FIRESTORE_BASE_URL.into()),
                token_base_url: draft
                    .token_base_url
                    .unwrap_or_else(|| crate::firebase::DEFAULT_TOKEN_BASE_URL.into()),
            }),
            (None, _) if self.settings.backend == BackendKind::Firebase => {
                return Err(ConfigError::MissingFirebase("api_key"));
            }
            (_, None) if self.settings.backend == BackendKind::Firebase => {
                return Err(ConfigError::MissingFirebase("project_id"));
            }
            _ => None,
        };

        Ok(self.settings)
    }
}

/// Defaults, then `todo_client.toml` in the working directory if present,
/// then the process environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let mut builder = SettingsBuilder::default();

    match fs::read_to_string(path) {
        Ok(raw) => builder.apply_file(toml::from_str(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    }

    builder.apply_env(|name| std::env::var(name).ok())?;
    builder.finish()
}
