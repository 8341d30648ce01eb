//! Storage for the LLM provider configuration, API key included.
use crate::errors::SecretsError;
use crate::llm::provider::Provider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub const SECRETS_SERVICE: &str = "papertok.llm";
pub const SECRETS_ACCOUNT: &str = "provider-config";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    /// Provider default when `None`.
    #[serde(default)]
    pub base_url: Option<String>,
    pub model_name: String,
    /// Only used by providers that version their API through a header.
    #[serde(default)]
    pub api_version: Option<String>,
}

impl LlmConfig {
    /// A config with the provider's default endpoint and model.
    pub fn new(provider: Provider, api_key: &str) -> Self {
        LlmConfig {
            provider,
            api_key: api_key.to_string(),
            base_url: None,
            model_name: provider.default_model().to_string(),
            api_version: None,
        }
    }

    pub fn effective_base_url(&self) -> &str {
        match self.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim(),
            _ => self.provider.default_base_url(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model_name", &self.model_name)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Device-local secret storage holding at most one `LlmConfig`.
pub trait SecretsStore: Send + Sync {
    fn save(&self, config: &LlmConfig) -> Result<(), SecretsError>;
    fn load(&self) -> Result<Option<LlmConfig>, SecretsError>;
    fn delete(&self) -> Result<(), SecretsError>;
}

/// Keeps the config in `{dir}/papertok.llm.provider-config.json`, readable by the owner only.
pub struct FileSecretsStore {
    path: PathBuf,
}

impl FileSecretsStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let path = dir
            .as_ref()
            .join(format!("{}.{}.json", SECRETS_SERVICE, SECRETS_ACCOUNT));
        FileSecretsStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretsStore for FileSecretsStore {
    fn save(&self, config: &LlmConfig) -> Result<(), SecretsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(config)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(provider = %config.provider, "Saved LLM configuration");
        Ok(())
    }

    fn load(&self) -> Result<Option<LlmConfig>, SecretsError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn delete(&self) -> Result<(), SecretsError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemorySecretsStore {
    config: Mutex<Option<LlmConfig>>,
}

impl MemorySecretsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LlmConfig) -> Self {
        MemorySecretsStore {
            config: Mutex::new(Some(config)),
        }
    }
}

impl SecretsStore for MemorySecretsStore {
    fn save(&self, config: &LlmConfig) -> Result<(), SecretsError> {
        *self.config.lock().map_err(|_| poisoned())? = Some(config.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<LlmConfig>, SecretsError> {
        Ok(self.config.lock().map_err(|_| poisoned())?.clone())
    }

    fn delete(&self) -> Result<(), SecretsError> {
        *self.config.lock().map_err(|_| poisoned())? = None;
        Ok(())
    }
}

fn poisoned() -> SecretsError {
    SecretsError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "secrets lock poisoned",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretsStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let mut config = LlmConfig::new(Provider::Anthropic, "sk-ant-test");
        config.api_version = Some("2023-06-01".to_string());
        store.save(&config).unwrap();
        assert_eq!(
            store.path().file_name().unwrap(),
            "papertok.llm.provider-config.json"
        );
        assert_eq!(store.load().unwrap(), Some(config));

        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
        // deleting twice is fine
        store.delete().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretsStore::new(dir.path());
        store
            .save(&LlmConfig::new(Provider::OpenAi, "sk-test"))
            .unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = LlmConfig::new(Provider::Gemini, "very-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_effective_base_url_falls_back_to_provider_default() {
        let mut config = LlmConfig::new(Provider::OpenAi, "sk-test");
        assert_eq!(config.effective_base_url(), "https://api.openai.com/v1");
        config.base_url = Some("  ".to_string());
        assert_eq!(config.effective_base_url(), "https://api.openai.com/v1");
        config.base_url = Some("http://localhost:8080/v1".to_string());
        assert_eq!(config.effective_base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySecretsStore::new();
        assert!(store.load().unwrap().is_none());
        store
            .save(&LlmConfig::new(Provider::OpenAi, "sk-test"))
            .unwrap();
        assert_eq!(store.load().unwrap().unwrap().api_key, "sk-test");
        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
