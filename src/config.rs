use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::Database;
use crate::llm::{ModelKind, Provider, RetryPolicy};
use crate::search::DEFAULT_SEARCH_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Ollama,
    Openai,
}

/// Backend server configuration. Every flag can also come from the
/// environment (or a `.env` file loaded by the binary).
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[arg(long, env = "JAMAL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "JAMAL_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Holds `jamal.db`, `uploads/` and `links/`.
    #[arg(long, env = "JAMAL_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "JAMAL_PROVIDER", value_enum, default_value_t = ProviderKind::Ollama)]
    pub provider: ProviderKind,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "JAMAL_SIMPLE_MODEL", default_value = "llama3.2:1b")]
    pub simple_model: String,

    #[arg(long, env = "JAMAL_REASONED_MODEL", default_value = "deepseek-r1:1.5b")]
    pub reasoned_model: String,

    #[arg(long, env = "JAMAL_EMBEDDING_MODEL", default_value = "nomic-embed-text:latest")]
    pub embedding_model: String,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "JAMAL_CORS_ORIGINS", value_delimiter = ',', default_value = "http://localhost:5174")]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "JAMAL_LLM_MAX_ATTEMPTS", default_value_t = 3)]
    pub llm_max_attempts: u32,

    #[arg(long, env = "JAMAL_LLM_RETRY_DELAY_MS", default_value_t = 1000)]
    pub llm_retry_delay_ms: u64,

    #[arg(long, env = "JAMAL_MAX_UPLOAD_MB", default_value_t = 25)]
    pub max_upload_mb: usize,

    /// HTML search endpoint queried for web-search chats.
    #[arg(long, env = "JAMAL_SEARCH_URL", default_value = DEFAULT_SEARCH_URL)]
    pub search_url: String,

    #[arg(long, env = "JAMAL_SEARCH_RESULTS", default_value_t = 5)]
    pub search_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("data"),
            provider: ProviderKind::Ollama,
            ollama_host: "http://localhost:11434".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_api_key: String::new(),
            simple_model: "llama3.2:1b".into(),
            reasoned_model: "deepseek-r1:1.5b".into(),
            embedding_model: "nomic-embed-text:latest".into(),
            cors_origins: vec!["http://localhost:5174".into()],
            llm_max_attempts: 3,
            llm_retry_delay_ms: 1000,
            max_upload_mb: 25,
            search_url: DEFAULT_SEARCH_URL.into(),
            search_results: 5,
        }
    }
}

impl ServerConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("jamal.db")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn links_dir(&self) -> PathBuf {
        self.data_dir.join("links")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts,
            delay: Duration::from_millis(self.llm_retry_delay_ms),
        }
    }
}

/// Keys accepted by `PUT /settings`; each overrides the matching flag.
pub const SETTING_KEYS: &[&str] = &[
    "ollama_host",
    "simple_model",
    "reasoned_model",
    "embedding_model",
];

/// Runtime model selection: the `settings` table first, then the config.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub simple_model: String,
    pub reasoned_model: String,
    pub embedding_model: String,
}

impl ModelSettings {
    pub fn resolve(config: &ServerConfig, db: &Database) -> Self {
        let setting = |key: &str, fallback: &str| {
            let stored = db.get_setting(key).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "failed to read setting, using configured value");
                None
            });
            stored
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        let provider = match config.provider {
            ProviderKind::Ollama => Provider::ollama(setting("ollama_host", &config.ollama_host)),
            ProviderKind::Openai => {
                Provider::openai(config.openai_api_key.clone(), config.openai_base_url.clone())
            }
        };

        Self {
            provider,
            simple_model: setting("simple_model", &config.simple_model),
            reasoned_model: setting("reasoned_model", &config.reasoned_model),
            embedding_model: setting("embedding_model", &config.embedding_model),
        }
    }

    pub fn model(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Simple => &self.simple_model,
            ModelKind::Reasoned => &self.reasoned_model,
        }
    }
}

/// Terminal client configuration.
#[derive(Debug, Clone, Args)]
pub struct ClientConfig {
    /// Base URL of the backend server.
    #[arg(long, env = "JAMAL_BACKEND", default_value = "http://localhost:5000")]
    pub backend: String,

    /// SQLite file holding the persisted chats, documents, links and settings.
    #[arg(long, env = "JAMAL_CLIENT_STATE", default_value = "jamal-client.db")]
    pub state: PathBuf,

    /// Keep in-flight requests alive when switching conversations; replies
    /// still land in the conversation they were sent from.
    #[arg(long)]
    pub keep_pending_on_switch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_table_overrides_config() {
        let db = Database::open_in_memory().unwrap();
        let config = ServerConfig::default();

        let resolved = ModelSettings::resolve(&config, &db);
        assert_eq!(resolved.model(ModelKind::Simple), "llama3.2:1b");
        assert_eq!(resolved.model(ModelKind::Reasoned), "deepseek-r1:1.5b");

        db.set_setting("simple_model", "qwen2.5").unwrap();
        db.set_setting("ollama_host", "http://gpu-box:11434").unwrap();
        let resolved = ModelSettings::resolve(&config, &db);
        assert_eq!(resolved.model(ModelKind::Simple), "qwen2.5");
        match resolved.provider {
            Provider::Ollama(c) => assert_eq!(c.host, "http://gpu-box:11434"),
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[test]
    fn blank_setting_falls_back() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("embedding_model", "  ").unwrap();
        let resolved = ModelSettings::resolve(&ServerConfig::default(), &db);
        assert_eq!(resolved.embedding_model, "nomic-embed-text:latest");
    }

    #[test]
    fn unreadable_settings_fall_back_to_config() {
        let db = Database::open_in_memory().unwrap();
        db.conn().execute_batch("DROP TABLE settings").unwrap();
        let resolved = ModelSettings::resolve(&ServerConfig::default(), &db);
        assert_eq!(resolved.model(ModelKind::Simple), "llama3.2:1b");
        assert_eq!(resolved.embedding_model, "nomic-embed-text:latest");
    }

    #[test]
    fn data_paths_live_under_data_dir() {
        let config = ServerConfig {
            data_dir: PathBuf::from("/srv/jamal"),
            ..Default::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/srv/jamal/jamal.db"));
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/jamal/uploads"));
        assert_eq!(config.links_dir(), PathBuf::from("/srv/jamal/links"));
    }
}
