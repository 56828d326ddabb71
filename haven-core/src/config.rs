use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct HavenConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Upstream chat completion provider (OpenAI-compatible).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the provider API key.
    pub api_key_env: String,
    pub question_temperature: f64,
    pub summary_temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://integrate.api.nvidia.com/v1".to_string(),
            model: "meta/llama-3.3-70b-instruct".to_string(),
            api_key_env: "NVIDIA_API_KEY".to_string(),
            question_temperature: 0.7,
            summary_temperature: 0.3,
            top_p: 0.7,
            max_tokens: 1024,
            request_timeout_seconds: 60,
        }
    }
}

impl CompletionConfig {
    /// Read the API key from the configured environment variable.
    /// Empty values count as absent.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub persona_name: String,
    pub max_turns: u32,
    /// When set, an assistant reply containing this word (case-insensitive,
    /// whole word) ends the questioning early.
    pub trigger_word: Option<String>,
    pub turn_timeout_seconds: u64,
    pub session_ttl_minutes: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            persona_name: "Rachael".to_string(),
            max_turns: 3,
            trigger_word: None,
            turn_timeout_seconds: 60,
            session_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvidenceConfig {
    pub root_dir: String,
    pub max_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            root_dir: "~/.haven/evidence".to_string(),
            max_bytes: 5 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "video/mp4".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

impl HavenConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
