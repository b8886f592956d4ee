use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_system_prompt() -> String {
    "Você é a recepcionista virtual do estabelecimento. Atenda em português, \
     colete nome completo, número de pessoas, dia e horário antes de registrar \
     uma reserva, e acione um atendente humano quando o cliente pedir."
        .to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_dedup_window_secs() -> u64 {
    900
}

fn default_pending_ttl_secs() -> i64 {
    600
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: i64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            pending_ttl_secs: default_pending_ttl_secs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
    pub phone_id: String,
    #[serde(default)]
    pub access_token: String,
    pub verify_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_db_path() -> String {
    "mesabot.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MesabotConfig {
    pub app: AppConfig,
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Replaces `${VAR}` placeholders with the environment value, empty when the
/// variable is unset. An unclosed placeholder is left as-is.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(path: &Path) -> Result<MesabotConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: MesabotConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))?;

    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn resolve_config_env(config: &mut MesabotConfig) {
    config.assistant.api_key = resolve_env_var(&config.assistant.api_key);
    config.assistant.api_base = resolve_env_var(&config.assistant.api_base);
    config.whatsapp.access_token = resolve_env_var(&config.whatsapp.access_token);
    config.whatsapp.verify_token = resolve_env_var(&config.whatsapp.verify_token);
    config.whatsapp.phone_id = resolve_env_var(&config.whatsapp.phone_id);
    if let Some(url) = &mut config.alerts.webhook_url {
        *url = resolve_env_var(url);
    }
    config.store.db_path = resolve_env_var(&config.store.db_path);
}

pub fn validate_config(config: &MesabotConfig) -> Result<()> {
    if config.assistant.model.trim().is_empty() {
        return Err(anyhow!("assistant.model must not be empty"));
    }
    if config.whatsapp.verify_token.trim().is_empty() {
        return Err(anyhow!("whatsapp.verify_token must not be empty"));
    }
    if config.pipeline.dedup_window_secs == 0 {
        return Err(anyhow!("pipeline.dedup_window_secs must be positive"));
    }
    if config.pipeline.pending_ttl_secs <= 0 {
        return Err(anyhow!("pipeline.pending_ttl_secs must be positive"));
    }
    if config.pipeline.history_limit == 0 {
        return Err(anyhow!("pipeline.history_limit must be positive"));
    }
    Ok(())
}
