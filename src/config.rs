use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{DeskPilotError, DeskPilotResult};

pub const DEFAULT_TEMPLATE_ID: &str = "desktop-template-000-0000-0000-000000000001";
pub const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub vnc: VncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    /// Gateway API key (falls back to env var E2B_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_desktop_base_url")]
    pub base_url: String,
    #[serde(default = "default_template_id")]
    pub template_id: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_desktop_base_url(),
            template_id: default_template_id(),
            timeout_ms: default_timeout_ms(),
            dpi: default_dpi(),
        }
    }
}

fn default_desktop_base_url() -> String {
    "https://api.e2b.dev".into()
}

fn default_template_id() -> String {
    DEFAULT_TEMPLATE_ID.into()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SANDBOX_TIMEOUT_MS
}

fn default_dpi() -> u32 {
    96
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_pool_size")]
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai", deserialize_with = "openai_entry")]
    pub openai: ProviderEntry,
    #[serde(default = "default_anthropic", deserialize_with = "anthropic_entry")]
    pub anthropic: ProviderEntry,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Never required at load time; checked when the streamer is built.
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// A provider section as written in the file; missing fields fall back to
/// that provider's defaults.
#[derive(Deserialize)]
struct PartialProviderEntry {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl PartialProviderEntry {
    fn over(self, defaults: ProviderEntry) -> ProviderEntry {
        ProviderEntry {
            api_key: self.api_key.or(defaults.api_key),
            base_url: self.base_url.unwrap_or(defaults.base_url),
            model: self.model.unwrap_or(defaults.model),
        }
    }
}

fn openai_entry<'de, D: serde::Deserializer<'de>>(d: D) -> Result<ProviderEntry, D::Error> {
    Ok(PartialProviderEntry::deserialize(d)?.over(default_openai()))
}

fn anthropic_entry<'de, D: serde::Deserializer<'de>>(d: D) -> Result<ProviderEntry, D::Error> {
    Ok(PartialProviderEntry::deserialize(d)?.over(default_anthropic()))
}

fn default_openai() -> ProviderEntry {
    ProviderEntry {
        api_key: None,
        base_url: "https://api.openai.com/v1".into(),
        model: "computer-use-preview".into(),
    }
}

fn default_anthropic() -> ProviderEntry {
    ProviderEntry {
        api_key: None,
        base_url: "https://api.anthropic.com".into(),
        model: "claude-3-7-sonnet-latest".into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncConfig {
    #[serde(default = "default_token_script")]
    pub token_script: PathBuf,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            token_script: default_token_script(),
        }
    }
}

fn default_token_script() -> PathBuf {
    PathBuf::from("scripts/manage-vnc-token.sh")
}

fn resolve_config_path() -> DeskPilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(DeskPilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Load `config.toml` if present, then apply environment overrides.
pub fn load_config() -> DeskPilotResult<AppConfig> {
    let mut config = match resolve_config_path() {
        Ok(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), "config loaded");
            config
        }
        Err(e) => {
            tracing::info!(reason = %e, "no config file, using defaults");
            AppConfig::default()
        }
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Environment wins over the file. `lookup` is injectable for tests.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(bind) = lookup("DESKPILOT_BIND") {
        config.server.bind = bind;
    }

    if let Some(key) = lookup("E2B_API_KEY") {
        config.desktop.api_key = Some(key);
    }
    if let Some(url) = lookup("E2B_BASE_URL").or_else(|| lookup("E2B_API_URL")) {
        config.desktop.base_url = url;
    }
    if let Some(template) = lookup("E2B_DESKTOP_TEMPLATE_ID") {
        config.desktop.template_id = template;
    }

    if let Some(enabled) = lookup("SANDBOX_POOL_ENABLED") {
        config.pool.enabled = enabled == "true";
    }
    if let Some(size) = lookup("SANDBOX_POOL_SIZE") {
        match size.parse() {
            Ok(n) => config.pool.size = n,
            Err(_) => tracing::warn!(value = %size, "ignoring invalid SANDBOX_POOL_SIZE"),
        }
    }

    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.providers.openai.api_key = Some(key);
    }
    if let Some(url) = lookup("OPENAI_BASE_URL") {
        config.providers.openai.base_url = url;
    }
    if let Some(key) = lookup("ANTHROPIC_API_KEY").or_else(|| lookup("ANTHROPIC_AUTH_TOKEN")) {
        config.providers.anthropic.api_key = Some(key);
    }
    if let Some(url) = lookup("ANTHROPIC_BASE_URL") {
        config.providers.anthropic.base_url = url;
    }

    if let Some(script) = lookup("VNC_TOKEN_SCRIPT") {
        config.vnc.token_script = PathBuf::from(script);
    }
}
