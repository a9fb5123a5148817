use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4313;
const DEFAULT_API_BASE_URL: &str = "https://api.truthscope.app";
const DEFAULT_DEVICE_AUTHORIZATION_URL: &str = "https://oauth2.googleapis.com/device/code";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const DEFAULT_REVOCATION_URL: &str = "https://oauth2.googleapis.com/revoke";
const DEFAULT_SCOPE: &str = "openid email profile";
const DEFAULT_CACHE_SERVICE: &str = "app.truthscope.truthd";
const DEFAULT_MIN_TEXT_LEN: usize = 50;
const DEFAULT_MAX_TEXT_CHARS: usize = 4000;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── BackendConfig ───────────────────────────────────────────────────────────

/// Analysis backend configuration (`[backend]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the analysis backend. All four endpoints hang off it.
    pub api_base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

// ─── IdentityConfig ──────────────────────────────────────────────────────────

/// Identity provider configuration (`[identity]` in config.toml).
///
/// Defaults target Google OAuth; `client_id` has no default and must be set
/// before interactive sign-in can work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub device_authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub revocation_url: String,
    pub client_id: String,
    pub scope: String,
    /// Cache acquired credentials in the OS keychain so sessions survive a
    /// daemon restart. Default: true.
    pub remember_credentials: bool,
    /// Keychain service name for the cached credential.
    pub cache_service: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_authorization_url: DEFAULT_DEVICE_AUTHORIZATION_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            revocation_url: DEFAULT_REVOCATION_URL.to_string(),
            client_id: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            remember_credentials: true,
            cache_service: DEFAULT_CACHE_SERVICE.to_string(),
        }
    }
}

// ─── AnalysisConfig ──────────────────────────────────────────────────────────

/// Analysis pipeline tuning (`[analysis]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Article texts shorter than this are skipped without a network call.
    pub min_text_len: usize,
    /// Texts are truncated to this many characters before analysis; the
    /// dependent sentiment/bias call scores the identical truncated text.
    pub max_text_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_text_len: DEFAULT_MIN_TEXT_LEN,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

// ─── LivenessConfig ──────────────────────────────────────────────────────────

/// Liveness bookkeeping (`[liveness]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// A content peer silent for this long is logged (never disconnected).
    pub idle_log_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { idle_log_secs: 120 }
    }
}

// ─── CoordinatorConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for the WebSocket server (default: "127.0.0.1").
    pub bind_address: String,
    pub backend: BackendConfig,
    pub identity: IdentityConfig,
    pub analysis: AnalysisConfig,
    pub liveness: LivenessConfig,
}

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    log: Option<String>,
    log_format: Option<String>,
    bind_address: Option<String>,
    backend: Option<BackendConfig>,
    identity: Option<IdentityConfig>,
    analysis: Option<AnalysisConfig>,
    liveness: Option<LivenessConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

impl CoordinatorConfig {
    /// Build config from CLI/env args + optional TOML file.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let log_format = toml.log_format.unwrap_or_else(|| "pretty".to_string());
        let bind_address = bind_address
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let mut backend = toml.backend.unwrap_or_default();
        if let Ok(url) = std::env::var("TRUTHD_API_URL") {
            backend.api_base_url = url;
        }

        let mut identity = toml.identity.unwrap_or_default();
        if let Ok(client_id) = std::env::var("TRUTHD_CLIENT_ID") {
            identity.client_id = client_id;
        }

        Self {
            port,
            data_dir,
            log,
            log_format,
            bind_address,
            backend,
            identity,
            analysis: toml.analysis.unwrap_or_default(),
            liveness: toml.liveness.unwrap_or_default(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            log: "info".to_string(),
            log_format: "pretty".to_string(),
            bind_address: default_bind_address(),
            backend: BackendConfig::default(),
            identity: IdentityConfig::default(),
            analysis: AnalysisConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("truthd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("truthd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("truthd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("truthd");
        }
    }
    PathBuf::from(".truthd")
}
