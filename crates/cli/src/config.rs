use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const CONFIG_FILE: &str = "clerk.toml";

/// Planning strategy selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlannerKind {
    /// Rule table only, no network.
    #[default]
    Heuristic,
    /// OpenAI-compatible model with rule-table fallback.
    Remote,
}

impl std::str::FromStr for PlannerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" | "rules" => Ok(Self::Heuristic),
            "remote" | "llm" => Ok(Self::Remote),
            other => Err(ConfigError::InvalidValue {
                field: "planner.strategy".to_string(),
                reason: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

/// Where conversation memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryBackend {
    #[default]
    InProcess,
    Redis,
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// `[planner]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub strategy: PlannerKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// API key (env overrides applied at load time; see `Config::load`).
    #[serde(default)]
    pub api_key: String,
    /// OpenAI-compatible endpoint. Empty uses the SDK default.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_planner_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: PlannerKind::default(),
            model: default_model(),
            api_key: String::new(),
            base_url: None,
            timeout_secs: default_planner_timeout_secs(),
            temperature: None,
        }
    }
}

impl PlannerConfig {
    /// Returns the effective API base URL, ignoring blank values.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// `[memory]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    #[serde(default)]
    pub redis_url: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Sessions idle longer than this are dropped. Zero keeps them forever.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound on every Redis round trip, connection checkout included.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            redis_url: String::new(),
            max_turns: default_max_turns(),
            idle_ttl_secs: default_idle_ttl_secs(),
            key_prefix: default_key_prefix(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl MemoryConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// `[runtime]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Local time zone as minutes east of UTC.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            utc_offset_minutes: default_utc_offset_minutes(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

impl RuntimeConfig {
    pub fn offset(&self) -> Result<chrono::FixedOffset, ConfigError> {
        chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "runtime.utc_offset_minutes".to_string(),
                reason: format!("{} is outside ±24h", self.utc_offset_minutes),
            }
        })
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,
    #[serde(default = "default_city")]
    pub default_city: String,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_search_language")]
    pub search_language: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_screenshot_timeout_secs")]
    pub screenshot_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            geocoding_url: default_geocoding_url(),
            forecast_url: default_forecast_url(),
            default_city: default_city(),
            search_url: default_search_url(),
            search_language: default_search_language(),
            output_dir: default_output_dir(),
            screenshot_timeout_secs: default_screenshot_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_planner_timeout_secs() -> u64 {
    20
}

fn default_max_turns() -> usize {
    40
}

fn default_idle_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_key_prefix() -> String {
    "clerk".to_string()
}

fn default_command_timeout_secs() -> u64 {
    5
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_utc_offset_minutes() -> i32 {
    8 * 60
}

fn default_max_tool_calls() -> usize {
    agent::runtime::DEFAULT_MAX_TOOL_CALLS
}

fn default_geocoding_url() -> String {
    tools::weather::DEFAULT_GEOCODING_URL.to_string()
}

fn default_forecast_url() -> String {
    tools::weather::DEFAULT_FORECAST_URL.to_string()
}

fn default_city() -> String {
    "上海".to_string()
}

fn default_search_url() -> String {
    tools::search::DEFAULT_SEARCH_URL.to_string()
}

fn default_search_language() -> String {
    "zh-CN".to_string()
}

fn default_output_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".clerk")
        .join("output")
        .to_string_lossy()
        .to_string()
}

fn default_screenshot_timeout_secs() -> u64 {
    20
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join(CONFIG_FILE);
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".clerk").join(CONFIG_FILE);
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        config.apply_env()?;
        debug!(
            strategy = ?config.planner.strategy,
            model = %config.planner.model,
            memory = ?config.memory.backend,
            "Config loaded"
        );
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(strategy) = std::env::var("CLERK_PLANNER") {
            self.planner.strategy = strategy.parse()?;
        }
        if let Ok(key) = std::env::var("CLERK_API_KEY") {
            self.planner.api_key = key;
        } else if self.planner.api_key.is_empty()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            self.planner.api_key = key;
        }
        if let Ok(model) = std::env::var("CLERK_MODEL") {
            self.planner.model = model;
        }
        if let Ok(url) = std::env::var("CLERK_BASE_URL") {
            self.planner.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("CLERK_REDIS_URL") {
            self.memory.redis_url = url;
            self.memory.backend = MemoryBackend::Redis;
        }
        if let Ok(raw) = std::env::var("CLERK_UTC_OFFSET_MINUTES") {
            self.runtime.utc_offset_minutes =
                raw.trim()
                    .parse()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "CLERK_UTC_OFFSET_MINUTES".to_string(),
                        reason: format!("{e}"),
                    })?;
        }
        Ok(())
    }

    /// Strategy actually used: `remote` without a key degrades to `heuristic`.
    pub fn effective_planner(&self) -> PlannerKind {
        match self.planner.strategy {
            PlannerKind::Remote if self.planner.api_key.trim().is_empty() => {
                warn!("Remote planner selected but no API key configured, using heuristic rules");
                PlannerKind::Heuristic
            }
            kind => kind,
        }
    }

    /// Checks values that cannot be caught by deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.offset()?;
        if self.memory.backend == MemoryBackend::Redis && self.memory.redis_url.trim().is_empty() {
            return Err(ConfigError::MissingField("memory.redis_url".to_string()));
        }
        if self.memory.max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.max_turns".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{remove_env_var, set_env_var, with_locked_env};

    const ENV_KEYS: &[&str] = &[
        "CLERK_PLANNER",
        "CLERK_API_KEY",
        "OPENAI_API_KEY",
        "CLERK_MODEL",
        "CLERK_BASE_URL",
        "CLERK_REDIS_URL",
        "CLERK_UTC_OFFSET_MINUTES",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            remove_env_var(key);
        }
    }

    fn write_file(path: &Path, content: &str) {
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn defaults_are_offline_and_in_process() {
        let cfg = Config::default();
        assert_eq!(cfg.planner.strategy, PlannerKind::Heuristic);
        assert_eq!(cfg.memory.backend, MemoryBackend::InProcess);
        assert_eq!(cfg.memory.max_turns, 40);
        assert_eq!(cfg.runtime.utc_offset_minutes, 480);
        assert_eq!(cfg.runtime.tool_timeout(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_reads_explicit_file_path() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clerk.toml");
            write_file(
                &config_path,
                r#"
[planner]
strategy = "remote"
model = "gpt-4.1-mini"
api_key = "from_file"
base_url = "https://example.com/v1"
timeout_secs = 5
temperature = 0.1

[memory]
backend = "redis"
redis_url = "redis://127.0.0.1:6379/2"
max_turns = 12
idle_ttl_secs = 0
key_prefix = "test"
command_timeout_secs = 2

[runtime]
tool_timeout_secs = 9
utc_offset_minutes = -300
max_tool_calls = 3

[tools]
default_city = "北京"
output_dir = "/tmp/clerk-out"
"#,
            );
            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            assert_eq!(cfg.planner.strategy, PlannerKind::Remote);
            assert_eq!(cfg.planner.model, "gpt-4.1-mini");
            assert_eq!(cfg.planner.effective_base_url(), Some("https://example.com/v1"));
            assert_eq!(cfg.planner.timeout(), Duration::from_secs(5));
            assert_eq!(cfg.planner.temperature, Some(0.1));
            assert_eq!(cfg.memory.backend, MemoryBackend::Redis);
            assert_eq!(cfg.memory.max_turns, 12);
            assert_eq!(cfg.memory.idle_ttl(), None);
            assert_eq!(cfg.memory.key_prefix, "test");
            assert_eq!(cfg.memory.command_timeout(), Duration::from_secs(2));
            assert_eq!(cfg.runtime.max_tool_calls, 3);
            assert_eq!(
                cfg.runtime.offset().expect("offset").local_minus_utc(),
                -300 * 60
            );
            assert_eq!(cfg.tools.default_city, "北京");
            assert_eq!(cfg.tools.search_url, tools::search::DEFAULT_SEARCH_URL);
            assert_eq!(cfg.effective_planner(), PlannerKind::Remote);
            assert!(cfg.validate().is_ok());
        });
    }

    #[test]
    fn load_returns_toml_error_for_invalid_content() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clerk.toml");
            write_file(&config_path, "[planner\nstrategy = ");
            let err = Config::load(Some(&config_path)).expect_err("invalid toml");
            assert!(matches!(err, ConfigError::Toml(_)));
        });
    }

    #[test]
    fn load_applies_env_overrides() {
        with_locked_env(|| {
            clear_env();
            set_env_var("CLERK_PLANNER", "remote");
            set_env_var("CLERK_API_KEY", "env-api");
            set_env_var("CLERK_MODEL", "env-model");
            set_env_var("CLERK_BASE_URL", "http://localhost:11434/v1");
            set_env_var("CLERK_REDIS_URL", "redis://cache:6379");
            set_env_var("CLERK_UTC_OFFSET_MINUTES", "60");

            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clerk.toml");
            write_file(&config_path, "");
            let cfg = Config::load(Some(&config_path)).expect("config load");
            assert_eq!(cfg.planner.strategy, PlannerKind::Remote);
            assert_eq!(cfg.planner.api_key, "env-api");
            assert_eq!(cfg.planner.model, "env-model");
            assert_eq!(
                cfg.planner.effective_base_url(),
                Some("http://localhost:11434/v1")
            );
            assert_eq!(cfg.memory.backend, MemoryBackend::Redis);
            assert_eq!(cfg.memory.redis_url, "redis://cache:6379");
            assert_eq!(cfg.runtime.utc_offset_minutes, 60);

            clear_env();
        });
    }

    #[test]
    fn openai_key_is_used_only_when_nothing_else_is_set() {
        with_locked_env(|| {
            clear_env();
            set_env_var("OPENAI_API_KEY", "legacy-key");
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clerk.toml");

            write_file(&config_path, "");
            let cfg = Config::load(Some(&config_path)).expect("config load");
            assert_eq!(cfg.planner.api_key, "legacy-key");

            write_file(&config_path, "[planner]\napi_key = \"file-key\"\n");
            let cfg = Config::load(Some(&config_path)).expect("config load");
            assert_eq!(cfg.planner.api_key, "file-key");

            clear_env();
        });
    }

    #[test]
    fn bad_env_values_are_rejected() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clerk.toml");
            write_file(&config_path, "");

            set_env_var("CLERK_PLANNER", "quantum");
            assert!(matches!(
                Config::load(Some(&config_path)),
                Err(ConfigError::InvalidValue { .. })
            ));
            remove_env_var("CLERK_PLANNER");

            set_env_var("CLERK_UTC_OFFSET_MINUTES", "eight");
            assert!(matches!(
                Config::load(Some(&config_path)),
                Err(ConfigError::InvalidValue { .. })
            ));
            clear_env();
        });
    }

    #[test]
    fn remote_without_key_degrades_to_heuristic() {
        let mut cfg = Config::default();
        cfg.planner.strategy = PlannerKind::Remote;
        cfg.planner.api_key = "  ".to_string();
        assert_eq!(cfg.effective_planner(), PlannerKind::Heuristic);

        cfg.planner.api_key = "sk-test".to_string();
        assert_eq!(cfg.effective_planner(), PlannerKind::Remote);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let mut cfg = Config::default();
        cfg.memory.backend = MemoryBackend::Redis;
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField(_))));

        let mut cfg = Config::default();
        cfg.runtime.utc_offset_minutes = 25 * 60;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.memory.max_turns = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_base_url_is_ignored() {
        let mut cfg = PlannerConfig::default();
        assert_eq!(cfg.effective_base_url(), None);
        cfg.base_url = Some("   ".to_string());
        assert_eq!(cfg.effective_base_url(), None);
    }
}
