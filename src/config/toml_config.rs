use crate::adapters::engine::EngineSettings;
use crate::core::export::DEFAULT_EXPORT_FILENAME;
use crate::core::freshness::{FreshnessPolicy, DEFAULT_FRESHNESS_WINDOW_DAYS};
use crate::utils::error::{OrchestratorError, Result};
use crate::utils::validation::{validate_path, validate_positive_number, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/projects.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    pub single_timeout_seconds: u64,
    pub batch_timeout_seconds: u64,
    /// 批次代碼清單的暫存目錄，未設定時使用系統暫存目錄
    pub work_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            program: defaults.program,
            args: defaults.args,
            single_timeout_seconds: defaults.single_timeout.as_secs(),
            batch_timeout_seconds: defaults.batch_timeout.as_secs(),
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    pub freshness_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "data/cache".to_string(),
            freshness_days: DEFAULT_FRESHNESS_WINDOW_DAYS as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub export_filename: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
            export_filename: DEFAULT_EXPORT_FILENAME.to_string(),
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 檔案不存在時使用預設值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| OrchestratorError::ConfigError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ENGINE_SCRIPT})，未設定的變數保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| OrchestratorError::ConfigError {
            field: "environment".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.cache.dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.dir)
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(i64::try_from(self.cache.freshness_days).unwrap_or(i64::MAX))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            program: self.engine.program.clone(),
            args: self.engine.args.clone(),
            single_timeout: Duration::from_secs(self.engine.single_timeout_seconds),
            batch_timeout: Duration::from_secs(self.engine.batch_timeout_seconds),
            work_dir: self
                .engine
                .work_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_path("database.path", &self.database.path)?;
        validate_path("cache.dir", &self.cache.dir)?;
        validate_path("output.dir", &self.output.dir)?;
        validate_path("output.export_filename", &self.output.export_filename)?;

        if self.engine.program.trim().is_empty() {
            return Err(OrchestratorError::ConfigError {
                field: "engine.program".to_string(),
                message: "Engine program cannot be empty".to_string(),
            });
        }
        if let Some(work_dir) = &self.engine.work_dir {
            validate_path("engine.work_dir", work_dir)?;
        }

        validate_positive_number(
            "engine.single_timeout_seconds",
            self.engine.single_timeout_seconds,
            1,
        )?;
        validate_positive_number(
            "engine.batch_timeout_seconds",
            self.engine.batch_timeout_seconds,
            1,
        )?;
        validate_positive_number("cache.freshness_days", self.cache.freshness_days, 1)?;

        Ok(())
    }
}
