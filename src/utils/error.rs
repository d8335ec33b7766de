use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Project {project_id} already exists")]
    DuplicateError { project_id: String },

    #[error("Project {project_id} not found")]
    NotFoundError { project_id: String },

    #[error("Scoring engine timed out after {}s for {target}", .timeout.as_secs())]
    UpstreamTimeoutError { target: String, timeout: Duration },

    #[error("Invalid response format from scoring engine: {message}")]
    UpstreamFormatError { message: String, raw_output: String },

    #[error("Scoring engine reported an error: {message}")]
    UpstreamApplicationError { message: String },

    #[error("Persistence error: {message}")]
    PersistenceError {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigError { field: String, message: String },
}

impl From<rusqlite::Error> for OrchestratorError {
    fn from(source: rusqlite::Error) -> Self {
        OrchestratorError::PersistenceError {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Upstream,
    Storage,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 批次結果中每筆失敗的分類，讓呼叫端不必解析錯誤訊息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Duplicate,
    NotFound,
    Timeout,
    Format,
    #[default]
    Application,
    Internal,
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        OrchestratorError::ValidationError {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        OrchestratorError::PersistenceError {
            message: message.into(),
            source: None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::ValidationError { .. }
            | OrchestratorError::DuplicateError { .. }
            | OrchestratorError::NotFoundError { .. }
            | OrchestratorError::CsvError(_) => ErrorCategory::Input,
            OrchestratorError::UpstreamTimeoutError { .. }
            | OrchestratorError::UpstreamFormatError { .. }
            | OrchestratorError::UpstreamApplicationError { .. } => ErrorCategory::Upstream,
            OrchestratorError::PersistenceError { .. }
            | OrchestratorError::IoError(_)
            | OrchestratorError::SerializationError(_) => ErrorCategory::Storage,
            OrchestratorError::ConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            OrchestratorError::DuplicateError { .. } => ErrorSeverity::Low,
            OrchestratorError::UpstreamTimeoutError { .. } => ErrorSeverity::Medium,
            OrchestratorError::PersistenceError { .. } | OrchestratorError::ConfigError { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// 共用連線已不可用，整個呼叫必須中止
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::PersistenceError { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFoundError { .. })
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            OrchestratorError::ValidationError { .. } | OrchestratorError::CsvError(_) => {
                FailureKind::Validation
            }
            OrchestratorError::DuplicateError { .. } => FailureKind::Duplicate,
            OrchestratorError::NotFoundError { .. } => FailureKind::NotFound,
            OrchestratorError::UpstreamTimeoutError { .. } => FailureKind::Timeout,
            OrchestratorError::UpstreamFormatError { .. } => FailureKind::Format,
            OrchestratorError::UpstreamApplicationError { .. } => FailureKind::Application,
            _ => FailureKind::Internal,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            OrchestratorError::ValidationError { .. } => {
                "Check the input values: ids, names and cities must be non-empty, latitude within [-90, 90], longitude within [-180, 180]".to_string()
            }
            OrchestratorError::DuplicateError { project_id } => {
                format!("Project {} is already registered; process it instead of creating it", project_id)
            }
            OrchestratorError::NotFoundError { project_id } => {
                format!("Register project {} first, then process it again", project_id)
            }
            OrchestratorError::UpstreamTimeoutError { .. } => {
                "Retry later or raise the engine timeout in the [engine] config section".to_string()
            }
            OrchestratorError::UpstreamFormatError { .. } => {
                "Make sure the scoring engine writes only JSON to stdout and diagnostics to stderr".to_string()
            }
            OrchestratorError::UpstreamApplicationError { .. } => {
                "Inspect the scoring engine logs for the reported failure".to_string()
            }
            OrchestratorError::PersistenceError { .. } => {
                "Check that the registry database path is reachable and writable".to_string()
            }
            OrchestratorError::IoError(_) => "Check file paths and permissions".to_string(),
            OrchestratorError::CsvError(_) => {
                "Check that the CSV file is well-formed and has a header row".to_string()
            }
            OrchestratorError::SerializationError(_) => {
                "The cached or produced JSON is corrupted; remove the cache entry and retry".to_string()
            }
            OrchestratorError::ConfigError { field, .. } => {
                format!("Fix the '{}' setting in the configuration file", field)
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            OrchestratorError::NotFoundError { project_id } => {
                format!("Project {} is not registered yet", project_id)
            }
            OrchestratorError::UpstreamTimeoutError { target, timeout } => format!(
                "Processing {} took longer than {} seconds and was stopped",
                target,
                timeout.as_secs()
            ),
            OrchestratorError::UpstreamFormatError { message, .. } => {
                format!("The scoring engine returned unreadable output: {}", message)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
