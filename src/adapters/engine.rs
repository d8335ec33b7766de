use crate::core::ScoringEngine;
use crate::domain::model::{EngineBatchReport, EngineReport};
use crate::utils::error::{FailureKind, OrchestratorError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_SINGLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// 外部評分引擎的啟動方式：`<program> [args..] --single <id>` 或 `--multiple <file>`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub program: String,
    pub args: Vec<String>,
    pub single_timeout: Duration,
    pub batch_timeout: Duration,
    /// `--multiple` 使用的代碼清單暫存目錄
    pub work_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["scripts/integrated_location_processor.py".to_string()],
            single_timeout: DEFAULT_SINGLE_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            work_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    settings: EngineSettings,
}

impl ProcessEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 執行引擎並回傳 stdout；逾時時子行程會被終止
    async fn run(&self, mode: &str, value: &str, timeout: Duration, target: &str) -> Result<String> {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.args)
            .arg(mode)
            .arg(value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            "Invoking scoring engine: {} {} {} {}",
            self.settings.program,
            self.settings.args.join(" "),
            mode,
            value
        );

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output.map_err(|e| {
                tracing::error!(
                    "❌ Failed to launch scoring engine '{}': {}",
                    self.settings.program,
                    e
                );
                e
            })?,
            Err(_) => {
                tracing::warn!("⏱️ Scoring engine timed out after {:?} for {}", timeout, target);
                return Err(OrchestratorError::UpstreamTimeoutError {
                    target: target.to_string(),
                    timeout,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!("Scoring engine diagnostics for {}: {}", target, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(OrchestratorError::UpstreamFormatError {
                message: format!("no output from scoring engine (exit status: {})", output.status),
                raw_output: stdout,
            });
        }
        if !output.status.success() {
            tracing::warn!("Scoring engine exited with {} for {}", output.status, target);
        }

        Ok(stdout)
    }

    async fn write_id_file(&self, project_ids: &[String]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        let path = self.settings.work_dir.join(format!(
            "project_ids_{}_{}.csv",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["project_id"])?;
        for id in project_ids {
            writer.write_record([id.as_str()])?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| OrchestratorError::IoError(e.into_error()))?;

        tokio::fs::write(&path, data).await?;
        Ok(path)
    }
}

#[async_trait]
impl ScoringEngine for ProcessEngine {
    async fn invoke(&self, project_id: &str) -> Result<EngineReport> {
        let stdout = self
            .run("--single", project_id, self.settings.single_timeout, project_id)
            .await?;
        parse_single(project_id, &stdout)
    }

    async fn invoke_many(&self, project_ids: &[String]) -> Result<EngineBatchReport> {
        let path = self.write_id_file(project_ids).await?;
        let target = format!("batch of {} projects", project_ids.len());

        let result = self
            .run(
                "--multiple",
                &path.to_string_lossy(),
                self.settings.batch_timeout,
                &target,
            )
            .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Could not remove id file {}: {}", path.display(), e);
        }

        parse_batch(&result?)
    }
}

/// 相容性處理：引擎只用錯誤文字表示「找不到建案」。
/// 其他含有 "not found" 的錯誤也會被歸到這裡，這是已知的誤判來源。
pub fn classify_failure(message: &str) -> FailureKind {
    if message.to_lowercase().contains("not found") {
        FailureKind::NotFound
    } else {
        FailureKind::Application
    }
}

fn format_error(message: impl Into<String>, raw_output: &str) -> OrchestratorError {
    OrchestratorError::UpstreamFormatError {
        message: message.into(),
        raw_output: raw_output.to_string(),
    }
}

fn embedded_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

/// 先解析成 JSON，再看是否夾帶 `error`，最後才轉成型別
fn parse_payload<T: DeserializeOwned>(stdout: &str) -> Result<std::result::Result<T, String>> {
    let value: Value =
        serde_json::from_str(stdout.trim()).map_err(|e| format_error(e.to_string(), stdout))?;

    if let Some(message) = embedded_error(&value) {
        return Ok(Err(message));
    }

    serde_json::from_value(value)
        .map(Ok)
        .map_err(|e| format_error(format!("unexpected payload shape: {}", e), stdout))
}

pub fn parse_single(project_id: &str, stdout: &str) -> Result<EngineReport> {
    match parse_payload::<EngineReport>(stdout)? {
        Ok(mut report) => {
            if report.project_id.is_empty() {
                report.project_id = project_id.to_string();
            }
            Ok(report)
        }
        Err(message) => match classify_failure(&message) {
            FailureKind::NotFound => Err(OrchestratorError::NotFoundError {
                project_id: project_id.to_string(),
            }),
            _ => Err(OrchestratorError::UpstreamApplicationError { message }),
        },
    }
}

pub fn parse_batch(stdout: &str) -> Result<EngineBatchReport> {
    match parse_payload::<EngineBatchReport>(stdout)? {
        Ok(mut report) => {
            for failed in &mut report.failed_projects {
                failed.kind = classify_failure(&failed.error);
            }
            Ok(report)
        }
        Err(message) => Err(OrchestratorError::UpstreamApplicationError { message }),
    }
}
