use crate::domain::model::{CachedReport, EngineBatchReport, EngineReport, Project};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 建案登記簿；每次請求透過 `open_session` 取得獨佔的連線
pub trait ProjectRegistry: Send + Sync {
    type Session: RegistrySession;

    fn open_session(&self) -> Result<Self::Session>;
}

/// 一次請求期間持有的連線，Drop 時釋放
pub trait RegistrySession: Send + Sync {
    fn exists(&self, project_id: &str) -> Result<bool>;
    fn find(&self, project_id: &str) -> Result<Option<Project>>;
    /// 已存在時回傳 `DuplicateError`，不會部分寫入
    fn create(&self, project: &Project) -> Result<()>;
}

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    async fn invoke(&self, project_id: &str) -> Result<EngineReport>;
    async fn invoke_many(&self, project_ids: &[String]) -> Result<EngineBatchReport>;
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn load(&self, project_id: &str) -> Result<Option<CachedReport>>;
    async fn store(&self, report: &EngineReport, processed_at: DateTime<Utc>) -> Result<()>;
}
