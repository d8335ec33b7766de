use crate::core::{ResultCache, Storage};
use crate::domain::model::{CachedReport, EngineReport};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 以 `Storage` 保存每個建案最後一次的引擎回應（一個 JSON 檔）
#[derive(Debug, Clone)]
pub struct StorageCache<S: Storage> {
    storage: S,
}

impl<S: Storage> StorageCache<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }
}

/// 建案代碼轉成安全的檔名；非 [A-Za-z0-9_-] 的位元組以 %XX 表示
pub fn cache_file_name(project_id: &str) -> String {
    let mut name = String::with_capacity(project_id.len() + 5);
    for byte in project_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".json");
    name
}

#[async_trait]
impl<S: Storage> ResultCache for StorageCache<S> {
    async fn load(&self, project_id: &str) -> Result<Option<CachedReport>> {
        let file_name = cache_file_name(project_id);
        match self.storage.read_file(&file_name).await? {
            Some(bytes) => {
                let cached: CachedReport = serde_json::from_slice(&bytes)?;
                tracing::debug!(
                    "Loaded cached highlights for {} from {}",
                    project_id,
                    cached.processed_at
                );
                Ok(Some(cached))
            }
            None => Ok(None),
        }
    }

    async fn store(&self, report: &EngineReport, processed_at: DateTime<Utc>) -> Result<()> {
        let entry = CachedReport {
            processed_at,
            report: report.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)?;
        self.storage
            .write_file(&cache_file_name(&report.project_id), &bytes)
            .await
    }
}
