use crate::core::batch::BatchCoordinator;
use crate::core::processor::ProjectProcessor;
use crate::core::{Project, ProjectRegistry, RegistrySession, ResultCache, ScoringEngine};
use crate::domain::model::ProcessingResult;
use crate::utils::error::Result;
use crate::utils::validation::Validate;

/// 對外入口：登記簿與單筆處理器的組合，批次流程透過 `batch()` 取得
pub struct Orchestrator<R: ProjectRegistry, E: ScoringEngine, C: ResultCache> {
    registry: R,
    processor: ProjectProcessor<E, C>,
}

impl<R: ProjectRegistry, E: ScoringEngine, C: ResultCache> Orchestrator<R, E, C> {
    pub fn new(registry: R, processor: ProjectProcessor<E, C>) -> Self {
        Self {
            registry,
            processor,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn processor(&self) -> &ProjectProcessor<E, C> {
        &self.processor
    }

    /// 驗證失敗時不會開啟登記簿連線
    pub fn create_project(&self, project: Project) -> Result<Project> {
        project.validate()?;

        let session = self.registry.open_session()?;
        session.create(&project)?;

        tracing::info!(
            "✅ Created project {} ({}, {})",
            project.project_id,
            project.project_name,
            project.city
        );
        Ok(project)
    }

    pub fn project_exists(&self, project_id: &str) -> Result<bool> {
        let session = self.registry.open_session()?;
        session.exists(project_id.trim())
    }

    pub async fn process_project(&self, project_id: &str) -> Result<ProcessingResult> {
        let session = self.registry.open_session()?;
        let result = self.processor.process(&session, project_id).await;

        match &result {
            Ok(ProcessingResult::Completed(completed)) => tracing::info!(
                "✅ Project {} completed with {} highlights (from cache: {})",
                completed.project_id,
                completed.highlights.len(),
                completed.from_cache
            ),
            Ok(ProcessingResult::NotFound { project_id }) => {
                tracing::warn!("Project {} not found; register it first", project_id)
            }
            Err(e) => tracing::error!("❌ Processing {} failed: {}", project_id, e),
        }

        result
    }

    pub fn batch(&self) -> BatchCoordinator<'_, R, E, C> {
        BatchCoordinator::new(&self.registry, &self.processor)
    }
}
