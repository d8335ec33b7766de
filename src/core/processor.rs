use crate::core::freshness::{Freshness, FreshnessPolicy};
use crate::domain::model::{CachedReport, CompletedProject, Project, ProcessingResult};
use crate::domain::ports::{RegistrySession, ResultCache, ScoringEngine};
use crate::utils::error::{OrchestratorError, Result};
use chrono::Utc;

/// 單一建案處理：驗證 → 檢查登記 → 檢查快取 → 呼叫引擎
pub struct ProjectProcessor<E: ScoringEngine, C: ResultCache> {
    engine: E,
    cache: C,
    policy: FreshnessPolicy,
}

impl<E: ScoringEngine, C: ResultCache> ProjectProcessor<E, C> {
    pub fn new(engine: E, cache: C, policy: FreshnessPolicy) -> Self {
        Self {
            engine,
            cache,
            policy,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// `Err` 即為失敗的終止狀態；未登記的建案不是錯誤，回傳 `NotFound`
    pub async fn process<S: RegistrySession>(
        &self,
        session: &S,
        project_id: &str,
    ) -> Result<ProcessingResult> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(OrchestratorError::validation("Project ID is required"));
        }

        let project = match session.find(project_id)? {
            Some(project) => project,
            None => {
                tracing::info!("Project {} is not registered", project_id);
                return Ok(ProcessingResult::NotFound {
                    project_id: project_id.to_string(),
                });
            }
        };

        if let Some(cached) = self.load_cached(project_id).await {
            if let Freshness::Fresh { age_days } =
                self.policy.evaluate(Some(cached.processed_at), Utc::now())
            {
                tracing::info!(
                    "♻️ Using cached highlights for project {} (age: {} days)",
                    project_id,
                    age_days
                );
                return Ok(ProcessingResult::Completed(CompletedProject::cached(
                    &project,
                    cached.report,
                    age_days,
                )));
            }
            tracing::debug!("Cached highlights for project {} are stale", project_id);
        }

        self.invoke(&project).await
    }

    async fn load_cached(&self, project_id: &str) -> Option<CachedReport> {
        match self.cache.load(project_id).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Could not read cached highlights for {}, recomputing: {}",
                    project_id,
                    e
                );
                None
            }
        }
    }

    async fn invoke(&self, project: &Project) -> Result<ProcessingResult> {
        tracing::info!("🔄 Processing fresh highlights for project {}", project.project_id);

        let mut report = match self.engine.invoke(&project.project_id).await {
            Ok(report) => report,
            Err(OrchestratorError::NotFoundError { project_id }) => {
                tracing::warn!("Scoring engine does not know project {}", project_id);
                return Ok(ProcessingResult::NotFound { project_id });
            }
            Err(e) => return Err(e),
        };

        // 快取以登記簿的代碼為鍵
        report.project_id = project.project_id.clone();

        // 引擎自己的快取命中時，沿用它回報的年齡，快取時間也往回推
        let engine_age = report
            .from_cache
            .then(|| report.cache_age_days.unwrap_or(0).max(0));
        let now = Utc::now();
        let processed_at = chrono::TimeDelta::try_days(engine_age.unwrap_or(0))
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(now);

        if let Err(e) = self.cache.store(&report, processed_at).await {
            tracing::warn!(
                "⚠️ Could not cache highlights for {}: {}",
                project.project_id,
                e
            );
        }

        tracing::debug!(
            "Project {} produced {} highlights",
            project.project_id,
            report.highlights.len()
        );

        let completed = match engine_age {
            Some(age_days) => {
                tracing::info!(
                    "♻️ Scoring engine served cached highlights for project {} (age: {} days)",
                    project.project_id,
                    age_days
                );
                CompletedProject::cached(project, report, age_days)
            }
            None => CompletedProject::fresh(project, report),
        };

        Ok(ProcessingResult::Completed(completed))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::{
        Category, EngineBatchReport, EngineReport, Highlight, PoiType,
    };
    use chrono::{DateTime, Duration};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub(crate) fn sample_highlight(project_id: &str, name: &str, score: f64) -> Highlight {
        Highlight {
            project_id: Some(project_id.to_string()),
            poi_type: PoiType::Hospital,
            category: Category::Poi,
            name: name.to_string(),
            address: "Main Road".to_string(),
            distance_km: 2.5,
            step1_score: score,
            driving_distance: Some("3.1 km".to_string()),
            rating: Some(4.4),
            rating_count: Some(120),
            lat: None,
            lng: None,
            priority: Some("high".to_string()),
            from_cache: false,
        }
    }

    pub(crate) fn sample_report(project_id: &str) -> EngineReport {
        EngineReport {
            project_id: project_id.to_string(),
            project_name: None,
            project_location: None,
            highlights: vec![
                sample_highlight(project_id, "City Hospital", 0.9),
                sample_highlight(project_id, "Ruby Clinic", 0.4),
            ],
            total_highlights: 2,
            poi_count: 2,
            golf_count: 0,
            airport_count: 0,
            from_cache: false,
            cache_age_days: None,
        }
    }

    #[derive(Clone)]
    pub(crate) enum Behaviour {
        Succeed,
        EngineCached(Option<i64>),
        TimeOut,
        Garbled,
        EngineNotFound,
    }

    /// 依建案代碼決定回應；呼叫次數可檢查
    #[derive(Clone, Default)]
    pub(crate) struct MockEngine {
        behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl MockEngine {
        pub(crate) fn with(self, project_id: &str, behaviour: Behaviour) -> Self {
            self.behaviours
                .lock()
                .unwrap()
                .insert(project_id.to_string(), behaviour);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ScoringEngine for MockEngine {
        async fn invoke(&self, project_id: &str) -> Result<EngineReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let behaviour = self
                .behaviours
                .lock()
                .unwrap()
                .get(project_id)
                .cloned()
                .unwrap_or(Behaviour::Succeed);
            match behaviour {
                Behaviour::Succeed => Ok(sample_report(project_id)),
                Behaviour::EngineCached(cache_age_days) => {
                    let mut report = sample_report(project_id);
                    report.from_cache = true;
                    report.cache_age_days = cache_age_days;
                    for highlight in &mut report.highlights {
                        highlight.from_cache = true;
                    }
                    Ok(report)
                }
                Behaviour::TimeOut => Err(OrchestratorError::UpstreamTimeoutError {
                    target: project_id.to_string(),
                    timeout: std::time::Duration::from_secs(300),
                }),
                Behaviour::Garbled => Err(OrchestratorError::UpstreamFormatError {
                    message: "expected value at line 1 column 1".to_string(),
                    raw_output: "Traceback (most recent call last)".to_string(),
                }),
                Behaviour::EngineNotFound => Err(OrchestratorError::NotFoundError {
                    project_id: project_id.to_string(),
                }),
            }
        }

        async fn invoke_many(&self, project_ids: &[String]) -> Result<EngineBatchReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut highlights = Vec::new();
            let mut processed_projects = Vec::new();
            for id in project_ids {
                highlights.extend(sample_report(id).highlights);
                processed_projects.push(crate::domain::model::ProjectSummary {
                    project_id: id.clone(),
                    project_name: None,
                    highlights_count: 2,
                    poi_count: 2,
                    golf_count: 0,
                    airport_count: 0,
                    from_cache: false,
                    cache_age_days: None,
                });
            }
            Ok(EngineBatchReport {
                total_projects: project_ids.len(),
                processed_count: project_ids.len(),
                cached_count: 0,
                failed_count: 0,
                highlights,
                processed_projects,
                cached_projects: vec![],
                failed_projects: vec![],
            })
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockCache {
        entries: Arc<Mutex<HashMap<String, CachedReport>>>,
        fail_reads: bool,
    }

    impl MockCache {
        pub(crate) fn seeded(project_id: &str, processed_at: DateTime<Utc>) -> Self {
            let cache = Self::default();
            cache.entries.lock().unwrap().insert(
                project_id.to_string(),
                CachedReport {
                    processed_at,
                    report: sample_report(project_id),
                },
            );
            cache
        }

        pub(crate) fn failing_reads() -> Self {
            Self {
                fail_reads: true,
                ..Self::default()
            }
        }

        pub(crate) fn contains(&self, project_id: &str) -> bool {
            self.entries.lock().unwrap().contains_key(project_id)
        }

        pub(crate) fn processed_at(&self, project_id: &str) -> Option<DateTime<Utc>> {
            self.entries
                .lock()
                .unwrap()
                .get(project_id)
                .map(|entry| entry.processed_at)
        }
    }

    #[async_trait::async_trait]
    impl ResultCache for MockCache {
        async fn load(&self, project_id: &str) -> Result<Option<CachedReport>> {
            if self.fail_reads {
                return Err(OrchestratorError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "cache unreadable",
                )));
            }
            Ok(self.entries.lock().unwrap().get(project_id).cloned())
        }

        async fn store(&self, report: &EngineReport, processed_at: DateTime<Utc>) -> Result<()> {
            self.entries.lock().unwrap().insert(
                report.project_id.clone(),
                CachedReport {
                    processed_at,
                    report: report.clone(),
                },
            );
            Ok(())
        }
    }

    /// 記憶體內的登記簿連線
    #[derive(Default)]
    pub(crate) struct MockSession {
        pub(crate) projects: Mutex<HashMap<String, Project>>,
        pub(crate) broken: bool,
    }

    impl MockSession {
        pub(crate) fn with_projects(ids: &[&str]) -> Self {
            let session = Self::default();
            for id in ids {
                let project = Project::new(*id, format!("Project {}", id), 18.52, 73.85, "Pune").unwrap();
                session.projects.lock().unwrap().insert(id.to_string(), project);
            }
            session
        }
    }

    impl RegistrySession for MockSession {
        fn exists(&self, project_id: &str) -> Result<bool> {
            Ok(self.find(project_id)?.is_some())
        }

        fn find(&self, project_id: &str) -> Result<Option<Project>> {
            if self.broken {
                return Err(OrchestratorError::persistence("connection reset"));
            }
            Ok(self.projects.lock().unwrap().get(project_id).cloned())
        }

        fn create(&self, project: &Project) -> Result<()> {
            if self.broken {
                return Err(OrchestratorError::persistence("connection reset"));
            }
            let mut projects = self.projects.lock().unwrap();
            if projects.contains_key(&project.project_id) {
                return Err(OrchestratorError::DuplicateError {
                    project_id: project.project_id.clone(),
                });
            }
            projects.insert(project.project_id.clone(), project.clone());
            Ok(())
        }
    }

    fn processor(engine: MockEngine, cache: MockCache) -> ProjectProcessor<MockEngine, MockCache> {
        ProjectProcessor::new(engine, cache, FreshnessPolicy::default())
    }

    #[tokio::test]
    async fn test_empty_id_is_a_validation_error() {
        let engine = MockEngine::default();
        let processor = processor(engine.clone(), MockCache::default());
        let session = MockSession::default();

        let err = processor.process(&session, "   ").await.unwrap_err();

        assert!(matches!(err, OrchestratorError::ValidationError { .. }));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_project_short_circuits_before_engine() {
        // 即使引擎會逾時，未登記的建案也不應呼叫引擎
        let engine = MockEngine::default().with("999999", Behaviour::TimeOut);
        let processor = processor(engine.clone(), MockCache::default());
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "999999").await.unwrap();

        assert_eq!(
            result,
            ProcessingResult::NotFound {
                project_id: "999999".to_string()
            }
        );
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_cache_is_reused() {
        let engine = MockEngine::default();
        let cache = MockCache::seeded("P1", Utc::now() - Duration::days(59));
        let processor = processor(engine.clone(), cache);
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "P1").await.unwrap();
        let completed = result.completed().unwrap();

        assert!(completed.from_cache);
        assert_eq!(completed.cache_age_days, Some(59));
        assert!(completed.highlights.iter().all(|h| h.from_cache));
        assert_eq!(completed.project_name.as_deref(), Some("Project P1"));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_at_window_boundary_is_fresh() {
        let engine = MockEngine::default();
        let cache = MockCache::seeded("P1", Utc::now() - Duration::days(60));
        let processor = processor(engine.clone(), cache);
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "P1").await.unwrap();

        assert_eq!(result.completed().unwrap().cache_age_days, Some(60));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_recompute_and_refresh() {
        let engine = MockEngine::default();
        let cache = MockCache::seeded("P1", Utc::now() - Duration::days(61));
        let processor = processor(engine.clone(), cache.clone());
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "P1").await.unwrap();
        let completed = result.completed().unwrap();

        assert!(!completed.from_cache);
        assert_eq!(completed.cache_age_days, None);
        assert_eq!(completed.counts.poi_count, 2);
        assert_eq!(engine.call_count(), 1);

        // 重新計算後快取已更新，第二次直接命中
        let again = processor.process(&session, "P1").await.unwrap();
        assert_eq!(again.completed().unwrap().cache_age_days, Some(0));
        assert_eq!(engine.call_count(), 1);
        assert!(cache.contains("P1"));
    }

    #[tokio::test]
    async fn test_engine_cached_report_keeps_its_age() {
        let engine = MockEngine::default()
            .with("P1", Behaviour::EngineCached(Some(10)))
            .with("P2", Behaviour::EngineCached(None));
        let cache = MockCache::default();
        let processor = processor(engine.clone(), cache.clone());
        let session = MockSession::with_projects(&["P1", "P2"]);

        let result = processor.process(&session, "P1").await.unwrap();
        let completed = result.completed().unwrap();

        assert!(completed.from_cache);
        assert_eq!(completed.cache_age_days, Some(10));
        assert!(completed.highlights.iter().all(|h| h.from_cache));

        let stored = cache.processed_at("P1").unwrap();
        assert_eq!(FreshnessPolicy::age_days(stored, Utc::now()), 10);

        let without_age = processor.process(&session, "P2").await.unwrap();
        assert_eq!(without_age.completed().unwrap().cache_age_days, Some(0));
        assert_eq!(engine.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_cache_falls_back_to_engine() {
        let engine = MockEngine::default();
        let processor = processor(engine.clone(), MockCache::failing_reads());
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "P1").await.unwrap();

        assert!(!result.completed().unwrap().from_cache);
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_errors_propagate_unchanged() {
        let engine = MockEngine::default()
            .with("P1", Behaviour::TimeOut)
            .with("P2", Behaviour::Garbled);
        let processor = processor(engine, MockCache::default());
        let session = MockSession::with_projects(&["P1", "P2"]);

        let timeout = processor.process(&session, "P1").await.unwrap_err();
        assert!(matches!(timeout, OrchestratorError::UpstreamTimeoutError { .. }));

        let garbled = processor.process(&session, "P2").await.unwrap_err();
        match garbled {
            OrchestratorError::UpstreamFormatError { raw_output, .. } => {
                assert!(raw_output.contains("Traceback"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_engine_not_found_becomes_not_found_outcome() {
        let engine = MockEngine::default().with("P1", Behaviour::EngineNotFound);
        let processor = processor(engine, MockCache::default());
        let session = MockSession::with_projects(&["P1"]);

        let result = processor.process(&session, "P1").await.unwrap();

        assert!(result.is_not_found());
    }

    #[tokio::test]
    async fn test_registry_failure_is_returned() {
        let processor = processor(MockEngine::default(), MockCache::default());
        let session = MockSession {
            broken: true,
            ..MockSession::default()
        };

        let err = processor.process(&session, "P1").await.unwrap_err();

        assert!(err.is_fatal());
    }
}
