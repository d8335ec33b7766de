use crate::core::ingest::{parse_project_ids, parse_project_rows, ParsedRows};
use crate::core::processor::ProjectProcessor;
use crate::core::{Project, ProjectRegistry, RegistrySession, ResultCache, ScoringEngine};
use crate::domain::model::{
    BatchOutcome, CompletedProject, CreationOutcome, EngineBatchReport, Highlight,
    HighlightCounts, ItemError, ProcessingResult, ProjectSummary,
};
use crate::utils::error::{FailureKind, OrchestratorError, Result};
use crate::utils::validation::Validate;
use std::collections::HashMap;
use std::io::Read;

/// 依輸入順序逐筆處理；單筆失敗只記錄，不中止整批
pub struct BatchCoordinator<'a, R: ProjectRegistry, E: ScoringEngine, C: ResultCache> {
    registry: &'a R,
    processor: &'a ProjectProcessor<E, C>,
}

fn item_label(project_id: &str, index: usize) -> String {
    if project_id.is_empty() {
        format!("item {}", index + 1)
    } else {
        project_id.to_string()
    }
}

fn not_found(project_id: &str) -> ItemError {
    ItemError::new(
        project_id,
        FailureKind::NotFound,
        format!("Project {} not found", project_id),
    )
}

impl<'a, R: ProjectRegistry, E: ScoringEngine, C: ResultCache> BatchCoordinator<'a, R, E, C> {
    pub fn new(registry: &'a R, processor: &'a ProjectProcessor<E, C>) -> Self {
        Self {
            registry,
            processor,
        }
    }

    pub fn create_projects_csv<Rd: Read>(&self, reader: Rd) -> Result<CreationOutcome> {
        let parsed = parse_project_rows(reader)?;
        self.create_projects(parsed)
    }

    pub fn create_projects(&self, parsed: ParsedRows) -> Result<CreationOutcome> {
        let ParsedRows {
            total_rows,
            projects,
            errors,
        } = parsed;

        if projects.is_empty() {
            for error in &errors {
                tracing::warn!("Rejected {}: {}", error.item_id, error.message);
            }
            return Err(OrchestratorError::validation(format!(
                "no valid rows ({} of {} rows rejected)",
                errors.len(),
                total_rows
            )));
        }

        let session = self.registry.open_session()?;

        let mut outcome = CreationOutcome {
            total_rows,
            rejected_count: errors.len(),
            errors,
            ..Default::default()
        };

        tracing::info!("📥 Creating {} projects", projects.len());

        for project in projects {
            match self.create_one(&session, &project) {
                Ok(()) => outcome.created_count += 1,
                Err(OrchestratorError::DuplicateError { project_id }) => {
                    tracing::debug!("Skipping existing project {}", project_id);
                    outcome.skipped_count += 1;
                    outcome.errors.push(ItemError::new(
                        project_id.clone(),
                        FailureKind::Duplicate,
                        format!("Project {} already exists", project_id),
                    ));
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("❌ Registry failure while creating {}: {}", project.project_id, e);
                    return Err(e);
                }
                Err(e) => {
                    outcome.rejected_count += 1;
                    outcome.errors.push(ItemError::new(
                        project.project_id.clone(),
                        e.failure_kind(),
                        format!("Failed to create project {}: {}", project.project_id, e),
                    ));
                }
            }
        }

        tracing::info!(
            "📊 Creation finished: {} created, {} skipped, {} rejected of {} rows",
            outcome.created_count,
            outcome.skipped_count,
            outcome.rejected_count,
            outcome.total_rows
        );

        Ok(outcome)
    }

    fn create_one(&self, session: &R::Session, project: &Project) -> Result<()> {
        project.validate()?;
        session.create(project)
    }

    pub async fn process_projects_csv<Rd: Read>(&self, reader: Rd) -> Result<BatchOutcome> {
        let ids = parse_project_ids(reader)?;
        self.process_projects(&ids).await
    }

    pub async fn process_projects(&self, project_ids: &[String]) -> Result<BatchOutcome> {
        let session = self.registry.open_session()?;
        let total = project_ids.len();
        let mut outcome = BatchOutcome::new(total);

        tracing::info!("🚀 Processing {} projects", total);

        for (index, raw_id) in project_ids.iter().enumerate() {
            let project_id = raw_id.trim();
            tracing::info!("[{}/{}] Project {}", index + 1, total, project_id);

            match self.processor.process(&session, project_id).await {
                Ok(ProcessingResult::Completed(completed)) => outcome.record_success(completed),
                Ok(ProcessingResult::NotFound { project_id }) => {
                    outcome.record_failure(not_found(&project_id))
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("❌ Registry failure, aborting batch at {}: {}", project_id, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Project {} failed: {}", project_id, e);
                    outcome.record_failure(ItemError::from_error(item_label(project_id, index), &e));
                }
            }
        }

        log_outcome(&outcome);
        Ok(outcome)
    }

    /// 先確認每個代碼都已登記，再把整批交給引擎一次處理
    pub async fn process_delegated(&self, project_ids: &[String]) -> Result<BatchOutcome> {
        let session = self.registry.open_session()?;
        let mut outcome = BatchOutcome::new(project_ids.len());

        // (輸入位置, 建案)；失敗的項目保留位置以便最後依輸入順序排列
        let mut known: Vec<(usize, Project)> = Vec::new();
        let mut early_failures: Vec<(usize, ItemError)> = Vec::new();

        for (index, raw_id) in project_ids.iter().enumerate() {
            let project_id = raw_id.trim();
            if project_id.is_empty() {
                early_failures.push((
                    index,
                    ItemError::new(
                        item_label(project_id, index),
                        FailureKind::Validation,
                        "Project ID is required",
                    ),
                ));
                continue;
            }
            match session.find(project_id)? {
                Some(project) => known.push((index, project)),
                None => early_failures.push((index, not_found(project_id))),
            }
        }

        let mut resolved: Vec<(usize, std::result::Result<CompletedProject, ItemError>)> =
            early_failures.into_iter().map(|(i, e)| (i, Err(e))).collect();

        if !known.is_empty() {
            // 同一代碼只交給引擎一次，結果再分給每個輸入位置
            let mut ids: Vec<String> = Vec::with_capacity(known.len());
            for (_, project) in &known {
                if !ids.contains(&project.project_id) {
                    ids.push(project.project_id.clone());
                }
            }
            tracing::info!("🚀 Delegating {} projects to the scoring engine", ids.len());

            let report = self.processor.engine().invoke_many(&ids).await?;
            let folded = fold_engine_report(report);

            for (index, project) in known {
                let entry = folded
                    .get(&project.project_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        Err(ItemError::new(
                            project.project_id.clone(),
                            FailureKind::Application,
                            format!("No result returned by the scoring engine for {}", project.project_id),
                        ))
                    })
                    .map(|mut completed| {
                        completed.project_name = completed
                            .project_name
                            .or_else(|| Some(project.project_name.clone()));
                        completed
                    });
                resolved.push((index, entry));
            }
        }

        resolved.sort_by_key(|(index, _)| *index);
        for (_, entry) in resolved {
            match entry {
                Ok(completed) => outcome.record_success(completed),
                Err(failure) => outcome.record_failure(failure),
            }
        }

        log_outcome(&outcome);
        Ok(outcome)
    }
}

fn summary_to_completed(summary: ProjectSummary, highlights: Vec<Highlight>) -> CompletedProject {
    let highlights: Vec<Highlight> = if summary.from_cache {
        highlights
            .into_iter()
            .map(|h| Highlight {
                from_cache: true,
                ..h
            })
            .collect()
    } else {
        highlights
    };
    let counts = if highlights.is_empty() {
        HighlightCounts {
            poi_count: summary.poi_count,
            golf_count: summary.golf_count,
            airport_count: summary.airport_count,
        }
    } else {
        HighlightCounts::from_highlights(&highlights)
    };

    CompletedProject {
        project_id: summary.project_id,
        project_name: summary.project_name,
        highlights,
        counts,
        from_cache: summary.from_cache,
        cache_age_days: if summary.from_cache {
            Some(summary.cache_age_days.unwrap_or(0))
        } else {
            None
        },
    }
}

/// 把引擎的整批回應拆回每個建案
fn fold_engine_report(
    report: EngineBatchReport,
) -> HashMap<String, std::result::Result<CompletedProject, ItemError>> {
    let mut by_project: HashMap<String, Vec<Highlight>> = HashMap::new();
    for highlight in report.highlights {
        if let Some(project_id) = highlight.project_id.clone() {
            by_project.entry(project_id).or_default().push(highlight);
        }
    }

    let mut folded = HashMap::new();

    for mut summary in report.processed_projects {
        summary.from_cache = false;
        let highlights = by_project.remove(&summary.project_id).unwrap_or_default();
        folded.insert(summary.project_id.clone(), Ok(summary_to_completed(summary, highlights)));
    }
    for mut summary in report.cached_projects {
        summary.from_cache = true;
        let highlights = by_project.remove(&summary.project_id).unwrap_or_default();
        folded.insert(summary.project_id.clone(), Ok(summary_to_completed(summary, highlights)));
    }
    for failed in report.failed_projects {
        folded.insert(
            failed.project_id.clone(),
            Err(ItemError::new(failed.project_id, failed.kind, failed.error)),
        );
    }

    folded
}

fn log_outcome(outcome: &BatchOutcome) {
    tracing::info!(
        "📊 Batch finished: {} total, {} processed, {} cached, {} failed",
        outcome.total_projects,
        outcome.processed_count,
        outcome.cached_count,
        outcome.failed_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::freshness::FreshnessPolicy;
    use crate::core::processor::tests::{Behaviour, MockCache, MockEngine, MockSession};

    struct MockRegistry {
        ids: Vec<&'static str>,
        broken: bool,
    }

    impl ProjectRegistry for MockRegistry {
        type Session = MockSession;

        fn open_session(&self) -> Result<MockSession> {
            let mut session = MockSession::with_projects(&self.ids);
            session.broken = self.broken;
            Ok(session)
        }
    }

    fn registry(ids: &[&'static str]) -> MockRegistry {
        MockRegistry {
            ids: ids.to_vec(),
            broken: false,
        }
    }

    fn processor(engine: MockEngine) -> ProjectProcessor<MockEngine, MockCache> {
        ProjectProcessor::new(engine, MockCache::default(), FreshnessPolicy::default())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_timeout_in_the_middle_does_not_abort_batch() {
        let registry = registry(&["P1", "P2", "P3"]);
        let engine = MockEngine::default().with("P2", Behaviour::TimeOut);
        let processor = processor(engine.clone());
        let batch = BatchCoordinator::new(&registry, &processor);

        let outcome = batch.process_projects(&ids(&["P1", "P2", "P3"])).await.unwrap();

        assert_eq!(outcome.total_projects, 3);
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.failures[0].item_id, "P2");
        assert_eq!(outcome.failures[0].kind, FailureKind::Timeout);
        assert_eq!(outcome.succeeded[0].project_id, "P1");
        assert_eq!(outcome.succeeded[1].project_id, "P3");
        assert_eq!(engine.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_counted_as_not_found_failures() {
        let registry = registry(&["P1"]);
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let outcome = batch.process_projects(&ids(&["999999", "P1", " "])).await.unwrap();

        assert_eq!(outcome.processed_count, 1);
        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.failures[0].item_id, "999999");
        assert_eq!(outcome.failures[0].kind, FailureKind::NotFound);
        assert_eq!(outcome.failures[0].message, "Project 999999 not found");
        assert_eq!(outcome.failures[1].item_id, "item 3");
        assert_eq!(outcome.failures[1].kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_registry_failure_aborts_batch() {
        let registry = MockRegistry {
            ids: vec!["P1"],
            broken: true,
        };
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let err = batch.process_projects(&ids(&["P1", "P2"])).await.unwrap_err();

        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_process_projects_from_csv() {
        let registry = registry(&["PROJ001", "PROJ002"]);
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let outcome = batch
            .process_projects_csv("project_id\nPROJ001\nPROJ002\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(outcome.total_projects, 2);
        assert_eq!(outcome.processed_count, 2);
        let combined = outcome.highlights();
        assert_eq!(combined.len(), 4);
        assert!(combined.windows(2).all(|w| w[0].step1_score >= w[1].step1_score));
    }

    #[test]
    fn test_creation_counts_add_up() {
        let registry = registry(&["P2"]);
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let csv = "project_id,project_name,latitude,longitude,city\n\
                   P1,Skyline,18.52,73.85,Pune\n\
                   P2,Existing,18.52,73.85,Pune\n\
                   P3,Broken,200,73.85,Pune\n\
                   P4,Harbour,19.07,72.87,Mumbai\n";
        let outcome = batch.create_projects_csv(csv.as_bytes()).unwrap();

        assert_eq!(outcome.total_rows, 4);
        assert_eq!(outcome.created_count, 2);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.rejected_count, 1);
        assert_eq!(
            outcome.created_count + outcome.skipped_count + outcome.rejected_count,
            outcome.total_rows
        );

        // 解析階段的錯誤排在執行階段之前
        assert_eq!(outcome.errors[0].item_id, "P3");
        assert_eq!(outcome.errors[0].kind, FailureKind::Validation);
        assert_eq!(outcome.errors[1].item_id, "P2");
        assert_eq!(outcome.errors[1].message, "Project P2 already exists");
    }

    #[test]
    fn test_no_valid_rows_is_a_validation_error() {
        let registry = registry(&[]);
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let csv = "project_id,project_name,latitude,longitude,city\n,,1,1,\n";
        let err = batch.create_projects_csv(csv.as_bytes()).unwrap_err();

        assert!(matches!(err, OrchestratorError::ValidationError { .. }));
        assert!(err.to_string().contains("no valid rows"));
    }

    #[tokio::test]
    async fn test_delegated_batch_checks_registry_first() {
        let registry = registry(&["P1", "P3"]);
        let engine = MockEngine::default();
        let processor = processor(engine.clone());
        let batch = BatchCoordinator::new(&registry, &processor);

        let outcome = batch.process_delegated(&ids(&["P1", "P2", "P3"])).await.unwrap();

        assert_eq!(engine.call_count(), 1);
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.failures[0].item_id, "P2");
        assert_eq!(outcome.failures[0].kind, FailureKind::NotFound);
        assert_eq!(outcome.succeeded[0].project_id, "P1");
        assert_eq!(outcome.succeeded[0].highlights.len(), 2);
        assert_eq!(outcome.succeeded[0].project_name.as_deref(), Some("Project P1"));
        assert_eq!(outcome.succeeded[1].project_id, "P3");
    }

    #[tokio::test]
    async fn test_delegated_batch_repeats_result_for_repeated_ids() {
        let registry = registry(&["P1"]);
        let engine = MockEngine::default();
        let processor = processor(engine.clone());
        let batch = BatchCoordinator::new(&registry, &processor);

        let outcome = batch.process_delegated(&ids(&["P1", " P1 "])).await.unwrap();

        assert_eq!(engine.call_count(), 1);
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.failed_count, 0);
        assert!(outcome.succeeded.iter().all(|p| p.project_id == "P1"));
    }

    #[test]
    fn test_registry_failure_aborts_creation_batch() {
        let registry = MockRegistry {
            ids: vec![],
            broken: true,
        };
        let processor = processor(MockEngine::default());
        let batch = BatchCoordinator::new(&registry, &processor);

        let csv = "project_id,project_name,latitude,longitude,city\n\
                   P1,Skyline,18.52,73.85,Pune\n\
                   P2,Harbour View,19.07,72.87,Mumbai\n";
        let err = batch.create_projects_csv(csv.as_bytes()).unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, OrchestratorError::PersistenceError { .. }));
    }

    #[test]
    fn test_fold_engine_report_splits_by_project() {
        use crate::core::processor::tests::sample_highlight;
        use crate::domain::model::FailedProject;

        let report = EngineBatchReport {
            total_projects: 3,
            processed_count: 1,
            cached_count: 1,
            failed_count: 1,
            highlights: vec![
                sample_highlight("A", "a1", 0.9),
                sample_highlight("B", "b1", 0.8),
                sample_highlight("A", "a2", 0.1),
            ],
            processed_projects: vec![ProjectSummary {
                project_id: "A".to_string(),
                project_name: Some("Alpha".to_string()),
                highlights_count: 2,
                poi_count: 2,
                golf_count: 0,
                airport_count: 0,
                from_cache: false,
                cache_age_days: None,
            }],
            cached_projects: vec![ProjectSummary {
                project_id: "B".to_string(),
                project_name: Some("Beta".to_string()),
                highlights_count: 1,
                poi_count: 1,
                golf_count: 0,
                airport_count: 0,
                from_cache: true,
                cache_age_days: Some(14),
            }],
            failed_projects: vec![FailedProject {
                project_id: "C".to_string(),
                error: "Error processing project: quota exceeded".to_string(),
                kind: FailureKind::Application,
            }],
        };

        let mut folded = fold_engine_report(report);

        let a = folded.remove("A").unwrap().unwrap();
        assert_eq!(a.highlights.len(), 2);
        assert!(!a.from_cache);

        let b = folded.remove("B").unwrap().unwrap();
        assert_eq!(b.cache_age_days, Some(14));
        assert!(b.highlights.iter().all(|h| h.from_cache));

        let c = folded.remove("C").unwrap().unwrap_err();
        assert_eq!(c.kind, FailureKind::Application);
    }
}
