use clap::Parser;
use locintel::adapters::{EngineSettings, LocalStorage, ProcessEngine, SqliteRegistry, StorageCache};
use locintel::config::{CliConfig, Command, TomlConfig};
use locintel::core::export::write_export;
use locintel::domain::model::{Highlight, ProcessingResult, Project};
use locintel::utils::error::{ErrorSeverity, OrchestratorError};
use locintel::utils::{logger, validation::Validate};
use locintel::{Orchestrator, ProjectProcessor};
use serde::Serialize;

type App = Orchestrator<SqliteRegistry, ProcessEngine, StorageCache<LocalStorage>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting locintel");
    tracing::debug!("CLI config: {:?}", cli);

    let mut config = match TomlConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", cli.config.display(), e);
            eprintln!("💡 Make sure the file is valid TOML format");
            std::process::exit(1);
        }
    };

    if let Some(database) = &cli.database {
        config.database.path = database.to_string_lossy().into_owned();
        tracing::info!("🔧 Registry database overridden to: {}", config.database.path);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if let Err(e) = run(&cli.command, &config).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 4,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        std::process::exit(exit_code);
    }

    Ok(())
}

fn build_app(config: &TomlConfig) -> locintel::Result<App> {
    let registry = SqliteRegistry::open(config.database_path())?;
    let settings: EngineSettings = config.engine_settings();
    let engine = ProcessEngine::new(settings);
    let cache = StorageCache::new(LocalStorage::new(config.cache_dir()));
    let processor = ProjectProcessor::new(engine, cache, config.freshness_policy());
    Ok(Orchestrator::new(registry, processor))
}

async fn run(command: &Command, config: &TomlConfig) -> locintel::Result<()> {
    let app = build_app(config)?;

    match command {
        Command::Create(args) => {
            let project = Project::new(
                &args.project_id,
                &args.name,
                args.latitude,
                args.longitude,
                &args.city,
            )?;
            let created = app.create_project(project)?;
            print_json(&created)?;
        }
        Command::CreateBatch { file } => {
            let reader = std::fs::File::open(file)?;
            let outcome = app.batch().create_projects_csv(reader)?;
            tracing::info!(
                "📊 Created {}, skipped {}, rejected {} of {} rows",
                outcome.created_count,
                outcome.skipped_count,
                outcome.rejected_count,
                outcome.total_rows
            );
            print_json(&outcome)?;
        }
        Command::Process { project_id, export } => {
            let result = app.process_project(project_id).await?;
            if *export {
                if let Some(completed) = result.completed() {
                    export_to(config, &completed.highlights).await?;
                }
            }
            print_json(&result)?;
            if let ProcessingResult::NotFound { project_id } = result {
                return Err(OrchestratorError::NotFoundError { project_id });
            }
        }
        Command::ProcessBatch {
            file,
            delegate,
            export,
        } => {
            let batch = app.batch();
            let outcome = if *delegate {
                let ids = locintel::core::ingest::parse_project_ids(std::fs::File::open(file)?)?;
                batch.process_delegated(&ids).await?
            } else {
                batch.process_projects_csv(std::fs::File::open(file)?).await?
            };

            tracing::info!(
                "📊 Batch finished: {} processed, {} cached, {} failed of {}",
                outcome.processed_count,
                outcome.cached_count,
                outcome.failed_count,
                outcome.total_projects
            );

            if *export {
                export_to(config, &outcome.highlights()).await?;
            }
            print_json(&outcome.summary())?;
        }
    }

    Ok(())
}

async fn export_to(config: &TomlConfig, highlights: &[Highlight]) -> locintel::Result<()> {
    let storage = LocalStorage::new(config.output_dir());
    let name = write_export(&storage, &config.output.export_filename, highlights).await?;
    tracing::info!(
        "📁 Export saved to: {}",
        storage.base_path().join(name).display()
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> locintel::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
