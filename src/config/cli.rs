use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "locintel")]
#[command(about = "Register real-estate projects and score the places around them")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "locintel.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override the registry database path from config
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register a single project
    Create(CreateArgs),

    /// Register every row of a project CSV
    CreateBatch {
        /// CSV with project_id, project_name, latitude, longitude, city
        file: PathBuf,
    },

    /// Produce highlights for one registered project
    Process {
        project_id: String,

        /// Also write the highlight CSV export
        #[arg(long)]
        export: bool,
    },

    /// Produce highlights for every project id in a CSV
    ProcessBatch {
        file: PathBuf,

        /// Hand the whole list to the engine in one invocation
        #[arg(long)]
        delegate: bool,

        /// Also write the highlight CSV export
        #[arg(long)]
        export: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub project_id: String,

    #[arg(long)]
    pub name: String,

    #[arg(long, allow_hyphen_values = true)]
    pub latitude: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub longitude: f64,

    #[arg(long)]
    pub city: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create() {
        let cli = CliConfig::try_parse_from([
            "locintel",
            "create",
            "--project-id",
            "P1",
            "--name",
            "Skyline",
            "--latitude",
            "-33.86",
            "--longitude",
            "151.2",
            "--city",
            "Sydney",
        ])
        .unwrap();

        match cli.command {
            Command::Create(args) => {
                assert_eq!(args.project_id, "P1");
                assert_eq!(args.latitude, -33.86);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("locintel.toml"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = CliConfig::try_parse_from([
            "locintel",
            "process-batch",
            "ids.csv",
            "--delegate",
            "--verbose",
            "--config",
            "custom.toml",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Command::ProcessBatch { delegate: true, export: false, .. }
        ));
    }
}
