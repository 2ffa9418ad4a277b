use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "edushorts",
    about = "EduShorts - Turn a backlog of lesson topics into narrated vertical videos and publish them",
    version,
    long_about = "Keeps a local backlog of kids' lesson topics, writes slide text and narration for one topic per cycle, renders a vertical short with ffmpeg and uploads it to YouTube, once or on a schedule."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(long, global = true, env = "EDUSHORTS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Produce and publish videos, once or on a schedule
    Run {
        /// Scheduling mode
        #[arg(short, long, value_enum, default_value = "once")]
        mode: RunMode,

        /// Hours between runs in continuous mode (overrides the config file)
        #[arg(long, value_name = "HOURS")]
        interval_hours: Option<u64>,

        /// Daily post times in scheduled mode, e.g. 08:00,20:00 (overrides the config file)
        #[arg(long, value_name = "HH:MM", value_delimiter = ',')]
        post_times: Option<Vec<String>>,
    },

    /// Generate and render one video without uploading it or changing topic state
    Preview {
        /// Topic to preview (defaults to the next unused topic)
        #[arg(long, value_name = "ID")]
        topic_id: Option<i64>,

        /// Where to save the video (defaults to the current directory)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Inspect and manage the topic backlog
    Topics {
        #[command(subcommand)]
        action: TopicsAction,
    },

    /// Show recently published videos
    Uploads {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show or prune the operational log
    Logs {
        #[command(subcommand)]
        action: Option<LogsAction>,

        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a default configuration file, or show the current one
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check external tools and credentials
    Doctor,
}

#[derive(Subcommand, Clone, Debug)]
pub enum TopicsAction {
    /// Show backlog counts
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Insert a small built-in set of topics
    Seed,

    /// Ask the topic model for new topics now
    Generate {
        /// How many topics to request (defaults to the configured replenish count)
        #[arg(short, long, value_name = "N")]
        count: Option<usize>,
    },

    /// Mark every topic unused again
    Reset,

    /// Delete every topic (upload history is kept)
    Clear,
}

#[derive(Subcommand, Clone, Debug)]
pub enum LogsAction {
    /// Delete log entries older than the retention window
    Prune {
        /// Retention in days (defaults to the configured value)
        #[arg(short, long, value_name = "DAYS")]
        days: Option<u32>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle, then exit with its status
    Once,
    /// At the configured daily post times
    Scheduled,
    /// Immediately, then at a fixed interval
    Continuous,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Once => write!(f, "once"),
            RunMode::Scheduled => write!(f, "scheduled"),
            RunMode::Continuous => write!(f, "continuous"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scheduled_run() {
        let cli = Cli::try_parse_from([
            "edushorts", "run", "--mode", "scheduled", "--post-times", "09:00,18:30",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { mode, post_times, interval_hours } => {
                assert_eq!(mode, RunMode::Scheduled);
                assert_eq!(post_times, Some(vec!["09:00".to_string(), "18:30".to_string()]));
                assert_eq!(interval_hours, None);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_defaults_to_once() {
        let cli = Cli::try_parse_from(["edushorts", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { mode: RunMode::Once, .. }));
    }

    #[test]
    fn test_logs_prune_subcommand() {
        let cli = Cli::try_parse_from(["edushorts", "-v", "logs", "prune", "--days", "7"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Logs { action: Some(LogsAction::Prune { days: Some(7) }), .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["edushorts", "run", "--mode", "hourly"]).is_err());
    }
}
