use anyhow::Result;
use console::style;
use serde::Serialize;
use std::fmt::Write as _;

use crate::cli::OutputFormat;
use crate::pipeline::{RunOutcome, RunReport};
use crate::store::{LogEntry, LogLevel, TopicStats, UploadRecord};

/// Render any serializable report as pretty JSON
pub fn format_as_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_stats(stats: &TopicStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style("Topic backlog").bold());
    let _ = writeln!(out, "  Total:   {}", stats.total);
    let _ = writeln!(out, "  Unused:  {}", style(stats.unused).green());
    let _ = writeln!(out, "  Used:    {}", stats.used);
    let _ = write!(out, "  Uploads: {}", stats.uploads);
    out
}

pub fn format_uploads(uploads: &[UploadRecord]) -> String {
    if uploads.is_empty() {
        return "No uploads recorded yet".to_string();
    }

    let mut out = String::new();
    for upload in uploads {
        let _ = writeln!(
            out,
            "{}  {}  topic {}  {}",
            upload.uploaded_at.format("%Y-%m-%d %H:%M"),
            style(&upload.published_id).cyan(),
            upload.topic_id,
            upload.title
        );
    }
    out.trim_end().to_string()
}

pub fn format_logs(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return "Log is empty".to_string();
    }

    let mut out = String::new();
    for entry in entries {
        let level = match entry.level {
            LogLevel::Info => style(entry.level.as_str()).green(),
            LogLevel::Warn => style(entry.level.as_str()).yellow(),
            LogLevel::Error => style(entry.level.as_str()).red(),
        };
        let _ = writeln!(
            out,
            "{}  {:<5}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            level,
            entry.message
        );
    }
    out.trim_end().to_string()
}

pub fn format_report(report: &RunReport) -> String {
    let mut out = format!(
        "{} Published {} ({}) for topic {}",
        style("✓").green(),
        style(&report.published_id).cyan(),
        report.title,
        report.topic_id
    );
    if !report.store_consistent {
        let _ = write!(out, "\n{} Upload could not be fully recorded in the store", style("!").yellow());
    }
    for warning in &report.cleanup_warnings {
        let _ = write!(out, "\n{} {}", style("!").yellow(), warning);
    }
    out
}

/// Print backlog counts to stdout
pub fn print_stats(stats: &TopicStats, format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_stats(stats),
        OutputFormat::Json => format_as_json(stats)?,
    };
    println!("{}", content);
    Ok(())
}

pub fn print_uploads(uploads: &[UploadRecord], format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_uploads(uploads),
        OutputFormat::Json => format_as_json(uploads)?,
    };
    println!("{}", content);
    Ok(())
}

pub fn print_logs(entries: &[LogEntry], format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_logs(entries),
        OutputFormat::Json => format_as_json(entries)?,
    };
    println!("{}", content);
    Ok(())
}

/// Summarize a finished cycle for the operator
pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Success(report) => println!("{}", format_report(report)),
        RunOutcome::Failed(failure) => eprintln!("{} Run failed {}", style("✗").red(), failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn plain(text: String) -> String {
        console::strip_ansi_codes(&text).to_string()
    }

    #[test]
    fn test_format_stats() {
        let stats = TopicStats { total: 200, unused: 199, used: 1, uploads: 1 };
        let text = plain(format_stats(&stats));
        assert!(text.contains("Total:   200"));
        assert!(text.contains("Unused:  199"));
        assert!(text.ends_with("Uploads: 1"));
    }

    #[test]
    fn test_format_uploads() {
        assert_eq!(format_uploads(&[]), "No uploads recorded yet");

        let upload = UploadRecord {
            id: 1,
            topic_id: 7,
            title: "Colors: Red | Kids Learning #Shorts".to_string(),
            published_id: "abc123".to_string(),
            uploaded_at: Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap(),
        };
        let text = plain(format_uploads(&[upload]));
        assert_eq!(text, "2024-03-10 08:00  abc123  topic 7  Colors: Red | Kids Learning #Shorts");
    }

    #[test]
    fn test_format_logs() {
        let entry = LogEntry {
            id: 3,
            level: LogLevel::Error,
            message: "[TopicSelected] NoTopicsAvailable".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 5).unwrap(),
        };
        let text = plain(format_logs(&[entry]));
        assert!(text.starts_with("2024-03-10 20:00:05  ERROR"));
        assert!(text.ends_with("NoTopicsAvailable"));
    }

    #[test]
    fn test_json_output() {
        let stats = TopicStats { total: 2, unused: 1, used: 1, uploads: 0 };
        let json: serde_json::Value = serde_json::from_str(&format_as_json(&stats).unwrap()).unwrap();
        assert_eq!(json["unused"], 1);
    }
}
