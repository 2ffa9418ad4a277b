use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StorageError;

/// Usage state of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Unused,
    Used,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Unused => "unused",
            TopicStatus::Used => "used",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "unused" => Ok(TopicStatus::Unused),
            "used" => Ok(TopicStatus::Used),
            other => Err(StorageError::Corrupt(format!("unknown topic status '{}'", other))),
        }
    }
}

/// A stored lesson topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub category: String,
    pub main_topic: String,
    pub subtopic: String,
    pub status: TopicStatus,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Topic {
    /// "Category - Main topic - Subtopic", for log lines
    pub fn label(&self) -> String {
        format!("{} - {} - {}", self.category, self.main_topic, self.subtopic)
    }
}

/// A topic proposed for insertion; the (category, main_topic, subtopic) triple is its identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub category: String,
    pub main_topic: String,
    pub subtopic: String,
}

impl TopicCandidate {
    /// Build a candidate from raw text, trimming every field.
    ///
    /// Returns `None` when any field is blank.
    pub fn new(category: &str, main_topic: &str, subtopic: &str) -> Option<Self> {
        let category = category.trim();
        let main_topic = main_topic.trim();
        let subtopic = subtopic.trim();

        if category.is_empty() || main_topic.is_empty() || subtopic.is_empty() {
            return None;
        }

        Some(Self {
            category: category.to_string(),
            main_topic: main_topic.to_string(),
            subtopic: subtopic.to_string(),
        })
    }
}

/// Audit entry linking a topic to its published video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: i64,
    /// Lookup key only; the topic may since have been deleted
    pub topic_id: i64,
    pub title: String,
    pub published_id: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Operational log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Unknown levels read back as `Info`; the log table is free-form
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "ERROR" => LogLevel::Error,
            "WARN" | "WARNING" => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counts for operator reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    pub total: u64,
    pub unused: u64,
    pub used: u64,
    pub uploads: u64,
}
