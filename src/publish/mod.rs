use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod youtube;

pub use youtube::YoutubePublisher;

use crate::config::PublishConfig;
use crate::store::Topic;
use crate::utils::truncate_chars;
use crate::{PipelineError, Result};

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5000;
const MAX_TAGS: usize = 15;

/// Everything the platform needs besides the file itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
    pub made_for_kids: bool,
}

impl VideoMetadata {
    /// Title, description and tags for a topic, clipped to platform limits
    pub fn for_topic(topic: &Topic, config: &PublishConfig) -> Self {
        let title = format!("{}: {} | {}", topic.main_topic, topic.subtopic, config.title_suffix);

        let description = format!(
            "Learn about {subtopic} in this short educational video for kids!\n\n\
             Category: {category}\n\
             Topic: {main_topic}\n\n\
             Perfect for young learners to understand important concepts in a fun and engaging way.\n\n\
             #Shorts #KidsEducation #Learning #Educational #Kids #Children\n",
            subtopic = topic.subtopic,
            category = topic.category,
            main_topic = topic.main_topic,
        );

        let mut tags: Vec<String> = Vec::new();
        let topic_tags = [topic.category.to_lowercase(), topic.main_topic.to_lowercase()];
        for tag in config.base_tags.iter().take(3).cloned().chain(topic_tags).chain(config.base_tags.iter().skip(3).cloned()) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags.truncate(MAX_TAGS);

        Self {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            tags,
            category_id: config.category_id.clone(),
            privacy_status: config.privacy_status.clone(),
            made_for_kids: config.made_for_kids,
        }
    }
}

/// Upload failure classes. Wrap one in the returned error so the retry loop can tell them apart.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    /// Worth another attempt: network trouble, server errors, quota or rate limits
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// Will fail again: bad credentials or a malformed request
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Publishing backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Obtain or refresh credentials. Must succeed before `upload`.
    async fn authenticate(&self) -> Result<()>;

    /// Upload one video, returning the platform's id for it
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String>;
}

/// Retry policy for [`upload_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

/// Upload with at most `policy.max_attempts` attempts and a fixed pause between them.
///
/// Stops early on [`UploadError::Rejected`].
pub async fn upload_with_retry(
    publisher: &dyn Publisher,
    video: &Path,
    metadata: &VideoMetadata,
    policy: RetryPolicy,
) -> std::result::Result<String, PipelineError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match publisher.upload(video, metadata).await {
            Ok(id) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Upload succeeded after retry");
                }
                return Ok(id);
            }
            Err(e) => {
                last_error = format!("{:#}", e);
                let rejected = matches!(e.downcast_ref::<UploadError>(), Some(UploadError::Rejected(_)));
                tracing::warn!(attempt, max_attempts, "Upload attempt failed: {}", last_error);

                if rejected {
                    tracing::error!("Upload rejected by the platform, not retrying");
                    return Err(PipelineError::Publish { attempts: attempt, reason: last_error });
                }
            }
        }

        if attempt < max_attempts {
            tracing::info!("Retrying upload...");
            if !policy.delay.is_zero() {
                tokio::time::sleep(policy.delay).await;
            }
        }
    }

    tracing::error!("All {} upload attempts failed", max_attempts);
    Err(PipelineError::Publish { attempts: max_attempts, reason: last_error })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::tests::topic;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a fixed number of times before succeeding
    pub(crate) struct FlakyPublisher {
        pub failures: u32,
        pub calls: AtomicU32,
        pub auth_ok: bool,
    }

    impl FlakyPublisher {
        pub(crate) fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0), auth_ok: true }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Publisher for FlakyPublisher {
        async fn authenticate(&self) -> Result<()> {
            if self.auth_ok {
                Ok(())
            } else {
                anyhow::bail!("token file missing")
            }
        }

        async fn upload(&self, _video: &Path, _metadata: &VideoMetadata) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(UploadError::Transient(format!("HTTP 503 on call {}", call)).into())
            } else {
                Ok("vid123".to_string())
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, delay: Duration::ZERO }
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata::for_topic(&topic(1), &PublishConfig::default())
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let publisher = FlakyPublisher::new(4);
        let id = upload_with_retry(&publisher, Path::new("v.mp4"), &metadata(), policy(5)).await.unwrap();
        assert_eq!(id, "vid123");
        assert_eq!(publisher.calls(), 5);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let publisher = FlakyPublisher::new(5);
        let err = upload_with_retry(&publisher, Path::new("v.mp4"), &metadata(), policy(5)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish { attempts: 5, .. }));
        assert!(err.to_string().contains("HTTP 503 on call 5"));
        assert_eq!(publisher.calls(), 5);
    }

    #[tokio::test]
    async fn test_rejected_upload_stops_early() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(UploadError::Rejected("HTTP 401 invalid credentials".to_string()).into()));

        let err = upload_with_retry(&publisher, Path::new("v.mp4"), &metadata(), policy(5)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_unclassified_errors_are_retried() {
        let mut publisher = MockPublisher::new();
        publisher.expect_upload().times(3).returning(|_, _| Err(anyhow::anyhow!("connection reset")));

        let err = upload_with_retry(&publisher, Path::new("v.mp4"), &metadata(), policy(3)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish { attempts: 3, .. }));
    }

    #[test]
    fn test_metadata_for_topic() {
        let meta = metadata();
        assert_eq!(meta.title, "Colors: Red and Blue | Kids Learning #Shorts");
        assert!(meta.description.contains("Category: Colors & Shapes"));
        assert!(meta.tags.contains(&"colors & shapes".to_string()));
        assert!(meta.tags.contains(&"colors".to_string()));
        assert!(meta.tags.len() <= MAX_TAGS);
        assert_eq!(meta.category_id, "27");
        assert!(meta.made_for_kids);
    }

    #[test]
    fn test_metadata_limits() {
        let mut long = topic(1);
        long.subtopic = "x".repeat(300);
        let config = PublishConfig {
            base_tags: (0..30).map(|i| format!("tag{}", i)).collect(),
            ..PublishConfig::default()
        };

        let meta = VideoMetadata::for_topic(&long, &config);
        assert_eq!(meta.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(meta.tags.len(), MAX_TAGS);
    }
}
