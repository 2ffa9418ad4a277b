//! One full production cycle: ensure topics, pick one, write the lesson, render,
//! publish, record, clean up.
//!
//! Every stage failure is caught at its boundary and turned into a [`RunOutcome`];
//! nothing escapes to the scheduler.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, PublishConfig};
use crate::content::{LessonContent, LessonGenerator};
use crate::publish::{upload_with_retry, Publisher, RetryPolicy, VideoMetadata};
use crate::render::{RenderedVideo, RunWorkspace, VideoProducer};
use crate::scheduler::CycleRunner;
use crate::store::{LogLevel, Topic, TopicStore};
use crate::topics::TopicSupplier;
use crate::{CleanupWarning, PipelineError};

/// Orchestrator states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    EnsuringTopics,
    TopicSelected,
    ContentGenerated,
    ArtifactRendered,
    Authenticated,
    Published,
    Recorded,
    CleanedUp,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::EnsuringTopics => "EnsuringTopics",
            Stage::TopicSelected => "TopicSelected",
            Stage::ContentGenerated => "ContentGenerated",
            Stage::ArtifactRendered => "ArtifactRendered",
            Stage::Authenticated => "Authenticated",
            Stage::Published => "Published",
            Stage::Recorded => "Recorded",
            Stage::CleanedUp => "CleanedUp",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a run stopped
#[derive(Debug)]
pub struct RunFailure {
    pub stage: Stage,
    pub topic_id: Option<i64>,
    pub error: PipelineError,
}

impl RunFailure {
    fn new(stage: Stage, topic_id: Option<i64>, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            topic_id,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] ", self.stage)?;
        if let Some(id) = self.topic_id {
            write!(f, "topic {}: ", id)?;
        }
        write!(f, "{}: {}", self.error.kind(), self.error)
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub topic_id: i64,
    pub title: String,
    pub published_id: String,
    pub video_duration_secs: f64,
    /// False when the upload succeeded but the store could not record it
    pub store_consistent: bool,
    #[serde(skip)]
    pub cleanup_warnings: Vec<CleanupWarning>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Success(RunReport),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success(_))
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunOutcome::Failed(failure) => Some(failure),
            RunOutcome::Success(_) => None,
        }
    }
}

/// Result of a dry run that stops before publishing
#[derive(Debug, Clone)]
pub struct PreviewReport {
    pub topic: Topic,
    pub lesson: LessonContent,
    pub video_path: PathBuf,
    pub video_duration_secs: f64,
}

/// Policy knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Replenish proactively below this many unused topics
    pub low_water_mark: u64,
    pub log_retention_days: u32,
    pub keep_artifacts: bool,
    pub retry: RetryPolicy,
    pub publish: PublishConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            low_water_mark: config.topics.low_water_mark,
            log_retention_days: config.store.log_retention_days,
            keep_artifacts: config.render.keep_artifacts,
            retry: RetryPolicy::from_config(&config.publish),
            publish: config.publish.clone(),
        }
    }
}

/// The run orchestrator. Collaborators are injected once and reused across cycles.
pub struct VideoPipeline {
    store: TopicStore,
    supplier: TopicSupplier,
    lessons: Arc<dyn LessonGenerator>,
    producer: VideoProducer,
    publisher: Arc<dyn Publisher>,
    settings: PipelineSettings,
}

impl VideoPipeline {
    pub fn new(
        store: TopicStore,
        supplier: TopicSupplier,
        lessons: Arc<dyn LessonGenerator>,
        producer: VideoProducer,
        publisher: Arc<dyn Publisher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            supplier,
            lessons,
            producer,
            publisher,
            settings,
        }
    }

    pub fn store(&self) -> &TopicStore {
        &self.store
    }

    /// Run one cycle to completion. Never panics or returns an error; inspect the outcome.
    pub async fn run_cycle(&self) -> RunOutcome {
        tracing::info!("Starting video creation and upload workflow");
        self.prune_logs();

        let outcome = match self.select_topic().await {
            Ok(topic) => self.produce_and_publish(topic).await,
            Err(failure) => RunOutcome::Failed(failure),
        };

        match &outcome {
            RunOutcome::Success(report) => {
                tracing::info!(
                    topic_id = report.topic_id,
                    published_id = %report.published_id,
                    "Workflow completed successfully"
                );
            }
            RunOutcome::Failed(failure) => {
                tracing::error!(
                    stage = %failure.stage,
                    topic_id = ?failure.topic_id,
                    kind = failure.error.kind(),
                    "Run failed: {}",
                    failure.error
                );
                self.log(LogLevel::Error, &failure.to_string());
            }
        }

        outcome
    }

    /// Make sure at least one unused topic exists, recycling or replenishing as needed
    pub async fn ensure_topics(&self) -> Result<(), PipelineError> {
        let unused = self.store.unused_count()?;
        let total = self.store.total_count()?;
        tracing::info!("Topics status: {} unused, {} total", unused, total);

        if unused == 0 {
            if total > 0 {
                let reset = self.store.reset_all()?;
                tracing::info!("Recycled {} topics back to unused", reset);
                self.log(LogLevel::Info, &format!("Recycled {} topics", reset));
            } else {
                tracing::info!("No topics in database, generating initial batch");
                if let Err(e) = self.replenish().await {
                    if self.store.unused_count()? == 0 {
                        return Err(e);
                    }
                    tracing::warn!("Topic generation failed but unused topics remain: {}", e);
                }
            }
        } else if unused < self.settings.low_water_mark {
            tracing::info!("Low topic count ({}), generating more topics", unused);
            if let Err(e) = self.replenish().await {
                tracing::warn!("Topic generation failed, continuing with {} unused: {}", unused, e);
            }
        }

        Ok(())
    }

    async fn replenish(&self) -> Result<usize, PipelineError> {
        match self.supplier.replenish(&self.store).await {
            Ok(added) => {
                self.log(LogLevel::Info, &format!("Generated and stored {} new topics", added));
                Ok(added)
            }
            Err(e) => {
                self.log(LogLevel::Error, &format!("Topic generation failed: {}", e));
                Err(e.into())
            }
        }
    }

    async fn select_topic(&self) -> Result<Topic, RunFailure> {
        enter(Stage::EnsuringTopics, None);
        self.ensure_topics()
            .await
            .map_err(|e| RunFailure::new(Stage::EnsuringTopics, None, e))?;

        enter(Stage::TopicSelected, None);
        match self.store.next_unused_topic() {
            Ok(Some(topic)) => {
                tracing::info!(topic_id = topic.id, "Selected topic: {}", topic.label());
                Ok(topic)
            }
            Ok(None) => Err(RunFailure::new(Stage::TopicSelected, None, PipelineError::NoTopicsAvailable)),
            Err(e) => Err(RunFailure::new(Stage::TopicSelected, None, e)),
        }
    }

    async fn produce_and_publish(&self, topic: Topic) -> RunOutcome {
        let id = Some(topic.id);

        enter(Stage::ContentGenerated, id);
        let lesson = match self.lessons.generate_lesson(&topic).await {
            Ok(lesson) => lesson,
            Err(e) => {
                let error = PipelineError::ContentGeneration(format!("{:#}", e));
                return RunOutcome::Failed(RunFailure::new(Stage::ContentGenerated, id, error));
            }
        };
        tracing::debug!(topic_id = topic.id, "Narration: {}", lesson.narration());

        enter(Stage::ArtifactRendered, id);
        let workspace = match self.producer.prepare_workspace(&topic) {
            Ok(workspace) => workspace,
            Err(e) => {
                let error = PipelineError::Render(format!("{:#}", e));
                return RunOutcome::Failed(RunFailure::new(Stage::ArtifactRendered, id, error));
            }
        };

        let result = self.render_and_publish(&topic, &lesson, &workspace).await;

        enter(Stage::CleanedUp, id);
        let warnings = self.clean_up(workspace);

        match result {
            Ok(mut report) => {
                report.cleanup_warnings = warnings;
                RunOutcome::Success(report)
            }
            Err(failure) => RunOutcome::Failed(failure),
        }
    }

    async fn render_and_publish(
        &self,
        topic: &Topic,
        lesson: &LessonContent,
        workspace: &RunWorkspace,
    ) -> Result<RunReport, RunFailure> {
        let id = Some(topic.id);

        let video = self.producer
            .produce(lesson, topic, workspace)
            .await
            .map_err(|e| RunFailure::new(Stage::ArtifactRendered, id, PipelineError::Render(format!("{:#}", e))))?;
        tracing::info!(
            "Video created: {} (duration: {})",
            video.path.display(),
            crate::utils::format_duration(video.duration_secs)
        );

        enter(Stage::Authenticated, id);
        self.publisher
            .authenticate()
            .await
            .map_err(|e| RunFailure::new(Stage::Authenticated, id, PipelineError::Auth(format!("{:#}", e))))?;

        enter(Stage::Published, id);
        let metadata = VideoMetadata::for_topic(topic, &self.settings.publish);
        let published_id = upload_with_retry(self.publisher.as_ref(), &video.path, &metadata, self.settings.retry)
            .await
            .map_err(|e| RunFailure::new(Stage::Published, id, e))?;

        enter(Stage::Recorded, id);
        let store_consistent = self.record(topic, &metadata.title, &published_id);

        Ok(RunReport {
            topic_id: topic.id,
            title: metadata.title,
            published_id,
            video_duration_secs: video.duration_secs,
            store_consistent,
            cleanup_warnings: Vec::new(),
        })
    }

    /// Mark the topic used and append the upload record as one store transaction.
    ///
    /// A failure leaves the publish standing with nothing recorded and is only warned about.
    fn record(&self, topic: &Topic, title: &str, published_id: &str) -> bool {
        let consistent = match self.store.record_published(topic.id, title, published_id) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(topic_id = topic.id, "Topic vanished before it could be marked used");
                false
            }
            Err(e) => {
                tracing::warn!(topic_id = topic.id, "Could not record upload {}: {}", published_id, e);
                false
            }
        };

        if consistent {
            self.log(
                LogLevel::Info,
                &format!("Successfully uploaded video {} for topic {}", published_id, topic.id),
            );
        } else {
            self.log(
                LogLevel::Warn,
                &format!(
                    "Store inconsistent: video {} published for topic {} but not fully recorded",
                    published_id, topic.id
                ),
            );
        }

        consistent
    }

    fn clean_up(&self, workspace: RunWorkspace) -> Vec<CleanupWarning> {
        let warnings = workspace.finish(self.settings.keep_artifacts);
        for warning in &warnings {
            tracing::warn!("Cleanup error: {}", warning);
        }
        warnings
    }

    fn prune_logs(&self) {
        match self.store.prune_logs(self.settings.log_retention_days) {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Pruned {} old log entries", n),
            Err(e) => tracing::warn!("Could not prune logs: {}", e),
        }
    }

    /// Append to the log store; a failing log write must never affect the run
    fn log(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.store.append_log(level, message) {
            tracing::warn!("Could not write log entry: {}", e);
        }
    }

    /// Generate and render one topic without publishing or changing its state.
    ///
    /// The video is copied to `output`, or to the current directory when unset.
    pub async fn preview(&self, topic_id: Option<i64>, output: Option<&Path>) -> crate::Result<PreviewReport> {
        let topic = match topic_id {
            Some(id) => self.store.get_topic(id)?,
            None => self.store.next_unused_topic()?,
        }
        .ok_or(PipelineError::NoTopicsAvailable)?;

        tracing::info!(topic_id = topic.id, "Previewing topic: {}", topic.label());
        let lesson = self.lessons.generate_lesson(&topic).await?;

        let workspace = self.producer.prepare_workspace(&topic)?;
        let rendered = self.producer.produce(&lesson, &topic, &workspace).await;
        let kept = rendered.and_then(|video| preserve_video(&video, &topic, output).map(|path| (path, video.duration_secs)));
        self.clean_up(workspace);
        let (video_path, video_duration_secs) = kept?;

        Ok(PreviewReport {
            topic,
            lesson,
            video_path,
            video_duration_secs,
        })
    }
}

#[async_trait]
impl CycleRunner for VideoPipeline {
    async fn run_cycle(&self) -> bool {
        VideoPipeline::run_cycle(self).await.is_success()
    }
}

fn enter(stage: Stage, topic_id: Option<i64>) {
    tracing::info!(stage = %stage, topic_id = ?topic_id, "Entering stage");
}

fn preserve_video(video: &RenderedVideo, topic: &Topic, output: Option<&Path>) -> crate::Result<PathBuf> {
    let target = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let name = crate::utils::sanitize_filename(&format!("{} - {}", topic.main_topic, topic.subtopic));
            std::env::current_dir()?.join(format!("{}.mp4", name))
        }
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::copy(&video.path, &target)?;
    Ok(target)
}
