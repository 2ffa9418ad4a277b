use anyhow::Context;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub mod ffmpeg;

pub use ffmpeg::FfmpegRenderer;

use crate::config::RenderConfig;
use crate::content::LessonContent;
use crate::store::Topic;
use crate::{CleanupWarning, Result};

/// Synthesized narration for one slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechClip {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// One slide image paired with its narration, shown for `duration_secs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideClip {
    pub image: PathBuf,
    pub audio: PathBuf,
    pub duration_secs: f64,
}

/// Finished video for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedVideo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub clips: Vec<SlideClip>,
}

/// Rendering backend: slide images, speech, and muxing into a video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Draw `text` onto a full-frame image at `output`
    async fn render_slide(&self, text: &str, style_index: usize, is_title: bool, output: &Path) -> Result<PathBuf>;

    /// Speak `text` into an audio file at `output` and report its length
    async fn synthesize_speech(&self, text: &str, output: &Path) -> Result<SpeechClip>;

    /// Join the clips, in order, into one video file at `output`
    async fn mux(&self, clips: &[SlideClip], output: &Path) -> Result<PathBuf>;
}

/// Scratch directory holding every artifact of one run.
///
/// Dropping it removes the directory; `finish` does the same but reports failures.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the workspace, or keep it on disk when `keep` is set.
    pub fn finish(self, keep: bool) -> Vec<CleanupWarning> {
        if keep {
            let kept = self.dir.keep();
            tracing::info!("Keeping run artifacts in {}", kept.display());
            return Vec::new();
        }

        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                tracing::debug!("Removed run directory {}", path.display());
                Vec::new()
            }
            Err(e) => vec![CleanupWarning { path, message: e.to_string() }],
        }
    }
}

/// Drives a [`Renderer`] through the four slides of a lesson
pub struct VideoProducer {
    renderer: Arc<dyn Renderer>,
    work_dir: PathBuf,
    slide_padding_secs: f64,
    max_video_secs: f64,
    show_progress: bool,
}

impl VideoProducer {
    pub fn new(renderer: Arc<dyn Renderer>, config: &RenderConfig) -> Self {
        Self {
            renderer,
            work_dir: config.work_dir.clone(),
            slide_padding_secs: config.slide_padding_secs.max(0.0),
            max_video_secs: config.max_video_secs,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Create a fresh run directory under the work dir
    pub fn prepare_workspace(&self, topic: &Topic) -> Result<RunWorkspace> {
        fs_err::create_dir_all(&self.work_dir)?;
        let work_dir = fs_err::canonicalize(&self.work_dir)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("run_{}_", topic.id))
            .tempdir_in(&work_dir)
            .with_context(|| format!("Failed to create run directory in {}", work_dir.display()))?;

        Ok(RunWorkspace { dir })
    }

    /// Render every slide with its narration and mux them into one video inside `workspace`
    pub async fn produce(&self, lesson: &LessonContent, topic: &Topic, workspace: &RunWorkspace) -> Result<RenderedVideo> {
        let dir = workspace.path();
        let slides = lesson.slides();
        let progress = self.progress_bar(slides.len() as u64 + 1);
        let mut clips = Vec::with_capacity(slides.len());

        for (i, text) in slides.iter().enumerate() {
            progress.set_message(format!("Rendering slide {}/{}", i + 1, slides.len()));

            let image = self.renderer
                .render_slide(text, i, i == 0, &dir.join(format!("slide_{}.png", i)))
                .await
                .with_context(|| format!("slide {} image", i + 1))?;

            let speech = self.renderer
                .synthesize_speech(text, &dir.join(format!("audio_{}.wav", i)))
                .await
                .with_context(|| format!("slide {} narration", i + 1))?;

            let duration_secs = speech.duration_secs + self.slide_padding_secs;
            tracing::debug!("Slide {}/{} ready ({:.1}s)", i + 1, slides.len(), duration_secs);

            clips.push(SlideClip {
                image,
                audio: speech.path,
                duration_secs,
            });
            progress.inc(1);
        }

        progress.set_message("Muxing video");
        let filename = crate::utils::generate_unique_filename(&format!("video {}", topic.id), "mp4");
        let path = self.renderer
            .mux(&clips, &dir.join(filename))
            .await
            .context("muxing video")?;
        progress.inc(1);
        progress.finish_and_clear();

        let duration_secs: f64 = clips.iter().map(|c| c.duration_secs).sum();
        if duration_secs > self.max_video_secs {
            tracing::warn!(
                "Video duration ({:.1}s) exceeds the {:.0}s limit for Shorts",
                duration_secs,
                self.max_video_secs
            );
        }

        Ok(RenderedVideo { path, duration_secs, clips })
    }

    fn progress_bar(&self, steps: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(steps);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:20.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress
    }
}
