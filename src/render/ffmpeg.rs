use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use super::{Renderer, SlideClip, SpeechClip};
use crate::config::RenderConfig;
use crate::utils::wrap_words;
use crate::Result;

const BACKGROUNDS: [&str; 4] = ["0x192D55", "0x2D5541", "0x5F2341", "0x553719"];
const ACCENTS: [&str; 4] = ["0xFFC800", "0x00FF96", "0xFF6496", "0xFF9600"];

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Renderer that shells out to ffmpeg, ffprobe and an espeak-compatible synthesiser
pub struct FfmpegRenderer {
    ffmpeg_path: String,
    ffprobe_path: String,
    tts_command: String,
    tts_voice: String,
    tts_rate: u32,
    font_path: Option<PathBuf>,
    width: u32,
    height: u32,
    fps: u32,
}

impl FfmpegRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        let font_path = config.font_path.clone().or_else(find_font);
        match &font_path {
            Some(font) => tracing::debug!("Using font: {}", font.display()),
            None => tracing::warn!("No TrueType font found, relying on ffmpeg's default"),
        }

        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            tts_command: config.tts_command.clone(),
            tts_voice: config.tts_voice.clone(),
            tts_rate: config.tts_rate,
            font_path,
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }

    /// External tools this renderer needs, with what each is for
    pub fn required_tools(&self) -> Vec<(&str, &'static str)> {
        vec![
            (self.ffmpeg_path.as_str(), "required for slide images and video muxing"),
            (self.ffprobe_path.as_str(), "required for measuring narration length"),
            (self.tts_command.as_str(), "required for speech synthesis"),
        ]
    }

    /// Build the drawtext/drawbox filter chain for one slide.
    ///
    /// `textfile` is resolved relative to the working directory ffmpeg runs in.
    fn slide_filter(&self, textfile: &str, style_index: usize, is_title: bool) -> String {
        let accent = ACCENTS[style_index % ACCENTS.len()];
        let (font_size, color) = if is_title { (120, accent) } else { (80, "white") };

        let mut filter = String::from("drawtext=");
        if let Some(font) = &self.font_path {
            let _ = write!(filter, "fontfile='{}':", escape_filter_value(&font.to_string_lossy()));
        }
        let _ = write!(
            filter,
            "textfile='{}':expansion=none:fontcolor={}:fontsize={}:line_spacing=60:x=(w-text_w)/2:y=(h-text_h)/2:shadowcolor=black@0.4:shadowx=3:shadowy=3",
            escape_filter_value(textfile),
            color,
            font_size,
        );
        let _ = write!(filter, ",drawbox=x=0:y=ih-10:w=iw:h=10:color={}:t=fill", accent);
        if is_title {
            let _ = write!(filter, ",drawbox=x=0:y=0:w=iw:h=10:color={}:t=fill", accent);
        }
        filter
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = run_tool(
            Command::new(&self.ffprobe_path).args([
                "-v", "error",
                "-show_entries", "format=duration",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path),
            "ffprobe",
        )
        .await?;

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("ffprobe returned no duration for {}: '{}'", path.display(), text.trim()))
    }

    async fn encode_clip(&self, clip: &SlideClip, output: &Path) -> Result<()> {
        let fps = self.fps.to_string();
        let duration = format!("{:.3}", clip.duration_secs);

        run_tool(
            Command::new(&self.ffmpeg_path)
                .args(["-y", "-loop", "1", "-framerate", &fps, "-i"])
                .arg(&clip.image)
                .arg("-i")
                .arg(&clip.audio)
                .args([
                    "-af", "apad",
                    "-t", &duration,
                    "-c:v", "libx264",
                    "-tune", "stillimage",
                    "-pix_fmt", "yuv420p",
                    "-r", &fps,
                    "-c:a", "aac",
                    "-ar", "44100",
                    "-ac", "2",
                ])
                .arg(output),
            "ffmpeg clip encode",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render_slide(&self, text: &str, style_index: usize, is_title: bool, output: &Path) -> Result<PathBuf> {
        let dir = parent_dir(output)?;
        let textfile = format!("slide_{}.txt", style_index);
        let lines = wrap_words(text, if is_title { 15 } else { 20 });
        fs_err::write(dir.join(&textfile), lines.join("\n"))?;

        let background = format!(
            "color=c={}:s={}x{}",
            BACKGROUNDS[style_index % BACKGROUNDS.len()],
            self.width,
            self.height
        );
        let filter = self.slide_filter(&textfile, style_index, is_title);

        run_tool(
            Command::new(&self.ffmpeg_path)
                .current_dir(dir)
                .args(["-y", "-f", "lavfi", "-i", &background, "-frames:v", "1", "-vf", &filter])
                .arg(output),
            "ffmpeg slide render",
        )
        .await?;

        tracing::debug!("Slide image created: {}", output.display());
        Ok(output.to_path_buf())
    }

    async fn synthesize_speech(&self, text: &str, output: &Path) -> Result<SpeechClip> {
        let rate = self.tts_rate.to_string();

        run_tool(
            Command::new(&self.tts_command)
                .args(["-v", &self.tts_voice, "-s", &rate, "-w"])
                .arg(output)
                .arg(text.replace('\n', ". ")),
            "speech synthesis",
        )
        .await?;

        let duration_secs = self.probe_duration(output).await?;
        tracing::debug!("Narration generated: {} ({:.1}s)", output.display(), duration_secs);

        Ok(SpeechClip {
            path: output.to_path_buf(),
            duration_secs,
        })
    }

    async fn mux(&self, clips: &[SlideClip], output: &Path) -> Result<PathBuf> {
        if clips.is_empty() {
            anyhow::bail!("No clips to mux");
        }

        let dir = parent_dir(output)?;
        let mut list = String::new();
        for (i, clip) in clips.iter().enumerate() {
            let name = format!("clip_{}.mp4", i);
            self.encode_clip(clip, &dir.join(&name)).await?;
            let _ = writeln!(list, "file '{}'", name);
        }
        fs_err::write(dir.join("concat.txt"), list)?;

        let copied = run_tool(
            Command::new(&self.ffmpeg_path)
                .current_dir(dir)
                .args(["-y", "-f", "concat", "-safe", "0", "-i", "concat.txt", "-c", "copy"])
                .arg(output),
            "ffmpeg concat",
        )
        .await;

        if let Err(e) = copied {
            tracing::warn!("ffmpeg concat with copy failed ({:#}); retrying with re-encode", e);
            run_tool(
                Command::new(&self.ffmpeg_path)
                    .current_dir(dir)
                    .args([
                        "-y", "-f", "concat", "-safe", "0", "-i", "concat.txt",
                        "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac",
                    ])
                    .arg(output),
                "ffmpeg concat re-encode",
            )
            .await?;
        }

        tracing::info!("Video written to {}", output.display());
        Ok(output.to_path_buf())
    }
}

/// Run an external tool to completion, failing with the tail of its stderr
async fn run_tool(command: &mut Command, what: &str) -> Result<Output> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("{} could not be started: {}", what, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        anyhow::bail!("{} failed ({}): {}", what, output.status, tail.join(" | "));
    }

    Ok(output)
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Output path has no directory: {}", path.display()))
}

/// Escape a value for use inside a single-quoted ffmpeg filter option
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "/")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
}

fn find_font() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> FfmpegRenderer {
        let config = RenderConfig {
            font_path: Some(PathBuf::from("/fonts/Bold Sans.ttf")),
            ..RenderConfig::default()
        };
        FfmpegRenderer::new(&config)
    }

    #[test]
    fn test_slide_filter_title_uses_accent() {
        let filter = renderer().slide_filter("slide_0.txt", 0, true);
        assert!(filter.starts_with("drawtext=fontfile='/fonts/Bold Sans.ttf':textfile='slide_0.txt':expansion=none:"));
        assert!(filter.contains("fontcolor=0xFFC800"));
        assert!(filter.contains("fontsize=120"));
        assert_eq!(filter.matches("drawbox").count(), 2);
    }

    #[test]
    fn test_slide_filter_body_rotates_style() {
        let filter = renderer().slide_filter("slide_5.txt", 5, false);
        assert!(filter.contains("textfile='slide_5.txt':expansion=none:"));
        assert!(filter.contains("fontcolor=white"));
        assert!(filter.contains("fontsize=80"));
        assert!(filter.contains("color=0x00FF96:t=fill"));
        assert_eq!(filter.matches("drawbox").count(), 1);
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("C:\\Windows\\Fonts\\arial.ttf"), "C\\:/Windows/Fonts/arial.ttf");
        assert_eq!(escape_filter_value("it's"), "it'\\''s");
    }

    #[test]
    fn test_parent_dir() {
        assert!(parent_dir(Path::new("video.mp4")).is_err());
        assert_eq!(parent_dir(Path::new("/tmp/run/video.mp4")).unwrap(), Path::new("/tmp/run"));
    }

    #[tokio::test]
    async fn test_mux_rejects_empty_input() {
        let err = renderer().mux(&[], Path::new("/tmp/out.mp4")).await.unwrap_err();
        assert!(err.to_string().contains("No clips"));
    }

    #[tokio::test]
    async fn test_run_tool_reports_missing_binary() {
        let err = run_tool(&mut Command::new("edushorts-definitely-not-a-binary"), "probe")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("could not be started"));
    }
}
