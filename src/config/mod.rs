use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local database settings
    pub store: StoreConfig,

    /// Topic backlog policy and the model that proposes new topics
    pub topics: TopicsConfig,

    /// Lesson text generation
    pub content: ContentConfig,

    /// Slide, speech and video rendering
    pub render: RenderConfig,

    /// Video platform upload
    pub publish: PublishConfig,

    /// Scheduler defaults
    pub schedule: ScheduleConfig,

    /// Console logging
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Log rows older than this many days are pruned each cycle
    pub log_retention_days: u32,
}

/// Connection settings for an OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, e.g. https://api.openai.com/v1
    pub base_url: String,

    /// API key, used when `api_key_env` is unset
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Model identifier
    pub model: String,

    pub temperature: f32,

    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub api: LlmConfig,

    /// Replenish proactively when fewer unused topics than this remain
    pub low_water_mark: u64,

    /// Topics requested per replenishment
    pub replenish_count: usize,

    /// Topics requested per generation call
    pub batch_size: usize,

    /// Categories offered to the topic model
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub api: LlmConfig,

    /// Run a second simplification pass over the drafted slides
    pub polish: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Parent directory for per-run artifact directories
    pub work_dir: PathBuf,

    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Speech synthesiser executable (espeak-ng compatible arguments)
    pub tts_command: String,

    pub tts_voice: String,

    /// Words per minute
    pub tts_rate: u32,

    /// TrueType font; auto-detected when unset
    pub font_path: Option<PathBuf>,

    pub width: u32,

    pub height: u32,

    pub fps: u32,

    /// Silence appended after each slide's narration, in seconds
    pub slide_padding_secs: f64,

    /// Warn when the finished video is longer than this
    pub max_video_secs: f64,

    /// Keep run directories instead of deleting them
    pub keep_artifacts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// OAuth client secrets JSON ("installed" or "web" application)
    pub client_secrets_path: PathBuf,

    /// Stored OAuth token JSON with a refresh token
    pub token_path: PathBuf,

    pub category_id: String,

    pub privacy_status: String,

    pub made_for_kids: bool,

    /// Upload attempts before giving up
    pub max_retries: u32,

    /// Fixed pause between upload attempts
    pub retry_delay_secs: u64,

    pub title_suffix: String,

    pub base_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily local post times, "HH:MM"
    pub post_times: Vec<String>,

    /// Hours between cycles in continuous mode
    pub interval_hours: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            topics: TopicsConfig::default(),
            content: ContentConfig::default(),
            render: RenderConfig::default(),
            publish: PublishConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("app_data.db"),
            log_retention_days: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4.1-mini".to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            api: LlmConfig {
                api_key_env: "TOPICS_API_KEY".to_string(),
                temperature: 0.8,
                max_tokens: Some(8000),
                ..LlmConfig::default()
            },
            low_water_mark: 10,
            replenish_count: 200,
            batch_size: 50,
            categories: [
                "English Basics",
                "Math Basics",
                "Early Reading",
                "Writing Practice",
                "Good Manners",
                "Good Character",
                "Daily Etiquette",
                "Thinking Skills",
                "Problem Solving",
                "Time & Routine",
                "Colors & Shapes",
                "Numbers in Daily Life",
                "Safety Basics",
                "Self-Care",
                "Organization & Responsibility",
                "Emotions",
                "Good Deeds",
                "General Knowledge",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            api: LlmConfig::default(),
            polish: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("temp_assets"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            tts_command: "espeak-ng".to_string(),
            tts_voice: "en-us+m3".to_string(),
            tts_rate: 150,
            font_path: None,
            width: 1080,
            height: 1920,
            fps: 24,
            slide_padding_secs: 1.0,
            max_video_secs: 60.0,
            keep_artifacts: false,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            client_secrets_path: PathBuf::from("client_secrets.json"),
            token_path: PathBuf::from("youtube_token.json"),
            category_id: "27".to_string(),
            privacy_status: "public".to_string(),
            made_for_kids: true,
            max_retries: 5,
            retry_delay_secs: 0,
            title_suffix: "Kids Learning #Shorts".to_string(),
            base_tags: [
                "kids education",
                "learning for kids",
                "educational video",
                "shorts",
                "youtube shorts",
                "kids learning",
                "children education",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            post_times: vec!["08:00".to_string(), "20:00".to_string()],
            interval_hours: 12,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: LogFormat::Text }
    }
}

impl LlmConfig {
    /// API key from the environment, falling back to the config file
    pub fn resolve_api_key(&self) -> Result<String> {
        let present = |k: &String| !k.trim().is_empty();
        std::env::var(&self.api_key_env)
            .ok()
            .filter(present)
            .or_else(|| self.api_key.clone().filter(present))
            .with_context(|| format!("No API key configured; set {} or api_key in the config file", self.api_key_env))
    }
}

impl Config {
    /// Load configuration from `path`, or the default location, creating a default file if missing
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config = Self::from_yaml(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            Ok(config)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("edushorts").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.topics.batch_size == 0 {
            anyhow::bail!("topics.batch_size must be at least 1");
        }

        if self.publish.max_retries == 0 {
            anyhow::bail!("publish.max_retries must be at least 1");
        }

        if self.schedule.interval_hours == 0 {
            anyhow::bail!("schedule.interval_hours must be at least 1");
        }

        if self.render.width == 0 || self.render.height == 0 || self.render.fps == 0 {
            anyhow::bail!("render width, height and fps must be positive");
        }

        self.post_times()?;

        for api in [&self.topics.api, &self.content.api] {
            crate::utils::validate_and_normalize_url(&api.base_url)
                .with_context(|| format!("Invalid API base URL: {}", api.base_url))?;
        }

        Ok(())
    }

    /// Parsed daily post times
    pub fn post_times(&self) -> Result<Vec<NaiveTime>> {
        parse_post_times(&self.schedule.post_times)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Database: {}", self.store.db_path.display());
        println!("  Log Retention: {} days", self.store.log_retention_days);
        println!("  Topic Model: {} ({})", self.topics.api.model, self.topics.api.base_url);
        println!("  Lesson Model: {} ({})", self.content.api.model, self.content.api.base_url);
        println!(
            "  Backlog: low-water mark {}, replenish {} in batches of {}",
            self.topics.low_water_mark, self.topics.replenish_count, self.topics.batch_size
        );
        println!("  Work Dir: {}", self.render.work_dir.display());
        println!("  Video: {}x{} @ {} fps", self.render.width, self.render.height, self.render.fps);
        println!("  Upload Retries: {}", self.publish.max_retries);
        println!("  Post Times: {}", self.schedule.post_times.join(", "));
        println!("  Interval: {}h", self.schedule.interval_hours);
    }
}

/// Parse "HH:MM" strings, sorted and de-duplicated
pub fn parse_post_times<S: AsRef<str>>(times: &[S]) -> Result<Vec<NaiveTime>> {
    let mut parsed = times
        .iter()
        .map(|t| {
            let t = t.as_ref().trim();
            NaiveTime::parse_from_str(t, "%H:%M")
                .with_context(|| format!("Invalid post time '{}', expected HH:MM", t))
        })
        .collect::<Result<Vec<_>>>()?;

    if parsed.is_empty() {
        anyhow::bail!("At least one post time is required");
    }

    parsed.sort();
    parsed.dedup();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topics.low_water_mark, 10);
        assert_eq!(config.publish.max_retries, 5);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = Config::from_yaml("topics:\n  batch_size: 25\nschedule:\n  interval_hours: 6\n").unwrap();
        assert_eq!(config.topics.batch_size, 25);
        assert_eq!(config.topics.replenish_count, 200);
        assert_eq!(config.schedule.interval_hours, 6);
        assert_eq!(config.render.width, 1080);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.publish.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schedule.post_times = vec!["25:99".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.content.api.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_post_times_sorts() {
        let times = parse_post_times(&["20:00", " 08:00", "20:00"]).unwrap();
        assert_eq!(
            times,
            vec![
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(20, 0, 0).unwrap()
            ]
        );
        assert!(parse_post_times::<&str>(&[]).is_err());
    }

    #[test]
    fn test_api_key_falls_back_to_config_value() {
        let api = LlmConfig {
            api_key: Some("from-file".to_string()),
            api_key_env: "EDUSHORTS_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(api.resolve_api_key().unwrap(), "from-file");

        let missing = LlmConfig {
            api_key: None,
            api_key_env: "EDUSHORTS_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        assert!(missing.resolve_api_key().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let loaded = Config::load(Some(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(loaded.store.log_retention_days, 30);
    }
}
