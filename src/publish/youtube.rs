use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use super::{Publisher, UploadError, VideoMetadata};
use crate::config::PublishConfig;
use crate::Result;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth client identity as downloaded from the Google console
#[derive(Debug, Clone, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Persisted OAuth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// True when the access token is present and will stay valid for at least a minute
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && expires_at > now + ChronoDuration::seconds(60),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Uploads videos through the YouTube Data API using a stored refresh token
pub struct YoutubePublisher {
    http: reqwest::Client,
    client_secrets_path: PathBuf,
    token_path: PathBuf,
    access_token: Mutex<Option<String>>,
    show_progress: bool,
}

impl YoutubePublisher {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            client_secrets_path: config.client_secrets_path.clone(),
            token_path: config.token_path.clone(),
            access_token: Mutex::new(None),
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs_err::read_to_string(&self.token_path)
            .context("No stored YouTube token; provision one with a refresh token first")?;
        serde_json::from_str(&content).context("Failed to parse YouTube token file")
    }

    fn save_token(&self, token: &StoredToken) -> Result<()> {
        let content = serde_json::to_string_pretty(token)?;
        fs_err::write(&self.token_path, content).context("Failed to save YouTube token file")
    }

    fn load_secrets(&self) -> Result<ClientSecrets> {
        let content = fs_err::read_to_string(&self.client_secrets_path)
            .context("Failed to read OAuth client secrets")?;
        parse_client_secrets(&content)
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .context("Stored token has expired and has no refresh token")?;
        let secrets = self.load_secrets()?;
        let token_uri = secrets.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let response = self.http
            .post(token_uri)
            .form(&[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("Token refresh request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh returned HTTP {}: {}", status, body);
        }

        let refreshed: RefreshResponse = response.json().await.context("Failed to decode token refresh response")?;
        Ok(StoredToken {
            access_token: Some(refreshed.access_token),
            refresh_token: refreshed.refresh_token.or_else(|| token.refresh_token.clone()),
            expires_at: refreshed.expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn current_access_token(&self) -> Result<String> {
        self.access_token
            .lock()
            .await
            .clone()
            .ok_or_else(|| UploadError::Rejected("not authenticated, call authenticate() first".to_string()).into())
    }

    async fn start_session(&self, access_token: &str, metadata: &VideoMetadata, size: u64) -> Result<String> {
        let body = json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": metadata.category_id,
            },
            "status": {
                "privacyStatus": metadata.privacy_status,
                "selfDeclaredMadeForKids": metadata.made_for_kids,
            },
        });

        let response = self.http
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(access_token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", size.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::Transient(format!("session request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body).into());
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| UploadError::Transient("upload session has no Location header".to_string()).into())
    }

    fn progress_bar(&self, size: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(size);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_message("Uploading video...");
        progress
    }
}

#[async_trait]
impl Publisher for YoutubePublisher {
    async fn authenticate(&self) -> Result<()> {
        let token = self.load_token()?;

        let token = if token.is_fresh(Utc::now()) {
            tracing::info!("Loaded existing credentials");
            token
        } else {
            let refreshed = self.refresh(&token).await?;
            tracing::info!("Refreshed expired credentials");
            if let Err(e) = self.save_token(&refreshed) {
                tracing::warn!("Could not save token file: {:#}", e);
            }
            refreshed
        };

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .context("Token file has no access token")?;
        *self.access_token.lock().await = Some(access_token);
        Ok(())
    }

    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String> {
        let access_token = self.current_access_token().await?;

        let file = tokio::fs::File::open(video)
            .await
            .map_err(|e| UploadError::Rejected(format!("video file {} unreadable: {}", video.display(), e)))?;
        let size = file.metadata().await?.len();

        tracing::info!("Uploading video: {}", metadata.title);
        let session_url = self.start_session(&access_token, metadata, size).await?;

        let progress = self.progress_bar(size);
        let bar = progress.clone();
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                bar.inc(bytes.len() as u64);
            }
        });

        let response = self.http
            .put(&session_url)
            .bearer_auth(&access_token)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| UploadError::Transient(format!("upload request failed: {}", e)))?;
        progress.finish_and_clear();

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body).into());
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Transient(format!("unreadable upload response: {}", e)))?;

        tracing::info!("Video uploaded successfully! Video ID: {}", uploaded.id);
        tracing::info!("Shorts URL: https://www.youtube.com/shorts/{}", uploaded.id);
        Ok(uploaded.id)
    }
}

fn parse_client_secrets(content: &str) -> Result<ClientSecrets> {
    let file: ClientSecretsFile = serde_json::from_str(content).context("Failed to parse OAuth client secrets")?;
    file.installed
        .or(file.web)
        .context("Client secrets file has neither an 'installed' nor a 'web' section")
}

/// Decide whether a failed response is worth retrying
fn classify_failure(status: StatusCode, body: &str) -> UploadError {
    let message = format!("HTTP {}: {}", status, body.trim());

    match status {
        StatusCode::FORBIDDEN if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") => {
            UploadError::Transient(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::Rejected(message),
        _ => UploadError::Transient(message),
    }
}
