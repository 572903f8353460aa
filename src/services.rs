//! Opaque HTTP collaborator services: audio generation, page summarization,
//! and outbound email. Each is a JSON POST; anything other than a 2xx with a
//! usable body is surfaced as a [`HuddleError::Service`].

use base64::Engine;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

use crate::Huddle;
use crate::error::{HuddleError, Result};

/// Generated audio duration is clamped to this range, in minutes.
const MIN_AUDIO_MINUTES: f64 = 0.5;
const MAX_AUDIO_MINUTES: f64 = 2.0;

static HTTP: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub audio: Vec<u8>,
    pub transcript: String,
    pub mime: String,
}

#[derive(Deserialize)]
struct AudioResponse {
    audio_base64: String,
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    mime: String,
}

#[derive(Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    data: String,
}

fn service_url(configured: &Option<String>, name: &str) -> Result<String> {
    configured
        .as_deref()
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| HuddleError::Configuration(format!("{name} service URL is not set")))
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(HuddleError::Service(format!("{status}: {body}")))
}

impl Huddle {
    /// Generates a mini audiobook from a prompt. Duration is clamped to
    /// [0.5, 2.0] minutes.
    pub async fn generate_audiobook(
        &self,
        team_id: &str,
        prompt: &str,
        duration_minutes: f64,
    ) -> Result<GeneratedAudio> {
        let base = service_url(&self.config.audio_service_url, "audio")?;
        let duration = duration_minutes.clamp(MIN_AUDIO_MINUTES, MAX_AUDIO_MINUTES);
        let response = HTTP
            .post(format!("{base}/generate"))
            .json(&json!({
                "prompt": prompt,
                "duration_minutes": duration,
                "teamId": team_id,
            }))
            .send()
            .await?;
        let parsed: AudioResponse = check(response).await?.json().await?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_base64.as_bytes())
            .map_err(|e| HuddleError::Service(format!("invalid audio payload: {e}")))?;
        Ok(GeneratedAudio {
            audio,
            transcript: parsed.transcript,
            mime: if parsed.mime.is_empty() {
                "audio/mpeg".to_string()
            } else {
                parsed.mime
            },
        })
    }

    /// Extracts a summary of the page behind a URL.
    pub async fn summarize_url(&self, url: &str) -> Result<String> {
        let base = service_url(&self.config.summary_service_url, "summary")?;
        let response = HTTP
            .post(format!("{base}/extract"))
            .json(&json!({ "url": url.trim() }))
            .send()
            .await?;
        let parsed: SummaryResponse = check(response).await?.json().await?;
        if !parsed.summary.is_empty() {
            Ok(parsed.summary)
        } else if !parsed.data.is_empty() {
            Ok(parsed.data)
        } else {
            Err(HuddleError::Service("summary response was empty".to_string()))
        }
    }

    /// Sends an email through the outbound email service. The plain-text
    /// body is converted to HTML line breaks on the way out.
    pub(crate) async fn send_service_email(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
    ) -> Result<()> {
        let base = service_url(&self.config.email_service_url, "email")?;
        let response = HTTP
            .post(format!("{base}/send"))
            .json(&json!({
                "from": from,
                "to": to,
                "subject": subject,
                "html": body.trim().replace('\n', "<br/>"),
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
