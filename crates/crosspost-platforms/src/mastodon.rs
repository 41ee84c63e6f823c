//! Mastodon adapter for the statuses API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crosspost_scheduler::{
    AdapterError, Delivery, MediaRef, PlatformAdapter, PlatformId, PostPayload, RemoteRef,
};

use crate::PlatformError;
use crate::content::{check_length, normalize};
use crate::credentials::MastodonCredentials;
use crate::http::{RetrySettings, build_client, check_response, decode_response, with_retry};
use crate::media::{file_name, read_media};

#[derive(Debug, Clone, Serialize)]
struct StatusRequest {
    status: String,
    visibility: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Publishes statuses to a Mastodon instance.
pub struct MastodonAdapter {
    http: Client,
    credentials: MastodonCredentials,
    retry: RetrySettings,
}

impl MastodonAdapter {
    pub fn new(credentials: MastodonCredentials) -> Result<Self, PlatformError> {
        Ok(Self::with_client(build_client()?, credentials))
    }

    pub fn with_client(http: Client, credentials: MastodonCredentials) -> Self {
        Self {
            http,
            credentials,
            retry: RetrySettings::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(
        payload: &PostPayload,
        media_ids: Vec<String>,
    ) -> Result<StatusRequest, PlatformError> {
        let in_reply_to_id = match &payload.reply {
            Some(reply) => Some(reply.parent.status_id.clone().ok_or_else(|| {
                PlatformError::InvalidReference("reply target has no status id".to_string())
            })?),
            None => None,
        };
        Ok(StatusRequest {
            status: normalize(&payload.content),
            visibility: "public",
            in_reply_to_id,
            media_ids,
        })
    }

    async fn upload_media(
        &self,
        media: &MediaRef,
        data: &[u8],
    ) -> Result<MediaResponse, PlatformError> {
        let (base, token) = self.credentials.api()?;
        let file = Part::bytes(data.to_vec())
            .file_name(file_name(media))
            .mime_str(&media.mime)?;
        let form = Form::new()
            .text("description", media.alt_text.clone())
            .part("file", file);
        let response = self
            .http
            .post(format!("{}/api/v2/media", base))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        decode_response(response, "media").await
    }

    /// Upload each attachment, skipping any that cannot be read or uploaded.
    async fn upload_all(&self, media: &[MediaRef]) -> Vec<String> {
        let mut ids = Vec::with_capacity(media.len());
        for attachment in media {
            let data = match read_media(attachment).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "skipping mastodon attachment");
                    continue;
                }
            };
            let data = &data;
            let outcome = with_retry(&self.retry, "media", move || {
                self.upload_media(attachment, data)
            })
            .await;
            match outcome.result {
                Ok(uploaded) => {
                    debug!(media_id = %uploaded.id, "uploaded mastodon attachment");
                    ids.push(uploaded.id);
                }
                Err(e) => warn!(
                    path = %attachment.path.display(),
                    error = %e,
                    "mastodon media upload failed"
                ),
            }
        }
        ids
    }

    async fn post_status(&self, request: &StatusRequest) -> Result<StatusResponse, PlatformError> {
        let (base, token) = self.credentials.api()?;
        let response = self
            .http
            .post(format!("{}/api/v1/statuses", base))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        decode_response(response, "statuses").await
    }

    async fn delete_status(&self, id: &str) -> Result<(), PlatformError> {
        let (base, token) = self.credentials.api()?;
        let response = self
            .http
            .delete(format!("{}/api/v1/statuses/{}", base, id))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(status_id = id, "status already gone");
            return Ok(());
        }
        check_response(response, "statuses").await.map(|_| ())
    }

    /// Status id of a stored post, falling back to the last path segment of its URL.
    fn status_id(remote: &RemoteRef) -> Option<String> {
        remote.status_id.clone().or_else(|| {
            remote
                .uri
                .as_deref()
                .and_then(|uri| uri.rsplit('/').next())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
    }
}

#[async_trait]
impl PlatformAdapter for MastodonAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Mastodon
    }

    fn validate_credentials(&self) -> Result<(), AdapterError> {
        self.credentials
            .api()
            .map(|_| ())
            .map_err(|e| e.into_adapter_error(0))
    }

    fn validate_content(&self, content: &str) -> Result<(), AdapterError> {
        check_length(PlatformId::Mastodon, content, self.credentials.max_chars)
            .map_err(|e| e.into_adapter_error(0))
    }

    async fn send(&self, payload: &PostPayload) -> Result<Delivery, AdapterError> {
        let media_ids = self.upload_all(&payload.media).await;
        let request =
            Self::build_request(payload, media_ids).map_err(|e| e.into_adapter_error(0))?;
        let request = &request;
        let outcome =
            with_retry(&self.retry, "statuses", move || self.post_status(request)).await;

        let status = outcome
            .result
            .map_err(|e| e.into_adapter_error(outcome.attempts))?;
        let uri = match status.url {
            Some(url) => url,
            None => {
                let (base, _) = self.credentials.api().map_err(|e| e.into_adapter_error(0))?;
                format!("{}/@me/{}", base, status.id)
            }
        };
        info!(status_id = %status.id, attempts = outcome.attempts, "created mastodon status");

        Ok(Delivery {
            remote: RemoteRef {
                uri: Some(uri),
                cid: None,
                status_id: Some(status.id),
            },
            posted_at: status.created_at.unwrap_or_else(Utc::now),
            attempts: outcome.attempts,
        })
    }

    async fn delete(&self, remote: &RemoteRef) -> Result<(), AdapterError> {
        let id = Self::status_id(remote).ok_or_else(|| {
            AdapterError::Validation("mastodon post has no status id recorded".to_string())
        })?;
        let id = id.as_str();

        let outcome = with_retry(&self.retry, "statuses", move || self.delete_status(id)).await;
        outcome
            .result
            .map(|()| info!(status_id = id, "deleted mastodon status"))
            .map_err(|e| e.into_adapter_error(outcome.attempts))
    }
}
