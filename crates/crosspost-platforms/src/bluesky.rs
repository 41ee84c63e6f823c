//! Bluesky adapter speaking XRPC to a PDS.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crosspost_scheduler::{
    AdapterError, Delivery, MediaRef, PlatformAdapter, PlatformId, PostPayload, RemoteRef,
    ReplyTo,
};

use crate::PlatformError;
use crate::content::{BLUESKY_MAX_CHARS, check_length, normalize};
use crate::credentials::BlueskyCredentials;
use crate::http::{RetrySettings, build_client, check_response, decode_response, with_retry};
use crate::media::read_media;
use crate::uri::AtUri;

const POST_COLLECTION: &str = "app.bsky.feed.post";
const IMAGES_EMBED: &str = "app.bsky.embed.images";

/// Authenticated session returned by `createSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    did: String,
    access_jwt: String,
}

/// Reference to a specific version of a record.
#[derive(Debug, Clone, Serialize)]
struct StrongRef {
    uri: String,
    cid: String,
}

impl StrongRef {
    fn from_remote(remote: &RemoteRef) -> Result<Self, PlatformError> {
        match (&remote.uri, &remote.cid) {
            (Some(uri), Some(cid)) => Ok(Self {
                uri: uri.clone(),
                cid: cid.clone(),
            }),
            _ => Err(PlatformError::InvalidReference(
                "reply target needs both uri and cid".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ReplyRef {
    root: StrongRef,
    parent: StrongRef,
}

impl ReplyRef {
    fn from_reply(reply: &ReplyTo) -> Result<Self, PlatformError> {
        Ok(Self {
            root: StrongRef::from_remote(&reply.root)?,
            parent: StrongRef::from_remote(&reply.parent)?,
        })
    }
}

/// One uploaded image of an `app.bsky.embed.images` embed.
#[derive(Debug, Clone, Serialize)]
struct EmbedImage {
    /// Blob reference exactly as returned by `uploadBlob`.
    image: serde_json::Value,
    alt: String,
}

#[derive(Debug, Clone, Serialize)]
struct ImagesEmbed {
    #[serde(rename = "$type")]
    embed_type: &'static str,
    images: Vec<EmbedImage>,
}

/// An `app.bsky.feed.post` record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(rename = "$type")]
    record_type: &'static str,
    text: String,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embed: Option<ImagesEmbed>,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
    cid: String,
}

/// Publishes posts to Bluesky.
///
/// Logs in on first use and keeps the session for later calls. An expired
/// access token triggers one fresh login.
pub struct BlueskyAdapter {
    http: Client,
    credentials: BlueskyCredentials,
    session: RwLock<Option<Session>>,
    retry: RetrySettings,
}

impl BlueskyAdapter {
    pub fn new(credentials: BlueskyCredentials) -> Result<Self, PlatformError> {
        Ok(Self::with_client(build_client()?, credentials))
    }

    pub fn with_client(http: Client, credentials: BlueskyCredentials) -> Self {
        Self {
            http,
            credentials,
            session: RwLock::new(None),
            retry: RetrySettings::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/xrpc/{}",
            self.credentials.service.trim_end_matches('/'),
            method
        )
    }

    /// Authenticate and replace the cached session.
    async fn login(&self) -> Result<Session, PlatformError> {
        #[derive(Serialize)]
        struct LoginRequest<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let (identifier, password) = self.credentials.login()?;
        let response = self
            .http
            .post(self.url("com.atproto.server.createSession"))
            .json(&LoginRequest {
                identifier,
                password,
            })
            .send()
            .await?;

        let session: Session = decode_response(response, "createSession").await?;
        debug!(did = %session.did, "authenticated with bluesky");
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<Session, PlatformError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.login().await
    }

    /// Run an authenticated call, logging in again once if the token expired.
    async fn authenticated<T, F, Fut>(&self, call: F) -> Result<T, PlatformError>
    where
        F: Fn(Session) -> Fut,
        Fut: std::future::Future<Output = Result<T, PlatformError>>,
    {
        let session = self.session().await?;
        match call(session).await {
            Err(e) if e.is_expired_token() => {
                debug!("bluesky session expired, logging in again");
                let session = self.login().await?;
                call(session).await
            }
            other => other,
        }
    }

    async fn create_post(
        &self,
        record: &PostRecord,
    ) -> Result<CreateRecordResponse, PlatformError> {
        #[derive(Serialize)]
        struct CreateRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            record: &'a PostRecord,
        }

        self.authenticated(|session| async move {
            let response = self
                .http
                .post(self.url("com.atproto.repo.createRecord"))
                .bearer_auth(&session.access_jwt)
                .json(&CreateRequest {
                    repo: &session.did,
                    collection: POST_COLLECTION,
                    record,
                })
                .send()
                .await?;
            decode_response(response, "createRecord").await
        })
        .await
    }

    async fn upload_blob(
        &self,
        data: &[u8],
        mime: &str,
    ) -> Result<UploadBlobResponse, PlatformError> {
        self.authenticated(|session| async move {
            let response = self
                .http
                .post(self.url("com.atproto.repo.uploadBlob"))
                .bearer_auth(&session.access_jwt)
                .header(reqwest::header::CONTENT_TYPE, mime)
                .body(data.to_vec())
                .send()
                .await?;
            decode_response(response, "uploadBlob").await
        })
        .await
    }

    /// Upload each attachment, skipping any that cannot be read or uploaded.
    async fn upload_images(&self, media: &[MediaRef]) -> Vec<EmbedImage> {
        let mut images = Vec::with_capacity(media.len());
        for attachment in media {
            let data = match read_media(attachment).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "skipping bluesky image");
                    continue;
                }
            };
            let (data, mime) = (&data, attachment.mime.as_str());
            let outcome =
                with_retry(&self.retry, "uploadBlob", move || self.upload_blob(data, mime)).await;
            match outcome.result {
                Ok(uploaded) => images.push(EmbedImage {
                    image: uploaded.blob,
                    alt: attachment.alt_text.clone(),
                }),
                Err(e) => warn!(
                    path = %attachment.path.display(),
                    error = %e,
                    "bluesky image upload failed"
                ),
            }
        }
        images
    }

    async fn delete_record(&self, uri: &AtUri) -> Result<(), PlatformError> {
        #[derive(Serialize)]
        struct DeleteRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            rkey: &'a str,
        }

        self.authenticated(|session| async move {
            let response = self
                .http
                .post(self.url("com.atproto.repo.deleteRecord"))
                .bearer_auth(&session.access_jwt)
                .json(&DeleteRequest {
                    repo: &uri.did,
                    collection: &uri.collection,
                    rkey: &uri.rkey,
                })
                .send()
                .await?;
            check_response(response, "deleteRecord").await.map(|_| ())
        })
        .await
    }

    fn build_record(
        payload: &PostPayload,
        images: Vec<EmbedImage>,
    ) -> Result<PostRecord, PlatformError> {
        let reply = payload.reply.as_ref().map(ReplyRef::from_reply).transpose()?;
        let embed = (!images.is_empty()).then_some(ImagesEmbed {
            embed_type: IMAGES_EMBED,
            images,
        });
        Ok(PostRecord {
            record_type: POST_COLLECTION,
            text: normalize(&payload.content),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            reply,
            embed,
        })
    }
}

#[async_trait]
impl PlatformAdapter for BlueskyAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Bluesky
    }

    fn validate_credentials(&self) -> Result<(), AdapterError> {
        self.credentials
            .login()
            .map(|_| ())
            .map_err(|e| e.into_adapter_error(0))
    }

    fn validate_content(&self, content: &str) -> Result<(), AdapterError> {
        check_length(PlatformId::Bluesky, content, BLUESKY_MAX_CHARS)
            .map_err(|e| e.into_adapter_error(0))
    }

    async fn send(&self, payload: &PostPayload) -> Result<Delivery, AdapterError> {
        let images = self.upload_images(&payload.media).await;
        let record = Self::build_record(payload, images).map_err(|e| e.into_adapter_error(0))?;
        let record = &record;
        let outcome =
            with_retry(&self.retry, "createRecord", move || self.create_post(record)).await;

        match outcome.result {
            Ok(created) => {
                info!(uri = %created.uri, attempts = outcome.attempts, "created bluesky post");
                Ok(Delivery {
                    remote: RemoteRef {
                        uri: Some(created.uri),
                        cid: Some(created.cid),
                        status_id: None,
                    },
                    posted_at: Utc::now(),
                    attempts: outcome.attempts,
                })
            }
            Err(e) => Err(e.into_adapter_error(outcome.attempts)),
        }
    }

    async fn delete(&self, remote: &RemoteRef) -> Result<(), AdapterError> {
        let raw = remote.uri.as_deref().ok_or_else(|| {
            AdapterError::Validation("bluesky post has no AT URI recorded".to_string())
        })?;
        let uri = AtUri::parse(raw).map_err(|e| e.into_adapter_error(0))?;
        let uri = &uri;

        let outcome =
            with_retry(&self.retry, "deleteRecord", move || self.delete_record(uri)).await;
        outcome
            .result
            .map(|()| info!(uri = %uri, "deleted bluesky post"))
            .map_err(|e| e.into_adapter_error(outcome.attempts))
    }
}
