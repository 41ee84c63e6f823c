//! Platform adapter port.
//!
//! Concrete adapters live outside this crate; the dispatchers only see the
//! [`PlatformAdapter`] trait and look adapters up through a [`PlatformRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{MAX_MEDIA, MediaRef, PlatformId, RemoteRef};

/// Reply targets of a threaded post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    /// First post of the conversation.
    pub root: RemoteRef,
    /// Post being replied to.
    pub parent: RemoteRef,
}

/// Content handed to an adapter for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPayload {
    pub content: String,
    /// Attachments, never more than [`MAX_MEDIA`].
    pub media: Vec<MediaRef>,
    pub reply: Option<ReplyTo>,
}

impl PostPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media: Vec::new(),
            reply: None,
        }
    }

    /// Attach the first [`MAX_MEDIA`] entries of `media`.
    pub fn with_media(mut self, media: &[MediaRef]) -> Self {
        self.media = media.iter().take(MAX_MEDIA).cloned().collect();
        self
    }

    pub fn replying_to(mut self, reply: ReplyTo) -> Self {
        self.reply = Some(reply);
        self
    }
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub remote: RemoteRef,
    pub posted_at: DateTime<Utc>,
    /// Attempts the adapter needed, including internal retries.
    pub attempts: u32,
}

/// Errors reported by adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Credentials or settings are missing. Never retried within an attempt.
    #[error("{0}")]
    Configuration(String),

    /// Content breaks a platform rule.
    #[error("{0}")]
    Validation(String),

    /// The platform call failed.
    #[error("{message}")]
    Delivery { message: String, attempts: u32 },
}

impl AdapterError {
    pub fn delivery(message: impl Into<String>, attempts: u32) -> Self {
        Self::Delivery {
            message: message.into(),
            attempts,
        }
    }

    /// Attempts consumed before the error was returned.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivery { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// One external delivery destination.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform this adapter delivers to.
    fn platform(&self) -> PlatformId;

    /// Check that credentials are present before any call is made.
    fn validate_credentials(&self) -> Result<(), AdapterError>;

    /// Check content against platform rules.
    fn validate_content(&self, _content: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Publish a post, optionally as a reply.
    async fn send(&self, payload: &PostPayload) -> Result<Delivery, AdapterError>;

    /// Remove a previously published post.
    async fn delete(&self, remote: &RemoteRef) -> Result<(), AdapterError>;
}

/// Adapters keyed by platform.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    adapters: HashMap<PlatformId, Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its platform.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, platform: PlatformId) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    /// Adapter for `platform` with its credentials checked.
    pub fn ready(&self, platform: PlatformId) -> Result<Arc<dyn PlatformAdapter>, AdapterError> {
        let adapter = self.get(platform).ok_or_else(|| {
            AdapterError::Configuration(format!("no adapter configured for {}", platform))
        })?;
        adapter.validate_credentials()?;
        Ok(adapter)
    }

    pub fn platforms(&self) -> impl Iterator<Item = PlatformId> + '_ {
        self.adapters.keys().copied()
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut platforms: Vec<_> = self.platforms().collect();
        platforms.sort();
        f.debug_struct("PlatformRegistry")
            .field("platforms", &platforms)
            .finish()
    }
}
