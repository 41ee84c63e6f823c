//! Platform adapters for crosspost.
//!
//! This crate provides:
//! - A Bluesky adapter speaking XRPC (`createSession`, `uploadBlob`, `createRecord`,
//!   `deleteRecord`)
//! - A Mastodon adapter for the statuses and media APIs
//! - Credential loading from environment variables
//! - Shared HTTP retry and response mapping

mod bluesky;
mod content;
mod credentials;
mod error;
pub mod http;
mod mastodon;
mod media;
mod uri;

use std::sync::Arc;

use crosspost_scheduler::PlatformRegistry;

pub use bluesky::BlueskyAdapter;
pub use content::{BLUESKY_MAX_CHARS, MASTODON_MAX_CHARS, check_length, normalize};
pub use credentials::{
    BlueskyCredentials, DEFAULT_BLUESKY_SERVICE, MastodonCredentials, PlatformCredentials,
};
pub use error::PlatformError;
pub use http::RetrySettings;
pub use mastodon::MastodonAdapter;
pub use uri::AtUri;

/// Build a registry with an adapter for every platform.
///
/// Adapters are registered even without credentials; dispatch then reports
/// a configuration error for that platform only.
pub fn build_registry(credentials: PlatformCredentials) -> Result<PlatformRegistry, PlatformError> {
    let client = http::build_client()?;
    Ok(PlatformRegistry::new()
        .with(Arc::new(BlueskyAdapter::with_client(
            client.clone(),
            credentials.bluesky,
        )))
        .with(Arc::new(MastodonAdapter::with_client(
            client,
            credentials.mastodon,
        ))))
}
