//! Platform credentials read from the environment.

use crosspost_scheduler::PlatformId;

use crate::PlatformError;
use crate::content::MASTODON_MAX_CHARS;

/// Default Bluesky PDS.
pub const DEFAULT_BLUESKY_SERVICE: &str = "https://bsky.social";

/// Bluesky login settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueskyCredentials {
    pub service: String,
    pub identifier: Option<String>,
    pub app_password: Option<String>,
}

impl Default for BlueskyCredentials {
    fn default() -> Self {
        Self {
            service: DEFAULT_BLUESKY_SERVICE.to_string(),
            identifier: None,
            app_password: None,
        }
    }
}

impl BlueskyCredentials {
    /// Identifier and app password, or the names of the missing variables.
    pub fn login(&self) -> Result<(&str, &str), PlatformError> {
        match (self.identifier.as_deref(), self.app_password.as_deref()) {
            (Some(identifier), Some(password)) => Ok((identifier, password)),
            (identifier, password) => {
                let mut missing = Vec::new();
                if identifier.is_none() {
                    missing.push("BLUESKY_IDENTIFIER");
                }
                if password.is_none() {
                    missing.push("BLUESKY_APP_PASSWORD");
                }
                Err(PlatformError::MissingCredentials {
                    platform: PlatformId::Bluesky,
                    missing: missing.join(", "),
                })
            }
        }
    }
}

/// Mastodon API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastodonCredentials {
    pub api_url: Option<String>,
    pub access_token: Option<String>,
    /// Status length limit of the instance.
    pub max_chars: usize,
}

impl Default for MastodonCredentials {
    fn default() -> Self {
        Self {
            api_url: None,
            access_token: None,
            max_chars: MASTODON_MAX_CHARS,
        }
    }
}

impl MastodonCredentials {
    /// Base URL without trailing slash and the access token.
    pub fn api(&self) -> Result<(&str, &str), PlatformError> {
        match (self.api_url.as_deref(), self.access_token.as_deref()) {
            (Some(url), Some(token)) => Ok((url.trim_end_matches('/'), token)),
            (url, token) => {
                let mut missing = Vec::new();
                if url.is_none() {
                    missing.push("MASTODON_API_URL");
                }
                if token.is_none() {
                    missing.push("MASTODON_ACCESS_TOKEN");
                }
                Err(PlatformError::MissingCredentials {
                    platform: PlatformId::Mastodon,
                    missing: missing.join(", "),
                })
            }
        }
    }
}

/// Credentials of every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub bluesky: BlueskyCredentials,
    pub mastodon: MastodonCredentials,
}

impl PlatformCredentials {
    /// Read credentials from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            bluesky: BlueskyCredentials {
                service: get("BLUESKY_SERVICE")
                    .unwrap_or_else(|| DEFAULT_BLUESKY_SERVICE.to_string()),
                identifier: get("BLUESKY_IDENTIFIER"),
                app_password: get("BLUESKY_APP_PASSWORD"),
            },
            mastodon: MastodonCredentials {
                api_url: get("MASTODON_API_URL"),
                access_token: get("MASTODON_ACCESS_TOKEN"),
                max_chars: get("MASTODON_MAX_CHARS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(MASTODON_MAX_CHARS),
            },
        }
    }
}
