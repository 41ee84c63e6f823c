//! AT URI parsing for record deletion.

use std::fmt;

use crate::PlatformError;

/// A parsed AT Protocol URI.
///
/// AT URIs have the format: `at://{did}/{collection}/{rkey}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    /// The DID of the repository owner.
    pub did: String,
    /// The collection (e.g., "app.bsky.feed.post").
    pub collection: String,
    /// The record key.
    pub rkey: String,
}

impl AtUri {
    /// Parse an AT URI string.
    ///
    /// ```
    /// use crosspost_platforms::AtUri;
    ///
    /// let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3abc").unwrap();
    /// assert_eq!(uri.did, "did:plc:abc123");
    /// assert_eq!(uri.rkey, "3abc");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, PlatformError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| PlatformError::InvalidReference(format!("missing at:// prefix: {uri}")))?;

        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(PlatformError::InvalidReference(format!(
                "expected at://did/collection/rkey: {uri}"
            )));
        }

        Ok(Self {
            did: parts[0].to_string(),
            collection: parts[1].to_string(),
            rkey: parts[2].to_string(),
        })
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}
