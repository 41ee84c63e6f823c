//! Post text normalization and length checks.

use crosspost_scheduler::PlatformId;

use crate::PlatformError;

/// Bluesky post length limit.
pub const BLUESKY_MAX_CHARS: usize = 300;

/// Default Mastodon status length limit (instances may raise it).
pub const MASTODON_MAX_CHARS: usize = 500;

/// Strip zero-width characters that count against limits but render as nothing.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect()
}

/// Check normalized `text` against `limit` characters.
pub fn check_length(platform: PlatformId, text: &str, limit: usize) -> Result<(), PlatformError> {
    let length = normalize(text).chars().count();
    if length > limit {
        return Err(PlatformError::ContentTooLong {
            platform,
            length,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_zero_width() {
        assert_eq!(normalize("a\u{200B}b\u{FEFF}c"), "abc");
        assert_eq!(normalize("plain"), "plain");
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let text = "é".repeat(300);
        assert!(check_length(PlatformId::Bluesky, &text, BLUESKY_MAX_CHARS).is_ok());

        let text = "x".repeat(301);
        let err = check_length(PlatformId::Bluesky, &text, BLUESKY_MAX_CHARS).unwrap_err();
        assert_eq!(err.to_string(), "bluesky allows 300 characters, content has 301");
    }

    #[test]
    fn test_zero_width_does_not_count() {
        let text = format!("{}\u{200B}", "x".repeat(500));
        assert!(check_length(PlatformId::Mastodon, &text, MASTODON_MAX_CHARS).is_ok());
    }
}
