//! Loading attachments from disk.

use crosspost_scheduler::MediaRef;

use crate::PlatformError;

/// Read the bytes of one attachment.
pub(crate) async fn read_media(media: &MediaRef) -> Result<Vec<u8>, PlatformError> {
    tokio::fs::read(&media.path)
        .await
        .map_err(|source| PlatformError::Media {
            path: media.path.display().to_string(),
            source,
        })
}

/// File name sent with multipart uploads.
pub(crate) fn file_name(media: &MediaRef) -> String {
    media
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_names_the_path() {
        let media = MediaRef::new("/nonexistent/crosspost/photo.jpg");
        let err = read_media(&media).await.unwrap_err();
        assert!(
            err.to_string()
                .starts_with("cannot read media /nonexistent/crosspost/photo.jpg")
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_file_name_falls_back() {
        assert_eq!(file_name(&MediaRef::new("/srv/media/cat.png")), "cat.png");
        assert_eq!(file_name(&MediaRef::new("/")), "upload");
    }
}
