//! Image files chosen by the user.
//!
//! Files are forwarded as-is: the media type comes from the extension and
//! the bytes are never decoded here. Bad images are for the verification
//! service to reject.

use faceverify_core::types::OCTET_STREAM;
use faceverify_core::EncodedImage;
use image::ImageFormat;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileReadError {
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Media type declared for `path`, guessed from its extension.
pub fn media_type_for(path: &Path) -> &'static str {
    ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or(OCTET_STREAM)
}

/// Reads user-selected files into encoded images.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageSource;

impl FileImageSource {
    pub async fn read_file(&self, path: impl AsRef<Path>) -> Result<EncodedImage, FileReadError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| FileReadError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let media_type = media_type_for(path);
        tracing::debug!(path = %path.display(), media_type, bytes = bytes.len(), "read image file");
        Ok(EncodedImage::new(media_type, bytes))
    }
}
