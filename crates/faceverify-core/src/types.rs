use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Media type used for still frames captured from the camera.
pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

/// Media type declared for payloads whose format is unknown.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// An immutable, format-tagged image payload ready for transmission.
///
/// The bytes are shared, so cloning is cheap; a slot that receives a new
/// capture replaces the whole value.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    media_type: String,
    bytes: Arc<[u8]>,
}

impl EncodedImage {
    pub fn new(media_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// A JPEG still, as produced by camera capture.
    pub fn jpeg(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(JPEG_MEDIA_TYPE, bytes)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Render as `data:<media-type>;base64,<payload>`.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Which of the two session slots an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The reference face.
    Known,
    /// The face being checked against the reference.
    New,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Known => f.write_str("known face"),
            Slot::New => f.write_str("new face"),
        }
    }
}

/// How an image entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Camera,
    Upload,
}

/// Both images of a ready session, as sent to the verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub known: EncodedImage,
    pub new: EncodedImage,
}

impl VerificationRequest {
    pub(crate) fn to_wire(&self) -> VerifyRequestBody {
        VerifyRequestBody {
            known_image: self.known.to_data_uri(),
            new_image: self.new.to_data_uri(),
        }
    }
}

/// JSON body of `POST /verify/`.
#[derive(Debug, Serialize)]
pub(crate) struct VerifyRequestBody {
    pub known_image: String,
    pub new_image: String,
}

/// JSON body returned by `POST /verify/`.
///
/// Every field is optional on the wire; a missing `success` counts as a
/// failure, which is how the server reports validation and internal errors.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerifyResponseBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub embedding_saved: bool,
    #[serde(default)]
    pub verification_id: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of one verification request, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// The service compared both faces (`success: true`).
    Completed {
        verified: bool,
        message: String,
        embedding_saved: bool,
        verification_id: Option<u64>,
    },
    /// The request failed, either in transport or on the server.
    Failed { error: String },
}

impl VerificationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Mirrors the wire `success` flag.
    pub fn success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// True only when the service ran and reported a match.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Completed { verified: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_rendering() {
        let image = EncodedImage::jpeg(b"A".to_vec());
        assert_eq!(image.to_data_uri(), "data:image/jpeg;base64,QQ==");
    }

    #[test]
    fn test_debug_hides_payload() {
        let image = EncodedImage::jpeg(vec![0u8; 4096]);
        let debug = format!("{image:?}");
        assert!(debug.contains("len: 4096"));
        assert!(debug.len() < 100);
    }

    #[test]
    fn test_result_flags() {
        let matched = VerificationResult::Completed {
            verified: true,
            message: "ok".into(),
            embedding_saved: false,
            verification_id: None,
        };
        assert!(matched.success());
        assert!(matched.is_match());

        let failed = VerificationResult::failed("no face detected");
        assert!(!failed.success());
        assert!(!failed.is_match());
    }

    #[test]
    fn test_response_defaults() {
        let body: VerifyResponseBody = serde_json::from_str(r#"{"error": "boom"}"#).unwrap();
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("boom"));
    }
}
