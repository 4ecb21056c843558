use std::path::Path;

use moodboard_contracts::ImageRef;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageBytes {
    pub fn new(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self { bytes, mime_type }
    }

    /// Declared MIME type, falling back to sniffing the bytes.
    pub fn effective_mime(&self) -> &str {
        if let Some(mime) = self.mime_type.as_deref().filter(|value| !value.is_empty()) {
            return mime;
        }
        match image::guess_format(&self.bytes) {
            Ok(image::ImageFormat::Png) => "image/png",
            Ok(image::ImageFormat::WebP) => "image/webp",
            Ok(image::ImageFormat::Gif) => "image/gif",
            _ => "image/jpeg",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cannot resolve {kind} image handles here")]
    Unsupported { kind: &'static str },
    #[error("failed reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("image download failed: {0}")]
    Transport(String),
}

/// `resolve(handle) -> bytes` over every kind of [`ImageRef`].
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, image: &ImageRef) -> Result<ImageBytes, FetchError>;
}

/// Resolves local paths and inline bytes. Remote handles need a transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResolver;

impl ImageResolver for LocalResolver {
    fn resolve(&self, image: &ImageRef) -> Result<ImageBytes, FetchError> {
        resolve_local(image).unwrap_or(Err(FetchError::Unsupported {
            kind: image.kind(),
        }))
    }
}

/// `None` for remote handles so transports can chain their own fetch.
pub fn resolve_local(image: &ImageRef) -> Option<Result<ImageBytes, FetchError>> {
    match image {
        ImageRef::Remote { .. } => None,
        ImageRef::Local { path } => Some(
            std::fs::read(path)
                .map(|bytes| ImageBytes::new(bytes, mime_for_path(path).map(str::to_string)))
                .map_err(|source| FetchError::Io {
                    path: path.display().to_string(),
                    source,
                }),
        ),
        ImageRef::Inline { bytes, mime_type } => {
            Some(Ok(ImageBytes::new(bytes.clone(), mime_type.clone())))
        }
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("png") {
        return "png";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "jpg"
}
