#![forbid(unsafe_code)]

//! Paste and upload: turn clipboard items or a chosen file into a saved
//! image.
//!
//! Flow: pick the first `image/*` item, measure its natural size, normalize
//! for the display (high-DPI screenshots shrink by the pixel ratio), fit the
//! result inside the viewport, then create the image at the origin under a
//! fresh v4 id. Non-image input stops the flow before anything is stored.

use std::fmt;
use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ppx_core::geometry::{fit_within, normalize_image_dimensions};
use ppx_core::{DisplayMetrics, Position, Size};
use ppx_runtime::logging::LOG_TARGET;
use ppx_runtime::{ImageId, OverlayStore};
use tracing::{info, warn};

/// One clipboard item or uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageBlob {
    pub fn new(mime: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    /// `data:<mime>;base64,<payload>`.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// First item with an `image/*` type.
#[must_use]
pub fn first_image(items: &[ImageBlob]) -> Option<&ImageBlob> {
    items.iter().find(|item| item.is_image())
}

/// Measures a bitmap's natural size.
#[allow(async_fn_in_trait)]
pub trait ImageReader {
    async fn measure(&self, blob: &ImageBlob) -> Result<Size, ImageDecodeError>;
}

/// Reads dimensions from the encoded bytes without decoding pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesImageReader;

impl BytesImageReader {
    pub fn dimensions(bytes: &[u8]) -> Result<Size, ImageDecodeError> {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(ImageDecodeError::Io)?
            .into_dimensions()
            .map_err(ImageDecodeError::Decode)?;
        let size = Size::new(width, height);
        if size.is_empty() {
            return Err(ImageDecodeError::ZeroSized);
        }
        Ok(size)
    }
}

impl ImageReader for BytesImageReader {
    async fn measure(&self, blob: &ImageBlob) -> Result<Size, ImageDecodeError> {
        Self::dimensions(&blob.bytes)
    }
}

/// The bitmap could not be measured.
#[derive(Debug)]
pub enum ImageDecodeError {
    Io(std::io::Error),
    Decode(image::ImageError),
    ZeroSized,
    /// Host-side loader failure (e.g. the browser's image element errored).
    Host(String),
}

impl fmt::Display for ImageDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read image: {e}"),
            Self::Decode(e) => write!(f, "failed to decode image: {e}"),
            Self::ZeroSized => write!(f, "image has zero width or height"),
            Self::Host(msg) => write!(f, "failed to load image: {msg}"),
        }
    }
}

impl std::error::Error for ImageDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::ZeroSized | Self::Host(_) => None,
        }
    }
}

/// Paste/upload failure.
#[derive(Debug)]
pub enum UploadError {
    /// Nothing with an `image/*` type was offered.
    NoImage,
    Decode(ImageDecodeError),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoImage => write!(f, "no image in pasted or uploaded content"),
            Self::Decode(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoImage => None,
            Self::Decode(e) => Some(e),
        }
    }
}

impl From<ImageDecodeError> for UploadError {
    fn from(e: ImageDecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Display size for a bitmap of `natural` pixels.
#[must_use]
pub fn display_size(natural: Size, metrics: &DisplayMetrics) -> Size {
    fit_within(
        normalize_image_dimensions(natural, metrics),
        metrics.viewport.as_size(),
    )
}

/// Store the first image among `items` and make it active.
pub async fn ingest<R: ImageReader>(
    store: &OverlayStore,
    reader: &R,
    items: &[ImageBlob],
    metrics: &DisplayMetrics,
) -> Result<ImageId, UploadError> {
    let Some(blob) = first_image(items) else {
        return Err(UploadError::NoImage);
    };
    let natural = match reader.measure(blob).await {
        Ok(size) => size,
        Err(e) => {
            warn!(target: LOG_TARGET, mime = %blob.mime, error = %e, "failed to measure image");
            return Err(e.into());
        }
    };
    let size = display_size(natural, metrics);
    let id = ImageId::new_v4();
    store.create_image(id, blob.to_data_url(), Position::ORIGIN, size);
    info!(
        target: LOG_TARGET,
        %id,
        natural_w = natural.width,
        natural_h = natural.height,
        width = size.width,
        height = size.height,
        "image added"
    );
    Ok(id)
}
