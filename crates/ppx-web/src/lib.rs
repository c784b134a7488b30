#![forbid(unsafe_code)]

//! Browser-extension adapters for the pixel-perfect overlay.
//!
//! Everything except [`wasm`] is host-independent and tested natively with
//! fake gateways:
//!
//! - [`protocol`]: the `action`-tagged message format.
//! - [`capability`]: which tabs the overlay may run on.
//! - [`host`]: retry-once-after-inject delivery from the background worker.
//! - [`upload`]: paste/upload into a saved image.
//! - [`content`]: page-side message handling and outbound mirroring.

pub mod capability;
pub mod content;
pub mod host;
pub mod protocol;
pub mod upload;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use capability::{InjectionProbe, TabId, TabInfo, can_use_extension, is_supported_url};
pub use content::ContentRuntime;
pub use host::{HostBridge, MessagingError, MessagingGateway};
pub use protocol::{Message, ProtocolError, Response};
pub use upload::{BytesImageReader, ImageBlob, ImageDecodeError, ImageReader, UploadError, ingest};
