//! Medley Cache Library
//!
//! Unified media resource cache for a GPU renderer: images, video frames
//! and embedded web surfaces become textures under one memory budget.
//!
//! The crate is organized around a single-owner model. [`MediaFacade`]
//! lives on the renderer thread and owns the GPU context, the texture
//! table, the [`MediaBudget`] and the [`ImageCache`]; decode work happens
//! on a background pool and comes back over a bounded completion channel
//! that the facade drains once per frame. External producers (a video
//! decoder, a web view) hand frames in as [`ExternalBuffer`]s, which are
//! imported zero-copy when the platform allows and copied otherwise.
//!
//! Image handles are plain `u32` ids made for a scripting boundary: 0 is
//! never a valid id, invalid loads return 0 rather than erroring, and
//! decode failures are kept queryable as [`ImageState::Failed`].

pub mod budget;
pub mod config;
pub mod error;
pub mod external;
pub mod facade;
pub mod gpu;
pub mod image;

pub use budget::{BudgetStats, MediaBudget, MediaType, DEFAULT_BUDGET_BYTES};
pub use config::{CacheConfig, ConfigError};
pub use error::ImportError;
pub use external::{
    import_texture, BufferPlane, CpuBackedBuffer, CrossDeviceBuffer, ExternalBuffer, ImportOutcome,
    ImportedTexture, PixelFormat, DRM_FORMAT_MOD_LINEAR,
};
pub use facade::{CachedTexture, FacadeStats, MediaFacade};
pub use gpu::{GpuContext, GpuTextureSet, WgpuContext, ZeroCopyImporter};
pub use image::{
    DecodeRequest, DecodeResult, DecodedPixels, ImageCache, ImageDimensions, ImageState,
    MAX_TEXTURE_SIZE,
};
