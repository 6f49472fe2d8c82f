//! Media facade: the single owner of textures, budget and image cache.
//!
//! The renderer thread drives everything through this type: load calls go
//! to the image cache, decode completions are drained once per frame via
//! [`MediaFacade::process_completions`], external video/web frames arrive
//! through [`MediaFacade::import_external`], and every promotion to a
//! texture makes room first by asking the budget for eviction candidates.
//! GPU resources are created and dropped here and nowhere else.

use std::collections::HashMap;

use medley_decode::CompletionReceiver;

use crate::budget::{BudgetStats, MediaBudget, MediaType};
use crate::config::CacheConfig;
use crate::error::ImportError;
use crate::external::{self, ExternalBuffer};
use crate::gpu::GpuContext;
use crate::image::{DecodeResult, ImageCache, ImageDimensions, ImageState};

/// A resident media texture plus its accounting metadata.
pub struct CachedTexture<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
    /// Bytes charged against the budget: `width * height * 4`.
    pub memory_size: usize,
    pub media_type: MediaType,
    pub id: u32,
}

/// Counters maintained by the facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeStats {
    pub textures_resident: usize,
    pub evictions: u64,
    pub stale_completions: u64,
    pub failed_decodes: u64,
    pub zero_copy_imports: u64,
    pub cpu_imports: u64,
}

/// Coordinates the image cache, the media budget and the GPU context.
pub struct MediaFacade<G: GpuContext> {
    // Declared before `images` so the completion receiver drops first,
    // unblocking any worker waiting on a full channel before the pool's
    // job queue closes.
    completions: CompletionReceiver<DecodeResult>,
    images: ImageCache,
    gpu: G,
    budget: MediaBudget,
    textures: HashMap<(MediaType, u32), CachedTexture<G::Texture>>,
    evictions: u64,
    stale_completions: u64,
    failed_decodes: u64,
    zero_copy_imports: u64,
    cpu_imports: u64,
}

impl<G: GpuContext> MediaFacade<G> {
    /// Create a facade over a GPU context.
    pub fn new(gpu: G, config: CacheConfig) -> Self {
        let (images, completions) = ImageCache::new(&config);
        Self {
            completions,
            images,
            gpu,
            budget: MediaBudget::new(config.budget_bytes),
            textures: HashMap::new(),
            evictions: 0,
            stale_completions: 0,
            failed_decodes: 0,
            zero_copy_imports: 0,
            cpu_imports: 0,
        }
    }

    // --- image loading (scripting surface) ---

    /// Load an image from a file. Returns 0 for invalid input.
    pub fn load_image_file(&mut self, path: impl Into<std::path::PathBuf>) -> u32 {
        self.images.load_file(path)
    }

    /// Load an image from a file, scaled down to fit the given bounds.
    pub fn load_image_file_scaled(
        &mut self,
        path: impl Into<std::path::PathBuf>,
        max_width: Option<u32>,
        max_height: Option<u32>,
    ) -> u32 {
        self.images.load_file_scaled(path, max_width, max_height)
    }

    /// Load an image from encoded bytes. Returns 0 for invalid input.
    pub fn load_image_data(&mut self, data: Vec<u8>) -> u32 {
        self.images.load_data(data)
    }

    /// Load a raw ARGB32 frame. Returns 0 for invalid input.
    pub fn load_image_raw_argb32(
        &mut self,
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
    ) -> u32 {
        self.images.load_raw_argb32(data, width, height, stride)
    }

    /// Load a raw RGB24 frame. Returns 0 for invalid input.
    pub fn load_image_raw_rgb24(
        &mut self,
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
    ) -> u32 {
        self.images.load_raw_rgb24(data, width, height, stride)
    }

    /// State of an image id, `None` for unknown ids.
    pub fn image_state(&self, id: u32) -> Option<ImageState> {
        self.images.state(id)
    }

    /// Dimensions of an image id, if known yet.
    pub fn image_dimensions(&self, id: u32) -> Option<ImageDimensions> {
        self.images.dimensions(id)
    }

    // --- frame-loop driving ---

    /// Drain all pending decode completions and promote them to textures.
    ///
    /// Called once per frame from the renderer thread. Completions for ids
    /// that were unloaded (or evicted) while the decode was in flight are
    /// discarded. Returns the number of completions drained.
    pub fn process_completions(&mut self) -> usize {
        let mut drained = 0;
        while let Some(result) = self.completions.try_recv() {
            drained += 1;

            if !self.images.is_pending(result.id) {
                // Unloaded or evicted while decoding; drop the pixels.
                log::debug!("discarding stale decode completion for image {}", result.id);
                self.stale_completions += 1;
                continue;
            }

            match result.outcome {
                Ok(pixels) => {
                    let size = pixels.width as usize * pixels.height as usize * 4;
                    self.make_room(size);
                    match self.gpu.upload_rgba(pixels.width, pixels.height, &pixels.rgba) {
                        Ok(texture) => {
                            self.textures.insert(
                                (MediaType::Image, result.id),
                                CachedTexture {
                                    texture,
                                    width: pixels.width,
                                    height: pixels.height,
                                    memory_size: size,
                                    media_type: MediaType::Image,
                                    id: result.id,
                                },
                            );
                            self.budget.register(MediaType::Image, result.id, size);
                            self.images.mark_ready(
                                result.id,
                                ImageDimensions {
                                    width: pixels.width,
                                    height: pixels.height,
                                },
                            );
                        }
                        Err(err) => {
                            self.failed_decodes += 1;
                            self.images.mark_failed(result.id, err.to_string());
                        }
                    }
                }
                Err(reason) => {
                    self.failed_decodes += 1;
                    self.images.mark_failed(result.id, reason);
                }
            }
        }
        drained
    }

    /// Import an external video or web-surface frame as a texture.
    ///
    /// Replaces any texture already held under `(media_type, id)`. The
    /// producer owns the id namespace for its media type. Image textures
    /// only enter through the decode pipeline, so `MediaType::Image` is
    /// rejected here: it would create a texture with no image record
    /// behind it.
    pub fn import_external(
        &mut self,
        media_type: MediaType,
        id: u32,
        buffer: &ExternalBuffer,
    ) -> Result<(), ImportError> {
        if media_type == MediaType::Image {
            return Err(ImportError::InvalidBuffer(
                "image ids are owned by the image cache",
            ));
        }

        // Drop the previous frame's texture first so its memory does not
        // count against the incoming one.
        if self.textures.remove(&(media_type, id)).is_some() {
            self.budget.unregister(media_type, id);
        }

        let size = buffer.width() as usize * buffer.height() as usize * 4;
        self.make_room(size);

        let imported = external::import_texture(&mut self.gpu, buffer)?;
        if imported.zero_copy {
            self.zero_copy_imports += 1;
        } else {
            self.cpu_imports += 1;
        }

        self.textures.insert(
            (media_type, id),
            CachedTexture {
                texture: imported.texture,
                width: imported.width,
                height: imported.height,
                memory_size: size,
                media_type,
                id,
            },
        );
        self.budget.register(media_type, id, size);
        Ok(())
    }

    /// Get a resident texture, marking it most recently used.
    pub fn get_texture(&mut self, media_type: MediaType, id: u32) -> Option<&CachedTexture<G::Texture>> {
        if self.textures.contains_key(&(media_type, id)) {
            self.budget.touch(media_type, id);
        }
        self.textures.get(&(media_type, id))
    }

    /// Mark an entry most recently used without borrowing its texture.
    pub fn touch(&mut self, media_type: MediaType, id: u32) {
        self.budget.touch(media_type, id);
    }

    /// Release one media entry. For images the record is removed entirely,
    /// so a decode still in flight will be discarded on arrival.
    pub fn unload(&mut self, media_type: MediaType, id: u32) {
        self.textures.remove(&(media_type, id));
        self.budget.unregister(media_type, id);
        if media_type == MediaType::Image {
            self.images.remove(id);
        }
    }

    /// Release an image by id.
    pub fn unload_image(&mut self, id: u32) {
        self.unload(MediaType::Image, id);
    }

    /// Release every texture and forget all images.
    pub fn clear(&mut self) {
        self.textures.clear();
        self.budget = MediaBudget::new(self.budget.max_memory());
        self.images.clear();
    }

    /// Budget accounting snapshot.
    pub fn budget_stats(&self) -> BudgetStats {
        self.budget.stats()
    }

    /// Current accounting state of the budget.
    pub fn budget(&self) -> &MediaBudget {
        &self.budget
    }

    /// Facade counters.
    pub fn stats(&self) -> FacadeStats {
        FacadeStats {
            textures_resident: self.textures.len(),
            evictions: self.evictions,
            stale_completions: self.stale_completions,
            failed_decodes: self.failed_decodes,
            zero_copy_imports: self.zero_copy_imports,
            cpu_imports: self.cpu_imports,
        }
    }

    /// Evict until `incoming` bytes fit within the budget, oldest and
    /// lowest-priority entries first. The budget is soft: when nothing is
    /// left to evict the allocation is admitted over the limit.
    fn make_room(&mut self, incoming: usize) {
        let candidates = self.budget.get_eviction_candidates(incoming);
        for (media_type, id) in candidates {
            self.evict(media_type, id);
        }

        if self.budget.current_usage() + incoming > self.budget.max_memory() {
            log::warn!(
                "media budget exceeded: {} resident + {} incoming > {} limit",
                self.budget.current_usage(),
                incoming,
                self.budget.max_memory()
            );
        }
    }

    fn evict(&mut self, media_type: MediaType, id: u32) {
        if self.textures.remove(&(media_type, id)).is_some() {
            self.evictions += 1;
            log::debug!("evicted {:?} {} from media cache", media_type, id);
        }
        self.budget.unregister(media_type, id);
        // An evicted image becomes indistinguishable from one that never
        // existed; a pending decode for it is discarded on arrival.
        if media_type == MediaType::Image {
            self.images.remove(id);
        }
    }
}
