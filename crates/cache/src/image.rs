//! Asynchronous image cache.
//!
//! Load operations validate their input, allocate an id, record what is
//! known immediately (raw frames carry their dimensions, encoded images get
//! a cheap header probe) and hand the pixel work to the decode pool. The
//! caller polls [`ImageCache::state`] or drains the completion channel;
//! nothing here blocks on decoding.
//!
//! Ids are handed to scripting layers, so the API is fail-closed: input
//! that is invalid on its face (empty data, zero dimensions, undersized
//! stride) returns id 0, which no query ever resolves. A source that
//! merely fails to decode still gets an id; the failure stays queryable
//! as [`ImageState::Failed`].

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use medley_decode::{CompletionReceiver, PoolConfig, WorkerPool};

use crate::config::CacheConfig;
use crate::external;

/// Largest texture edge the cache will produce. Decoded images larger than
/// this are scaled down preserving aspect ratio.
pub const MAX_TEXTURE_SIZE: u32 = 4096;

/// Lifecycle of a cached image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// Queued or being decoded.
    Pending,
    /// Decoded and resident as a texture.
    Ready,
    /// Decode or upload failed; the reason is kept for queries.
    Failed(String),
}

/// Pixel dimensions of a cached image, as they will appear on screen
/// (after any constraint scaling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Where the pixels come from.
#[derive(Debug, Clone)]
enum ImageSource {
    File(PathBuf),
    Encoded(Vec<u8>),
    RawArgb32 {
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
    },
    RawRgb24 {
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
    },
}

/// One decode job for the worker pool.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub id: u32,
    source: ImageSource,
    max_width: Option<u32>,
    max_height: Option<u32>,
}

/// Tightly packed RGBA8 pixels produced by a decode.
#[derive(Debug, Clone)]
pub struct DecodedPixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Completion delivered over the decode channel.
///
/// Correlate by `id`, never by arrival order; the pool may complete jobs
/// out of order.
#[derive(Debug)]
pub struct DecodeResult {
    pub id: u32,
    pub outcome: Result<DecodedPixels, String>,
}

#[derive(Debug)]
struct ImageRecord {
    state: ImageState,
    dimensions: Option<ImageDimensions>,
}

/// Image records plus the decode pool feeding them.
///
/// The cache tracks states and dimensions; textures live with the facade,
/// which applies completions via [`ImageCache::mark_ready`] and
/// [`ImageCache::mark_failed`].
pub struct ImageCache {
    next_id: AtomicU32,
    records: HashMap<u32, ImageRecord>,
    pool: WorkerPool<DecodeRequest>,
}

impl ImageCache {
    /// Create the cache and spawn its decode pool.
    pub fn new(config: &CacheConfig) -> (Self, CompletionReceiver<DecodeResult>) {
        let pool_config = PoolConfig::new(config.decode_workers)
            .with_completion_capacity(config.completion_capacity);
        let (pool, completions) =
            WorkerPool::spawn(pool_config, Arc::new(|req| Some(run_decode(req))));

        (
            Self {
                // Id 0 is the invalid id; allocation starts at 1.
                next_id: AtomicU32::new(1),
                records: HashMap::new(),
                pool,
            },
            completions,
        )
    }

    /// Load an image from a file path. An unreadable or corrupt file still
    /// gets an id; its state resolves to [`ImageState::Failed`].
    pub fn load_file(&mut self, path: impl Into<PathBuf>) -> u32 {
        self.load_file_scaled(path, None, None)
    }

    /// Load an image from a file path, scaled down to fit the given bounds
    /// (aspect ratio preserved). `None` bounds mean unconstrained, up to
    /// [`MAX_TEXTURE_SIZE`].
    pub fn load_file_scaled(
        &mut self,
        path: impl Into<PathBuf>,
        max_width: Option<u32>,
        max_height: Option<u32>,
    ) -> u32 {
        let path = path.into();

        // Header-only probe so dimensions are queryable immediately. A
        // failed probe is not fatal: the record is enqueued with unknown
        // dimensions and the worker delivers the decode failure.
        let dimensions = match image::ImageReader::open(&path) {
            Ok(reader) => match reader.into_dimensions() {
                Ok((w, h)) => {
                    let (width, height) = constrain_dimensions(w, h, max_width, max_height);
                    Some(ImageDimensions { width, height })
                }
                Err(err) => {
                    log::debug!("image header probe failed for {:?}: {}", path, err);
                    None
                }
            },
            Err(err) => {
                log::debug!("cannot open image {:?}: {}", path, err);
                None
            }
        };

        self.enqueue(ImageSource::File(path), dimensions, max_width, max_height)
    }

    /// Load an image from encoded bytes (PNG, JPEG, anything the decoder
    /// recognizes). Returns 0 only for empty input; a corrupt container
    /// still gets an id whose state resolves to [`ImageState::Failed`].
    pub fn load_data(&mut self, data: Vec<u8>) -> u32 {
        if data.is_empty() {
            return 0;
        }

        let probe = image::ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .map_err(|e| e.to_string())
            .and_then(|r| r.into_dimensions().map_err(|e| e.to_string()));
        let dimensions = match probe {
            Ok((w, h)) => {
                let (width, height) = constrain_dimensions(w, h, None, None);
                Some(ImageDimensions { width, height })
            }
            Err(err) => {
                log::debug!("encoded image probe failed: {}", err);
                None
            }
        };

        self.enqueue(ImageSource::Encoded(data), dimensions, None, None)
    }

    /// Load a raw ARGB32 frame. `stride` is the row pitch in bytes.
    /// Returns 0 for zero dimensions, empty data or an undersized stride.
    pub fn load_raw_argb32(&mut self, data: Vec<u8>, width: u32, height: u32, stride: u32) -> u32 {
        if !valid_raw(&data, width, height, stride, 4) {
            return 0;
        }
        self.enqueue(
            ImageSource::RawArgb32 {
                data,
                width,
                height,
                stride,
            },
            Some(ImageDimensions { width, height }),
            None,
            None,
        )
    }

    /// Load a raw RGB24 frame. Alpha is filled with 255 during conversion.
    /// Returns 0 for zero dimensions, empty data or an undersized stride.
    pub fn load_raw_rgb24(&mut self, data: Vec<u8>, width: u32, height: u32, stride: u32) -> u32 {
        if !valid_raw(&data, width, height, stride, 3) {
            return 0;
        }
        self.enqueue(
            ImageSource::RawRgb24 {
                data,
                width,
                height,
                stride,
            },
            Some(ImageDimensions { width, height }),
            None,
            None,
        )
    }

    fn enqueue(
        &mut self,
        source: ImageSource,
        dimensions: Option<ImageDimensions>,
        max_width: Option<u32>,
        max_height: Option<u32>,
    ) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.insert(
            id,
            ImageRecord {
                state: ImageState::Pending,
                dimensions,
            },
        );

        let submitted = self.pool.submit(DecodeRequest {
            id,
            source,
            max_width,
            max_height,
        });
        if !submitted {
            // Pool is gone; only happens during teardown.
            if let Some(record) = self.records.get_mut(&id) {
                record.state = ImageState::Failed("decode pool unavailable".to_string());
            }
        }
        id
    }

    /// State of an image, `None` for unknown ids (including 0 and evicted
    /// entries).
    pub fn state(&self, id: u32) -> Option<ImageState> {
        self.records.get(&id).map(|r| r.state.clone())
    }

    /// Dimensions of an image if known. Raw frames and probed encoded
    /// images answer while still pending.
    pub fn dimensions(&self, id: u32) -> Option<ImageDimensions> {
        self.records.get(&id).and_then(|r| r.dimensions)
    }

    /// Whether this id has a record still awaiting its decode.
    pub fn is_pending(&self, id: u32) -> bool {
        matches!(
            self.records.get(&id),
            Some(ImageRecord {
                state: ImageState::Pending,
                ..
            })
        )
    }

    /// Record a successful decode and the final texture dimensions.
    pub fn mark_ready(&mut self, id: u32, dimensions: ImageDimensions) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = ImageState::Ready;
            record.dimensions = Some(dimensions);
        }
    }

    /// Record a failed decode with its reason.
    pub fn mark_failed(&mut self, id: u32, reason: String) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = ImageState::Failed(reason);
        }
    }

    /// Forget an image entirely. A removed id becomes indistinguishable
    /// from one that never existed; a decode still in flight for it will be
    /// discarded on arrival.
    pub fn remove(&mut self, id: u32) {
        self.records.remove(&id);
    }

    /// Forget all images. In-flight decodes are discarded on arrival.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of tracked images in any state.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// Widths near u32::MAX must not overflow the packed-row product.
fn valid_raw(data: &[u8], width: u32, height: u32, stride: u32, bpp: u32) -> bool {
    width != 0 && height != 0 && !data.is_empty() && stride as u64 >= width as u64 * bpp as u64
}

/// Scale `(width, height)` down to fit the optional bounds and the hard
/// [`MAX_TEXTURE_SIZE`] cap, preserving aspect ratio. A bound of zero
/// means unconstrained. Never scales up, and never returns a zero
/// dimension.
pub fn constrain_dimensions(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let max_w = max_width
        .filter(|&w| w > 0)
        .unwrap_or(MAX_TEXTURE_SIZE)
        .min(MAX_TEXTURE_SIZE);
    let max_h = max_height
        .filter(|&h| h > 0)
        .unwrap_or(MAX_TEXTURE_SIZE)
        .min(MAX_TEXTURE_SIZE);

    if width <= max_w && height <= max_h {
        return (width, height);
    }

    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    (w, h)
}

/// Execute one decode job on a worker thread.
///
/// Never panics: every failure is carried back as the `Err` reason so the
/// cache can expose it through [`ImageState::Failed`].
fn run_decode(request: DecodeRequest) -> DecodeResult {
    let DecodeRequest {
        id,
        source,
        max_width,
        max_height,
    } = request;

    let outcome = match source {
        ImageSource::File(path) => {
            decode_encoded(image::open(&path).map_err(|e| e.to_string()), max_width, max_height)
        }
        ImageSource::Encoded(data) => decode_encoded(
            image::load_from_memory(&data).map_err(|e| e.to_string()),
            max_width,
            max_height,
        ),
        ImageSource::RawArgb32 {
            data,
            width,
            height,
            stride,
        } => Ok(DecodedPixels {
            width,
            height,
            rgba: external::argb32_to_rgba(&data, width, height, stride),
        }),
        ImageSource::RawRgb24 {
            data,
            width,
            height,
            stride,
        } => Ok(DecodedPixels {
            width,
            height,
            rgba: external::rgb24_to_rgba(&data, width, height, stride),
        }),
    };

    if let Err(reason) = &outcome {
        log::warn!("image {} decode failed: {}", id, reason);
    }

    DecodeResult { id, outcome }
}

fn decode_encoded(
    decoded: Result<image::DynamicImage, String>,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> Result<DecodedPixels, String> {
    let img = decoded?;
    let (w, h) = (img.width(), img.height());
    let (tw, th) = constrain_dimensions(w, h, max_width, max_height);

    let img = if (tw, th) != (w, h) {
        img.resize_exact(tw, th, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgba = img.to_rgba8();
    Ok(DecodedPixels {
        width: tw,
        height: th,
        rgba: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn test_config() -> CacheConfig {
        CacheConfig::default().with_decode_workers(2)
    }

    /// Minimal 1x1 red PNG.
    fn tiny_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode test png");
        bytes
    }

    #[test]
    fn test_ids_are_distinct_across_load_kinds() {
        let (mut cache, _completions) = ImageCache::new(&test_config());

        let a = cache.load_data(tiny_png());
        let b = cache.load_raw_argb32(vec![0; 4], 1, 1, 4);
        let c = cache.load_raw_rgb24(vec![0; 3], 1, 1, 3);

        assert!(a > 0 && b > 0 && c > 0);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_inputs_return_zero() {
        let (mut cache, _completions) = ImageCache::new(&test_config());

        assert_eq!(cache.load_data(Vec::new()), 0);
        assert_eq!(cache.load_raw_argb32(Vec::new(), 1, 1, 4), 0);
        assert_eq!(cache.load_raw_argb32(vec![0; 4], 0, 1, 4), 0);
        assert_eq!(cache.load_raw_argb32(vec![0; 8], 2, 1, 4), 0); // stride < packed row
        assert_eq!(cache.load_raw_rgb24(vec![0; 3], 1, 1, 2), 0);
        // A giant declared width must be rejected, not overflow the
        // stride check.
        assert_eq!(cache.load_raw_argb32(vec![0; 4], 0x4000_0000, 1, 4), 0);
        assert_eq!(cache.load_raw_rgb24(vec![0; 4], u32::MAX, 1, u32::MAX), 0);

        // Id 0 never resolves.
        assert_eq!(cache.state(0), None);
        assert_eq!(cache.dimensions(0), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_source_gets_id_and_fails() {
        let (mut cache, completions) = ImageCache::new(&test_config());

        // Nonempty but undecodable bytes: the id is allocated, dimensions
        // stay unknown, and the worker reports the failure.
        let id = cache.load_data(vec![1, 2, 3]);
        assert!(id > 0);
        assert_eq!(cache.state(id), Some(ImageState::Pending));
        assert_eq!(cache.dimensions(id), None);

        let result = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("decode completion");
        assert_eq!(result.id, id);
        assert!(result.outcome.is_err());

        // Same for a file that cannot be opened.
        let id = cache.load_file("/nonexistent/image.png");
        assert!(id > 0);
        let result = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("decode completion");
        assert_eq!(result.id, id);
        assert!(result.outcome.is_err());
    }

    #[test]
    fn test_raw_dimensions_queryable_while_pending() {
        let (mut cache, _completions) = ImageCache::new(&test_config());

        let id = cache.load_raw_argb32(vec![0; 8 * 2 * 4], 8, 2, 32);
        assert_eq!(cache.state(id), Some(ImageState::Pending));
        assert_eq!(
            cache.dimensions(id),
            Some(ImageDimensions {
                width: 8,
                height: 2
            })
        );
    }

    #[test]
    fn test_file_decode_delivers_pixels() {
        let mut file = tempfile::NamedTempFile::with_suffix(".png").expect("temp file");
        file.write_all(&tiny_png()).expect("write png");

        let (mut cache, completions) = ImageCache::new(&test_config());
        let id = cache.load_file(file.path());
        assert!(id > 0);
        assert_eq!(
            cache.dimensions(id),
            Some(ImageDimensions {
                width: 1,
                height: 1
            })
        );

        let result = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("decode completion");
        assert_eq!(result.id, id);
        let pixels = result.outcome.expect("decode ok");
        assert_eq!((pixels.width, pixels.height), (1, 1));
        assert_eq!(pixels.rgba, vec![255, 0, 0, 255]);
    }

    #[test]
    fn test_raw_argb_decode_reorders() {
        let (mut cache, completions) = ImageCache::new(&test_config());
        let id = cache.load_raw_argb32(vec![1, 2, 3, 4], 1, 1, 4);

        let result = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("decode completion");
        assert_eq!(result.id, id);
        assert_eq!(result.outcome.unwrap().rgba, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_mark_and_remove() {
        let (mut cache, _completions) = ImageCache::new(&test_config());
        let id = cache.load_raw_rgb24(vec![0; 3], 1, 1, 3);

        cache.mark_ready(
            id,
            ImageDimensions {
                width: 1,
                height: 1,
            },
        );
        assert_eq!(cache.state(id), Some(ImageState::Ready));
        assert!(!cache.is_pending(id));

        cache.mark_failed(id, "late failure".to_string());
        assert_eq!(
            cache.state(id),
            Some(ImageState::Failed("late failure".to_string()))
        );

        cache.remove(id);
        assert_eq!(cache.state(id), None);
    }

    #[test]
    fn test_constrain_dimensions() {
        // Under the cap: unchanged.
        assert_eq!(constrain_dimensions(800, 600, None, None), (800, 600));
        // Over the cap: scaled to fit, aspect preserved.
        assert_eq!(constrain_dimensions(8192, 4096, None, None), (4096, 2048));
        // Explicit bounds.
        assert_eq!(
            constrain_dimensions(1000, 500, Some(100), None),
            (100, 50)
        );
        // Bounds never upscale.
        assert_eq!(
            constrain_dimensions(10, 10, Some(100), Some(100)),
            (10, 10)
        );
        // Zero bounds mean unconstrained.
        assert_eq!(
            constrain_dimensions(800, 600, Some(0), Some(0)),
            (800, 600)
        );
        // Extreme aspect ratios never collapse to zero.
        let (w, h) = constrain_dimensions(100_000, 1, None, None);
        assert!(w >= 1 && h >= 1);
    }
}
