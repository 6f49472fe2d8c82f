//! External buffer types and the zero-copy-first import algorithm.
//!
//! Producers outside the image cache (video decoder, embedded web surface)
//! hand frames over as an [`ExternalBuffer`]: either a cross-device
//! shareable buffer (DMA-BUF style plane handles plus a DRM format
//! modifier) or a plain CPU-backed pixel buffer. [`import_texture`] turns
//! either kind into a GPU texture, preferring direct aliasing and falling
//! back to a CPU copy when the platform or the buffer layout rules that
//! out.

use crate::error::ImportError;
use crate::gpu::GpuContext;

/// Linear (untiled) DRM format modifier.
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;

/// Pixel formats accepted at the buffer boundary.
///
/// Everything is converted to RGBA8 before upload on the CPU path; the
/// zero-copy path aliases the buffer's native format directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, R,G,B,A order.
    Rgba8,
    /// 4 bytes per pixel, B,G,R,A order.
    Bgra8,
    /// 4 bytes per pixel, A,R,G,B order.
    Argb8,
    /// 3 bytes per pixel, R,G,B order, no alpha.
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Argb8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One memory plane of a cross-device buffer.
///
/// Multiple planes may share one handle at different offsets, or carry
/// separate handles, depending on the exporting driver.
#[derive(Debug, Clone, Copy)]
pub struct BufferPlane {
    /// Opaque platform handle for the plane's memory (a DMA-BUF fd on
    /// Linux).
    pub handle: u64,
    /// Byte offset of the plane within its memory object.
    pub offset: u64,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Plane size in bytes, 0 if unknown.
    pub size: u64,
}

/// A buffer allocated so a GPU context can alias it without a CPU copy.
///
/// The producer that exported the buffer may attach a CPU-readable copy of
/// the bytes (GStreamer's `map_readable` view, for instance); that mapping
/// is what the copy-fallback path consumes when zero-copy import is not
/// possible.
#[derive(Debug)]
pub struct CrossDeviceBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// DRM format modifier describing the memory tiling.
    pub modifier: u64,
    pub planes: Vec<BufferPlane>,
    cpu_map: Option<Vec<u8>>,
}

impl CrossDeviceBuffer {
    /// Create a cross-device buffer from exported plane metadata.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        modifier: u64,
        planes: Vec<BufferPlane>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            modifier,
            planes,
            cpu_map: None,
        }
    }

    /// Attach a CPU-readable mapping of the buffer bytes for the fallback
    /// path.
    pub fn with_cpu_map(mut self, bytes: Vec<u8>) -> Self {
        self.cpu_map = Some(bytes);
        self
    }

    /// CPU-readable view of the buffer bytes, if the producer supplied one.
    pub fn map_readable(&self) -> Option<&[u8]> {
        self.cpu_map.as_deref()
    }

    /// The first plane, where single-plane formats keep their layout.
    pub fn primary_plane(&self) -> Option<&BufferPlane> {
        self.planes.first()
    }

    pub fn is_multi_plane(&self) -> bool {
        self.planes.len() > 1
    }
}

/// An ordinary CPU-owned pixel buffer.
#[derive(Debug, Clone)]
pub struct CpuBackedBuffer {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes; at least `width * bytes_per_pixel`.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl CpuBackedBuffer {
    /// Create a CPU-backed buffer, validating its declared geometry.
    pub fn new(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, ImportError> {
        if width == 0 || height == 0 {
            return Err(ImportError::ZeroDimension);
        }
        if data.is_empty() {
            return Err(ImportError::InvalidBuffer("empty pixel data"));
        }
        if (stride as usize) < width as usize * format.bytes_per_pixel() {
            return Err(ImportError::InvalidBuffer("stride smaller than a packed row"));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }
}

/// A frame handed over by an external producer.
#[derive(Debug)]
pub enum ExternalBuffer {
    CrossDevice(CrossDeviceBuffer),
    CpuBacked(CpuBackedBuffer),
}

impl ExternalBuffer {
    pub fn width(&self) -> u32 {
        match self {
            ExternalBuffer::CrossDevice(b) => b.width,
            ExternalBuffer::CpuBacked(b) => b.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            ExternalBuffer::CrossDevice(b) => b.height,
            ExternalBuffer::CpuBacked(b) => b.height,
        }
    }
}

/// Outcome of a capability-gated zero-copy import attempt.
#[derive(Debug)]
pub enum ImportOutcome<T> {
    /// The texture aliases the external memory; no bytes were copied.
    Imported(T),
    /// This platform/backend/layout combination cannot alias the buffer.
    /// Not an error; the caller falls back to the CPU path.
    Unsupported,
    /// The import was attempted and failed.
    Failed(String),
}

/// A texture produced by [`import_texture`].
#[derive(Debug)]
pub struct ImportedTexture<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
    /// Whether the zero-copy path succeeded (false means CPU copy).
    pub zero_copy: bool,
}

/// Import an external buffer as a GPU texture.
///
/// Tries direct aliasing first for cross-device buffers, then falls back
/// to mapping the bytes, converting to RGBA8 and uploading through a
/// standard texture write. Zero-copy failures are logged but never
/// propagated; only total failure of both paths returns an error.
pub fn import_texture<G: GpuContext>(
    gpu: &mut G,
    buffer: &ExternalBuffer,
) -> Result<ImportedTexture<G::Texture>, ImportError> {
    if buffer.width() == 0 || buffer.height() == 0 {
        return Err(ImportError::ZeroDimension);
    }

    if let ExternalBuffer::CrossDevice(cross) = buffer {
        match gpu.import_zero_copy(cross) {
            ImportOutcome::Imported(texture) => {
                log::debug!(
                    "zero-copy import {}x{} modifier {:#x}",
                    cross.width,
                    cross.height,
                    cross.modifier
                );
                return Ok(ImportedTexture {
                    texture,
                    width: cross.width,
                    height: cross.height,
                    zero_copy: true,
                });
            }
            ImportOutcome::Unsupported => {
                log::debug!("zero-copy import unsupported, using CPU copy path");
            }
            ImportOutcome::Failed(reason) => {
                log::warn!("zero-copy import failed ({}), using CPU copy path", reason);
            }
        }
    }

    // CPU fallback: map, convert, upload.
    let (data, width, height, stride, format) = match buffer {
        ExternalBuffer::CpuBacked(cpu) => (
            cpu.data.as_slice(),
            cpu.width,
            cpu.height,
            cpu.stride,
            cpu.format,
        ),
        ExternalBuffer::CrossDevice(cross) => {
            let mapped = cross.map_readable().ok_or(ImportError::MapUnavailable)?;
            let plane = cross.primary_plane();
            let offset = plane.map(|p| p.offset as usize).unwrap_or(0);
            let stride = plane
                .map(|p| p.stride)
                .filter(|&s| s > 0)
                .unwrap_or_else(|| {
                    cross.width.saturating_mul(cross.format.bytes_per_pixel() as u32)
                });
            if offset >= mapped.len() {
                return Err(ImportError::InvalidBuffer("plane offset beyond mapping"));
            }
            (
                &mapped[offset..],
                cross.width,
                cross.height,
                stride,
                cross.format,
            )
        }
    };

    let needed = width as usize * format.bytes_per_pixel();
    if data.len() < needed {
        return Err(ImportError::TruncatedPixels {
            got: data.len(),
            needed,
        });
    }

    let rgba = convert_to_rgba(data, width, height, stride, format);
    let texture = gpu.upload_rgba(width, height, &rgba)?;
    Ok(ImportedTexture {
        texture,
        width,
        height,
        zero_copy: false,
    })
}

/// Convert a strided pixel buffer of any supported format to tightly
/// packed RGBA8.
pub fn convert_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Vec<u8> {
    match format {
        PixelFormat::Rgba8 => repack_rgba(data, width, height, stride),
        PixelFormat::Bgra8 => swizzle_4(data, width, height, stride, [2, 1, 0, 3]),
        PixelFormat::Argb8 => swizzle_4(data, width, height, stride, [1, 2, 3, 0]),
        PixelFormat::Rgb8 => rgb24_to_rgba(data, width, height, stride),
    }
}

/// Reorder A,R,G,B bytes to R,G,B,A.
///
/// `stride` is the true row pitch and may exceed the packed width. Rows or
/// pixels whose source range would overrun the input are skipped; the
/// output is always exactly `width * height * 4` bytes.
pub fn argb32_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    swizzle_4(data, width, height, stride, [1, 2, 3, 0])
}

/// Expand R,G,B triples to R,G,B,255.
///
/// Same bounds policy as [`argb32_to_rgba`]: overrunning pixels are
/// skipped, never read.
pub fn rgb24_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let (w, h, stride) = (width as usize, height as usize, stride as usize);
    let mut out = vec![0u8; w * h * 4];
    for y in 0..h {
        let row = y * stride;
        for x in 0..w {
            let src = row + x * 3;
            if src + 3 > data.len() {
                continue;
            }
            let dst = (y * w + x) * 4;
            out[dst] = data[src];
            out[dst + 1] = data[src + 1];
            out[dst + 2] = data[src + 2];
            out[dst + 3] = 255;
        }
    }
    out
}

/// Copy 4-byte pixels applying a source byte order permutation.
fn swizzle_4(data: &[u8], width: u32, height: u32, stride: u32, order: [usize; 4]) -> Vec<u8> {
    let (w, h, stride) = (width as usize, height as usize, stride as usize);
    let mut out = vec![0u8; w * h * 4];
    for y in 0..h {
        let row = y * stride;
        for x in 0..w {
            let src = row + x * 4;
            if src + 4 > data.len() {
                continue;
            }
            let dst = (y * w + x) * 4;
            out[dst] = data[src + order[0]];
            out[dst + 1] = data[src + order[1]];
            out[dst + 2] = data[src + order[2]];
            out[dst + 3] = data[src + order[3]];
        }
    }
    out
}

/// Drop row padding from an RGBA buffer with stride > packed width.
fn repack_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let (w, h, stride) = (width as usize, height as usize, stride as usize);
    let mut out = vec![0u8; w * h * 4];
    for y in 0..h {
        let src = y * stride;
        if src + w * 4 > data.len() {
            continue;
        }
        out[y * w * 4..(y + 1) * w * 4].copy_from_slice(&data[src..src + w * 4]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::tests_support::MockGpu;

    #[test]
    fn test_argb32_reorders_bytes() {
        // One pixel: A=1, R=2, G=3, B=4.
        let rgba = argb32_to_rgba(&[1, 2, 3, 4], 1, 1, 4);
        assert_eq!(rgba, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_rgb24_expands_with_opaque_alpha() {
        // 2x1, stride 6, red then green.
        let rgba = rgb24_to_rgba(&[255, 0, 0, 0, 255, 0], 2, 1, 6);
        assert_eq!(rgba, vec![255, 0, 0, 255, 0, 255, 0, 255]);
    }

    #[test]
    fn test_conversion_respects_stride_padding() {
        // 1x2 ARGB with stride 8: each row is 4 payload bytes + 4 padding.
        let data = [
            10, 20, 30, 40, 0xEE, 0xEE, 0xEE, 0xEE, // row 0 + padding
            50, 60, 70, 80, // row 1, no trailing padding
        ];
        let rgba = argb32_to_rgba(&data, 1, 2, 8);
        assert_eq!(rgba, vec![20, 30, 40, 10, 60, 70, 80, 50]);
    }

    #[test]
    fn test_conversion_never_reads_past_input() {
        // Declared 2x2 but only the first row present: the second row is
        // skipped and left transparent, exact output size preserved.
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let rgba = argb32_to_rgba(&data, 2, 2, 8);
        assert_eq!(rgba.len(), 2 * 2 * 4);
        assert_eq!(&rgba[..8], &[2, 3, 4, 1, 6, 7, 8, 5]);
        assert_eq!(&rgba[8..], &[0u8; 8]);

        let rgba = rgb24_to_rgba(&[9, 9, 9], 2, 1, 6);
        assert_eq!(rgba.len(), 2 * 4);
        assert_eq!(&rgba[..4], &[9, 9, 9, 255]);
        assert_eq!(&rgba[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_rgba_repack_drops_padding() {
        let data = [1, 2, 3, 4, 0xAA, 0xAA, 0xAA, 0xAA, 5, 6, 7, 8];
        let rgba = convert_to_rgba(&data, 1, 2, 8, PixelFormat::Rgba8);
        assert_eq!(rgba, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_bgra_swizzle() {
        let rgba = convert_to_rgba(&[4, 3, 2, 1], 1, 1, 4, PixelFormat::Bgra8);
        assert_eq!(rgba, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_cpu_backed_buffer_validation() {
        assert!(matches!(
            CpuBackedBuffer::new(0, 1, 4, PixelFormat::Rgba8, vec![0; 4]),
            Err(ImportError::ZeroDimension)
        ));
        assert!(matches!(
            CpuBackedBuffer::new(1, 1, 4, PixelFormat::Rgba8, Vec::new()),
            Err(ImportError::InvalidBuffer(_))
        ));
        // Stride below one packed row.
        assert!(matches!(
            CpuBackedBuffer::new(2, 1, 4, PixelFormat::Rgba8, vec![0; 8]),
            Err(ImportError::InvalidBuffer(_))
        ));
        assert!(CpuBackedBuffer::new(1, 1, 4, PixelFormat::Rgba8, vec![0; 4]).is_ok());
    }

    #[test]
    fn test_import_cpu_backed_uses_copy_path() {
        let mut gpu = MockGpu::default();
        let buffer = ExternalBuffer::CpuBacked(
            CpuBackedBuffer::new(1, 1, 4, PixelFormat::Argb8, vec![1, 2, 3, 4]).unwrap(),
        );

        let imported = import_texture(&mut gpu, &buffer).expect("import");
        assert!(!imported.zero_copy);
        assert_eq!((imported.width, imported.height), (1, 1));
        assert_eq!(gpu.uploads[0].pixels, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_import_cross_device_falls_back_to_mapping() {
        let mut gpu = MockGpu::default(); // zero-copy unsupported
        let buffer = ExternalBuffer::CrossDevice(
            CrossDeviceBuffer::new(
                1,
                1,
                PixelFormat::Rgba8,
                DRM_FORMAT_MOD_LINEAR,
                vec![BufferPlane {
                    handle: 7,
                    offset: 0,
                    stride: 4,
                    size: 4,
                }],
            )
            .with_cpu_map(vec![1, 2, 3, 4]),
        );

        let imported = import_texture(&mut gpu, &buffer).expect("import");
        assert!(!imported.zero_copy);
        assert_eq!(gpu.uploads[0].pixels, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_import_cross_device_without_mapping_fails() {
        let mut gpu = MockGpu::default();
        let buffer = ExternalBuffer::CrossDevice(CrossDeviceBuffer::new(
            1,
            1,
            PixelFormat::Rgba8,
            DRM_FORMAT_MOD_LINEAR,
            vec![],
        ));

        assert!(matches!(
            import_texture(&mut gpu, &buffer),
            Err(ImportError::MapUnavailable)
        ));
        assert!(gpu.uploads.is_empty());
    }

    #[test]
    fn test_import_huge_width_does_not_overflow() {
        // A bogus giant width with no plane stride must come back as an
        // error, not overflow while deriving the packed row size.
        let mut gpu = MockGpu::default();
        let buffer = ExternalBuffer::CrossDevice(
            CrossDeviceBuffer::new(
                0x4000_0000,
                1,
                PixelFormat::Rgba8,
                DRM_FORMAT_MOD_LINEAR,
                vec![],
            )
            .with_cpu_map(vec![0; 16]),
        );

        assert!(matches!(
            import_texture(&mut gpu, &buffer),
            Err(ImportError::TruncatedPixels { .. })
        ));
        assert!(gpu.uploads.is_empty());
    }

    #[test]
    fn test_import_zero_copy_when_supported() {
        let mut gpu = MockGpu::with_zero_copy();
        let buffer = ExternalBuffer::CrossDevice(CrossDeviceBuffer::new(
            2,
            2,
            PixelFormat::Bgra8,
            DRM_FORMAT_MOD_LINEAR,
            vec![BufferPlane {
                handle: 3,
                offset: 0,
                stride: 8,
                size: 32,
            }],
        ));

        let imported = import_texture(&mut gpu, &buffer).expect("import");
        assert!(imported.zero_copy);
        assert!(gpu.uploads.is_empty());
    }

    #[test]
    fn test_import_rejects_zero_dimension() {
        let mut gpu = MockGpu::default();
        let buffer = ExternalBuffer::CrossDevice(CrossDeviceBuffer::new(
            0,
            4,
            PixelFormat::Rgba8,
            DRM_FORMAT_MOD_LINEAR,
            vec![],
        ));
        assert!(matches!(
            import_texture(&mut gpu, &buffer),
            Err(ImportError::ZeroDimension)
        ));
    }
}
