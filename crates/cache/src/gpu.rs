//! GPU context abstraction and the wgpu implementation.
//!
//! [`GpuContext`] is the seam between the cache and the platform: the
//! facade drives texture creation through it, and tests substitute a mock.
//! [`WgpuContext`] is the production implementation over a `wgpu` device
//! and queue; the zero-copy import itself is platform-specific and plugs
//! in behind the [`ZeroCopyImporter`] trait (on Linux that would be a
//! Vulkan external-memory/DMA-BUF importer; without one installed every
//! cross-device buffer takes the CPU copy path).

use crate::error::ImportError;
use crate::external::{CrossDeviceBuffer, ImportOutcome};

/// Platform seam for texture creation.
///
/// Exactly one thread (the facade owner) calls these methods; GPU resource
/// creation and destruction never happens anywhere else.
pub trait GpuContext {
    /// Whatever the renderer draws with: for wgpu this bundles texture,
    /// view and bind group. Dropping it releases the GPU memory.
    type Texture;

    /// Upload tightly packed RGBA8 pixels as a new texture.
    fn upload_rgba(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self::Texture, ImportError>;

    /// Attempt to alias a cross-device buffer without copying.
    ///
    /// The default implementation is the capability gate for platforms
    /// with no importer: always [`ImportOutcome::Unsupported`].
    fn import_zero_copy(&mut self, buffer: &CrossDeviceBuffer) -> ImportOutcome<Self::Texture> {
        let _ = buffer;
        ImportOutcome::Unsupported
    }
}

/// Platform-supplied zero-copy import implementation.
///
/// Implementations wrap the platform's external-memory mechanism (e.g.
/// `VK_EXT_external_memory_dma_buf` through wgpu-hal) and are installed on
/// the [`WgpuContext`] at startup. `supports` is the cheap layout check;
/// `import` may still fail at the driver level, which sends the buffer
/// down the CPU path.
pub trait ZeroCopyImporter: Send {
    /// Whether this importer recognizes the buffer's plane layout and
    /// format modifier.
    fn supports(&self, buffer: &CrossDeviceBuffer) -> bool;

    /// Build a texture set aliasing the buffer memory.
    fn import(
        &mut self,
        device: &wgpu::Device,
        buffer: &CrossDeviceBuffer,
    ) -> ImportOutcome<GpuTextureSet>;
}

/// Texture, view and bind group as consumed by the renderer each frame.
pub struct GpuTextureSet {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
}

/// Production GPU context over a wgpu device and queue.
///
/// All media textures share one bind group layout and sampler so image,
/// video and web-surface quads render through the same pipeline.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    zero_copy: Option<Box<dyn ZeroCopyImporter>>,
}

impl WgpuContext {
    /// Create a context; the renderer pipeline binds media textures with
    /// the layout exposed by [`WgpuContext::bind_group_layout`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Media Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Media Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            bind_group_layout,
            sampler,
            zero_copy: None,
        }
    }

    /// Install the platform's zero-copy importer.
    pub fn with_zero_copy(mut self, importer: Box<dyn ZeroCopyImporter>) -> Self {
        self.zero_copy = Some(importer);
        self
    }

    /// Layout the renderer pipeline must use for media bind groups.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    fn make_bind_group(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Media Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

impl GpuContext for WgpuContext {
    type Texture = GpuTextureSet;

    fn upload_rgba(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self::Texture, ImportError> {
        if width == 0 || height == 0 {
            return Err(ImportError::ZeroDimension);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() < expected {
            return Err(ImportError::TruncatedPixels {
                got: pixels.len(),
                needed: expected,
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Media Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels[..expected],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.make_bind_group(&view);

        Ok(GpuTextureSet {
            texture,
            view,
            bind_group,
        })
    }

    fn import_zero_copy(&mut self, buffer: &CrossDeviceBuffer) -> ImportOutcome<Self::Texture> {
        match &mut self.zero_copy {
            Some(importer) if importer.supports(buffer) => importer.import(&self.device, buffer),
            _ => ImportOutcome::Unsupported,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! Mock GPU context shared by the crate's tests.

    use super::*;

    /// One recorded CPU upload.
    pub struct Upload {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u8>,
    }

    /// Mock context: textures are just sequence numbers, uploads are
    /// recorded for inspection.
    #[derive(Default)]
    pub struct MockGpu {
        pub uploads: Vec<Upload>,
        pub zero_copy_supported: bool,
        pub fail_uploads: bool,
        pub next_texture: u32,
    }

    impl MockGpu {
        pub fn with_zero_copy() -> Self {
            Self {
                zero_copy_supported: true,
                ..Self::default()
            }
        }
    }

    impl GpuContext for MockGpu {
        type Texture = u32;

        fn upload_rgba(
            &mut self,
            width: u32,
            height: u32,
            pixels: &[u8],
        ) -> Result<Self::Texture, ImportError> {
            if self.fail_uploads {
                return Err(ImportError::TextureCreation("mock upload failure".into()));
            }
            if width == 0 || height == 0 {
                return Err(ImportError::ZeroDimension);
            }
            let expected = width as usize * height as usize * 4;
            if pixels.len() < expected {
                return Err(ImportError::TruncatedPixels {
                    got: pixels.len(),
                    needed: expected,
                });
            }
            self.uploads.push(Upload {
                width,
                height,
                pixels: pixels.to_vec(),
            });
            self.next_texture += 1;
            Ok(self.next_texture)
        }

        fn import_zero_copy(
            &mut self,
            _buffer: &CrossDeviceBuffer,
        ) -> ImportOutcome<Self::Texture> {
            if self.zero_copy_supported {
                self.next_texture += 1;
                ImportOutcome::Imported(self.next_texture)
            } else {
                ImportOutcome::Unsupported
            }
        }
    }
}
