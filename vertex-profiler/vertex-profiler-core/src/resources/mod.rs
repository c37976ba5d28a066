//! Pooled GPU resources keyed by name. A resource is reallocated only when the
//! requested shape (size/usage, or extent/format/usage) differs from the pooled one.

use std::collections::HashMap;

use crate::error::{ProfilerError, ProfilerResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSignature {
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSignature {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureSignature {
    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 }
    }
}

/// True when nothing is pooled under the name yet or its signature differs.
pub fn needs_realloc<S: PartialEq>(existing: Option<&S>, wanted: &S) -> bool {
    existing != Some(wanted)
}

pub struct PooledTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub signature: TextureSignature,
}

#[derive(Default)]
pub struct ResourcePool {
    buffers: HashMap<&'static str, (BufferSignature, wgpu::Buffer)>,
    textures: HashMap<&'static str, PooledTexture>,
    allocations: u64,
}

impl ResourcePool {
    /// Returns true when a new buffer was created. Contents are undefined after reallocation.
    pub fn ensure_buffer(&mut self, device: &wgpu::Device, name: &'static str, signature: BufferSignature) -> bool {
        if !needs_realloc(self.buffers.get(name).map(|(s, _)| s), &signature) {
            return false;
        }
        log::debug!("pool: allocating buffer `{}` ({} bytes, {:?})", name, signature.size, signature.usage);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: signature.size,
            usage: signature.usage,
            mapped_at_creation: false,
        });
        self.buffers.insert(name, (signature, buffer));
        self.allocations += 1;
        true
    }

    pub fn ensure_texture(&mut self, device: &wgpu::Device, name: &'static str, signature: TextureSignature) -> bool {
        if !needs_realloc(self.textures.get(name).map(|t| &t.signature), &signature) {
            return false;
        }
        log::debug!(
            "pool: allocating texture `{}` ({}x{} {:?})",
            name,
            signature.width,
            signature.height,
            signature.format
        );
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: signature.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: signature.format,
            usage: signature.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        self.textures.insert(name, PooledTexture { texture, view, signature });
        self.allocations += 1;
        true
    }

    pub fn buffer(&self, name: &'static str) -> ProfilerResult<&wgpu::Buffer> {
        self.buffers.get(name).map(|(_, b)| b).ok_or(ProfilerError::MissingResource(name))
    }

    pub fn texture(&self, name: &'static str) -> ProfilerResult<&PooledTexture> {
        self.textures.get(name).ok_or(ProfilerError::MissingResource(name))
    }

    pub fn view(&self, name: &'static str) -> ProfilerResult<&wgpu::TextureView> {
        self.texture(name).map(|t| &t.view)
    }

    /// Total allocations made since creation.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(size: u64) -> BufferSignature {
        BufferSignature { size, usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC }
    }

    #[test]
    fn realloc_only_on_signature_change() {
        assert!(needs_realloc(None, &counters(880)));
        assert!(!needs_realloc(Some(&counters(880)), &counters(880)));
        assert!(needs_realloc(Some(&counters(880)), &counters(884)));
        let other_usage = BufferSignature { size: 880, usage: wgpu::BufferUsages::STORAGE };
        assert!(needs_realloc(Some(&counters(880)), &other_usage));
    }

    #[test]
    fn texture_signature_includes_format() {
        let color = TextureSignature {
            width: 1920,
            height: 1080,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
        };
        let ids = TextureSignature { format: wgpu::TextureFormat::Rg32Uint, ..color };
        assert!(!needs_realloc(Some(&color), &color));
        assert!(needs_realloc(Some(&color), &ids));
        assert_eq!(color.extent().depth_or_array_layers, 1);
    }

    #[test]
    fn missing_resource_is_an_error() {
        let pool = ResourcePool::default();
        assert!(matches!(pool.buffer("tile_counts"), Err(ProfilerError::MissingResource("tile_counts"))));
        assert_eq!(pool.allocations(), 0);
    }
}
