use std::sync::Arc;

use bitflags::bitflags;

use crate::types::{Format, SampleCount};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const INDIRECT = 1 << 6;
        const TEXEL_VIEW = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

/// GL object name handed out by the backend. Instantiated lazily at replay,
/// so names are plain integers on the frontend side.
pub type GlName = u32;

#[derive(Debug, Clone)]
pub struct BufferCreateInfo {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug)]
pub struct Buffer {
    pub info: BufferCreateInfo,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.info.size
    }
}

#[derive(Debug)]
pub struct BufferView {
    pub buffer: Arc<Buffer>,
    pub format: Format,
    pub offset: u64,
    pub range: u64,
    pub(crate) device_id: u64,
}

#[derive(Debug, Clone)]
pub struct ImageCreateInfo {
    pub name: String,
    pub format: Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: SampleCount,
    pub usage: ImageUsage,
}

#[derive(Debug)]
pub struct Image {
    pub info: ImageCreateInfo,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

impl Image {
    /// Extent of one mip level, clamped at 1 per axis.
    pub fn mip_extent(&self, level: u32) -> [u32; 3] {
        let [w, h, d] = self.info.extent;
        [
            (w >> level).max(1),
            (h >> level).max(1),
            (d >> level).max(1),
        ]
    }
}

#[derive(Debug)]
pub struct ImageView {
    pub image: Arc<Image>,
    pub format: Format,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Default)]
pub struct SamplerCreateInfo {
    pub name: String,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub max_anisotropy: Option<f32>,
}

#[derive(Debug)]
pub struct Sampler {
    pub info: SamplerCreateInfo,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Occlusion,
    Timestamp,
}

#[derive(Debug)]
pub struct QueryPool {
    pub query_type: QueryType,
    pub query_count: u32,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

/// Opaque placeholder; acceleration structures only participate as descriptor
/// payloads here.
#[derive(Debug)]
pub struct AccelerationStructure {
    pub name: String,
    pub(crate) device_id: u64,
}

/// Range of a buffer, as consumed by descriptor writes and copies.
#[derive(Debug, Clone)]
pub struct BufferRange {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn whole(buffer: Arc<Buffer>) -> Self {
        let size = buffer.size();
        Self {
            buffer,
            offset: 0,
            size,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.size > 0
            && self
                .offset
                .checked_add(self.size)
                .map_or(false, |end| end <= self.buffer.size())
    }
}
