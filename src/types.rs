use bitflags::bitflags;

bitflags! {
    /// Capabilities of a queue family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

bitflags! {
    /// Pipeline execution stages, Vulkan `synchronization2` style.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStageFlags: u32 {
        const HOST = 1 << 0;

        const COPY = 1 << 1;
        const CLEAR = 1 << 2;
        const RESOLVE = 1 << 3;
        const BLIT = 1 << 4;

        const DISPATCH_INDIRECT_COMMAND = 1 << 5;
        const COMPUTE_SHADER = 1 << 6;

        const INDEX_INPUT = 1 << 7;
        const VERTEX_ATTRIBUTE_INPUT = 1 << 8;
        const VERTEX_SHADER = 1 << 9;
        const TESSELLATION_CONTROL_SHADER = 1 << 10;
        const TESSELLATION_EVALUATION_SHADER = 1 << 11;
        const GEOMETRY_SHADER = 1 << 12;
        const FRAGMENT_SHADER = 1 << 13;
        const EARLY_FRAGMENT_TESTS = 1 << 14;
        const LATE_FRAGMENT_TESTS = 1 << 15;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 16;

        const ACCELERATION_STRUCTURE_BUILD = 1 << 17;
        const ACCELERATION_STRUCTURE_COPY = 1 << 18;
        const RAY_TRACING_SHADER = 1 << 19;

        const CONDITIONAL_RENDERING = 1 << 20;

        // umbrella values, satisfiable by any sufficiently capable family
        const ALL_TRANSFER_BITS = Self::COPY.bits()
            | Self::CLEAR.bits()
            | Self::RESOLVE.bits()
            | Self::BLIT.bits();
        const VERTEX_INPUT_BITS = Self::INDEX_INPUT.bits() | Self::VERTEX_ATTRIBUTE_INPUT.bits();
        const PRE_RASTERIZATION_SHADERS_BITS = Self::VERTEX_SHADER.bits()
            | Self::TESSELLATION_CONTROL_SHADER.bits()
            | Self::TESSELLATION_EVALUATION_SHADER.bits()
            | Self::GEOMETRY_SHADER.bits();
        const FRAMEBUFFER_SPACE_BITS = Self::FRAGMENT_SHADER.bits()
            | Self::EARLY_FRAGMENT_TESTS.bits()
            | Self::LATE_FRAGMENT_TESTS.bits()
            | Self::COLOR_ATTACHMENT_OUTPUT.bits();
        const ALL_GRAPHICS_BITS = Self::ALL_TRANSFER_BITS.bits()
            | Self::VERTEX_INPUT_BITS.bits()
            | Self::PRE_RASTERIZATION_SHADERS_BITS.bits()
            | Self::FRAMEBUFFER_SPACE_BITS.bits()
            | Self::DISPATCH_INDIRECT_COMMAND.bits();
        const ALL_COMMANDS_BITS = !Self::HOST.bits() & 0x1f_ffff;
    }
}

bitflags! {
    /// Memory access kinds paired with [`PipelineStageFlags`] in barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const HOST_READ = 1 << 0;
        const HOST_WRITE = 1 << 1;

        const TRANSFER_READ = 1 << 2;
        const TRANSFER_WRITE = 1 << 3;

        const INDIRECT_COMMAND_READ = 1 << 4;
        const UNIFORM_READ = 1 << 5;
        const SAMPLED_READ = 1 << 6;
        const STORAGE_READ = 1 << 7;
        const STORAGE_WRITE = 1 << 8;

        const INDEX_READ = 1 << 9;
        const VERTEX_ATTRIBUTE_READ = 1 << 10;
        const INPUT_ATTACHMENT_READ = 1 << 11;
        const COLOR_ATTACHMENT_READ = 1 << 12;
        const COLOR_ATTACHMENT_WRITE = 1 << 13;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 14;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 15;

        const ACCELERATION_STRUCTURE_READ = 1 << 16;
        const ACCELERATION_STRUCTURE_WRITE = 1 << 17;
        const SHADER_BINDING_TABLE_READ = 1 << 18;
        const CONDITIONAL_RENDERING_READ = 1 << 19;

        const SHADER_READ_BITS = Self::UNIFORM_READ.bits()
            | Self::SAMPLED_READ.bits()
            | Self::STORAGE_READ.bits();
        const SHADER_WRITE_BITS = Self::STORAGE_WRITE.bits();
        const MEMORY_READ_BITS = Self::HOST_READ.bits()
            | Self::TRANSFER_READ.bits()
            | Self::INDIRECT_COMMAND_READ.bits()
            | Self::SHADER_READ_BITS.bits()
            | Self::INDEX_READ.bits()
            | Self::VERTEX_ATTRIBUTE_READ.bits()
            | Self::INPUT_ATTACHMENT_READ.bits()
            | Self::COLOR_ATTACHMENT_READ.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_READ.bits()
            | Self::ACCELERATION_STRUCTURE_READ.bits()
            | Self::SHADER_BINDING_TABLE_READ.bits()
            | Self::CONDITIONAL_RENDERING_READ.bits();
        const MEMORY_WRITE_BITS = Self::HOST_WRITE.bits()
            | Self::TRANSFER_WRITE.bits()
            | Self::STORAGE_WRITE.bits()
            | Self::COLOR_ATTACHMENT_WRITE.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
            | Self::ACCELERATION_STRUCTURE_WRITE.bits();
    }
}

bitflags! {
    /// Shader stages a descriptor binding or push range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const RAYGEN = 1 << 6;
        const ANY_HIT = 1 << 7;
        const CLOSEST_HIT = 1 << 8;
        const MISS = 1 << 9;
        const INTERSECTION = 1 << 10;
        const CALLABLE = 1 << 11;

        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESSELLATION_CONTROL.bits()
            | Self::TESSELLATION_EVALUATION.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits();
        const ALL = 0xfff;
    }
}

bitflags! {
    /// Depth/stencil resolve modes a device can support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResolveModeFlags: u32 {
        const SAMPLE_ZERO = 1 << 0;
        const AVERAGE = 1 << 1;
        const MIN = 1 << 2;
        const MAX = 1 << 3;
    }
}

/// Resolve mode selected by a subpass for one aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolveMode {
    #[default]
    None,
    SampleZero,
    Average,
    Min,
    Max,
}

impl ResolveMode {
    pub fn as_flag(self) -> ResolveModeFlags {
        match self {
            ResolveMode::None => ResolveModeFlags::empty(),
            ResolveMode::SampleZero => ResolveModeFlags::SAMPLE_ZERO,
            ResolveMode::Average => ResolveModeFlags::AVERAGE,
            ResolveMode::Min => ResolveModeFlags::MIN,
            ResolveMode::Max => ResolveModeFlags::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SampleCount {
    #[default]
    X1,
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
}

impl SampleCount {
    pub fn as_u32(self) -> u32 {
        match self {
            SampleCount::X1 => 1,
            SampleCount::X2 => 2,
            SampleCount::X4 => 4,
            SampleCount::X8 => 8,
            SampleCount::X16 => 16,
            SampleCount::X32 => 32,
            SampleCount::X64 => 64,
        }
    }
}

/// The texel formats the device layer validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Srgb,
    R16G16B16A16Sfloat,
    R32Uint,
    R32Sfloat,
    R32G32B32A32Sfloat,
    D16Unorm,
    D32Sfloat,
    D24UnormS8Uint,
    D32SfloatS8Uint,
    S8Uint,
}

impl Format {
    pub fn has_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::D32Sfloat
                | Format::D24UnormS8Uint
                | Format::D32SfloatS8Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint | Format::S8Uint
        )
    }

    pub fn is_depth_only(self) -> bool {
        self.has_depth() && !self.has_stencil()
    }

    pub fn is_stencil_only(self) -> bool {
        self.has_stencil() && !self.has_depth()
    }

    /// Bytes per texel block; block-compressed formats are not modeled.
    pub fn block_byte_size(self) -> u64 {
        match self {
            Format::R8Unorm | Format::S8Uint => 1,
            Format::D16Unorm => 2,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::B8G8R8A8Srgb
            | Format::R32Uint
            | Format::R32Sfloat
            | Format::D32Sfloat
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Sfloat | Format::D32SfloatS8Uint => 8,
            Format::R32G32B32A32Sfloat => 16,
        }
    }
}

/// A memory dependency between two sets of stages/accesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBarrier {
    pub src_stage_mask: PipelineStageFlags,
    pub src_access_mask: AccessFlags,
    pub dst_stage_mask: PipelineStageFlags,
    pub dst_access_mask: AccessFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    ColorF32([f32; 4]),
    ColorU32([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Index of the highest set bit, or `None` for zero.
pub(crate) fn find_msb(value: u32) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(31 - value.leading_zeros())
    }
}
