use std::collections::HashMap;

use crate::types::{Format, QueueFlags, ResolveModeFlags};

/// Static properties of one queue family, as reported by the driver.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyProperties {
    pub queue_flags: QueueFlags,
    pub queue_count: u32,
    pub min_image_transfer_granularity: [u32; 3],
}

impl Default for QueueFamilyProperties {
    fn default() -> Self {
        Self {
            queue_flags: QueueFlags::empty(),
            queue_count: 0,
            min_image_transfer_granularity: [1, 1, 1],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub max_color_attachments: u32,
    pub max_multiview_view_count: u32,
    pub max_descriptor_set_dynamic_offset_ubos: u32,
    pub max_descriptor_set_dynamic_offset_ssbos: u32,
    pub max_ray_recursion_depth: u32,
    pub supported_depth_resolve_modes: ResolveModeFlags,
    pub supported_stencil_resolve_modes: ResolveModeFlags,
    pub optimal_buffer_copy_row_pitch_alignment: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_multiview_view_count: 6,
            max_descriptor_set_dynamic_offset_ubos: 8,
            max_descriptor_set_dynamic_offset_ssbos: 4,
            max_ray_recursion_depth: 1,
            supported_depth_resolve_modes: ResolveModeFlags::SAMPLE_ZERO | ResolveModeFlags::AVERAGE,
            supported_stencil_resolve_modes: ResolveModeFlags::SAMPLE_ZERO,
            optimal_buffer_copy_row_pitch_alignment: 4,
        }
    }
}

/// Optional capabilities; a device creation request names the subset to enable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub alpha_to_one: bool,
    pub depth_bounds: bool,
    pub mixed_attachment_samples: bool,
    pub conditional_rendering: bool,
    pub acceleration_structure: bool,
    pub ray_tracing_pipeline: bool,
    pub ray_traversal_primitive_culling: bool,
}

/// What one format can be used for with optimal tiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatUsage {
    pub sampled: bool,
    pub storage: bool,
    pub attachment: bool,
    pub attachment_blend: bool,
    pub buffer_view: bool,
    pub transfer: bool,
}

/// Immutable descriptor of one physical GPU. Queried by the logical device,
/// never mutated.
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub name: String,
    pub queue_families: Vec<QueueFamilyProperties>,
    pub limits: DeviceLimits,
    pub supported_features: DeviceFeatures,
    pub optimal_tiling_usages: HashMap<Format, FormatUsage>,
}

impl PhysicalDevice {
    /// Usage table lookup; unknown formats support nothing.
    pub fn optimal_tiling_usage(&self, format: Format) -> FormatUsage {
        self.optimal_tiling_usages
            .get(&format)
            .copied()
            .unwrap_or_default()
    }

    pub fn queue_family_properties(&self, family_index: u32) -> Option<&QueueFamilyProperties> {
        self.queue_families.get(family_index as usize)
    }

    /// A plausible desktop GPU descriptor: one universal family, one async
    /// compute family, one transfer-only family. Handy default for tests and
    /// software rendering setups.
    pub fn reference_descriptor() -> Self {
        let color = FormatUsage {
            sampled: true,
            storage: true,
            attachment: true,
            attachment_blend: true,
            buffer_view: true,
            transfer: true,
        };
        let depth = FormatUsage {
            sampled: true,
            attachment: true,
            transfer: true,
            ..Default::default()
        };
        let mut optimal_tiling_usages = HashMap::new();
        for format in [
            Format::R8Unorm,
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8Srgb,
            Format::B8G8R8A8Srgb,
            Format::R16G16B16A16Sfloat,
            Format::R32Uint,
            Format::R32Sfloat,
            Format::R32G32B32A32Sfloat,
        ] {
            optimal_tiling_usages.insert(format, color);
        }
        for format in [
            Format::D16Unorm,
            Format::D32Sfloat,
            Format::D24UnormS8Uint,
            Format::D32SfloatS8Uint,
            Format::S8Uint,
        ] {
            optimal_tiling_usages.insert(format, depth);
        }

        Self {
            name: "tethys reference".to_string(),
            queue_families: vec![
                QueueFamilyProperties {
                    queue_flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 1,
                    min_image_transfer_granularity: [1, 1, 1],
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 2,
                    min_image_transfer_granularity: [1, 1, 1],
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::TRANSFER,
                    queue_count: 1,
                    min_image_transfer_granularity: [8, 8, 1],
                },
            ],
            limits: DeviceLimits::default(),
            supported_features: DeviceFeatures {
                geometry_shader: true,
                tessellation_shader: true,
                alpha_to_one: true,
                depth_bounds: true,
                ..Default::default()
            },
            optimal_tiling_usages,
        }
    }
}
