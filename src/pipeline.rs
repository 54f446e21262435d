use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use log::error;

use crate::descriptor_layout::DescriptorSetLayout;
use crate::renderpass::Renderpass;
use crate::resource::GlName;
use crate::shader::ShaderModule;
use crate::types::{SampleCount, ShaderStageFlags};
use crate::{Error, Result};

/// Set layouts plus push constant space, shared across pipelines.
#[derive(Debug)]
pub struct PipelineLayout {
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub push_constant_size: u32,
    pub(crate) device_id: u64,
}

/// One shader stage of a pipeline: which module, which entry point, and the
/// specialization constants to bake in.
#[derive(Debug, Clone)]
pub struct ShaderSpecInfo {
    pub module: Option<Arc<ShaderModule>>,
    pub stage: ShaderStageFlags,
    pub entry_point: String,
    /// constant id -> raw bytes
    pub spec_constants: HashMap<u32, Vec<u8>>,
}

impl ShaderSpecInfo {
    pub fn plain(module: Arc<ShaderModule>, stage: ShaderStageFlags, entry_point: &str) -> Self {
        Self {
            module: Some(module),
            stage,
            entry_point: entry_point.to_string(),
            spec_constants: HashMap::new(),
        }
    }
}

/// Checks one stage can actually be instantiated: module present and
/// non-empty, entry point declared for the right stage, no empty
/// specialization payloads.
pub(crate) fn validate_spec_info(spec: &ShaderSpecInfo) -> Result<()> {
    let Some(module) = &spec.module else {
        error!("shader stage {:?} has no module", spec.stage);
        return Err(Error::InvalidParameters);
    };
    if module.spirv.is_empty() {
        error!("shader module {:?} is empty", module.path_hint);
        return Err(Error::InvalidParameters);
    }
    if !module.declares(&spec.entry_point, spec.stage) {
        error!(
            "module {:?} does not declare entry point {:?} for stage {:?}",
            module.path_hint, spec.entry_point, spec.stage
        );
        return Err(Error::InvalidParameters);
    }
    for (&id, bytes) in &spec.spec_constants {
        if bytes.is_empty() {
            error!("specialization constant {id} has no data");
            return Err(Error::InvalidParameters);
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ComputePipelineCreateInfo {
    pub layout: Arc<PipelineLayout>,
    pub shader: ShaderSpecInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
    PatchList,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterizationState {
    pub topology: PrimitiveTopology,
    pub alpha_to_one: bool,
    pub depth_bounds_test: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

/// Per color slot blend toggle; full blend equations stay backend-side.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentBlend {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineCreateInfo {
    pub layout: Arc<PipelineLayout>,
    pub shaders: Vec<ShaderSpecInfo>,
    pub renderpass: Arc<Renderpass>,
    pub subpass: u32,
    pub rasterization_samples: SampleCount,
    pub raster: RasterizationState,
    /// Parallel to the subpass color attachment slots.
    pub blend: Vec<AttachmentBlend>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RayTracingPipelineFlags: u32 {
        const SKIP_AABBS = 1 << 0;
        const SKIP_BUILT_IN_PRIMITIVES = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub struct RayTracingPipelineCreateInfo {
    pub layout: Arc<PipelineLayout>,
    pub shaders: Vec<ShaderSpecInfo>,
    pub flags: RayTracingPipelineFlags,
    pub max_recursion_depth: u32,
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub layout: Arc<PipelineLayout>,
    pub shader_module: Arc<ShaderModule>,
    pub entry_point: String,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

#[derive(Debug)]
pub struct GraphicsPipeline {
    pub layout: Arc<PipelineLayout>,
    pub renderpass: Arc<Renderpass>,
    pub subpass: u32,
    pub shader_modules: Vec<Arc<ShaderModule>>,
    pub(crate) gl_name: GlName,
    pub(crate) device_id: u64,
}

#[derive(Debug)]
pub struct RayTracingPipeline {
    pub layout: Arc<PipelineLayout>,
    pub shader_modules: Vec<Arc<ShaderModule>>,
    pub flags: RayTracingPipelineFlags,
    pub max_recursion_depth: u32,
    pub(crate) device_id: u64,
}

/// Opaque blob a driver may use to skip recompiles. This layer only stores
/// and merges the bytes.
#[derive(Debug, Default)]
pub struct PipelineCache {
    data: Mutex<Vec<u8>>,
    pub(crate) device_id: u64,
}

impl PipelineCache {
    pub(crate) fn new(initial_data: Vec<u8>, device_id: u64) -> Self {
        Self {
            data: Mutex::new(initial_data),
            device_id,
        }
    }

    pub fn data(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn merge(&self, others: &[&PipelineCache]) {
        let mut data = self.data.lock().unwrap();
        for other in others {
            data.extend_from_slice(&other.data.lock().unwrap());
        }
    }
}
