use std::sync::atomic::{AtomicU32, Ordering};

use crate::descriptor_layout::Binding;
use crate::gl_context::{GlContext, RecordingContext};
use crate::pipeline::{
    ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, RayTracingPipelineCreateInfo,
};
use crate::renderpass::{RenderpassCreateInfo, ValidatedRenderpass};
use crate::resource::{
    BufferCreateInfo, GlName, ImageCreateInfo, QueryType, SamplerCreateInfo,
};
use crate::Result;

/// Descriptor batch sizes per payload category, computed during validation so
/// a backend can reserve its own structures before applying anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorBatchCounts {
    pub buffers: u32,
    pub images: u32,
    pub buffer_views: u32,
    pub acceleration_structures: u32,
}

/// Driver half of the device. The public device API validates against
/// features and limits, then calls in here; implementations trust their
/// arguments. Creation returns frontend-visible names; the driver objects
/// behind them materialize lazily at replay.
pub trait DeviceBackend: Send + Sync {
    fn create_buffer_impl(&self, info: &BufferCreateInfo) -> GlName;
    fn create_image_impl(&self, info: &ImageCreateInfo) -> GlName;
    fn create_image_view_impl(&self, image: GlName) -> GlName;
    fn create_sampler_impl(&self, info: &SamplerCreateInfo) -> GlName;
    fn create_query_pool_impl(&self, query_type: QueryType, query_count: u32) -> GlName;

    /// `immutable_sampler_count` is the accumulated total so the backend can
    /// size its sampler table up front.
    fn create_descriptor_set_layout_impl(
        &self,
        bindings: &[Binding],
        immutable_sampler_count: u32,
    ) -> Result<()>;

    /// `validated` comes straight from the frontend validation pass; the
    /// backend must not re-derive it.
    fn create_renderpass_impl(
        &self,
        info: &RenderpassCreateInfo,
        validated: &ValidatedRenderpass,
    ) -> Result<()>;

    /// One call per update batch, after every write and copy has been
    /// validated and applied frontend-side.
    fn update_descriptor_sets_impl(&self, counts: &DescriptorBatchCounts);

    /// Per-entry result; `None` leaves the caller's output slot empty.
    fn create_compute_pipeline_impl(&self, info: &ComputePipelineCreateInfo) -> Option<GlName>;
    fn create_graphics_pipeline_impl(&self, info: &GraphicsPipelineCreateInfo) -> Option<GlName>;
    fn create_ray_tracing_pipeline_impl(&self, info: &RayTracingPipelineCreateInfo) -> Option<()>;

    fn create_context(&self, queue_family_index: u32, queue_index: u32)
        -> Box<dyn GlContext + Send>;
}

/// Software GL-style backend: names are handed out from monotone counters and
/// every queue gets a call-recording context. Doubles as the headless backend
/// for tests.
#[derive(Debug, Default)]
pub struct GlBackend {
    next_buffer: AtomicU32,
    next_image: AtomicU32,
    next_view: AtomicU32,
    next_sampler: AtomicU32,
    next_query_pool: AtomicU32,
    next_program: AtomicU32,
}

impl GlBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(counter: &AtomicU32) -> GlName {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl DeviceBackend for GlBackend {
    fn create_buffer_impl(&self, _info: &BufferCreateInfo) -> GlName {
        Self::next(&self.next_buffer)
    }

    fn create_image_impl(&self, _info: &ImageCreateInfo) -> GlName {
        Self::next(&self.next_image)
    }

    fn create_image_view_impl(&self, _image: GlName) -> GlName {
        Self::next(&self.next_view)
    }

    fn create_sampler_impl(&self, _info: &SamplerCreateInfo) -> GlName {
        Self::next(&self.next_sampler)
    }

    fn create_query_pool_impl(&self, _query_type: QueryType, _query_count: u32) -> GlName {
        Self::next(&self.next_query_pool)
    }

    fn create_descriptor_set_layout_impl(
        &self,
        _bindings: &[Binding],
        _immutable_sampler_count: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn create_renderpass_impl(
        &self,
        _info: &RenderpassCreateInfo,
        _validated: &ValidatedRenderpass,
    ) -> Result<()> {
        Ok(())
    }

    fn update_descriptor_sets_impl(&self, _counts: &DescriptorBatchCounts) {}

    fn create_compute_pipeline_impl(&self, info: &ComputePipelineCreateInfo) -> Option<GlName> {
        let module = info.shader.module.as_ref()?;
        if module.spirv.is_empty() {
            return None;
        }
        Some(Self::next(&self.next_program))
    }

    fn create_graphics_pipeline_impl(&self, info: &GraphicsPipelineCreateInfo) -> Option<GlName> {
        if info
            .shaders
            .iter()
            .any(|s| s.module.as_ref().map_or(true, |m| m.spirv.is_empty()))
        {
            return None;
        }
        Some(Self::next(&self.next_program))
    }

    fn create_ray_tracing_pipeline_impl(
        &self,
        info: &RayTracingPipelineCreateInfo,
    ) -> Option<()> {
        if info
            .shaders
            .iter()
            .any(|s| s.module.as_ref().map_or(true, |m| m.spirv.is_empty()))
        {
            return None;
        }
        Some(())
    }

    fn create_context(
        &self,
        _queue_family_index: u32,
        _queue_index: u32,
    ) -> Box<dyn GlContext + Send> {
        Box::new(RecordingContext::new())
    }
}
