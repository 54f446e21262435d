use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, info};

use crate::backend::{DescriptorBatchCounts, DeviceBackend};
use crate::command_buffer::CommandBuffer;
use crate::command_pool::CommandPool;
use crate::descriptor_layout::{
    check_dynamic_limits, check_update_after_bind_exclusion, check_variable_length_position,
    scan_bindings, Binding, DescriptorCategory, DescriptorSetLayout, DescriptorType,
};
use crate::descriptor_set::{
    process_copy, process_drop, process_write, validate_copy, validate_drop, validate_write,
    CopyDescriptorSet, DescriptorSet, DropDescriptors, WriteDescriptorSet,
};
use crate::framebuffer::Framebuffer;
use crate::physical_device::{DeviceFeatures, PhysicalDevice};
use crate::pipeline::{
    validate_spec_info, ComputePipeline, ComputePipelineCreateInfo, GraphicsPipeline,
    GraphicsPipelineCreateInfo, PipelineCache, PipelineLayout, RayTracingPipeline,
    RayTracingPipelineCreateInfo, RayTracingPipelineFlags, ShaderSpecInfo,
};
use crate::queue::Queue;
use crate::renderpass::{validate_creation_params, Renderpass, RenderpassCreateInfo};
use crate::resource::{
    Buffer, BufferCreateInfo, BufferUsage, BufferView, Image, ImageCreateInfo, ImageUsage,
    ImageView, QueryPool, QueryType, Sampler, SamplerCreateInfo,
};
use crate::shader::{
    EntryPoint, ShaderCompiler, ShaderCreateInfo, ShaderModule, ShaderSource, TrimTask,
};
use crate::types::{find_msb, AccessFlags, Format, MemoryBarrier, PipelineStageFlags, QueueFlags};
use crate::{Error, Result};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
pub struct QueueRequest {
    pub family_index: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceCreateInfo {
    pub features: DeviceFeatures,
    pub queues: Vec<QueueRequest>,
}

/// Stage/access support of one queue family, derived once at device creation
/// from the family capabilities and the enabled features.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueFamilySupport {
    pub stages: PipelineStageFlags,
    pub accesses: AccessFlags,
}

pub(crate) fn family_support(flags: QueueFlags, features: &DeviceFeatures) -> QueueFamilySupport {
    let mut stages = PipelineStageFlags::HOST;
    let mut accesses = AccessFlags::HOST_READ | AccessFlags::HOST_WRITE;

    if flags.intersects(QueueFlags::TRANSFER | QueueFlags::COMPUTE | QueueFlags::GRAPHICS) {
        stages |= PipelineStageFlags::COPY
            | PipelineStageFlags::CLEAR
            | PipelineStageFlags::RESOLVE
            | PipelineStageFlags::BLIT;
        accesses |= AccessFlags::TRANSFER_READ | AccessFlags::TRANSFER_WRITE;
    }
    if flags.contains(QueueFlags::COMPUTE) {
        stages |= PipelineStageFlags::DISPATCH_INDIRECT_COMMAND | PipelineStageFlags::COMPUTE_SHADER;
        accesses |= AccessFlags::INDIRECT_COMMAND_READ
            | AccessFlags::UNIFORM_READ
            | AccessFlags::SAMPLED_READ
            | AccessFlags::STORAGE_READ
            | AccessFlags::STORAGE_WRITE;
        if features.acceleration_structure {
            stages |= PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD
                | PipelineStageFlags::ACCELERATION_STRUCTURE_COPY;
            accesses |=
                AccessFlags::ACCELERATION_STRUCTURE_READ | AccessFlags::ACCELERATION_STRUCTURE_WRITE;
        }
        if features.ray_tracing_pipeline {
            stages |= PipelineStageFlags::RAY_TRACING_SHADER;
            accesses |= AccessFlags::SHADER_BINDING_TABLE_READ;
        }
    }
    if flags.contains(QueueFlags::GRAPHICS) {
        stages |= PipelineStageFlags::DISPATCH_INDIRECT_COMMAND
            | PipelineStageFlags::INDEX_INPUT
            | PipelineStageFlags::VERTEX_ATTRIBUTE_INPUT
            | PipelineStageFlags::VERTEX_SHADER
            | PipelineStageFlags::FRAGMENT_SHADER
            | PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | PipelineStageFlags::LATE_FRAGMENT_TESTS
            | PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        accesses |= AccessFlags::INDIRECT_COMMAND_READ
            | AccessFlags::UNIFORM_READ
            | AccessFlags::SAMPLED_READ
            | AccessFlags::STORAGE_READ
            | AccessFlags::STORAGE_WRITE
            | AccessFlags::INDEX_READ
            | AccessFlags::VERTEX_ATTRIBUTE_READ
            | AccessFlags::INPUT_ATTACHMENT_READ
            | AccessFlags::COLOR_ATTACHMENT_READ
            | AccessFlags::COLOR_ATTACHMENT_WRITE
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        if features.tessellation_shader {
            stages |= PipelineStageFlags::TESSELLATION_CONTROL_SHADER
                | PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
        }
        if features.geometry_shader {
            stages |= PipelineStageFlags::GEOMETRY_SHADER;
        }
        if features.conditional_rendering {
            stages |= PipelineStageFlags::CONDITIONAL_RENDERING;
            accesses |= AccessFlags::CONDITIONAL_RENDERING_READ;
        }
    }

    QueueFamilySupport { stages, accesses }
}

/// Umbrella stage groups are accepted wholesale on families that qualify for
/// the group, even when a member bit is gated off by a disabled feature.
pub(crate) fn stage_mask_supported(
    mut mask: PipelineStageFlags,
    supported: PipelineStageFlags,
) -> bool {
    if mask.contains(PipelineStageFlags::ALL_COMMANDS_BITS) {
        return true;
    }
    if supported.contains(PipelineStageFlags::COPY)
        && mask.contains(PipelineStageFlags::ALL_TRANSFER_BITS)
    {
        mask.remove(PipelineStageFlags::ALL_TRANSFER_BITS);
    }
    if supported.contains(PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT) {
        if mask.contains(PipelineStageFlags::ALL_GRAPHICS_BITS) {
            mask.remove(PipelineStageFlags::ALL_GRAPHICS_BITS);
        }
        if mask.contains(PipelineStageFlags::PRE_RASTERIZATION_SHADERS_BITS) {
            mask.remove(PipelineStageFlags::PRE_RASTERIZATION_SHADERS_BITS);
        }
    }
    supported.contains(mask)
}

pub(crate) fn access_mask_supported(mut mask: AccessFlags, supported: AccessFlags) -> bool {
    if mask.contains(AccessFlags::MEMORY_READ_BITS) {
        mask.remove(AccessFlags::MEMORY_READ_BITS);
    }
    if mask.contains(AccessFlags::MEMORY_WRITE_BITS) {
        mask.remove(AccessFlags::MEMORY_WRITE_BITS);
    }
    if supported.contains(AccessFlags::STORAGE_WRITE) {
        if mask.contains(AccessFlags::SHADER_READ_BITS) {
            mask.remove(AccessFlags::SHADER_READ_BITS);
        }
        if mask.contains(AccessFlags::SHADER_WRITE_BITS) {
            mask.remove(AccessFlags::SHADER_WRITE_BITS);
        }
    }
    supported.contains(mask)
}

/// Checks both halves of a barrier against one family's support. Host
/// accesses additionally require the host stage on the same side. The full
/// per-stage access compatibility matrix is not verified here.
pub(crate) fn validate_barrier_against(
    barrier: &MemoryBarrier,
    stages: PipelineStageFlags,
    accesses: AccessFlags,
) -> Result<()> {
    let sides = [
        (barrier.src_stage_mask, barrier.src_access_mask, "source"),
        (barrier.dst_stage_mask, barrier.dst_access_mask, "destination"),
    ];
    for (stage_mask, access_mask, side) in sides {
        if !stage_mask_supported(stage_mask, stages) {
            error!("{side} stage mask {stage_mask:?} is not supported by this queue family");
            return Err(Error::InvalidParameters);
        }
        if !access_mask_supported(access_mask, accesses) {
            error!("{side} access mask {access_mask:?} is not supported by this queue family");
            return Err(Error::InvalidParameters);
        }
        if access_mask.intersects(AccessFlags::HOST_READ | AccessFlags::HOST_WRITE)
            && !stage_mask.contains(PipelineStageFlags::HOST)
        {
            error!("{side} host access requires the host stage");
            return Err(Error::InvalidParameters);
        }
    }
    Ok(())
}

/// The logical device: owns the queues, enforces features and limits, and
/// forwards validated work to its backend.
pub struct Device {
    id: u64,
    physical: Arc<PhysicalDevice>,
    features: DeviceFeatures,
    family_support: Vec<QueueFamilySupport>,
    queues: Vec<Vec<Arc<Queue>>>,
    compiler: Option<Arc<dyn ShaderCompiler>>,
    backend: Arc<dyn DeviceBackend>,
}

macro_rules! require_supported {
    ($requested:expr, $supported:expr, $($feature:ident),+ $(,)?) => {
        $(
            if $requested.$feature && !$supported.$feature {
                error!(concat!("requested feature ", stringify!($feature), " is not supported"));
                return Err(Error::FeatureNotEnabled(stringify!($feature)));
            }
        )+
    };
}

impl Device {
    pub fn new(
        physical: Arc<PhysicalDevice>,
        create_info: DeviceCreateInfo,
        backend: Arc<dyn DeviceBackend>,
        compiler: Option<Arc<dyn ShaderCompiler>>,
    ) -> Result<Arc<Self>> {
        let features = create_info.features;
        let supported = &physical.supported_features;
        require_supported!(
            features,
            supported,
            geometry_shader,
            tessellation_shader,
            alpha_to_one,
            depth_bounds,
            mixed_attachment_samples,
            conditional_rendering,
            acceleration_structure,
            ray_tracing_pipeline,
            ray_traversal_primitive_culling,
        );
        if features.ray_tracing_pipeline && !features.acceleration_structure {
            error!("ray_tracing_pipeline requires acceleration_structure");
            return Err(Error::FeatureNotEnabled("acceleration_structure"));
        }
        if features.ray_traversal_primitive_culling && !features.ray_tracing_pipeline {
            error!("ray_traversal_primitive_culling requires ray_tracing_pipeline");
            return Err(Error::FeatureNotEnabled("ray_tracing_pipeline"));
        }

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);

        let mut queues: Vec<Vec<Arc<Queue>>> = physical
            .queue_families
            .iter()
            .map(|_| Vec::new())
            .collect();
        for request in &create_info.queues {
            let Some(family) = physical.queue_family_properties(request.family_index) else {
                error!(
                    "queue request names family {} which does not exist",
                    request.family_index
                );
                return Err(Error::InvalidParameters);
            };
            if request.count > family.queue_count {
                error!(
                    "family {} offers {} queues, {} requested",
                    request.family_index, family.queue_count, request.count
                );
                return Err(Error::InvalidParameters);
            }
            let family_queues = &mut queues[request.family_index as usize];
            for queue_index in 0..request.count {
                let gl = backend.create_context(request.family_index, queue_index);
                family_queues.push(Arc::new(Queue::new(
                    request.family_index,
                    queue_index,
                    gl,
                    id,
                )));
            }
        }

        let family_support = physical
            .queue_families
            .iter()
            .map(|family| family_support(family.queue_flags, &features))
            .collect();

        info!("created device on {:?}", physical.name);
        Ok(Arc::new(Self {
            id,
            physical,
            features,
            family_support,
            queues,
            compiler,
            backend,
        }))
    }

    pub fn physical_device(&self) -> &Arc<PhysicalDevice> {
        &self.physical
    }

    pub fn enabled_features(&self) -> &DeviceFeatures {
        &self.features
    }

    pub fn queue(&self, family_index: u32, queue_index: u32) -> Option<&Arc<Queue>> {
        self.queues
            .get(family_index as usize)?
            .get(queue_index as usize)
    }

    /// Support is answered for the logical device, not the physical one: a
    /// family this device created no queues on supports nothing.
    fn support(&self, family_index: u32) -> Option<&QueueFamilySupport> {
        if self.queues.get(family_index as usize)?.is_empty() {
            return None;
        }
        self.family_support.get(family_index as usize)
    }

    pub fn supports_stage_mask(&self, family_index: u32, mask: PipelineStageFlags) -> bool {
        self.support(family_index)
            .map_or(false, |support| stage_mask_supported(mask, support.stages))
    }

    pub fn supports_access_mask(&self, family_index: u32, mask: AccessFlags) -> bool {
        self.support(family_index)
            .map_or(false, |support| access_mask_supported(mask, support.accesses))
    }

    pub fn validate_memory_barrier(
        &self,
        family_index: u32,
        barrier: &MemoryBarrier,
    ) -> Result<()> {
        let support = self.support(family_index).ok_or_else(|| {
            error!("no queue family {family_index}");
            Error::InvalidParameters
        })?;
        validate_barrier_against(barrier, support.stages, support.accesses)
    }

    pub fn create_command_pool(&self, queue_family_index: u32) -> Result<Arc<CommandPool>> {
        if self.support(queue_family_index).is_none() {
            error!("no queue family {queue_family_index}");
            return Err(Error::InvalidParameters);
        }
        Ok(Arc::new(CommandPool::new(queue_family_index, self.id)))
    }

    pub fn create_command_buffer(&self, pool: &Arc<CommandPool>) -> Result<CommandBuffer> {
        if pool.device_id != self.id {
            error!("command pool belongs to another device");
            return Err(Error::ForeignObject);
        }
        let support = self
            .support(pool.queue_family_index())
            .ok_or(Error::InvalidParameters)?;
        Ok(CommandBuffer::new(
            pool.clone(),
            support.stages,
            support.accesses,
            self.id,
        ))
    }

    pub fn create_buffer(&self, info: BufferCreateInfo) -> Result<Arc<Buffer>> {
        if info.size == 0 {
            error!("buffer {:?} has zero size", info.name);
            return Err(Error::InvalidParameters);
        }
        let gl_name = self.backend.create_buffer_impl(&info);
        Ok(Arc::new(Buffer {
            info,
            gl_name,
            device_id: self.id,
        }))
    }

    pub fn create_image(&self, info: ImageCreateInfo) -> Result<Arc<Image>> {
        if info.extent.contains(&0) || info.mip_levels == 0 || info.array_layers == 0 {
            error!("image {:?} has a zero dimension", info.name);
            return Err(Error::InvalidParameters);
        }
        let usage = self.physical.optimal_tiling_usage(info.format);
        let wants_attachment = info
            .usage
            .intersects(ImageUsage::COLOR_ATTACHMENT | ImageUsage::DEPTH_STENCIL_ATTACHMENT);
        if (info.usage.contains(ImageUsage::SAMPLED) && !usage.sampled)
            || (info.usage.contains(ImageUsage::STORAGE) && !usage.storage)
            || (wants_attachment && !usage.attachment)
        {
            error!(
                "image {:?} format {:?} does not support the requested usage",
                info.name, info.format
            );
            return Err(Error::InvalidParameters);
        }
        let gl_name = self.backend.create_image_impl(&info);
        Ok(Arc::new(Image {
            info,
            gl_name,
            device_id: self.id,
        }))
    }

    pub fn create_image_view(
        &self,
        image: Arc<Image>,
        format: Format,
        base_mip_level: u32,
        mip_level_count: u32,
        base_array_layer: u32,
        array_layer_count: u32,
    ) -> Result<Arc<ImageView>> {
        if image.device_id != self.id {
            error!("image belongs to another device");
            return Err(Error::ForeignObject);
        }
        if mip_level_count == 0
            || array_layer_count == 0
            || base_mip_level
                .checked_add(mip_level_count)
                .map_or(true, |end| end > image.info.mip_levels)
            || base_array_layer
                .checked_add(array_layer_count)
                .map_or(true, |end| end > image.info.array_layers)
        {
            error!("image view subresource range out of bounds");
            return Err(Error::InvalidParameters);
        }
        let gl_name = self.backend.create_image_view_impl(image.gl_name);
        Ok(Arc::new(ImageView {
            image,
            format,
            base_mip_level,
            mip_level_count,
            base_array_layer,
            array_layer_count,
            gl_name,
            device_id: self.id,
        }))
    }

    pub fn create_sampler(&self, info: SamplerCreateInfo) -> Result<Arc<Sampler>> {
        if let Some(anisotropy) = info.max_anisotropy {
            if anisotropy < 1.0 {
                error!("sampler {:?} anisotropy must be at least 1", info.name);
                return Err(Error::InvalidParameters);
            }
        }
        let gl_name = self.backend.create_sampler_impl(&info);
        Ok(Arc::new(Sampler {
            info,
            gl_name,
            device_id: self.id,
        }))
    }

    pub fn create_buffer_view(
        &self,
        buffer: Arc<Buffer>,
        format: Format,
        offset: u64,
        range: u64,
    ) -> Result<Arc<BufferView>> {
        if buffer.device_id != self.id {
            error!("buffer belongs to another device");
            return Err(Error::ForeignObject);
        }
        if !buffer.info.usage.contains(BufferUsage::TEXEL_VIEW) {
            error!("buffer {:?} lacks TEXEL_VIEW usage", buffer.info.name);
            return Err(Error::InvalidParameters);
        }
        if !self.physical.optimal_tiling_usage(format).buffer_view {
            error!("format {format:?} cannot back a texel buffer view");
            return Err(Error::InvalidParameters);
        }
        if range == 0 || offset.checked_add(range).map_or(true, |end| end > buffer.size()) {
            error!("buffer view range out of bounds");
            return Err(Error::InvalidParameters);
        }
        Ok(Arc::new(BufferView {
            buffer,
            format,
            offset,
            range,
            device_id: self.id,
        }))
    }

    pub fn create_query_pool(
        &self,
        query_type: QueryType,
        query_count: u32,
    ) -> Result<Arc<QueryPool>> {
        if query_count == 0 {
            error!("query pool needs at least one query");
            return Err(Error::InvalidParameters);
        }
        let gl_name = self.backend.create_query_pool_impl(query_type, query_count);
        Ok(Arc::new(QueryPool {
            query_type,
            query_count,
            gl_name,
            device_id: self.id,
        }))
    }

    pub fn create_descriptor_set_layout(
        &self,
        bindings: Vec<Binding>,
    ) -> Result<Arc<DescriptorSetLayout>> {
        for (i, binding) in bindings.iter().enumerate() {
            let Some(samplers) = &binding.immutable_samplers else {
                continue;
            };
            if !matches!(
                binding.ty,
                DescriptorType::Sampler | DescriptorType::CombinedImageSampler
            ) {
                error!("bindings[{i}] carries immutable samplers but is not a sampler binding");
                return Err(Error::InvalidParameters);
            }
            if samplers.len() as u32 != binding.count {
                error!(
                    "bindings[{i}] declares {} descriptors but {} immutable samplers",
                    binding.count,
                    samplers.len()
                );
                return Err(Error::InvalidParameters);
            }
            if samplers.iter().any(|sampler| sampler.device_id != self.id) {
                error!("bindings[{i}] immutable sampler belongs to another device");
                return Err(Error::ForeignObject);
            }
        }

        let scan = scan_bindings(&bindings)?;
        check_variable_length_position(&scan)?;
        check_update_after_bind_exclusion(&scan)?;
        check_dynamic_limits(&scan, &self.physical.limits)?;

        self.backend
            .create_descriptor_set_layout_impl(&bindings, scan.immutable_sampler_count)?;
        Ok(Arc::new(DescriptorSetLayout::new(
            bindings,
            scan.immutable_sampler_count,
            self.id,
        )))
    }

    pub fn create_descriptor_set(
        &self,
        layout: &Arc<DescriptorSetLayout>,
    ) -> Result<Arc<DescriptorSet>> {
        if layout.device_id != self.id {
            error!("descriptor set layout belongs to another device");
            return Err(Error::ForeignObject);
        }
        Ok(Arc::new(DescriptorSet::new(layout.clone(), self.id)))
    }

    /// Applies every write, then every copy, atomically with respect to
    /// failure: if any element is invalid, no set is touched.
    pub fn update_descriptor_sets(
        &self,
        writes: &[WriteDescriptorSet],
        copies: &[CopyDescriptorSet],
    ) -> Result<()> {
        let mut counts = DescriptorBatchCounts::default();
        for write in writes {
            let resolved = validate_write(write, self.id)?;
            add_counts(&mut counts, resolved.ty.category(), resolved.count);
        }
        for copy in copies {
            let resolved = validate_copy(copy, self.id)?;
            add_counts(&mut counts, resolved.ty.category(), resolved.count);
        }

        for write in writes {
            process_write(write);
        }
        for copy in copies {
            process_copy(copy);
        }
        self.backend.update_descriptor_sets_impl(&counts);
        Ok(())
    }

    /// Empties descriptor slots; the all-or-nothing contract matches
    /// [`update_descriptor_sets`](Self::update_descriptor_sets).
    pub fn nullify_descriptors(&self, drops: &[DropDescriptors]) -> Result<()> {
        let mut counts = DescriptorBatchCounts::default();
        for drop in drops {
            let resolved = validate_drop(drop, self.id)?;
            add_counts(&mut counts, resolved.ty.category(), resolved.count);
        }
        for drop in drops {
            process_drop(drop);
        }
        self.backend.update_descriptor_sets_impl(&counts);
        Ok(())
    }

    pub fn create_renderpass(&self, info: RenderpassCreateInfo) -> Result<Arc<Renderpass>> {
        let validated = validate_creation_params(&info, &self.physical)?;
        self.backend.create_renderpass_impl(&info, &validated)?;
        Ok(Arc::new(Renderpass {
            info,
            view_mask: validated.view_mask,
            device_id: self.id,
        }))
    }

    pub fn create_framebuffer(
        &self,
        renderpass: Arc<Renderpass>,
        attachments: Vec<Arc<ImageView>>,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<Arc<Framebuffer>> {
        if renderpass.device_id != self.id {
            error!("renderpass belongs to another device");
            return Err(Error::ForeignObject);
        }
        if attachments.len() != renderpass.info.attachments.len() {
            error!(
                "framebuffer supplies {} attachments, renderpass declares {}",
                attachments.len(),
                renderpass.info.attachments.len()
            );
            return Err(Error::InvalidParameters);
        }
        for (i, (view, desc)) in attachments
            .iter()
            .zip(&renderpass.info.attachments)
            .enumerate()
        {
            if view.device_id != self.id {
                error!("attachments[{i}] belongs to another device");
                return Err(Error::ForeignObject);
            }
            if view.format != desc.format {
                error!(
                    "attachments[{i}] format {:?} does not match renderpass format {:?}",
                    view.format, desc.format
                );
                return Err(Error::InvalidParameters);
            }
        }
        Ok(Arc::new(Framebuffer::new(
            renderpass,
            attachments,
            width,
            height,
            layers,
            self.id,
        )))
    }

    pub fn create_pipeline_layout(
        &self,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constant_size: u32,
    ) -> Result<Arc<PipelineLayout>> {
        if set_layouts.iter().any(|layout| layout.device_id != self.id) {
            error!("pipeline layout references a set layout of another device");
            return Err(Error::ForeignObject);
        }
        Ok(Arc::new(PipelineLayout {
            set_layouts,
            push_constant_size,
            device_id: self.id,
        }))
    }

    pub fn create_pipeline_cache(&self, initial_data: Vec<u8>) -> Arc<PipelineCache> {
        Arc::new(PipelineCache::new(initial_data, self.id))
    }

    pub fn compile_shader(&self, info: ShaderCreateInfo) -> Result<Arc<ShaderModule>> {
        let spirv = match &info.source {
            ShaderSource::Spirv(words) => {
                if words.is_empty() {
                    error!("empty SPIR-V module {:?}", info.path_hint);
                    return Err(Error::InvalidParameters);
                }
                words.clone()
            }
            ShaderSource::Glsl(text) | ShaderSource::Hlsl(text) => {
                let Some(compiler) = &self.compiler else {
                    error!("no shader compiler attached to this device");
                    return Err(Error::CompilationFailed(
                        "no shader compiler attached".to_string(),
                    ));
                };
                compiler.compile_to_spirv(text, info.stage, &info.defines, &info.path_hint)?
            }
        };
        Ok(Arc::new(ShaderModule {
            spirv,
            entry_points: vec![EntryPoint {
                name: info.entry_point,
                stage: info.stage,
            }],
            path_hint: info.path_hint,
        }))
    }

    fn check_stage_features(&self, spec: &ShaderSpecInfo) -> Result<()> {
        use crate::types::ShaderStageFlags as S;
        if spec
            .stage
            .intersects(S::TESSELLATION_CONTROL | S::TESSELLATION_EVALUATION)
            && !self.features.tessellation_shader
        {
            error!("tessellation stage used without the tessellation_shader feature");
            return Err(Error::FeatureNotEnabled("tessellation_shader"));
        }
        if spec.stage.contains(S::GEOMETRY) && !self.features.geometry_shader {
            error!("geometry stage used without the geometry_shader feature");
            return Err(Error::FeatureNotEnabled("geometry_shader"));
        }
        Ok(())
    }

    /// Creates a whole batch. Entries fail independently: a bad entry leaves
    /// `None` in its output slot and the batch carries on, reporting the
    /// failure count at the end.
    pub fn create_compute_pipelines(
        &self,
        infos: &[ComputePipelineCreateInfo],
        _cache: Option<&PipelineCache>,
        output: &mut [Option<Arc<ComputePipeline>>],
    ) -> Result<()> {
        if infos.len() != output.len() {
            error!("pipeline batch output size mismatch");
            return Err(Error::InvalidParameters);
        }
        let mut trim = TrimTask::new();
        let mut valid = vec![false; infos.len()];
        for (i, info) in infos.iter().enumerate() {
            output[i] = None;
            if info.layout.device_id != self.id {
                error!("compute pipelines[{i}] layout belongs to another device");
                continue;
            }
            if validate_spec_info(&info.shader).is_err() {
                continue;
            }
            let module = info.shader.module.as_ref().unwrap();
            trim.insert_entry_point(module, &info.shader.entry_point, info.shader.stage);
            valid[i] = true;
        }

        let mut failed = 0;
        for (i, info) in infos.iter().enumerate() {
            if !valid[i] {
                failed += 1;
                continue;
            }
            let module = trim.trim(info.shader.module.as_ref().unwrap());
            match self.backend.create_compute_pipeline_impl(info) {
                Some(gl_name) => {
                    output[i] = Some(Arc::new(ComputePipeline {
                        layout: info.layout.clone(),
                        shader_module: module,
                        entry_point: info.shader.entry_point.clone(),
                        gl_name,
                        device_id: self.id,
                    }));
                }
                None => {
                    error!("backend failed to create compute pipelines[{i}]");
                    failed += 1;
                }
            }
        }
        if failed != 0 {
            return Err(Error::PipelineCreation { failed });
        }
        Ok(())
    }

    fn validate_graphics_entry(
        &self,
        index: usize,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<()> {
        if info.layout.device_id != self.id || info.renderpass.device_id != self.id {
            error!("graphics pipelines[{index}] references objects of another device");
            return Err(Error::ForeignObject);
        }
        for spec in &info.shaders {
            validate_spec_info(spec)?;
            self.check_stage_features(spec)?;
        }
        if info.raster.alpha_to_one && !self.features.alpha_to_one {
            error!("graphics pipelines[{index}] uses alpha_to_one without the feature");
            return Err(Error::FeatureNotEnabled("alpha_to_one"));
        }
        if info.raster.depth_bounds_test && !self.features.depth_bounds {
            error!("graphics pipelines[{index}] uses depth bounds without the feature");
            return Err(Error::FeatureNotEnabled("depth_bounds"));
        }
        let Some(subpass) = info.renderpass.subpass(info.subpass) else {
            error!(
                "graphics pipelines[{index}] names subpass {} out of range",
                info.subpass
            );
            return Err(Error::InvalidParameters);
        };
        if let Some(msb) = find_msb(subpass.view_mask) {
            if msb >= self.physical.limits.max_multiview_view_count {
                error!("graphics pipelines[{index}] subpass view mask exceeds the device limit");
                return Err(Error::LimitExceeded("multiview view count"));
            }
        }

        let attachment_samples =
            |attachment: u32| info.renderpass.info.attachments[attachment as usize].samples;
        if let Some(ds) = &subpass.depth_stencil_attachment {
            // with mixed samples the depth attachment may differ as long as
            // the pipeline never reads or writes it
            let must_match = !self.features.mixed_attachment_samples
                || info.raster.depth_test
                || info.raster.depth_bounds_test;
            if must_match && attachment_samples(ds.attachment) != info.rasterization_samples {
                error!(
                    "graphics pipelines[{index}] sample count differs from the depth attachment"
                );
                return Err(Error::InvalidParameters);
            }
        }
        for (slot, color) in subpass.color_attachments.iter().enumerate() {
            let Some(color) = color else { continue };
            let samples = attachment_samples(color.attachment);
            let matches = if self.features.mixed_attachment_samples {
                samples <= info.rasterization_samples
            } else {
                samples == info.rasterization_samples
            };
            if !matches {
                error!("graphics pipelines[{index}] color slot {slot} sample count mismatch");
                return Err(Error::InvalidParameters);
            }
            if info.blend.get(slot).map_or(false, |blend| blend.enabled) {
                let format = info.renderpass.info.attachments[color.attachment as usize].format;
                if !self.physical.optimal_tiling_usage(format).attachment_blend {
                    error!(
                        "graphics pipelines[{index}] blends on slot {slot} but {format:?} cannot blend"
                    );
                    return Err(Error::InvalidParameters);
                }
            }
        }
        Ok(())
    }

    pub fn create_graphics_pipelines(
        &self,
        infos: &[GraphicsPipelineCreateInfo],
        _cache: Option<&PipelineCache>,
        output: &mut [Option<Arc<GraphicsPipeline>>],
    ) -> Result<()> {
        if infos.len() != output.len() {
            error!("pipeline batch output size mismatch");
            return Err(Error::InvalidParameters);
        }
        let mut trim = TrimTask::new();
        let mut valid = vec![false; infos.len()];
        for (i, info) in infos.iter().enumerate() {
            output[i] = None;
            if self.validate_graphics_entry(i, info).is_err() {
                continue;
            }
            for spec in &info.shaders {
                let module = spec.module.as_ref().unwrap();
                trim.insert_entry_point(module, &spec.entry_point, spec.stage);
            }
            valid[i] = true;
        }

        let mut failed = 0;
        for (i, info) in infos.iter().enumerate() {
            if !valid[i] {
                failed += 1;
                continue;
            }
            let modules = info
                .shaders
                .iter()
                .map(|spec| trim.trim(spec.module.as_ref().unwrap()))
                .collect();
            match self.backend.create_graphics_pipeline_impl(info) {
                Some(gl_name) => {
                    output[i] = Some(Arc::new(GraphicsPipeline {
                        layout: info.layout.clone(),
                        renderpass: info.renderpass.clone(),
                        subpass: info.subpass,
                        shader_modules: modules,
                        gl_name,
                        device_id: self.id,
                    }));
                }
                None => {
                    error!("backend failed to create graphics pipelines[{i}]");
                    failed += 1;
                }
            }
        }
        if failed != 0 {
            return Err(Error::PipelineCreation { failed });
        }
        Ok(())
    }

    fn validate_ray_tracing_entry(
        &self,
        index: usize,
        info: &RayTracingPipelineCreateInfo,
    ) -> Result<()> {
        if info.layout.device_id != self.id {
            error!("ray tracing pipelines[{index}] layout belongs to another device");
            return Err(Error::ForeignObject);
        }
        for spec in &info.shaders {
            validate_spec_info(spec)?;
        }
        let culling = RayTracingPipelineFlags::SKIP_AABBS
            | RayTracingPipelineFlags::SKIP_BUILT_IN_PRIMITIVES;
        if info.flags.contains(culling) {
            error!("ray tracing pipelines[{index}] sets both primitive-skip flags");
            return Err(Error::InvalidParameters);
        }
        if info.flags.intersects(culling) && !self.features.ray_traversal_primitive_culling {
            error!("ray tracing pipelines[{index}] uses primitive culling without the feature");
            return Err(Error::FeatureNotEnabled("ray_traversal_primitive_culling"));
        }
        if info.max_recursion_depth > self.physical.limits.max_ray_recursion_depth {
            error!(
                "ray tracing pipelines[{index}] recursion depth {} exceeds the limit {}",
                info.max_recursion_depth, self.physical.limits.max_ray_recursion_depth
            );
            return Err(Error::LimitExceeded("ray recursion depth"));
        }
        Ok(())
    }

    pub fn create_ray_tracing_pipelines(
        &self,
        infos: &[RayTracingPipelineCreateInfo],
        _cache: Option<&PipelineCache>,
        output: &mut [Option<Arc<RayTracingPipeline>>],
    ) -> Result<()> {
        if !self.features.ray_tracing_pipeline {
            error!("ray tracing pipelines require the ray_tracing_pipeline feature");
            return Err(Error::FeatureNotEnabled("ray_tracing_pipeline"));
        }
        if infos.len() != output.len() {
            error!("pipeline batch output size mismatch");
            return Err(Error::InvalidParameters);
        }
        let mut trim = TrimTask::new();
        let mut valid = vec![false; infos.len()];
        for (i, info) in infos.iter().enumerate() {
            output[i] = None;
            if self.validate_ray_tracing_entry(i, info).is_err() {
                continue;
            }
            for spec in &info.shaders {
                let module = spec.module.as_ref().unwrap();
                trim.insert_entry_point(module, &spec.entry_point, spec.stage);
            }
            valid[i] = true;
        }

        let mut failed = 0;
        for (i, info) in infos.iter().enumerate() {
            if !valid[i] {
                failed += 1;
                continue;
            }
            let modules = info
                .shaders
                .iter()
                .map(|spec| trim.trim(spec.module.as_ref().unwrap()))
                .collect();
            match self.backend.create_ray_tracing_pipeline_impl(info) {
                Some(()) => {
                    output[i] = Some(Arc::new(RayTracingPipeline {
                        layout: info.layout.clone(),
                        shader_modules: modules,
                        flags: info.flags,
                        max_recursion_depth: info.max_recursion_depth,
                        device_id: self.id,
                    }));
                }
                None => {
                    error!("backend failed to create ray tracing pipelines[{i}]");
                    failed += 1;
                }
            }
        }
        if failed != 0 {
            return Err(Error::PipelineCreation { failed });
        }
        Ok(())
    }

    /// Blocks until every queue has drained and drops what their submissions
    /// pinned. Calling it again on an idle device is a no-op.
    pub fn wait_idle(&self) {
        for family in &self.queues {
            for queue in family {
                queue.wait_idle();
            }
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

fn add_counts(counts: &mut DescriptorBatchCounts, category: DescriptorCategory, amount: u32) {
    match category {
        DescriptorCategory::Buffer => counts.buffers += amount,
        DescriptorCategory::Image => counts.images += amount,
        DescriptorCategory::BufferView => counts.buffer_views += amount,
        DescriptorCategory::AccelerationStructure => counts.acceleration_structures += amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> DeviceFeatures {
        DeviceFeatures {
            geometry_shader: true,
            tessellation_shader: true,
            ..Default::default()
        }
    }

    #[test]
    fn transfer_family_has_no_shader_stages() {
        let support = family_support(QueueFlags::TRANSFER, &features());
        assert!(support.stages.contains(PipelineStageFlags::COPY));
        assert!(support.stages.contains(PipelineStageFlags::HOST));
        assert!(!support.stages.contains(PipelineStageFlags::COMPUTE_SHADER));
        assert!(!support.accesses.contains(AccessFlags::STORAGE_WRITE));
    }

    #[test]
    fn graphics_family_gates_geometry_on_feature() {
        let without = family_support(QueueFlags::GRAPHICS, &DeviceFeatures::default());
        assert!(!without.stages.contains(PipelineStageFlags::GEOMETRY_SHADER));
        let with = family_support(QueueFlags::GRAPHICS, &features());
        assert!(with.stages.contains(PipelineStageFlags::GEOMETRY_SHADER));
    }

    #[test]
    fn all_commands_is_always_supported() {
        let support = family_support(QueueFlags::TRANSFER, &features());
        assert!(stage_mask_supported(
            PipelineStageFlags::ALL_COMMANDS_BITS,
            support.stages
        ));
    }

    #[test]
    fn graphics_umbrella_passes_even_with_geometry_disabled() {
        let support = family_support(
            QueueFlags::GRAPHICS | QueueFlags::TRANSFER,
            &DeviceFeatures::default(),
        );
        // the expanded mask would fail on the missing geometry bit
        assert!(!support.stages.contains(PipelineStageFlags::GEOMETRY_SHADER));
        assert!(stage_mask_supported(
            PipelineStageFlags::ALL_GRAPHICS_BITS,
            support.stages
        ));
        assert!(stage_mask_supported(
            PipelineStageFlags::PRE_RASTERIZATION_SHADERS_BITS,
            support.stages
        ));
        // but a transfer-only family gets no such shortcut
        let transfer = family_support(QueueFlags::TRANSFER, &DeviceFeatures::default());
        assert!(!stage_mask_supported(
            PipelineStageFlags::ALL_GRAPHICS_BITS,
            transfer.stages
        ));
    }

    #[test]
    fn memory_umbrella_accesses_pass_everywhere() {
        let support = family_support(QueueFlags::TRANSFER, &DeviceFeatures::default());
        assert!(access_mask_supported(
            AccessFlags::MEMORY_READ_BITS,
            support.accesses
        ));
        assert!(access_mask_supported(
            AccessFlags::MEMORY_WRITE_BITS,
            support.accesses
        ));
        // shader umbrellas only pass on shader-capable families
        assert!(!access_mask_supported(
            AccessFlags::SHADER_READ_BITS,
            support.accesses
        ));
        let compute = family_support(QueueFlags::COMPUTE, &DeviceFeatures::default());
        assert!(access_mask_supported(
            AccessFlags::SHADER_READ_BITS,
            compute.accesses
        ));
    }

    #[test]
    fn host_access_requires_host_stage() {
        let support = family_support(
            QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            &features(),
        );
        let barrier = MemoryBarrier {
            src_stage_mask: PipelineStageFlags::COPY,
            src_access_mask: AccessFlags::HOST_WRITE,
            dst_stage_mask: PipelineStageFlags::COMPUTE_SHADER,
            dst_access_mask: AccessFlags::STORAGE_READ,
        };
        assert!(validate_barrier_against(&barrier, support.stages, support.accesses).is_err());

        let barrier = MemoryBarrier {
            src_stage_mask: PipelineStageFlags::HOST,
            src_access_mask: AccessFlags::HOST_WRITE,
            dst_stage_mask: PipelineStageFlags::COMPUTE_SHADER,
            dst_access_mask: AccessFlags::STORAGE_READ,
        };
        assert!(validate_barrier_against(&barrier, support.stages, support.accesses).is_ok());
    }
}
