use std::sync::Arc;

use log::error;

use crate::command_pool::CommandPool;
use crate::descriptor_set::DescriptorSet;
use crate::framebuffer::Framebuffer;
use crate::gl_context::{
    BufferCopy, BufferImageCopy, Capability, FboCache, GlContext, IndexType,
};
use crate::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::resource::{Buffer, BufferUsage, Image, ImageUsage, QueryPool, QueryType};
use crate::types::{AccessFlags, ClearValue, MemoryBarrier, PipelineStageFlags, Viewport};
use crate::{Error, Result};

/// A deferred call, executed against a context at replay time. Resource
/// references are cloned in, so a recorded command keeps everything it
/// touches alive.
#[derive(Debug, Clone)]
pub(crate) enum GlCommand {
    BeginRenderpass {
        framebuffer: Arc<Framebuffer>,
        clear_values: Vec<ClearValue>,
    },
    EndRenderpass,
    BindGraphicsPipeline {
        pipeline: Arc<GraphicsPipeline>,
    },
    BindComputePipeline {
        pipeline: Arc<ComputePipeline>,
    },
    BindDescriptorSet {
        slot: u32,
        set: Arc<DescriptorSet>,
    },
    PushConstants {
        bytes: Vec<u8>,
    },
    SetViewport {
        viewport: Viewport,
    },
    SetScissor {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Enable {
        capability: Capability,
    },
    Disable {
        capability: Capability,
    },
    SetStencilReference {
        reference: u32,
    },
    SetBlendConstants {
        constants: [f32; 4],
    },
    BindVertexBuffer {
        binding: u32,
        buffer: Arc<Buffer>,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        index_type: IndexType,
    },
    DrawArrays {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawElements {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        groups: [u32; 3],
    },
    DispatchIndirect {
        buffer: Arc<Buffer>,
        offset: u64,
    },
    PipelineBarrier {
        barrier: MemoryBarrier,
    },
    CopyBuffer {
        src: Arc<Buffer>,
        dst: Arc<Buffer>,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: Arc<Buffer>,
        dst: Arc<Image>,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: Arc<Image>,
        dst: Arc<Buffer>,
        regions: Vec<BufferImageCopy>,
    },
    FillBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
        data: u32,
    },
    BeginQuery {
        pool: Arc<QueryPool>,
        index: u32,
    },
    EndQuery {
        pool: Arc<QueryPool>,
        index: u32,
    },
    WriteTimestamp {
        pool: Arc<QueryPool>,
        index: u32,
    },
}

impl GlCommand {
    pub(crate) fn execute(&self, gl: &mut dyn GlContext, fbo_cache: &mut FboCache) {
        match self {
            GlCommand::BeginRenderpass {
                framebuffer,
                clear_values,
            } => {
                let fbo = fbo_cache.get_or_create(framebuffer, gl);
                gl.bind_framebuffer(fbo);
                let mut color_index = 0;
                for (i, view) in framebuffer.attachments.iter().enumerate() {
                    let format = view.format;
                    let value = clear_values.get(i);
                    if format.has_depth() || format.has_stencil() {
                        if let Some(ClearValue::DepthStencil { depth, stencil }) = value {
                            gl.clear_depth_stencil(*depth, *stencil);
                        }
                    } else {
                        if let Some(value) = value {
                            gl.clear_color(color_index, value);
                        }
                        color_index += 1;
                    }
                }
            }
            GlCommand::EndRenderpass => gl.bind_framebuffer(0),
            GlCommand::BindGraphicsPipeline { pipeline } => gl.use_program(pipeline.gl_name),
            GlCommand::BindComputePipeline { pipeline } => gl.use_program(pipeline.gl_name),
            GlCommand::BindDescriptorSet { slot, set } => gl.bind_descriptor_set(*slot, set),
            GlCommand::PushConstants { bytes } => gl.push_constants(bytes),
            GlCommand::SetViewport { viewport } => gl.set_viewport(viewport),
            GlCommand::SetScissor {
                x,
                y,
                width,
                height,
            } => gl.set_scissor(*x, *y, *width, *height),
            GlCommand::Enable { capability } => gl.enable(*capability),
            GlCommand::Disable { capability } => gl.disable(*capability),
            GlCommand::SetStencilReference { reference } => gl.set_stencil_reference(*reference),
            GlCommand::SetBlendConstants { constants } => gl.set_blend_constants(*constants),
            GlCommand::BindVertexBuffer {
                binding,
                buffer,
                offset,
            } => gl.bind_vertex_buffer(*binding, buffer.gl_name, *offset),
            GlCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => gl.bind_index_buffer(buffer.gl_name, *offset, *index_type),
            GlCommand::DrawArrays {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => gl.draw_arrays(*vertex_count, *instance_count, *first_vertex, *first_instance),
            GlCommand::DrawElements {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => gl.draw_elements(
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            GlCommand::Dispatch { groups } => gl.dispatch(*groups),
            GlCommand::DispatchIndirect { buffer, offset } => {
                gl.dispatch_indirect(buffer.gl_name, *offset)
            }
            GlCommand::PipelineBarrier { barrier } => gl.memory_barrier(barrier),
            GlCommand::CopyBuffer { src, dst, regions } => {
                gl.copy_buffer(src.gl_name, dst.gl_name, regions)
            }
            GlCommand::CopyBufferToImage { src, dst, regions } => {
                gl.copy_buffer_to_image(src.gl_name, dst.gl_name, regions)
            }
            GlCommand::CopyImageToBuffer { src, dst, regions } => {
                gl.copy_image_to_buffer(src.gl_name, dst.gl_name, regions)
            }
            GlCommand::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => gl.fill_buffer(buffer.gl_name, *offset, *size, *data),
            GlCommand::BeginQuery { pool, index } => gl.begin_query(pool.gl_name, *index),
            GlCommand::EndQuery { pool, index } => gl.end_query(pool.gl_name, *index),
            GlCommand::WriteTimestamp { pool, index } => gl.write_timestamp(pool.gl_name, *index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
    /// Recording failed (pool exhausted or an invalid command); only reset
    /// leaves this state.
    Invalid,
}

/// Records deferred commands into pool-owned segments and replays them in
/// recording order on submit.
pub struct CommandBuffer {
    pool: Arc<CommandPool>,
    state: CommandBufferState,
    segments: Vec<u32>,
    in_renderpass: bool,
    /// Stage/access support of the pool's queue family, captured at creation
    /// so barrier recording validates without reaching back to the device.
    supported_stages: PipelineStageFlags,
    supported_accesses: AccessFlags,
    pub(crate) device_id: u64,
}

impl CommandBuffer {
    pub(crate) fn new(
        pool: Arc<CommandPool>,
        supported_stages: PipelineStageFlags,
        supported_accesses: AccessFlags,
        device_id: u64,
    ) -> Self {
        Self {
            pool,
            state: CommandBufferState::Initial,
            segments: Vec::new(),
            in_renderpass: false,
            supported_stages,
            supported_accesses,
            device_id,
        }
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn pool(&self) -> &Arc<CommandPool> {
        &self.pool
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Initial {
            error!("begin() requires an initial-state command buffer");
            return Err(Error::InvalidCommandBufferState);
        }
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            error!("end() requires a recording command buffer");
            return Err(Error::InvalidCommandBufferState);
        }
        if self.in_renderpass {
            error!("end() inside an open renderpass");
            self.state = CommandBufferState::Invalid;
            return Err(Error::InvalidCommandBufferState);
        }
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Returns the segments to the pool and makes the buffer recordable
    /// again. Disallowed while a submit is replaying it.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == CommandBufferState::Pending {
            error!("cannot reset a pending command buffer");
            return Err(Error::InvalidCommandBufferState);
        }
        self.pool.release_segments(&self.segments);
        self.segments.clear();
        self.in_renderpass = false;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    fn push(&mut self, command: GlCommand) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(Error::InvalidCommandBufferState);
        }
        if let Some(&current) = self.segments.last() {
            if self.pool.push(current, command.clone()) {
                return Ok(());
            }
        }
        match self.pool.acquire_segment() {
            Ok(segment) => {
                self.segments.push(segment);
                // fresh segment, cannot be full
                let pushed = self.pool.push(segment, command);
                debug_assert!(pushed);
                Ok(())
            }
            Err(err) => {
                error!("command pool exhausted while recording");
                self.state = CommandBufferState::Invalid;
                Err(err)
            }
        }
    }

    fn check_owned(&self, owner: u64) -> Result<()> {
        if owner != self.device_id {
            error!("command references an object owned by another device");
            return Err(Error::ForeignObject);
        }
        Ok(())
    }

    fn require_renderpass(&mut self, inside: bool) -> Result<()> {
        if self.in_renderpass != inside {
            error!(
                "command {} a renderpass scope",
                if inside { "requires" } else { "is illegal inside" }
            );
            self.state = CommandBufferState::Invalid;
            return Err(Error::InvalidCommandBufferState);
        }
        Ok(())
    }

    pub fn begin_renderpass(
        &mut self,
        framebuffer: Arc<Framebuffer>,
        clear_values: Vec<ClearValue>,
    ) -> Result<()> {
        self.check_owned(framebuffer.device_id)?;
        self.require_renderpass(false)?;
        self.push(GlCommand::BeginRenderpass {
            framebuffer,
            clear_values,
        })?;
        self.in_renderpass = true;
        Ok(())
    }

    pub fn end_renderpass(&mut self) -> Result<()> {
        self.require_renderpass(true)?;
        self.push(GlCommand::EndRenderpass)?;
        self.in_renderpass = false;
        Ok(())
    }

    pub fn bind_graphics_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) -> Result<()> {
        self.check_owned(pipeline.device_id)?;
        self.push(GlCommand::BindGraphicsPipeline { pipeline })
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: Arc<ComputePipeline>) -> Result<()> {
        self.check_owned(pipeline.device_id)?;
        self.push(GlCommand::BindComputePipeline { pipeline })
    }

    pub fn bind_descriptor_set(&mut self, slot: u32, set: Arc<DescriptorSet>) -> Result<()> {
        self.check_owned(set.device_id)?;
        self.push(GlCommand::BindDescriptorSet { slot, set })
    }

    pub fn push_constants(&mut self, bytes: &[u8]) -> Result<()> {
        self.push(GlCommand::PushConstants {
            bytes: bytes.to_vec(),
        })
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.push(GlCommand::SetViewport { viewport })
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<()> {
        self.push(GlCommand::SetScissor {
            x,
            y,
            width,
            height,
        })
    }

    pub fn enable(&mut self, capability: Capability) -> Result<()> {
        self.push(GlCommand::Enable { capability })
    }

    pub fn disable(&mut self, capability: Capability) -> Result<()> {
        self.push(GlCommand::Disable { capability })
    }

    pub fn set_stencil_reference(&mut self, reference: u32) -> Result<()> {
        self.push(GlCommand::SetStencilReference { reference })
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.push(GlCommand::SetBlendConstants { constants })
    }

    pub fn bind_vertex_buffer(
        &mut self,
        binding: u32,
        buffer: Arc<Buffer>,
        offset: u64,
    ) -> Result<()> {
        self.check_owned(buffer.device_id)?;
        self.push(GlCommand::BindVertexBuffer {
            binding,
            buffer,
            offset,
        })
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: Arc<Buffer>,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        self.check_owned(buffer.device_id)?;
        self.push(GlCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        })
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_renderpass(true)?;
        self.push(GlCommand::DrawArrays {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_renderpass(true)?;
        self.push(GlCommand::DrawElements {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    pub fn dispatch(&mut self, groups: [u32; 3]) -> Result<()> {
        self.require_renderpass(false)?;
        self.push(GlCommand::Dispatch { groups })
    }

    pub fn dispatch_indirect(&mut self, buffer: Arc<Buffer>, offset: u64) -> Result<()> {
        self.check_owned(buffer.device_id)?;
        self.require_renderpass(false)?;
        if !buffer.info.usage.contains(BufferUsage::INDIRECT) {
            error!("dispatch_indirect buffer lacks INDIRECT usage");
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::DispatchIndirect { buffer, offset })
    }

    pub fn pipeline_barrier(&mut self, barrier: MemoryBarrier) -> Result<()> {
        crate::device::validate_barrier_against(
            &barrier,
            self.supported_stages,
            self.supported_accesses,
        )?;
        self.push(GlCommand::PipelineBarrier { barrier })
    }

    pub fn copy_buffer(
        &mut self,
        src: Arc<Buffer>,
        dst: Arc<Buffer>,
        regions: Vec<BufferCopy>,
    ) -> Result<()> {
        self.check_owned(src.device_id)?;
        self.check_owned(dst.device_id)?;
        self.require_renderpass(false)?;
        if !src.info.usage.contains(BufferUsage::TRANSFER_SRC)
            || !dst.info.usage.contains(BufferUsage::TRANSFER_DST)
        {
            error!("copy_buffer requires TRANSFER_SRC and TRANSFER_DST usage");
            return Err(Error::InvalidParameters);
        }
        for (i, region) in regions.iter().enumerate() {
            let src_end = region.src_offset.checked_add(region.size);
            let dst_end = region.dst_offset.checked_add(region.size);
            if region.size == 0
                || src_end.map_or(true, |end| end > src.size())
                || dst_end.map_or(true, |end| end > dst.size())
            {
                error!("copy_buffer regions[{i}] out of bounds");
                return Err(Error::InvalidParameters);
            }
        }
        self.push(GlCommand::CopyBuffer { src, dst, regions })
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: Arc<Buffer>,
        dst: Arc<Image>,
        regions: Vec<BufferImageCopy>,
    ) -> Result<()> {
        self.check_owned(src.device_id)?;
        self.check_owned(dst.device_id)?;
        self.require_renderpass(false)?;
        if !src.info.usage.contains(BufferUsage::TRANSFER_SRC)
            || !dst.info.usage.contains(ImageUsage::TRANSFER_DST)
        {
            error!("copy_buffer_to_image requires transfer usage on both sides");
            return Err(Error::InvalidParameters);
        }
        for (i, region) in regions.iter().enumerate() {
            if region.mip_level >= dst.info.mip_levels
                || region
                    .base_array_layer
                    .checked_add(region.layer_count)
                    .map_or(true, |end| end > dst.info.array_layers)
            {
                error!("copy_buffer_to_image regions[{i}] out of subresource range");
                return Err(Error::InvalidParameters);
            }
        }
        self.push(GlCommand::CopyBufferToImage { src, dst, regions })
    }

    pub fn copy_image_to_buffer(
        &mut self,
        src: Arc<Image>,
        dst: Arc<Buffer>,
        regions: Vec<BufferImageCopy>,
    ) -> Result<()> {
        self.check_owned(src.device_id)?;
        self.check_owned(dst.device_id)?;
        self.require_renderpass(false)?;
        if !src.info.usage.contains(ImageUsage::TRANSFER_SRC)
            || !dst.info.usage.contains(BufferUsage::TRANSFER_DST)
        {
            error!("copy_image_to_buffer requires transfer usage on both sides");
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::CopyImageToBuffer { src, dst, regions })
    }

    pub fn fill_buffer(
        &mut self,
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
        data: u32,
    ) -> Result<()> {
        self.check_owned(buffer.device_id)?;
        self.require_renderpass(false)?;
        let end = offset.checked_add(size);
        if offset % 4 != 0 || size % 4 != 0 || size == 0 || end.map_or(true, |end| end > buffer.size())
        {
            error!("fill_buffer range must be 4-byte aligned and in bounds");
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        })
    }

    pub fn begin_query(&mut self, pool: Arc<QueryPool>, index: u32) -> Result<()> {
        self.check_owned(pool.device_id)?;
        if index >= pool.query_count {
            error!("query index {index} out of pool range {}", pool.query_count);
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::BeginQuery { pool, index })
    }

    pub fn end_query(&mut self, pool: Arc<QueryPool>, index: u32) -> Result<()> {
        self.check_owned(pool.device_id)?;
        if index >= pool.query_count {
            error!("query index {index} out of pool range {}", pool.query_count);
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::EndQuery { pool, index })
    }

    pub fn write_timestamp(&mut self, pool: Arc<QueryPool>, index: u32) -> Result<()> {
        self.check_owned(pool.device_id)?;
        if pool.query_type != QueryType::Timestamp {
            error!("write_timestamp requires a timestamp query pool");
            return Err(Error::InvalidParameters);
        }
        if index >= pool.query_count {
            error!("query index {index} out of pool range {}", pool.query_count);
            return Err(Error::InvalidParameters);
        }
        self.push(GlCommand::WriteTimestamp { pool, index })
    }

    pub(crate) fn mark_pending(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Executable {
            error!("submit requires executable command buffers");
            return Err(Error::InvalidCommandBufferState);
        }
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    pub(crate) fn mark_executable(&mut self) {
        debug_assert_eq!(self.state, CommandBufferState::Pending);
        self.state = CommandBufferState::Executable;
    }

    pub(crate) fn segments(&self) -> &[u32] {
        &self.segments
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.pool.release_segments(&self.segments);
    }
}
