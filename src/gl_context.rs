use std::collections::HashMap;

use crate::descriptor_set::DescriptorSet;
use crate::framebuffer::Framebuffer;
use crate::resource::GlName;
use crate::types::{ClearValue, MemoryBarrier, Viewport};

/// Server-side state toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DepthTest,
    StencilTest,
    Blend,
    CullFace,
    ScissorTest,
    PrimitiveRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub image_offset: [i32; 3],
    pub image_extent: [u32; 3],
}

/// The function table a deferred command executes against. One implementor
/// per driver context; commands never touch a context directly while
/// recording, only through this trait at replay time.
pub trait GlContext {
    fn create_framebuffer(&mut self, attachments: &[GlName]) -> GlName;
    fn bind_framebuffer(&mut self, fbo: GlName);
    fn clear_color(&mut self, buffer_index: u32, value: &ClearValue);
    fn clear_depth_stencil(&mut self, depth: f32, stencil: u32);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32);
    fn enable(&mut self, capability: Capability);
    fn disable(&mut self, capability: Capability);
    fn set_stencil_reference(&mut self, reference: u32);
    fn set_blend_constants(&mut self, constants: [f32; 4]);
    fn use_program(&mut self, program: GlName);
    fn bind_descriptor_set(&mut self, slot: u32, set: &DescriptorSet);
    fn push_constants(&mut self, bytes: &[u8]);
    fn bind_vertex_buffer(&mut self, binding: u32, buffer: GlName, offset: u64);
    fn bind_index_buffer(&mut self, buffer: GlName, offset: u64, index_type: IndexType);
    fn draw_arrays(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_elements(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32);
    fn dispatch(&mut self, groups: [u32; 3]);
    fn dispatch_indirect(&mut self, buffer: GlName, offset: u64);
    fn memory_barrier(&mut self, barrier: &MemoryBarrier);
    fn copy_buffer(&mut self, src: GlName, dst: GlName, regions: &[BufferCopy]);
    fn copy_buffer_to_image(&mut self, src: GlName, dst: GlName, regions: &[BufferImageCopy]);
    fn copy_image_to_buffer(&mut self, src: GlName, dst: GlName, regions: &[BufferImageCopy]);
    fn fill_buffer(&mut self, buffer: GlName, offset: u64, size: u64, data: u32);
    fn begin_query(&mut self, pool: GlName, index: u32);
    fn end_query(&mut self, pool: GlName, index: u32);
    fn write_timestamp(&mut self, pool: GlName, index: u32);
}

/// Per-context cache of driver framebuffer objects, keyed by the attachment
/// set hash. Contexts cannot share these objects, so each queue owns one.
#[derive(Debug, Default)]
pub struct FboCache {
    fbos: HashMap<u64, GlName>,
}

impl FboCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, framebuffer: &Framebuffer, gl: &mut dyn GlContext) -> GlName {
        if let Some(&fbo) = self.fbos.get(&framebuffer.cache_hash()) {
            return fbo;
        }
        let attachments: Vec<GlName> = framebuffer
            .attachments
            .iter()
            .map(|view| view.gl_name)
            .collect();
        let fbo = gl.create_framebuffer(&attachments);
        self.fbos.insert(framebuffer.cache_hash(), fbo);
        fbo
    }

    pub fn len(&self) -> usize {
        self.fbos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fbos.is_empty()
    }

    pub fn clear(&mut self) {
        self.fbos.clear();
    }
}

/// Context that records the calls made against it instead of driving a GPU.
/// Backs headless replay and the test suite.
#[derive(Debug, Default)]
pub struct RecordingContext {
    pub calls: Vec<String>,
    next_name: GlName,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_name: 1,
        }
    }

    fn log(&mut self, call: String) {
        self.calls.push(call);
    }
}

impl GlContext for RecordingContext {
    fn create_framebuffer(&mut self, attachments: &[GlName]) -> GlName {
        let name = self.next_name;
        self.next_name += 1;
        self.log(format!("create_framebuffer({attachments:?}) -> {name}"));
        name
    }

    fn bind_framebuffer(&mut self, fbo: GlName) {
        self.log(format!("bind_framebuffer({fbo})"));
    }

    fn clear_color(&mut self, buffer_index: u32, value: &ClearValue) {
        self.log(format!("clear_color({buffer_index}, {value:?})"));
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: u32) {
        self.log(format!("clear_depth_stencil({depth}, {stencil})"));
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.log(format!("set_viewport({viewport:?})"));
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.log(format!("set_scissor({x}, {y}, {width}, {height})"));
    }

    fn enable(&mut self, capability: Capability) {
        self.log(format!("enable({capability:?})"));
    }

    fn disable(&mut self, capability: Capability) {
        self.log(format!("disable({capability:?})"));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.log(format!("set_stencil_reference({reference})"));
    }

    fn set_blend_constants(&mut self, constants: [f32; 4]) {
        self.log(format!("set_blend_constants({constants:?})"));
    }

    fn use_program(&mut self, program: GlName) {
        self.log(format!("use_program({program})"));
    }

    fn bind_descriptor_set(&mut self, slot: u32, _set: &DescriptorSet) {
        self.log(format!("bind_descriptor_set({slot})"));
    }

    fn push_constants(&mut self, bytes: &[u8]) {
        self.log(format!("push_constants({} bytes)", bytes.len()));
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: GlName, offset: u64) {
        self.log(format!("bind_vertex_buffer({binding}, {buffer}, {offset})"));
    }

    fn bind_index_buffer(&mut self, buffer: GlName, offset: u64, index_type: IndexType) {
        self.log(format!("bind_index_buffer({buffer}, {offset}, {index_type:?})"));
    }

    fn draw_arrays(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.log(format!(
            "draw_arrays({vertex_count}, {instance_count}, {first_vertex}, {first_instance})"
        ));
    }

    fn draw_elements(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        self.log(format!(
            "draw_elements({index_count}, {instance_count}, {first_index}, {vertex_offset}, {first_instance})"
        ));
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        self.log(format!("dispatch({groups:?})"));
    }

    fn dispatch_indirect(&mut self, buffer: GlName, offset: u64) {
        self.log(format!("dispatch_indirect({buffer}, {offset})"));
    }

    fn memory_barrier(&mut self, barrier: &MemoryBarrier) {
        self.log(format!(
            "memory_barrier({:?} -> {:?})",
            barrier.src_stage_mask, barrier.dst_stage_mask
        ));
    }

    fn copy_buffer(&mut self, src: GlName, dst: GlName, regions: &[BufferCopy]) {
        self.log(format!("copy_buffer({src}, {dst}, {} regions)", regions.len()));
    }

    fn copy_buffer_to_image(&mut self, src: GlName, dst: GlName, regions: &[BufferImageCopy]) {
        self.log(format!(
            "copy_buffer_to_image({src}, {dst}, {} regions)",
            regions.len()
        ));
    }

    fn copy_image_to_buffer(&mut self, src: GlName, dst: GlName, regions: &[BufferImageCopy]) {
        self.log(format!(
            "copy_image_to_buffer({src}, {dst}, {} regions)",
            regions.len()
        ));
    }

    fn fill_buffer(&mut self, buffer: GlName, offset: u64, size: u64, data: u32) {
        self.log(format!("fill_buffer({buffer}, {offset}, {size}, {data:#x})"));
    }

    fn begin_query(&mut self, pool: GlName, index: u32) {
        self.log(format!("begin_query({pool}, {index})"));
    }

    fn end_query(&mut self, pool: GlName, index: u32) {
        self.log(format!("end_query({pool}, {index})"));
    }

    fn write_timestamp(&mut self, pool: GlName, index: u32) {
        self.log(format!("write_timestamp({pool}, {index})"));
    }
}
