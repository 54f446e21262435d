use std::sync::{Arc, Mutex};

use tethys_gpu::*;

/// Backend whose contexts all log into one shared trace, so tests can assert
/// on cross-submission execution order.
struct TracingBackend {
    inner: GlBackend,
    trace: Arc<Mutex<Vec<String>>>,
}

impl TracingBackend {
    fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let trace = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                inner: GlBackend::new(),
                trace: trace.clone(),
            }),
            trace,
        )
    }
}

impl DeviceBackend for TracingBackend {
    fn create_buffer_impl(&self, info: &BufferCreateInfo) -> GlName {
        self.inner.create_buffer_impl(info)
    }

    fn create_image_impl(&self, info: &ImageCreateInfo) -> GlName {
        self.inner.create_image_impl(info)
    }

    fn create_image_view_impl(&self, image: GlName) -> GlName {
        self.inner.create_image_view_impl(image)
    }

    fn create_sampler_impl(&self, info: &SamplerCreateInfo) -> GlName {
        self.inner.create_sampler_impl(info)
    }

    fn create_query_pool_impl(&self, query_type: QueryType, query_count: u32) -> GlName {
        self.inner.create_query_pool_impl(query_type, query_count)
    }

    fn create_descriptor_set_layout_impl(
        &self,
        bindings: &[Binding],
        immutable_sampler_count: u32,
    ) -> Result<()> {
        self.inner
            .create_descriptor_set_layout_impl(bindings, immutable_sampler_count)
    }

    fn create_renderpass_impl(
        &self,
        info: &RenderpassCreateInfo,
        validated: &ValidatedRenderpass,
    ) -> Result<()> {
        self.inner.create_renderpass_impl(info, validated)
    }

    fn update_descriptor_sets_impl(&self, counts: &DescriptorBatchCounts) {
        self.inner.update_descriptor_sets_impl(counts)
    }

    fn create_compute_pipeline_impl(&self, info: &ComputePipelineCreateInfo) -> Option<GlName> {
        self.inner.create_compute_pipeline_impl(info)
    }

    fn create_graphics_pipeline_impl(&self, info: &GraphicsPipelineCreateInfo) -> Option<GlName> {
        self.inner.create_graphics_pipeline_impl(info)
    }

    fn create_ray_tracing_pipeline_impl(&self, info: &RayTracingPipelineCreateInfo) -> Option<()> {
        self.inner.create_ray_tracing_pipeline_impl(info)
    }

    fn create_context(
        &self,
        _queue_family_index: u32,
        _queue_index: u32,
    ) -> Box<dyn GlContext + Send> {
        Box::new(TracingContext {
            trace: self.trace.clone(),
            next_fbo: 1,
        })
    }
}

struct TracingContext {
    trace: Arc<Mutex<Vec<String>>>,
    next_fbo: GlName,
}

impl TracingContext {
    fn log(&self, call: String) {
        self.trace.lock().unwrap().push(call);
    }
}

impl GlContext for TracingContext {
    fn create_framebuffer(&mut self, attachments: &[GlName]) -> GlName {
        let fbo = self.next_fbo;
        self.next_fbo += 1;
        self.log(format!("create_framebuffer({attachments:?})"));
        fbo
    }
    fn bind_framebuffer(&mut self, fbo: GlName) {
        self.log(format!("bind_framebuffer({fbo})"));
    }
    fn clear_color(&mut self, buffer_index: u32, _value: &ClearValue) {
        self.log(format!("clear_color({buffer_index})"));
    }
    fn clear_depth_stencil(&mut self, _depth: f32, _stencil: u32) {
        self.log("clear_depth_stencil".to_string());
    }
    fn set_viewport(&mut self, _viewport: &Viewport) {
        self.log("set_viewport".to_string());
    }
    fn set_scissor(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {
        self.log("set_scissor".to_string());
    }
    fn enable(&mut self, capability: Capability) {
        self.log(format!("enable({capability:?})"));
    }
    fn disable(&mut self, capability: Capability) {
        self.log(format!("disable({capability:?})"));
    }
    fn set_stencil_reference(&mut self, _reference: u32) {
        self.log("set_stencil_reference".to_string());
    }
    fn set_blend_constants(&mut self, _constants: [f32; 4]) {
        self.log("set_blend_constants".to_string());
    }
    fn use_program(&mut self, program: GlName) {
        self.log(format!("use_program({program})"));
    }
    fn bind_descriptor_set(&mut self, slot: u32, _set: &DescriptorSet) {
        self.log(format!("bind_descriptor_set({slot})"));
    }
    fn push_constants(&mut self, _bytes: &[u8]) {
        self.log("push_constants".to_string());
    }
    fn bind_vertex_buffer(&mut self, _binding: u32, _buffer: GlName, _offset: u64) {
        self.log("bind_vertex_buffer".to_string());
    }
    fn bind_index_buffer(&mut self, _buffer: GlName, _offset: u64, _index_type: IndexType) {
        self.log("bind_index_buffer".to_string());
    }
    fn draw_arrays(&mut self, _vc: u32, _ic: u32, _fv: u32, _fi: u32) {
        self.log("draw_arrays".to_string());
    }
    fn draw_elements(&mut self, _ic: u32, _inst: u32, _fi: u32, _vo: i32, _finst: u32) {
        self.log("draw_elements".to_string());
    }
    fn dispatch(&mut self, groups: [u32; 3]) {
        self.log(format!("dispatch({groups:?})"));
    }
    fn dispatch_indirect(&mut self, _buffer: GlName, _offset: u64) {
        self.log("dispatch_indirect".to_string());
    }
    fn memory_barrier(&mut self, _barrier: &MemoryBarrier) {
        self.log("memory_barrier".to_string());
    }
    fn copy_buffer(&mut self, src: GlName, dst: GlName, regions: &[BufferCopy]) {
        self.log(format!("copy_buffer({src}, {dst}, {})", regions.len()));
    }
    fn copy_buffer_to_image(&mut self, _src: GlName, _dst: GlName, regions: &[BufferImageCopy]) {
        self.log(format!("copy_buffer_to_image({})", regions.len()));
    }
    fn copy_image_to_buffer(&mut self, _src: GlName, _dst: GlName, _regions: &[BufferImageCopy]) {
        self.log("copy_image_to_buffer".to_string());
    }
    fn fill_buffer(&mut self, _buffer: GlName, offset: u64, _size: u64, data: u32) {
        self.log(format!("fill_buffer({offset}, {data:#x})"));
    }
    fn begin_query(&mut self, _pool: GlName, index: u32) {
        self.log(format!("begin_query({index})"));
    }
    fn end_query(&mut self, _pool: GlName, index: u32) {
        self.log(format!("end_query({index})"));
    }
    fn write_timestamp(&mut self, _pool: GlName, index: u32) {
        self.log(format!("write_timestamp({index})"));
    }
}

fn tracing_device() -> (Arc<Device>, Arc<Mutex<Vec<String>>>) {
    let _ = pretty_env_logger::try_init();
    let (backend, trace) = TracingBackend::new();
    let device = Device::new(
        Arc::new(PhysicalDevice::reference_descriptor()),
        DeviceCreateInfo {
            features: DeviceFeatures::default(),
            queues: vec![QueueRequest {
                family_index: 0,
                count: 1,
            }],
        },
        backend,
        None,
    )
    .unwrap();
    (device, trace)
}

fn transfer_buffer(device: &Device, name: &str, size: u64, usage: BufferUsage) -> Arc<Buffer> {
    device
        .create_buffer(BufferCreateInfo {
            name: name.to_string(),
            size,
            usage,
        })
        .unwrap()
}

#[test]
fn commands_replay_in_recording_order() {
    let (device, trace) = tracing_device();
    let pool = device.create_command_pool(0).unwrap();
    let buffer = transfer_buffer(&device, "fills", 1024, BufferUsage::TRANSFER_DST);

    // record on worker threads, submit in a known order
    let handles: Vec<_> = (0..2)
        .map(|worker: u32| {
            let device = device.clone();
            let pool = pool.clone();
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                let mut cb = device.create_command_buffer(&pool).unwrap();
                cb.begin().unwrap();
                for step in 0..3u64 {
                    cb.fill_buffer(buffer.clone(), step * 16, 16, worker).unwrap();
                }
                cb.end().unwrap();
                cb
            })
        })
        .collect();
    let mut recorded: Vec<CommandBuffer> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let queue = device.queue(0, 0).unwrap();
    let mut iter = recorded.iter_mut();
    let first = iter.next().unwrap();
    let second = iter.next().unwrap();
    queue.submit(&mut [first], &[], &[]).unwrap();
    queue.submit(&mut [second], &[], &[]).unwrap();

    let trace = trace.lock().unwrap();
    assert_eq!(trace.len(), 6);
    // every command of the first submission lands before the second's
    assert_eq!(trace[0], "fill_buffer(0, 0x0)");
    assert_eq!(trace[2], "fill_buffer(32, 0x0)");
    assert_eq!(trace[3], "fill_buffer(0, 0x1)");
    assert_eq!(trace[5], "fill_buffer(32, 0x1)");
}

#[test]
fn submissions_pin_resources_until_wait_idle() {
    let (device, _trace) = tracing_device();
    let pool = device.create_command_pool(0).unwrap();
    let buffer = transfer_buffer(&device, "pinned", 64, BufferUsage::TRANSFER_DST);

    let mut cb = device.create_command_buffer(&pool).unwrap();
    cb.begin().unwrap();
    cb.fill_buffer(buffer.clone(), 0, 64, 0xdead_beef).unwrap();
    cb.end().unwrap();

    let queue = device.queue(0, 0).unwrap();
    queue.submit(&mut [&mut cb], &[], &[]).unwrap();
    cb.reset().unwrap();

    // the queue's retained clone still holds the buffer
    assert!(Arc::strong_count(&buffer) > 1);
    device.wait_idle();
    assert_eq!(Arc::strong_count(&buffer), 1);
    // calling it again must be harmless
    device.wait_idle();
}

#[test]
fn framebuffer_objects_are_cached_per_context() {
    let (device, trace) = tracing_device();
    let renderpass = device
        .create_renderpass(RenderpassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: Format::R8G8B8A8Unorm,
                samples: SampleCount::X1,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                stencil_load_op: LoadOp::DontCare,
                stencil_store_op: StoreOp::DontCare,
            }],
            subpasses: vec![SubpassDescription {
                color_attachments: vec![Some(ColorAttachmentRef {
                    attachment: 0,
                    resolve_attachment: None,
                })],
                ..Default::default()
            }],
        })
        .unwrap();
    let image = device
        .create_image(ImageCreateInfo {
            name: "target".to_string(),
            format: Format::R8G8B8A8Unorm,
            extent: [64, 64, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::X1,
            usage: ImageUsage::COLOR_ATTACHMENT,
        })
        .unwrap();
    let view = device
        .create_image_view(image, Format::R8G8B8A8Unorm, 0, 1, 0, 1)
        .unwrap();
    let framebuffer = device
        .create_framebuffer(renderpass, vec![view], 64, 64, 1)
        .unwrap();

    let pool = device.create_command_pool(0).unwrap();
    let queue = device.queue(0, 0).unwrap();
    for _ in 0..2 {
        let mut cb = device.create_command_buffer(&pool).unwrap();
        cb.begin().unwrap();
        cb.begin_renderpass(
            framebuffer.clone(),
            vec![ClearValue::ColorF32([0.0; 4])],
        )
        .unwrap();
        cb.end_renderpass().unwrap();
        cb.end().unwrap();
        queue.submit(&mut [&mut cb], &[], &[]).unwrap();
    }

    let trace = trace.lock().unwrap();
    let creates = trace
        .iter()
        .filter(|call| call.starts_with("create_framebuffer"))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(queue.cached_framebuffer_count(), 1);
    device.wait_idle();
}

#[test]
fn draws_outside_a_renderpass_are_rejected() {
    let (device, _trace) = tracing_device();
    let pool = device.create_command_pool(0).unwrap();
    let mut cb = device.create_command_buffer(&pool).unwrap();
    cb.begin().unwrap();
    let err = cb.draw(3, 1, 0, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidCommandBufferState));
    assert_eq!(cb.state(), CommandBufferState::Invalid);
    // only reset recovers the buffer
    cb.reset().unwrap();
    assert_eq!(cb.state(), CommandBufferState::Initial);
}

#[test]
fn staging_overflow_still_makes_progress() {
    let (device, trace) = tracing_device();
    let queue = device.queue(0, 0).unwrap().clone();
    let staging = Arc::new(StreamingBuffer::new(transfer_buffer(
        &device,
        "staging",
        256,
        BufferUsage::TRANSFER_SRC,
    )));
    let transfer = TransferContext::new(device.clone(), queue.clone(), staging).unwrap();
    let dst = transfer_buffer(&device, "upload-target", 4096, BufferUsage::TRANSFER_DST);

    let data = vec![0xa5u8; 4096];
    transfer
        .update_buffer_via_staging_buffer(&dst, 0, &data)
        .unwrap();
    let flushed = transfer.flush().unwrap();
    transfer.scratch_semaphore().wait(flushed);

    let trace = trace.lock().unwrap();
    let copies = trace
        .iter()
        .filter(|call| call.starts_with("copy_buffer("))
        .count();
    // 4096 bytes through a 256 byte scratch: at least 16 chunked copies
    assert!(copies >= 16, "saw {copies} copies");
    assert!(flushed >= 2, "expected several overflow submits");
    device.wait_idle();
}

#[test]
fn image_upload_chunks_by_rows() {
    let (device, trace) = tracing_device();
    let queue = device.queue(0, 0).unwrap().clone();
    let staging = Arc::new(StreamingBuffer::new(transfer_buffer(
        &device,
        "staging",
        1024,
        BufferUsage::TRANSFER_SRC,
    )));
    let transfer = TransferContext::new(device.clone(), queue, staging).unwrap();
    let image = device
        .create_image(ImageCreateInfo {
            name: "texture".to_string(),
            format: Format::R8G8B8A8Unorm,
            extent: [64, 64, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::X1,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        })
        .unwrap();

    // 64x64 rgba8 = 16 KiB through 1 KiB of scratch
    let data = vec![0x3cu8; 64 * 64 * 4];
    transfer
        .update_image_via_staging_buffer(&image, 0, 0, 1, &data)
        .unwrap();
    let flushed = transfer.flush().unwrap();
    transfer.scratch_semaphore().wait(flushed);

    let trace = trace.lock().unwrap();
    let copies = trace
        .iter()
        .filter(|call| call.starts_with("copy_buffer_to_image"))
        .count();
    assert!(copies >= 16, "saw {copies} region copies");
    device.wait_idle();
}

#[test]
fn submit_rejects_wrong_family() {
    let _ = pretty_env_logger::try_init();
    let (backend, _trace) = TracingBackend::new();
    let device = Device::new(
        Arc::new(PhysicalDevice::reference_descriptor()),
        DeviceCreateInfo {
            features: DeviceFeatures::default(),
            queues: vec![
                QueueRequest {
                    family_index: 0,
                    count: 1,
                },
                QueueRequest {
                    family_index: 2,
                    count: 1,
                },
            ],
        },
        backend,
        None,
    )
    .unwrap();

    let pool = device.create_command_pool(2).unwrap();
    let mut cb = device.create_command_buffer(&pool).unwrap();
    cb.begin().unwrap();
    cb.end().unwrap();

    let universal = device.queue(0, 0).unwrap();
    let err = universal.submit(&mut [&mut cb], &[], &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidParameters));
    // the failed submit must not leave the buffer pending
    assert_eq!(cb.state(), CommandBufferState::Executable);
    let transfer_queue = device.queue(2, 0).unwrap();
    transfer_queue.submit(&mut [&mut cb], &[], &[]).unwrap();
    device.wait_idle();
}

#[test]
fn huge_offsets_are_rejected_not_wrapped() {
    let (device, _trace) = tracing_device();
    let pool = device.create_command_pool(0).unwrap();
    let src = transfer_buffer(&device, "src", 256, BufferUsage::TRANSFER_SRC);
    let dst = transfer_buffer(
        &device,
        "dst",
        256,
        BufferUsage::TRANSFER_DST | BufferUsage::TEXEL_VIEW,
    );

    let mut cb = device.create_command_buffer(&pool).unwrap();
    cb.begin().unwrap();
    // offsets near u64::MAX must fail cleanly instead of wrapping past the end
    let err = cb
        .fill_buffer(dst.clone(), u64::MAX - 3, 4, 0)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameters));
    let err = cb
        .copy_buffer(
            src.clone(),
            dst.clone(),
            vec![BufferCopy {
                src_offset: 0,
                dst_offset: u64::MAX - 8,
                size: 16,
            }],
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameters));

    let err = device
        .create_buffer_view(dst.clone(), Format::R8G8B8A8Unorm, u64::MAX - 8, 16)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameters));

    let image = device
        .create_image(ImageCreateInfo {
            name: "target".to_string(),
            format: Format::R8G8B8A8Unorm,
            extent: [16, 16, 1],
            mip_levels: 4,
            array_layers: 1,
            samples: SampleCount::X1,
            usage: ImageUsage::SAMPLED,
        })
        .unwrap();
    let err = device
        .create_image_view(image, Format::R8G8B8A8Unorm, u32::MAX, 2, 0, 1)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameters));
}
